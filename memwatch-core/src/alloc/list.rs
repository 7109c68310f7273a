//! ## memwatch-core::alloc::list
//! **Intrusive doubly-linked list of live block headers.**
//!
//! New blocks go to the head, so walking from the head visits blocks in
//! descending sequence-number order. The list never allocates.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use super::block::BlockHeader;

pub(crate) struct LiveList {
    head: *mut BlockHeader,
}

// SAFETY: the list is only reachable through the tracker's state lock, and
// the headers it points at are owned by the tracker until unlinked.
unsafe impl Send for LiveList {}

impl LiveList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// # Safety
    /// `block` is a live header that is not linked into any list.
    pub unsafe fn push_front(&mut self, block: NonNull<BlockHeader>) {
        let node = block.as_ptr();
        (*node).prev = ptr::null_mut();
        (*node).next = self.head;
        if let Some(head) = self.head.as_mut() {
            head.prev = node;
        }
        self.head = node;
    }

    /// # Safety
    /// `block` is currently linked into this list.
    pub unsafe fn unlink(&mut self, block: NonNull<BlockHeader>) {
        let node = block.as_ptr();
        let prev = (*node).prev;
        let next = (*node).next;
        if let Some(prev) = prev.as_mut() {
            prev.next = next;
        }
        if let Some(next) = next.as_mut() {
            next.prev = prev;
        }
        if self.head == node {
            self.head = next;
        }
        (*node).prev = ptr::null_mut();
        (*node).next = ptr::null_mut();
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            cur: self.head,
            _list: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

/// Newest-first walk over the live headers.
pub(crate) struct Iter<'a> {
    cur: *mut BlockHeader,
    _list: PhantomData<&'a LiveList>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a BlockHeader;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: every linked node is a live header, and the borrow on the
        // list keeps it from being unlinked while we walk.
        let node = unsafe { self.cur.as_ref()? };
        self.cur = node.next;
        Some(node)
    }
}
