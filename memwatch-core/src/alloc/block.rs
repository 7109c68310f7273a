//! ## memwatch-core::alloc::block
//! **Block header placement.**
//!
//! Every tracked allocation is laid out as `[padding][BlockHeader][user bytes]`
//! inside one real allocation. The header's last word is the live mark, so
//! it sits immediately before the user pointer. This module is the only
//! place that turns a user pointer into a header or back.

use std::mem::{offset_of, size_of};
use std::ptr::{self, NonNull};

use crate::pool::AllocPool;

/// Value of `BlockHeader::mark` while the block is live.
pub(crate) const BLOCK_MARK: usize = 0x00BA_0BAB;
/// Written over the mark on release so a stale pointer is not taken for live.
const DEAD_MARK: usize = 0x00DE_AD00;
/// Alignment of every user pointer and every reserved size.
pub const BLOCK_ALIGN: usize = 16;
/// Alignment the C allocator guarantees for any request.
const MALLOC_ALIGN: usize = 2 * size_of::<usize>();

#[repr(C)]
pub(crate) struct BlockHeader {
    pub prev: *mut BlockHeader,
    pub next: *mut BlockHeader,
    /// Start of the real allocation; differs from the header address for
    /// over-aligned blocks.
    pub real_start: *mut u8,
    pub alloc_by_app: usize,
    pub alloc_total: usize,
    pub order_no: u32,
    pub fingerprint_hash: u32,
    pub pool: u32,
    pub marker: u32,
    #[cfg(target_pointer_width = "32")]
    _pad: [u32; 2],
    pub mark: usize,
}

pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % BLOCK_ALIGN == 0);
const _: () = assert!(offset_of!(BlockHeader, mark) + size_of::<usize>() == HEADER_SIZE);

/// Values recorded in a fresh header.
pub(crate) struct BlockInit {
    pub real_start: NonNull<u8>,
    pub alloc_by_app: usize,
    pub alloc_total: usize,
    pub pool: AllocPool,
    pub marker: u32,
    pub fingerprint_hash: u32,
}

/// Sizes for one allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub align: usize,
    pub total: usize,
}

impl BlockLayout {
    /// Layout for `size` user bytes at `align` (a power of two). `None` when
    /// the total does not fit in `usize`.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        let align = align.max(BLOCK_ALIGN);
        let slack = align.saturating_sub(MALLOC_ALIGN);
        let total = HEADER_SIZE.checked_add(size)?.checked_add(slack)?;
        let total = round_up(total, BLOCK_ALIGN)?;
        Some(Self { align, total })
    }

    /// User address inside a real allocation starting at `real`. The slack
    /// reserved in `total` covers the distance from a `MALLOC_ALIGN`-aligned
    /// start to the next `align` boundary.
    pub fn user_addr(&self, real: usize) -> usize {
        let first = real + HEADER_SIZE;
        (first + self.align - 1) & !(self.align - 1)
    }
}

fn round_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Writes a header immediately before `user` and returns it.
///
/// # Safety
/// `user - HEADER_SIZE .. user` lies inside the live real allocation
/// described by `init`, and `user` is `BLOCK_ALIGN`-aligned.
pub(crate) unsafe fn write_header(user: NonNull<u8>, init: BlockInit) -> NonNull<BlockHeader> {
    let header = user.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>();
    ptr::write(
        header,
        BlockHeader {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            real_start: init.real_start.as_ptr(),
            alloc_by_app: init.alloc_by_app,
            alloc_total: init.alloc_total,
            order_no: 0,
            fingerprint_hash: init.fingerprint_hash,
            pool: init.pool.index(),
            marker: init.marker,
            #[cfg(target_pointer_width = "32")]
            _pad: [0; 2],
            mark: BLOCK_MARK,
        },
    );
    NonNull::new_unchecked(header)
}

/// The header of a tracked block, or `None` for memory the tracker never
/// handed out.
///
/// # Safety
/// `user` was returned by the tracker or by the underlying allocator and
/// is still live, so the word before it is readable.
pub(crate) unsafe fn header_of(user: NonNull<u8>) -> Option<NonNull<BlockHeader>> {
    let mark = ptr::read_unaligned(user.as_ptr().sub(size_of::<usize>()).cast::<usize>());
    if mark != BLOCK_MARK {
        return None;
    }
    Some(NonNull::new_unchecked(
        user.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>(),
    ))
}

/// The pointer handed to the caller for `header`.
pub(crate) fn user_ptr(header: NonNull<BlockHeader>) -> NonNull<u8> {
    // SAFETY: headers are only created by `write_header`, directly in
    // front of their user bytes inside the same allocation.
    unsafe { NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
}

/// Clears the live mark before the real allocation is released.
///
/// # Safety
/// `header` is a live header no longer linked into any list.
pub(crate) unsafe fn retire(header: NonNull<BlockHeader>) {
    ptr::addr_of_mut!((*header.as_ptr()).mark).write(DEAD_MARK);
}
