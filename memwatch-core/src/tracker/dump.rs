//! ## memwatch-core::tracker::dump
//! **Heap dump buffers owned by the underlying allocator.**

use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::alloc::raw::RawAllocator;

/// A dump built by [`Tracker::get_dump`](crate::Tracker::get_dump).
///
/// The memory comes straight from the underlying allocator and goes back
/// there on drop, so a dump never shows up in the statistics it describes
/// and cannot be released through the wrong allocator.
pub struct DumpBuffer<A: RawAllocator> {
    ptr: NonNull<u8>,
    len: usize,
    user_size: usize,
    raw: A,
}

// SAFETY: the buffer is uniquely owned heap memory.
unsafe impl<A: RawAllocator + Send> Send for DumpBuffer<A> {}
unsafe impl<A: RawAllocator + Sync> Sync for DumpBuffer<A> {}

impl<A: RawAllocator> DumpBuffer<A> {
    /// Zeroed buffer of `len` bytes, `None` when the allocator is out of
    /// memory.
    pub(crate) fn zeroed(raw: A, len: usize, user_size: usize) -> Option<Self> {
        // SAFETY: plain C allocation, zeroed before any read.
        let ptr = NonNull::new(unsafe { raw.malloc(len.max(1)) })?;
        unsafe { ptr.as_ptr().write_bytes(0, len) };
        Some(Self {
            ptr,
            len,
            user_size,
            raw,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `len` initialized bytes owned by `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `len` initialized bytes uniquely owned by `self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The zeroed area reserved in front of the dump for the caller, e.g.
    /// for a protocol header.
    pub fn user_area_mut(&mut self) -> &mut [u8] {
        let user_size = self.user_size;
        &mut self.as_mut_slice()[..user_size]
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    /// The encoded dump after the user area.
    pub fn payload(&self) -> &[u8] {
        &self.as_slice()[self.user_size..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let user_size = self.user_size;
        &mut self.as_mut_slice()[user_size..]
    }
}

impl<A: RawAllocator> AsRef<[u8]> for DumpBuffer<A> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<A: RawAllocator> AsMut<[u8]> for DumpBuffer<A> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl<A: RawAllocator> Drop for DumpBuffer<A> {
    fn drop(&mut self) {
        // SAFETY: allocated by `self.raw` in `zeroed` and freed only here.
        unsafe { self.raw.free(self.ptr.as_ptr()) }
    }
}

impl<A: RawAllocator> fmt::Debug for DumpBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpBuffer")
            .field("len", &self.len)
            .field("user_size", &self.user_size)
            .finish()
    }
}
