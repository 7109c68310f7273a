//! ## memwatch-core::alloc::raw
//! **The underlying allocator the tracker forwards real work to.**

use std::ffi::c_void;

/// Memory source behind the tracker. Implementations must never call back
/// into tracking.
pub trait RawAllocator: Send + Sync {
    /// # Safety
    /// Same contract as C `malloc`.
    unsafe fn malloc(&self, size: usize) -> *mut u8;

    /// # Safety
    /// `ptr` is null or was returned by this allocator and not yet freed.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// # Safety
    /// `ptr` is null or was returned by this allocator and not yet freed.
    unsafe fn free(&self, ptr: *mut u8);

    /// Bytes actually usable at `ptr`, 0 when the platform cannot tell.
    ///
    /// # Safety
    /// `ptr` was returned by this allocator and not yet freed.
    unsafe fn usable_size(&self, _ptr: *mut u8) -> usize {
        0
    }
}

/// The process's C allocator. With the `interpose` feature the calls go to
/// the originals resolved by the hook instead of the exported names.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    #[inline]
    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        sys::malloc(size).cast()
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        sys::realloc(ptr.cast(), size).cast()
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        sys::free(ptr.cast())
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        sys::usable_size(ptr.cast())
    }
}

#[cfg(feature = "interpose")]
mod sys {
    pub(super) use crate::hook::{real_free as free, real_malloc as malloc, real_realloc as realloc};

    pub(super) unsafe fn usable_size(ptr: *mut super::c_void) -> usize {
        libc::malloc_usable_size(ptr)
    }
}

#[cfg(not(feature = "interpose"))]
mod sys {
    use super::c_void;

    pub(super) unsafe fn malloc(size: usize) -> *mut c_void {
        libc::malloc(size)
    }

    pub(super) unsafe fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        libc::realloc(ptr, size)
    }

    pub(super) unsafe fn free(ptr: *mut c_void) {
        libc::free(ptr)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) unsafe fn usable_size(ptr: *mut c_void) -> usize {
        libc::malloc_usable_size(ptr)
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub(super) unsafe fn usable_size(ptr: *mut c_void) -> usize {
        libc::malloc_size(ptr)
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    pub(super) unsafe fn usable_size(_ptr: *mut c_void) -> usize {
        0
    }
}
