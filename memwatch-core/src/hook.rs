//! ## memwatch-core::hook
//! **C allocator interception.**
//!
//! Replacements for `malloc`, `free`, `realloc`, `calloc` and `strdup` that
//! route through the global tracker. With the `interpose` feature they are
//! exported under the C names so the cdylib works with `LD_PRELOAD`;
//! without it they are ordinary functions.
//!
//! Installation happens on the first hooked call: the originals are looked
//! up with `dlsym(RTLD_NEXT, ..)`. `dlsym` itself may allocate, so while
//! installing, and forever if lookup fails, every call goes straight to
//! glibc's `__libc_*` entry points untracked.

use std::ffi::{c_char, c_void, CStr};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::alloc::global::global;
use crate::pool::AllocPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HookState {
    Uninstalled = 0,
    Installing = 1,
    Installed = 2,
    /// The originals could not be resolved; everything passes through.
    Degraded = 3,
}

impl HookState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninstalled,
            1 => Self::Installing,
            2 => Self::Installed,
            _ => Self::Degraded,
        }
    }
}

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

static STATE: AtomicU8 = AtomicU8::new(HookState::Uninstalled as u8);
static REAL_MALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_REALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_FREE: AtomicUsize = AtomicUsize::new(0);

#[cfg(target_arch = "x86_64")]
extern "C" {
    #[link_name = "__libc_malloc@GLIBC_2.2.5"]
    fn libc_malloc(size: usize) -> *mut c_void;
    #[link_name = "__libc_realloc@GLIBC_2.2.5"]
    fn libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    #[link_name = "__libc_free@GLIBC_2.2.5"]
    fn libc_free(ptr: *mut c_void);
}

#[cfg(target_arch = "aarch64")]
extern "C" {
    #[link_name = "__libc_malloc@GLIBC_2.17"]
    fn libc_malloc(size: usize) -> *mut c_void;
    #[link_name = "__libc_realloc@GLIBC_2.17"]
    fn libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    #[link_name = "__libc_free@GLIBC_2.17"]
    fn libc_free(ptr: *mut c_void);
}

pub fn state() -> HookState {
    HookState::from_u8(STATE.load(Ordering::Acquire))
}

/// Resolves the originals once. Later calls report the outcome; a call
/// racing an installation in progress sees `Installing`.
pub fn install() -> HookState {
    let claimed = STATE.compare_exchange(
        HookState::Uninstalled as u8,
        HookState::Installing as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    match claimed {
        Ok(_) => {
            // SAFETY: symbol lookup only; the results are checked before use.
            let next = if unsafe { resolve_originals() } {
                HookState::Installed
            } else {
                HookState::Degraded
            };
            STATE.store(next as u8, Ordering::Release);
            next
        }
        Err(current) => HookState::from_u8(current),
    }
}

unsafe fn resolve_originals() -> bool {
    let found = [
        (libc::dlsym(libc::RTLD_NEXT, c"malloc".as_ptr()), malloc as usize),
        (libc::dlsym(libc::RTLD_NEXT, c"realloc".as_ptr()), realloc as usize),
        (libc::dlsym(libc::RTLD_NEXT, c"free".as_ptr()), free as usize),
    ];
    // resolving back to ourselves would recurse forever
    if found
        .iter()
        .any(|&(addr, hook)| addr.is_null() || addr as usize == hook)
    {
        return false;
    }
    REAL_MALLOC.store(found[0].0 as usize, Ordering::Release);
    REAL_REALLOC.store(found[1].0 as usize, Ordering::Release);
    REAL_FREE.store(found[2].0 as usize, Ordering::Release);
    true
}

fn tracking() -> bool {
    install() == HookState::Installed
}

/// The original `malloc`, or glibc's own before resolution.
///
/// # Safety
/// Same contract as C `malloc`.
pub unsafe fn real_malloc(size: usize) -> *mut c_void {
    match REAL_MALLOC.load(Ordering::Acquire) {
        0 => libc_malloc(size),
        addr => mem::transmute::<usize, MallocFn>(addr)(size),
    }
}

/// # Safety
/// Same contract as C `realloc`.
pub unsafe fn real_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    match REAL_REALLOC.load(Ordering::Acquire) {
        0 => libc_realloc(ptr, size),
        addr => mem::transmute::<usize, ReallocFn>(addr)(ptr, size),
    }
}

/// # Safety
/// Same contract as C `free`.
pub unsafe fn real_free(ptr: *mut c_void) {
    match REAL_FREE.load(Ordering::Acquire) {
        0 => libc_free(ptr),
        addr => mem::transmute::<usize, FreeFn>(addr)(ptr),
    }
}

/// # Safety
/// Same contract as C `malloc`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    if !tracking() {
        return real_malloc(size);
    }
    global()
        .allocate(size, AllocPool::APPLICATION)
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

/// # Safety
/// Same contract as C `free`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if !tracking() {
        real_free(ptr);
        return;
    }
    global().deallocate(ptr.cast());
}

/// # Safety
/// Same contract as C `realloc`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if !tracking() {
        return real_realloc(ptr, size);
    }
    global()
        .reallocate(ptr.cast(), size)
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

/// # Safety
/// Same contract as C `calloc`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    let Some(total) = count.checked_mul(size) else {
        return ptr::null_mut();
    };
    let block = malloc(total);
    if !block.is_null() {
        ptr::write_bytes(block.cast::<u8>(), 0, total);
    }
    block
}

/// # Safety
/// `s` points to a NUL-terminated string.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn strdup(s: *const c_char) -> *mut c_char {
    let len = CStr::from_ptr(s).to_bytes_with_nul().len();
    let copy = malloc(len).cast::<c_char>();
    if !copy.is_null() {
        ptr::copy_nonoverlapping(s, copy, len);
    }
    copy
}
