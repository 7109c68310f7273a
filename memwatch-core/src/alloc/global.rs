//! ## memwatch-core::alloc::global
//! **The process-wide tracker and its `GlobalAlloc` adapter.**
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: memwatch_core::TrackingAllocator = memwatch_core::TrackingAllocator;
//! ```
//!
//! The tracker is built on first use, from inside the first allocation, and
//! never torn down.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;

use spin::Once;

use super::block::BLOCK_ALIGN;
use crate::pool::AllocPool;
use crate::tracker::Tracker;

static GLOBAL: Once<Tracker> = Once::new();

thread_local! {
    static POOL: Cell<u32> = const { Cell::new(0) };
}

/// The process-wide tracker.
pub fn global() -> &'static Tracker {
    GLOBAL.call_once(Tracker::new)
}

/// Pool the calling thread's Rust allocations are attributed to.
pub fn current_pool() -> AllocPool {
    POOL.try_with(Cell::get)
        .map(AllocPool::from_raw)
        .unwrap_or(AllocPool::APPLICATION)
}

/// Attributes the current thread's allocations to a pool until dropped.
#[must_use]
pub struct PoolScope {
    previous: AllocPool,
    _not_send: PhantomData<*const ()>,
}

impl PoolScope {
    pub fn enter(pool: AllocPool) -> Self {
        let previous = current_pool();
        let _ = POOL.try_with(|current| current.set(pool.index()));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for PoolScope {
    fn drop(&mut self) {
        let previous = self.previous.index();
        let _ = POOL.try_with(|current| current.set(previous));
    }
}

/// Routes every Rust heap allocation through [`global()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let tracker = global();
        let pool = current_pool();
        let block = if layout.align() <= BLOCK_ALIGN {
            tracker.allocate(layout.size(), pool)
        } else {
            // Layout alignment is always a power of two.
            tracker
                .aligned_allocate(layout.size(), layout.align(), pool)
                .ok()
                .flatten()
        };
        block.map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        global().deallocate(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let tracker = global();
        if layout.align() <= BLOCK_ALIGN {
            return tracker
                .reallocate(ptr, new_size)
                .map_or(ptr::null_mut(), |p| p.as_ptr());
        }
        let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
            return ptr::null_mut();
        };
        let fresh = self.alloc(new_layout);
        if !fresh.is_null() {
            ptr::copy_nonoverlapping(ptr, fresh, layout.size().min(new_size));
            self.dealloc(ptr, layout);
        }
        fresh
    }
}
