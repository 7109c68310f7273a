//! ## memwatch-core::reentry
//! **Per-thread internal scope.**
//!
//! While a thread is inside an internal scope, every allocation it makes
//! through the global adapter or the C hooks takes the internal path:
//! general counters only, no list insertion, no fingerprint. The tracker
//! opens a scope around fingerprint interning, symbol resolution and dump
//! building so its own containers never recurse into tracking.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static INTERNAL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Guard returned by [`enter_internal`]. Not `Send`: it must be dropped on
/// the thread that created it.
#[must_use]
pub struct InternalScope {
    _not_send: PhantomData<*const ()>,
}

pub fn enter_internal() -> InternalScope {
    let _ = INTERNAL_DEPTH.try_with(|depth| depth.set(depth.get().saturating_add(1)));
    InternalScope {
        _not_send: PhantomData,
    }
}

impl Drop for InternalScope {
    fn drop(&mut self) {
        let _ = INTERNAL_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// True while the current thread is inside an internal scope. Threads whose
/// locals are already torn down count as internal.
pub fn is_internal() -> bool {
    INTERNAL_DEPTH.try_with(|depth| depth.get() > 0).unwrap_or(true)
}
