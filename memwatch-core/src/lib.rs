//! # memwatch-core
//!
//! In-process allocation tracker. Every tracked block carries a header with
//! its pool, marker, call-site hash and sequence number, and sits in an
//! intrusive list of live blocks. Statistics are maintained incrementally per
//! pool, per open tag-scope depth and per marker, so periodic snapshots are a
//! copy rather than a scan.
//!
//! ### Entry points:
//! - [`Tracker`]: owned tracker over any [`RawAllocator`]
//! - [`global()`] / [`TrackingAllocator`]: the process-wide tracker and its
//!   `GlobalAlloc` adapter
//! - `hook`: C `malloc` family replacements (linux-gnu)
//!
//! ### Locking:
//! Spin locks only, held for a few pointer updates. Allocation never blocks
//! on I/O and never logs.

#[cfg(all(
    feature = "interpose",
    not(all(
        target_os = "linux",
        target_env = "gnu",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))
))]
compile_error!("the `interpose` feature needs linux-gnu on x86_64 or aarch64");

pub mod alloc;
pub mod error;
pub mod fingerprint;
#[cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub mod hook;
pub mod pool;
pub mod reentry;
pub mod symbols;
pub mod tracker;

pub use alloc::global::{current_pool, global, PoolScope, TrackingAllocator};
pub use alloc::raw::{RawAllocator, SystemAllocator};
pub use error::ContractViolation;
pub use fingerprint::Fingerprint;
pub use pool::{AllocPool, DEFAULT_MARKER, DEFAULT_TAG};
pub use symbols::{BacktraceSymbolizer, Symbolizer};
pub use tracker::{
    DumpBuffer, IntervalCallback, IntervalKind, TagInterval, TagScope, Tracker, FULL_RANGE,
};

pub mod prelude {
    pub use crate::error::ContractViolation;
    pub use crate::pool::AllocPool;
    pub use crate::tracker::{TagInterval, Tracker};
}
