//! ## memwatch-core::alloc
//! **Block layout, the live list and the allocator seams**
//!
//! - `raw`: the underlying allocator the tracker forwards real work to
//! - `block`: header placement in front of user memory, the only pointer
//!   arithmetic in the crate
//! - `list`: intrusive doubly-linked list of live headers
//! - `global`: `GlobalAlloc` adapter and per-thread pool scopes

pub(crate) mod block;
pub(crate) mod list;

pub mod global;
pub mod raw;

pub use block::BLOCK_ALIGN;
