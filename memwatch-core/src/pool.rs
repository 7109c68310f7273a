//! ## memwatch-core::pool
//! **Allocation pool identifiers.**

use memwatch_protocol::MAX_ALLOC_POOL_COUNT;

use crate::error::ContractViolation;

/// Tag attributed to allocations outside any explicit scope.
pub const DEFAULT_TAG: u32 = 0;
/// Marker active until the program selects another.
pub const DEFAULT_MARKER: u32 = 0;

/// Index into the pool registry, or the tracker's own internal pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocPool(u32);

impl AllocPool {
    pub const APPLICATION: Self = Self(0);
    pub const RENDER_BATCH: Self = Self(1);
    pub const COMPONENT: Self = Self(2);
    pub const ENTITY: Self = Self(3);
    /// Bookkeeping allocations made by the tracker itself. They are counted
    /// in the general record only and never enter the live list.
    pub const INTERNAL: Self = Self(u32::MAX);

    /// Number of pools registered out of the box.
    pub const PREDEFINED: u32 = 4;

    pub fn new(index: u32) -> Result<Self, ContractViolation> {
        if index as usize >= MAX_ALLOC_POOL_COUNT {
            return Err(ContractViolation::InvalidPool(index));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn is_internal(self) -> bool {
        (self.0 as i32) < 0
    }

    /// Rebuilds a pool from a block header field.
    pub(crate) fn from_raw(index: u32) -> Self {
        Self(index)
    }
}

impl Default for AllocPool {
    fn default() -> Self {
        Self::APPLICATION
    }
}
