//! ## memwatch-core::tracker::stats
//! **Incrementally maintained statistics tables.**

use memwatch_protocol::{
    GeneralStat, PoolStat, TagStack, MAX_ALLOC_POOL_COUNT, MAX_MARKER_COUNT, MAX_TAG_DEPTH,
};

/// What one block contributes to the tables.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockCharge {
    pub pool: usize,
    pub marker: usize,
    pub order_no: u32,
    pub alloc_by_app: usize,
    pub alloc_total: usize,
}

pub(crate) struct StatTables {
    pub pools: [[PoolStat; MAX_ALLOC_POOL_COUNT]; MAX_TAG_DEPTH],
    pub markers: [PoolStat; MAX_MARKER_COUNT],
    pub general: GeneralStat,
}

impl StatTables {
    pub const fn new() -> Self {
        const EMPTY: PoolStat = PoolStat {
            alloc_by_app: 0,
            alloc_total: 0,
            block_count: 0,
            max_block_size: 0,
        };
        Self {
            pools: [[EMPTY; MAX_ALLOC_POOL_COUNT]; MAX_TAG_DEPTH],
            markers: [EMPTY; MAX_MARKER_COUNT],
            general: GeneralStat {
                real_size: 0,
                alloc_internal: 0,
                internal_block_count: 0,
                ghost_block_count: 0,
                ghost_size: 0,
            },
        }
    }

    /// Charges a new block to every open depth and to its marker.
    pub fn charge(&mut self, tags: &TagStack, block: &BlockCharge) {
        for depth in 0..=tags.depth as usize {
            if let Some(stat) = self.pools[depth].get_mut(block.pool) {
                add(stat, block);
            }
        }
        if let Some(marker) = self.markers.get_mut(block.marker) {
            add(marker, block);
        }
    }

    /// Reverses `charge`. Depths entered after the block was created never
    /// saw it and are left alone.
    pub fn discharge(&mut self, tags: &TagStack, block: &BlockCharge) {
        for depth in 0..=tags.depth as usize {
            if block.order_no < tags.begin[depth] {
                continue;
            }
            if let Some(stat) = self.pools[depth].get_mut(block.pool) {
                sub(stat, block);
            }
        }
        if let Some(marker) = self.markers.get_mut(block.marker) {
            sub(marker, block);
        }
    }

    /// Returns the per-pool stats of `depth` and zeroes them.
    pub fn take_depth(&mut self, depth: usize) -> [PoolStat; MAX_ALLOC_POOL_COUNT] {
        std::mem::take(&mut self.pools[depth])
    }
}

fn add(stat: &mut PoolStat, block: &BlockCharge) {
    stat.alloc_by_app = stat.alloc_by_app.wrapping_add(block.alloc_by_app as u64);
    stat.alloc_total = stat.alloc_total.wrapping_add(block.alloc_total as u64);
    stat.block_count = stat.block_count.wrapping_add(1);
    let size = u32::try_from(block.alloc_by_app).unwrap_or(u32::MAX);
    stat.max_block_size = stat.max_block_size.max(size);
}

fn sub(stat: &mut PoolStat, block: &BlockCharge) {
    stat.alloc_by_app = stat.alloc_by_app.saturating_sub(block.alloc_by_app as u64);
    stat.alloc_total = stat.alloc_total.saturating_sub(block.alloc_total as u64);
    stat.block_count = stat.block_count.saturating_sub(1);
}
