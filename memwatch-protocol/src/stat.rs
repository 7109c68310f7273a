//! ## memwatch-protocol::stat
//! **Lightweight periodic statistics snapshot.**
//!
//! Layout: a 120-byte fixed head (timestamp, counters, tag stack, general
//! record) followed by `(depth + 1) * alloc_pool_count` pool records in
//! depth-major order, then `marker_count` marker records. Each record is
//! 24 bytes.

use bytes::{Buf, BufMut};

use crate::{ensure_capacity, ensure_remaining, ProtocolError, MAX_ALLOC_POOL_COUNT, MAX_MARKER_COUNT, MAX_TAG_DEPTH};

/// Running totals for one (depth, pool) pair or one marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStat {
    /// Bytes requested by callers.
    pub alloc_by_app: u64,
    /// Bytes reserved including header and alignment padding.
    pub alloc_total: u64,
    pub block_count: u32,
    /// Largest single request seen; never decreases.
    pub max_block_size: u32,
}

impl PoolStat {
    pub const ENCODED_SIZE: usize = 24;

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.alloc_by_app);
        buf.put_u64(self.alloc_total);
        buf.put_u32(self.block_count);
        buf.put_u32(self.max_block_size);
    }

    fn get(data: &mut &[u8]) -> Self {
        Self {
            alloc_by_app: data.get_u64(),
            alloc_total: data.get_u64(),
            block_count: data.get_u32(),
            max_block_size: data.get_u32(),
        }
    }
}

/// Tracker-wide counters outside the per-pool tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneralStat {
    /// Bytes held by the underlying allocator for tracked blocks.
    pub real_size: u64,
    /// Bytes currently held by the tracker's own bookkeeping.
    pub alloc_internal: u64,
    pub internal_block_count: u32,
    /// Blocks freed that were never tracked.
    pub ghost_block_count: u32,
    pub ghost_size: u64,
}

impl GeneralStat {
    pub const ENCODED_SIZE: usize = 32;
}

/// The open tag scopes. Slot 0 is the implicit root scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagStack {
    /// Index of the innermost open scope; 0 when only the root is open.
    pub depth: u32,
    pub stack: [u32; MAX_TAG_DEPTH],
    /// Sequence number recorded when each scope was entered.
    pub begin: [u32; MAX_TAG_DEPTH],
}

impl TagStack {
    pub const ENCODED_SIZE: usize = 4 + 8 * MAX_TAG_DEPTH;

    /// Tag of the innermost open scope.
    pub fn top(&self) -> u32 {
        self.stack[self.depth as usize]
    }
}

/// Fixed part of a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatHead {
    /// Milliseconds since the session started; stamped by the server.
    pub timestamp: u64,
    /// Sequence number the next tracked block will receive.
    pub alloc_count: u32,
    pub alloc_pool_count: u32,
    pub marker_count: u32,
    pub tags: TagStack,
    pub general: GeneralStat,
}

impl StatHead {
    pub const ENCODED_SIZE: usize = 8 + 4 * 3 + TagStack::ENCODED_SIZE + GeneralStat::ENCODED_SIZE;

    pub fn pool_record_count(&self) -> usize {
        (self.tags.depth as usize + 1) * self.alloc_pool_count as usize
    }

    pub fn encoded_size(&self) -> usize {
        StatSnapshot::size_for(
            self.tags.depth as usize,
            self.alloc_pool_count as usize,
            self.marker_count as usize,
        )
    }

    /// Encodes the head followed by the given records. Record counts must
    /// agree with the head.
    pub fn encode_with<B: BufMut>(
        &self,
        buf: &mut B,
        pools: &[PoolStat],
        markers: &[PoolStat],
    ) -> Result<(), ProtocolError> {
        if pools.len() != self.pool_record_count() {
            return Err(ProtocolError::CountMismatch {
                field: "pool_stats",
                expected: self.pool_record_count(),
                actual: pools.len(),
            });
        }
        if markers.len() != self.marker_count as usize {
            return Err(ProtocolError::CountMismatch {
                field: "marker_stats",
                expected: self.marker_count as usize,
                actual: markers.len(),
            });
        }
        ensure_capacity(buf, self.encoded_size())?;

        buf.put_u64(self.timestamp);
        buf.put_u32(self.alloc_count);
        buf.put_u32(self.alloc_pool_count);
        buf.put_u32(self.marker_count);
        buf.put_u32(self.tags.depth);
        for tag in self.tags.stack {
            buf.put_u32(tag);
        }
        for begin in self.tags.begin {
            buf.put_u32(begin);
        }
        buf.put_u64(self.general.real_size);
        buf.put_u64(self.general.alloc_internal);
        buf.put_u32(self.general.internal_block_count);
        buf.put_u32(self.general.ghost_block_count);
        buf.put_u64(self.general.ghost_size);
        for record in pools.iter().chain(markers) {
            record.put(buf);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub head: StatHead,
    /// Depth-major: record `depth * alloc_pool_count + pool`.
    pub pools: Vec<PoolStat>,
    pub markers: Vec<PoolStat>,
}

impl StatSnapshot {
    /// Byte offset of the timestamp inside an encoded snapshot.
    pub const TIMESTAMP_OFFSET: usize = 0;

    pub const fn size_for(depth: usize, pool_count: usize, marker_count: usize) -> usize {
        StatHead::ENCODED_SIZE + PoolStat::ENCODED_SIZE * ((depth + 1) * pool_count + marker_count)
    }

    pub fn encoded_size(&self) -> usize {
        self.head.encoded_size()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        self.head.encode_with(buf, &self.pools, &self.markers)
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_remaining(&data, StatHead::ENCODED_SIZE, "stat snapshot")?;
        let timestamp = data.get_u64();
        let alloc_count = data.get_u32();
        let alloc_pool_count = data.get_u32();
        let marker_count = data.get_u32();
        let depth = data.get_u32();
        let mut stack = [0u32; MAX_TAG_DEPTH];
        for slot in stack.iter_mut() {
            *slot = data.get_u32();
        }
        let mut begin = [0u32; MAX_TAG_DEPTH];
        for slot in begin.iter_mut() {
            *slot = data.get_u32();
        }
        let general = GeneralStat {
            real_size: data.get_u64(),
            alloc_internal: data.get_u64(),
            internal_block_count: data.get_u32(),
            ghost_block_count: data.get_u32(),
            ghost_size: data.get_u64(),
        };

        check_max("tag depth", depth, MAX_TAG_DEPTH as u32 - 1)?;
        check_max("alloc_pool_count", alloc_pool_count, MAX_ALLOC_POOL_COUNT as u32)?;
        check_max("marker_count", marker_count, MAX_MARKER_COUNT as u32)?;

        let head = StatHead {
            timestamp,
            alloc_count,
            alloc_pool_count,
            marker_count,
            tags: TagStack {
                depth,
                stack,
                begin,
            },
            general,
        };
        let pool_records = head.pool_record_count();
        ensure_remaining(
            &data,
            PoolStat::ENCODED_SIZE * (pool_records + marker_count as usize),
            "stat records",
        )?;
        let pools = (0..pool_records).map(|_| PoolStat::get(&mut data)).collect();
        let markers = (0..marker_count).map(|_| PoolStat::get(&mut data)).collect();

        Ok(Self {
            head,
            pools,
            markers,
        })
    }

    /// Record for `pool` at tag `depth`, if that depth is open.
    pub fn pool_stat(&self, depth: usize, pool: usize) -> Option<&PoolStat> {
        let pool_count = self.head.alloc_pool_count as usize;
        if pool >= pool_count || depth > self.head.tags.depth as usize {
            return None;
        }
        self.pools.get(depth * pool_count + pool)
    }

    /// Overwrites the timestamp of an encoded snapshot in place.
    pub fn patch_timestamp(encoded: &mut [u8], timestamp: u64) -> Result<(), ProtocolError> {
        patch_u64(encoded, Self::TIMESTAMP_OFFSET, timestamp)
    }
}

fn check_max(field: &'static str, value: u32, max: u32) -> Result<(), ProtocolError> {
    if value > max {
        return Err(ProtocolError::OutOfRange { field, value, max });
    }
    Ok(())
}

pub(crate) fn patch_u64(encoded: &mut [u8], offset: usize, value: u64) -> Result<(), ProtocolError> {
    let available = encoded.len();
    let slot = encoded
        .get_mut(offset..offset + 8)
        .ok_or(ProtocolError::BufferTooSmall {
            needed: offset + 8,
            available,
        })?;
    slot.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatSnapshot {
        let mut tags = TagStack::default();
        tags.depth = 1;
        tags.stack[1] = 2;
        tags.begin[1] = 40;
        let head = StatHead {
            timestamp: 0,
            alloc_count: 57,
            alloc_pool_count: 2,
            marker_count: 1,
            tags,
            general: GeneralStat {
                real_size: 4096,
                alloc_internal: 512,
                internal_block_count: 3,
                ghost_block_count: 1,
                ghost_size: 24,
            },
        };
        let record = |n: u32| PoolStat {
            alloc_by_app: n as u64 * 16,
            alloc_total: n as u64 * 80,
            block_count: n,
            max_block_size: 16,
        };
        StatSnapshot {
            head,
            pools: vec![record(4), record(1), record(2), record(0)],
            markers: vec![record(5)],
        }
    }

    #[test]
    fn test_head_is_120_bytes() {
        assert_eq!(StatHead::ENCODED_SIZE, 120);
        assert_eq!(StatSnapshot::size_for(0, 1, 0), 144);
    }

    #[test]
    fn test_snapshot_decodes_what_was_encoded() {
        let snapshot = sample();
        let mut out = Vec::new();
        snapshot.encode(&mut out).unwrap();
        assert_eq!(out.len(), 120 + 5 * 24);

        let decoded = StatSnapshot::decode(&out).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.head.tags.top(), 2);
        assert_eq!(decoded.pool_stat(1, 0).unwrap().block_count, 2);
        assert!(decoded.pool_stat(2, 0).is_none());
        assert!(decoded.pool_stat(0, 2).is_none());
    }

    #[test]
    fn test_record_count_must_match_head() {
        let mut snapshot = sample();
        snapshot.pools.pop();
        let result = snapshot.encode(&mut Vec::new());
        assert_eq!(
            result,
            Err(ProtocolError::CountMismatch {
                field: "pool_stats",
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_patch_timestamp() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        StatSnapshot::patch_timestamp(&mut out, 1234).unwrap();
        assert_eq!(StatSnapshot::decode(&out).unwrap().head.timestamp, 1234);
        assert!(StatSnapshot::patch_timestamp(&mut out[..4], 1).is_err());
    }

    #[test]
    fn test_depth_out_of_range() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        out[20..24].copy_from_slice(&(MAX_TAG_DEPTH as u32).to_be_bytes());
        assert!(matches!(
            StatSnapshot::decode(&out),
            Err(ProtocolError::OutOfRange { field: "tag depth", .. })
        ));
    }

    #[test]
    fn test_truncated_records() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        assert!(matches!(
            StatSnapshot::decode(&out[..130]),
            Err(ProtocolError::Truncated { what: "stat records", .. })
        ));
    }
}
