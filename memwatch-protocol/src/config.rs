//! ## memwatch-protocol::config
//! **Stat config descriptor, sent once per session.**
//!
//! Six `u32` counters followed by one name record per registered tag, then
//! per pool, then per marker.

use bytes::{Buf, BufMut};

use crate::{
    ensure_capacity, ensure_remaining, NameRecord, ProtocolError, MAX_ALLOC_POOL_COUNT,
    MAX_MARKER_COUNT, MAX_NAME_LENGTH, MAX_TAG_COUNT,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatConfig {
    pub max_tag_count: u32,
    pub max_alloc_pool_count: u32,
    pub max_marker_count: u32,
    pub tags: Vec<NameRecord>,
    pub pools: Vec<NameRecord>,
    pub markers: Vec<NameRecord>,
}

impl StatConfig {
    pub const FIXED_SIZE: usize = 6 * 4;

    pub fn new(tags: Vec<NameRecord>, pools: Vec<NameRecord>, markers: Vec<NameRecord>) -> Self {
        Self {
            max_tag_count: MAX_TAG_COUNT as u32,
            max_alloc_pool_count: MAX_ALLOC_POOL_COUNT as u32,
            max_marker_count: MAX_MARKER_COUNT as u32,
            tags,
            pools,
            markers,
        }
    }

    /// Wire size for the given registry counts.
    pub const fn size_for(tag_count: usize, pool_count: usize, marker_count: usize) -> usize {
        Self::FIXED_SIZE + MAX_NAME_LENGTH * (tag_count + pool_count + marker_count)
    }

    pub fn encoded_size(&self) -> usize {
        Self::size_for(self.tags.len(), self.pools.len(), self.markers.len())
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, self.encoded_size())?;
        buf.put_u32(self.max_tag_count);
        buf.put_u32(self.max_alloc_pool_count);
        buf.put_u32(self.max_marker_count);
        buf.put_u32(self.tags.len() as u32);
        buf.put_u32(self.pools.len() as u32);
        buf.put_u32(self.markers.len() as u32);
        for name in self.tags.iter().chain(&self.pools).chain(&self.markers) {
            buf.put_slice(name.as_bytes());
        }
        Ok(())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_remaining(&data, Self::FIXED_SIZE, "stat config")?;
        let max_tag_count = data.get_u32();
        let max_alloc_pool_count = data.get_u32();
        let max_marker_count = data.get_u32();
        let tag_count = bounded(data.get_u32(), max_tag_count, "tag_count")?;
        let pool_count = bounded(data.get_u32(), max_alloc_pool_count, "alloc_pool_count")?;
        let marker_count = bounded(data.get_u32(), max_marker_count, "marker_count")?;

        ensure_remaining(
            &data,
            MAX_NAME_LENGTH * (tag_count + pool_count + marker_count),
            "stat config names",
        )?;
        let mut read_names = |count: usize| {
            (0..count)
                .map(|_| {
                    let mut raw = [0u8; MAX_NAME_LENGTH];
                    data.copy_to_slice(&mut raw);
                    NameRecord::from_raw(raw)
                })
                .collect::<Vec<_>>()
        };
        let tags = read_names(tag_count);
        let pools = read_names(pool_count);
        let markers = read_names(marker_count);

        Ok(Self {
            max_tag_count,
            max_alloc_pool_count,
            max_marker_count,
            tags,
            pools,
            markers,
        })
    }
}

fn bounded(value: u32, max: u32, field: &'static str) -> Result<usize, ProtocolError> {
    if value > max {
        return Err(ProtocolError::OutOfRange { field, value, max });
    }
    Ok(value as usize)
}
