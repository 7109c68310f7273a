//! ## memwatch-protocol::dump
//! **Full heap dump: every live block, fingerprint and resolved symbol.**
//!
//! A 36-byte header, then `block_count` block records (32 B each),
//! `fingerprint_count` fingerprint records (132 B each) and `symbol_count`
//! symbol records (136 B each). The tracker writes the records one by one
//! straight into a buffer it sized up front, so every record type encodes
//! on its own.

use bytes::{Buf, BufMut};

use crate::name::{c_str_lossy, truncate_into};
use crate::stat::patch_u64;
use crate::{ensure_capacity, ensure_remaining, ProtocolError, BACKTRACE_DEPTH, SYMBOL_NAME_LENGTH};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpHeader {
    pub timestamp_begin: u64,
    pub timestamp_end: u64,
    /// Lowest sequence number included.
    pub block_begin: u32,
    /// One past the highest sequence number included.
    pub block_end: u32,
    pub block_count: u32,
    pub fingerprint_count: u32,
    pub symbol_count: u32,
}

impl DumpHeader {
    pub const ENCODED_SIZE: usize = 8 * 2 + 4 * 5;
    pub const TIMESTAMP_BEGIN_OFFSET: usize = 0;
    pub const TIMESTAMP_END_OFFSET: usize = 8;

    /// Wire size of a dump holding the given record counts.
    pub fn size_for(blocks: usize, fingerprints: usize, symbols: usize) -> usize {
        Self::ENCODED_SIZE
            + BlockRecord::ENCODED_SIZE * blocks
            + FingerprintRecord::ENCODED_SIZE * fingerprints
            + SymbolRecord::ENCODED_SIZE * symbols
    }

    pub fn payload_size(&self) -> usize {
        Self::size_for(
            self.block_count as usize,
            self.fingerprint_count as usize,
            self.symbol_count as usize,
        )
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, Self::ENCODED_SIZE)?;
        buf.put_u64(self.timestamp_begin);
        buf.put_u64(self.timestamp_end);
        buf.put_u32(self.block_begin);
        buf.put_u32(self.block_end);
        buf.put_u32(self.block_count);
        buf.put_u32(self.fingerprint_count);
        buf.put_u32(self.symbol_count);
        Ok(())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_remaining(&data, Self::ENCODED_SIZE, "dump header")?;
        Ok(Self {
            timestamp_begin: data.get_u64(),
            timestamp_end: data.get_u64(),
            block_begin: data.get_u32(),
            block_end: data.get_u32(),
            block_count: data.get_u32(),
            fingerprint_count: data.get_u32(),
            symbol_count: data.get_u32(),
        })
    }
}

/// One live block as seen at dump time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRecord {
    /// Address handed to the caller.
    pub addr: u64,
    pub alloc_by_app: u32,
    pub alloc_total: u32,
    pub order_no: u32,
    pub pool: u32,
    pub fingerprint_hash: u32,
    pub marker: u32,
}

impl BlockRecord {
    pub const ENCODED_SIZE: usize = 8 + 4 * 6;

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, Self::ENCODED_SIZE)?;
        buf.put_u64(self.addr);
        buf.put_u32(self.alloc_by_app);
        buf.put_u32(self.alloc_total);
        buf.put_u32(self.order_no);
        buf.put_u32(self.pool);
        buf.put_u32(self.fingerprint_hash);
        buf.put_u32(self.marker);
        Ok(())
    }

    fn get(data: &mut &[u8]) -> Self {
        Self {
            addr: data.get_u64(),
            alloc_by_app: data.get_u32(),
            alloc_total: data.get_u32(),
            order_no: data.get_u32(),
            pool: data.get_u32(),
            fingerprint_hash: data.get_u32(),
            marker: data.get_u32(),
        }
    }
}

/// A unique call site. Unused trailing frames are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FingerprintRecord {
    pub hash: u32,
    pub frames: [u64; BACKTRACE_DEPTH],
}

impl FingerprintRecord {
    pub const ENCODED_SIZE: usize = 4 + 8 * BACKTRACE_DEPTH;

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, Self::ENCODED_SIZE)?;
        buf.put_u32(self.hash);
        for frame in self.frames {
            buf.put_u64(frame);
        }
        Ok(())
    }

    /// Frames up to the first empty slot.
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.iter().copied().take_while(|&f| f != 0)
    }

    fn get(data: &mut &[u8]) -> Self {
        let hash = data.get_u32();
        let mut frames = [0u64; BACKTRACE_DEPTH];
        for frame in frames.iter_mut() {
            *frame = data.get_u64();
        }
        Self { hash, frames }
    }
}

/// A resolved return address.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SymbolRecord {
    pub addr: u64,
    pub name: [u8; SYMBOL_NAME_LENGTH],
}

impl SymbolRecord {
    pub const ENCODED_SIZE: usize = 8 + SYMBOL_NAME_LENGTH;

    /// Names longer than the record are cut short on a char boundary.
    pub fn new(addr: u64, name: &str) -> Self {
        Self {
            addr,
            name: truncate_into(name),
        }
    }

    pub fn name(&self) -> String {
        c_str_lossy(&self.name)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, Self::ENCODED_SIZE)?;
        buf.put_u64(self.addr);
        buf.put_slice(&self.name);
        Ok(())
    }

    fn get(data: &mut &[u8]) -> Self {
        let addr = data.get_u64();
        let mut name = [0u8; SYMBOL_NAME_LENGTH];
        data.copy_to_slice(&mut name);
        name[SYMBOL_NAME_LENGTH - 1] = 0;
        Self { addr, name }
    }
}

impl std::fmt::Debug for SymbolRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolRecord")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("name", &self.name())
            .finish()
    }
}

/// A decoded heap dump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dump {
    pub header: DumpHeader,
    pub blocks: Vec<BlockRecord>,
    pub fingerprints: Vec<FingerprintRecord>,
    pub symbols: Vec<SymbolRecord>,
}

impl Dump {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let header = DumpHeader::decode(data)?;
        let mut data = &data[DumpHeader::ENCODED_SIZE..];
        let records = (header.block_count as usize)
            .saturating_mul(BlockRecord::ENCODED_SIZE)
            .saturating_add((header.fingerprint_count as usize).saturating_mul(FingerprintRecord::ENCODED_SIZE))
            .saturating_add((header.symbol_count as usize).saturating_mul(SymbolRecord::ENCODED_SIZE));
        ensure_remaining(&data, records, "dump records")?;

        let blocks = (0..header.block_count)
            .map(|_| BlockRecord::get(&mut data))
            .collect();
        let fingerprints = (0..header.fingerprint_count)
            .map(|_| FingerprintRecord::get(&mut data))
            .collect();
        let symbols = (0..header.symbol_count)
            .map(|_| SymbolRecord::get(&mut data))
            .collect();

        Ok(Self {
            header,
            blocks,
            fingerprints,
            symbols,
        })
    }

    pub fn encoded_size(&self) -> usize {
        DumpHeader::size_for(self.blocks.len(), self.fingerprints.len(), self.symbols.len())
    }

    /// Encodes the dump; counts in the header are taken from the vectors.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, self.encoded_size())?;
        let header = DumpHeader {
            block_count: self.blocks.len() as u32,
            fingerprint_count: self.fingerprints.len() as u32,
            symbol_count: self.symbols.len() as u32,
            ..self.header
        };
        header.encode(buf)?;
        for block in &self.blocks {
            block.encode(buf)?;
        }
        for fingerprint in &self.fingerprints {
            fingerprint.encode(buf)?;
        }
        for symbol in &self.symbols {
            symbol.encode(buf)?;
        }
        Ok(())
    }

    /// Stamps begin/end timestamps into an encoded dump in place.
    pub fn patch_timestamps(encoded: &mut [u8], begin: u64, end: u64) -> Result<(), ProtocolError> {
        patch_u64(encoded, DumpHeader::TIMESTAMP_BEGIN_OFFSET, begin)?;
        patch_u64(encoded, DumpHeader::TIMESTAMP_END_OFFSET, end)
    }

    pub fn fingerprint(&self, hash: u32) -> Option<&FingerprintRecord> {
        self.fingerprints.iter().find(|f| f.hash == hash)
    }

    pub fn symbol(&self, addr: u64) -> Option<&SymbolRecord> {
        self.symbols.iter().find(|s| s.addr == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dump {
        let mut frames = [0u64; BACKTRACE_DEPTH];
        frames[0] = 0x4000_1000;
        frames[1] = 0x4000_2000;
        Dump {
            header: DumpHeader {
                block_begin: 3,
                block_end: 9,
                ..Default::default()
            },
            blocks: vec![
                BlockRecord {
                    addr: 0x7f00_0000_1040,
                    alloc_by_app: 48,
                    alloc_total: 112,
                    order_no: 8,
                    pool: 0,
                    fingerprint_hash: 0xdead_beef,
                    marker: 1,
                },
                BlockRecord {
                    addr: 0x7f00_0000_2040,
                    alloc_by_app: 16,
                    alloc_total: 80,
                    order_no: 3,
                    pool: 2,
                    fingerprint_hash: 0xdead_beef,
                    marker: 0,
                },
            ],
            fingerprints: vec![FingerprintRecord {
                hash: 0xdead_beef,
                frames,
            }],
            symbols: vec![
                SymbolRecord::new(0x4000_1000, "workload::spawn_entities"),
                SymbolRecord::new(0x4000_2000, &"x".repeat(300)),
            ],
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(DumpHeader::ENCODED_SIZE, 36);
        assert_eq!(BlockRecord::ENCODED_SIZE, 32);
        assert_eq!(FingerprintRecord::ENCODED_SIZE, 132);
        assert_eq!(SymbolRecord::ENCODED_SIZE, 136);
        assert_eq!(DumpHeader::size_for(2, 1, 2), 36 + 64 + 132 + 272);
    }

    #[test]
    fn test_dump_decodes_what_was_encoded() {
        let dump = sample();
        let mut out = Vec::new();
        dump.encode(&mut out).unwrap();
        assert_eq!(out.len(), dump.encoded_size());

        let decoded = Dump::decode(&out).unwrap();
        assert_eq!(decoded.header.block_count, 2);
        assert_eq!(decoded.header.fingerprint_count, 1);
        assert_eq!(decoded.blocks, dump.blocks);
        assert_eq!(decoded.fingerprints, dump.fingerprints);
        assert_eq!(decoded.fingerprint(0xdead_beef).unwrap().frames().count(), 2);
        assert_eq!(
            decoded.symbol(0x4000_1000).unwrap().name(),
            "workload::spawn_entities"
        );
        assert_eq!(decoded.symbol(0x4000_2000).unwrap().name().len(), SYMBOL_NAME_LENGTH - 1);
    }

    #[test]
    fn test_patch_timestamps() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        Dump::patch_timestamps(&mut out, 10, 25).unwrap();
        let header = DumpHeader::decode(&out).unwrap();
        assert_eq!((header.timestamp_begin, header.timestamp_end), (10, 25));
    }

    #[test]
    fn test_counts_larger_than_payload() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        out[24..28].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            Dump::decode(&out),
            Err(ProtocolError::Truncated { what: "dump records", .. })
        ));
    }

    #[test]
    fn test_empty_dump() {
        let mut out = Vec::new();
        Dump::default().encode(&mut out).unwrap();
        assert_eq!(out.len(), DumpHeader::ENCODED_SIZE);
        assert_eq!(Dump::decode(&out).unwrap(), Dump::default());
    }
}
