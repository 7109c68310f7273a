//! # Memwatch Wire Protocol
//!
//! Fixed-layout, big-endian codec for everything that travels between a
//! profiled process and a viewer: the protocol header, the stat config
//! descriptor, periodic stat snapshots and full heap dumps.
//!
//! Encoders write into any [`bytes::BufMut`] and refuse to start when the
//! destination cannot hold the whole record. Decoders read from plain byte
//! slices and never panic on short or malformed input.

pub mod config;
pub mod dump;
pub mod error;
pub mod frame;
pub mod header;
pub mod name;
pub mod stat;

pub use config::StatConfig;
pub use dump::{BlockRecord, Dump, DumpHeader, FingerprintRecord, SymbolRecord};
pub use error::ProtocolError;
pub use frame::FrameAssembler;
pub use header::{Command, ProtoHeader, Status};
pub use name::NameRecord;
pub use stat::{GeneralStat, PoolStat, StatHead, StatSnapshot, TagStack};

/// Deepest nesting of tag scopes, including the implicit root scope.
pub const MAX_TAG_DEPTH: usize = 8;
/// Number of tag names that can be registered.
pub const MAX_TAG_COUNT: usize = 4;
/// Number of allocation pools that can be registered.
pub const MAX_ALLOC_POOL_COUNT: usize = 8;
/// Number of markers that can be registered.
pub const MAX_MARKER_COUNT: usize = 8;
/// Size of a name record on the wire. The last byte is always NUL.
pub const MAX_NAME_LENGTH: usize = 16;
/// Return addresses kept per call-site fingerprint.
pub const BACKTRACE_DEPTH: usize = 16;
/// Size of a symbol name record on the wire. The last byte is always NUL.
pub const SYMBOL_NAME_LENGTH: usize = 128;

/// Fails with [`ProtocolError::BufferTooSmall`] unless `buf` can take `needed` bytes.
pub(crate) fn ensure_capacity<B: bytes::BufMut + ?Sized>(
    buf: &B,
    needed: usize,
) -> Result<(), ProtocolError> {
    let available = buf.remaining_mut();
    if available < needed {
        return Err(ProtocolError::BufferTooSmall { needed, available });
    }
    Ok(())
}

/// Fails with [`ProtocolError::Truncated`] unless `buf` still holds `needed` bytes.
pub(crate) fn ensure_remaining<B: bytes::Buf + ?Sized>(
    buf: &B,
    needed: usize,
    what: &'static str,
) -> Result<(), ProtocolError> {
    let available = buf.remaining();
    if available < needed {
        return Err(ProtocolError::Truncated {
            what,
            needed,
            available,
        });
    }
    Ok(())
}
