//! ## memwatch-protocol::error
//! **Errors raised while encoding or decoding wire structures.**

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Destination buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown command code {0}")]
    UnknownCommand(u32),

    #[error("Unknown status code {0}")]
    UnknownStatus(u32),

    #[error("Payload length {length} exceeds limit {limit}")]
    PayloadTooLarge { length: u32, limit: u32 },

    #[error("Field {field} out of range: {value} > {max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("{field}: expected {expected} records, got {actual}")]
    CountMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Name longer than {max} bytes: {len}")]
    NameTooLong { len: usize, max: usize },
}
