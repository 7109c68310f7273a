use memwatch_protocol::ProtocolError;
use thiserror::Error;

/// A defect in the instrumented program or its integration.
///
/// Running out of memory is not a contract violation: allocation failure is
/// reported as a missing pointer. Whenever one of these is returned the
/// tracker's shared state has not been touched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("Tag scope stack overflow at depth {depth}")]
    TagOverflow { depth: u32 },

    #[error("Leaving a tag scope with no scope open")]
    TagUnderflow,

    #[error("The default tag cannot be entered as a scope")]
    DefaultTag,

    #[error("{kind} index {index} is not registered")]
    Unregistered { kind: &'static str, index: u32 },

    #[error("{kind} index {index} is reserved for a predefined name")]
    ReservedIndex { kind: &'static str, index: u32 },

    #[error("{kind} index {index} leaves a gap, next free slot is {next}")]
    RegistrationGap {
        kind: &'static str,
        index: u32,
        next: u32,
    },

    #[error("{kind} index {index} exceeds capacity {capacity}")]
    CapacityExceeded {
        kind: &'static str,
        index: u32,
        capacity: u32,
    },

    #[error("{kind} name must be 1..={max} bytes, got {len}")]
    InvalidName {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    #[error("Pool index {0} out of range")]
    InvalidPool(u32),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] ProtocolError),
}
