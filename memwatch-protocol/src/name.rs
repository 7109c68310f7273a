//! ## memwatch-protocol::name
//! **Fixed-width, NUL-padded name records.**

use std::borrow::Cow;
use std::fmt;

use crate::{ProtocolError, MAX_NAME_LENGTH};

/// A registry name as it appears on the wire: up to `MAX_NAME_LENGTH - 1`
/// bytes followed by NUL padding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NameRecord([u8; MAX_NAME_LENGTH]);

impl NameRecord {
    pub const ENCODED_SIZE: usize = MAX_NAME_LENGTH;

    /// Builds a record, rejecting names that would lose their terminator.
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        let bytes = name.as_bytes();
        if bytes.len() >= MAX_NAME_LENGTH {
            return Err(ProtocolError::NameTooLong {
                len: bytes.len(),
                max: MAX_NAME_LENGTH - 1,
            });
        }
        let mut raw = [0u8; MAX_NAME_LENGTH];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Wraps raw wire bytes, forcing the final byte to NUL.
    pub fn from_raw(mut raw: [u8; MAX_NAME_LENGTH]) -> Self {
        raw[MAX_NAME_LENGTH - 1] = 0;
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; MAX_NAME_LENGTH] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LENGTH);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl fmt::Debug for NameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameRecord({:?})", self.as_str())
    }
}

impl fmt::Display for NameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Copies `src` into a NUL-terminated fixed array, cutting it short when it
/// does not fit. Used for symbol names, which are best effort.
pub(crate) fn truncate_into<const N: usize>(src: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let mut len = src.len().min(N - 1);
    while !src.is_char_boundary(len) {
        len -= 1;
    }
    out[..len].copy_from_slice(&src.as_bytes()[..len]);
    out
}

pub(crate) fn c_str_lossy(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
