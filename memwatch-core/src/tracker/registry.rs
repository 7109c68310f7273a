//! ## memwatch-core::tracker::registry
//! **Name registries for tags, pools and markers.**
//!
//! Each registry is a fixed array filled contiguously from index 0. The
//! predefined names occupy the low slots and cannot be replaced; custom
//! names go into the next free slot or rename an existing custom slot.

use memwatch_protocol::{
    NameRecord, MAX_ALLOC_POOL_COUNT, MAX_MARKER_COUNT, MAX_NAME_LENGTH, MAX_TAG_COUNT,
};

use crate::error::ContractViolation;

#[derive(Clone, Copy)]
pub(crate) struct NameTable<const N: usize> {
    kind: &'static str,
    names: [NameRecord; N],
    count: usize,
    first_custom: usize,
}

impl<const N: usize> NameTable<N> {
    fn with_predefined(kind: &'static str, predefined: &[&str]) -> Self {
        let mut names = [NameRecord::default(); N];
        for (slot, name) in names.iter_mut().zip(predefined) {
            // predefined names are short literals
            *slot = NameRecord::new(name).unwrap_or_default();
        }
        Self {
            kind,
            names,
            count: predefined.len(),
            first_custom: predefined.len(),
        }
    }

    pub fn register(&mut self, index: u32, name: &str) -> Result<(), ContractViolation> {
        let slot = index as usize;
        if name.is_empty() || name.len() >= MAX_NAME_LENGTH {
            return Err(ContractViolation::InvalidName {
                kind: self.kind,
                len: name.len(),
                max: MAX_NAME_LENGTH - 1,
            });
        }
        if slot >= N {
            return Err(ContractViolation::CapacityExceeded {
                kind: self.kind,
                index,
                capacity: N as u32,
            });
        }
        if slot < self.first_custom {
            return Err(ContractViolation::ReservedIndex {
                kind: self.kind,
                index,
            });
        }
        if slot > self.count {
            return Err(ContractViolation::RegistrationGap {
                kind: self.kind,
                index,
                next: self.count as u32,
            });
        }
        let record = NameRecord::new(name).map_err(|_| ContractViolation::InvalidName {
            kind: self.kind,
            len: name.len(),
            max: MAX_NAME_LENGTH - 1,
        })?;
        self.names[slot] = record;
        if slot == self.count {
            self.count += 1;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.count
    }

    pub fn check(&self, index: u32) -> Result<(), ContractViolation> {
        if self.contains(index) {
            Ok(())
        } else {
            Err(ContractViolation::Unregistered {
                kind: self.kind,
                index,
            })
        }
    }

    pub fn names(&self) -> &[NameRecord] {
        &self.names[..self.count]
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Registry {
    pub tags: NameTable<MAX_TAG_COUNT>,
    pub pools: NameTable<MAX_ALLOC_POOL_COUNT>,
    pub markers: NameTable<MAX_MARKER_COUNT>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            tags: NameTable::with_predefined("tag", &["application"]),
            pools: NameTable::with_predefined(
                "pool",
                &["application", "render-batch", "component", "entity"],
            ),
            markers: NameTable::with_predefined("marker", &["application"]),
        }
    }
}
