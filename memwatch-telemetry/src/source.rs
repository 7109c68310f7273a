//! ## memwatch-telemetry::source
//! **What the server needs from a tracker.**

use std::sync::Arc;

use memwatch_core::{ContractViolation, RawAllocator, Symbolizer, Tracker, FULL_RANGE};

/// Snapshot and dump builders. Dumps keep their own type so the server
/// releases them through the path that built them.
pub trait StatSource {
    type Dump: AsRef<[u8]> + AsMut<[u8]>;

    fn calc_stat_config_size(&self) -> usize;

    fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation>;

    fn calc_stat_size(&self) -> usize;

    fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation>;

    /// A full dump with `user_size` zeroed bytes in front, `None` when
    /// memory runs out.
    fn get_dump(&self, user_size: usize) -> Option<Self::Dump>;
}

impl<A: RawAllocator + Clone, S: Symbolizer> StatSource for Tracker<A, S> {
    type Dump = memwatch_core::DumpBuffer<A>;

    fn calc_stat_config_size(&self) -> usize {
        Tracker::calc_stat_config_size(self)
    }

    fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        Tracker::get_stat_config(self, buf)
    }

    fn calc_stat_size(&self) -> usize {
        Tracker::calc_stat_size(self)
    }

    fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        Tracker::get_stat(self, buf)
    }

    fn get_dump(&self, user_size: usize) -> Option<Self::Dump> {
        Tracker::get_dump(self, user_size, FULL_RANGE)
    }
}

impl<T: StatSource + ?Sized> StatSource for &T {
    type Dump = T::Dump;

    fn calc_stat_config_size(&self) -> usize {
        (**self).calc_stat_config_size()
    }

    fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        (**self).get_stat_config(buf)
    }

    fn calc_stat_size(&self) -> usize {
        (**self).calc_stat_size()
    }

    fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        (**self).get_stat(buf)
    }

    fn get_dump(&self, user_size: usize) -> Option<Self::Dump> {
        (**self).get_dump(user_size)
    }
}

impl<T: StatSource + ?Sized> StatSource for Arc<T> {
    type Dump = T::Dump;

    fn calc_stat_config_size(&self) -> usize {
        (**self).calc_stat_config_size()
    }

    fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        (**self).get_stat_config(buf)
    }

    fn calc_stat_size(&self) -> usize {
        (**self).calc_stat_size()
    }

    fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        (**self).get_stat(buf)
    }

    fn get_dump(&self, user_size: usize) -> Option<Self::Dump> {
        (**self).get_dump(user_size)
    }
}
