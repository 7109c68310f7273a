//! ## memwatch-core::symbols
//! **Return address to symbol name resolution, memoized.**

use std::collections::HashMap;
use std::ffi::c_void;

use nohash_hasher::BuildNoHashHasher;

/// Maps a return address to a demangled name. Best effort.
pub trait Symbolizer: Send + Sync {
    fn resolve(&self, addr: usize) -> Option<String>;
}

/// Resolves through the `backtrace` crate's debug-info readers.
#[derive(Clone, Copy, Debug, Default)]
pub struct BacktraceSymbolizer;

impl Symbolizer for BacktraceSymbolizer {
    fn resolve(&self, addr: usize) -> Option<String> {
        let mut name = None;
        backtrace::resolve(addr as *mut c_void, |symbol| {
            if name.is_none() {
                name = symbol.name().map(|n| format!("{n:#}"));
            }
        });
        name
    }
}

/// Every address ever looked up, resolved or not. Failed lookups are kept
/// so they are not retried on each dump.
#[derive(Default)]
pub struct SymbolCache {
    entries: HashMap<usize, Option<String>, BuildNoHashHasher<usize>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(BuildNoHashHasher::default()),
        }
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.entries.contains_key(&addr)
    }

    pub fn insert(&mut self, addr: usize, name: Option<String>) {
        self.entries.insert(addr, name);
    }

    pub fn get(&self, addr: usize) -> Option<&str> {
        self.entries.get(&addr)?.as_deref()
    }

    /// Resolved entries only.
    pub fn resolved(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.entries
            .iter()
            .filter_map(|(&addr, name)| Some((addr, name.as_deref()?)))
    }

    pub fn resolved_count(&self) -> usize {
        self.entries.values().filter(|name| name.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn well_known_function() -> usize {
        well_known_function as usize
    }

    #[test]
    fn test_backtrace_symbolizer_names_a_function() {
        let addr = well_known_function();
        let name = BacktraceSymbolizer.resolve(addr);
        if let Some(name) = name {
            assert!(name.contains("well_known_function"), "{name}");
        }
    }

    #[test]
    fn test_cache_keeps_failures_out_of_resolved() {
        let mut cache = SymbolCache::new();
        cache.insert(0x10, Some("alpha".into()));
        cache.insert(0x20, None);

        assert!(cache.contains(0x20));
        assert_eq!(cache.get(0x10), Some("alpha"));
        assert_eq!(cache.get(0x20), None);
        assert_eq!(cache.resolved_count(), 1);
        assert_eq!(cache.resolved().collect::<Vec<_>>(), vec![(0x10, "alpha")]);
    }
}
