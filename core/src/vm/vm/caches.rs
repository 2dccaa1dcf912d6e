use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ClassId, FunctionId};

/// Monomorphic cache for virtual call sites, keyed by (calling function, opcode offset).
///
/// An entry remembers the receiver class it was resolved for; a receiver of another class misses
/// and overwrites it.
#[derive(Debug)]
pub(super) struct CallSiteCache {
    entries: FastHashMap<(FunctionId, usize), (ClassId, FunctionId)>,
    hits: u64,
    misses: u64,
}

impl Default for CallSiteCache {
    fn default() -> Self {
        Self {
            entries: fast_hash_map_new(),
            hits: 0,
            misses: 0,
        }
    }
}

/// Hit/miss counters for the virtual call-site cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallSiteStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CallSiteCache {
    #[inline]
    pub(super) fn lookup(&mut self, site: (FunctionId, usize), class: ClassId) -> Option<FunctionId> {
        match self.entries.get(&site) {
            Some(&(cached_class, function)) if cached_class == class => {
                self.hits += 1;
                Some(function)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    pub(super) fn store(&mut self, site: (FunctionId, usize), class: ClassId, function: FunctionId) {
        self.entries.insert(site, (class, function));
    }

    pub(super) fn stats(&self) -> CallSiteStats {
        CallSiteStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}
