//! Sharing of compiled programs between identical graphs
//!
//! Programs are keyed by the backend name and the lowered graph's
//! fingerprint, so two graphs that lower to the same nodes compile once.
//! The map is created lazily on first use.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::lowering::LoweredGraph;

/// Cache key for a compiled program
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    /// Backend the program was compiled by
    pub backend: &'static str,
    /// Fingerprint of the lowered graph
    pub graph: Vec<u8>,
}

impl ProgramKey {
    pub fn new(backend: &'static str, lowered: &LoweredGraph) -> Self {
        Self {
            backend,
            graph: lowered.fingerprint(),
        }
    }
}

/// Thread-safe compiled program cache
///
/// Lookups take a read lock only. Compilation happens outside the cache, so
/// two callers may race to compile the same graph; [`ProgramCache::insert`]
/// keeps the first program and hands it back to both.
pub struct ProgramCache<P> {
    cache: OnceLock<parking_lot::RwLock<HashMap<ProgramKey, Arc<P>>>>,
}

impl<P> ProgramCache<P> {
    /// Create a new empty program cache
    pub const fn new() -> Self {
        Self { cache: OnceLock::new() }
    }

    fn map(&self) -> &parking_lot::RwLock<HashMap<ProgramKey, Arc<P>>> {
        self.cache.get_or_init(|| parking_lot::RwLock::new(HashMap::new()))
    }

    pub fn get(&self, key: &ProgramKey) -> Option<Arc<P>> {
        self.cache.get()?.read().get(key).map(Arc::clone)
    }

    /// Insert `program` unless another caller got there first; returns the
    /// program that is now cached.
    pub fn insert(&self, key: ProgramKey, program: P) -> Arc<P> {
        let mut write_guard = self.map().write();
        Arc::clone(write_guard.entry(key).or_insert_with(|| Arc::new(program)))
    }

    /// Get the cached program, or compile and cache it.
    pub fn get_or_try_create<E, F>(&self, key: &ProgramKey, f: F) -> Result<Arc<P>, E>
    where
        F: FnOnce() -> Result<P, E>,
    {
        if let Some(program) = self.get(key) {
            return Ok(program);
        }
        let program = f()?;
        Ok(self.insert(key.clone(), program))
    }

    /// Remove all cached programs.
    pub fn clear(&self) {
        if let Some(cache) = self.cache.get() {
            cache.write().clear();
        }
    }

    /// Number of cached programs; 0 before first use.
    pub fn len(&self) -> usize {
        self.cache.get().map(|c| c.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
