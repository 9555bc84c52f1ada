//! Deduplicates short, frequently-repeated strings (node names, port masks,
//! filenames, macro names/values) into stable, cheap-to-compare handles.
//!
//! Several independently-typed pools exist rather than one shared pool so
//! the hot ones (masks) stay small. Reads are concurrent; inserts take a
//! write lock (spec 4.1: "mostly-read workload").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// A handle into an [`Interner`]. Two handles compare equal iff the
/// interned byte sequences are equal, and comparison never touches the pool.
#[derive(Debug, Clone)]
pub struct Handle(Arc<str>);

impl Handle {
    pub fn data(&self) -> &str {
        &self.0
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}
impl Eq for Handle {}

impl std::hash::Hash for Handle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
pub struct Interner {
    pool: RwLock<HashMap<Arc<str>, ()>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Handle {
        if let Some((key, _)) = self.pool.read().get_key_value(s) {
            return Handle(key.clone());
        }

        let mut pool = self.pool.write();
        if let Some((key, _)) = pool.get_key_value(s) {
            return Handle(key.clone());
        }

        let arc: Arc<str> = Arc::from(s);
        pool.insert(arc.clone(), ());
        Handle(arc)
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The independently-sized pools the registry and graph loader draw from.
#[derive(Default)]
pub struct InternerPools {
    pub filenames: Interner,
    pub masks: Interner,
    pub macro_names: Interner,
    pub macro_values: Interner,
}

impl InternerPools {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_same_handle() {
        let interner = Interner::new();
        let a = interner.intern("xyz");
        let b = interner.intern("xyz");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn different_bytes_different_handle() {
        let interner = Interner::new();
        let a = interner.intern("xyz");
        let b = interner.intern("xyw");
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn data_and_size_roundtrip() {
        let interner = Interner::new();
        let h = interner.intern("albedo");
        assert_eq!(h.data(), "albedo");
        assert_eq!(h.size(), 6);
    }
}
