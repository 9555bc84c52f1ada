//! The process-wide registry of named dynamic parameters (spec 4.9):
//! `{hash(name) -> (name, GraphType, flags)}`, populated once at startup
//! before `TypeRegistry`'s dynamic-node synthesis (spec 4.2.3).
//!
//! The original's "function pointer" that gathers a live value from a game
//! object is an external collaborator (spec 1's Out-of-scope list); the
//! compiler only plumbs the id and type through, so it is represented here
//! as an opaque marker rather than invoked.

use indexmap::IndexMap;

use crate::hash::{self, TypeId};
use crate::param::GraphType;

/// `CacheData`: the value may be cached across frames.
/// `UpdatedExternally`: the value changes outside the normal gather pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DynamicParamFlags(u8);

impl DynamicParamFlags {
    pub const NONE: DynamicParamFlags = DynamicParamFlags(0);
    pub const CACHE_DATA: DynamicParamFlags = DynamicParamFlags(0b01);
    pub const UPDATED_EXTERNALLY: DynamicParamFlags = DynamicParamFlags(0b10);

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for DynamicParamFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        DynamicParamFlags(self.0 | rhs.0)
    }
}

/// Marker type standing in for the registered `(game_context, object, out)
/// -> void` callback. The compiler never calls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicParamCallback;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicParamInfo {
    pub name: String,
    pub graph_type: GraphType,
    pub flags: DynamicParamFlags,
    pub callback: Option<DynamicParamCallback>,
}

/// Populated once at startup, immutable afterward (spec 4.9, 5). Keyed by an
/// `IndexMap` rather than a `HashMap` so `iter()` walks entries in
/// registration order, keeping node-type synthesis reproducible across runs
/// even though nothing downstream currently depends on that order.
#[derive(Debug, Default)]
pub struct DynamicParamTable {
    entries: IndexMap<TypeId, DynamicParamInfo>,
}

impl DynamicParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, graph_type: GraphType, flags: DynamicParamFlags) {
        let id = hash::data_id_dynamic(name);
        self.entries.insert(
            id,
            DynamicParamInfo { name: name.to_string(), graph_type, flags, callback: Some(DynamicParamCallback) },
        );
    }

    pub fn get(&self, id: TypeId) -> Option<&DynamicParamInfo> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypeId, &DynamicParamInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_by_hashed_name() {
        let mut table = DynamicParamTable::new();
        table.register("Time", GraphType::Float, DynamicParamFlags::CACHE_DATA);
        let id = hash::data_id_dynamic("Time");
        let info = table.get(id).unwrap();
        assert_eq!(info.name, "Time");
        assert_eq!(info.graph_type, GraphType::Float);
        assert!(info.flags.contains(DynamicParamFlags::CACHE_DATA));
    }

    #[test]
    fn unknown_id_is_none() {
        let table = DynamicParamTable::new();
        assert!(table.get(12345).is_none());
    }
}
