//! The per-filename Graph cache (spec 4.4, 5): "Graphs are content-addressed
//! by filename; once loaded they are immutable and shared." Concurrent
//! `find_graph(same_name)` calls on the same filename block on a single
//! in-flight load rather than racing to load twice.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{CompileError, Result};
use crate::graph::load::{self, LoadedGraphFile};
use crate::graph::Graph;
use crate::interner::InternerPools;
use crate::registry::TypeRegistry;

/// File I/O is an external collaborator (spec 1); callers supply a
/// `GraphSource` rather than the cache touching disk directly.
pub trait GraphSource: Send + Sync {
    fn read_graph_file(&self, filename: &str) -> Result<String>;
}

/// An in-memory `GraphSource`, used by tests and by callers that have
/// already read every authored file up front.
#[derive(Debug, Default)]
pub struct InMemoryGraphSource {
    files: HashMap<String, String>,
}

impl InMemoryGraphSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, source: impl Into<String>) {
        self.files.insert(filename.into(), source.into());
    }
}

impl GraphSource for InMemoryGraphSource {
    fn read_graph_file(&self, filename: &str) -> Result<String> {
        self.files.get(filename).cloned().ok_or_else(|| CompileError::GraphParse {
            file: filename.to_string(),
            message: "file not found in GraphSource".to_string(),
        })
    }
}

type Slot = Arc<OnceLock<Result<Arc<Graph>>>>;

/// Read-mostly, single-writer-on-miss per spec 5. Each filename resolves
/// its `OnceLock` exactly once; concurrent misses on the same key share
/// the same `OnceLock` and block on the same in-flight load.
pub struct GraphCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl GraphCache {
    pub fn new() -> Self {
        GraphCache { slots: Mutex::new(HashMap::new()) }
    }

    /// Resolves `filename` through the cache, loading it via `source` on a
    /// cache miss. `.matgraph` wrappers are resolved recursively against
    /// their `default_graph`.
    pub fn get(
        &self,
        filename: &str,
        source: &dyn GraphSource,
        registry: &TypeRegistry,
        interner: &InternerPools,
        num_output_types: u32,
    ) -> Result<Arc<Graph>> {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(filename.to_string()).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };

        slot.get_or_init(|| self.load_uncached(filename, source, registry, interner, num_output_types))
            .clone()
    }

    fn load_uncached(
        &self,
        filename: &str,
        source: &dyn GraphSource,
        registry: &TypeRegistry,
        interner: &InternerPools,
        num_output_types: u32,
    ) -> Result<Arc<Graph>> {
        let text = source.read_graph_file(filename)?;
        match load::load_graph_file(filename, &text, registry, interner, num_output_types)? {
            LoadedGraphFile::Direct(graph) => Ok(Arc::new(graph)),
            LoadedGraphFile::MatGraphWrapper { default_graph, overwrites_source } => {
                let base = self.get(&default_graph, source, registry, interner, num_output_types)?;
                let merged = load::apply_matgraph_overwrites((*base).clone(), &overwrites_source, filename)?;
                Ok(Arc::new(merged))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ExtensionPointBase, TypeRegistry};
    use crate::stage::Stage;

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        let mut base = ExtensionPointBase::default();
        base.default_stage = Some(Stage::Texturing);
        r.insert_extension_point("AlbedoColor", crate::param::GraphType::Float4, base);
        r.assign_output_type_indices();
        r
    }

    #[test]
    fn repeated_lookups_return_the_same_graph() {
        let cache = GraphCache::new();
        let mut source = InMemoryGraphSource::new();
        source.insert("a.fxgraph", r#"{"version":3,"nodes":[],"links":[]}"#);
        let registry = registry();
        let interner = InternerPools::new();

        let first = cache.get("a.fxgraph", &source, &registry, &interner, 1).unwrap();
        let second = cache.get("a.fxgraph", &source, &registry, &interner, 1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn matgraph_resolves_through_default_graph() {
        let cache = GraphCache::new();
        let mut source = InMemoryGraphSource::new();
        source.insert("base.fxgraph", r#"{"version":3,"nodes":[],"links":[]}"#);
        source.insert("m.matgraph", r#"{"version":3,"default_graph":"base.fxgraph","overwrites":{"lighting_model":"Anisotropy"}}"#);
        let registry = registry();
        let interner = InternerPools::new();

        let graph = cache.get("m.matgraph", &source, &registry, &interner, 1).unwrap();
        assert_eq!(graph.lighting_model(), crate::stage::LightingModel::Anisotropy);
    }

    #[test]
    fn missing_file_is_an_error() {
        let cache = GraphCache::new();
        let source = InMemoryGraphSource::new();
        let registry = registry();
        let interner = InternerPools::new();
        assert!(cache.get("missing.fxgraph", &source, &registry, &interner, 1).is_err());
    }
}
