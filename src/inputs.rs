//! `InstanceDesc` (spec 3.5) and `InputsGatherer` (spec 4.8): the per-object
//! parameter overrides that feed a merge, and the flat uniform/binding
//! tables the renderer binds per drawdata id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::graph::Graph;
use crate::hash::{self, TypeId};
use crate::interner::Handle;
use crate::param::{ParameterValue, Scalar};
use crate::registry::TypeRegistry;
use crate::stage::Stage;

/// The fixed `DrawDataId` the alpha-ref override uniform is filed under
/// (`GetAlphaRefUniformInput`, spec 4.1/4.8).
const ALPHA_REF_DRAWDATA_NAME: &str = "AlphaTesting";

/// `InstanceParameter`: a parallel copy of a node's parameter schema with
/// per-instance overridden values (spec 3.5). Shares its shape with
/// `ParameterValue` exactly, so the gatherer can swap one in for the other.
pub type InstanceParameter = ParameterValue;

/// A reference to an authored graph plus per-instance overrides (spec 3.5).
/// `tweak_id` individuates otherwise-identical `InstanceDesc`s for uniform
/// hashing only; it never affects a merged graph's `type_id`.
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub graph_filename: Handle,
    pub tweak_id: u32,
    pub alpha_ref: Option<f32>,
    pub custom_parameter_overrides: HashMap<TypeId, InstanceParameter>,
}

static NEXT_TWEAK_ID: AtomicU32 = AtomicU32::new(1);

impl InstanceDesc {
    /// Draws a fresh `tweak_id` from a process-wide counter. Two
    /// `InstanceDesc`s built from identical authored data at different call
    /// sites get different ids (spec 9 "tweak_id monotonic counter" — kept
    /// as-is, not deduplicated).
    pub fn new(graph_filename: Handle) -> Self {
        InstanceDesc {
            graph_filename,
            tweak_id: NEXT_TWEAK_ID.fetch_add(1, Ordering::Relaxed),
            alpha_ref: None,
            custom_parameter_overrides: HashMap::new(),
        }
    }

    pub fn with_alpha_ref(mut self, value: f32) -> Self {
        self.alpha_ref = Some(value);
        self
    }

    pub fn override_parameter(&mut self, custom_parameter_hash: TypeId, value: InstanceParameter) {
        self.custom_parameter_overrides.insert(custom_parameter_hash, value);
    }
}

/// Resource binding kind, mirroring `ParameterValue::get_binding_input_info`
/// (spec 4.1's `GetBindingInputInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Sampler(Option<u32>),
    Texture(Option<u64>),
}

/// One gathered non-sampler non-texture uniform (spec 4.8 step 1).
#[derive(Debug, Clone, PartialEq)]
pub struct UniformInput {
    pub hash: TypeId,
    pub drawdata_id: TypeId,
    pub stage: Stage,
    pub values: Vec<Scalar>,
    /// Running per-`drawdata_id` position assigned during flattening (spec
    /// 4.8 step 5), not the authoring-time parameter index.
    pub index: u32,
}

/// One gathered sampler or texture binding (spec 4.8 step 1).
#[derive(Debug, Clone, PartialEq)]
pub struct BindingInput {
    pub hash: TypeId,
    pub drawdata_id: TypeId,
    pub stage: Stage,
    pub binding: BindingKind,
    pub index: u32,
}

struct GatherTarget<'a> {
    node_index: u32,
    stage: Stage,
    parameter: &'a ParameterValue,
}

/// `InputsGatherer` (spec 4.8): walks `graph`'s heads, resolving each node's
/// parameters against the `InstanceDesc` that contributed it (by
/// `NodeInstance::graph_index`), and returns the flattened uniform and
/// binding lists.
pub fn gather_inputs(
    graph: &Graph,
    _registry: &TypeRegistry,
    graph_file_hash: TypeId,
    instances: &[InstanceDesc],
) -> (Vec<UniformInput>, Vec<BindingInput>) {
    let mut visited: HashSet<u32> = HashSet::new();
    let mut order: Vec<u32> = Vec::new();
    for &head in &graph.heads() {
        visit_for_gather(graph, head, &mut visited, &mut order);
    }

    // Resolve each visited node's parameters, substituting a custom
    // override when the node's `custom_parameter_hash` matches one on its
    // contributing InstanceDesc (spec 4.8 step 2).
    let mut staged_uniforms: BTreeMap<u32, Vec<GatherTarget>> = BTreeMap::new();
    let mut staged_bindings: BTreeMap<u32, Vec<GatherTarget>> = BTreeMap::new();
    let mut tweak_by_node: HashMap<u32, u32> = HashMap::new();
    let mut resolved: Vec<ParameterValue> = Vec::new();
    let mut resolved_owner: Vec<u32> = Vec::new();

    for &node_idx in &order {
        let node = &graph.nodes[node_idx as usize];
        let instance = instances.get(node.graph_index as usize);
        let tweak_id = instance.map(|i| i.tweak_id).unwrap_or(0);
        tweak_by_node.insert(node_idx, tweak_id);

        for parameter in &node.parameters {
            let value = match (node.custom_parameter_hash, instance) {
                (Some(hash_id), Some(instance)) => {
                    instance.custom_parameter_overrides.get(&hash_id).cloned().unwrap_or_else(|| parameter.clone())
                }
                _ => parameter.clone(),
            };
            resolved.push(value);
            resolved_owner.push(node_idx);
        }
    }

    for (i, value) in resolved.iter().enumerate() {
        let node_idx = resolved_owner[i];
        let stage = graph.nodes[node_idx as usize].stage;
        if value.get_uniform_input_info().is_some() {
            staged_uniforms.entry(stage.ordinal()).or_default().push(GatherTarget { node_index: node_idx, stage, parameter: value });
        } else if value.get_binding_input_info().is_some() {
            staged_bindings.entry(stage.ordinal()).or_default().push(GatherTarget { node_index: node_idx, stage, parameter: value });
        }
    }

    let mut uniform_counters: HashMap<TypeId, u32> = HashMap::new();
    let mut binding_counters: HashMap<TypeId, u32> = HashMap::new();
    let mut uniforms = Vec::new();
    let mut bindings = Vec::new();

    for (_, targets) in staged_uniforms {
        for target in targets {
            let tweak_id = *tweak_by_node.get(&target.node_index).unwrap_or(&0);
            let drawdata_id = target.parameter.data_id();
            let h = uniform_hash(graph_file_hash, tweak_id, drawdata_id, target.node_index);
            let counter = uniform_counters.entry(drawdata_id).or_insert(0);
            uniforms.push(UniformInput {
                hash: h,
                drawdata_id,
                stage: target.stage,
                values: target.parameter.values.clone(),
                index: *counter,
            });
            *counter += 1;
        }
    }

    for (_, targets) in staged_bindings {
        for target in targets {
            let Some(info) = target.parameter.get_binding_input_info() else { continue };
            let tweak_id = *tweak_by_node.get(&target.node_index).unwrap_or(&0);
            let drawdata_id = target.parameter.data_id();
            let h = uniform_hash(graph_file_hash, tweak_id, drawdata_id, target.node_index);
            let counter = binding_counters.entry(drawdata_id).or_insert(0);
            let binding = match info {
                crate::param::BindingInputInfoTemplate::Sampler { sampler_index, .. } => BindingKind::Sampler(sampler_index),
                crate::param::BindingInputInfoTemplate::Texture { texture_handle, .. } => BindingKind::Texture(texture_handle),
            };
            bindings.push(BindingInput { hash: h, drawdata_id, stage: target.stage, binding, index: *counter });
            *counter += 1;
        }
    }

    if let Some(alpha_ref) = resolve_alpha_ref(graph, instances) {
        let drawdata_id = hash::data_id_plain(ALPHA_REF_DRAWDATA_NAME);
        // Unlike every other uniform, the alpha-ref hash always uses literal
        // tweak_id = 0 and node_index = 0, not the contributing instance's
        // real tweak_id (`GetUniformHash(filename, 0, id, 0)`).
        let h = uniform_hash(graph_file_hash, 0, drawdata_id, 0);
        uniforms.push(UniformInput {
            hash: h,
            drawdata_id,
            stage: Stage::VertexInit,
            values: alpha_ref.iter().map(|&v| Scalar::from(v)).collect(),
            index: 0,
        });
    }

    (uniforms, bindings)
}

fn visit_for_gather(graph: &Graph, node_idx: u32, visited: &mut HashSet<u32>, order: &mut Vec<u32>) {
    if !visited.insert(node_idx) {
        return;
    }
    let node = &graph.nodes[node_idx as usize];
    for link in node.input_links.iter().chain(node.stage_links.iter()).chain(node.child_links.iter()) {
        visit_for_gather(graph, link.producer, visited, order);
    }
    order.push(node_idx);
}

/// `merge(merge(merge(merge(0, graph_file_hash), tweak_id), drawdata_id), node_index)`
/// (spec 3.5/4.8) — the per-uniform/binding instance hash.
fn uniform_hash(graph_file_hash: TypeId, tweak_id: u32, drawdata_id: TypeId, node_index: u32) -> TypeId {
    let h = hash::merge_type_id(0, graph_file_hash);
    let h = hash::merge_type_id(h, tweak_id);
    let h = hash::merge_type_id(h, drawdata_id);
    hash::merge_type_id(h, node_index)
}

/// Instance-level overrides win over the graph's own authored override
/// (spec 8 S5); the last instance in the list wins among several.
fn resolve_alpha_ref(graph: &Graph, instances: &[InstanceDesc]) -> Option<[f32; 4]> {
    if let Some(value) = instances.iter().rev().find_map(|i| i.alpha_ref) {
        return Some([1.0, value, 0.001, 1.0]);
    }
    graph.alpha_ref_override
}
