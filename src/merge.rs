//! `GraphMerger` (spec 4.5), the hardest subsystem: folds an ordered list
//! of `(group_index, graph)` pairs into one merged [`Graph`].

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{CompileError, Result};
use crate::graph::{output_key, Graph, Link, NodeInstance, PortRef};
use crate::hash::{self, TypeId};
use crate::interner::InternerPools;
use crate::registry::TypeRegistry;
use crate::stage::{group_index_for_stage, Stage};

/// One component of the merge input: an object's graph reference at a
/// given group index (spec 4.5's `[(group_index, graph_filename), ...]`,
/// already resolved to `Graph`s through the cache).
pub struct Component<'a> {
    pub group_index: u32,
    pub graph: &'a Graph,
}

fn invariant(message: impl Into<String>) -> CompileError {
    CompileError::InvariantViolation(message.into())
}

/// Folds `components` into one merged graph (spec 4.5).
pub fn merge(
    registry: &TypeRegistry,
    interner: &InternerPools,
    num_output_types: u32,
    filename_handle: crate::interner::Handle,
    components: &[Component],
) -> Result<Graph> {
    let empty_mask = interner.masks.intern("");
    let mut merged = Graph::new(filename_handle, num_output_types);

    // 4.5.1 Setup
    merged.shader_group = components.iter().fold(merged.shader_group.clone(), |acc, c| acc.union(&c.graph.shader_group));
    for c in components {
        if let Some(lm) = c.graph.lighting_model_override {
            merged.lighting_model_override = Some(lm);
        }
        if c.graph.effect_order != crate::stage::EffectOrder::default() {
            merged.effect_order = c.graph.effect_order;
        }
        if let Some(bm) = c.graph.blend_mode_override {
            merged.blend_mode_override = Some(bm);
        }
        merged.state_overrides.merge_later_wins(&c.graph.state_overrides);
    }

    let total_nodes: usize = components.iter().map(|c| c.graph.nodes.len()).sum();
    merged.nodes.reserve(total_nodes);

    // 4.5.2 Per-component traversal
    for (graph_index, component) in components.iter().enumerate() {
        let graph_index = graph_index as u32;
        let prev_heads: BTreeMap<u64, u32> = merged.output_nodes.clone();
        let mut replacements: HashMap<TypeId, u32> = HashMap::new();
        let mut processed: HashSet<TypeId> = HashSet::new();
        let mut group_nodes: Vec<usize> = Vec::new();

        let src_heads = component.graph.heads();
        for &head_idx in &src_heads {
            if component.graph.has_no_effect(head_idx, registry) {
                continue;
            }
            let head_node_type_id = component.graph.nodes[head_idx as usize].node_type_id;
            let Some(head_node_type) = registry.get(head_node_type_id) else {
                return Err(invariant("head node references an unregistered NodeType"));
            };
            if !head_node_type.is_enabled_by_lighting_model(merged.lighting_model()) {
                continue;
            }
            let head_stage = component.graph.nodes[head_idx as usize].stage;

            visit_node(
                head_idx,
                component.graph,
                registry,
                &mut merged,
                &mut replacements,
                &mut processed,
                &prev_heads,
                component.group_index,
                graph_index,
                head_stage,
                &mut group_nodes,
                &empty_mask,
            )?;
        }

        // 4.5.2.c: rewire each visited Group's children subtree. A work
        // queue rather than a plain loop because rewiring a Group's
        // children may itself discover nested Group nodes.
        let mut group_queue: Vec<usize> = group_nodes.clone();
        let mut rewired_groups: HashSet<usize> = HashSet::new();
        while let Some(group_src_idx) = group_queue.pop() {
            if !rewired_groups.insert(group_src_idx) {
                continue;
            }
            let group_src_idx = group_src_idx as u32;
            let Some(&group_merged_idx) = replacements.get(&component.graph.nodes[group_src_idx as usize].hash_id) else {
                return Err(invariant("group node missing from replacements during child rewiring"));
            };
            let child_links = component.graph.nodes[group_src_idx as usize].child_links.clone();
            let head_stage = component.graph.nodes[group_src_idx as usize].stage;
            let mut rewired = Vec::with_capacity(child_links.len());
            let mut nested_groups = Vec::new();
            for link in &child_links {
                let merged_child = visit_node(
                    link.producer,
                    component.graph,
                    registry,
                    &mut merged,
                    &mut replacements,
                    &mut processed,
                    &prev_heads,
                    component.group_index,
                    graph_index,
                    head_stage,
                    &mut nested_groups,
                    &empty_mask,
                )?;
                rewired.push(Link { output_port: link.output_port.clone(), input_port: link.input_port.clone(), producer: merged_child });
            }
            merged.nodes[group_merged_idx as usize].child_links = rewired;
            group_queue.extend(nested_groups);
        }

        // 4.5.2.d: merge flags and macros (later component wins/adds).
        merged.flags.insert(component.graph.flags);
        for (name, value) in &component.graph.custom_macros {
            if !merged.custom_macros.iter().any(|(n, _)| n == name) {
                merged.custom_macros.push((name.clone(), value.clone()));
            }
        }

        // 4.5.2.e
        merged.source_filenames.push((component.graph.filename.clone(), component.group_index));
    }

    connect_stage_inputs(&mut merged, registry, &empty_mask)?;
    renumber_indices(&mut merged);
    crate::hash::compute_graph_type_id(&mut merged, registry);

    Ok(merged)
}

#[allow(clippy::too_many_arguments)]
fn visit_node(
    src_idx: u32,
    src_graph: &Graph,
    registry: &TypeRegistry,
    merged: &mut Graph,
    replacements: &mut HashMap<TypeId, u32>,
    processed: &mut HashSet<TypeId>,
    prev_heads: &BTreeMap<u64, u32>,
    component_group_index: u32,
    graph_index: u32,
    head_stage: Stage,
    group_nodes: &mut Vec<usize>,
    empty_mask: &crate::interner::Handle,
) -> Result<u32> {
    let src = &src_graph.nodes[src_idx as usize];
    if let Some(&existing) = replacements.get(&src.hash_id) {
        return Ok(existing);
    }

    let Some(node_type) = registry.get(src.node_type_id) else {
        return Err(invariant("source node references an unregistered NodeType"));
    };

    let contributed_group = if node_type.is_input_type() {
        group_index_for_stage(component_group_index, src.stage)
    } else {
        group_index_for_stage(component_group_index, head_stage)
    };

    let mut relink_output: Option<u32> = None;
    if node_type.is_input_type() {
        if let Some(output_type_index) = node_type.output_type_index {
            let key = output_key(contributed_group, src.stage.ordinal(), output_type_index, merged.num_output_types.max(1));
            if let Some(&producer) = prev_heads.get(&key) {
                relink_output = Some(producer);
            } else if let Some(&existing) = merged.input_nodes.get(&key) {
                replacements.insert(src.hash_id, existing);
                processed.insert(src.hash_id);
                return Ok(existing);
            }
        }
    }

    // Post-order: resolve producers for this node's own authored links
    // before creating it (a Read-half never has authored input links).
    let src_input_links = src.input_links.clone();
    let mut producer_indices = Vec::with_capacity(src_input_links.len());
    for link in &src_input_links {
        let producer_idx = visit_node(
            link.producer,
            src_graph,
            registry,
            merged,
            replacements,
            processed,
            prev_heads,
            component_group_index,
            graph_index,
            head_stage,
            group_nodes,
            empty_mask,
        )?;
        producer_indices.push(producer_idx);
    }

    let mut new_node = NodeInstance::clone_template(src);
    new_node.group_index = contributed_group;
    new_node.graph_index = graph_index;
    new_node.parent_id = src.parent_id.and_then(|p| replacements.get(&src_graph.nodes[p as usize].hash_id).copied());

    for (link, producer_idx) in src_input_links.iter().zip(producer_indices) {
        new_node.input_links.push(Link { output_port: link.output_port.clone(), input_port: link.input_port.clone(), producer: producer_idx });
    }

    if let Some(producer) = relink_output {
        new_node.input_links.push(Link {
            output_port: PortRef { port_index: 0, swizzle_mask: empty_mask.clone() },
            input_port: PortRef { port_index: 0, swizzle_mask: empty_mask.clone() },
            producer,
        });
    }

    let merged_idx = merged.nodes.len() as u32;
    merged.nodes.push(new_node);
    replacements.insert(src.hash_id, merged_idx);
    processed.insert(src.hash_id);

    if node_type.is_input_type() {
        if let Some(output_type_index) = node_type.output_type_index {
            let key = output_key(contributed_group, src.stage.ordinal(), output_type_index, merged.num_output_types.max(1));
            merged.input_nodes.entry(key).or_insert(merged_idx);
        }
    }
    if node_type.is_output_type() {
        if let Some(output_type_index) = node_type.output_type_index {
            let key = output_key(contributed_group, head_stage.ordinal(), output_type_index, merged.num_output_types.max(1));
            merged.output_nodes.insert(key, merged_idx);
        }
    }
    if node_type.is_output_only() {
        merged.output_only_nodes.push(merged_idx);
    }
    if node_type.is_group {
        group_nodes.push(src_idx as usize);
    }

    Ok(merged_idx)
}

/// Spec 4.5.4: for every node with `StageConnector`s, resolves each
/// connector to the best admissible Read-half or Write-half and records a
/// stage-link.
fn connect_stage_inputs(merged: &mut Graph, registry: &TypeRegistry, empty_mask: &crate::interner::Handle) -> Result<()> {
    let node_count = merged.nodes.len();
    for node_idx in 0..node_count {
        let node_type_id = merged.nodes[node_idx].node_type_id;
        let Some(node_type) = registry.get(node_type_id) else { continue };
        if node_type.stage_connectors.is_empty() {
            continue;
        }
        let connectors = node_type.stage_connectors.clone();
        let node_group = merged.nodes[node_idx].group_index;

        for (connector_index, connector) in connectors.iter().enumerate() {
            let mut best: Option<(Stage, bool, u32, bool)> = None; // (stage, group_match, node_idx, is_read_half)
            for (&_key, &candidate_idx) in merged.input_nodes.iter().chain(merged.output_nodes.iter()) {
                if candidate_idx as usize == node_idx {
                    continue;
                }
                let candidate = &merged.nodes[candidate_idx as usize];
                if candidate.stage > connector.stage {
                    continue;
                }
                let Some(candidate_type) = registry.get(candidate.node_type_id) else { continue };
                let ext_name = extension_point_name(&candidate_type.name);
                if ext_name != connector.extension_point.as_str() {
                    continue;
                }
                let group_match = candidate.group_index == node_group;
                let is_better = match &best {
                    None => true,
                    Some((best_stage, best_group_match, _, _)) => {
                        (candidate.stage, group_match) > (*best_stage, *best_group_match)
                    }
                };
                if is_better {
                    best = Some((candidate.stage, group_match, candidate_idx, candidate_type.is_input_type()));
                }
            }

            let Some((_, _, winner_idx, is_read_half)) = best else { continue };
            if is_read_half {
                let link = Link {
                    output_port: PortRef { port_index: 0, swizzle_mask: empty_mask.clone() },
                    input_port: PortRef { port_index: connector_index as u32, swizzle_mask: empty_mask.clone() },
                    producer: winner_idx,
                };
                merged.nodes[node_idx].stage_links.push(link);
            } else {
                let winner_links = merged.nodes[winner_idx as usize].input_links.clone();
                for link in winner_links {
                    merged.nodes[node_idx].stage_links.push(Link {
                        output_port: link.output_port,
                        input_port: PortRef { port_index: connector_index as u32, swizzle_mask: link.input_port.swizzle_mask },
                        producer: link.producer,
                    });
                }
            }
        }
    }
    Ok(())
}

fn extension_point_name(node_type_name: &str) -> &str {
    node_type_name.strip_prefix(crate::registry::READ_PREFIX).or_else(|| node_type_name.strip_prefix(crate::registry::WRITE_PREFIX)).unwrap_or(node_type_name)
}

/// Spec 4.5.5: walks nodes in ascending `(group, stage_number)` order and
/// assigns per-NodeType node indices and per-parameter data-id indices, so
/// the final numbering depends only on merged order, never authoring
/// order.
fn renumber_indices(merged: &mut Graph) {
    let mut order: Vec<(u64, u32)> = merged
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (((n.group_index as u64) << 32) | n.stage.ordinal() as u64, i as u32))
        .collect();
    order.sort_by_key(|(key, _)| *key);

    let mut type_counters: HashMap<TypeId, u32> = HashMap::new();
    let mut param_counters: HashMap<TypeId, u32> = HashMap::new();

    for (_, node_idx) in order {
        let node_type_id = merged.nodes[node_idx as usize].node_type_id;
        let counter = type_counters.entry(node_type_id).or_insert(0);
        merged.nodes[node_idx as usize].index = *counter;
        *counter += 1;

        let param_count = merged.nodes[node_idx as usize].parameters.len();
        for p in 0..param_count {
            let data_id = merged.nodes[node_idx as usize].parameters[p].schema.data_id;
            let counter = param_counters.entry(data_id).or_insert(0);
            merged.nodes[node_idx as usize].parameters[p].index = *counter;
            *counter += 1;
        }
    }
}

/// Re-exported for callers constructing `IdentityHasher`-adjacent data
/// without going through a full merge (used by `inputs.rs` to compute
/// `graph_file_hash`).
pub fn hash_filename(name: &str) -> TypeId {
    hash::hash_string(name)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graph::load::load_graph_file;
    use crate::graph::load::LoadedGraphFile;
    use crate::interner::InternerPools;
    use crate::param::GraphType;
    use crate::registry::ExtensionPointBase;

    fn registry_with_albedo() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        let mut base = ExtensionPointBase::default();
        base.default_stage = Some(Stage::Texturing);
        registry.insert_extension_point("AlbedoColor", GraphType::Float4, base);
        registry.assign_output_type_indices();
        registry
    }

    fn load(filename: &str, source: &str, registry: &TypeRegistry, interner: &InternerPools) -> Graph {
        match load_graph_file(filename, source, registry, interner, 1).unwrap() {
            LoadedGraphFile::Direct(g) => g,
            _ => panic!("expected direct graph"),
        }
    }

    #[test]
    fn merging_empty_graph_list_is_deterministic() {
        let registry = registry_with_albedo();
        let interner = InternerPools::new();
        let a = merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[]).unwrap();
        let b = merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[]).unwrap();
        assert_eq!(a.type_id, b.type_id);
        assert_ne!(a.type_id, 0);
    }

    #[test]
    fn passthrough_head_contributes_no_nodes() {
        let registry = registry_with_albedo();
        let interner = InternerPools::new();
        let source = r#"{
            "version": 3,
            "nodes": [
                {"name":"r","type":"read_AlbedoColor","stage":"Texturing","index":0,"ui_position":{"x":0,"y":0}},
                {"name":"w","type":"write_AlbedoColor","stage":"Texturing","index":0,"ui_position":{"x":0,"y":0}}
            ],
            "links": [
                {"src":{"type":"read_AlbedoColor","index":0,"stage":"Texturing","variable":"value","swizzle":""},
                 "dst":{"type":"write_AlbedoColor","index":0,"stage":"Texturing","variable":"value","swizzle":""},
                 "child_link": false}
            ]
        }"#;
        let graph = load("p.fxgraph", source, &registry, &interner);
        let merged = merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph }]).unwrap();
        assert_eq!(merged.nodes.len(), 0);
    }

    #[test]
    fn index_renumbering_is_contiguous_per_type() {
        let registry = registry_with_albedo();
        let interner = InternerPools::new();
        let source = r#"{
            "version": 3,
            "nodes": [
                {"name":"w1","type":"write_AlbedoColor","stage":"Texturing","index":0,"ui_position":{"x":0,"y":0}}
            ],
            "links": []
        }"#;
        let graph = load("p.fxgraph", source, &registry, &interner);
        let merged = merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph }]).unwrap();
        assert_eq!(merged.nodes.len(), 1);
        assert_eq!(merged.nodes[0].index, 0);
    }
}
