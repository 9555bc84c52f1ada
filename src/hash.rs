//! MurmurHash2 and the `type_id` combinator used everywhere identity is
//! derived: node types, port masks, parameter names, and whole graphs.

pub type TypeId = u32;

const M: u32 = 0x5bd1e995;
const R: u32 = 24;

/// The seed every `HashString`/`MergeTypeId` call in the reference corpus
/// hashes with — never 0.
const SEED: u32 = 0x34322;

/// MurmurHash2 (32-bit), matching the reference implementation's mixing
/// constants so hashes computed here agree byte-for-byte with any other
/// port of the same algorithm.
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    let mut h: u32 = seed ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    match tail.len() {
        3 => {
            h ^= (tail[2] as u32) << 16;
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        2 => {
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        1 => {
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Hashes a UTF-8 string with the canonical seed used for node-type,
/// parameter, and macro names.
pub fn hash_string(s: &str) -> TypeId {
    murmur_hash2(s.as_bytes(), SEED)
}

/// Combines two `type_id`s into one, used recursively to fold a node's
/// input links and a graph's heads into a single content hash.
pub fn merge_type_id(a: u32, b: u32) -> u32 {
    let bytes: [u8; 8] = {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&a.to_le_bytes());
        buf[4..8].copy_from_slice(&b.to_le_bytes());
        buf
    };
    murmur_hash2(&bytes, SEED)
}

/// `hash(name + "__")`, the data id used for authored (non-dynamic)
/// parameters and for custom-dynamic-parameter names (spec 4.3, 4.6).
pub fn data_id_plain(name: &str) -> TypeId {
    hash_string(&format!("{name}__"))
}

/// `hash(name)`, the data id used for dynamic parameters (spec 4.2.3, 4.3).
pub fn data_id_dynamic(name: &str) -> TypeId {
    hash_string(name)
}

use std::collections::{HashMap, HashSet};

use crate::graph::{BlendMode, Graph};
use crate::registry::{LinkRole, TypeRegistry};
use crate::stage::LightingModel;

fn lighting_model_name(model: LightingModel) -> &'static str {
    match model {
        LightingModel::PhongMaterial => "PhongMaterial",
        LightingModel::SpecGlossPbrMaterial => "SpecGlossPbrMaterial",
        LightingModel::Anisotropy => "Anisotropy",
    }
}

fn blend_mode_name(mode: BlendMode) -> &'static str {
    match mode {
        BlendMode::Opaque => "Opaque",
        BlendMode::AlphaBlend => "AlphaBlend",
        BlendMode::Additive => "Additive",
        BlendMode::Subtractive => "Subtractive",
    }
}

/// `CalculateTypeId` (spec 4.6): a node's content hash, computed
/// recursively over its input links (producers first) and cached on first
/// call. Returns the cached value on any later call.
pub fn compute_node_type_id(graph: &mut Graph, node_idx: u32, registry: &TypeRegistry) -> TypeId {
    if let Some(id) = graph.nodes[node_idx as usize].type_id {
        return id;
    }

    let node_type_id = graph.nodes[node_idx as usize].node_type_id;
    let stage = graph.nodes[node_idx as usize].stage;
    let input_links = graph.nodes[node_idx as usize].input_links.clone();
    let sampler_indices: Vec<u32> =
        graph.nodes[node_idx as usize].parameters.iter().filter_map(|p| p.sampler_index).collect();
    let custom_names = graph.nodes[node_idx as usize].custom_dynamic_names.clone();

    let mut h = 0u32;
    for link in &input_links {
        h = merge_type_id(h, link.input_port.hash_id());
        h = merge_type_id(h, link.output_port.hash_id());
        let producer_id = compute_node_type_id(graph, link.producer, registry);
        h = merge_type_id(h, producer_id);
    }
    for sampler_index in sampler_indices {
        h = merge_type_id(h, sampler_index);
    }
    for name in &custom_names {
        if !name.is_empty() {
            h = merge_type_id(h, data_id_plain(name));
        }
    }
    if let Some(node_type) = registry.get(node_type_id) {
        if node_type.link_role != LinkRole::None {
            h = merge_type_id(h, hash_string(stage.name()));
        }
        h = merge_type_id(h, node_type.type_id);
    }

    graph.nodes[node_idx as usize].type_id = Some(h);
    h
}

fn mark_stage_reach(graph: &Graph, node_idx: u32, head_stage_number: u32, reach: &mut HashMap<u32, HashSet<u32>>, seen: &mut HashSet<u32>) {
    if !seen.insert(node_idx) {
        return;
    }
    reach.entry(node_idx).or_default().insert(head_stage_number);
    let node = &graph.nodes[node_idx as usize];
    for link in node.input_links.iter().chain(node.stage_links.iter()).chain(node.child_links.iter()) {
        mark_stage_reach(graph, link.producer, head_stage_number, reach, seen);
    }
}

/// Spec 4.5.6: folds the graph's lighting model, blend mode, flags, and
/// state-override hash, then each head's content hash in ascending
/// `(group, stage_number)` order, into `graph.type_id`. Also detects and
/// marks `multi_stage` nodes: referenced from more than one head stage
/// *and* fed to more than one consumer.
pub fn compute_graph_type_id(graph: &mut Graph, registry: &TypeRegistry) {
    let mut in_degree = vec![0u32; graph.nodes.len()];
    for node in &graph.nodes {
        for link in node.input_links.iter().chain(node.stage_links.iter()).chain(node.child_links.iter()) {
            if let Some(c) = in_degree.get_mut(link.producer as usize) {
                *c += 1;
            }
        }
    }

    let mut ordered_heads: Vec<(u64, u32)> = graph
        .heads()
        .into_iter()
        .map(|idx| {
            let node = &graph.nodes[idx as usize];
            let key = ((node.group_index as u64) << 32) | node.stage.ordinal() as u64;
            (key, idx)
        })
        .collect();
    ordered_heads.sort_by_key(|(key, _)| *key);

    let mut h = merge_type_id(0, hash_string(lighting_model_name(graph.lighting_model())));
    h = merge_type_id(h, hash_string(blend_mode_name(graph.blend_mode())));
    h = merge_type_id(h, graph.flags.0 as u32);
    h = merge_type_id(h, graph.state_overrides.content_hash());

    let mut reach: HashMap<u32, HashSet<u32>> = HashMap::new();
    for &(_, head_idx) in &ordered_heads {
        let head_stage_number = graph.nodes[head_idx as usize].stage.ordinal();
        let mut seen = HashSet::new();
        mark_stage_reach(graph, head_idx, head_stage_number, &mut reach, &mut seen);
        let head_hash = compute_node_type_id(graph, head_idx, registry);
        h = merge_type_id(h, head_hash);
    }

    graph.type_id = h;

    for (node_idx, stages) in reach {
        if stages.len() > 1 && in_degree[node_idx as usize] > 1 {
            graph.nodes[node_idx as usize].multi_stage = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_hash() {
        assert_eq!(hash_string("AlbedoColor"), hash_string("AlbedoColor"));
    }

    #[test]
    fn different_input_different_hash() {
        assert_ne!(hash_string("AlbedoColor"), hash_string("Normal"));
    }

    #[test]
    fn merge_is_order_sensitive() {
        let a = hash_string("A");
        let b = hash_string("B");
        assert_ne!(merge_type_id(a, b), merge_type_id(b, a));
    }

    #[test]
    fn merge_is_deterministic() {
        let a = hash_string("A");
        let b = hash_string("B");
        assert_eq!(merge_type_id(a, b), merge_type_id(a, b));
    }

    #[test]
    fn empty_string_does_not_panic() {
        let _ = hash_string("");
    }
}
