//! A single authored or merged graph (spec 3.4, 3.3): an arena of
//! [`NodeInstance`]s connected by index rather than raw pointer, per the
//! REDESIGN FLAGS in spec 9 ("Pointer-graph within Graphs").

pub mod load;

use std::collections::BTreeMap;

use smol_str::SmolStr;

use crate::hash::{self, TypeId};
use crate::interner::Handle;
use crate::param::ParameterValue;
use crate::registry::{LinkRole, TypeRegistry};
use crate::stage::{EffectOrder, LightingModel, ShaderGroups, Stage, ALL_LIGHTING_MODELS_MASK};

/// `(port_index, swizzle_mask)` as in spec 3.3's `Link` definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub port_index: u32,
    pub swizzle_mask: Handle,
}

impl PortRef {
    /// The `hash_id` folded into a node's content hash (spec 4.6): the
    /// port index combined with the interned mask string's hash.
    pub fn hash_id(&self) -> TypeId {
        hash::merge_type_id(self.port_index, hash::hash_string(self.swizzle_mask.data()))
    }
}

/// `(output_port_info, input_port_info, producer_node)` (spec 3.3). The
/// producer is an arena index into the owning `Graph::nodes`, never a raw
/// pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub output_port: PortRef,
    pub input_port: PortRef,
    pub producer: u32,
}

/// Preferred shader stage family for a node (spec 3.3), resolved from
/// `NodeType::shader_usage` plus authored `ui_position.y` when the usage
/// doesn't already fix it (spec 4.4 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredShader {
    Vertex,
    Pixel,
    Compute,
}

/// A small bitflags-like macro so flag bits read the way the teacher's own
/// flag enums do, without pulling in the `bitflags` crate for one 5-bit set.
macro_rules! bitflags_like_u8 {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : u8 {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub u8);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like_u8! {
    /// Per-graph flag bits (spec 3.4).
    pub struct GraphFlags: u8 {
        const DISABLE_LIGHTING = 0b0000_0001;
        const CONSTANT         = 0b0000_0010;
        const IGNORE_CONSTANT  = 0b0000_0100;
        const USE_START_TIME   = 0b0000_1000;
        const HAS_PARAMETERS   = 0b0001_0000;
    }
}

/// `Overwriteable<T>`: a value plus "was this field ever set" bit (spec
/// 3.4's `EffectGraphStateOverwrite` discipline, spec 9's port notes). A
/// field that was never overridden contributes nothing to the content
/// hash and loses a field-wise merge to any graph that did set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overwriteable<T> {
    pub value: T,
    pub is_set: bool,
}

impl<T: Default> Overwriteable<T> {
    pub fn unset() -> Self {
        Overwriteable { value: T::default(), is_set: false }
    }

    pub fn set(value: T) -> Self {
        Overwriteable { value, is_set: true }
    }

    /// Later-wins field merge: `other` replaces `self` only if `other` was
    /// actually set (spec 4.5.1 "a later graph's explicit override wins").
    pub fn merge_later_wins(&mut self, other: &Overwriteable<T>)
    where
        T: Clone,
    {
        if other.is_set {
            self.value = other.value.clone();
            self.is_set = true;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RasterizerState {
    pub cull_mode: u8,
    pub fill_mode: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DepthStencilState {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub stencil_ref: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BlendState {
    pub src_factor: u8,
    pub dst_factor: u8,
}

/// The render-state overrides a graph may carry, each independently
/// "overridden?" (spec 3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateOverrides {
    pub rasterizer: Overwriteable<RasterizerState>,
    pub depth_stencil: Overwriteable<DepthStencilState>,
    pub blend: Overwriteable<BlendState>,
}

impl StateOverrides {
    pub fn merge_later_wins(&mut self, other: &StateOverrides) {
        self.rasterizer.merge_later_wins(&other.rasterizer);
        self.depth_stencil.merge_later_wins(&other.depth_stencil);
        self.blend.merge_later_wins(&other.blend);
    }

    /// Folded into the graph's content hash (spec 4.5.6): unset fields
    /// hash to 0, matching the `Overwriteable<T>` discipline.
    pub fn content_hash(&self) -> TypeId {
        let mut h = 0u32;
        if self.rasterizer.is_set {
            h = hash::merge_type_id(h, self.rasterizer.value.cull_mode as u32);
            h = hash::merge_type_id(h, self.rasterizer.value.fill_mode as u32);
        }
        if self.depth_stencil.is_set {
            h = hash::merge_type_id(h, self.depth_stencil.value.depth_test_enabled as u32);
            h = hash::merge_type_id(h, self.depth_stencil.value.depth_write_enabled as u32);
            h = hash::merge_type_id(h, self.depth_stencil.value.stencil_ref as u32);
        }
        if self.blend.is_set {
            h = hash::merge_type_id(h, self.blend.value.src_factor as u32);
            h = hash::merge_type_id(h, self.blend.value.dst_factor as u32);
        }
        h
    }
}

/// Render blend mode (spec 4.5.1 mentions the `.matgraph` default `Opaque`
/// override hack; the remaining variants are a closed, conventional set
/// since the distilled spec leaves the full table unspecified).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    AlphaBlend,
    Additive,
    Subtractive,
}

/// A node within a [`Graph`] (spec 3.3).
#[derive(Debug, Clone)]
pub struct NodeInstance {
    pub node_type_id: TypeId,
    /// Monotonic per-node-type index. Authored index before merge;
    /// reassigned by `GraphMerger::merge` (spec 4.5.5) so it depends only
    /// on final merged order.
    pub index: u32,
    pub stage: Stage,
    /// `merge(merge(merge(0, type_id), index), stage_ord)` (spec 3.3) —
    /// the "signature" used to key link resolution and merge dedup,
    /// distinct from the content-hash `type_id` below.
    pub hash_id: TypeId,
    pub input_links: Vec<Link>,
    pub stage_links: Vec<Link>,
    /// Populated only for `Group` nodes.
    pub child_links: Vec<Link>,
    pub parameters: Vec<ParameterValue>,
    pub custom_dynamic_names: Vec<SmolStr>,
    /// Hash of the authored `custom_parameter` string on the JSON node, if
    /// any (spec 3.5's `custom_parameter_hash` key into an `InstanceDesc`).
    pub custom_parameter_hash: Option<TypeId>,
    /// Which source graph (by position in the merge's component list)
    /// contributed this node.
    pub graph_index: u32,
    pub group_index: u32,
    /// Index of the parent `Group` node, for nodes inside a Group.
    pub parent_id: Option<u32>,
    /// Content hash, computed lazily and cached (spec 4.6).
    pub type_id: Option<TypeId>,
    /// Set during merge if the node feeds outputs in more than one stage.
    pub multi_stage: bool,
    pub preferred_shader: PreferredShader,
}

impl NodeInstance {
    pub fn new(node_type_id: TypeId, index: u32, stage: Stage, preferred_shader: PreferredShader) -> Self {
        let hash_id = hash::merge_type_id(hash::merge_type_id(hash::merge_type_id(0, node_type_id), index), stage.ordinal());
        NodeInstance {
            node_type_id,
            index,
            stage,
            hash_id,
            input_links: Vec::new(),
            stage_links: Vec::new(),
            child_links: Vec::new(),
            parameters: Vec::new(),
            custom_dynamic_names: Vec::new(),
            custom_parameter_hash: None,
            graph_index: 0,
            group_index: 0,
            parent_id: None,
            type_id: None,
            multi_stage: false,
            preferred_shader,
        }
    }

    /// A copy carrying the same `NodeType`, stage, preferred-shader, and
    /// parameter values — but no links yet, `graph_index`/`group_index`
    /// left at defaults for the caller to set. Used by the merger to
    /// instantiate a fresh node from a source-graph template (spec
    /// 4.5.2.b.3: "copy parameters (full copy of values, sampler indices,
    /// custom-dynamic-names)").
    pub fn clone_template(src: &NodeInstance) -> Self {
        let mut node = NodeInstance::new(src.node_type_id, src.index, src.stage, src.preferred_shader);
        node.custom_dynamic_names = src.custom_dynamic_names.clone();
        node.custom_parameter_hash = src.custom_parameter_hash;
        node.parameters = src.parameters.iter().map(|p| {
            let mut copy = ParameterValue::from_schema(p.schema.clone());
            copy.copy_from(p);
            copy
        }).collect();
        node
    }

    pub fn num_input_links(&self) -> usize {
        self.input_links.len() + self.stage_links.len() + self.child_links.len()
    }
}

/// A key into `Graph::input_nodes` / `Graph::output_nodes`: `(group_index,
/// stage_ord * num_output_types + output_type_index)` (spec 3.4).
pub fn output_key(group_index: u32, stage_ord: u32, output_type_index: u32, num_output_types: u32) -> u64 {
    let inner = stage_ord as u64 * num_output_types as u64 + output_type_index as u64;
    ((group_index as u64) << 32) | inner
}

/// One loaded or merged authored graph (spec 3.4).
#[derive(Debug, Clone)]
pub struct Graph {
    pub filename: Handle,
    pub nodes: Vec<NodeInstance>,
    /// Read-half nodes, keyed by [`output_key`].
    pub input_nodes: BTreeMap<u64, u32>,
    /// Write-half nodes, keyed by [`output_key`].
    pub output_nodes: BTreeMap<u64, u32>,
    /// Output-only nodes (no output ports, not an extension-point half) —
    /// always heads, never deduplicated by key.
    pub output_only_nodes: Vec<u32>,
    pub flags: GraphFlags,
    pub lighting_model_override: Option<LightingModel>,
    pub blend_mode_override: Option<BlendMode>,
    pub alpha_ref_override: Option<[f32; 4]>,
    pub effect_order: EffectOrder,
    pub custom_macros: Vec<(Handle, Handle)>,
    pub state_overrides: StateOverrides,
    pub shader_group: ShaderGroups,
    /// `(filename, group_index)` pairs, one per component that
    /// contributed to this graph (spec 4.5.2.e); a single non-merged
    /// graph carries exactly its own filename at group 0.
    pub source_filenames: Vec<(Handle, u32)>,
    pub type_id: TypeId,
    /// Bump allocator for `output_type_index` bookkeeping; set once after
    /// a `TypeRegistry::assign_output_type_indices` call so `output_key`
    /// can be computed consistently across loads and merges.
    pub num_output_types: u32,
}

impl Graph {
    pub fn new(filename: Handle, num_output_types: u32) -> Self {
        Graph {
            filename: filename.clone(),
            nodes: Vec::new(),
            input_nodes: BTreeMap::new(),
            output_nodes: BTreeMap::new(),
            output_only_nodes: Vec::new(),
            flags: GraphFlags::empty(),
            lighting_model_override: None,
            blend_mode_override: None,
            alpha_ref_override: None,
            effect_order: EffectOrder::default(),
            custom_macros: Vec::new(),
            state_overrides: StateOverrides::default(),
            shader_group: ShaderGroups::material(),
            source_filenames: vec![(filename, 0)],
            type_id: 0,
            num_output_types,
        }
    }

    pub fn lighting_model(&self) -> LightingModel {
        self.lighting_model_override.unwrap_or_default()
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode_override.unwrap_or_default()
    }

    /// Index a node's `hash_id` for key lookup during the Read/Write
    /// registration that happens while loading or merging.
    pub fn register_output_key(&mut self, registry: &TypeRegistry, node_idx: u32) {
        let node = &self.nodes[node_idx as usize];
        let Some(node_type) = registry.get(node.node_type_id) else { return };
        let Some(output_type_index) = node_type.output_type_index else { return };
        let key = output_key(node.group_index, node.stage.ordinal(), output_type_index, self.num_output_types.max(1));
        match node_type.link_role {
            LinkRole::Input => {
                self.input_nodes.entry(key).or_insert(node_idx);
            }
            LinkRole::Output => {
                self.output_nodes.insert(key, node_idx);
            }
            LinkRole::None => {}
        }
    }

    /// Every head: every Write-half node plus every output-only node
    /// (spec glossary "Head").
    pub fn heads(&self) -> Vec<u32> {
        let mut heads: Vec<u32> = self.output_nodes.values().copied().collect();
        heads.extend(self.output_only_nodes.iter().copied());
        heads
    }

    /// `HasNoEffect` (spec 4.7): true iff this head is not output-only and
    /// every one of its input-links connects to the matching Read-half at
    /// the same stage.
    pub fn has_no_effect(&self, node_idx: u32, registry: &TypeRegistry) -> bool {
        let node = &self.nodes[node_idx as usize];
        let Some(node_type) = registry.get(node.node_type_id) else { return false };
        if node_type.is_output_only() {
            return false;
        }
        if node.input_links.is_empty() {
            return false;
        }
        node.input_links.iter().all(|link| {
            let Some(producer) = self.nodes.get(link.producer as usize) else { return false };
            let Some(producer_type) = registry.get(producer.node_type_id) else { return false };
            producer_type.is_input_type()
                && producer_type.matching_type_id == Some(node.node_type_id)
                && producer.stage == node.stage
        })
    }

    /// A stable, line-oriented dump of `(array index, NodeType name,
    /// per-type index, stage)` for every node in arena order — the
    /// merge-output analogue of the teacher's `shader_str` dot-graph dump,
    /// used to snapshot-test merge output shape without depending on the
    /// exact `type_id` integer value.
    pub fn debug_text(&self, registry: &TypeRegistry) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let name = registry.get(node.node_type_id).map(|t| t.name.as_str()).unwrap_or("?");
            out.push_str(&format!("{i}: {name}#{} stage={:?}\n", node.index, node.stage));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;

    #[test]
    fn output_key_packs_group_into_high_bits() {
        let a = output_key(0, 5, 1, 4);
        let b = output_key(1, 5, 1, 4);
        assert_ne!(a, b);
        assert_eq!(a & 0xFFFF_FFFF, 21);
    }

    #[test]
    fn overwriteable_later_wins_only_if_set() {
        let mut base: Overwriteable<u32> = Overwriteable::set(1);
        let unset: Overwriteable<u32> = Overwriteable::unset();
        base.merge_later_wins(&unset);
        assert_eq!(base.value, 1);

        let set_other = Overwriteable::set(7);
        base.merge_later_wins(&set_other);
        assert_eq!(base.value, 7);
    }

    #[test]
    fn empty_graph_has_no_heads() {
        let interner = Interner::new();
        let graph = Graph::new(interner.intern("empty.fxgraph"), 0);
        assert!(graph.heads().is_empty());
    }
}
