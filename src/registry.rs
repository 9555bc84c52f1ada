//! `NodeType` (spec 3.2) and the `TypeRegistry` that owns every node type
//! parsed from fragment files, plus the extension-point/dynamic-parameter
//! synthesis steps that run once at startup (spec 4.2).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::dynamic_param::DynamicParamTable;
use crate::error::{CompileError, Result};
use crate::hash::{self, TypeId};
use crate::param::{GraphType, ParameterSchema};
use crate::stage::{Stage, ShaderGroups, ALL_LIGHTING_MODELS_MASK};

pub const WRITE_PREFIX: &str = "write_";
pub const READ_PREFIX: &str = "read_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderUsage {
    Vertex,
    Pixel,
    Compute,
    VertexPixel,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cost {
    Cheap,
    Moderate,
    Expensive,
}

impl Default for Cost {
    fn default() -> Self {
        Cost::Expensive
    }
}

/// Which half of an extension point (if any) a `NodeType` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRole {
    /// The Read half: consumers read the current value.
    Input,
    /// The Write half: one producer writes the value.
    Output,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: SmolStr,
    pub graph_type: GraphType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: SmolStr,
    pub graph_type: GraphType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConnector {
    pub name: SmolStr,
    pub extension_point: SmolStr,
    pub stage: Stage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeType {
    pub name: SmolStr,
    pub type_id: TypeId,
    pub input_ports: Vec<InputPort>,
    pub output_ports: Vec<OutputPort>,
    pub stage_connectors: Vec<StageConnector>,
    pub parameters: Vec<ParameterSchema>,
    pub dynamic_parameters: Vec<ParameterSchema>,
    pub custom_dynamic_parameters: Vec<ParameterSchema>,
    pub shader_usage: ShaderUsage,
    pub cost: Cost,
    pub shader_group: ShaderGroups,
    pub default_stage: Option<Stage>,
    /// Bitmask over `LightingModel as u8`; all bits set means "visible
    /// under every lighting model" (spec 4.2.1).
    pub lighting_model_visibility: u8,
    pub link_role: LinkRole,
    /// Id-based indirection to the other half of this extension point
    /// (spec 9 "Cyclic back-references"), looked up in the registry on
    /// demand instead of a raw cross-pointer.
    pub matching_type_id: Option<TypeId>,
    pub output_type_index: Option<u32>,
    pub is_group: bool,
    pub engine_only: bool,
    pub is_input_order_independent: bool,
    /// Set when this write-half's port name matches the configured
    /// TBN-normal output, backing the trail-specific `HasTbnNormals` special
    /// case as NodeType metadata rather than a hard-coded index (spec 9
    /// REDESIGN FLAGS).
    pub is_tbn_normal_output: bool,
}

impl NodeType {
    pub fn new(name: &str) -> Self {
        NodeType {
            name: SmolStr::new(name),
            type_id: hash::hash_string(name),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            stage_connectors: Vec::new(),
            parameters: Vec::new(),
            dynamic_parameters: Vec::new(),
            custom_dynamic_parameters: Vec::new(),
            shader_usage: ShaderUsage::VertexPixel,
            cost: Cost::default(),
            shader_group: ShaderGroups::material(),
            default_stage: None,
            lighting_model_visibility: ALL_LIGHTING_MODELS_MASK,
            link_role: LinkRole::None,
            matching_type_id: None,
            output_type_index: None,
            is_group: false,
            engine_only: false,
            is_input_order_independent: false,
            is_tbn_normal_output: false,
        }
    }

    pub fn is_input_type(&self) -> bool {
        self.link_role == LinkRole::Input
    }

    pub fn is_output_type(&self) -> bool {
        self.link_role == LinkRole::Output
    }

    pub fn is_output_only(&self) -> bool {
        !self.is_group && self.output_ports.is_empty() && self.link_role == LinkRole::None
    }

    pub fn is_enabled_by_lighting_model(&self, model: crate::stage::LightingModel) -> bool {
        (self.lighting_model_visibility & model.visibility_bit()) != 0
    }
}

/// Holds every parsed `NodeType`, keyed by hashed name (spec 2, 4.2).
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: HashMap<TypeId, NodeType>,
    /// Registration order of every Write-half, used to assign the dense
    /// `output_type_index` (spec 4.2.4).
    write_registration_order: Vec<TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_id: TypeId) -> Option<&NodeType> {
        self.by_id.get(&type_id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&NodeType> {
        self.get(hash::hash_string(name))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeType> {
        self.by_id.values()
    }

    /// Registers a plain fragment-declared `NodeType`. Returns an error if
    /// the name collides with an existing, differently-defined type.
    pub fn insert(&mut self, node_type: NodeType) {
        self.by_id.insert(node_type.type_id, node_type);
    }

    /// Registers one extension point: creates exactly the Read half
    /// (`read_<name>`) and the Write half (`write_<name>`), cross-linking
    /// them via `matching_type_id` and sharing a reserved `"value"` port
    /// (spec 4.2.2).
    pub fn insert_extension_point(&mut self, name: &str, value_type: GraphType, base: ExtensionPointBase) {
        let read_name = format!("{READ_PREFIX}{name}");
        let write_name = format!("{WRITE_PREFIX}{name}");

        let mut read = NodeType::new(&read_name);
        read.link_role = LinkRole::Input;
        read.output_ports.push(crate::registry::OutputPort { name: SmolStr::new("value"), graph_type: value_type });
        read.matching_type_id = Some(hash::hash_string(&write_name));
        base.apply(&mut read);

        let mut write = NodeType::new(&write_name);
        write.link_role = LinkRole::Output;
        write.input_ports.push(InputPort { name: SmolStr::new("value"), graph_type: value_type });
        write.matching_type_id = Some(hash::hash_string(&read_name));
        base.apply(&mut write);

        self.write_registration_order.push(write.type_id);

        self.insert(read);
        self.insert(write);
    }

    /// Validates and assigns a default stage/usage pair for an extension
    /// point (spec 4.2.2): if both are declared they must agree; if only
    /// one is declared the other is inferred.
    pub fn resolve_stage_usage(
        name: &str,
        default_stage: Option<Stage>,
        shader_usage: Option<ShaderUsage>,
    ) -> Result<(Stage, ShaderUsage)> {
        match (default_stage, shader_usage) {
            (Some(stage), Some(usage)) => {
                let consistent = match usage {
                    ShaderUsage::Vertex => stage.is_vertex(),
                    ShaderUsage::Pixel => stage.is_pixel(),
                    ShaderUsage::Compute => stage.is_compute(),
                    ShaderUsage::VertexPixel | ShaderUsage::Any => true,
                };
                if !consistent {
                    return Err(CompileError::FragmentParse {
                        file: name.to_string(),
                        message: format!(
                            "extension point '{name}' declares an inconsistent stage/usage pair ({stage:?}, {usage:?})"
                        ),
                    });
                }
                Ok((stage, usage))
            }
            (Some(stage), None) => {
                let usage = if stage.is_vertex() {
                    ShaderUsage::Vertex
                } else if stage.is_pixel() {
                    ShaderUsage::Pixel
                } else {
                    ShaderUsage::Compute
                };
                Ok((stage, usage))
            }
            (None, Some(usage)) => {
                let stage = match usage {
                    ShaderUsage::Vertex => Stage::VertexInit,
                    ShaderUsage::Pixel => Stage::PixelInit,
                    ShaderUsage::Compute => Stage::ComputeInit,
                    ShaderUsage::VertexPixel | ShaderUsage::Any => Stage::PixelInit,
                };
                Ok((stage, usage))
            }
            (None, None) => Err(CompileError::FragmentParse {
                file: name.to_string(),
                message: format!("extension point '{name}' declares neither a stage nor a shader usage"),
            }),
        }
    }

    /// After all fragment files load, assigns a dense `output_type_index`
    /// to every Write half in registration order; the matching Read half
    /// inherits the same index (spec 4.2.4). Returns `K`, the count used
    /// as the `(group, stage_number)` key multiplier.
    pub fn assign_output_type_indices(&mut self) -> u32 {
        let order = self.write_registration_order.clone();
        for (index, write_id) in order.iter().enumerate() {
            let matching = self.by_id.get(write_id).and_then(|n| n.matching_type_id);
            if let Some(write) = self.by_id.get_mut(write_id) {
                write.output_type_index = Some(index as u32);
            }
            if let Some(read_id) = matching {
                if let Some(read) = self.by_id.get_mut(&read_id) {
                    read.output_type_index = Some(index as u32);
                }
            }
        }
        order.len() as u32
    }

    /// Synthesises a trivial `NodeType` for every `(name, type)` in the
    /// dynamic-parameter table not already covered by a static fragment
    /// declaration, and cross-checks the ones that are (spec 4.2.3).
    pub fn synthesize_dynamic_node_types(&mut self, table: &DynamicParamTable) -> Result<()> {
        for (id, info) in table.iter() {
            if let Some(existing) = self.by_id.get(id) {
                let declared = existing.dynamic_parameters.first().map(|p| p.graph_type);
                if let Some(declared_type) = declared {
                    if declared_type != info.graph_type {
                        return Err(CompileError::RegistryMismatch {
                            name: info.name.clone(),
                            table_type: info.graph_type,
                            fragment_type: declared_type,
                        });
                    }
                }
                continue;
            }

            let mut node_type = NodeType::new(&info.name);
            node_type.output_ports.push(OutputPort { name: SmolStr::new("output"), graph_type: info.graph_type });
            node_type.dynamic_parameters.push(ParameterSchema::dynamic(&info.name, info.graph_type));
            self.insert(node_type);
        }
        Ok(())
    }
}

/// The shared fields every NodeType synthesised for an extension point's
/// two halves inherits (spec 4.2.2).
#[derive(Debug, Clone, Default)]
pub struct ExtensionPointBase {
    pub parameters: Vec<ParameterSchema>,
    pub lighting_model_visibility: u8,
    pub default_stage: Option<Stage>,
    pub shader_group: Option<ShaderGroups>,
    pub shader_usage: ShaderUsage,
    pub cost: Cost,
    pub engine_only: bool,
}

impl ExtensionPointBase {
    fn apply(&self, node_type: &mut NodeType) {
        node_type.parameters = self.parameters.clone();
        if self.lighting_model_visibility != 0 {
            node_type.lighting_model_visibility = self.lighting_model_visibility;
        }
        node_type.default_stage = self.default_stage;
        if let Some(group) = &self.shader_group {
            node_type.shader_group = group.clone();
        }
        node_type.shader_usage = self.shader_usage;
        node_type.cost = self.cost;
        node_type.engine_only = self.engine_only;
    }
}

impl Default for ShaderUsage {
    fn default() -> Self {
        ShaderUsage::VertexPixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_point_creates_exactly_two_node_types() {
        let mut registry = TypeRegistry::new();
        registry.insert_extension_point("AlbedoColor", GraphType::Float4, ExtensionPointBase::default());
        assert_eq!(registry.len(), 2);

        let read = registry.get_by_name("read_AlbedoColor").unwrap();
        let write = registry.get_by_name("write_AlbedoColor").unwrap();
        assert!(read.is_input_type());
        assert!(write.is_output_type());
        assert_eq!(read.matching_type_id, Some(write.type_id));
        assert_eq!(write.matching_type_id, Some(read.type_id));
    }

    #[test]
    fn output_type_index_is_dense_and_shared_with_read_half() {
        let mut registry = TypeRegistry::new();
        registry.insert_extension_point("A", GraphType::Float, ExtensionPointBase::default());
        registry.insert_extension_point("B", GraphType::Float, ExtensionPointBase::default());
        let k = registry.assign_output_type_indices();
        assert_eq!(k, 2);

        let read_a = registry.get_by_name("read_A").unwrap();
        let write_a = registry.get_by_name("write_A").unwrap();
        assert_eq!(read_a.output_type_index, write_a.output_type_index);

        let write_b = registry.get_by_name("write_B").unwrap();
        assert_ne!(write_a.output_type_index, write_b.output_type_index);
    }

    #[test]
    fn stage_usage_inconsistency_fails_parsing() {
        let result = TypeRegistry::resolve_stage_usage("Foo", Some(Stage::VertexInit), Some(ShaderUsage::Pixel));
        assert!(result.is_err());
    }

    #[test]
    fn stage_usage_infers_missing_half() {
        let (stage, usage) = TypeRegistry::resolve_stage_usage("Foo", None, Some(ShaderUsage::Pixel)).unwrap();
        assert_eq!(stage, Stage::PixelInit);
        assert_eq!(usage, ShaderUsage::Pixel);
    }

    #[test]
    fn dynamic_synthesis_skips_already_declared_types() {
        let mut registry = TypeRegistry::new();
        let mut node_type = NodeType::new("Time");
        node_type.dynamic_parameters.push(ParameterSchema::dynamic("Time", GraphType::Float));
        registry.insert(node_type);

        let mut table = DynamicParamTable::new();
        table.register("Time", GraphType::Float, crate::dynamic_param::DynamicParamFlags::NONE);
        registry.synthesize_dynamic_node_types(&table).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dynamic_synthesis_rejects_type_mismatch() {
        let mut registry = TypeRegistry::new();
        let mut node_type = NodeType::new("Time");
        node_type.dynamic_parameters.push(ParameterSchema::dynamic("Time", GraphType::Int));
        registry.insert(node_type);

        let mut table = DynamicParamTable::new();
        table.register("Time", GraphType::Float, crate::dynamic_param::DynamicParamFlags::NONE);
        assert!(registry.synthesize_dynamic_node_types(&table).is_err());
    }
}
