//! Typed parameter values (spec 3.1, 4.3): the `GraphType` tag, the static
//! per-`NodeType` parameter schema, and the per-`NodeInstance` parameter
//! values with the uniform/binding serialisation contract.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::hash::{self, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphType {
    Bool,
    Int,
    UInt,
    Float,
    Float2,
    Float3,
    Float4,
    Float4x4,
    Spline5,
    SplineColour,
    Sampler,
    Texture,
    Texture3D,
    TextureCube,
}

impl GraphType {
    pub fn is_sampler(self) -> bool {
        matches!(self, GraphType::Sampler)
    }

    pub fn is_texture(self) -> bool {
        matches!(self, GraphType::Texture | GraphType::Texture3D | GraphType::TextureCube)
    }

    /// Scalar/vector element count for this type, used to validate the
    /// `names/mins/maxs/defaults` property-string element counts (spec
    /// 4.2.1).
    pub fn max_elements(self) -> usize {
        match self {
            GraphType::Bool | GraphType::Int | GraphType::UInt | GraphType::Float => 1,
            GraphType::Float2 => 2,
            GraphType::Float3 => 3,
            GraphType::Float4 => 4,
            GraphType::Float4x4 => 16,
            GraphType::Spline5 => 5,
            GraphType::SplineColour => 5,
            GraphType::Sampler
            | GraphType::Texture
            | GraphType::Texture3D
            | GraphType::TextureCube => 1,
        }
    }
}

/// A single authored value slot, stored as an `f32`; callers interpret the
/// slice according to `GraphType`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar(pub OrderedFloat<f32>);

impl Scalar {
    pub fn value(self) -> f32 {
        self.0.into_inner()
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar(OrderedFloat(v))
    }
}

/// The static, per-parameter schema declared on a [`crate::registry::NodeType`]
/// (spec 4.3). `data_id` is `hash(name + "__")` for plain parameters or
/// `hash(name)` for dynamic ones (set by the caller at construction time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub graph_type: GraphType,
    pub data_id: TypeId,
    pub element_count: usize,
    pub names: Vec<SmolStr>,
    pub mins: Vec<Scalar>,
    pub maxs: Vec<Scalar>,
    pub defaults: Vec<Scalar>,
    pub custom_range: bool,
}

impl ParameterSchema {
    pub fn plain(name: &str, graph_type: GraphType, defaults: Vec<Scalar>, mins: Vec<Scalar>, maxs: Vec<Scalar>) -> Self {
        let element_count = defaults.len();
        ParameterSchema {
            graph_type,
            data_id: hash::data_id_plain(name),
            element_count,
            names: vec![SmolStr::new(name)],
            mins,
            maxs,
            defaults,
            custom_range: false,
        }
    }

    pub fn dynamic(name: &str, graph_type: GraphType) -> Self {
        ParameterSchema {
            graph_type,
            data_id: hash::data_id_dynamic(name),
            element_count: 1,
            names: vec![SmolStr::new(name)],
            mins: Vec::new(),
            maxs: Vec::new(),
            defaults: Vec::new(),
            custom_range: false,
        }
    }
}

/// A per-instance parameter value: the schema plus the instance's current
/// values and resolved resource indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub schema: ParameterSchema,
    pub index: u32,
    pub values: Vec<Scalar>,
    pub sampler_index: Option<u32>,
    pub texture_handle: Option<u64>,
}

impl ParameterValue {
    pub fn from_schema(schema: ParameterSchema) -> Self {
        let values = schema.defaults.clone();
        ParameterValue { schema, index: 0, values, sampler_index: None, texture_handle: None }
    }

    pub fn data_id(&self) -> TypeId {
        self.schema.data_id
    }

    /// `FillFromData`: load a JSON object `{name: value, ...}` or a bare
    /// array of values into `values`, leaving any unspecified element at
    /// its schema default.
    pub fn fill_from_data(&mut self, data: &serde_json::Value) {
        match data {
            serde_json::Value::Array(arr) => {
                for (slot, v) in self.values.iter_mut().zip(arr) {
                    if let Some(f) = v.as_f64() {
                        *slot = Scalar::from(f as f32);
                    }
                }
            }
            serde_json::Value::Object(map) => {
                if self.schema.graph_type.is_sampler() {
                    if let Some(idx) = map.get("sampler_index").and_then(|v| v.as_u64()) {
                        self.sampler_index = Some(idx as u32);
                    }
                } else if self.schema.graph_type.is_texture() {
                    if let Some(h) = map.get("texture_handle").and_then(|v| v.as_u64()) {
                        self.texture_handle = Some(h);
                    }
                } else {
                    for (name, slot) in self.schema.names.iter().zip(self.values.iter_mut()) {
                        if let Some(v) = map.get(name.as_str()).and_then(|v| v.as_f64()) {
                            *slot = Scalar::from(v as f32);
                        }
                    }
                }
            }
            serde_json::Value::Number(n) => {
                if let (Some(f), Some(slot)) = (n.as_f64(), self.values.first_mut()) {
                    *slot = Scalar::from(f as f32);
                }
            }
            _ => {}
        }
    }

    /// `SaveData`: the inverse of `fill_from_data`, producing a byte-stable
    /// JSON encoding so `save(load(save(x))) == save(x)` (testable property
    /// 8).
    pub fn save_data(&self) -> serde_json::Value {
        if self.schema.graph_type.is_sampler() {
            serde_json::json!({ "sampler_index": self.sampler_index })
        } else if self.schema.graph_type.is_texture() {
            serde_json::json!({ "texture_handle": self.texture_handle })
        } else {
            let mut map = serde_json::Map::new();
            for (name, value) in self.schema.names.iter().zip(self.values.iter()) {
                map.insert(name.to_string(), serde_json::json!(value.value()));
            }
            serde_json::Value::Object(map)
        }
    }

    /// Copies values and resource indices from another parameter of the
    /// same schema (spec 4.3 `Copy`; used by the merger to duplicate
    /// authored values onto freshly created nodes).
    pub fn copy_from(&mut self, other: &ParameterValue) {
        self.values = other.values.clone();
        self.sampler_index = other.sampler_index;
        self.texture_handle = other.texture_handle;
    }

    pub fn get_uniform_input_info(&self) -> Option<UniformInputInfoTemplate> {
        if self.schema.graph_type.is_sampler() || self.schema.graph_type.is_texture() {
            return None;
        }
        Some(UniformInputInfoTemplate { data_id: self.data_id(), element_count: self.values.len() })
    }

    pub fn get_binding_input_info(&self) -> Option<BindingInputInfoTemplate> {
        if self.schema.graph_type.is_sampler() {
            Some(BindingInputInfoTemplate::Sampler { data_id: self.data_id(), sampler_index: self.sampler_index })
        } else if self.schema.graph_type.is_texture() {
            Some(BindingInputInfoTemplate::Texture { data_id: self.data_id(), texture_handle: self.texture_handle })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformInputInfoTemplate {
    pub data_id: TypeId,
    pub element_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingInputInfoTemplate {
    Sampler { data_id: TypeId, sampler_index: Option<u32> },
    Texture { data_id: TypeId, texture_handle: Option<u64> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> ParameterSchema {
        ParameterSchema::plain(
            "Roughness",
            GraphType::Float,
            vec![0.5.into()],
            vec![0.0.into()],
            vec![1.0.into()],
        )
    }

    #[test]
    fn save_load_roundtrip_is_byte_identical() {
        let mut value = ParameterValue::from_schema(sample_schema());
        value.fill_from_data(&serde_json::json!({"Roughness": 0.75}));
        let saved = value.save_data();

        let mut reloaded = ParameterValue::from_schema(sample_schema());
        reloaded.fill_from_data(&saved);
        assert_eq!(reloaded.save_data(), saved);
    }

    #[test]
    fn copy_transfers_values_and_sampler_index() {
        let mut src = ParameterValue::from_schema(ParameterSchema::plain(
            "Tex",
            GraphType::Sampler,
            vec![],
            vec![],
            vec![],
        ));
        src.sampler_index = Some(3);

        let mut dst = ParameterValue::from_schema(src.schema.clone());
        dst.copy_from(&src);
        assert_eq!(dst.sampler_index, Some(3));
    }

    #[test]
    fn sampler_has_no_uniform_input() {
        let value = ParameterValue::from_schema(ParameterSchema::plain(
            "Tex",
            GraphType::Sampler,
            vec![],
            vec![],
            vec![],
        ));
        assert!(value.get_uniform_input_info().is_none());
        assert!(value.get_binding_input_info().is_some());
    }
}
