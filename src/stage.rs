//! The fixed pipeline timeline (spec 3.1) and the shader-group stage tables
//! used to decide which nodes are compiled in under a given `ShaderGroups`
//! selection (spec 4.4, 4.5.3).

use serde::{Deserialize, Serialize};

/// One position in the fixed pipeline timeline. Declaration order is
/// semantic: stage comparisons (`<=`, `min`) are by this order, not by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Stage {
    VertexInit,
    Animation,
    LocalTransform,
    LocalTransformCalc,
    LocalTransformFinal,
    WorldTransformInit,
    WorldTransform,
    WorldTransformCalc,
    WorldTransformFinal,
    ProjectionTransform,
    ProjectionTransformCalc,
    ProjectionTransformFinal,
    VertexOutput,
    VertexOutputCalc,
    VertexOutputFinal,
    VertexOutputPass,

    VertexToPixel,
    PixelInit,
    UvSetup,
    UvSetupCalc,
    UvSetupFinal,
    TexturingInit,
    Texturing,
    TexturingCalc,
    TexturingFinal,
    PreLighting,
    PreLightingCalc,
    PreLightingFinal,
    AlphaClip,
    Lighting,
    LightingCalc,
    LightingFinal,
    CustomLighting,
    CustomLightingCalc,
    CustomLightingFinal,
    LightingEnd,
    LightingEndCalc,
    LightingEndFinal,
    PostLighting,
    PostLightingCalc,
    PostLightingFinal,
    FogStage,
    FogStageCalc,
    FogStageFinal,
    PixelOutput,
    PixelOutputCalc,
    PixelOutputFinal,

    ComputeInit,

    ParticlesSetup,
    ParticlesLifetimeInit,
    ParticlesLifetime,
    ParticlesLifetimeCalc,
    ParticlesEmitInit,
    ParticlesEmit,
    ParticlesEmitCalc,
    ParticlesUpdateInit,
    ParticlesUpdate,
    ParticlesUpdateCalc,
    ParticlesPhysicInit,
    ParticlesPhysic,
    ParticlesPhysicCalc,
    ParticlesIntegrate,
    ParticlesPostIntegrate,
    ParticlesCollision,
    ParticlesCollisionCalc,
    ParticlesWrite,
    ParticlesWriteFinal,
}

pub const NUM_STAGES: usize = Stage::ParticlesWriteFinal as usize + 1;

pub const VERTEX_STAGE_BEGIN: Stage = Stage::VertexInit;
pub const VERTEX_STAGE_END: Stage = Stage::VertexToPixel;
pub const PIXEL_STAGE_BEGIN: Stage = Stage::VertexToPixel;
pub const PIXEL_STAGE_END: Stage = Stage::ComputeInit;
pub const COMPUTE_STAGE_BEGIN: Stage = Stage::ComputeInit;

impl Stage {
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        STAGE_NAMES[self.ordinal() as usize]
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        STAGE_NAMES.iter().position(|&n| n == name).map(Self::from_ordinal_unchecked)
    }

    fn from_ordinal_unchecked(i: usize) -> Stage {
        ALL_STAGES[i]
    }

    pub fn is_vertex(self) -> bool {
        self >= VERTEX_STAGE_BEGIN && self < VERTEX_STAGE_END
    }

    pub fn is_pixel(self) -> bool {
        self >= PIXEL_STAGE_BEGIN && self < PIXEL_STAGE_END
    }

    pub fn is_compute(self) -> bool {
        self >= COMPUTE_STAGE_BEGIN
    }
}

const ALL_STAGES: [Stage; NUM_STAGES] = [
    Stage::VertexInit,
    Stage::Animation,
    Stage::LocalTransform,
    Stage::LocalTransformCalc,
    Stage::LocalTransformFinal,
    Stage::WorldTransformInit,
    Stage::WorldTransform,
    Stage::WorldTransformCalc,
    Stage::WorldTransformFinal,
    Stage::ProjectionTransform,
    Stage::ProjectionTransformCalc,
    Stage::ProjectionTransformFinal,
    Stage::VertexOutput,
    Stage::VertexOutputCalc,
    Stage::VertexOutputFinal,
    Stage::VertexOutputPass,
    Stage::VertexToPixel,
    Stage::PixelInit,
    Stage::UvSetup,
    Stage::UvSetupCalc,
    Stage::UvSetupFinal,
    Stage::TexturingInit,
    Stage::Texturing,
    Stage::TexturingCalc,
    Stage::TexturingFinal,
    Stage::PreLighting,
    Stage::PreLightingCalc,
    Stage::PreLightingFinal,
    Stage::AlphaClip,
    Stage::Lighting,
    Stage::LightingCalc,
    Stage::LightingFinal,
    Stage::CustomLighting,
    Stage::CustomLightingCalc,
    Stage::CustomLightingFinal,
    Stage::LightingEnd,
    Stage::LightingEndCalc,
    Stage::LightingEndFinal,
    Stage::PostLighting,
    Stage::PostLightingCalc,
    Stage::PostLightingFinal,
    Stage::FogStage,
    Stage::FogStageCalc,
    Stage::FogStageFinal,
    Stage::PixelOutput,
    Stage::PixelOutputCalc,
    Stage::PixelOutputFinal,
    Stage::ComputeInit,
    Stage::ParticlesSetup,
    Stage::ParticlesLifetimeInit,
    Stage::ParticlesLifetime,
    Stage::ParticlesLifetimeCalc,
    Stage::ParticlesEmitInit,
    Stage::ParticlesEmit,
    Stage::ParticlesEmitCalc,
    Stage::ParticlesUpdateInit,
    Stage::ParticlesUpdate,
    Stage::ParticlesUpdateCalc,
    Stage::ParticlesPhysicInit,
    Stage::ParticlesPhysic,
    Stage::ParticlesPhysicCalc,
    Stage::ParticlesIntegrate,
    Stage::ParticlesPostIntegrate,
    Stage::ParticlesCollision,
    Stage::ParticlesCollisionCalc,
    Stage::ParticlesWrite,
    Stage::ParticlesWriteFinal,
];

const STAGE_NAMES: [&str; NUM_STAGES] = [
    "VertexInit",
    "Animation",
    "LocalTransform",
    "LocalTransform_Calc",
    "LocalTransform_Final",
    "WorldTransform_Init",
    "WorldTransform",
    "WorldTransform_Calc",
    "WorldTransform_Final",
    "ProjectionTransform",
    "ProjectionTransform_Calc",
    "ProjectionTransform_Final",
    "VertexOutput",
    "VertexOutput_Calc",
    "VertexOutput_Final",
    "VertexOutput_Pass",
    "VertexToPixel",
    "PixelInit",
    "UVSetup",
    "UVSetup_Calc",
    "UVSetup_Final",
    "Texturing_Init",
    "Texturing",
    "Texturing_Calc",
    "Texturing_Final",
    "PreLighting",
    "PreLighting_Calc",
    "PreLighting_Final",
    "AlphaClip",
    "Lighting",
    "Lighting_Calc",
    "Lighting_Final",
    "CustomLighting",
    "CustomLighting_Calc",
    "CustomLighting_Final",
    "LightingEnd",
    "LightingEnd_Calc",
    "LightingEnd_Final",
    "PostLighting",
    "PostLighting_Calc",
    "PostLighting_Final",
    "FogStage",
    "FogStage_Calc",
    "FogStage_Final",
    "PixelOutput",
    "PixelOutput_Calc",
    "PixelOutput_Final",
    "ComputeInit",
    "ParticlesSetup",
    "ParticlesLifetimeInit",
    "ParticlesLifetime",
    "ParticlesLifetimeCalc",
    "ParticlesEmitInit",
    "ParticlesEmit",
    "ParticlesEmitCalc",
    "ParticlesUpdateInit",
    "ParticlesUpdate",
    "ParticlesUpdateCalc",
    "ParticlesPhysicInit",
    "ParticlesPhysic",
    "ParticlesPhysicCalc",
    "ParticlesIntegrate",
    "ParticlesPostIntegrate",
    "ParticlesCollision",
    "ParticlesCollisionCalc",
    "ParticlesWrite",
    "ParticlesWriteFinal",
];

/// Only stages within this window track a fanned-out `group_index`; every
/// other stage collapses to group 0 during merge (spec 4.5.3).
pub const MAX_GROUP_INDEX: u32 = 4;

pub fn group_index_for_stage(requested_group: u32, stage: Stage) -> u32 {
    let in_window = stage >= Stage::UvSetup && stage <= Stage::TexturingInit;
    if in_window {
        requested_group.min(MAX_GROUP_INDEX)
    } else {
        0
    }
}

/// `MainGroup` / `OptGroup` as in spec 3.1. A rendered object selects one
/// main group plus zero or more compatible opt groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MainGroup {
    Material,
    ParticlesUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptGroup {
    Trail,
    TrailUVs,
    ParticlesRender,
    ParticlesPhysics,
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShaderGroups {
    pub main: Option<MainGroup>,
    pub opt: Vec<OptGroup>,
}

impl ShaderGroups {
    pub fn material() -> Self {
        Self { main: Some(MainGroup::Material), opt: Vec::new() }
    }

    pub fn union(&self, other: &ShaderGroups) -> ShaderGroups {
        let main = other.main.or(self.main);
        let mut opt = self.opt.clone();
        for g in &other.opt {
            if !opt.contains(g) {
                opt.push(*g);
            }
        }
        ShaderGroups { main, opt }
    }

    pub fn is_stage_enabled(&self, stage: Stage) -> bool {
        match self.main {
            Some(MainGroup::Material) => material_stages().contains(&stage),
            Some(MainGroup::ParticlesUpdate) => particles_update_stages().contains(&stage),
            None => material_stages().contains(&stage),
        }
    }

    pub fn is_opt_compatible(&self, group: OptGroup) -> bool {
        match self.main {
            Some(MainGroup::Material) => {
                matches!(group, OptGroup::Temporary | OptGroup::ParticlesRender | OptGroup::Trail | OptGroup::TrailUVs)
            }
            Some(MainGroup::ParticlesUpdate) => {
                matches!(group, OptGroup::Temporary | OptGroup::ParticlesPhysics)
            }
            None => false,
        }
    }
}

fn material_stages() -> std::ops::RangeInclusive<Stage> {
    Stage::VertexInit..=Stage::PixelOutputFinal
}

fn particles_update_stages() -> std::ops::RangeInclusive<Stage> {
    Stage::ParticlesSetup..=Stage::ParticlesWriteFinal
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum LightingModel {
    PhongMaterial,
    SpecGlossPbrMaterial,
    Anisotropy,
}

impl LightingModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PhongMaterial" => Some(Self::PhongMaterial),
            "SpecGlossPbrMaterial" => Some(Self::SpecGlossPbrMaterial),
            "Anisotropy" => Some(Self::Anisotropy),
            _ => None,
        }
    }

    /// The macro this lighting model contributes to `GetFinalShaderFragments`.
    pub fn macro_name(self) -> &'static str {
        match self {
            LightingModel::PhongMaterial => "",
            LightingModel::SpecGlossPbrMaterial => "GGX",
            LightingModel::Anisotropy => "ANISOTROPY",
        }
    }

    pub fn visibility_bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl Default for LightingModel {
    fn default() -> Self {
        LightingModel::PhongMaterial
    }
}

/// All bits set means "visible under every lighting model" (spec 4.2.1:
/// first `SetLightingModel` call resets the default all-on mask).
pub const ALL_LIGHTING_MODELS_MASK: u8 = 0b111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum EffectOrder {
    Ground,
    #[default]
    Default,
    Last,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_matches_declaration_order() {
        assert!(Stage::VertexInit < Stage::PixelInit);
        assert!(Stage::PixelInit < Stage::ComputeInit);
    }

    #[test]
    fn stage_name_roundtrip() {
        for s in ALL_STAGES {
            assert_eq!(Stage::from_name(s.name()), Some(s));
        }
    }

    #[test]
    fn group_window_collapses_outside_texturing() {
        assert_eq!(group_index_for_stage(3, Stage::Lighting), 0);
        assert_eq!(group_index_for_stage(3, Stage::Texturing), 0);
        assert_eq!(group_index_for_stage(3, Stage::TexturingInit), 3);
    }

    #[test]
    fn material_disables_particle_stages() {
        let groups = ShaderGroups::material();
        assert!(!groups.is_stage_enabled(Stage::ParticlesUpdate));
        assert!(groups.is_stage_enabled(Stage::Lighting));
    }
}
