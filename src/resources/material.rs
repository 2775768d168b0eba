//! Materials
//!
//! A material is a template plus zero-or-more unique instances (clones used
//! for per-node overrides). It carries the shading inputs, per-slot texture
//! references (by resource name; runtime handles are resolved by the
//! rendering component), a per-stage render state hash, and a per-stage
//! shader program handle.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::core::guid::Guid;
use crate::renderer::RenderStage;
use crate::renderer::shader::ShaderProgramHandle;

/// Shading model and its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShadingData {
    /// Metallic/roughness PBR.
    Pbr {
        base_colour: [f32; 4],
        emissive: [f32; 3],
        metallic: f32,
        roughness: f32,
    },
    /// Classic Phong.
    Phong {
        diffuse: [f32; 4],
        specular: [f32; 3],
        shininess: f32,
    },
}

impl Default for ShadingData {
    fn default() -> Self {
        Self::Pbr {
            base_colour: [1.0, 1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0],
            metallic: 0.0,
            roughness: 0.9,
        }
    }
}

/// Closed set of texture binding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TextureSlot {
    Albedo,
    Normal,
    MetallicRoughness,
    Occlusion,
    Emissive,
    Specular,
    Opacity,
    Reflection,
    Refraction,
    Projection,
}

/// Transparency handling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Alpha-tested with the given cutoff.
    Mask(f32),
    /// Alpha-blended; routed through the OIT pass when enabled.
    Blend,
}

/// A shadeable surface description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    #[serde(skip, default = "Guid::next")]
    guid: Guid,
    pub name: String,
    pub shading: ShadingData,
    pub alpha_mode: AlphaMode,
    pub double_sided: bool,
    /// Participates in reflection stages.
    pub reflective: bool,
    /// Participates in refraction stages.
    pub refractive: bool,
    pub receives_shadows: bool,
    /// Texture resource name per slot.
    pub textures: FxHashMap<TextureSlot, String>,
    /// Fixed-function state hash per render stage.
    pub state_hashes: [u64; RenderStage::COUNT],
    /// Shader program per render stage. Runtime-only; re-resolved on load.
    #[serde(skip)]
    pub programs: [Option<ShaderProgramHandle>; RenderStage::COUNT],
    /// GUID of the template this instance was cloned from.
    #[serde(skip)]
    template: Option<Guid>,
    /// Bumped on every mutation; pipeline caches key on it.
    #[serde(skip)]
    version: u64,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            guid: Guid::next(),
            name: name.into(),
            shading: ShadingData::default(),
            alpha_mode: AlphaMode::Opaque,
            double_sided: false,
            reflective: false,
            refractive: false,
            receives_shadows: true,
            textures: FxHashMap::default(),
            state_hashes: [0; RenderStage::COUNT],
            programs: [None; RenderStage::COUNT],
            template: None,
            version: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// GUID of the template this material was instanced from, if any.
    #[inline]
    #[must_use]
    pub fn template(&self) -> Option<Guid> {
        self.template
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Clones this material as a unique instance for per-node overrides.
    /// The clone gets its own GUID and remembers its template.
    #[must_use]
    pub fn instantiate(&self) -> Self {
        let mut clone = self.clone();
        clone.guid = Guid::next();
        clone.template = Some(self.guid);
        clone.version = 0;
        clone
    }

    /// True when the material routes through the transparency path.
    #[inline]
    #[must_use]
    pub fn is_translucent(&self) -> bool {
        matches!(self.alpha_mode, AlphaMode::Blend)
    }

    pub fn set_texture(&mut self, slot: TextureSlot, resource_name: impl Into<String>) {
        self.textures.insert(slot, resource_name.into());
        self.touch();
    }

    pub fn set_shading(&mut self, shading: ShadingData) {
        self.shading = shading;
        self.touch();
    }

    pub fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
        self.touch();
    }

    /// Recomputes and stores the fixed-function state hash for a stage.
    pub fn bake_state_hash(&mut self, stage: RenderStage) {
        let mut bytes = Vec::with_capacity(16);
        bytes.push(self.double_sided as u8);
        bytes.push(match self.alpha_mode {
            AlphaMode::Opaque => 0,
            AlphaMode::Mask(_) => 1,
            AlphaMode::Blend => 2,
        });
        bytes.push(stage as u8);
        bytes.push(self.receives_shadows as u8);
        self.state_hashes[stage.index()] = xxh3_64(&bytes);
        self.touch();
    }

    /// Assigns the compiled program for a stage.
    pub fn set_program(&mut self, stage: RenderStage, program: ShaderProgramHandle) {
        self.programs[stage.index()] = Some(program);
        self.touch();
    }

    /// True when the material can be drawn in `stage` right now.
    #[must_use]
    pub fn can_draw(&self, stage: RenderStage) -> bool {
        self.programs[stage.index()].is_some()
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip_preserves_identity_fields() {
        let mut material = Material::new("crate-metal");
        material.set_shading(ShadingData::Phong {
            diffuse: [0.5, 0.4, 0.3, 1.0],
            specular: [1.0, 1.0, 1.0],
            shininess: 32.0,
        });
        material.set_texture(TextureSlot::Albedo, "crate_albedo");
        material.set_texture(TextureSlot::Normal, "crate_normal");
        material.bake_state_hash(RenderStage::Display);
        material.bake_state_hash(RenderStage::Shadow);

        let json = serde_json::to_string(&material).unwrap();
        let restored: Material = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.shading, material.shading);
        assert_eq!(restored.textures, material.textures);
        assert_eq!(restored.state_hashes, material.state_hashes);
    }

    #[test]
    fn instances_remember_their_template() {
        let template = Material::new("base");
        let instance = template.instantiate();
        assert_ne!(instance.guid(), template.guid());
        assert_eq!(instance.template(), Some(template.guid()));
        assert!(template.template().is_none());
    }

    #[test]
    fn mutation_bumps_the_version() {
        let mut material = Material::new("m");
        let v0 = material.version();
        material.set_alpha_mode(AlphaMode::Blend);
        assert!(material.version() > v0);
        assert!(material.is_translucent());
    }
}
