//! Engine Configuration
//!
//! A flat-ish tree of settings loaded once at startup. The on-disk format is
//! JSON; every field carries a default so a missing or partial file still
//! yields a usable configuration. Subsystems never read this tree at use
//! time — descriptor objects copy out exactly what they need during init.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{DivideError, Result};

fn default_resolution() -> [u32; 2] {
    [1280, 720]
}

fn default_ticks_per_second() -> u32 {
    30
}

fn default_lod_thresholds() -> [f32; 4] {
    [25.0, 45.0, 85.0, 165.0]
}

/// Runtime / windowing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub target_display: u32,
    pub windowed_mode: bool,
    #[serde(rename = "resolution")]
    pub resolution: [u32; 2],
    pub camera_view_distance: f32,
    pub vertical_fov: f32,
    pub max_worker_threads: u32,
    pub enable_vsync: bool,
    pub adaptive_sync: bool,
    /// Frames per second cap; `0` disables the limiter.
    pub frame_rate_limit: u32,
    /// Fixed logic tick rate in Hz.
    pub ticks_per_second: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target_display: 0,
            windowed_mode: true,
            resolution: default_resolution(),
            camera_view_distance: 1000.0,
            vertical_fov: 60.0,
            max_worker_threads: 0,
            enable_vsync: true,
            adaptive_sync: false,
            frame_rate_limit: 0,
            ticks_per_second: default_ticks_per_second(),
        }
    }
}

/// Post-processing chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostFxConfig {
    pub post_aa_type: String,
    pub post_aa_quality_level: u32,
    pub enable_bloom: bool,
    pub bloom_factor: f32,
    pub bloom_threshold: f32,
    pub enable_ssao: bool,
    pub ssao_radius: f32,
    pub ssao_power: f32,
    pub enable_depth_of_field: bool,
    pub enable_camera_blur: bool,
    pub enable_adaptive_tone_mapping: bool,
    pub velocity_scale: f32,
    pub enable_per_object_motion_blur: bool,
}

impl Default for PostFxConfig {
    fn default() -> Self {
        Self {
            post_aa_type: "FXAA".to_string(),
            post_aa_quality_level: 2,
            enable_bloom: true,
            bloom_factor: 0.8,
            bloom_threshold: 0.85,
            enable_ssao: true,
            ssao_radius: 0.5,
            ssao_power: 2.0,
            enable_depth_of_field: false,
            enable_camera_blur: false,
            enable_adaptive_tone_mapping: false,
            velocity_scale: 1.0,
            enable_per_object_motion_blur: false,
        }
    }
}

/// Per-light-type shadow map settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowTypeConfig {
    pub shadow_map_resolution: u32,
    pub msaa_samples: u32,
    pub enable_blurring: bool,
    pub anisotropic_filtering_level: u32,
    /// Directional only: blend between uniform and logarithmic splits.
    pub split_lambda: f32,
    /// Directional only: number of cascades.
    pub split_count: u32,
}

impl Default for ShadowTypeConfig {
    fn default() -> Self {
        Self {
            shadow_map_resolution: 1024,
            msaa_samples: 0,
            enable_blurring: false,
            anisotropic_filtering_level: 0,
            split_lambda: 0.925,
            split_count: 3,
        }
    }
}

/// Shadow mapping settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfigTree {
    pub enabled: ShadowEnabled,
    pub softness: f32,
    pub csm: ShadowTypeConfig,
    pub spot: ShadowTypeConfig,
    pub point: ShadowTypeConfig,
}

/// Wrapper so `enabled` defaults to `true` while staying a plain bool in JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShadowEnabled(pub bool);

impl Default for ShadowEnabled {
    fn default() -> Self {
        Self(true)
    }
}

/// Rendering quality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    pub msaa_samples: u32,
    pub anisotropic_filtering_level: u32,
    pub reflection_resolution_factor: f32,
    pub terrain_detail_level: u32,
    pub fog_colour: [f32; 3],
    pub fog_density: f32,
    pub lod_thresholds: [f32; 4],
    pub num_lights_per_screen_tile: u32,
    pub light_thread_group_size: u32,
    pub post_fx: PostFxConfig,
    pub shadow_mapping: ShadowConfigTree,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            msaa_samples: 0,
            anisotropic_filtering_level: 16,
            reflection_resolution_factor: 0.5,
            terrain_detail_level: 2,
            fog_colour: [0.2, 0.2, 0.2],
            fog_density: 0.01,
            lod_thresholds: default_lod_thresholds(),
            num_lights_per_screen_tile: 32,
            light_thread_group_size: 64,
            post_fx: PostFxConfig::default(),
            shadow_mapping: ShadowConfigTree::default(),
        }
    }
}

/// Developer toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enable_render_api_debugging: bool,
    pub use_shader_text_cache: bool,
    pub use_shader_binary_cache: bool,
    pub mem_file: String,
    pub use_geometry_cache: bool,
    pub use_vegetation_cache: bool,
    pub enable_tree_instances: bool,
    pub enable_grass_instances: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enable_render_api_debugging: false,
            use_shader_text_cache: false,
            use_shader_binary_cache: true,
            mem_file: "mem.log".to_string(),
            use_geometry_cache: true,
            use_vegetation_cache: true,
            enable_tree_instances: true,
            enable_grass_instances: true,
        }
    }
}

/// The full configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub title: String,
    pub language: String,
    pub default_texture_location: String,
    pub default_shaders_location: String,
    pub startup_scene: String,
    pub runtime: RuntimeConfig,
    pub rendering: RenderingConfig,
    pub debug: DebugConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            title: "Divide Engine".to_string(),
            language: "enGB".to_string(),
            default_texture_location: "textures/".to_string(),
            default_shaders_location: "shaders/".to_string(),
            startup_scene: "default".to_string(),
            runtime: RuntimeConfig::default(),
            rendering: RenderingConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Configuration {
    /// Loads a configuration from a JSON file, falling back to defaults for
    /// missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command line overrides (`--scene=<name>`, `--no-splash`).
    pub fn apply_cli_overrides<'a, I>(&mut self, args: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for arg in args {
            if let Some(scene) = arg.strip_prefix("--scene=") {
                self.startup_scene = scene.to_string();
            }
        }
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.resolution[0] == 0 || self.runtime.resolution[1] == 0 {
            return Err(DivideError::ConfigInvalid(
                "resolution must be non-zero".to_string(),
            ));
        }
        if self.runtime.ticks_per_second == 0 {
            return Err(DivideError::ConfigInvalid(
                "ticks_per_second must be non-zero".to_string(),
            ));
        }
        let csm = &self.rendering.shadow_mapping.csm;
        if !(0.0..=1.0).contains(&csm.split_lambda) {
            return Err(DivideError::ConfigInvalid(
                "csm.split_lambda must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Configuration::default().validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: Configuration =
            serde_json::from_str(r#"{"runtime": {"resolution": [1920, 1080]}}"#).unwrap();
        assert_eq!(cfg.runtime.resolution, [1920, 1080]);
        assert_eq!(cfg.runtime.ticks_per_second, 30);
        assert!(cfg.rendering.shadow_mapping.enabled.0);
    }

    #[test]
    fn cli_scene_override() {
        let mut cfg = Configuration::default();
        cfg.apply_cli_overrides(["--scene=warehouse", "--no-splash"]);
        assert_eq!(cfg.startup_scene, "warehouse");
    }
}
