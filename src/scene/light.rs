//! Light Components
//!
//! A light is a component on a scene-graph node; position and direction
//! come from the node's world transform. Shadow metadata (slice index into
//! the atlas, cascade configuration) lives here; the shadow cameras
//! themselves are built per frame by the light pool.

use glam::Vec3;

use crate::core::guid::Guid;

/// Per-light shadow parameters.
#[derive(Debug, Clone)]
pub struct ShadowSettings {
    pub bias: f32,
    pub normal_bias: f32,
    /// Directional only: number of cascades (1..=MAX_SPLITS_PER_LIGHT).
    pub cascade_count: u32,
    /// Directional only: blend between uniform (0.0) and logarithmic (1.0)
    /// split distribution.
    pub split_lambda: f32,
    /// Directional only: shadows end at this view distance.
    pub max_shadow_distance: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            bias: 0.001,
            normal_bias: 0.02,
            cascade_count: 3,
            split_lambda: 0.925,
            max_shadow_distance: 200.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectionalLight;

#[derive(Debug, Clone)]
pub struct PointLight {
    pub range: f32,
}

#[derive(Debug, Clone)]
pub struct SpotLight {
    pub range: f32,
    /// Inner cone half-angle, radians.
    pub inner_cone: f32,
    /// Outer cone half-angle, radians.
    pub outer_cone: f32,
}

/// Light type and its type-specific parameters.
#[derive(Debug, Clone)]
pub enum LightKind {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

impl LightKind {
    /// Stable type tag; matches the GPU-side `lightDetails.x` encoding.
    #[inline]
    #[must_use]
    pub fn type_index(&self) -> u32 {
        match self {
            Self::Directional(_) => 0,
            Self::Point(_) => 1,
            Self::Spot(_) => 2,
        }
    }

    /// Effective range; directional lights are unbounded.
    #[must_use]
    pub fn range(&self) -> f32 {
        match self {
            Self::Directional(_) => f32::INFINITY,
            Self::Point(p) => p.range,
            Self::Spot(s) => s.range,
        }
    }
}

/// A light component.
#[derive(Debug, Clone)]
pub struct Light {
    guid: Guid,
    pub colour: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
    pub cast_shadows: bool,
    pub shadow: ShadowSettings,
    /// Base slice index into the shadow atlas for this frame; -1 when the
    /// light is not casting this frame. Written by the light pool.
    pub shadow_index: i32,
    /// Draw an impostor billboard for this light in the debug overlay.
    pub debug_draw: bool,
}

impl Light {
    #[must_use]
    pub fn new_directional(colour: Vec3, intensity: f32) -> Self {
        Self::new(colour, intensity, LightKind::Directional(DirectionalLight))
    }

    #[must_use]
    pub fn new_point(colour: Vec3, intensity: f32, range: f32) -> Self {
        Self::new(colour, intensity, LightKind::Point(PointLight { range }))
    }

    #[must_use]
    pub fn new_spot(
        colour: Vec3,
        intensity: f32,
        range: f32,
        inner_cone: f32,
        outer_cone: f32,
    ) -> Self {
        Self::new(
            colour,
            intensity,
            LightKind::Spot(SpotLight {
                range,
                inner_cone,
                outer_cone,
            }),
        )
    }

    fn new(colour: Vec3, intensity: f32, kind: LightKind) -> Self {
        Self {
            guid: Guid::next(),
            colour,
            intensity,
            kind,
            cast_shadows: false,
            shadow: ShadowSettings::default(),
            shadow_index: -1,
            debug_draw: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Number of shadow atlas slices this light needs when casting.
    #[must_use]
    pub fn shadow_slice_count(&self) -> u32 {
        match &self.kind {
            LightKind::Directional(_) => self.shadow.cascade_count,
            LightKind::Point(_) => 6,
            LightKind::Spot(_) => 1,
        }
    }

    /// A light with zero range contributes nothing and takes no slot.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        match &self.kind {
            LightKind::Directional(_) => false,
            LightKind::Point(p) => p.range <= 0.0,
            LightKind::Spot(s) => s.range <= 0.0,
        }
    }
}
