//! The Closed Component Set
//!
//! Each scene-graph node holds at most one component of each kind. Dense
//! components (transform, bounds, rendering) live in `SecondaryMap`s;
//! sparse ones in `SparseSecondaryMap`s, following the storage split the
//! node arena dictates. Missing required components are a logged skip, not
//! a crash.

use bitflags::bitflags;
use glam::Vec3;
use slotmap::{SecondaryMap, SparseSecondaryMap};

use crate::resources::bounds::{BoundingBox, BoundingSphere};
use crate::resources::material::Material;
use crate::scene::NodeHandle;
use crate::scene::light::Light;
use crate::scene::transform::Transform;

bitflags! {
    /// One bit per component kind; mirrors [`ComponentKind`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ComponentMask: u32 {
        const TRANSFORM         = 1 << 0;
        const BOUNDS            = 1 << 1;
        const RENDERING         = 1 << 2;
        const ANIMATION         = 1 << 3;
        const RIGID_BODY        = 1 << 4;
        const NAVIGATION        = 1 << 5;
        const UNIT              = 1 << 6;
        const POINT_LIGHT       = 1 << 7;
        const SPOT_LIGHT        = 1 << 8;
        const DIRECTIONAL_LIGHT = 1 << 9;
        const ENVIRONMENT_PROBE = 1 << 10;
        const SCRIPT            = 1 << 11;
        const SELECTION         = 1 << 12;
        const IK                = 1 << 13;
        const RAGDOLL           = 1 << 14;
        const NETWORKING        = 1 << 15;
    }
}

/// Component kind tags, in registration order. Teardown runs in reverse of
/// this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentKind {
    Transform = 0,
    Bounds,
    Rendering,
    Animation,
    RigidBody,
    Navigation,
    Unit,
    PointLight,
    SpotLight,
    DirectionalLight,
    EnvironmentProbe,
    Script,
    Selection,
    Ik,
    Ragdoll,
    Networking,
}

impl ComponentKind {
    pub const COUNT: usize = 16;

    #[must_use]
    pub fn mask(self) -> ComponentMask {
        ComponentMask::from_bits_truncate(1 << (self as u32))
    }
}

/// World-space bounds cache, invalidated by transform events.
#[derive(Debug, Clone, Default)]
pub struct BoundsComponent {
    pub local: BoundingBox,
    pub world: BoundingBox,
    pub world_sphere: BoundingSphere,
    pub dirty: bool,
}

impl BoundsComponent {
    #[must_use]
    pub fn new(local: BoundingBox) -> Self {
        Self {
            local,
            world: local,
            world_sphere: BoundingSphere::from_box(&local),
            dirty: true,
        }
    }

    /// Recomputes world bounds from the local box and a world matrix.
    pub fn refresh(&mut self, world_matrix: &glam::Affine3A) {
        self.world = self.local.transformed(world_matrix);
        self.world_sphere = BoundingSphere::from_box(&self.world);
        self.dirty = false;
    }
}

/// Drawable state: the node's material instance and debug toggles.
#[derive(Clone)]
pub struct RenderingComponent {
    pub material: Material,
    /// Pin LoD selection to a fixed level.
    pub lod_lock: Option<u8>,
    pub draw_bounds: bool,
    pub draw_skeleton: bool,
}

impl RenderingComponent {
    #[must_use]
    pub fn new(material: Material) -> Self {
        Self {
            material,
            lod_lock: None,
            draw_bounds: false,
            draw_skeleton: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimationComponent {
    pub clip: Option<String>,
    pub time: f32,
    pub playing: bool,
    pub blend_weight: f32,
}

#[derive(Debug, Clone)]
pub struct RigidBodyComponent {
    pub mass: f32,
    pub kinematic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NavigationComponent {
    pub agent_radius: f32,
    pub target: Option<Vec3>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitComponent {
    pub unit_kind: u32,
}

#[derive(Debug, Clone)]
pub struct EnvironmentProbeComponent {
    pub extents: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptComponent {
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionComponent {
    pub selected: bool,
    pub hovered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IkComponent {
    pub chain_length: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RagdollComponent {
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkingComponent {
    pub replicated: bool,
}

/// All component storages, keyed by node handle.
#[derive(Default)]
pub struct ComponentStore {
    // Dense: most nodes carry these.
    pub transforms: SecondaryMap<NodeHandle, Transform>,
    pub bounds: SecondaryMap<NodeHandle, BoundsComponent>,
    pub rendering: SecondaryMap<NodeHandle, RenderingComponent>,

    // Sparse: few nodes carry these.
    pub animation: SparseSecondaryMap<NodeHandle, AnimationComponent>,
    pub rigid_bodies: SparseSecondaryMap<NodeHandle, RigidBodyComponent>,
    pub navigation: SparseSecondaryMap<NodeHandle, NavigationComponent>,
    pub units: SparseSecondaryMap<NodeHandle, UnitComponent>,
    pub lights: SparseSecondaryMap<NodeHandle, Light>,
    pub probes: SparseSecondaryMap<NodeHandle, EnvironmentProbeComponent>,
    pub scripts: SparseSecondaryMap<NodeHandle, ScriptComponent>,
    pub selection: SparseSecondaryMap<NodeHandle, SelectionComponent>,
    pub ik: SparseSecondaryMap<NodeHandle, IkComponent>,
    pub ragdolls: SparseSecondaryMap<NodeHandle, RagdollComponent>,
    pub networking: SparseSecondaryMap<NodeHandle, NetworkingComponent>,
}

impl ComponentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every component of `node`, in reverse registration order.
    pub fn remove_all(&mut self, node: NodeHandle) {
        self.networking.remove(node);
        self.ragdolls.remove(node);
        self.ik.remove(node);
        self.selection.remove(node);
        self.scripts.remove(node);
        self.probes.remove(node);
        self.lights.remove(node);
        self.units.remove(node);
        self.navigation.remove(node);
        self.rigid_bodies.remove(node);
        self.animation.remove(node);
        self.rendering.remove(node);
        self.bounds.remove(node);
        self.transforms.remove(node);
    }
}
