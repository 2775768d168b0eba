//! Scene Layer
//!
//! The hierarchical scene graph, its closed component set, the
//! dependency-ordered system scheduler, cameras, lights, and the visibility
//! culler.

pub mod camera;
pub mod components;
pub mod culler;
pub mod ecs;
pub mod graph;
pub mod light;
pub mod node;
pub mod transform;
pub mod transform_system;

slotmap::new_key_type! {
    /// Generational handle into the scene-graph node arena.
    pub struct NodeHandle;
}

pub use camera::{Camera, Frustum, Projection};
pub use components::{ComponentKind, ComponentMask};
pub use graph::{NodeDescriptor, SceneGraph};
pub use light::{Light, LightKind};
pub use node::{CullExclusion, NodeType, SceneGraphNode, SceneNodePayload};
pub use transform::{Transform, TransformDirty};
