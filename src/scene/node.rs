//! Scene Graph Nodes
//!
//! A [`SceneGraphNode`] exclusively owns its place in the hierarchy: parent
//! back-reference, child handles, flags, and its component mask. The
//! shareable content — mesh, sky, particle emitter, terrain — lives in the
//! [`SceneNodePayload`] variant, refcounted so many graph nodes may
//! reference one asset.

use std::sync::Arc;

use bitflags::bitflags;

use crate::core::guid::Guid;
use crate::resources::mesh::Mesh;
use crate::scene::NodeHandle;
use crate::scene::components::ComponentMask;

/// Asset-level node content.
#[derive(Clone, Default)]
pub enum SceneNodePayload {
    /// Pure grouping/transform node.
    #[default]
    Empty,
    Mesh(Arc<Mesh>),
    Sky,
    ParticleEmitter {
        max_particles: u32,
    },
    Terrain {
        patch_resolution: u32,
    },
}

impl SceneNodePayload {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Empty => NodeType::Empty,
            Self::Mesh(_) => NodeType::Mesh,
            Self::Sky => NodeType::Sky,
            Self::ParticleEmitter { .. } => NodeType::ParticleEmitter,
            Self::Terrain { .. } => NodeType::Terrain,
        }
    }

    /// Components a node of this type must carry.
    #[must_use]
    pub fn required_components(&self) -> ComponentMask {
        match self {
            Self::Empty => ComponentMask::TRANSFORM,
            Self::Sky => ComponentMask::TRANSFORM | ComponentMask::RENDERING,
            Self::Mesh(_) | Self::ParticleEmitter { .. } | Self::Terrain { .. } => {
                ComponentMask::TRANSFORM | ComponentMask::BOUNDS | ComponentMask::RENDERING
            }
        }
    }
}

/// Node type tag used by the per-type index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Empty,
    Mesh,
    Sky,
    ParticleEmitter,
    Terrain,
}

impl NodeType {
    /// Types that can produce draw commands.
    #[must_use]
    pub fn is_renderable(self) -> bool {
        !matches!(self, Self::Empty)
    }
}

bitflags! {
    /// Per-node stage exclusion flags checked by the culler.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CullExclusion: u8 {
        const SHADOW     = 1 << 0;
        const REFLECTION = 1 << 1;
        const REFRACTION = 1 << 2;
    }
}

/// A node in the scene hierarchy.
pub struct SceneGraphNode {
    guid: Guid,
    pub name: String,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,
    pub payload: SceneNodePayload,
    pub visible: bool,
    pub active: bool,
    pub cull_exclusion: CullExclusion,
    pub(crate) components: ComponentMask,
}

impl SceneGraphNode {
    #[must_use]
    pub(crate) fn new(name: String, payload: SceneNodePayload) -> Self {
        Self {
            guid: Guid::next(),
            name,
            parent: None,
            children: Vec::new(),
            payload,
            visible: true,
            active: true,
            cull_exclusion: CullExclusion::empty(),
            components: ComponentMask::empty(),
        }
    }

    #[inline]
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.payload.node_type()
    }

    #[inline]
    #[must_use]
    pub fn component_mask(&self) -> ComponentMask {
        self.components
    }

    #[inline]
    #[must_use]
    pub fn has_component(&self, mask: ComponentMask) -> bool {
        self.components.contains(mask)
    }
}
