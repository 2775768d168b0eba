//! Scene Graph
//!
//! Owns node topology: every node has exactly one parent (the root has
//! none), children are owning handles, and the parent link is a weak
//! back-reference into the generational arena. Removal is deferred: nodes
//! queue for deletion and the queue drains at `frame_started`, so the
//! render phase always reads a stable graph.

use glam::Vec3;
use log::warn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::guid::Guid;
use crate::errors::{DivideError, Result};
use crate::resources::bounds::BoundingBox;
use crate::resources::material::Material;
use crate::scene::NodeHandle;
use crate::scene::components::{
    BoundsComponent, ComponentMask, ComponentStore, RenderingComponent,
};
use crate::scene::light::{Light, LightKind};
use crate::scene::node::{CullExclusion, NodeType, SceneGraphNode, SceneNodePayload};
use crate::scene::transform::Transform;

/// Parameters for creating a node. Direct construction of nodes is
/// forbidden; everything goes through [`SceneGraph::add_child`].
pub struct NodeDescriptor {
    pub name: String,
    pub payload: SceneNodePayload,
    pub visible: bool,
    pub cull_exclusion: CullExclusion,
    /// Material for the rendering component; defaulted when the payload
    /// requires rendering and none is given.
    pub material: Option<Material>,
    /// Local bounds override; mesh payloads default to the mesh bounds.
    pub local_bounds: Option<BoundingBox>,
    /// Attach a light component.
    pub light: Option<Light>,
}

impl NodeDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: SceneNodePayload::Empty,
            visible: true,
            cull_exclusion: CullExclusion::empty(),
            material: None,
            local_bounds: None,
            light: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: SceneNodePayload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    #[must_use]
    pub fn with_local_bounds(mut self, bounds: BoundingBox) -> Self {
        self.local_bounds = Some(bounds);
        self
    }

    #[must_use]
    pub fn with_light(mut self, light: Light) -> Self {
        self.light = Some(light);
        self
    }

    #[must_use]
    pub fn with_cull_exclusion(mut self, exclusion: CullExclusion) -> Self {
        self.cull_exclusion = exclusion;
        self
    }
}

/// One ray-intersection result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub node: NodeHandle,
    pub distance: f32,
}

/// The node hierarchy plus component storages and lookup indices.
pub struct SceneGraph {
    nodes: slotmap::SlotMap<NodeHandle, SceneGraphNode>,
    root: NodeHandle,
    pub components: ComponentStore,

    type_index: FxHashMap<NodeType, Vec<NodeHandle>>,
    guid_index: FxHashMap<Guid, NodeHandle>,

    /// Nodes awaiting destruction; drained at `frame_started`.
    pending_deletions: Mutex<Vec<NodeHandle>>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = slotmap::SlotMap::with_key();
        let mut components = ComponentStore::new();
        let mut guid_index = FxHashMap::default();
        let mut type_index: FxHashMap<NodeType, Vec<NodeHandle>> = FxHashMap::default();

        let mut root_node = SceneGraphNode::new("root".to_string(), SceneNodePayload::Empty);
        root_node.components = ComponentMask::TRANSFORM;
        let root_guid = root_node.guid();
        let root = nodes.insert(root_node);
        components.transforms.insert(root, Transform::new());
        guid_index.insert(root_guid, root);
        type_index.entry(NodeType::Empty).or_default().push(root);

        Self {
            nodes,
            root,
            components,
            type_index,
            guid_index,
            pending_deletions: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: NodeHandle) -> Option<&SceneGraphNode> {
        self.nodes.get(handle)
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut SceneGraphNode> {
        self.nodes.get_mut(handle)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Creates a node under `parent`. Required components for the payload
    /// type are attached here; a mesh node always ends up with
    /// transform + bounds + rendering.
    pub fn add_child(&mut self, parent: NodeHandle, descriptor: NodeDescriptor) -> Result<NodeHandle> {
        if !self.nodes.contains_key(parent) {
            return Err(DivideError::MissingSceneData(format!(
                "parent node of '{}' no longer exists",
                descriptor.name
            )));
        }

        let mut node = SceneGraphNode::new(descriptor.name, descriptor.payload);
        node.visible = descriptor.visible;
        node.cull_exclusion = descriptor.cull_exclusion;
        node.parent = Some(parent);

        let required = node.payload.required_components();
        let node_type = node.node_type();
        let guid = node.guid();
        let payload_bounds = match &node.payload {
            SceneNodePayload::Mesh(mesh) => Some(mesh.local_bounds),
            _ => None,
        };

        let handle = self.nodes.insert(node);
        self.nodes[parent].children.push(handle);

        // Transform is universal.
        let mut mask = ComponentMask::TRANSFORM;
        self.components.transforms.insert(handle, Transform::new());

        if required.contains(ComponentMask::BOUNDS) || descriptor.local_bounds.is_some() {
            let local = descriptor
                .local_bounds
                .or(payload_bounds)
                .unwrap_or_else(|| BoundingBox::new(Vec3::splat(-0.5), Vec3::splat(0.5)));
            self.components
                .bounds
                .insert(handle, BoundsComponent::new(local));
            mask |= ComponentMask::BOUNDS;
        }

        if required.contains(ComponentMask::RENDERING) || descriptor.material.is_some() {
            let material = descriptor
                .material
                .unwrap_or_else(|| Material::new("default"));
            self.components
                .rendering
                .insert(handle, RenderingComponent::new(material));
            mask |= ComponentMask::RENDERING;
        }

        if let Some(light) = descriptor.light {
            mask |= match light.kind {
                LightKind::Directional(_) => ComponentMask::DIRECTIONAL_LIGHT,
                LightKind::Point(_) => ComponentMask::POINT_LIGHT,
                LightKind::Spot(_) => ComponentMask::SPOT_LIGHT,
            };
            self.components.lights.insert(handle, light);
        }

        self.nodes[handle].components = mask;
        self.guid_index.insert(guid, handle);
        self.type_index.entry(node_type).or_default().push(handle);
        Ok(handle)
    }

    /// Queues a node (and transitively its children) for destruction at the
    /// next `frame_started`. Queueing the root is refused.
    pub fn remove_node(&self, handle: NodeHandle) {
        if handle == self.root {
            warn!("refusing to remove the scene graph root");
            return;
        }
        self.pending_deletions.lock().push(handle);
    }

    /// Drains the pending-deletion queue. Returns the number of nodes
    /// destroyed (including children).
    pub fn frame_started(&mut self) -> usize {
        let pending = std::mem::take(&mut *self.pending_deletions.lock());
        let mut destroyed = 0;
        for handle in pending {
            destroyed += self.destroy_subtree(handle);
        }
        destroyed
    }

    fn destroy_subtree(&mut self, handle: NodeHandle) -> usize {
        if !self.nodes.contains_key(handle) {
            return 0; // already destroyed via an ancestor
        }

        // Detach from parent first: removal from parent is the sole
        // destruction path.
        if let Some(parent) = self.nodes[handle].parent
            && let Some(parent_node) = self.nodes.get_mut(parent)
        {
            parent_node.children.retain(|&child| child != handle);
        }

        let mut destroyed = 0;
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            stack.extend(node.children.iter().copied());

            let guid = node.guid();
            let node_type = node.node_type();
            self.components.remove_all(current);
            self.guid_index.remove(&guid);
            if let Some(list) = self.type_index.get_mut(&node_type) {
                list.retain(|&n| n != current);
            }
            self.nodes.remove(current);
            destroyed += 1;
        }
        destroyed
    }

    /// Finds the first node with the given name (linear scan).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(handle, _)| handle)
    }

    /// Finds a node by GUID (indexed).
    #[must_use]
    pub fn find_by_guid(&self, guid: Guid) -> Option<NodeHandle> {
        self.guid_index.get(&guid).copied()
    }

    /// All nodes of one type, in creation order.
    #[must_use]
    pub fn nodes_by_type(&self, node_type: NodeType) -> &[NodeHandle] {
        self.type_index
            .get(&node_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Recursive ray query against world bounds, front-to-back. With
    /// `first_hit_only` the walk short-circuits on the first opaque hit.
    pub fn intersect(
        &self,
        origin: Vec3,
        direction: Vec3,
        t_min: f32,
        t_max: f32,
        first_hit_only: bool,
        hits: &mut Vec<RayHit>,
    ) {
        hits.clear();
        self.intersect_recursive(self.root, origin, direction, t_min, t_max, first_hit_only, hits);
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    #[allow(clippy::too_many_arguments)]
    fn intersect_recursive(
        &self,
        handle: NodeHandle,
        origin: Vec3,
        direction: Vec3,
        t_min: f32,
        t_max: f32,
        first_hit_only: bool,
        hits: &mut Vec<RayHit>,
    ) -> bool {
        let Some(node) = self.nodes.get(handle) else {
            return false;
        };
        if !node.active {
            return false;
        }

        if let Some(bounds) = self.components.bounds.get(handle)
            && let Some(t) = bounds.world.intersect_ray(origin, direction, t_min, t_max)
        {
            hits.push(RayHit {
                node: handle,
                distance: t,
            });
            if first_hit_only {
                return true;
            }
        }

        for &child in &node.children {
            if self.intersect_recursive(child, origin, direction, t_min, t_max, first_hit_only, hits)
                && first_hit_only
            {
                return true;
            }
        }
        false
    }

    /// Iterates all live node handles.
    pub fn iter_handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys()
    }

    /// Runs the transform system over the whole graph.
    pub fn update_transforms(&mut self) -> usize {
        crate::scene::transform_system::update_hierarchy(
            &self.nodes,
            &mut self.components.transforms,
            &mut self.components.bounds,
            self.root,
        )
    }

    /// Refreshes world bounds invalidated by the transform system.
    pub fn refresh_bounds(&mut self) -> usize {
        crate::scene::transform_system::refresh_bounds(
            &self.components.transforms,
            &mut self.components.bounds,
        )
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_the_only_parentless_node() {
        let mut graph = SceneGraph::new();
        let child = graph
            .add_child(graph.root(), NodeDescriptor::new("child"))
            .unwrap();
        assert!(graph.get(graph.root()).unwrap().parent().is_none());
        assert_eq!(graph.get(child).unwrap().parent(), Some(graph.root()));
        for handle in graph.iter_handles() {
            let node = graph.get(handle).unwrap();
            assert_eq!(node.parent().is_none(), handle == graph.root());
        }
    }

    #[test]
    fn removal_is_deferred_until_frame_started() {
        let mut graph = SceneGraph::new();
        let parent = graph
            .add_child(graph.root(), NodeDescriptor::new("parent"))
            .unwrap();
        let _child = graph
            .add_child(parent, NodeDescriptor::new("child"))
            .unwrap();
        assert_eq!(graph.node_count(), 3);

        graph.remove_node(parent);
        // Still present until the frame boundary.
        assert_eq!(graph.node_count(), 3);

        let destroyed = graph.frame_started();
        assert_eq!(destroyed, 2);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.find_by_name("parent").is_none());
        assert!(graph.get(graph.root()).unwrap().children().is_empty());
    }

    #[test]
    fn add_remove_restores_type_index() {
        let mut graph = SceneGraph::new();
        let empties_before = graph.nodes_by_type(NodeType::Empty).len();

        let node = graph
            .add_child(graph.root(), NodeDescriptor::new("temp"))
            .unwrap();
        assert_eq!(graph.nodes_by_type(NodeType::Empty).len(), empties_before + 1);

        graph.remove_node(node);
        graph.frame_started();
        assert_eq!(graph.nodes_by_type(NodeType::Empty).len(), empties_before);
    }

    #[test]
    fn guid_lookup_matches_handles() {
        let mut graph = SceneGraph::new();
        let node = graph
            .add_child(graph.root(), NodeDescriptor::new("findme"))
            .unwrap();
        let guid = graph.get(node).unwrap().guid();
        assert_eq!(graph.find_by_guid(guid), Some(node));
        assert_eq!(graph.find_by_name("findme"), Some(node));
    }

    #[test]
    fn root_removal_is_refused() {
        let mut graph = SceneGraph::new();
        graph.remove_node(graph.root());
        assert_eq!(graph.frame_started(), 0);
        assert_eq!(graph.node_count(), 1);
    }
}
