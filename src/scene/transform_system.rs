//! Transform System
//!
//! Propagates local transform changes down the hierarchy and invalidates
//! world bounds along the way, decoupled from [`SceneGraph`] so it only
//! borrows the node arena and the two component maps it touches. Uses an
//! explicit stack instead of recursion so deeply nested scenes cannot
//! overflow.
//!
//! A node's world matrix is recomputed when its own local fields changed
//! (`TransformUpdated`) or when any ancestor's did
//! (`ParentTransformUpdated`); the bounds component listens by having its
//! `dirty` flag raised here and refreshing lazily in the bounds system.

use glam::Affine3A;
use slotmap::{SecondaryMap, SlotMap};

use crate::scene::NodeHandle;
use crate::scene::components::BoundsComponent;
use crate::scene::node::SceneGraphNode;
use crate::scene::transform::{Transform, TransformDirty};

/// Propagates transforms from `root` down. Returns the number of nodes
/// whose world matrix was rewritten.
pub fn update_hierarchy(
    nodes: &SlotMap<NodeHandle, SceneGraphNode>,
    transforms: &mut SecondaryMap<NodeHandle, Transform>,
    bounds: &mut SecondaryMap<NodeHandle, BoundsComponent>,
    root: NodeHandle,
) -> usize {
    let mut updated = 0;
    let mut stack: Vec<(NodeHandle, Affine3A, bool)> = Vec::with_capacity(64);
    stack.push((root, Affine3A::IDENTITY, false));

    while let Some((handle, parent_world, parent_changed)) = stack.pop() {
        let Some(transform) = transforms.get_mut(handle) else {
            continue;
        };

        let local_mask = transform.update_local_matrix();
        let world_changed = parent_changed || local_mask != TransformDirty::empty();

        if world_changed {
            let new_world = parent_world * *transform.local_matrix();
            transform.set_world_matrix(new_world);
            updated += 1;
            if let Some(bc) = bounds.get_mut(handle) {
                bc.dirty = true;
            }
        }
        let current_world = *transform.world_matrix();

        if let Some(node) = nodes.get(handle) {
            for &child in node.children().iter().rev() {
                stack.push((child, current_world, world_changed));
            }
        }
    }
    updated
}

/// Refreshes every dirty bounds component from its world matrix. Returns
/// the number refreshed.
pub fn refresh_bounds(
    transforms: &SecondaryMap<NodeHandle, Transform>,
    bounds: &mut SecondaryMap<NodeHandle, BoundsComponent>,
) -> usize {
    let mut refreshed = 0;
    for (handle, bc) in bounds.iter_mut() {
        if !bc.dirty {
            continue;
        }
        if let Some(transform) = transforms.get(handle) {
            bc.refresh(transform.world_matrix());
            refreshed += 1;
        }
    }
    refreshed
}

#[cfg(test)]
mod tests {
    use crate::scene::graph::{NodeDescriptor, SceneGraph};
    use glam::Vec3;

    #[test]
    fn child_inherits_parent_translation() {
        let mut graph = SceneGraph::new();
        let parent = graph
            .add_child(graph.root(), NodeDescriptor::new("parent"))
            .unwrap();
        let child = graph
            .add_child(parent, NodeDescriptor::new("child"))
            .unwrap();

        graph
            .components
            .transforms
            .get_mut(parent)
            .unwrap()
            .set_position(Vec3::new(1.0, 0.0, 0.0));
        graph
            .components
            .transforms
            .get_mut(child)
            .unwrap()
            .set_position(Vec3::new(0.0, 1.0, 0.0));

        graph.update_transforms();

        let world = graph
            .components
            .transforms
            .get(child)
            .unwrap()
            .world_matrix()
            .translation;
        assert!((world.x - 1.0).abs() < 1e-5);
        assert!((world.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unchanged_nodes_are_not_rewritten() {
        let mut graph = SceneGraph::new();
        let node = graph
            .add_child(graph.root(), NodeDescriptor::new("static"))
            .unwrap();
        // First pass settles the freshly created transforms.
        graph.update_transforms();
        assert_eq!(graph.update_transforms(), 0);

        graph
            .components
            .transforms
            .get_mut(node)
            .unwrap()
            .set_position(Vec3::ONE);
        assert_eq!(graph.update_transforms(), 1);
    }

    #[test]
    fn bounds_dirty_follows_transform_change() {
        let mut graph = SceneGraph::new();
        let node = graph
            .add_child(
                graph.root(),
                NodeDescriptor::new("boxed").with_local_bounds(
                    crate::resources::bounds::BoundingBox::new(
                        Vec3::splat(-1.0),
                        Vec3::splat(1.0),
                    ),
                ),
            )
            .unwrap();
        graph.update_transforms();
        graph.refresh_bounds();
        assert!(!graph.components.bounds.get(node).unwrap().dirty);

        graph
            .components
            .transforms
            .get_mut(node)
            .unwrap()
            .set_position(Vec3::new(5.0, 0.0, 0.0));
        graph.update_transforms();
        assert!(graph.components.bounds.get(node).unwrap().dirty);

        graph.refresh_bounds();
        let bounds = graph.components.bounds.get(node).unwrap();
        assert!((bounds.world.center().x - 5.0).abs() < 1e-5);
    }
}
