//! Transform propagation through deep hierarchies.

use divide::scene::graph::{NodeDescriptor, SceneGraph};
use glam::{Quat, Vec3};

#[test]
fn deep_chains_accumulate_translation() {
    let mut graph = SceneGraph::new();
    let mut parent = graph.root();
    for i in 0..64 {
        parent = graph
            .add_child(parent, NodeDescriptor::new(format!("link{i}")))
            .unwrap();
        graph
            .components
            .transforms
            .get_mut(parent)
            .unwrap()
            .set_position(Vec3::X);
    }
    graph.update_transforms();

    let tip = graph
        .components
        .transforms
        .get(parent)
        .unwrap()
        .world_matrix()
        .translation;
    assert!((tip.x - 64.0).abs() < 1e-3);
}

#[test]
fn rotated_parent_orbits_its_children() {
    let mut graph = SceneGraph::new();
    let pivot = graph
        .add_child(graph.root(), NodeDescriptor::new("pivot"))
        .unwrap();
    let satellite = graph
        .add_child(pivot, NodeDescriptor::new("satellite"))
        .unwrap();
    graph
        .components
        .transforms
        .get_mut(satellite)
        .unwrap()
        .set_position(Vec3::new(5.0, 0.0, 0.0));
    graph.update_transforms();

    graph
        .components
        .transforms
        .get_mut(pivot)
        .unwrap()
        .set_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
    graph.update_transforms();

    let world = graph
        .components
        .transforms
        .get(satellite)
        .unwrap()
        .world_matrix()
        .translation;
    // +X rotates to -Z under a +90 degree yaw.
    assert!(world.x.abs() < 1e-4);
    assert!((world.z + 5.0).abs() < 1e-4);
}

#[test]
fn scale_propagates_non_uniformly() {
    let mut graph = SceneGraph::new();
    let parent = graph
        .add_child(graph.root(), NodeDescriptor::new("stretcher"))
        .unwrap();
    let child = graph.add_child(parent, NodeDescriptor::new("leaf")).unwrap();

    graph
        .components
        .transforms
        .get_mut(parent)
        .unwrap()
        .set_scale(Vec3::new(2.0, 1.0, 3.0));
    graph
        .components
        .transforms
        .get_mut(child)
        .unwrap()
        .set_position(Vec3::ONE);
    graph.update_transforms();

    let world = graph
        .components
        .transforms
        .get(child)
        .unwrap()
        .world_matrix()
        .translation;
    assert!((Vec3::from(world) - Vec3::new(2.0, 1.0, 3.0)).length() < 1e-5);
}
