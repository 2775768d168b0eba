//! Scene graph integration tests: topology invariants, deferred deletion,
//! per-type indices, and ray queries.

use divide::resources::bounds::BoundingBox;
use divide::scene::graph::{NodeDescriptor, SceneGraph};
use divide::scene::node::NodeType;
use glam::Vec3;

#[test]
fn only_the_root_is_parentless() {
    let mut graph = SceneGraph::new();
    let a = graph
        .add_child(graph.root(), NodeDescriptor::new("a"))
        .unwrap();
    let b = graph.add_child(a, NodeDescriptor::new("b")).unwrap();
    let _c = graph.add_child(b, NodeDescriptor::new("c")).unwrap();

    for handle in graph.iter_handles().collect::<Vec<_>>() {
        let node = graph.get(handle).unwrap();
        assert_eq!(node.parent().is_none(), handle == graph.root());
    }
}

#[test]
fn add_remove_frame_restores_counts_and_indices() {
    let mut graph = SceneGraph::new();
    let count_before = graph.node_count();
    let empties_before = graph.nodes_by_type(NodeType::Empty).len();

    let parent = graph
        .add_child(graph.root(), NodeDescriptor::new("parent"))
        .unwrap();
    for i in 0..5 {
        graph
            .add_child(parent, NodeDescriptor::new(format!("child{i}")))
            .unwrap();
    }
    assert_eq!(graph.node_count(), count_before + 6);

    graph.remove_node(parent);
    let destroyed = graph.frame_started();
    assert_eq!(destroyed, 6);
    assert_eq!(graph.node_count(), count_before);
    assert_eq!(graph.nodes_by_type(NodeType::Empty).len(), empties_before);
}

#[test]
fn double_queueing_a_node_destroys_it_once() {
    let mut graph = SceneGraph::new();
    let node = graph
        .add_child(graph.root(), NodeDescriptor::new("twice"))
        .unwrap();
    graph.remove_node(node);
    graph.remove_node(node);
    assert_eq!(graph.frame_started(), 1);
}

#[test]
fn ray_intersection_reports_front_to_back() {
    let mut graph = SceneGraph::new();
    for (name, z) in [("near", -5.0f32), ("far", -20.0), ("mid", -10.0)] {
        let node = graph
            .add_child(
                graph.root(),
                NodeDescriptor::new(name).with_local_bounds(BoundingBox::new(
                    Vec3::splat(-1.0),
                    Vec3::splat(1.0),
                )),
            )
            .unwrap();
        graph
            .components
            .transforms
            .get_mut(node)
            .unwrap()
            .set_position(Vec3::new(0.0, 0.0, z));
    }
    graph.update_transforms();
    graph.refresh_bounds();

    let mut hits = Vec::new();
    graph.intersect(Vec3::ZERO, Vec3::NEG_Z, 0.0, 100.0, false, &mut hits);
    assert_eq!(hits.len(), 3);
    let names: Vec<&str> = hits
        .iter()
        .map(|hit| graph.get(hit.node).unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["near", "mid", "far"]);

    // First-hit mode stops at the nearest box it encounters.
    let mut first = Vec::new();
    graph.intersect(Vec3::ZERO, Vec3::NEG_Z, 0.0, 100.0, true, &mut first);
    assert_eq!(first.len(), 1);
}

#[test]
fn guid_equality_is_identity() {
    let mut graph = SceneGraph::new();
    let a = graph
        .add_child(graph.root(), NodeDescriptor::new("same-name"))
        .unwrap();
    let b = graph
        .add_child(graph.root(), NodeDescriptor::new("same-name"))
        .unwrap();
    let guid_a = graph.get(a).unwrap().guid();
    let guid_b = graph.get(b).unwrap().guid();
    assert_ne!(guid_a, guid_b);
    assert_eq!(graph.find_by_guid(guid_a), Some(a));
    assert_eq!(graph.find_by_guid(guid_b), Some(b));
}
