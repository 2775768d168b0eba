//! Camera and culling integration tests.

use std::sync::Arc;

use divide::core::task_pool::TaskPool;
use divide::resources::bounds::BoundingBox;
use divide::scene::camera::Camera;
use divide::scene::culler::{self, CullParams};
use divide::scene::graph::{NodeDescriptor, SceneGraph};
use glam::Vec3;

fn populated_graph() -> SceneGraph {
    let mut graph = SceneGraph::new();
    for i in 0..32 {
        let angle = i as f32 * 0.2;
        let node = graph
            .add_child(
                graph.root(),
                NodeDescriptor::new(format!("node{i}")).with_local_bounds(BoundingBox::new(
                    Vec3::splat(-0.5),
                    Vec3::splat(0.5),
                )),
            )
            .unwrap();
        graph
            .components
            .transforms
            .get_mut(node)
            .unwrap()
            .set_position(Vec3::new(angle.cos() * 10.0, 0.0, -8.0 - i as f32));
    }
    graph.update_transforms();
    graph.refresh_bounds();
    graph
}

fn camera_at(eye: Vec3) -> Camera {
    let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 500.0);
    camera.set_eye(eye);
    camera.update();
    camera
}

#[test]
fn identical_cameras_cull_identical_sets() {
    let graph = populated_graph();
    let items = culler::extract(&graph);

    let a = camera_at(Vec3::ZERO);
    let b = camera_at(Vec3::ZERO);
    let params_a = CullParams::display(a.eye(), *a.frustum(), 500.0);
    let params_b = CullParams::display(b.eye(), *b.frustum(), 500.0);

    let visible_a = culler::cull_items(&items, &params_a);
    let visible_b = culler::cull_items(&items, &params_b);

    let set_a: Vec<_> = visible_a.iter().map(|v| v.node).collect();
    let set_b: Vec<_> = visible_b.iter().map(|v| v.node).collect();
    assert_eq!(set_a, set_b);
}

#[test]
fn moving_the_camera_changes_the_visible_set() {
    let graph = populated_graph();
    let items = culler::extract(&graph);

    let front = camera_at(Vec3::ZERO);
    let behind = camera_at(Vec3::new(0.0, 0.0, -200.0));

    let visible_front = culler::cull_items(
        &items,
        &CullParams::display(front.eye(), *front.frustum(), 500.0),
    );
    let visible_behind = culler::cull_items(
        &items,
        &CullParams::display(behind.eye(), *behind.frustum(), 500.0),
    );

    assert!(!visible_front.is_empty());
    // Everything sits in front of the origin camera; the far camera looks
    // away from most of it.
    assert_ne!(visible_front.len(), visible_behind.len());
}

#[test]
fn parallel_and_serial_culling_agree_on_a_real_scene() {
    let graph = populated_graph();
    let items = Arc::new(culler::extract(&graph));
    let pool = TaskPool::new(4, 1);
    let camera = camera_at(Vec3::ZERO);
    let params = CullParams::display(camera.eye(), *camera.frustum(), 500.0);

    let serial = culler::cull_items(&items, &params);
    let parallel = culler::cull_items_parallel(&pool, &items, &params, 4);

    assert_eq!(
        serial.iter().map(|v| v.node).collect::<Vec<_>>(),
        parallel.iter().map(|v| v.node).collect::<Vec<_>>()
    );
}
