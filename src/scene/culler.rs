//! Visibility Culler
//!
//! Per render stage, produces the visible-node list the pass manager turns
//! into draw commands. Culling runs against a flat extraction of the
//! renderable nodes (handle + world bounds + flags) so the expensive part
//! can be parallelised across task-pool partitions without touching the
//! graph; each task writes its own output slice and a merge pass restores
//! a stable front-to-back order.
//!
//! Rejection chain per node: distance → frustum → per-node stage exclusion
//! flags → LoD cap / minimum apparent extents. Reflection and refraction
//! stages additionally keep only materials carrying the matching flag.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::task_pool::{TaskPool, TaskPriority};
use crate::renderer::RenderStage;
use crate::resources::bounds::{BoundingBox, BoundingSphere};
use crate::scene::NodeHandle;
use crate::scene::camera::Frustum;
use crate::scene::graph::SceneGraph;
use crate::scene::node::{CullExclusion, NodeType};

/// Flat, thread-safe snapshot of one renderable node.
#[derive(Debug, Clone)]
pub struct CullItem {
    pub node: NodeHandle,
    pub world_aabb: BoundingBox,
    pub world_sphere: BoundingSphere,
    pub cull_exclusion: CullExclusion,
    pub reflective: bool,
    pub refractive: bool,
    pub translucent: bool,
    pub lod_count: u8,
    pub lod_lock: Option<u8>,
    /// Longest world-space edge, for apparent-size rejection.
    pub max_extent: f32,
    /// Sky and other always-on geometry bypasses every test.
    pub always_visible: bool,
}

/// Per-stage culling input.
#[derive(Debug, Clone)]
pub struct CullParams {
    pub stage: RenderStage,
    pub eye: glam::Vec3,
    pub frustum: Frustum,
    /// LoD switch distances, ascending (not squared).
    pub lod_thresholds: [f32; 4],
    /// Reject nodes whose computed LoD exceeds this cap.
    pub lod_cap: u8,
    /// Reject nodes whose apparent extent falls below this.
    pub min_extents: f32,
    pub cull_max_distance_sq: f32,
    pub visibility_distance_sq: f32,
}

impl CullParams {
    /// Defaults for a display pass with the given camera data.
    #[must_use]
    pub fn display(eye: glam::Vec3, frustum: Frustum, view_distance: f32) -> Self {
        Self {
            stage: RenderStage::Display,
            eye,
            frustum,
            lod_thresholds: [25.0, 45.0, 85.0, 165.0],
            lod_cap: u8::MAX,
            min_extents: 0.0,
            cull_max_distance_sq: view_distance * view_distance,
            visibility_distance_sq: view_distance * view_distance,
        }
    }
}

/// One survivor of the cull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleNode {
    pub node: NodeHandle,
    pub distance_sq: f32,
    pub lod: u8,
    pub translucent: bool,
}

/// Snapshots every renderable node into a flat list. Runs on the main
/// thread after the logic phase, while the graph is stable.
#[must_use]
pub fn extract(graph: &SceneGraph) -> Vec<CullItem> {
    let mut items = Vec::new();
    for node_type in [
        NodeType::Mesh,
        NodeType::Sky,
        NodeType::ParticleEmitter,
        NodeType::Terrain,
    ] {
        for &handle in graph.nodes_by_type(node_type) {
            let Some(node) = graph.get(handle) else {
                continue;
            };
            if !node.visible || !node.active {
                continue;
            }
            let Some(rendering) = graph.components.rendering.get(handle) else {
                continue; // logged by the rendering system
            };

            let always_visible = node_type == NodeType::Sky;
            let (world_aabb, world_sphere) = graph.components.bounds.get(handle).map_or_else(
                || (BoundingBox::INVALID, BoundingSphere::default()),
                |b| (b.world, b.world_sphere),
            );
            let lod_count = match &node.payload {
                crate::scene::node::SceneNodePayload::Mesh(mesh) => mesh.lods.len().max(1) as u8,
                _ => 1,
            };

            items.push(CullItem {
                node: handle,
                world_aabb,
                world_sphere,
                cull_exclusion: node.cull_exclusion,
                reflective: rendering.material.reflective,
                refractive: rendering.material.refractive,
                translucent: rendering.material.is_translucent(),
                lod_count,
                lod_lock: rendering.lod_lock,
                max_extent: world_aabb.is_valid().then(|| world_aabb.max_extent()).unwrap_or(0.0),
                always_visible,
            });
        }
    }
    items
}

fn lod_for(item: &CullItem, distance_sq: f32, thresholds: &[f32; 4]) -> u8 {
    if let Some(locked) = item.lod_lock {
        return locked.min(item.lod_count.saturating_sub(1));
    }
    let mut lod = 0u8;
    for &threshold in thresholds {
        if distance_sq > threshold * threshold {
            lod += 1;
        }
    }
    lod.min(item.lod_count.saturating_sub(1))
}

fn test_item(item: &CullItem, params: &CullParams) -> Option<VisibleNode> {
    let excluded = match params.stage {
        RenderStage::Shadow => item.cull_exclusion.contains(CullExclusion::SHADOW),
        RenderStage::Reflection => {
            item.cull_exclusion.contains(CullExclusion::REFLECTION) || !item.reflective
        }
        RenderStage::Refraction => {
            item.cull_exclusion.contains(CullExclusion::REFRACTION) || !item.refractive
        }
        RenderStage::Display => false,
    };
    if excluded {
        return None;
    }

    if item.always_visible {
        return Some(VisibleNode {
            node: item.node,
            distance_sq: f32::MAX,
            lod: 0,
            translucent: item.translucent,
        });
    }

    let distance_sq = item.world_sphere.distance_sq(params.eye);
    if distance_sq > params.visibility_distance_sq || distance_sq > params.cull_max_distance_sq {
        return None;
    }

    if !item.world_aabb.is_valid() || !params.frustum.intersects_aabb(&item.world_aabb) {
        return None;
    }

    let lod = lod_for(item, distance_sq, &params.lod_thresholds);
    if lod > params.lod_cap {
        return None;
    }
    if params.min_extents > 0.0 {
        let apparent = item.max_extent / distance_sq.max(1.0).sqrt();
        if apparent < params.min_extents {
            return None;
        }
    }

    Some(VisibleNode {
        node: item.node,
        distance_sq,
        lod,
        translucent: item.translucent,
    })
}

/// Single-threaded cull over an extracted item list, sorted front-to-back.
#[must_use]
pub fn cull_items(items: &[CullItem], params: &CullParams) -> Vec<VisibleNode> {
    let mut visible: Vec<VisibleNode> = items
        .iter()
        .filter_map(|item| test_item(item, params))
        .collect();
    visible.sort_by(|a, b| a.distance_sq.total_cmp(&b.distance_sq));
    visible
}

/// Parallel cull across `partitions` task-pool slices. Each task writes a
/// disjoint output; the merge keeps partition order, then sorts
/// front-to-back (stable, so equal distances keep extraction order).
#[must_use]
pub fn cull_items_parallel(
    pool: &TaskPool,
    items: &Arc<Vec<CullItem>>,
    params: &CullParams,
    partitions: usize,
) -> Vec<VisibleNode> {
    let partitions = partitions.max(1);
    if partitions == 1 || items.len() < partitions * 8 {
        return cull_items(items, params);
    }

    let results: Arc<Mutex<Vec<Option<Vec<VisibleNode>>>>> =
        Arc::new(Mutex::new(vec![None; partitions]));
    let chunk = items.len().div_ceil(partitions);

    // The parent job is dispatched only after every child is attached, so
    // its completion cannot race the fan-out.
    let (parent, parent_job) = pool.create_task(None, |_| {});
    for p in 0..partitions {
        let items = Arc::clone(items);
        let results = Arc::clone(&results);
        let params = params.clone();
        pool.start(Some(&parent), TaskPriority::High, move |task| {
            if task.is_cancelled() {
                return;
            }
            let start = p * chunk;
            let end = (start + chunk).min(items.len());
            let local: Vec<VisibleNode> = items[start..end]
                .iter()
                .filter_map(|item| test_item(item, &params))
                .collect();
            results.lock()[p] = Some(local);
        });
    }
    pool.dispatch(&parent, TaskPriority::High, parent_job);
    pool.wait(&parent);

    let mut merged = Vec::new();
    for slot in results.lock().iter_mut() {
        if let Some(part) = slot.take() {
            merged.extend(part);
        }
    }
    merged.sort_by(|a, b| a.distance_sq.total_cmp(&b.distance_sq));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::Camera;
    use glam::Vec3;

    fn item_at(z: f32, extent: f32) -> CullItem {
        let aabb = BoundingBox::new(
            Vec3::new(-extent, -extent, z - extent),
            Vec3::new(extent, extent, z + extent),
        );
        CullItem {
            node: NodeHandle::default(),
            world_aabb: aabb,
            world_sphere: BoundingSphere::from_box(&aabb),
            cull_exclusion: CullExclusion::empty(),
            reflective: false,
            refractive: false,
            translucent: false,
            lod_count: 4,
            lod_lock: None,
            max_extent: aabb.max_extent(),
            always_visible: false,
        }
    }

    fn display_params() -> CullParams {
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 1000.0);
        camera.set_eye(Vec3::ZERO);
        camera.update();
        CullParams::display(camera.eye(), *camera.frustum(), 500.0)
    }

    #[test]
    fn frustum_and_distance_reject() {
        let params = display_params();
        let visible = item_at(-10.0, 1.0);
        let behind = item_at(10.0, 1.0);
        let far = item_at(-900.0, 1.0);
        assert!(test_item(&visible, &params).is_some());
        assert!(test_item(&behind, &params).is_none());
        assert!(test_item(&far, &params).is_none());
    }

    #[test]
    fn shadow_stage_honours_exclusion_flag() {
        let mut params = display_params();
        params.stage = RenderStage::Shadow;
        let mut item = item_at(-10.0, 1.0);
        assert!(test_item(&item, &params).is_some());
        item.cull_exclusion = CullExclusion::SHADOW;
        assert!(test_item(&item, &params).is_none());
    }

    #[test]
    fn reflection_stage_requires_the_material_flag() {
        let mut params = display_params();
        params.stage = RenderStage::Reflection;
        let mut item = item_at(-10.0, 1.0);
        assert!(test_item(&item, &params).is_none());
        item.reflective = true;
        assert!(test_item(&item, &params).is_some());
    }

    #[test]
    fn lod_grows_with_distance_and_caps_reject() {
        let mut params = display_params();
        let near = test_item(&item_at(-10.0, 1.0), &params).unwrap();
        let far = test_item(&item_at(-200.0, 1.0), &params).unwrap();
        assert!(far.lod > near.lod);

        params.lod_cap = 0;
        assert!(test_item(&item_at(-200.0, 1.0), &params).is_none());
        assert!(test_item(&item_at(-10.0, 1.0), &params).is_some());
    }

    #[test]
    fn output_is_front_to_back() {
        let params = display_params();
        let items = vec![item_at(-50.0, 1.0), item_at(-10.0, 1.0), item_at(-30.0, 1.0)];
        let visible = cull_items(&items, &params);
        assert_eq!(visible.len(), 3);
        assert!(visible[0].distance_sq <= visible[1].distance_sq);
        assert!(visible[1].distance_sq <= visible[2].distance_sq);
    }

    #[test]
    fn parallel_cull_matches_serial() {
        let pool = TaskPool::new(4, 1);
        let params = display_params();
        let items: Vec<CullItem> = (0..257)
            .map(|i| item_at(-5.0 - (i as f32), 0.5))
            .collect();
        let serial = cull_items(&items, &params);
        let parallel = cull_items_parallel(&pool, &Arc::new(items), &params, 4);
        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.node, b.node);
            assert!((a.distance_sq - b.distance_sq).abs() < 1e-6);
        }
    }
}
