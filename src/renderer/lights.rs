//! Light Pool
//!
//! Per-frame light bookkeeping: collects the lights in the scene graph,
//! selects the capped visible set for the frame's camera, assigns shadow
//! atlas slices to the designated casters, and packs the GPU-visible light
//! buffer and shadow property blocks.
//!
//! Invariants:
//! - A light's index in the per-frame buffer matches the `shadowIdx` field
//!   written into its GPU entry.
//! - Lights past [`MAX_SHADOW_CASTING_LIGHTS`] (or past the slice budget)
//!   get `shadow_index = -1` and no shadows this frame (logged at debug).
//! - A light with zero range produces no entry and takes no slot.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use log::debug;

use crate::core::guid::Guid;
use crate::errors::Result;
use crate::renderer::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, RenderBackend, UpdateFrequency,
};
use crate::renderer::shadow::{self, MAX_SPLITS_PER_LIGHT, ShadowView};
use crate::scene::NodeHandle;
use crate::scene::camera::Camera;
use crate::scene::graph::SceneGraph;
use crate::scene::light::LightKind;

/// Hard cap on lights considered per frame.
pub const MAX_LIGHTS_PER_SCENE: usize = 64;
/// Hard cap on lights that may cast shadows in one frame.
pub const MAX_SHADOW_CASTING_LIGHTS: usize = 8;
/// Total slices in the shadow atlas array.
pub const SHADOW_ATLAS_SLICES: u32 = MAX_SHADOW_CASTING_LIGHTS as u32 * MAX_SPLITS_PER_LIGHT;

/// One per-light GPU entry (std140-compatible).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct GpuLightEntry {
    /// xyz = world position (or direction origin), w = range.
    pub position_ws_range: [f32; 4],
    /// xyz = colour, w = intensity.
    pub colour_intensity: [f32; 4],
    /// xyz = world direction, w = cos(inner cone).
    pub direction_ws_inner: [f32; 4],
    /// x = cos(outer cone), y = type, z = shadow index, w = flags.
    pub outer_type_shadow_flags: [f32; 4],
}

/// Per-light shadow property block (std140-compatible).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuShadowProperties {
    pub light_vp: [Mat4; 6],
    pub light_position: [Vec4; 6],
    /// x = base slice offset in the atlas.
    pub array_offset: Vec4,
    /// x = light type, y = split count, z/w = split-distance packing.
    pub light_details: Vec4,
    /// Split far distances, one per cascade.
    pub split_distances: [f32; 8],
}

impl Default for GpuShadowProperties {
    fn default() -> Self {
        Self {
            light_vp: [Mat4::IDENTITY; 6],
            light_position: [Vec4::ZERO; 6],
            array_offset: Vec4::ZERO,
            light_details: Vec4::ZERO,
            split_distances: [0.0; 8],
        }
    }
}

/// A selected light for the current frame.
pub struct ActiveLight {
    pub node: NodeHandle,
    pub guid: Guid,
    pub kind_index: u32,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub distance_sq: f32,
    pub casts_shadows: bool,
    /// Base atlas slice for this frame; -1 when not casting.
    pub shadow_index: i32,
    pub slice_count: u32,
    pub debug_draw: bool,
}

/// A shadow pass the pass manager must record this frame.
pub struct ShadowPassRequest {
    pub light_node: NodeHandle,
    pub light_guid: Guid,
    /// Absolute atlas slice for each view.
    pub base_slice: u32,
    pub views: Vec<ShadowView>,
}

/// Per-frame light state and GPU buffers.
pub struct LightPool {
    active: Vec<ActiveLight>,
    gpu_entries: Vec<GpuLightEntry>,
    shadow_blocks: Vec<GpuShadowProperties>,
    shadow_requests: Vec<ShadowPassRequest>,
    light_buffer: BufferHandle,
    shadow_buffer: BufferHandle,
    dropped_casters_this_frame: u32,
}

impl LightPool {
    /// Creates the pool and its GPU buffers.
    pub fn new(backend: &mut dyn RenderBackend) -> Self {
        let light_buffer = backend.create_buffer(&BufferDescriptor {
            name: "light_pool_entries".to_string(),
            size: (MAX_LIGHTS_PER_SCENE * std::mem::size_of::<GpuLightEntry>()) as u64,
            usage: BufferUsage::STORAGE,
            update_frequency: UpdateFrequency::Often,
            initial_data: None,
        });
        let shadow_buffer = backend.create_buffer(&BufferDescriptor {
            name: "light_pool_shadow_blocks".to_string(),
            size: (MAX_SHADOW_CASTING_LIGHTS * std::mem::size_of::<GpuShadowProperties>()) as u64,
            usage: BufferUsage::STORAGE,
            update_frequency: UpdateFrequency::Often,
            initial_data: None,
        });
        Self {
            active: Vec::new(),
            gpu_entries: Vec::new(),
            shadow_blocks: Vec::new(),
            shadow_requests: Vec::new(),
            light_buffer,
            shadow_buffer,
            dropped_casters_this_frame: 0,
        }
    }

    #[must_use]
    pub fn light_buffer(&self) -> BufferHandle {
        self.light_buffer
    }

    #[must_use]
    pub fn shadow_buffer(&self) -> BufferHandle {
        self.shadow_buffer
    }

    #[must_use]
    pub fn active(&self) -> &[ActiveLight] {
        &self.active
    }

    #[must_use]
    pub fn gpu_entries(&self) -> &[GpuLightEntry] {
        &self.gpu_entries
    }

    #[must_use]
    pub fn shadow_blocks(&self) -> &[GpuShadowProperties] {
        &self.shadow_blocks
    }

    /// Shadow passes to record this frame, in slice order.
    #[must_use]
    pub fn shadow_requests(&self) -> &[ShadowPassRequest] {
        &self.shadow_requests
    }

    /// Mutable access used by the pass manager to take the requests while
    /// recording without holding a borrow of the pool.
    pub fn shadow_requests_mut(&mut self) -> &mut Vec<ShadowPassRequest> {
        &mut self.shadow_requests
    }

    /// Selects the frame's active lights and assigns shadow slices, then
    /// packs and uploads the GPU buffers. Writes `shadow_index` back into
    /// the scene's light components. Fails when the backend rejects the
    /// buffer upload (e.g. a lost device).
    pub fn prepare_frame(
        &mut self,
        graph: &mut SceneGraph,
        camera: &Camera,
        shadow_map_size: u32,
        shadows_enabled: bool,
        backend: &mut dyn RenderBackend,
    ) -> Result<()> {
        self.active.clear();
        self.gpu_entries.clear();
        self.shadow_blocks.clear();
        self.shadow_requests.clear();
        self.dropped_casters_this_frame = 0;

        let eye = camera.eye();

        // Gather. Degenerate lights (range 0) contribute nothing.
        for (node, light) in &graph.components.lights {
            if light.is_degenerate() {
                continue;
            }
            let Some(transform) = graph.components.transforms.get(node) else {
                continue;
            };
            let world = transform.world_matrix();
            let position = world.translation.into();
            let direction = (world.matrix3 * glam::Vec3A::from(-Vec3::Z)).into();
            self.active.push(ActiveLight {
                node,
                guid: light.guid(),
                kind_index: light.kind.type_index(),
                position,
                direction,
                range: light.kind.range(),
                distance_sq: eye.distance_squared(position),
                casts_shadows: shadows_enabled && light.cast_shadows,
                shadow_index: -1,
                slice_count: light.shadow_slice_count(),
                debug_draw: light.debug_draw,
            });
        }

        // Selection: directional lights first (they light everything), then
        // nearest-first; cap at MAX_LIGHTS_PER_SCENE.
        self.active.sort_by(|a, b| {
            let a_dir = u8::from(a.kind_index != 0);
            let b_dir = u8::from(b.kind_index != 0);
            a_dir
                .cmp(&b_dir)
                .then(a.distance_sq.total_cmp(&b.distance_sq))
        });
        self.active.truncate(MAX_LIGHTS_PER_SCENE);

        // Shadow slice assignment, capped by caster count and atlas budget.
        let mut next_slice = 0u32;
        let mut casters = 0usize;
        for light in &mut self.active {
            if !light.casts_shadows {
                continue;
            }
            if casters >= MAX_SHADOW_CASTING_LIGHTS
                || next_slice + light.slice_count > SHADOW_ATLAS_SLICES
            {
                self.dropped_casters_this_frame += 1;
                continue;
            }
            light.shadow_index = next_slice as i32;
            next_slice += light.slice_count;
            casters += 1;
        }
        if self.dropped_casters_this_frame > 0 {
            debug!(
                "{} shadow caster(s) past the cap get no shadows this frame",
                self.dropped_casters_this_frame
            );
        }

        // Write shadow indices back to the components and build the shadow
        // view requests + GPU blocks.
        for light in &self.active {
            if let Some(component) = graph.components.lights.get_mut(light.node) {
                component.shadow_index = light.shadow_index;
            }
            if light.shadow_index < 0 {
                continue;
            }

            let Some(component) = graph.components.lights.get(light.node) else {
                continue;
            };
            let base_slice = light.shadow_index as u32;
            let (views, splits) = match &component.kind {
                LightKind::Directional(_) => shadow::build_directional_views(
                    light.direction,
                    camera,
                    &component.shadow,
                    shadow_map_size,
                    100.0,
                ),
                LightKind::Point(point) => (
                    shadow::build_cube_views(light.position, point.range),
                    [0.0; MAX_SPLITS_PER_LIGHT as usize],
                ),
                LightKind::Spot(spot) => (
                    vec![shadow::build_spot_view(
                        light.position,
                        light.direction,
                        spot,
                    )],
                    [0.0; MAX_SPLITS_PER_LIGHT as usize],
                ),
            };

            let mut block = GpuShadowProperties {
                array_offset: Vec4::new(base_slice as f32, 0.0, 0.0, 0.0),
                light_details: Vec4::new(
                    light.kind_index as f32,
                    views.len() as f32,
                    0.0,
                    0.0,
                ),
                ..GpuShadowProperties::default()
            };
            for (i, view) in views.iter().enumerate().take(6) {
                block.light_vp[i] = view.view_projection;
                block.light_position[i] = light.position.extend(1.0);
            }
            block.split_distances[..6].copy_from_slice(&splits);
            self.shadow_blocks.push(block);

            self.shadow_requests.push(ShadowPassRequest {
                light_node: light.node,
                light_guid: light.guid,
                base_slice,
                views,
            });
        }

        // Pack the per-frame light buffer.
        for light in &self.active {
            let Some(component) = graph.components.lights.get(light.node) else {
                continue;
            };
            let (cos_inner, cos_outer) = match &component.kind {
                LightKind::Spot(spot) => (spot.inner_cone.cos(), spot.outer_cone.cos()),
                _ => (0.0, 0.0),
            };
            self.gpu_entries.push(GpuLightEntry {
                position_ws_range: [
                    light.position.x,
                    light.position.y,
                    light.position.z,
                    light.range,
                ],
                colour_intensity: [
                    component.colour.x,
                    component.colour.y,
                    component.colour.z,
                    component.intensity,
                ],
                direction_ws_inner: [
                    light.direction.x,
                    light.direction.y,
                    light.direction.z,
                    cos_inner,
                ],
                outer_type_shadow_flags: [
                    cos_outer,
                    light.kind_index as f32,
                    light.shadow_index as f32,
                    f32::from(u8::from(light.debug_draw)),
                ],
            });
        }

        // Publish to the GPU.
        if !self.light_buffer.is_null() && !self.gpu_entries.is_empty() {
            backend.write_buffer(self.light_buffer, 0, bytemuck::cast_slice(&self.gpu_entries))?;
        }
        if !self.shadow_buffer.is_null() && !self.shadow_blocks.is_empty() {
            backend.write_buffer(self.shadow_buffer, 0, bytemuck::cast_slice(&self.shadow_blocks))?;
        }
        Ok(())
    }

    /// Casters dropped past the cap this frame (diagnostics).
    #[must_use]
    pub fn dropped_casters(&self) -> u32 {
        self.dropped_casters_this_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::NullBackend;
    use crate::scene::graph::NodeDescriptor;
    use crate::scene::light::Light;

    fn scene_with_lights(lights: Vec<Light>) -> SceneGraph {
        let mut graph = SceneGraph::new();
        for (i, light) in lights.into_iter().enumerate() {
            let node = graph
                .add_child(
                    graph.root(),
                    NodeDescriptor::new(format!("light{i}")).with_light(light),
                )
                .unwrap();
            graph
                .components
                .transforms
                .get_mut(node)
                .unwrap()
                .set_position(Vec3::new(i as f32 * 10.0, 5.0, 0.0));
        }
        graph.update_transforms();
        graph
    }

    fn camera() -> Camera {
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 500.0);
        camera.set_eye(Vec3::ZERO);
        camera.update();
        camera
    }

    #[test]
    fn zero_range_lights_produce_no_entry() {
        let mut backend = NullBackend::new();
        let mut pool = LightPool::new(&mut backend);
        let mut graph = scene_with_lights(vec![
            Light::new_point(Vec3::ONE, 1.0, 0.0),
            Light::new_point(Vec3::ONE, 1.0, 10.0),
        ]);
        pool.prepare_frame(&mut graph, &camera(), 1024, true, &mut backend).unwrap();
        assert_eq!(pool.active().len(), 1);
        assert_eq!(pool.gpu_entries().len(), 1);
    }

    #[test]
    fn buffer_index_matches_shadow_index_field() {
        let mut backend = NullBackend::new();
        let mut pool = LightPool::new(&mut backend);
        let mut caster = Light::new_spot(Vec3::ONE, 1.0, 30.0, 0.3, 0.5);
        caster.cast_shadows = true;
        let mut graph = scene_with_lights(vec![caster, Light::new_point(Vec3::ONE, 1.0, 10.0)]);
        pool.prepare_frame(&mut graph, &camera(), 1024, true, &mut backend).unwrap();

        for (entry, light) in pool.gpu_entries().iter().zip(pool.active()) {
            assert_eq!(entry.outer_type_shadow_flags[2], light.shadow_index as f32);
        }
        // The spot caster got slice 0 and one view.
        let request = &pool.shadow_requests()[0];
        assert_eq!(request.base_slice, 0);
        assert_eq!(request.views.len(), 1);
    }

    #[test]
    fn casters_past_the_cap_get_no_shadows() {
        let mut backend = NullBackend::new();
        let mut pool = LightPool::new(&mut backend);
        let lights: Vec<Light> = (0..MAX_SHADOW_CASTING_LIGHTS + 3)
            .map(|_| {
                let mut light = Light::new_spot(Vec3::ONE, 1.0, 30.0, 0.3, 0.5);
                light.cast_shadows = true;
                light
            })
            .collect();
        let mut graph = scene_with_lights(lights);
        pool.prepare_frame(&mut graph, &camera(), 1024, true, &mut backend).unwrap();

        let with_shadows = pool
            .active()
            .iter()
            .filter(|l| l.shadow_index >= 0)
            .count();
        assert_eq!(with_shadows, MAX_SHADOW_CASTING_LIGHTS);
        assert_eq!(pool.dropped_casters(), 3);
    }

    #[test]
    fn directional_casters_get_cascade_views() {
        let mut backend = NullBackend::new();
        let mut pool = LightPool::new(&mut backend);
        let mut sun = Light::new_directional(Vec3::ONE, 2.0);
        sun.cast_shadows = true;
        sun.shadow.cascade_count = 3;
        let mut graph = scene_with_lights(vec![sun]);
        pool.prepare_frame(&mut graph, &camera(), 2048, true, &mut backend).unwrap();

        assert_eq!(pool.shadow_requests().len(), 1);
        assert_eq!(pool.shadow_requests()[0].views.len(), 3);
        let block = &pool.shadow_blocks()[0];
        assert_eq!(block.light_details.x, 0.0); // directional type tag
        assert_eq!(block.light_details.y, 3.0);
        // Split distances are monotonic.
        assert!(block.split_distances[0] < block.split_distances[1]);
        assert!(block.split_distances[1] < block.split_distances[2]);
    }

    #[test]
    fn shadows_disabled_assigns_no_slices() {
        let mut backend = NullBackend::new();
        let mut pool = LightPool::new(&mut backend);
        let mut sun = Light::new_directional(Vec3::ONE, 2.0);
        sun.cast_shadows = true;
        let mut graph = scene_with_lights(vec![sun]);
        pool.prepare_frame(&mut graph, &camera(), 1024, false, &mut backend).unwrap();
        assert!(pool.shadow_requests().is_empty());
        assert!(pool.active().iter().all(|l| l.shadow_index == -1));
    }
}
