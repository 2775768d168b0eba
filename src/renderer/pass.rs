//! Render Pass Manager
//!
//! Owns the ordered pass list and assembles the frame: shadow passes
//! first, then for each main pass the pre-pass → optional occlusion
//! culling → main → OIT → debug-overlay flow. Culling results feed the
//! per-pass NodeData buffer; draw commands reference entries by index and
//! batch by (pipeline, descriptor set).
//!
//! A node that cannot draw yet (program still compiling, missing
//! material) is skipped for the frame, never stalled on. Per-frame
//! statistics and absorbed errors are surfaced read-only.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};
use log::{debug, warn};
use smallvec::SmallVec;

use crate::core::task_pool::TaskPool;
use crate::errors::{DivideError, Result};
use crate::renderer::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, RenderBackend, UpdateFrequency,
};
use crate::renderer::command::{
    BarrierMask, BlendFactor, BlendState, CommandBuffer, CommandBufferPool, DrawCommand, GfxCommand,
};
use crate::renderer::descriptor_set::DescriptorSet;
use crate::renderer::lights::LightPool;
use crate::renderer::pipeline::{PipelineCache, PipelineDescriptor};
use crate::renderer::shader::{
    ShaderModuleDescriptor, ShaderProgramDescriptor, ShaderRegistry, ShaderStage,
};
use crate::renderer::target::{
    RenderTargetId, RenderTargetPool, RtDrawDescriptor, RtStateMask,
};
use crate::renderer::{RenderPassType, RenderStage};
use crate::scene::camera::Camera;
use crate::scene::culler::{self, CullItem, CullParams, VisibleNode};
use crate::scene::graph::SceneGraph;

/// First-N cap on planar reflectors receiving a per-frame index.
pub const MAX_REFLECTIVE_NODES: u32 = 4;

/// Descriptor-set slots used by the standard passes.
const SLOT_NODE_DATA: u8 = 0;
const SLOT_LIGHTS: u8 = 1;
const SLOT_SHADOW_PROPS: u8 = 2;
const SLOT_SHADOW_ATLAS: u8 = 3;
const SLOT_PREV_DEPTH: u8 = 4;

/// One NodeData SBO entry (std140-compatible).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct NodeData {
    pub world_matrix: Mat4,
    pub normal_matrix_wv: Mat4,
    pub colour_matrix: Mat4,
    /// `{flags|lod, cull flags, reflection idx, refraction idx}`.
    pub properties: Vec4,
}

impl Default for NodeData {
    fn default() -> Self {
        Self {
            world_matrix: Mat4::IDENTITY,
            normal_matrix_wv: Mat4::IDENTITY,
            colour_matrix: Mat4::IDENTITY,
            properties: Vec4::new(0.0, 0.0, -1.0, -1.0),
        }
    }
}

/// Per-pass GPU buffers.
pub struct PassBufferData {
    pub node_data: BufferHandle,
    pub indirect_commands: BufferHandle,
    pub last_command_count: u32,
}

/// One registered pass.
pub struct RenderPass {
    pub name: String,
    pub sort_key: u8,
    pub stage: RenderStage,
    pub target: RenderTargetId,
    pub buffers: PassBufferData,
}

/// Read-only per-frame statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub visible_nodes: u32,
    pub draw_calls: u32,
    pub culled: u32,
    pub batched: u32,
    pub skipped_not_ready: u32,
    pub shadow_passes: u32,
}

/// Everything a frame submission needs, borrowed for the call.
pub struct FrameContext<'a> {
    pub graph: &'a mut SceneGraph,
    pub camera: &'a Camera,
    pub backend: &'a mut dyn RenderBackend,
    pub targets: &'a mut RenderTargetPool,
    pub lights: &'a mut LightPool,
    pub shaders: &'a mut ShaderRegistry,
    pub pool: &'a TaskPool,
    pub lod_thresholds: [f32; 4],
    pub view_distance: f32,
    pub oit_enabled: bool,
    pub occlusion_culling: bool,
}

const MAX_NODES_PER_PASS: usize = 4096;

/// Owner of the frame's pass list and command assembly.
pub struct RenderPassManager {
    passes: Vec<RenderPass>,
    pipelines: PipelineCache,
    command_pool: CommandBufferPool,
    visible_cache: [Vec<VisibleNode>; RenderStage::COUNT],
    node_data_scratch: Vec<NodeData>,
    stats: FrameStats,
    diagnostics: Vec<String>,

    shadow_target: RenderTargetId,
    oit_target: Option<RenderTargetId>,

    depth_only_program: crate::renderer::shader::ShaderProgramHandle,
    oit_composite_program: crate::renderer::shader::ShaderProgramHandle,
    debug_program: crate::renderer::shader::ShaderProgramHandle,
}

impl RenderPassManager {
    /// Builds the manager and requests its internal shader programs.
    pub fn new(
        shaders: &mut ShaderRegistry,
        shadow_target: RenderTargetId,
        oit_target: Option<RenderTargetId>,
    ) -> Self {
        let depth_only_program = shaders.get_or_request(internal_program("depth_only"));
        let oit_composite_program = shaders.get_or_request(internal_program("oit_composite"));
        let debug_program = shaders.get_or_request(internal_program("debug_overlay"));
        Self {
            passes: Vec::new(),
            pipelines: PipelineCache::new(),
            command_pool: CommandBufferPool::new(),
            visible_cache: Default::default(),
            node_data_scratch: Vec::with_capacity(256),
            stats: FrameStats::default(),
            diagnostics: Vec::new(),
            shadow_target,
            oit_target,
            depth_only_program,
            oit_composite_program,
            debug_program,
        }
    }

    /// Internal program handles, for queue submission at init.
    #[must_use]
    pub fn internal_programs(&self) -> [crate::renderer::shader::ShaderProgramHandle; 3] {
        [
            self.depth_only_program,
            self.oit_composite_program,
            self.debug_program,
        ]
    }

    /// Registers a pass; the list re-sorts by `sort_key`.
    pub fn add_pass(
        &mut self,
        backend: &mut dyn RenderBackend,
        name: impl Into<String>,
        sort_key: u8,
        stage: RenderStage,
        target: RenderTargetId,
    ) -> Result<()> {
        let name = name.into();
        let node_data = backend.create_buffer(&BufferDescriptor {
            name: format!("{name}_node_data"),
            size: (MAX_NODES_PER_PASS * std::mem::size_of::<NodeData>()) as u64,
            usage: BufferUsage::STORAGE,
            update_frequency: UpdateFrequency::Often,
            initial_data: None,
        });
        let indirect_commands = backend.create_buffer(&BufferDescriptor {
            name: format!("{name}_commands"),
            size: (MAX_NODES_PER_PASS * 20) as u64,
            usage: BufferUsage::INDIRECT | BufferUsage::STORAGE,
            update_frequency: UpdateFrequency::Often,
            initial_data: None,
        });
        if node_data.is_null() || indirect_commands.is_null() {
            return Err(DivideError::OutOfMemory(format!("pass buffers for '{name}'")));
        }
        self.passes.push(RenderPass {
            name,
            sort_key,
            stage,
            target,
            buffers: PassBufferData {
                node_data,
                indirect_commands,
                last_command_count: 0,
            },
        });
        self.passes.sort_by_key(|pass| pass.sort_key);
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Absorbed non-fatal errors recorded this frame.
    #[must_use]
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Cached visible set for a stage (last frame it was culled).
    #[must_use]
    pub fn visible_nodes(&self, stage: RenderStage) -> &[VisibleNode] {
        &self.visible_cache[stage.index()]
    }

    /// Records and submits the whole frame: shadow generation first, then
    /// every registered pass in sort order.
    pub fn render_frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        self.stats = FrameStats::default();
        self.diagnostics.clear();

        let items = Arc::new(culler::extract(ctx.graph));

        self.record_shadow_passes(ctx, &items)?;

        let pass_indices: Vec<usize> = (0..self.passes.len()).collect();
        for pass_index in pass_indices {
            self.record_custom_pass(ctx, &items, pass_index)?;
        }
        Ok(())
    }

    // ── Shadow generation ──────────────────────────────────────────────

    fn record_shadow_passes(
        &mut self,
        ctx: &mut FrameContext<'_>,
        items: &Arc<Vec<CullItem>>,
    ) -> Result<()> {
        // Requests were produced by LightPool::prepare_frame. One command
        // buffer per light, flushed immediately; the atlas barrier is
        // recorded by the first consumer pass.
        let requests = std::mem::take(ctx.lights.shadow_requests_mut());
        for request in &requests {
            let mut buffer = self.command_pool.take();
            buffer.push(GfxCommand::BeginDebugScope {
                name: format!("Shadow {}", request.light_guid),
            });

            for view in &request.views {
                let slice = (request.base_slice + view.layer) as u16;
                let params = CullParams {
                    stage: RenderStage::Shadow,
                    eye: ctx.camera.eye(),
                    frustum: view.frustum,
                    lod_thresholds: ctx.lod_thresholds,
                    lod_cap: u8::MAX,
                    min_extents: 0.0,
                    cull_max_distance_sq: f32::MAX,
                    visibility_distance_sq: f32::MAX,
                };
                let visible = culler::cull_items_parallel(ctx.pool, items, &params, 4);
                self.stats.culled += (items.len() - visible.len()) as u32;

                buffer.push(GfxCommand::BeginRenderPass {
                    target: self.shadow_target,
                    descriptor: RtDrawDescriptor {
                        enabled_attachments: 0,
                        state: RtStateMask::CLEAR_DEPTH | RtStateMask::CHANGE_VIEWPORT,
                        layer: Some(slice),
                        mip: 0,
                    },
                    name: format!("shadow_slice_{slice}"),
                });
                buffer.push(GfxCommand::SetCamera {
                    view: view.view_projection,
                    projection: Mat4::IDENTITY,
                });

                self.record_draws(
                    ctx,
                    &mut buffer,
                    &visible,
                    RenderStage::Shadow,
                    RenderPassType::PrePass,
                    None,
                );
                buffer.push(GfxCommand::EndRenderPass);

                if let Some(target) = ctx.targets.get_mut(self.shadow_target) {
                    target.mark_layer_dirty(slice);
                }
                self.stats.shadow_passes += 1;
            }

            buffer.push(GfxCommand::EndDebugScope);
            buffer.batch();
            let submitted = self.submit(ctx.backend, &buffer);
            self.command_pool.release(buffer);
            submitted?;
        }
        *ctx.lights.shadow_requests_mut() = requests;
        Ok(())
    }

    // ── Main pass flow ─────────────────────────────────────────────────

    fn record_custom_pass(
        &mut self,
        ctx: &mut FrameContext<'_>,
        items: &Arc<Vec<CullItem>>,
        pass_index: usize,
    ) -> Result<()> {
        let (stage, target, pass_name) = {
            let pass = &self.passes[pass_index];
            (pass.stage, pass.target, pass.name.clone())
        };
        let draws_before = self.stats.draw_calls;

        let params = CullParams {
            stage,
            eye: ctx.camera.eye(),
            frustum: *ctx.camera.frustum(),
            lod_thresholds: ctx.lod_thresholds,
            lod_cap: u8::MAX,
            min_extents: 0.0,
            cull_max_distance_sq: ctx.view_distance * ctx.view_distance,
            visibility_distance_sq: ctx.view_distance * ctx.view_distance,
        };
        let visible = culler::cull_items_parallel(ctx.pool, items, &params, 4);
        self.stats.culled += (items.len() - visible.len()) as u32;
        self.stats.visible_nodes += visible.len() as u32;
        self.visible_cache[stage.index()] = visible.clone();

        let mut buffer = self.command_pool.take();
        buffer.push(GfxCommand::BeginDebugScope {
            name: pass_name.clone(),
        });
        buffer.push(GfxCommand::SetCamera {
            view: ctx.camera.view_matrix(),
            projection: ctx.camera.projection_matrix(),
        });
        buffer.push(GfxCommand::SetClipPlanes {
            planes: SmallVec::new(),
        });

        // Sampling the shadow atlas later requires generation to be
        // visible; flush texture writes once per pass up front.
        buffer.push(GfxCommand::MemoryBarrier {
            mask: BarrierMask::TEXTURE,
        });

        let target_has_depth = ctx
            .targets
            .get(target)
            .is_some_and(super::target::RenderTarget::has_depth);

        // Upload NodeData for the visible set once; pre-pass and main pass
        // share the entries.
        self.upload_node_data(ctx, &visible, pass_index)?;

        // PrePass: depth only.
        if target_has_depth {
            buffer.push(GfxCommand::BeginRenderPass {
                target,
                descriptor: RtDrawDescriptor {
                    enabled_attachments: 0,
                    state: RtStateMask::CLEAR_DEPTH | RtStateMask::CHANGE_VIEWPORT,
                    layer: None,
                    mip: 0,
                },
                name: format!("{pass_name}_prepass"),
            });
            self.record_draws(
                ctx,
                &mut buffer,
                &visible,
                stage,
                RenderPassType::PrePass,
                Some(pass_index),
            );
            buffer.push(GfxCommand::EndRenderPass);
        }

        // Occlusion culling: Hi-Z from the pre-pass depth, then a compute
        // pass that marks hidden indirect commands.
        if ctx.occlusion_culling && target_has_depth {
            if let Some(depth) = ctx.targets.get(target).and_then(|t| t.depth_texture) {
                buffer.push(GfxCommand::ComputeMipMaps {
                    texture: depth,
                    deferred: false,
                });
                let cull_pipeline = self.pipelines.get_or_create(&PipelineDescriptor::new(
                    0x0CC1,
                    self.depth_only_program,
                ));
                buffer.push(GfxCommand::DispatchCompute {
                    pipeline: cull_pipeline,
                    groups: [visible.len().div_ceil(64).max(1) as u32, 1, 1],
                });
                buffer.push(GfxCommand::MemoryBarrier {
                    mask: BarrierMask::SHADER_STORAGE,
                });
            }
        }

        // Main pass: opaque geometry.
        buffer.push(GfxCommand::BeginRenderPass {
            target,
            descriptor: RtDrawDescriptor {
                enabled_attachments: u8::MAX,
                // Depth was laid down by the pre-pass.
                state: if target_has_depth {
                    RtStateMask::CLEAR_COLOUR | RtStateMask::CHANGE_VIEWPORT
                } else {
                    RtStateMask::CLEAR_COLOUR
                        | RtStateMask::CLEAR_DEPTH
                        | RtStateMask::CHANGE_VIEWPORT
                },
                layer: None,
                mip: 0,
            },
            name: format!("{pass_name}_main"),
        });
        self.record_draws(
            ctx,
            &mut buffer,
            &visible,
            stage,
            RenderPassType::MainPass,
            Some(pass_index),
        );
        buffer.push(GfxCommand::EndRenderPass);

        // OIT: accumulation/revealage into the OIT target, then composite
        // into the pass's colour target.
        let translucent: Vec<VisibleNode> = visible
            .iter()
            .filter(|v| v.translucent)
            .copied()
            .collect();
        if ctx.oit_enabled && !translucent.is_empty() && stage == RenderStage::Display {
            if let Some(oit_target) = self.oit_target {
                self.record_oit(ctx, &mut buffer, &translucent, oit_target, target, pass_index);
            }
        }

        // Debug overlays last, into the same colour target.
        self.record_debug_overlays(ctx, &mut buffer, &visible, target);

        buffer.push(GfxCommand::EndDebugScope);

        self.stats.batched += buffer.batch() as u32;
        let submitted = self.submit(ctx.backend, &buffer);
        self.command_pool.release(buffer);
        self.passes[pass_index].buffers.last_command_count = self.stats.draw_calls - draws_before;
        submitted
    }

    /// Fills the scratch NodeData table for the visible set and uploads it
    /// to the pass's SBO. Entry order matches `visible` order, so a draw's
    /// `base_instance` is its entry index.
    fn upload_node_data(
        &mut self,
        ctx: &mut FrameContext<'_>,
        visible: &[VisibleNode],
        pass_index: usize,
    ) -> Result<()> {
        self.node_data_scratch.clear();
        let view = ctx.camera.view_matrix();
        let mut reflection_slots = 0u32;
        let mut refraction_slots = 0u32;

        for node in visible.iter().take(MAX_NODES_PER_PASS) {
            let mut data = NodeData::default();
            if let Some(transform) = ctx.graph.components.transforms.get(node.node) {
                data.world_matrix = transform.world_matrix_as_mat4();
                data.normal_matrix_wv = (view * data.world_matrix).inverse().transpose();
            }
            if let Some(rendering) = ctx.graph.components.rendering.get(node.node) {
                data.colour_matrix = colour_matrix(&rendering.material);

                let selection = ctx
                    .graph
                    .components
                    .selection
                    .get(node.node)
                    .copied()
                    .unwrap_or_default();
                let flags = (u32::from(selection.hovered) << 24)
                    | (u32::from(selection.selected) << 16)
                    | (u32::from(rendering.material.receives_shadows) << 8)
                    | u32::from(node.lod);

                // First-N reflector/refractor indices; the rest carry -1.
                let reflection_idx = if rendering.material.reflective
                    && reflection_slots < MAX_REFLECTIVE_NODES
                {
                    reflection_slots += 1;
                    (reflection_slots - 1) as f32
                } else {
                    -1.0
                };
                let refraction_idx = if rendering.material.refractive
                    && refraction_slots < MAX_REFLECTIVE_NODES
                {
                    refraction_slots += 1;
                    (refraction_slots - 1) as f32
                } else {
                    -1.0
                };

                data.properties = Vec4::new(
                    flags as f32,
                    f32::from(
                        ctx.graph
                            .get(node.node)
                            .map_or(0, |n| n.cull_exclusion.bits()),
                    ),
                    reflection_idx,
                    refraction_idx,
                );
            }
            self.node_data_scratch.push(data);
        }

        if visible.len() > MAX_NODES_PER_PASS {
            let dropped = visible.len() - MAX_NODES_PER_PASS;
            self.diagnostics
                .push(format!("pass node budget exceeded; {dropped} node(s) dropped"));
        }

        let buffer = self.passes[pass_index].buffers.node_data;
        if !self.node_data_scratch.is_empty() {
            ctx.backend
                .write_buffer(buffer, 0, bytemuck::cast_slice(&self.node_data_scratch))?;
        }
        Ok(())
    }

    /// Records one draw per visible node that can draw in this
    /// (stage, pass type); unready materials are skipped, not stalled on.
    fn record_draws(
        &mut self,
        ctx: &mut FrameContext<'_>,
        buffer: &mut CommandBuffer,
        visible: &[VisibleNode],
        stage: RenderStage,
        pass_type: RenderPassType,
        pass_index: Option<usize>,
    ) {
        let node_data_buffer =
            pass_index.map(|i| self.passes[i].buffers.node_data);
        let shadow_atlas = ctx
            .targets
            .get(self.shadow_target)
            .and_then(|t| t.depth_texture);
        // The pre-pass depth of this pass's target, sampled by the main
        // pass (soft particles, depth-aware effects).
        let prev_depth = pass_index
            .and_then(|i| ctx.targets.get(self.passes[i].target))
            .and_then(|t| t.depth_texture);

        for (entry_index, node) in visible.iter().enumerate().take(MAX_NODES_PER_PASS) {
            if pass_type == RenderPassType::MainPass && node.translucent {
                continue; // routed through the OIT pass
            }
            let Some(rendering) = ctx.graph.components.rendering.get(node.node) else {
                continue;
            };

            // Program selection: depth-only for pre/shadow passes, the
            // material's stage program otherwise.
            let program = if pass_type == RenderPassType::PrePass {
                self.depth_only_program
            } else {
                match rendering.material.programs[stage.index()] {
                    Some(program) => program,
                    None => {
                        self.stats.skipped_not_ready += 1;
                        continue;
                    }
                }
            };
            let resolved = ctx.shaders.resolve(program);
            if !ctx.shaders.is_ready(resolved) {
                self.stats.skipped_not_ready += 1;
                continue;
            }

            let pipeline = self.pipelines.get_or_create(&PipelineDescriptor::new(
                rendering.material.state_hashes[stage.index()],
                resolved,
            ));

            let mut set = DescriptorSet::new();
            if let Some(node_data) = node_data_buffer {
                set.bind(crate::renderer::descriptor_set::DescriptorBinding::BufferRange {
                    slot: SLOT_NODE_DATA,
                    buffer: node_data,
                    offset: 0,
                    length: (self.node_data_scratch.len().max(1)
                        * std::mem::size_of::<NodeData>()) as u32,
                });
            }
            if pass_type == RenderPassType::MainPass {
                set.bind(crate::renderer::descriptor_set::DescriptorBinding::BufferRange {
                    slot: SLOT_LIGHTS,
                    buffer: ctx.lights.light_buffer(),
                    offset: 0,
                    length: u32::MAX,
                });
                set.bind(crate::renderer::descriptor_set::DescriptorBinding::BufferRange {
                    slot: SLOT_SHADOW_PROPS,
                    buffer: ctx.lights.shadow_buffer(),
                    offset: 0,
                    length: u32::MAX,
                });
                if let Some(atlas) = shadow_atlas {
                    set.bind(crate::renderer::descriptor_set::DescriptorBinding::Texture {
                        slot: SLOT_SHADOW_ATLAS,
                        texture: atlas,
                        sampler_hash: 0,
                    });
                }
                if let Some(depth) = prev_depth {
                    set.bind(crate::renderer::descriptor_set::DescriptorBinding::Texture {
                        slot: SLOT_PREV_DEPTH,
                        texture: depth,
                        sampler_hash: 0,
                    });
                }
            }

            let index_count = index_count_for(ctx.graph, node);
            if index_count == 0 {
                continue;
            }

            buffer.push(GfxCommand::BindPipeline { pipeline });
            buffer.push(GfxCommand::BindDescriptorSets { set });
            buffer.push(GfxCommand::Draw {
                draw: DrawCommand {
                    count: index_count,
                    instance_count: 1,
                    first_index: 0,
                    base_vertex: 0,
                    base_instance: entry_index as u32,
                    source_buffer: node_data_buffer.unwrap_or(BufferHandle::NULL),
                },
            });
            self.stats.draw_calls += 1;
        }
    }

    /// Weighted-blended OIT: accumulation + revealage sub-passes into the
    /// OIT target, then a composite into the destination colour target
    /// with `SRC_ALPHA / INV_SRC_ALPHA`.
    fn record_oit(
        &mut self,
        ctx: &mut FrameContext<'_>,
        buffer: &mut CommandBuffer,
        translucent: &[VisibleNode],
        oit_target: RenderTargetId,
        colour_target: RenderTargetId,
        pass_index: usize,
    ) {
        buffer.push(GfxCommand::BeginRenderPass {
            target: oit_target,
            descriptor: RtDrawDescriptor::default(),
            name: "oit_accumulate".to_string(),
        });
        buffer.push(GfxCommand::BeginRenderSubPass { index: 0 });
        // Accumulation: additive; revealage: multiplicative.
        buffer.push(GfxCommand::SetBlend {
            attachment: 0,
            blend: BlendState::new(BlendFactor::One, BlendFactor::One),
        });
        buffer.push(GfxCommand::SetBlend {
            attachment: 1,
            blend: BlendState::new(BlendFactor::Zero, BlendFactor::InvSrcAlpha),
        });
        self.record_draws(
            ctx,
            buffer,
            translucent,
            RenderStage::Display,
            RenderPassType::OitPass,
            Some(pass_index),
        );
        buffer.push(GfxCommand::EndRenderSubPass);
        buffer.push(GfxCommand::EndRenderPass);

        // Composite into the main colour target (no clear).
        buffer.push(GfxCommand::BeginRenderPass {
            target: colour_target,
            descriptor: RtDrawDescriptor {
                enabled_attachments: 1,
                state: RtStateMask::empty(),
                layer: None,
                mip: 0,
            },
            name: "oit_composite".to_string(),
        });
        buffer.push(GfxCommand::SetBlend {
            attachment: 0,
            blend: BlendState::new(BlendFactor::SrcAlpha, BlendFactor::InvSrcAlpha),
        });
        let composite_pipeline = self
            .pipelines
            .get_or_create(&PipelineDescriptor::new(0x017, self.oit_composite_program));
        buffer.push(GfxCommand::BindPipeline {
            pipeline: composite_pipeline,
        });
        let oit_textures = ctx
            .targets
            .get(oit_target)
            .map(|t| t.colour_textures.clone())
            .unwrap_or_default();
        let mut set = DescriptorSet::new();
        for (slot, texture) in oit_textures.iter().enumerate() {
            set.bind(crate::renderer::descriptor_set::DescriptorBinding::Texture {
                slot: slot as u8,
                texture: *texture,
                sampler_hash: 0,
            });
        }
        buffer.push(GfxCommand::BindDescriptorSets { set });
        // Fullscreen triangle.
        buffer.push(GfxCommand::Draw {
            draw: DrawCommand {
                count: 3,
                instance_count: 1,
                first_index: 0,
                base_vertex: 0,
                base_instance: 0,
                source_buffer: BufferHandle::NULL,
            },
        });
        self.stats.draw_calls += 1;
        buffer.push(GfxCommand::EndRenderPass);
    }

    /// Selection gizmos, bounding volumes, and light impostors, recorded
    /// last into the pass's colour target.
    fn record_debug_overlays(
        &mut self,
        ctx: &mut FrameContext<'_>,
        buffer: &mut CommandBuffer,
        visible: &[VisibleNode],
        colour_target: RenderTargetId,
    ) {
        let mut overlay = CommandBuffer::new();
        let debug_ready = ctx.shaders.is_ready(self.debug_program);

        if debug_ready {
            let debug_pipeline = self
                .pipelines
                .get_or_create(&PipelineDescriptor::new(0xDB6, self.debug_program));
            let mut bounds_draws = 0u32;
            for node in visible {
                let draw_bounds = ctx
                    .graph
                    .components
                    .rendering
                    .get(node.node)
                    .is_some_and(|r| r.draw_bounds);
                if draw_bounds {
                    bounds_draws += 1;
                }
            }
            let impostors = ctx.lights.active().iter().filter(|l| l.debug_draw).count() as u32;
            if bounds_draws + impostors > 0 {
                overlay.push(GfxCommand::BeginRenderPass {
                    target: colour_target,
                    descriptor: RtDrawDescriptor {
                        enabled_attachments: 1,
                        state: RtStateMask::empty(),
                        layer: None,
                        mip: 0,
                    },
                    name: "debug_overlay".to_string(),
                });
                overlay.push(GfxCommand::BindPipeline {
                    pipeline: debug_pipeline,
                });
                if bounds_draws > 0 {
                    // 12 lines per AABB, instanced per flagged node.
                    overlay.push(GfxCommand::Draw {
                        draw: DrawCommand {
                            count: 24,
                            instance_count: bounds_draws,
                            first_index: 0,
                            base_vertex: 0,
                            base_instance: 0,
                            source_buffer: BufferHandle::NULL,
                        },
                    });
                    self.stats.draw_calls += 1;
                }
                if impostors > 0 {
                    overlay.push(GfxCommand::Draw {
                        draw: DrawCommand {
                            count: 6,
                            instance_count: impostors,
                            first_index: 0,
                            base_vertex: 0,
                            base_instance: 0,
                            source_buffer: BufferHandle::NULL,
                        },
                    });
                    self.stats.draw_calls += 1;
                }
                overlay.push(GfxCommand::DrawText {
                    text: format!("{} visible", visible.len()),
                    position: Vec2::new(8.0, 8.0),
                });
                overlay.push(GfxCommand::EndRenderPass);
            }
        }
        buffer.add(&overlay);
    }

    /// Submits with the transient-error policy: one retry, then the frame
    /// fails.
    fn submit(&mut self, backend: &mut dyn RenderBackend, buffer: &CommandBuffer) -> Result<()> {
        match backend.flush_command_buffer(buffer) {
            Ok(()) => Ok(()),
            Err(DivideError::CommandBufferInvalid(report)) => {
                // Development builds abort on validation failures; release
                // drops the offending buffer.
                if cfg!(debug_assertions) {
                    Err(DivideError::CommandBufferInvalid(report))
                } else {
                    warn!("dropping invalid command buffer: {report}");
                    self.diagnostics.push(report);
                    Ok(())
                }
            }
            Err(first_err) => {
                debug!("submit failed ({first_err}); retrying once");
                backend.flush_command_buffer(buffer).map_err(|err| {
                    DivideError::SubmitFailed(format!("retry failed: {err}"))
                })
            }
        }
    }
}

fn internal_program(name: &str) -> ShaderProgramDescriptor {
    let mut descriptor = ShaderProgramDescriptor::new(name);
    descriptor.modules.push(ShaderModuleDescriptor {
        stage: ShaderStage::Vertex,
        entry_point: "main".to_string(),
        source: format!("// builtin vertex stage: {name}"),
        variant: 0,
    });
    descriptor.modules.push(ShaderModuleDescriptor {
        stage: ShaderStage::Fragment,
        entry_point: "main".to_string(),
        source: format!("// builtin fragment stage: {name}"),
        variant: 0,
    });
    descriptor
}

/// Packs the material's shading inputs into the colour matrix rows.
fn colour_matrix(material: &crate::resources::material::Material) -> Mat4 {
    use crate::resources::material::ShadingData;
    match &material.shading {
        ShadingData::Pbr {
            base_colour,
            emissive,
            metallic,
            roughness,
        } => Mat4::from_cols(
            Vec4::from_array(*base_colour),
            Vec4::new(emissive[0], emissive[1], emissive[2], 0.0),
            Vec4::new(*metallic, *roughness, 0.0, 0.0),
            Vec4::W,
        ),
        ShadingData::Phong {
            diffuse,
            specular,
            shininess,
        } => Mat4::from_cols(
            Vec4::from_array(*diffuse),
            Vec4::new(specular[0], specular[1], specular[2], 0.0),
            Vec4::new(*shininess, 0.0, 0.0, 0.0),
            Vec4::W,
        ),
    }
}

fn index_count_for(graph: &SceneGraph, node: &VisibleNode) -> u32 {
    match graph.get(node.node).map(|n| &n.payload) {
        Some(crate::scene::node::SceneNodePayload::Mesh(mesh)) => mesh
            .lods
            .get(node.lod as usize)
            .or_else(|| mesh.lods.first())
            .map_or(0, |lod| lod.index_count),
        // Sky dome / procedural payloads draw a fixed primitive.
        Some(
            crate::scene::node::SceneNodePayload::Sky
            | crate::scene::node::SceneNodePayload::Terrain { .. }
            | crate::scene::node::SceneNodePayload::ParticleEmitter { .. },
        ) => 36,
        _ => 0,
    }
}
