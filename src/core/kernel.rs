//! Kernel and Frame Loop
//!
//! The kernel owns the top-level subsystems (the `Engine` context — no
//! globals) and the update/render cadence: a fixed-timestep logic update
//! at `ticks_per_second` with a variable-rate render, exposing the
//! interpolation factor between the two. Frame lifecycle events fan out to
//! registered listeners in priority order; a vetoed `Started` aborts the
//! frame with clean teardown of partial state.

use std::time::Duration;

use glam::Vec3;
use log::{error, info, warn};

use crate::ai::AiManager;
use crate::config::Configuration;
use crate::core::frame_listener::{FrameEvent, FrameEventArgs, FrameListenerRegistry};
use crate::core::task_pool::TaskPool;
use crate::core::time::{FrameRateLimiter, Timer, US_PER_SECOND};
use crate::errors::{DivideError, Result};
use crate::renderer::backend::RenderBackend;
use crate::renderer::lights::{LightPool, SHADOW_ATLAS_SLICES};
use crate::renderer::pass::{FrameContext, RenderPassManager};
use crate::renderer::shader::{
    ShaderComputeQueue, ShaderCompiler, ShaderModuleDescriptor, ShaderProgramDescriptor,
    ShaderProgramHandle, ShaderRegistry, ShaderStage,
};
use crate::renderer::target::{
    AttachmentDescriptor, RenderTargetDescriptor, RenderTargetHandle, RenderTargetPool,
    RenderTargetUsage,
};
use crate::renderer::RenderStage;
use crate::resources::cache::ResourceCache;
use crate::resources::input::{
    ActionBindings, ActionId, InputConsumer, InputEvent, InputQueue, dispatch_queue,
};
use crate::resources::texture::PixelFormat;
use crate::scene::camera::Camera;
use crate::scene::ecs::SystemRegistry;
use crate::scene::graph::{NodeDescriptor, SceneGraph};
use crate::scene::node::SceneNodePayload;
use crate::utils::fps::FrameProfile;

/// Logic steps one frame may take before the render is forced.
pub const MAX_FRAMESKIP: u32 = 5;

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAdvance {
    Continue,
    Quit,
}

/// Per-scene input layer: resolves bound actions and consumes the events
/// that triggered them.
pub struct SceneInput {
    pub bindings: ActionBindings,
    triggered: Vec<ActionId>,
}

impl SceneInput {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: ActionBindings::new(),
            triggered: Vec::new(),
        }
    }

    /// Actions triggered since the last frame start.
    #[must_use]
    pub fn triggered(&self) -> &[ActionId] {
        &self.triggered
    }

    fn start_frame(&mut self) {
        self.triggered.clear();
    }
}

impl Default for SceneInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputConsumer for SceneInput {
    fn name(&self) -> &str {
        "scene"
    }

    fn consume(&mut self, event: &InputEvent) -> bool {
        let actions = self.bindings.resolve(event);
        if actions.is_empty() {
            return false;
        }
        self.triggered.extend(actions);
        true
    }
}

/// The engine context: every subsystem, owned in one place and passed by
/// reference. Scene code gets the narrower views it needs.
pub struct Engine {
    pub config: Configuration,
    pub task_pool: TaskPool,
    pub backend: Box<dyn RenderBackend>,
    pub cache: ResourceCache,
    pub targets: RenderTargetPool,
    pub shaders: ShaderRegistry,
    pub shader_queue: ShaderComputeQueue,
    pub shader_compiler: Box<dyn ShaderCompiler + Send>,
    pub lights: LightPool,
    pub pass_manager: RenderPassManager,
    pub graph: SceneGraph,
    pub systems: SystemRegistry,
    pub camera: Camera,
    pub input_queue: InputQueue,
    pub scene_input: SceneInput,
    /// GUI and editor layers, offered events after the scene.
    pub extra_consumers: Vec<Box<dyn InputConsumer + Send>>,
    pub ai: AiManager,
    pub listeners: FrameListenerRegistry,
    pub profile: FrameProfile,
    /// The stock lit program assigned to materials that name no other.
    pub default_program: ShaderProgramHandle,

    screen_target: RenderTargetHandle,
    shadow_target: RenderTargetHandle,
    oit_target: RenderTargetHandle,
}

impl Engine {
    #[must_use]
    pub fn screen_target(&self) -> RenderTargetHandle {
        self.screen_target
    }

    #[must_use]
    pub fn shadow_target(&self) -> RenderTargetHandle {
        self.shadow_target
    }
}

/// Owner of the frame loop.
pub struct Kernel {
    pub engine: Engine,
    timer: Timer,
    limiter: FrameRateLimiter,
    accumulator_us: u64,
    tick_us: u64,
    interpolation_factor: f32,
    frame_count: u64,
    quit_requested: bool,
    recovery_attempts: u32,
}

impl Kernel {
    /// Builds the kernel: platform timing, task pool, GPU targets, light
    /// pool, pass manager, default scene, input. Fails with the error
    /// codes of the configuration/GPU taxonomy.
    pub fn init(
        config: Configuration,
        mut backend: Box<dyn RenderBackend>,
        shader_compiler: Box<dyn ShaderCompiler + Send>,
    ) -> Result<Self> {
        config.validate()?;
        info!("kernel init: backend '{}'", backend.name());

        let task_pool = TaskPool::with_thread_budget(config.runtime.max_worker_threads);
        let mut targets = RenderTargetPool::new();

        let [width, height] = config.runtime.resolution;
        let (screen_target, shadow_target, oit_target) =
            create_standard_targets(&mut targets, backend.as_mut(), &config, width, height)?;

        let mut shaders = ShaderRegistry::new();
        let mut shader_queue = ShaderComputeQueue::new(
            8,
            "cache/shaders",
            config.debug.use_shader_text_cache,
            config.debug.use_shader_binary_cache,
        );

        let lights = LightPool::new(backend.as_mut());
        let mut pass_manager =
            RenderPassManager::new(&mut shaders, shadow_target.id, Some(oit_target.id));
        pass_manager.add_pass(
            backend.as_mut(),
            "display",
            10,
            RenderStage::Display,
            screen_target.id,
        )?;
        for handle in pass_manager.internal_programs() {
            shader_queue.submit(&mut shaders, handle);
        }

        let default_program = shaders.get_or_request(default_lit_program());
        shader_queue.submit(&mut shaders, default_program);

        // Default scene: a sky dome and the primary camera.
        let mut graph = SceneGraph::new();
        let sky = graph.add_child(
            graph.root(),
            NodeDescriptor::new("sky")
                .with_payload(SceneNodePayload::Sky)
                .with_cull_exclusion(crate::scene::node::CullExclusion::SHADOW),
        )?;
        if let Some(rendering) = graph.components.rendering.get_mut(sky) {
            rendering.material.bake_state_hash(RenderStage::Display);
            rendering.material.set_program(RenderStage::Display, default_program);
        }

        let mut camera = Camera::new_perspective(
            config.runtime.vertical_fov,
            width as f32 / height as f32,
            0.1,
            config.runtime.camera_view_distance,
        );
        camera.set_eye(Vec3::new(0.0, 2.0, 5.0));
        camera.update();

        let tick_us = US_PER_SECOND / u64::from(config.runtime.ticks_per_second);
        let limiter = FrameRateLimiter::new(if config.runtime.enable_vsync {
            0
        } else {
            config.runtime.frame_rate_limit
        });

        let engine = Engine {
            task_pool,
            backend,
            cache: ResourceCache::new(),
            targets,
            shaders,
            shader_queue,
            shader_compiler,
            lights,
            pass_manager,
            graph,
            systems: SystemRegistry::standard(),
            camera,
            input_queue: InputQueue::new(),
            scene_input: SceneInput::new(),
            extra_consumers: Vec::new(),
            ai: AiManager::new(30),
            listeners: FrameListenerRegistry::new(),
            profile: FrameProfile::new(),
            default_program,
            screen_target,
            shadow_target,
            oit_target,
            config,
        };

        Ok(Self {
            engine,
            timer: Timer::new(),
            limiter,
            accumulator_us: 0,
            tick_us,
            interpolation_factor: 0.0,
            frame_count: 0,
            quit_requested: false,
            recovery_attempts: 0,
        })
    }

    /// `accumulator / TICK_US` at the last render.
    #[must_use]
    pub fn interpolation_factor(&self) -> f32 {
        self.interpolation_factor
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Requests a clean exit after the current frame.
    pub fn request_quit(&mut self) {
        self.quit_requested = true;
    }

    fn event_args(&self, delta_us: u64) -> FrameEventArgs {
        FrameEventArgs {
            frame_count: self.frame_count,
            interpolation_factor: self.interpolation_factor,
            delta_us,
        }
    }

    /// One iteration of the loop.
    pub fn run_one_frame(&mut self) -> Result<FrameAdvance> {
        if self.quit_requested {
            return Ok(FrameAdvance::Quit);
        }

        self.limiter.frame_started();
        self.timer.tick();
        let delta_us = self.timer.delta_us();
        self.accumulator_us = (self.accumulator_us + delta_us).min(self.tick_us * 10);
        self.frame_count += 1;

        // Frame start: a veto aborts the frame, cleanly discarding any
        // partially accumulated state.
        if !self
            .engine
            .listeners
            .emit(FrameEvent::Started, &self.event_args(delta_us))
        {
            warn!("frame {} aborted by listener veto", self.frame_count);
            self.accumulator_us = 0;
            return Ok(FrameAdvance::Continue);
        }

        // Drain deferred deletions and finished background loads.
        self.engine.graph.frame_started();
        self.engine.cache.drain_completions();

        // Input: scene first, then GUI/editor layers; first consumer wins.
        self.engine.scene_input.start_frame();
        {
            let mut consumers: Vec<&mut dyn InputConsumer> =
                vec![&mut self.engine.scene_input];
            for consumer in &mut self.engine.extra_consumers {
                consumers.push(consumer.as_mut());
            }
            dispatch_queue(&mut self.engine.input_queue, &mut consumers);
        }

        // Fixed-timestep logic update.
        let mut steps = 0u32;
        while self.accumulator_us >= self.tick_us && steps < MAX_FRAMESKIP {
            let dt_seconds = self.tick_us as f32 / US_PER_SECOND as f32;
            self.engine
                .systems
                .run_update(&mut self.engine.graph, dt_seconds);
            // Apply steering results computed by the AI thread, then
            // publish this tick's elapsed time to it.
            for update in self.engine.ai.poll_updates() {
                if let Some(node) = self.engine.graph.find_by_guid(update.agent)
                    && let Some(transform) =
                        self.engine.graph.components.transforms.get_mut(node)
                {
                    transform.set_position(update.position);
                }
            }
            self.engine.ai.publish_elapsed(self.tick_us);
            self.accumulator_us -= self.tick_us;
            steps += 1;
        }
        self.interpolation_factor = self.accumulator_us as f32 / self.tick_us as f32;

        self.engine
            .listeners
            .emit(FrameEvent::Process, &self.event_args(delta_us));

        // Pre-render: lighting, env probes, shader compiles.
        self.engine
            .listeners
            .emit(FrameEvent::PreRenderStart, &self.event_args(delta_us));
        self.engine.camera.update();
        let shadow_cfg = &self.engine.config.rendering.shadow_mapping;
        let light_upload = self.engine.lights.prepare_frame(
            &mut self.engine.graph,
            &self.engine.camera,
            shadow_cfg.csm.shadow_map_resolution,
            shadow_cfg.enabled.0,
            self.engine.backend.as_mut(),
        );
        if let Err(err) = light_upload {
            if self.engine.backend.is_device_lost() {
                return self.recover_device();
            }
            error!("light buffer upload failed: {err}");
        }
        self.engine.shader_queue.process_frame(
            &mut self.engine.shaders,
            self.engine.shader_compiler.as_mut(),
        );
        self.engine
            .shader_queue
            .process_deferred(&mut self.engine.shaders);
        self.engine
            .listeners
            .emit(FrameEvent::PreRenderEnd, &self.event_args(delta_us));

        // Scene render.
        self.engine
            .listeners
            .emit(FrameEvent::SceneRenderStart, &self.event_args(delta_us));
        let render_result = {
            let lod = self.engine.config.rendering.lod_thresholds;
            let view_distance = self.engine.config.runtime.camera_view_distance;
            let mut ctx = FrameContext {
                graph: &mut self.engine.graph,
                camera: &self.engine.camera,
                backend: self.engine.backend.as_mut(),
                targets: &mut self.engine.targets,
                lights: &mut self.engine.lights,
                shaders: &mut self.engine.shaders,
                pool: &self.engine.task_pool,
                lod_thresholds: lod,
                view_distance,
                oit_enabled: true,
                occlusion_culling: false,
            };
            self.engine.pass_manager.render_frame(&mut ctx)
        };

        if let Err(err) = render_result {
            if self.engine.backend.is_device_lost() {
                return self.recover_device();
            }
            error!("frame render failed: {err}");
        } else {
            self.recovery_attempts = 0;
        }

        // Post-render and present.
        self.engine
            .listeners
            .emit(FrameEvent::PostRenderStart, &self.event_args(delta_us));
        self.engine
            .listeners
            .emit(FrameEvent::PostRenderEnd, &self.event_args(delta_us));

        self.engine.backend.end_frame();
        self.engine
            .listeners
            .emit(FrameEvent::Ended, &self.event_args(delta_us));
        self.engine.profile.update();
        self.limiter.wait_for_budget();

        if self.quit_requested {
            Ok(FrameAdvance::Quit)
        } else {
            Ok(FrameAdvance::Continue)
        }
    }

    /// Context-lost path: rebuild the device and GPU-side resources from
    /// the cache; after three failed attempts, quit.
    fn recover_device(&mut self) -> Result<FrameAdvance> {
        self.recovery_attempts += 1;
        warn!(
            "GPU device lost; recovery attempt {}/3",
            self.recovery_attempts
        );
        if self.recovery_attempts > 3 {
            return Err(DivideError::GfxDeviceLost { attempts: 3 });
        }
        if !self.engine.backend.try_recover() {
            return Ok(FrameAdvance::Continue); // retried next frame
        }

        // Recreate GPU-side objects; CPU-side caches survive.
        let config = self.engine.config.clone();
        let [width, height] = config.runtime.resolution;
        self.engine.targets = RenderTargetPool::new();
        let (screen, shadow, oit) = create_standard_targets(
            &mut self.engine.targets,
            self.engine.backend.as_mut(),
            &config,
            width,
            height,
        )?;
        self.engine.screen_target = screen;
        self.engine.shadow_target = shadow;
        self.engine.oit_target = oit;
        self.engine.lights = LightPool::new(self.engine.backend.as_mut());
        self.engine.pass_manager =
            RenderPassManager::new(&mut self.engine.shaders, shadow.id, Some(oit.id));
        self.engine.pass_manager.add_pass(
            self.engine.backend.as_mut(),
            "display",
            10,
            RenderStage::Display,
            screen.id,
        )?;
        info!("device recovered; GPU resources rebuilt");
        Ok(FrameAdvance::Continue)
    }

    /// Drains queues, unloads the scene, and tears down subsystems in
    /// reverse initialisation order.
    pub fn shutdown(&mut self) {
        info!("kernel shutdown");
        self.engine.ai.shutdown(Duration::from_secs(30));
        self.engine.cache.drain_completions();
        // Scene goes before the GPU objects that render it.
        self.engine.graph = SceneGraph::new();
        self.engine.cache.purge_expired();
        let screen = self.engine.screen_target.id;
        let shadow = self.engine.shadow_target.id;
        let oit = self.engine.oit_target.id;
        for id in [oit, shadow, screen] {
            self.engine
                .targets
                .deallocate(self.engine.backend.as_mut(), id);
        }
        self.quit_requested = true;
    }
}

fn default_lit_program() -> ShaderProgramDescriptor {
    let mut descriptor = ShaderProgramDescriptor::new("default_lit");
    for (stage, tag) in [(ShaderStage::Vertex, "vert"), (ShaderStage::Fragment, "frag")] {
        descriptor.modules.push(ShaderModuleDescriptor {
            stage,
            entry_point: "main".to_string(),
            source: format!("// builtin {tag} stage: default_lit"),
            variant: 0,
        });
    }
    descriptor
}

fn create_standard_targets(
    targets: &mut RenderTargetPool,
    backend: &mut dyn RenderBackend,
    config: &Configuration,
    width: u32,
    height: u32,
) -> Result<(RenderTargetHandle, RenderTargetHandle, RenderTargetHandle)> {
    let mut screen_desc = RenderTargetDescriptor::new("screen", width, height);
    screen_desc.msaa_samples = config.rendering.msaa_samples as u8;
    screen_desc
        .colour_attachments
        .push(AttachmentDescriptor::colour(PixelFormat::Rgba8));
    screen_desc.depth_attachment = Some(AttachmentDescriptor::depth(PixelFormat::Depth32F));
    let screen = targets
        .allocate(backend, RenderTargetUsage::Screen, screen_desc)
        .map_err(|err| DivideError::GfxInit(err.to_string()))?;

    let shadow_resolution = config.rendering.shadow_mapping.csm.shadow_map_resolution;
    let mut shadow_desc =
        RenderTargetDescriptor::new("shadow_atlas", shadow_resolution, shadow_resolution);
    shadow_desc.layer_count = SHADOW_ATLAS_SLICES;
    shadow_desc.depth_attachment = Some(AttachmentDescriptor::depth(PixelFormat::Depth32F));
    let shadow = targets
        .allocate(backend, RenderTargetUsage::Shadow, shadow_desc)
        .map_err(|err| DivideError::GfxInit(err.to_string()))?;

    let mut oit_desc = RenderTargetDescriptor::new("oit", width, height);
    oit_desc
        .colour_attachments
        .push(AttachmentDescriptor::colour(PixelFormat::Rgba16F));
    oit_desc
        .colour_attachments
        .push(AttachmentDescriptor::colour(PixelFormat::R16F));
    oit_desc.depth_attachment = Some(AttachmentDescriptor::depth(PixelFormat::Depth32F));
    let oit = targets
        .allocate(backend, RenderTargetUsage::Oit, oit_desc)
        .map_err(|err| DivideError::GfxInit(err.to_string()))?;

    Ok((screen, shadow, oit))
}
