//! Command Buffers
//!
//! Rendering work is recorded into a typed command list instead of driving
//! the GPU directly. Recording is cheap and thread-friendly (one buffer
//! per pass); buffers are validated, cleaned, and batched before
//! submission, and replaying a batched buffer against a conforming backend
//! is pixel-identical to replaying the original.
//!
//! Buffers come from a [`CommandBufferPool`]; the scoped handle returns the
//! (cleared) buffer to the pool on drop.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec4};
use smallvec::SmallVec;

use crate::errors::{DivideError, Result};
use crate::renderer::backend::{BufferHandle, TextureHandle};
use crate::renderer::descriptor_set::DescriptorSet;
use crate::renderer::pipeline::PipelineId;
use crate::renderer::target::{RenderTargetId, RtDrawDescriptor};

bitflags! {
    /// Resource categories flushed by a `MemoryBarrier`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BarrierMask: u8 {
        const BUFFER         = 1 << 0;
        const TEXTURE        = 1 << 1;
        const SHADER_IMAGE   = 1 << 2;
        const ATOMIC_COUNTER = 1 << 3;
        const SHADER_STORAGE = 1 << 4;
    }
}

/// Blend factors for `SetBlend` and OIT sub-passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
}

/// Per-attachment blend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub enabled: bool,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendState {
    pub const DISABLED: Self = Self {
        enabled: false,
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
    };

    #[must_use]
    pub fn new(src_factor: BlendFactor, dst_factor: BlendFactor) -> Self {
        Self {
            enabled: true,
            src_factor,
            dst_factor,
        }
    }
}

/// A viewport or scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Indirect draw parameters, GPU-layout compatible. `base_instance`
/// doubles as the index of the draw's `NodeData` entry in the per-pass
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
    /// Geometry source; draws only merge within one buffer.
    pub source_buffer: BufferHandle,
}

impl DrawCommand {
    #[must_use]
    pub fn instanced(count: u32, base_instance: u32, source_buffer: BufferHandle) -> Self {
        Self {
            count,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            base_instance,
            source_buffer,
        }
    }

    fn same_geometry(&self, other: &Self) -> bool {
        self.count == other.count
            && self.first_index == other.first_index
            && self.base_vertex == other.base_vertex
            && self.source_buffer == other.source_buffer
    }

    /// Draws merge when they share geometry and their instance ranges are
    /// contiguous (or identical, for repeated draws of the same instance).
    fn try_merge(&mut self, other: &Self) -> bool {
        if !self.same_geometry(other) {
            return false;
        }
        if other.base_instance == self.base_instance + self.instance_count
            || other.base_instance == self.base_instance
        {
            self.instance_count += other.instance_count;
            return true;
        }
        false
    }
}

/// The closed command set.
#[derive(Debug, Clone, PartialEq)]
pub enum GfxCommand {
    BindPipeline { pipeline: PipelineId },
    BindDescriptorSets { set: DescriptorSet },
    SendPushConstants { data: SmallVec<[u8; 64]> },
    Draw { draw: DrawCommand },
    BeginRenderPass {
        target: RenderTargetId,
        descriptor: RtDrawDescriptor,
        name: String,
    },
    EndRenderPass,
    BeginRenderSubPass { index: u8 },
    EndRenderSubPass,
    SetViewport { rect: Rect },
    PushViewport { rect: Rect },
    PopViewport,
    SetScissor { rect: Rect },
    SetBlend { attachment: u8, blend: BlendState },
    SetCamera { view: Mat4, projection: Mat4 },
    PushCamera { view: Mat4, projection: Mat4 },
    PopCamera,
    SetClipPlanes { planes: SmallVec<[Vec4; 6]> },
    ClearRT {
        target: RenderTargetId,
        descriptor: RtDrawDescriptor,
    },
    ResetRT { target: RenderTargetId },
    BlitRT {
        source: RenderTargetId,
        destination: RenderTargetId,
        layer: u16,
    },
    CopyTexture {
        source: TextureHandle,
        destination: TextureHandle,
        source_mip: u8,
        destination_mip: u8,
        layer: u16,
    },
    SetMipLevels {
        texture: TextureHandle,
        base: u8,
        count: u8,
    },
    ComputeMipMaps {
        texture: TextureHandle,
        deferred: bool,
    },
    DispatchCompute {
        pipeline: PipelineId,
        groups: [u32; 3],
    },
    MemoryBarrier { mask: BarrierMask },
    ReadBufferData {
        buffer: BufferHandle,
        offset: u32,
        length: u32,
    },
    ClearBufferData {
        buffer: BufferHandle,
        offset: u32,
        length: u32,
    },
    BeginDebugScope { name: String },
    EndDebugScope,
    DrawText { text: String, position: Vec2 },
    DrawImgui { vertex_count: u32 },
    SwitchWindow { index: u32 },
    SetClippingState {
        lower_left_origin: bool,
        negative_one_to_one: bool,
    },
    /// Opaque external hook dispatched by id.
    External { token: u64 },
}

impl GfxCommand {
    /// Commands that draws must not be reordered across.
    fn is_batch_boundary(&self) -> bool {
        !matches!(
            self,
            Self::BindPipeline { .. } | Self::BindDescriptorSets { .. } | Self::Draw { .. }
        )
    }

    fn one_line(&self) -> String {
        match self {
            Self::BindPipeline { pipeline } => format!("BindPipeline({})", pipeline.index()),
            Self::BindDescriptorSets { set } => {
                format!("BindDescriptorSets({} bindings)", set.bindings().len())
            }
            Self::SendPushConstants { data } => format!("SendPushConstants({} bytes)", data.len()),
            Self::Draw { draw } => format!(
                "Draw(count={}, instances={}, base={})",
                draw.count, draw.instance_count, draw.base_instance
            ),
            Self::BeginRenderPass { target, name, .. } => {
                format!("BeginRenderPass({target}, '{name}')")
            }
            Self::EndRenderPass => "EndRenderPass".to_string(),
            Self::BeginRenderSubPass { index } => format!("BeginRenderSubPass({index})"),
            Self::EndRenderSubPass => "EndRenderSubPass".to_string(),
            Self::SetViewport { rect } => format!("SetViewport({}x{})", rect.width, rect.height),
            Self::PushViewport { rect } => format!("PushViewport({}x{})", rect.width, rect.height),
            Self::PopViewport => "PopViewport".to_string(),
            Self::SetScissor { rect } => format!("SetScissor({}x{})", rect.width, rect.height),
            Self::SetBlend { attachment, blend } => {
                format!("SetBlend(att={attachment}, enabled={})", blend.enabled)
            }
            Self::SetCamera { .. } => "SetCamera".to_string(),
            Self::PushCamera { .. } => "PushCamera".to_string(),
            Self::PopCamera => "PopCamera".to_string(),
            Self::SetClipPlanes { planes } => format!("SetClipPlanes({})", planes.len()),
            Self::ClearRT { target, .. } => format!("ClearRT({target})"),
            Self::ResetRT { target } => format!("ResetRT({target})"),
            Self::BlitRT {
                source,
                destination,
                layer,
            } => format!("BlitRT({source} -> {destination}, layer {layer})"),
            Self::CopyTexture { .. } => "CopyTexture".to_string(),
            Self::SetMipLevels { base, count, .. } => format!("SetMipLevels({base}..{count})"),
            Self::ComputeMipMaps { deferred, .. } => format!("ComputeMipMaps(deferred={deferred})"),
            Self::DispatchCompute { groups, .. } => {
                format!("DispatchCompute({}x{}x{})", groups[0], groups[1], groups[2])
            }
            Self::MemoryBarrier { mask } => format!("MemoryBarrier({mask:?})"),
            Self::ReadBufferData { length, .. } => format!("ReadBufferData({length} bytes)"),
            Self::ClearBufferData { length, .. } => format!("ClearBufferData({length} bytes)"),
            Self::BeginDebugScope { name } => format!("BeginDebugScope('{name}')"),
            Self::EndDebugScope => "EndDebugScope".to_string(),
            Self::DrawText { text, .. } => format!("DrawText('{text}')"),
            Self::DrawImgui { vertex_count } => format!("DrawImgui({vertex_count} vertices)"),
            Self::SwitchWindow { index } => format!("SwitchWindow({index})"),
            Self::SetClippingState { .. } => "SetClippingState".to_string(),
            Self::External { token } => format!("External({token})"),
        }
    }
}

/// A recorded, replayable list of rendering operations.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandBuffer {
    commands: Vec<GfxCommand>,
}

impl CommandBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, command: GfxCommand) {
        self.commands.push(command);
    }

    /// Concatenates another buffer's commands.
    pub fn add(&mut self, other: &CommandBuffer) {
        self.commands.extend(other.commands.iter().cloned());
    }

    #[must_use]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Drops empty draws and deduplicates redundant `BindPipeline` /
    /// `BindDescriptorSets` against the previous non-redundant one.
    /// Returns the number of commands removed.
    pub fn clean(&mut self) -> usize {
        let before = self.commands.len();
        let mut current_pipeline: Option<PipelineId> = None;
        let mut current_set: Option<DescriptorSet> = None;
        let mut kept = Vec::with_capacity(before);

        for command in self.commands.drain(..) {
            match &command {
                GfxCommand::Draw { draw } => {
                    if draw.count == 0 || draw.instance_count == 0 {
                        continue;
                    }
                }
                GfxCommand::BindPipeline { pipeline } => {
                    if current_pipeline == Some(*pipeline) {
                        continue;
                    }
                    current_pipeline = Some(*pipeline);
                }
                GfxCommand::BindDescriptorSets { set } => {
                    if current_set.as_ref() == Some(set) {
                        continue;
                    }
                    current_set = Some(set.clone());
                }
                // A pass boundary invalidates tracked state.
                GfxCommand::BeginRenderPass { .. } | GfxCommand::EndRenderPass => {
                    current_pipeline = None;
                    current_set = None;
                }
                _ => {}
            }
            kept.push(command);
        }
        self.commands = kept;
        before - self.commands.len()
    }

    /// Reorders and merges draws for minimal state changes: within each run
    /// of bind/draw commands (bounded by any other command), draws are
    /// grouped by (pipeline, descriptor set) in first-appearance order and
    /// compatible draws collapse into instanced draws. Idempotent.
    /// Returns the number of draws merged away.
    pub fn batch(&mut self) -> usize {
        self.clean();

        let mut merged_away = 0;
        let mut output: Vec<GfxCommand> = Vec::with_capacity(self.commands.len());
        let mut emitted_pipeline: Option<PipelineId> = None;
        let mut emitted_set: Option<DescriptorSet> = None;

        // Per-run grouping state.
        let mut run: Vec<(Option<PipelineId>, Option<DescriptorSet>, DrawCommand)> = Vec::new();
        let mut current_pipeline: Option<PipelineId> = None;
        let mut current_set: Option<DescriptorSet> = None;

        fn flush_run(
            run: &mut Vec<(Option<PipelineId>, Option<DescriptorSet>, DrawCommand)>,
            output: &mut Vec<GfxCommand>,
            emitted_pipeline: &mut Option<PipelineId>,
            emitted_set: &mut Option<DescriptorSet>,
            merged_away: &mut usize,
        ) {
            if run.is_empty() {
                return;
            }
            // Group keys in first-appearance order.
            let mut keys: Vec<(Option<PipelineId>, Option<DescriptorSet>)> = Vec::new();
            for (pipeline, set, _) in run.iter() {
                let key = (*pipeline, set.clone());
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            for key in keys {
                let mut merged: Vec<DrawCommand> = Vec::new();
                for (pipeline, set, draw) in run.iter() {
                    if (*pipeline, set) != (key.0, &key.1) {
                        continue;
                    }
                    if let Some(last) = merged.last_mut()
                        && last.try_merge(draw)
                    {
                        *merged_away += 1;
                    } else {
                        merged.push(*draw);
                    }
                }
                if let Some(pipeline) = key.0
                    && *emitted_pipeline != Some(pipeline)
                {
                    output.push(GfxCommand::BindPipeline { pipeline });
                    *emitted_pipeline = Some(pipeline);
                }
                if let Some(set) = key.1
                    && emitted_set.as_ref() != Some(&set)
                {
                    output.push(GfxCommand::BindDescriptorSets { set: set.clone() });
                    *emitted_set = Some(set);
                }
                for draw in merged {
                    output.push(GfxCommand::Draw { draw });
                }
            }
            run.clear();
        }

        for command in std::mem::take(&mut self.commands) {
            match command {
                GfxCommand::BindPipeline { pipeline } => current_pipeline = Some(pipeline),
                GfxCommand::BindDescriptorSets { ref set } => current_set = Some(set.clone()),
                GfxCommand::Draw { draw } => {
                    run.push((current_pipeline, current_set.clone(), draw));
                }
                other => {
                    flush_run(
                        &mut run,
                        &mut output,
                        &mut emitted_pipeline,
                        &mut emitted_set,
                        &mut merged_away,
                    );
                    if other.is_batch_boundary()
                        && matches!(
                            other,
                            GfxCommand::BeginRenderPass { .. } | GfxCommand::EndRenderPass
                        )
                    {
                        emitted_pipeline = None;
                        emitted_set = None;
                        current_pipeline = None;
                        current_set = None;
                    }
                    output.push(other);
                }
            }
        }
        flush_run(
            &mut run,
            &mut output,
            &mut emitted_pipeline,
            &mut emitted_set,
            &mut merged_away,
        );

        self.commands = output;
        merged_away
    }

    /// Structural validation: balanced pass/scope pairs, draws preceded by
    /// a bound pipeline, no nested render passes.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut pass_depth = 0i32;
        let mut subpass_depth = 0i32;
        let mut scope_depth = 0i32;
        let mut pipeline_bound = false;

        for (index, command) in self.commands.iter().enumerate() {
            match command {
                GfxCommand::BeginRenderPass { name, .. } => {
                    if pass_depth > 0 {
                        errors.push(format!("[{index}] nested BeginRenderPass '{name}'"));
                    }
                    pass_depth += 1;
                }
                GfxCommand::EndRenderPass => {
                    pass_depth -= 1;
                    if pass_depth < 0 {
                        errors.push(format!("[{index}] EndRenderPass without Begin"));
                    }
                }
                GfxCommand::BeginRenderSubPass { .. } => subpass_depth += 1,
                GfxCommand::EndRenderSubPass => {
                    subpass_depth -= 1;
                    if subpass_depth < 0 {
                        errors.push(format!("[{index}] EndRenderSubPass without Begin"));
                    }
                }
                GfxCommand::BeginDebugScope { .. } => scope_depth += 1,
                GfxCommand::EndDebugScope => {
                    scope_depth -= 1;
                    if scope_depth < 0 {
                        errors.push(format!("[{index}] EndDebugScope without Begin"));
                    }
                }
                GfxCommand::BindPipeline { .. } => pipeline_bound = true,
                GfxCommand::Draw { .. } => {
                    if !pipeline_bound {
                        errors.push(format!("[{index}] Draw with no pipeline bound"));
                    }
                }
                _ => {}
            }
        }
        if pass_depth != 0 {
            errors.push(format!("unbalanced render passes (depth {pass_depth})"));
        }
        if subpass_depth != 0 {
            errors.push(format!("unbalanced sub-passes (depth {subpass_depth})"));
        }
        if scope_depth != 0 {
            errors.push(format!("unbalanced debug scopes (depth {scope_depth})"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DivideError::CommandBufferInvalid(errors.join("; ")))
        }
    }

    /// Debug dump, one line per command.
    #[must_use]
    pub fn to_string_indented(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let mut out = String::new();
        for (index, command) in self.commands.iter().enumerate() {
            out.push_str(&format!("{pad}[{index:04}] {}\n", command.one_line()));
        }
        out
    }
}

/// Pool of reusable command buffers. Scoped handles return their buffer,
/// cleared, on drop.
#[derive(Default)]
pub struct CommandBufferPool {
    free: parking_lot::Mutex<Vec<CommandBuffer>>,
}

impl CommandBufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a cleared buffer from the pool (or a fresh one).
    pub fn allocate(&self) -> ScopedCommandBuffer<'_> {
        ScopedCommandBuffer {
            pool: self,
            buffer: Some(self.take()),
        }
    }

    /// Borrow-free variant of [`allocate`](Self::allocate): the caller
    /// owns the buffer and must hand it back via [`release`](Self::release).
    #[must_use]
    pub fn take(&self) -> CommandBuffer {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Returns a buffer taken with [`take`](Self::take), cleared.
    pub fn release(&self, mut buffer: CommandBuffer) {
        buffer.clear();
        self.free.lock().push(buffer);
    }

    #[must_use]
    pub fn pooled_count(&self) -> usize {
        self.free.lock().len()
    }
}

/// RAII handle over a pooled command buffer.
pub struct ScopedCommandBuffer<'a> {
    pool: &'a CommandBufferPool,
    buffer: Option<CommandBuffer>,
}

impl std::ops::Deref for ScopedCommandBuffer<'_> {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        self.buffer.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for ScopedCommandBuffer<'_> {
    fn deref_mut(&mut self) -> &mut CommandBuffer {
        self.buffer.as_mut().expect("buffer present until drop")
    }
}

impl Drop for ScopedCommandBuffer<'_> {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.clear();
            self.pool.free.lock().push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(base_instance: u32) -> DrawCommand {
        DrawCommand {
            count: 36,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            base_instance,
            source_buffer: BufferHandle::from_raw(1),
        }
    }

    #[test]
    fn clean_drops_empty_draws_and_redundant_binds() {
        let mut buffer = CommandBuffer::new();
        let pipeline = PipelineId::INVALID;
        buffer.push(GfxCommand::BindPipeline { pipeline });
        buffer.push(GfxCommand::BindPipeline { pipeline });
        buffer.push(GfxCommand::Draw {
            draw: DrawCommand {
                instance_count: 0,
                ..draw(0)
            },
        });
        buffer.push(GfxCommand::Draw { draw: draw(0) });

        let removed = buffer.clean();
        assert_eq!(removed, 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn alternating_pipelines_collapse_to_two_groups() {
        // 100 draws alternating between two pipelines; batch() must reduce
        // to 2 binds + 2 instanced draws covering all 100.
        let mut cache = crate::renderer::pipeline::PipelineCache::new();
        let p0 = cache.get_or_create(&crate::renderer::pipeline::PipelineDescriptor::new(
            1,
            crate::renderer::shader::ShaderProgramHandle::new(1),
        ));
        let p1 = cache.get_or_create(&crate::renderer::pipeline::PipelineDescriptor::new(
            2,
            crate::renderer::shader::ShaderProgramHandle::new(1),
        ));

        let mut buffer = CommandBuffer::new();
        let mut even_instance = 0;
        let mut odd_instance = 0;
        for i in 0..100 {
            let pipeline = if i % 2 == 0 { p0 } else { p1 };
            let base = if i % 2 == 0 {
                let b = even_instance;
                even_instance += 1;
                b
            } else {
                let b = odd_instance;
                odd_instance += 1;
                b
            };
            buffer.push(GfxCommand::BindPipeline { pipeline });
            buffer.push(GfxCommand::Draw { draw: draw(base) });
        }

        buffer.batch();

        let binds: Vec<_> = buffer
            .commands()
            .iter()
            .filter(|c| matches!(c, GfxCommand::BindPipeline { .. }))
            .collect();
        let draws: Vec<_> = buffer
            .commands()
            .iter()
            .filter_map(|c| match c {
                GfxCommand::Draw { draw } => Some(*draw),
                _ => None,
            })
            .collect();
        assert_eq!(binds.len(), 2);
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|d| d.instance_count == 50));
        assert_eq!(draws.iter().map(|d| d.instance_count).sum::<u32>(), 100);
    }

    #[test]
    fn batch_is_idempotent() {
        let mut cache = crate::renderer::pipeline::PipelineCache::new();
        let p = cache.get_or_create(&crate::renderer::pipeline::PipelineDescriptor::new(
            7,
            crate::renderer::shader::ShaderProgramHandle::new(1),
        ));
        let mut buffer = CommandBuffer::new();
        buffer.push(GfxCommand::BeginDebugScope {
            name: "scene".into(),
        });
        for i in 0..10 {
            buffer.push(GfxCommand::BindPipeline { pipeline: p });
            buffer.push(GfxCommand::Draw { draw: draw(i) });
        }
        buffer.push(GfxCommand::EndDebugScope);

        buffer.batch();
        let once = buffer.clone();
        buffer.batch();
        assert_eq!(buffer, once);
    }

    #[test]
    fn draws_do_not_reorder_across_state_commands() {
        let mut cache = crate::renderer::pipeline::PipelineCache::new();
        let p = cache.get_or_create(&crate::renderer::pipeline::PipelineDescriptor::new(
            9,
            crate::renderer::shader::ShaderProgramHandle::new(1),
        ));
        let mut buffer = CommandBuffer::new();
        buffer.push(GfxCommand::BindPipeline { pipeline: p });
        buffer.push(GfxCommand::Draw { draw: draw(0) });
        buffer.push(GfxCommand::SetViewport {
            rect: Rect {
                x: 0,
                y: 0,
                width: 64,
                height: 64,
            },
        });
        buffer.push(GfxCommand::Draw { draw: draw(1) });

        buffer.batch();
        // The viewport change still separates the two draws.
        let positions: Vec<usize> = buffer
            .commands()
            .iter()
            .enumerate()
            .filter_map(|(i, c)| matches!(c, GfxCommand::SetViewport { .. }).then_some(i))
            .collect();
        assert_eq!(positions.len(), 1);
        let draw_positions: Vec<usize> = buffer
            .commands()
            .iter()
            .enumerate()
            .filter_map(|(i, c)| matches!(c, GfxCommand::Draw { .. }).then_some(i))
            .collect();
        assert_eq!(draw_positions.len(), 2);
        assert!(draw_positions[0] < positions[0] && positions[0] < draw_positions[1]);
    }

    #[test]
    fn validation_catches_structural_errors() {
        let mut buffer = CommandBuffer::new();
        buffer.push(GfxCommand::Draw { draw: draw(0) });
        assert!(buffer.validate().is_err()); // draw without pipeline

        let mut buffer = CommandBuffer::new();
        buffer.push(GfxCommand::BeginDebugScope { name: "x".into() });
        assert!(buffer.validate().is_err()); // unbalanced scope

        let mut buffer = CommandBuffer::new();
        buffer.push(GfxCommand::EndRenderPass);
        assert!(buffer.validate().is_err());
    }

    #[test]
    fn empty_buffer_is_valid() {
        assert!(CommandBuffer::new().validate().is_ok());
    }

    #[test]
    fn pool_recycles_buffers() {
        let pool = CommandBufferPool::new();
        {
            let mut buffer = pool.allocate();
            buffer.push(GfxCommand::PopViewport);
            assert_eq!(buffer.len(), 1);
        }
        assert_eq!(pool.pooled_count(), 1);
        let buffer = pool.allocate();
        assert!(buffer.is_empty());
    }
}
