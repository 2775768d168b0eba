//! Abstract GPU Backend
//!
//! The engine never touches a graphics API directly: everything goes
//! through [`RenderBackend`], a coarse-grained trait dispatched once per
//! command during replay. Any modern explicit API (or an older
//! state-machine one) can sit behind it.
//!
//! Ordering guarantees a conforming backend must honour:
//! - Commands within one buffer execute in recorded order.
//! - Buffers submitted in source order keep that order.
//! - `MemoryBarrier` flushes the named resource categories before later
//!   commands observe them.
//!
//! [`NullBackend`] is the headless reference implementation: it allocates
//! real CPU-side buffer storage, tracks redundant-state elision, enforces
//! validation on submit, and records replay statistics that tests assert
//! against.

use std::time::Duration;

use bitflags::bitflags;
use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{DivideError, Result};
use crate::renderer::command::{CommandBuffer, GfxCommand};
use crate::renderer::pipeline::PipelineId;
use crate::renderer::target::RenderTargetId;
use crate::resources::texture::TextureDescriptor;

/// Backend buffer handle. Zero is the sentinel null handle returned on
/// allocation failure; callers must check before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Backend texture handle. Zero is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureHandle(u32);

impl TextureHandle {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Fence handle for frame synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(u64);

bitflags! {
    /// How a buffer will be used.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BufferUsage: u8 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const UNIFORM  = 1 << 2;
        const STORAGE  = 1 << 3;
        const INDIRECT = 1 << 4;
        const STAGING  = 1 << 5;
    }
}

/// Expected write cadence; backends pick memory accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    Once,
    Occasional,
    Often,
}

/// Buffer creation parameters.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub update_frequency: UpdateFrequency,
    pub initial_data: Option<Vec<u8>>,
}

impl BufferDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
            update_frequency: UpdateFrequency::Occasional,
            initial_data: None,
        }
    }
}

/// Replay statistics for one frame, surfaced read-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub draws: u32,
    pub instances: u32,
    pub pipeline_binds: u32,
    pub redundant_binds_elided: u32,
    pub descriptor_binds: u32,
    pub dispatches: u32,
    pub barriers: u32,
    pub passes_begun: u32,
    pub buffers_submitted: u32,
}

/// The abstract device the engine drives.
pub trait RenderBackend: Send {
    fn name(&self) -> &str;

    // ── Buffers ────────────────────────────────────────────────────────
    /// Returns [`BufferHandle::NULL`] on allocation failure.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> BufferHandle;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, dest: &mut [u8]) -> Result<()>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // ── Textures ───────────────────────────────────────────────────────
    /// Returns [`TextureHandle::NULL`] on allocation failure.
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> TextureHandle;
    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        layer: u32,
        data: &[u8],
    ) -> Result<()>;
    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32);
    fn destroy_texture(&mut self, texture: TextureHandle);

    // ── Submission ─────────────────────────────────────────────────────
    /// Validates, then walks entries dispatching to the device. Buffers
    /// submitted in call order execute in that order.
    fn flush_command_buffer(&mut self, buffer: &CommandBuffer) -> Result<()>;

    // ── Sync ───────────────────────────────────────────────────────────
    fn create_fence(&mut self) -> FenceHandle;
    /// Returns false on timeout.
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> bool;
    /// End-of-frame: signals all fences created this frame.
    fn end_frame(&mut self);

    /// Statistics for the frame being recorded.
    fn stats(&self) -> ReplayStats;

    /// True when the device was lost and needs a rebuild.
    fn is_device_lost(&self) -> bool {
        false
    }

    /// Attempts to rebuild a lost device. All device resources are gone
    /// afterwards; the caller re-uploads from its caches. Returns false
    /// when the device is still unavailable.
    fn try_recover(&mut self) -> bool {
        false
    }
}

struct NullBuffer {
    storage: Vec<u8>,
}

/// Headless reference backend.
///
/// Tracks enough state to make replay observable: per-target writes
/// (including layers), redundant pipeline-bind elision in the style of a
/// state-tracked pass, and a strict ordering check on barriers.
pub struct NullBackend {
    buffers: FxHashMap<u32, NullBuffer>,
    textures: FxHashMap<u32, TextureDescriptor>,
    next_buffer: u32,
    next_texture: u32,
    next_fence: u64,
    pending_fences: FxHashSet<u64>,
    signalled_fences: FxHashSet<u64>,

    stats: ReplayStats,
    /// `(target, layer)` pairs written this frame, in order.
    pub targets_written: Vec<(RenderTargetId, u16)>,
    /// Simulated allocation failures for OOM tests.
    fail_next_allocations: u32,
    device_lost: bool,

    // Replay state.
    bound_pipeline: Option<PipelineId>,
    current_target: Option<(RenderTargetId, u16)>,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            next_buffer: 1,
            next_texture: 1,
            next_fence: 1,
            pending_fences: FxHashSet::default(),
            signalled_fences: FxHashSet::default(),
            stats: ReplayStats::default(),
            targets_written: Vec::new(),
            fail_next_allocations: 0,
            device_lost: false,
            bound_pipeline: None,
            current_target: None,
        }
    }

    /// Makes the next `count` allocations fail with a null handle.
    pub fn fail_allocations(&mut self, count: u32) {
        self.fail_next_allocations = count;
    }

    /// Simulates a context loss; `is_device_lost` reports it until reset.
    pub fn lose_device(&mut self) {
        self.device_lost = true;
    }

    /// Recreates the device after a loss. Resources must be re-uploaded.
    pub fn recover_device(&mut self) {
        self.device_lost = false;
        self.buffers.clear();
        self.textures.clear();
        self.bound_pipeline = None;
        self.current_target = None;
    }

    /// Clears per-frame replay records. Tests call this between frames.
    pub fn reset_frame_stats(&mut self) {
        self.stats = ReplayStats::default();
        self.targets_written.clear();
    }

    fn take_allocation_failure(&mut self) -> bool {
        if self.fail_next_allocations > 0 {
            self.fail_next_allocations -= 1;
            return true;
        }
        false
    }

    fn replay(&mut self, command: &GfxCommand) {
        match command {
            GfxCommand::BindPipeline { pipeline } => {
                if self.bound_pipeline == Some(*pipeline) {
                    self.stats.redundant_binds_elided += 1;
                } else {
                    self.bound_pipeline = Some(*pipeline);
                    self.stats.pipeline_binds += 1;
                }
            }
            GfxCommand::BindDescriptorSets { .. } => {
                self.stats.descriptor_binds += 1;
            }
            GfxCommand::Draw { draw } => {
                self.stats.draws += 1;
                self.stats.instances += draw.instance_count;
                if let Some(written) = self.current_target {
                    self.targets_written.push(written);
                }
            }
            GfxCommand::BeginRenderPass {
                target, descriptor, ..
            } => {
                self.stats.passes_begun += 1;
                self.current_target = Some((*target, descriptor.layer.unwrap_or(0)));
                self.bound_pipeline = None;
            }
            GfxCommand::EndRenderPass => {
                self.current_target = None;
                self.bound_pipeline = None;
            }
            GfxCommand::DispatchCompute { .. } => {
                self.stats.dispatches += 1;
            }
            GfxCommand::MemoryBarrier { .. } => {
                self.stats.barriers += 1;
            }
            GfxCommand::ClearBufferData {
                buffer,
                offset,
                length,
            } => {
                if let Some(slot) = self.buffers.get_mut(&buffer.0) {
                    let start = *offset as usize;
                    let end = (start + *length as usize).min(slot.storage.len());
                    if start < end {
                        slot.storage[start..end].fill(0);
                    }
                }
            }
            _ => {}
        }
    }
}

impl RenderBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> BufferHandle {
        if self.take_allocation_failure() {
            warn!("buffer allocation '{}' failed (simulated OOM)", descriptor.name);
            return BufferHandle::NULL;
        }
        let handle = self.next_buffer;
        self.next_buffer += 1;
        let mut storage = vec![0u8; descriptor.size as usize];
        if let Some(initial) = &descriptor.initial_data {
            let len = initial.len().min(storage.len());
            storage[..len].copy_from_slice(&initial[..len]);
        }
        self.buffers.insert(handle, NullBuffer { storage });
        BufferHandle::from_raw(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let slot = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| DivideError::SubmitFailed("write to unknown buffer".into()))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > slot.storage.len() {
            return Err(DivideError::SubmitFailed(format!(
                "buffer write out of range ({end} > {})",
                slot.storage.len()
            )));
        }
        slot.storage[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, dest: &mut [u8]) -> Result<()> {
        let slot = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| DivideError::SubmitFailed("read from unknown buffer".into()))?;
        let start = offset as usize;
        let end = start + dest.len();
        if end > slot.storage.len() {
            return Err(DivideError::SubmitFailed("buffer read out of range".into()));
        }
        dest.copy_from_slice(&slot.storage[start..end]);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> TextureHandle {
        if self.take_allocation_failure() {
            warn!("texture allocation failed (simulated OOM)");
            return TextureHandle::NULL;
        }
        let handle = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(handle, descriptor.clone());
        TextureHandle::from_raw(handle)
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        _mip: u32,
        _layer: u32,
        _data: &[u8],
    ) -> Result<()> {
        if texture.is_null() {
            return Err(DivideError::SubmitFailed("upload to null texture".into()));
        }
        Ok(())
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) {
        if let Some(descriptor) = self.textures.get_mut(&texture.0) {
            descriptor.width = width;
            descriptor.height = height;
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn flush_command_buffer(&mut self, buffer: &CommandBuffer) -> Result<()> {
        if self.device_lost {
            return Err(DivideError::SubmitFailed("device lost".into()));
        }
        buffer.validate()?;
        self.stats.buffers_submitted += 1;
        for command in buffer.commands() {
            self.replay(command);
        }
        Ok(())
    }

    fn create_fence(&mut self) -> FenceHandle {
        let fence = self.next_fence;
        self.next_fence += 1;
        self.pending_fences.insert(fence);
        FenceHandle(fence)
    }

    fn wait_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> bool {
        self.signalled_fences.contains(&fence.0)
    }

    fn end_frame(&mut self) {
        for fence in self.pending_fences.drain() {
            self.signalled_fences.insert(fence);
        }
        self.bound_pipeline = None;
        self.current_target = None;
    }

    fn stats(&self) -> ReplayStats {
        self.stats
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    fn try_recover(&mut self) -> bool {
        self.recover_device();
        true
    }
}
