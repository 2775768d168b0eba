//! Render Target Pool
//!
//! Offscreen targets are addressed by purpose, not by address: a
//! [`RenderTargetId`] is a `(usage, index)` pair that stays stable for the
//! life of the allocation. The pool owns the targets; callers hold
//! non-owning ids and go through the pool for every access. Layered and
//! cube targets track a per-layer dirty set so blits and reads can skip
//! stale layers.

use bitflags::bitflags;
use log::warn;
use smallvec::SmallVec;

use crate::errors::{DivideError, Result};
use crate::renderer::backend::{RenderBackend, TextureHandle};
use crate::resources::texture::{PixelFormat, SamplerDescriptor, TextureDescriptor, TextureType};

/// What a target is for. Part of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTargetUsage {
    Screen,
    Editor,
    Shadow,
    ReflectionPlanar,
    ReflectionCube,
    RefractionPlanar,
    RefractionCube,
    HiZ,
    Oit,
    Environment,
    Other,
}

/// Stable, non-owning handle: `(usage, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId {
    pub usage: RenderTargetUsage,
    pub index: u16,
}

impl std::fmt::Display for RenderTargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.usage, self.index)
    }
}

/// One attachment: format plus its clear value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    pub format: PixelFormat,
    pub clear_colour: [f32; 4],
    pub clear_depth: f32,
}

impl AttachmentDescriptor {
    #[must_use]
    pub fn colour(format: PixelFormat) -> Self {
        Self {
            format,
            clear_colour: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
        }
    }

    #[must_use]
    pub fn depth(format: PixelFormat) -> Self {
        Self {
            format,
            clear_colour: [0.0; 4],
            clear_depth: 1.0,
        }
    }
}

/// Creation parameters for an offscreen target.
#[derive(Debug, Clone)]
pub struct RenderTargetDescriptor {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub msaa_samples: u8,
    pub layer_count: u32,
    pub colour_attachments: SmallVec<[AttachmentDescriptor; 4]>,
    pub depth_attachment: Option<AttachmentDescriptor>,
}

impl RenderTargetDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            msaa_samples: 0,
            layer_count: 1,
            colour_attachments: SmallVec::new(),
            depth_attachment: None,
        }
    }
}

bitflags! {
    /// What a draw against a target is allowed to change.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RtStateMask: u8 {
        const CLEAR_COLOUR    = 1 << 0;
        const CLEAR_DEPTH     = 1 << 1;
        const CHANGE_VIEWPORT = 1 << 2;
    }
}

/// Per-draw target configuration: which colour attachments are enabled,
/// which get cleared, and whether the viewport follows the target.
#[derive(Debug, Clone, PartialEq)]
pub struct RtDrawDescriptor {
    /// Bit `i` enables colour attachment `i`.
    pub enabled_attachments: u8,
    pub state: RtStateMask,
    /// Restrict the draw to one layer of a layered/cube target.
    pub layer: Option<u16>,
    pub mip: u8,
}

impl Default for RtDrawDescriptor {
    /// Default policy: everything enabled, everything cleared.
    fn default() -> Self {
        Self {
            enabled_attachments: u8::MAX,
            state: RtStateMask::CLEAR_COLOUR
                | RtStateMask::CLEAR_DEPTH
                | RtStateMask::CHANGE_VIEWPORT,
            layer: None,
            mip: 0,
        }
    }
}

/// An allocated offscreen target.
pub struct RenderTarget {
    pub descriptor: RenderTargetDescriptor,
    pub colour_textures: SmallVec<[TextureHandle; 4]>,
    pub depth_texture: Option<TextureHandle>,
    /// Layers written since the last consumption; blits/reads intersect
    /// against this to avoid sampling stale layers.
    dirty_layers: Vec<bool>,
}

impl RenderTarget {
    #[inline]
    #[must_use]
    pub fn has_depth(&self) -> bool {
        self.depth_texture.is_some()
    }

    pub fn mark_layer_dirty(&mut self, layer: u16) {
        if let Some(flag) = self.dirty_layers.get_mut(layer as usize) {
            *flag = true;
        }
    }

    pub fn clear_layer_dirty(&mut self, layer: u16) {
        if let Some(flag) = self.dirty_layers.get_mut(layer as usize) {
            *flag = false;
        }
    }

    #[must_use]
    pub fn is_layer_dirty(&self, layer: u16) -> bool {
        self.dirty_layers.get(layer as usize).copied().unwrap_or(false)
    }

    /// Indices of all dirty layers.
    #[must_use]
    pub fn dirty_layers(&self) -> Vec<u16> {
        self.dirty_layers
            .iter()
            .enumerate()
            .filter_map(|(i, &dirty)| dirty.then_some(i as u16))
            .collect()
    }
}

/// Non-owning handle returned by allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetHandle {
    pub id: RenderTargetId,
}

/// Owner of all offscreen targets.
#[derive(Default)]
pub struct RenderTargetPool {
    /// Slot vectors per usage; `None` marks a deallocated slot whose index
    /// is never reused (ids stay unambiguous).
    screen: Vec<Option<RenderTarget>>,
    editor: Vec<Option<RenderTarget>>,
    shadow: Vec<Option<RenderTarget>>,
    reflection_planar: Vec<Option<RenderTarget>>,
    reflection_cube: Vec<Option<RenderTarget>>,
    refraction_planar: Vec<Option<RenderTarget>>,
    refraction_cube: Vec<Option<RenderTarget>>,
    hi_z: Vec<Option<RenderTarget>>,
    oit: Vec<Option<RenderTarget>>,
    environment: Vec<Option<RenderTarget>>,
    other: Vec<Option<RenderTarget>>,
    /// Draw-to stack: `drawToTargetBegin` pushes, `End` pops.
    bind_stack: Vec<RenderTargetId>,
}

impl RenderTargetPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, usage: RenderTargetUsage) -> &Vec<Option<RenderTarget>> {
        match usage {
            RenderTargetUsage::Screen => &self.screen,
            RenderTargetUsage::Editor => &self.editor,
            RenderTargetUsage::Shadow => &self.shadow,
            RenderTargetUsage::ReflectionPlanar => &self.reflection_planar,
            RenderTargetUsage::ReflectionCube => &self.reflection_cube,
            RenderTargetUsage::RefractionPlanar => &self.refraction_planar,
            RenderTargetUsage::RefractionCube => &self.refraction_cube,
            RenderTargetUsage::HiZ => &self.hi_z,
            RenderTargetUsage::Oit => &self.oit,
            RenderTargetUsage::Environment => &self.environment,
            RenderTargetUsage::Other => &self.other,
        }
    }

    fn bucket_mut(&mut self, usage: RenderTargetUsage) -> &mut Vec<Option<RenderTarget>> {
        match usage {
            RenderTargetUsage::Screen => &mut self.screen,
            RenderTargetUsage::Editor => &mut self.editor,
            RenderTargetUsage::Shadow => &mut self.shadow,
            RenderTargetUsage::ReflectionPlanar => &mut self.reflection_planar,
            RenderTargetUsage::ReflectionCube => &mut self.reflection_cube,
            RenderTargetUsage::RefractionPlanar => &mut self.refraction_planar,
            RenderTargetUsage::RefractionCube => &mut self.refraction_cube,
            RenderTargetUsage::HiZ => &mut self.hi_z,
            RenderTargetUsage::Oit => &mut self.oit,
            RenderTargetUsage::Environment => &mut self.environment,
            RenderTargetUsage::Other => &mut self.other,
        }
    }

    /// Allocates a target, creating attachment textures on the backend.
    pub fn allocate(
        &mut self,
        backend: &mut dyn RenderBackend,
        usage: RenderTargetUsage,
        descriptor: RenderTargetDescriptor,
    ) -> Result<RenderTargetHandle> {
        let mut colour_textures = SmallVec::new();
        for attachment in &descriptor.colour_attachments {
            let texture = backend.create_texture(&attachment_texture(&descriptor, attachment));
            if texture.is_null() {
                return Err(DivideError::OutOfMemory(format!(
                    "colour attachment for target '{}'",
                    descriptor.name
                )));
            }
            colour_textures.push(texture);
        }
        let depth_texture = match &descriptor.depth_attachment {
            Some(attachment) => {
                let texture = backend.create_texture(&attachment_texture(&descriptor, attachment));
                if texture.is_null() {
                    return Err(DivideError::OutOfMemory(format!(
                        "depth attachment for target '{}'",
                        descriptor.name
                    )));
                }
                Some(texture)
            }
            None => None,
        };

        let layer_count = descriptor.layer_count.max(1) as usize;
        let target = RenderTarget {
            descriptor,
            colour_textures,
            depth_texture,
            dirty_layers: vec![false; layer_count],
        };

        let bucket = self.bucket_mut(usage);
        let index = bucket.len() as u16;
        bucket.push(Some(target));
        Ok(RenderTargetHandle {
            id: RenderTargetId { usage, index },
        })
    }

    /// Explicit destruction; the slot index is retired, never reused.
    pub fn deallocate(&mut self, backend: &mut dyn RenderBackend, id: RenderTargetId) {
        let Some(slot) = self.bucket_mut(id.usage).get_mut(id.index as usize) else {
            warn!("deallocate of unknown render target {id}");
            return;
        };
        if let Some(target) = slot.take() {
            for texture in target.colour_textures {
                backend.destroy_texture(texture);
            }
            if let Some(depth) = target.depth_texture {
                backend.destroy_texture(depth);
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.bucket(id.usage)
            .get(id.index as usize)
            .and_then(Option::as_ref)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: RenderTargetId) -> Option<&mut RenderTarget> {
        self.bucket_mut(id.usage)
            .get_mut(id.index as usize)
            .and_then(Option::as_mut)
    }

    /// Reshapes every live target of one usage class.
    pub fn resize_targets(
        &mut self,
        backend: &mut dyn RenderBackend,
        usage: RenderTargetUsage,
        width: u32,
        height: u32,
    ) {
        for slot in self.bucket_mut(usage).iter_mut().flatten() {
            slot.descriptor.width = width;
            slot.descriptor.height = height;
            for texture in &slot.colour_textures {
                backend.resize_texture(*texture, width, height);
            }
            if let Some(depth) = slot.depth_texture {
                backend.resize_texture(depth, width, height);
            }
            for flag in &mut slot.dirty_layers {
                *flag = false;
            }
        }
    }

    /// Binds a target for drawing, remembering the previous binding.
    pub fn draw_to_begin(&mut self, id: RenderTargetId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(DivideError::UnknownRenderTarget(id.to_string()));
        }
        self.bind_stack.push(id);
        Ok(())
    }

    /// Pops back to the previous binding, if any.
    pub fn draw_to_end(&mut self) -> Option<RenderTargetId> {
        self.bind_stack.pop();
        self.bind_stack.last().copied()
    }

    #[must_use]
    pub fn current_target(&self) -> Option<RenderTargetId> {
        self.bind_stack.last().copied()
    }

    /// Live target count across all usages.
    #[must_use]
    pub fn live_count(&self) -> usize {
        [
            &self.screen,
            &self.editor,
            &self.shadow,
            &self.reflection_planar,
            &self.reflection_cube,
            &self.refraction_planar,
            &self.refraction_cube,
            &self.hi_z,
            &self.oit,
            &self.environment,
            &self.other,
        ]
        .iter()
        .map(|bucket| bucket.iter().flatten().count())
        .sum()
    }
}

fn attachment_texture(
    target: &RenderTargetDescriptor,
    attachment: &AttachmentDescriptor,
) -> TextureDescriptor {
    TextureDescriptor {
        texture_type: if target.layer_count > 1 {
            TextureType::D2Array
        } else if target.msaa_samples > 0 {
            TextureType::D2Multisample
        } else {
            TextureType::D2
        },
        format: attachment.format,
        width: target.width,
        height: target.height,
        depth: 1,
        mip_base: 0,
        mip_count: 1,
        layer_count: target.layer_count.max(1),
        sampler: SamplerDescriptor::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::NullBackend;

    fn simple_descriptor(name: &str) -> RenderTargetDescriptor {
        let mut descriptor = RenderTargetDescriptor::new(name, 256, 256);
        descriptor
            .colour_attachments
            .push(AttachmentDescriptor::colour(PixelFormat::Rgba8));
        descriptor.depth_attachment = Some(AttachmentDescriptor::depth(PixelFormat::Depth32F));
        descriptor
    }

    #[test]
    fn allocate_lookup_deallocate() {
        let mut backend = NullBackend::new();
        let mut pool = RenderTargetPool::new();
        let handle = pool
            .allocate(
                &mut backend,
                RenderTargetUsage::Screen,
                simple_descriptor("screen"),
            )
            .unwrap();

        assert_eq!(handle.id.usage, RenderTargetUsage::Screen);
        assert!(pool.get(handle.id).unwrap().has_depth());
        assert_eq!(pool.live_count(), 1);

        pool.deallocate(&mut backend, handle.id);
        assert!(pool.get(handle.id).is_none());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn draw_stack_pushes_and_pops() {
        let mut backend = NullBackend::new();
        let mut pool = RenderTargetPool::new();
        let a = pool
            .allocate(&mut backend, RenderTargetUsage::Screen, simple_descriptor("a"))
            .unwrap();
        let b = pool
            .allocate(&mut backend, RenderTargetUsage::Oit, simple_descriptor("b"))
            .unwrap();

        pool.draw_to_begin(a.id).unwrap();
        pool.draw_to_begin(b.id).unwrap();
        assert_eq!(pool.current_target(), Some(b.id));
        assert_eq!(pool.draw_to_end(), Some(a.id));
        assert_eq!(pool.draw_to_end(), None);
    }

    #[test]
    fn layered_targets_track_dirty_layers() {
        let mut backend = NullBackend::new();
        let mut pool = RenderTargetPool::new();
        let mut descriptor = simple_descriptor("shadow-atlas");
        descriptor.layer_count = 8;
        descriptor.colour_attachments.clear();
        let handle = pool
            .allocate(&mut backend, RenderTargetUsage::Shadow, descriptor)
            .unwrap();

        let target = pool.get_mut(handle.id).unwrap();
        target.mark_layer_dirty(2);
        target.mark_layer_dirty(5);
        assert!(target.is_layer_dirty(2));
        assert!(!target.is_layer_dirty(3));
        assert_eq!(target.dirty_layers(), vec![2, 5]);

        target.clear_layer_dirty(2);
        assert_eq!(target.dirty_layers(), vec![5]);
    }

    #[test]
    fn resize_by_usage_touches_only_that_usage() {
        let mut backend = NullBackend::new();
        let mut pool = RenderTargetPool::new();
        let screen = pool
            .allocate(&mut backend, RenderTargetUsage::Screen, simple_descriptor("s"))
            .unwrap();
        let shadow = pool
            .allocate(&mut backend, RenderTargetUsage::Shadow, simple_descriptor("m"))
            .unwrap();

        pool.resize_targets(&mut backend, RenderTargetUsage::Screen, 1920, 1080);
        assert_eq!(pool.get(screen.id).unwrap().descriptor.width, 1920);
        assert_eq!(pool.get(shadow.id).unwrap().descriptor.width, 256);
    }
}
