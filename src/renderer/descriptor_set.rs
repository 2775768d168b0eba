//! Descriptor Sets
//!
//! A per-draw binding bundle: buffer ranges and texture data keyed by
//! slot. Equality is by deep content, so redundant `BindDescriptorSets`
//! commands can be dropped and compatible draws batched.

use smallvec::SmallVec;

use crate::renderer::backend::{BufferHandle, TextureHandle};

/// One binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorBinding {
    /// A buffer range bound to a slot.
    BufferRange {
        slot: u8,
        buffer: BufferHandle,
        offset: u32,
        length: u32,
    },
    /// Whole-texture data bound to a slot with a sampler.
    Texture {
        slot: u8,
        texture: TextureHandle,
        sampler_hash: u64,
    },
    /// A single mip/layer view of a texture.
    TextureView {
        slot: u8,
        texture: TextureHandle,
        mip: u8,
        layer: u16,
    },
}

impl DescriptorBinding {
    #[must_use]
    fn slot(&self) -> u8 {
        match *self {
            Self::BufferRange { slot, .. }
            | Self::Texture { slot, .. }
            | Self::TextureView { slot, .. } => slot,
        }
    }
}

/// The binding bundle for one draw. Kept sorted by slot so equal content
/// always compares (and hashes) equal regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSet {
    bindings: SmallVec<[DescriptorBinding; 8]>,
}

impl DescriptorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the binding at this slot.
    pub fn bind(&mut self, binding: DescriptorBinding) {
        let slot = binding.slot();
        match self.bindings.binary_search_by_key(&slot, DescriptorBinding::slot) {
            Ok(at) => self.bindings[at] = binding,
            Err(at) => self.bindings.insert(at, binding),
        }
    }

    #[must_use]
    pub fn with_buffer(mut self, slot: u8, buffer: BufferHandle, offset: u32, length: u32) -> Self {
        self.bind(DescriptorBinding::BufferRange {
            slot,
            buffer,
            offset,
            length,
        });
        self
    }

    #[must_use]
    pub fn with_texture(mut self, slot: u8, texture: TextureHandle, sampler_hash: u64) -> Self {
        self.bind(DescriptorBinding::Texture {
            slot,
            texture,
            sampler_hash,
        });
        self
    }

    #[must_use]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// True when any binding samples the given texture.
    #[must_use]
    pub fn samples_texture(&self, texture: TextureHandle) -> bool {
        self.bindings.iter().any(|binding| match *binding {
            DescriptorBinding::Texture { texture: t, .. }
            | DescriptorBinding::TextureView { texture: t, .. } => t == texture,
            DescriptorBinding::BufferRange { .. } => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_order_independent() {
        let buffer = BufferHandle::from_raw(1);
        let texture = TextureHandle::from_raw(2);

        let a = DescriptorSet::new()
            .with_buffer(0, buffer, 0, 64)
            .with_texture(3, texture, 0xBEEF);
        let b = DescriptorSet::new()
            .with_texture(3, texture, 0xBEEF)
            .with_buffer(0, buffer, 0, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn rebinding_a_slot_replaces() {
        let buffer = BufferHandle::from_raw(1);
        let mut set = DescriptorSet::new().with_buffer(0, buffer, 0, 64);
        set.bind(DescriptorBinding::BufferRange {
            slot: 0,
            buffer,
            offset: 64,
            length: 64,
        });
        assert_eq!(set.bindings().len(), 1);
        assert!(matches!(
            set.bindings()[0],
            DescriptorBinding::BufferRange { offset: 64, .. }
        ));
    }
}
