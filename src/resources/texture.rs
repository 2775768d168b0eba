//! Textures and Samplers
//!
//! A texture resource couples opaque image bytes with a descriptor
//! (type/format/dimensions/mips/layers) and a sampler. Sampler descriptors
//! are small value types hashed into a process-wide shared pool so equal
//! samplers are allocated once on the device.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

use crate::errors::{DivideError, Result};
use crate::resources::cache::{Resource, ResourceCache, ResourceHeader, ResourceLoader};
use crate::resources::descriptor::ResourceDescriptor;
use crate::resources::state::ResourceState;

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    D1,
    D2,
    D2Multisample,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

/// Closed pixel-format set the abstract backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    Srgba8,
    R16F,
    Rg16F,
    Rgba16F,
    R32F,
    Rgba32F,
    R32UI,
    Depth24,
    Depth32F,
}

impl PixelFormat {
    /// True for formats usable as a depth attachment.
    #[inline]
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24 | Self::Depth32F)
    }
}

/// Filtering modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
    LinearMipLinear,
}

/// Addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirrorRepeat,
}

/// Depth-compare op for shadow samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    LessEqual,
    GreaterEqual,
}

/// Sampler state, hashed into the shared sampler pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub wrap_w: WrapMode,
    pub anisotropy: u8,
    pub compare: Option<CompareOp>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::LinearMipLinear,
            mag_filter: FilterMode::Linear,
            wrap_u: WrapMode::Repeat,
            wrap_v: WrapMode::Repeat,
            wrap_w: WrapMode::Repeat,
            anisotropy: 0,
            compare: None,
        }
    }
}

impl SamplerDescriptor {
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&[
            self.min_filter as u8,
            self.mag_filter as u8,
            self.wrap_u as u8,
            self.wrap_v as u8,
            self.wrap_w as u8,
            self.anisotropy,
            self.compare.map_or(0xFF, |c| c as u8),
        ]);
        hasher.digest()
    }
}

/// Process-wide sampler deduplication pool.
#[derive(Default)]
pub struct SamplerPool {
    samplers: RwLock<FxHashMap<u64, Arc<SamplerDescriptor>>>,
}

impl SamplerPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance for this sampler state.
    pub fn get_or_insert(&self, descriptor: SamplerDescriptor) -> Arc<SamplerDescriptor> {
        let hash = descriptor.hash();
        if let Some(existing) = self.samplers.read().get(&hash) {
            return Arc::clone(existing);
        }
        let mut write = self.samplers.write();
        Arc::clone(
            write
                .entry(hash)
                .or_insert_with(|| Arc::new(descriptor)),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samplers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samplers.read().is_empty()
    }
}

/// Creation parameters for a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub texture_type: TextureType,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_base: u32,
    pub mip_count: u32,
    pub layer_count: u32,
    pub sampler: SamplerDescriptor,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            texture_type: TextureType::D2,
            format: PixelFormat::Rgba8,
            width: 1,
            height: 1,
            depth: 1,
            mip_base: 0,
            mip_count: 1,
            layer_count: 1,
            sampler: SamplerDescriptor::default(),
        }
    }
}

/// A cacheable texture asset. Image bytes are opaque; parsing them is a
/// collaborator concern.
pub struct Texture {
    header: ResourceHeader,
    pub descriptor: TextureDescriptor,
    /// Raw texel bytes; may be dropped after GPU upload.
    pub data: Vec<u8>,
}

impl Texture {
    /// A 2x2 magenta/black checkerboard substituted for failed loads.
    #[must_use]
    pub fn checkerboard(descriptor: &ResourceDescriptor) -> Self {
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Self {
            header,
            descriptor: TextureDescriptor {
                width: 2,
                height: 2,
                ..TextureDescriptor::default()
            },
            data: vec![
                255, 0, 255, 255, 0, 0, 0, 255, //
                0, 0, 0, 255, 255, 0, 255, 255,
            ],
        }
    }
}

impl Resource for Texture {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
}

impl ResourceLoader for Texture {
    fn load(descriptor: &ResourceDescriptor, _cache: &ResourceCache) -> Result<Self> {
        // The property block carries the serialized TextureDescriptor
        // trailer followed by texel bytes; an empty block means a 1x1 white
        // texture (procedural default).
        let block = descriptor.property_block();
        if block.is_empty() && descriptor.asset_path().is_empty() {
            let header = ResourceHeader::new(descriptor);
            header.state().advance(ResourceState::Loaded);
            return Ok(Self {
                header,
                descriptor: TextureDescriptor::default(),
                data: vec![255, 255, 255, 255],
            });
        }
        if block.len() < 8 {
            return Err(DivideError::ResourceLoadFailed {
                name: descriptor.name().to_string(),
                reason: "texture property block truncated".to_string(),
            });
        }
        let width = u32::from_le_bytes(block[0..4].try_into().expect("sized slice"));
        let height = u32::from_le_bytes(block[4..8].try_into().expect("sized slice"));
        if width == 0 || height == 0 {
            return Err(DivideError::ResourceLoadFailed {
                name: descriptor.name().to_string(),
                reason: "zero texture dimension".to_string(),
            });
        }
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Ok(Self {
            header,
            descriptor: TextureDescriptor {
                width,
                height,
                ..TextureDescriptor::default()
            },
            data: block[8..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_samplers_share_one_pool_entry() {
        let pool = SamplerPool::new();
        let a = pool.get_or_insert(SamplerDescriptor::default());
        let b = pool.get_or_insert(SamplerDescriptor::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);

        let shadow = SamplerDescriptor {
            compare: Some(CompareOp::LessEqual),
            ..SamplerDescriptor::default()
        };
        let c = pool.get_or_insert(shadow);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn checkerboard_is_loaded_and_tiny() {
        let tex = Texture::checkerboard(&ResourceDescriptor::new("missing"));
        assert!(tex.header().state().is_loaded());
        assert_eq!(tex.descriptor.width, 2);
        assert_eq!(tex.data.len(), 16);
    }
}
