//! Pipeline Cache
//!
//! A pipeline is the immutable combined state for a draw: fixed-function
//! state hash, shader program, module variant selection, and multisample
//! count. Pipelines are stored contiguously and addressed through
//! lightweight ids; identity is by descriptor hash, so equal descriptors
//! always resolve to the same id.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::renderer::shader::ShaderProgramHandle;

/// Index into the pipeline cache. `INVALID` never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u32);

impl PipelineId {
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// The full pipeline state key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    /// Fixed-function state (cull/depth/blend) baked by the material.
    pub render_state_hash: u64,
    pub program: ShaderProgramHandle,
    /// Selected function index per module stage.
    pub module_variants: SmallVec<[u8; 6]>,
    pub msaa_samples: u8,
}

impl PipelineDescriptor {
    #[must_use]
    pub fn new(render_state_hash: u64, program: ShaderProgramHandle) -> Self {
        Self {
            render_state_hash,
            program,
            module_variants: SmallVec::new(),
            msaa_samples: 0,
        }
    }

    /// 64-bit identity: `hash64(renderStateHash, program, variants, msaa)`.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.render_state_hash.to_le_bytes());
        hasher.update(&self.program.value().to_le_bytes());
        hasher.update(&self.module_variants);
        hasher.update(&[self.msaa_samples]);
        hasher.digest()
    }
}

/// Central pipeline storage and deduplication cache.
#[derive(Default)]
pub struct PipelineCache {
    descriptors: Vec<PipelineDescriptor>,
    lookup: FxHashMap<u64, PipelineId>,
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached id for this descriptor, creating it on first use.
    pub fn get_or_create(&mut self, descriptor: &PipelineDescriptor) -> PipelineId {
        let hash = descriptor.hash();
        if let Some(&id) = self.lookup.get(&hash) {
            return id;
        }
        let id = PipelineId(self.descriptors.len() as u32);
        self.descriptors.push(descriptor.clone());
        self.lookup.insert(hash, id);
        id
    }

    /// Retrieve a descriptor by id.
    #[must_use]
    pub fn get(&self, id: PipelineId) -> Option<&PipelineDescriptor> {
        self.descriptors.get(id.index())
    }

    /// Clears every cached pipeline (MSAA or HDR settings changed).
    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.lookup.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_descriptors_share_one_pipeline() {
        let mut cache = PipelineCache::new();
        let descriptor = PipelineDescriptor::new(0xABCD, ShaderProgramHandle::new(3));
        let a = cache.get_or_create(&descriptor);
        let b = cache.get_or_create(&descriptor.clone());
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn any_field_change_makes_a_new_pipeline() {
        let mut cache = PipelineCache::new();
        let base = PipelineDescriptor::new(1, ShaderProgramHandle::new(1));
        let a = cache.get_or_create(&base);

        let mut msaa = base.clone();
        msaa.msaa_samples = 4;
        let b = cache.get_or_create(&msaa);

        let mut variant = base.clone();
        variant.module_variants.push(2);
        let c = cache.get_or_create(&variant);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 3);
    }
}
