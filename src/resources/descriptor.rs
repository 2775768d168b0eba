//! Resource Descriptors
//!
//! A [`ResourceDescriptor`] is the value type used as a cache key. Its hash
//! covers name, asset path, flags, and the property block; two descriptors
//! with equal hashes must produce equivalent resources.

use bitflags::bitflags;
use xxhash_rust::xxh3::Xxh3;

bitflags! {
    /// Load-behaviour flags. Part of the descriptor hash.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// Run the loader on the low-priority task queue.
        const THREADED_LOAD = 1 << 0;
        /// The asset carries no CPU-side payload after GPU upload.
        const DISCARD_CPU_DATA = 1 << 1;
        /// Generate mip chain on load.
        const AUTO_MIPS = 1 << 2;
    }
}

/// Cache key for a loadable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    name: String,
    asset_path: String,
    flags: ResourceFlags,
    /// Opaque, type-specific property sub-block. Serialized by the caller;
    /// hashed byte-for-byte.
    property_block: Vec<u8>,
    /// Whether `load` should block until the resource reaches `Loaded`.
    /// Deliberately excluded from the hash: descriptors differing only in
    /// this flag address the same cached resource.
    wait_for_ready: bool,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_path: String::new(),
            flags: ResourceFlags::empty(),
            property_block: Vec::new(),
            wait_for_ready: true,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.asset_path = path.into();
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, block: Vec<u8>) -> Self {
        self.property_block = block;
        self
    }

    #[must_use]
    pub fn with_wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub fn property_block(&self) -> &[u8] {
        &self.property_block
    }

    #[inline]
    #[must_use]
    pub fn wait_for_ready(&self) -> bool {
        self.wait_for_ready
    }

    /// The 64-bit cache key.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.asset_path.as_bytes());
        hasher.update(&self.flags.bits().to_le_bytes());
        hasher.update(&self.property_block);
        hasher.digest()
    }
}
