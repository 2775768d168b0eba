//! Resource Cache
//!
//! Content-addressed store of loaded assets. Resources are deduplicated by
//! descriptor hash; at most one load per hash is ever in flight. Loads may
//! run on the task pool, with GPU-visible completion handed off to the main
//! thread through a queue drained once per frame.
//!
//! # Invariants
//!
//! - At most one concurrent load per descriptor hash (load-lock set).
//! - A failed hash is poisoned: it is never retried from the same
//!   descriptor until explicitly invalidated.
//! - An observer that sees `Loaded` also sees all main-thread completion
//!   work for that resource (the completion queue runs before the state
//!   advances).
//! - Unload releases only when the last strong reference drops.

use std::any::Any;
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::core::guid::Guid;
use crate::core::task_pool::TaskPool;
use crate::errors::{DivideError, Result};
use crate::resources::descriptor::ResourceDescriptor;
use crate::resources::state::{ResourceState, StateTracker};

/// Shared identity/bookkeeping block embedded in every cacheable resource.
#[derive(Debug)]
pub struct ResourceHeader {
    guid: Guid,
    name: String,
    hash: u64,
    state: StateTracker,
}

impl ResourceHeader {
    #[must_use]
    pub fn new(descriptor: &ResourceDescriptor) -> Self {
        Self {
            guid: Guid::next(),
            name: descriptor.name().to_string(),
            hash: descriptor.hash(),
            state: StateTracker::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &StateTracker {
        &self.state
    }
}

/// Base trait of all cacheable assets.
pub trait Resource: Any + Send + Sync + 'static {
    fn header(&self) -> &ResourceHeader;
}

/// Type-specific construction from a descriptor.
///
/// Loaders run either inline on the calling thread or, when the descriptor
/// carries `THREADED_LOAD`, on the low-priority task queue. A loader may
/// return a resource still in `Loading` state and enqueue completion work
/// via [`ResourceCache::enqueue_completion`].
pub trait ResourceLoader: Resource + Sized {
    fn load(descriptor: &ResourceDescriptor, cache: &ResourceCache) -> Result<Self>;
}

const SHARD_COUNT: usize = 16;

type AnyResource = dyn Any + Send + Sync;

struct Shard {
    map: RwLock<FxHashMap<u64, Weak<AnyResource>>>,
}

/// A deferred main-thread completion step for a threaded load.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// The content-addressed resource store.
pub struct ResourceCache {
    shards: Vec<Shard>,
    /// Hashes with a load currently in flight.
    loading: Mutex<FxHashSet<u64>>,
    /// Hashes whose load failed; never retried until invalidated.
    poisoned: Mutex<FxHashSet<u64>>,
    /// Main-thread completion steps (GPU upload, state advance).
    completions: (flume::Sender<Completion>, flume::Receiver<Completion>),
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Shard {
                    map: RwLock::new(FxHashMap::default()),
                })
                .collect(),
            loading: Mutex::new(FxHashSet::default()),
            poisoned: Mutex::new(FxHashSet::default()),
            completions: flume::unbounded(),
        }
    }

    fn shard(&self, hash: u64) -> &Shard {
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// Loads or retrieves a resource. `was_in_cache` reports a cache hit.
    ///
    /// The load lock guarantees at most one concurrent load per hash; a
    /// second caller busy-waits on the pool (running queued jobs) until the
    /// first finishes, then receives the cached resource.
    pub fn load<T: ResourceLoader>(
        &self,
        pool: &TaskPool,
        descriptor: &ResourceDescriptor,
        was_in_cache: &mut bool,
    ) -> Result<Arc<T>> {
        let hash = descriptor.hash();
        *was_in_cache = false;

        loop {
            // Wait out any in-flight load of the same hash.
            loop {
                let in_flight = self.loading.lock().contains(&hash);
                if !in_flight {
                    break;
                }
                if !pool.yield_once() {
                    std::thread::yield_now();
                }
            }

            if self.poisoned.lock().contains(&hash) {
                return Err(DivideError::ResourcePoisoned(descriptor.name().to_string()));
            }

            if let Some(existing) = self.lookup::<T>(hash) {
                *was_in_cache = true;
                if descriptor.wait_for_ready() {
                    self.wait_for_ready(pool, existing.header());
                }
                return Ok(existing);
            }

            // Claim the load lock; a racing claimant loops back to waiting.
            {
                let mut loading = self.loading.lock();
                if loading.contains(&hash) {
                    continue;
                }
                loading.insert(hash);
            }
            break;
        }

        let result = T::load(descriptor, self);
        match result {
            Ok(resource) => {
                let arc = Arc::new(resource);
                self.register(hash, &arc);
                self.loading.lock().remove(&hash);
                debug!("resource '{}' loaded ({})", descriptor.name(), arc.header().guid());
                if descriptor.wait_for_ready() {
                    self.wait_for_ready(pool, arc.header());
                }
                Ok(arc)
            }
            Err(err) => {
                self.poisoned.lock().insert(hash);
                self.loading.lock().remove(&hash);
                warn!("resource '{}' failed to load: {err}", descriptor.name());
                Err(err)
            }
        }
    }

    fn lookup<T: Resource>(&self, hash: u64) -> Option<Arc<T>> {
        let shard = self.shard(hash);
        let map = shard.map.read();
        let weak = map.get(&hash)?;
        let any = weak.upgrade()?;
        any.downcast::<T>().ok()
    }

    fn register<T: Resource>(&self, hash: u64, resource: &Arc<T>) {
        let any: Arc<AnyResource> = Arc::clone(resource) as Arc<AnyResource>;
        let shard = self.shard(hash);
        shard.map.write().insert(hash, Arc::downgrade(&any));
    }

    /// Enqueues a main-thread completion step for a threaded load. The step
    /// must advance the resource state as its last action so that observers
    /// of `Loaded` see all GPU-side setup.
    pub fn enqueue_completion(&self, completion: Completion) {
        // Only fails when the cache is being torn down.
        let _ = self.completions.0.send(completion);
    }

    /// Drains the completion queue. Main thread only; the kernel calls this
    /// once per frame before the render phase.
    pub fn drain_completions(&self) -> usize {
        let mut drained = 0;
        while let Ok(completion) = self.completions.1.try_recv() {
            completion();
            drained += 1;
        }
        drained
    }

    /// Blocks until the resource leaves `Loading`, yielding to the pool and
    /// draining main-thread completions meanwhile.
    pub fn wait_for_ready(&self, pool: &TaskPool, header: &ResourceHeader) {
        while header.state().get() == ResourceState::Loading {
            let progressed = self.drain_completions() > 0 || pool.yield_once();
            if !progressed {
                std::thread::yield_now();
            }
        }
    }

    /// Removes a poisoned hash so a future load may retry.
    pub fn invalidate(&self, descriptor: &ResourceDescriptor) {
        self.poisoned.lock().remove(&descriptor.hash());
    }

    /// Drops dead weak entries. Idempotent; called opportunistically.
    pub fn purge_expired(&self) {
        for shard in &self.shards {
            shard.map.write().retain(|_, weak| weak.strong_count() > 0);
        }
    }

    /// Number of live entries across all shards.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .map
                    .read()
                    .values()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .sum()
    }

    /// True when the hash currently resolves to a live resource.
    #[must_use]
    pub fn contains(&self, descriptor: &ResourceDescriptor) -> bool {
        let hash = descriptor.hash();
        self.shard(hash)
            .map
            .read()
            .get(&hash)
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::descriptor::ResourceFlags;

    #[derive(Debug)]
    struct Blob {
        header: ResourceHeader,
        bytes: Vec<u8>,
    }

    impl Resource for Blob {
        fn header(&self) -> &ResourceHeader {
            &self.header
        }
    }

    impl ResourceLoader for Blob {
        fn load(descriptor: &ResourceDescriptor, _cache: &ResourceCache) -> Result<Self> {
            if descriptor.name().starts_with("bad") {
                return Err(DivideError::ResourceLoadFailed {
                    name: descriptor.name().to_string(),
                    reason: "synthetic".to_string(),
                });
            }
            let header = ResourceHeader::new(descriptor);
            header.state().advance(ResourceState::Loaded);
            Ok(Self {
                header,
                bytes: descriptor.property_block().to_vec(),
            })
        }
    }

    #[test]
    fn identical_descriptors_share_one_resource() {
        let cache = ResourceCache::new();
        let pool = TaskPool::new(1, 1);
        let descriptor = ResourceDescriptor::new("rock").with_properties(vec![7]);

        let mut hit = false;
        let first: Arc<Blob> = cache.load(&pool, &descriptor, &mut hit).unwrap();
        assert!(!hit);
        let second: Arc<Blob> = cache.load(&pool, &descriptor, &mut hit).unwrap();
        assert!(hit);
        assert_eq!(first.header().guid(), second.header().guid());
        assert_eq!(second.bytes, vec![7]);
        assert_eq!(cache.live_count(), 1);
    }

    #[test]
    fn failed_hash_is_poisoned_until_invalidated() {
        let cache = ResourceCache::new();
        let pool = TaskPool::new(1, 1);
        let descriptor = ResourceDescriptor::new("bad-rock");

        let mut hit = false;
        assert!(cache.load::<Blob>(&pool, &descriptor, &mut hit).is_err());
        // Second attempt fails without invoking the loader.
        let err = cache.load::<Blob>(&pool, &descriptor, &mut hit).unwrap_err();
        assert!(matches!(err, DivideError::ResourcePoisoned(_)));

        cache.invalidate(&descriptor);
        // Still fails (the loader fails deterministically) but goes through
        // the loader again, poisoning anew.
        let err = cache.load::<Blob>(&pool, &descriptor, &mut hit).unwrap_err();
        assert!(matches!(err, DivideError::ResourceLoadFailed { .. }));
    }

    #[test]
    fn unload_releases_on_last_strong_drop() {
        let cache = ResourceCache::new();
        let pool = TaskPool::new(1, 1);
        let descriptor = ResourceDescriptor::new("transient");

        let mut hit = false;
        let resource: Arc<Blob> = cache.load(&pool, &descriptor, &mut hit).unwrap();
        assert!(cache.contains(&descriptor));
        drop(resource);
        assert!(!cache.contains(&descriptor));
        cache.purge_expired();
        assert_eq!(cache.live_count(), 0);
    }

    #[test]
    fn threaded_flag_is_part_of_the_key_but_wait_is_not() {
        let a = ResourceDescriptor::new("x").with_flags(ResourceFlags::THREADED_LOAD);
        let b = ResourceDescriptor::new("x");
        assert_ne!(a.hash(), b.hash());
    }
}
