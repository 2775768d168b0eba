//! Resource cache integration tests: concurrent deduplication, the
//! loading lock, and threaded-load completion handoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use divide::core::task_pool::{TaskPool, TaskPriority};
use divide::errors::Result;
use divide::resources::cache::{Resource, ResourceCache, ResourceHeader, ResourceLoader};
use divide::resources::descriptor::{ResourceDescriptor, ResourceFlags};
use divide::resources::state::ResourceState;

static LOAD_CALLS: AtomicUsize = AtomicUsize::new(0);

struct SlowBlob {
    header: ResourceHeader,
}

impl Resource for SlowBlob {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
}

impl ResourceLoader for SlowBlob {
    fn load(descriptor: &ResourceDescriptor, _cache: &ResourceCache) -> Result<Self> {
        LOAD_CALLS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(25));
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Ok(Self { header })
    }
}

#[test]
fn concurrent_loads_of_one_descriptor_dedup() {
    let cache = Arc::new(ResourceCache::new());
    let pool = Arc::new(TaskPool::new(2, 2));
    let descriptor = ResourceDescriptor::new("shared-texture").with_path("textures/shared.png");

    LOAD_CALLS.store(0, Ordering::SeqCst);

    let mut joins = Vec::new();
    for _ in 0..2 {
        let cache = Arc::clone(&cache);
        let pool = Arc::clone(&pool);
        let descriptor = descriptor.clone();
        joins.push(std::thread::spawn(move || {
            let mut was_cached = false;
            let resource: Arc<SlowBlob> = cache.load(&pool, &descriptor, &mut was_cached).unwrap();
            resource.header().guid()
        }));
    }
    let guids: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();

    // Exactly one load ran; both callers share one resource identity.
    assert_eq!(LOAD_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(guids[0], guids[1]);
    assert_eq!(cache.live_count(), 0); // both Arcs dropped with the threads
}

struct ThreadedBlob {
    header: Arc<ResourceHeader>,
}

impl Resource for ThreadedBlob {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
}

impl ResourceLoader for ThreadedBlob {
    fn load(descriptor: &ResourceDescriptor, cache: &ResourceCache) -> Result<Self> {
        // Returns in Loading state; the GPU-visible completion runs on the
        // main thread via the handoff queue.
        let header = Arc::new(ResourceHeader::new(descriptor));
        let completion_header = Arc::clone(&header);
        cache.enqueue_completion(Box::new(move || {
            completion_header.state().advance(ResourceState::Loaded);
        }));
        Ok(Self { header })
    }
}

#[test]
fn threaded_load_completes_through_the_handoff_queue() {
    let cache = ResourceCache::new();
    let pool = TaskPool::new(1, 1);
    let descriptor = ResourceDescriptor::new("gpu-texture")
        .with_flags(ResourceFlags::THREADED_LOAD)
        .with_wait_for_ready(false);

    let mut was_cached = false;
    let resource: Arc<ThreadedBlob> = cache.load(&pool, &descriptor, &mut was_cached).unwrap();
    assert_eq!(resource.header().state().get(), ResourceState::Loading);

    // wait_for_ready drains the completion queue (main thread) and
    // observes the state advance.
    cache.wait_for_ready(&pool, resource.header());
    assert!(resource.header().state().is_loaded());
}

static POOL_LOAD_CALLS: AtomicUsize = AtomicUsize::new(0);

struct PoolBlob {
    header: ResourceHeader,
}

impl Resource for PoolBlob {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
}

impl ResourceLoader for PoolBlob {
    fn load(descriptor: &ResourceDescriptor, _cache: &ResourceCache) -> Result<Self> {
        POOL_LOAD_CALLS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        let header = ResourceHeader::new(descriptor);
        header.state().advance(ResourceState::Loaded);
        Ok(Self { header })
    }
}

#[test]
fn worker_thread_loads_still_dedup_against_main() {
    let cache = Arc::new(ResourceCache::new());
    let pool = Arc::new(TaskPool::new(2, 2));
    let descriptor = ResourceDescriptor::new("pool-loaded");

    let cache_for_task = Arc::clone(&cache);
    let pool_for_task = Arc::clone(&pool);
    let descriptor_for_task = descriptor.clone();
    let handle = pool.start(None, TaskPriority::Low, move |_| {
        let mut was_cached = false;
        let _resource: Arc<PoolBlob> = cache_for_task
            .load(&pool_for_task, &descriptor_for_task, &mut was_cached)
            .unwrap();
    });

    let mut was_cached = false;
    let kept: Arc<PoolBlob> = cache.load(&pool, &descriptor, &mut was_cached).unwrap();
    pool.wait(&handle);

    assert_eq!(POOL_LOAD_CALLS.load(Ordering::SeqCst), 1);
    assert!(cache.contains(&descriptor));
    drop(kept);
}
