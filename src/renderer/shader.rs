//! Shader Programs and the Compute Queue
//!
//! A shader program is a set of stage modules plus a define list, identified
//! by descriptor hash (equal descriptors share one program). Compilation is
//! asynchronous: creation only *requests* a program; the
//! [`ShaderComputeQueue`] compiles a bounded number per frame, consulting
//! the on-disk text or binary cache first (binary preferred, mutually
//! exclusive). Draws against a program that is not yet `Ready` are filtered
//! out by the render pass manager.
//!
//! State machine per program:
//! `Requested → Queued → Computed → Ready` (or `Failed`, which substitutes
//! the built-in magenta fallback and logs once).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

/// Handle into the shader registry. Handle 0 is the always-ready magenta
/// fallback program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderProgramHandle(u32);

impl ShaderProgramHandle {
    /// The built-in magenta fallback, substituted for failed compiles.
    pub const FALLBACK: Self = Self(0);

    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shader pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}

/// One stage module: opaque source text plus entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderModuleDescriptor {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub source: String,
    pub variant: u8,
}

/// Program identity: modules + defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgramDescriptor {
    pub name: String,
    pub modules: Vec<ShaderModuleDescriptor>,
    /// `(define, append_prefix)` pairs.
    pub defines: Vec<(String, bool)>,
}

impl ShaderProgramDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            defines: Vec::new(),
        }
    }

    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.name.as_bytes());
        for module in &self.modules {
            hasher.update(&[module.stage as u8, module.variant]);
            hasher.update(module.entry_point.as_bytes());
            hasher.update(module.source.as_bytes());
        }
        for (define, prefix) in &self.defines {
            hasher.update(define.as_bytes());
            hasher.update(&[u8::from(*prefix)]);
        }
        hasher.digest()
    }
}

/// Compile lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Requested,
    Queued,
    Computed,
    Ready,
    Failed,
}

/// A registered program.
pub struct ShaderProgram {
    pub descriptor: ShaderProgramDescriptor,
    pub state: ProgramState,
    /// Set when defines changed after creation; recompile is deferred to
    /// the next idle window.
    pub needs_new_shader: bool,
    pub binary: Option<Vec<u8>>,
    warned_failed: bool,
}

/// Backend-supplied module compiler.
pub trait ShaderCompiler {
    /// Compiles a program descriptor to an opaque binary, or a log on error.
    fn compile(&mut self, descriptor: &ShaderProgramDescriptor)
    -> std::result::Result<Vec<u8>, String>;
}

/// Trivial compiler used by the headless backend: hashes the descriptor
/// into a stand-in binary.
#[derive(Default)]
pub struct NullShaderCompiler;

impl ShaderCompiler for NullShaderCompiler {
    fn compile(
        &mut self,
        descriptor: &ShaderProgramDescriptor,
    ) -> std::result::Result<Vec<u8>, String> {
        if descriptor.modules.is_empty() {
            return Err("program has no modules".to_string());
        }
        Ok(descriptor.hash().to_le_bytes().to_vec())
    }
}

/// Owner of all shader programs; identity by descriptor hash.
pub struct ShaderRegistry {
    programs: Vec<ShaderProgram>,
    lookup: FxHashMap<u64, ShaderProgramHandle>,
}

impl Default for ShaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        // Handle 0: the magenta fallback, born Ready.
        let fallback = ShaderProgram {
            descriptor: ShaderProgramDescriptor::new("fallback_magenta"),
            state: ProgramState::Ready,
            needs_new_shader: false,
            binary: Some(Vec::new()),
            warned_failed: false,
        };
        Self {
            programs: vec![fallback],
            lookup: FxHashMap::default(),
        }
    }

    /// Returns the shared handle for this descriptor, requesting a new
    /// program on first sight.
    pub fn get_or_request(&mut self, descriptor: ShaderProgramDescriptor) -> ShaderProgramHandle {
        let hash = descriptor.hash();
        if let Some(&handle) = self.lookup.get(&hash) {
            return handle;
        }
        let handle = ShaderProgramHandle(self.programs.len() as u32);
        self.programs.push(ShaderProgram {
            descriptor,
            state: ProgramState::Requested,
            needs_new_shader: false,
            binary: None,
            warned_failed: false,
        });
        self.lookup.insert(hash, handle);
        handle
    }

    #[must_use]
    pub fn program(&self, handle: ShaderProgramHandle) -> Option<&ShaderProgram> {
        self.programs.get(handle.index())
    }

    pub(crate) fn program_mut(&mut self, handle: ShaderProgramHandle) -> Option<&mut ShaderProgram> {
        self.programs.get_mut(handle.index())
    }

    /// True when draws against this program may proceed.
    #[must_use]
    pub fn is_ready(&self, handle: ShaderProgramHandle) -> bool {
        self.program(handle)
            .is_some_and(|p| p.state == ProgramState::Ready)
    }

    /// The handle draws should actually use: failed programs resolve to
    /// the magenta fallback.
    #[must_use]
    pub fn resolve(&self, handle: ShaderProgramHandle) -> ShaderProgramHandle {
        match self.program(handle).map(|p| p.state) {
            Some(ProgramState::Failed) => ShaderProgramHandle::FALLBACK,
            _ => handle,
        }
    }

    /// Adds a define after creation; marks the program for deferred
    /// recompilation.
    pub fn add_define(&mut self, handle: ShaderProgramHandle, define: impl Into<String>, append_prefix: bool) {
        if let Some(program) = self.program_mut(handle) {
            program.descriptor.defines.push((define.into(), append_prefix));
            program.needs_new_shader = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Where compiled programs persist between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCacheKind {
    None,
    Text,
    Binary,
}

/// Budgeted asynchronous compile queue.
pub struct ShaderComputeQueue {
    queue: VecDeque<ShaderProgramHandle>,
    max_computed_per_frame: usize,
    cache_kind: ShaderCacheKind,
    cache_root: PathBuf,
}

impl ShaderComputeQueue {
    /// `use_text_cache` and `use_binary_cache` are mutually exclusive;
    /// binary wins when both are set.
    #[must_use]
    pub fn new(
        max_computed_per_frame: usize,
        cache_root: impl Into<PathBuf>,
        use_text_cache: bool,
        use_binary_cache: bool,
    ) -> Self {
        let cache_kind = if use_binary_cache {
            ShaderCacheKind::Binary
        } else if use_text_cache {
            ShaderCacheKind::Text
        } else {
            ShaderCacheKind::None
        };
        Self {
            queue: VecDeque::new(),
            max_computed_per_frame: max_computed_per_frame.max(1),
            cache_kind,
            cache_root: cache_root.into(),
        }
    }

    /// Moves a requested program into the queue.
    pub fn submit(&mut self, registry: &mut ShaderRegistry, handle: ShaderProgramHandle) {
        let Some(program) = registry.program_mut(handle) else {
            return;
        };
        if program.state == ProgramState::Requested {
            program.state = ProgramState::Queued;
            self.queue.push_back(handle);
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn cache_path(&self, hash: u64) -> PathBuf {
        match self.cache_kind {
            ShaderCacheKind::Binary => self.cache_root.join("bin").join(format!("{hash:016x}.bin")),
            ShaderCacheKind::Text => self.cache_root.join("text").join(format!("{hash:016x}.glsl")),
            ShaderCacheKind::None => PathBuf::new(),
        }
    }

    fn try_cache_load(&self, hash: u64) -> Option<Vec<u8>> {
        if self.cache_kind == ShaderCacheKind::None {
            return None;
        }
        std::fs::read(self.cache_path(hash)).ok()
    }

    fn cache_store(&self, hash: u64, binary: &[u8]) {
        if self.cache_kind == ShaderCacheKind::None {
            return;
        }
        let path = self.cache_path(hash);
        if let Some(parent) = path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!("shader cache dir create failed: {err}");
            return;
        }
        if let Err(err) = std::fs::write(&path, binary) {
            warn!("shader cache write failed for {}: {err}", path.display());
        }
    }

    /// Compiles up to the per-frame budget. Cache hits skip the compiler;
    /// misses compile and write back. Returns the number processed.
    pub fn process_frame(
        &mut self,
        registry: &mut ShaderRegistry,
        compiler: &mut dyn ShaderCompiler,
    ) -> usize {
        let budget = self.max_computed_per_frame;
        let mut processed = 0;
        while processed < budget {
            let Some(handle) = self.queue.pop_front() else {
                break;
            };
            let Some(program) = registry.program_mut(handle) else {
                continue;
            };
            if program.state != ProgramState::Queued {
                continue;
            }
            let hash = program.descriptor.hash();

            let outcome = if let Some(binary) = self.try_cache_load(hash) {
                debug!("shader '{}' loaded from cache", program.descriptor.name);
                Ok(binary)
            } else {
                compiler.compile(&program.descriptor)
            };

            match outcome {
                Ok(binary) => {
                    self.cache_store(hash, &binary);
                    program.binary = Some(binary);
                    program.state = ProgramState::Computed;
                    // GPU-side link happens on the main thread, which is
                    // where this queue runs; the program is usable now.
                    program.state = ProgramState::Ready;
                }
                Err(log) => {
                    program.state = ProgramState::Failed;
                    if !program.warned_failed {
                        program.warned_failed = true;
                        warn!(
                            "shader '{}' failed to compile; substituting fallback: {log}",
                            program.descriptor.name
                        );
                    }
                }
            }
            processed += 1;
        }
        processed
    }

    /// Idle-window pass: resubmits programs whose defines changed since
    /// they were built. Call when the queue has spare budget.
    pub fn process_deferred(&mut self, registry: &mut ShaderRegistry) -> usize {
        if !self.queue.is_empty() {
            return 0;
        }
        let mut resubmitted = 0;
        let stale: Vec<ShaderProgramHandle> = (0..registry.len())
            .map(|i| ShaderProgramHandle(i as u32))
            .filter(|&h| {
                h != ShaderProgramHandle::FALLBACK
                    && registry.program(h).is_some_and(|p| {
                        p.needs_new_shader
                            && matches!(p.state, ProgramState::Ready | ProgramState::Failed)
                    })
            })
            .collect();
        for handle in stale {
            if let Some(program) = registry.program_mut(handle) {
                program.needs_new_shader = false;
                program.state = ProgramState::Queued;
                program.warned_failed = false;
                self.queue.push_back(handle);
                resubmitted += 1;
            }
        }
        resubmitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_descriptor(name: &str) -> ShaderProgramDescriptor {
        let mut descriptor = ShaderProgramDescriptor::new(name);
        descriptor.modules.push(ShaderModuleDescriptor {
            stage: ShaderStage::Vertex,
            entry_point: "main".into(),
            source: "void main() {}".into(),
            variant: 0,
        });
        descriptor
    }

    #[test]
    fn equal_descriptors_share_a_program() {
        let mut registry = ShaderRegistry::new();
        let a = registry.get_or_request(simple_descriptor("terrain"));
        let b = registry.get_or_request(simple_descriptor("terrain"));
        assert_eq!(a, b);
        assert_eq!(registry.len(), 2); // fallback + terrain
    }

    #[test]
    fn queue_respects_the_per_frame_budget() {
        let mut registry = ShaderRegistry::new();
        let mut queue = ShaderComputeQueue::new(2, std::env::temp_dir().join("divide-test-nocache"), false, false);
        let handles: Vec<_> = (0..5)
            .map(|i| registry.get_or_request(simple_descriptor(&format!("p{i}"))))
            .collect();
        for &handle in &handles {
            queue.submit(&mut registry, handle);
        }

        let mut compiler = NullShaderCompiler;
        assert_eq!(queue.process_frame(&mut registry, &mut compiler), 2);
        assert_eq!(queue.pending(), 3);
        assert!(registry.is_ready(handles[0]));
        assert!(!registry.is_ready(handles[2]));

        queue.process_frame(&mut registry, &mut compiler);
        queue.process_frame(&mut registry, &mut compiler);
        assert!(handles.iter().all(|&h| registry.is_ready(h)));
    }

    #[test]
    fn failed_programs_resolve_to_the_fallback() {
        let mut registry = ShaderRegistry::new();
        // No modules: the null compiler rejects it.
        let broken = registry.get_or_request(ShaderProgramDescriptor::new("broken"));
        let mut queue = ShaderComputeQueue::new(4, std::env::temp_dir().join("divide-test-nocache"), false, false);
        queue.submit(&mut registry, broken);
        queue.process_frame(&mut registry, &mut NullShaderCompiler);

        assert!(!registry.is_ready(broken));
        assert_eq!(registry.resolve(broken), ShaderProgramHandle::FALLBACK);
        assert!(registry.is_ready(ShaderProgramHandle::FALLBACK));
    }

    #[test]
    fn late_defines_defer_a_recompile() {
        let mut registry = ShaderRegistry::new();
        let handle = registry.get_or_request(simple_descriptor("lit"));
        let mut queue = ShaderComputeQueue::new(4, std::env::temp_dir().join("divide-test-nocache"), false, false);
        queue.submit(&mut registry, handle);
        queue.process_frame(&mut registry, &mut NullShaderCompiler);
        assert!(registry.is_ready(handle));

        registry.add_define(handle, "USE_SHADOWS", true);
        assert!(registry.program(handle).unwrap().needs_new_shader);

        // Deferred recompile happens in the idle window.
        assert_eq!(queue.process_deferred(&mut registry), 1);
        assert!(!registry.is_ready(handle));
        queue.process_frame(&mut registry, &mut NullShaderCompiler);
        assert!(registry.is_ready(handle));
    }

    #[test]
    fn binary_cache_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "divide-shader-cache-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let mut registry = ShaderRegistry::new();
        let handle = registry.get_or_request(simple_descriptor("cached"));
        let mut queue = ShaderComputeQueue::new(4, &dir, false, true);
        queue.submit(&mut registry, handle);
        queue.process_frame(&mut registry, &mut NullShaderCompiler);
        let binary = registry.program(handle).unwrap().binary.clone().unwrap();

        // A fresh registry + queue must hit the cache without compiling.
        struct PanicCompiler;
        impl ShaderCompiler for PanicCompiler {
            fn compile(
                &mut self,
                _: &ShaderProgramDescriptor,
            ) -> std::result::Result<Vec<u8>, String> {
                panic!("cache should have been hit");
            }
        }
        let mut registry2 = ShaderRegistry::new();
        let handle2 = registry2.get_or_request(simple_descriptor("cached"));
        let mut queue2 = ShaderComputeQueue::new(4, &dir, false, true);
        queue2.submit(&mut registry2, handle2);
        queue2.process_frame(&mut registry2, &mut PanicCompiler);
        assert_eq!(registry2.program(handle2).unwrap().binary, Some(binary));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
