//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`DivideError`] covers all failure modes including:
//! - Platform and GPU backend initialization failures
//! - Resource loading and cache errors
//! - Command buffer validation errors
//! - Scene save/load errors
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, DivideError>`. Fatal initialization errors map to
//! a process [`ErrorCode`] via [`DivideError::exit_code`].

use thiserror::Error;

/// Process exit codes for fatal initialization failures.
///
/// `NoError` is `0`; everything else is a negative code handed back to the
/// platform layer when the kernel gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    MissingSceneData = -1,
    MissingSceneLoadCall = -2,
    CpuNotSupported = -3,
    GfxNotSupported = -4,
    GfxNonSpecified = -5,
    SfxNonSpecified = -6,
    PfxNonSpecified = -7,
    WindowInitError = -8,
    BindingInitError = -9,
    GlOldHardware = -10,
    DxOldHardware = -11,
    SdlAudioInitError = -12,
    FmodAudioInitError = -13,
    OalAudioInitError = -14,
    PhysxInitError = -15,
    PhysxExtensionError = -16,
    NoLanguageFile = -17,
    NotEnoughRam = -18,
    ConfigError = -19,
    GfxDeviceLost = -20,
    PlatformInitError = -21,
}

/// The main error type for the engine.
#[derive(Error, Debug)]
pub enum DivideError {
    // ========================================================================
    // Platform & Initialization Errors
    // ========================================================================
    /// Platform layer failed to initialize (clock, filesystem, threading).
    #[error("Platform init failed: {0}")]
    PlatformInit(String),

    /// The GPU backend failed to initialize.
    #[error("GPU backend init failed: {0}")]
    GfxInit(String),

    /// The GPU backend initialized but reports capabilities below the minimum.
    #[error("GPU hardware too old: {0}")]
    GfxOldHardware(String),

    /// The GPU device was lost at runtime and recovery failed.
    #[error("GPU device lost and could not be recovered after {attempts} attempts")]
    GfxDeviceLost {
        /// Number of recovery attempts made before giving up
        attempts: u32,
    },

    /// Configuration file was malformed or carried invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An allocation was refused (host or device memory).
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A resource failed to load; the descriptor hash is poisoned.
    #[error("Resource load failed: {name}: {reason}")]
    ResourceLoadFailed {
        /// Resource name from the descriptor
        name: String,
        /// Loader-provided failure reason
        reason: String,
    },

    /// A resource descriptor hash collided with a previously failed load.
    #[error("Resource descriptor poisoned by earlier failure: {0}")]
    ResourcePoisoned(String),

    /// The requested scene was not found on disk.
    #[error("Missing scene data: {0}")]
    MissingSceneData(String),

    // ========================================================================
    // Renderer Errors
    // ========================================================================
    /// Command buffer validation produced structural errors.
    #[error("Command buffer validation failed: {0}")]
    CommandBufferInvalid(String),

    /// A submitted command buffer failed backend replay after one retry.
    #[error("Command buffer submission failed: {0}")]
    SubmitFailed(String),

    /// Render target lookup with a stale or foreign ID.
    #[error("Unknown render target: {0}")]
    UnknownRenderTarget(String),

    /// Shader compilation failed; a default program is substituted.
    #[error("Shader compile failed: {name}: {log}")]
    ShaderCompileFailed {
        /// Program name
        name: String,
        /// Compiler log
        log: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (configuration).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scene save file had a bad magic number or was truncated.
    #[error("Corrupt save file: {0}")]
    SaveCorrupt(String),

    /// Scene save file carries an unsupported version.
    #[error("Unsupported save version: {0}")]
    SaveVersion(u32),

    // ========================================================================
    // Concurrency Errors
    // ========================================================================
    /// A task join exceeded its timeout during teardown.
    #[error("Task join timed out after {0} seconds")]
    TaskJoinTimeout(u64),
}

impl DivideError {
    /// Maps fatal initialization errors to the process exit code space.
    ///
    /// Non-fatal errors map to [`ErrorCode::NoError`]; the kernel absorbs
    /// those at a lower layer and never exits on them.
    #[must_use]
    pub fn exit_code(&self) -> ErrorCode {
        match self {
            Self::PlatformInit(_) => ErrorCode::PlatformInitError,
            Self::GfxInit(_) => ErrorCode::GfxNotSupported,
            Self::GfxOldHardware(_) => ErrorCode::GlOldHardware,
            Self::GfxDeviceLost { .. } => ErrorCode::GfxDeviceLost,
            Self::ConfigInvalid(_) | Self::Json(_) => ErrorCode::ConfigError,
            Self::OutOfMemory(_) => ErrorCode::NotEnoughRam,
            Self::MissingSceneData(_) => ErrorCode::MissingSceneData,
            _ => ErrorCode::NoError,
        }
    }
}

/// Alias for `Result<T, DivideError>`.
pub type Result<T> = std::result::Result<T, DivideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_map_to_negative_exit_codes() {
        let err = DivideError::GfxInit("no adapter".into());
        assert_eq!(err.exit_code(), ErrorCode::GfxNotSupported);
        assert!((ErrorCode::GfxNotSupported as i32) < 0);
    }

    #[test]
    fn recoverable_errors_do_not_exit() {
        let err = DivideError::ResourceLoadFailed {
            name: "checker".into(),
            reason: "bad bytes".into(),
        };
        assert_eq!(err.exit_code(), ErrorCode::NoError);
    }
}
