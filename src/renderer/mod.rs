//! Rendering Subsystem
//!
//! Everything between the scene graph and the GPU: the typed command
//! buffer, the abstract backend, pipeline/shader/render-target caches, the
//! light pool with its shadow generators, and the render pass manager that
//! ties culling to command generation and submission.

pub mod backend;
pub mod command;
pub mod descriptor_set;
pub mod lights;
pub mod pass;
pub mod pipeline;
pub mod shader;
pub mod shadow;
pub mod target;

use serde::{Deserialize, Serialize};

/// The render stages a frame may record. Stage order is not execution
/// order — the pass manager sorts its passes explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RenderStage {
    Display = 0,
    Reflection = 1,
    Refraction = 2,
    Shadow = 3,
}

impl RenderStage {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Display,
        Self::Reflection,
        Self::Refraction,
        Self::Shadow,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Pass types within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RenderPassType {
    PrePass = 0,
    MainPass = 1,
    OitPass = 2,
}

impl RenderPassType {
    pub const COUNT: usize = 3;

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}
