#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod ai;
pub mod config;
pub mod core;
pub mod errors;
pub mod renderer;
pub mod resources;
pub mod save;
pub mod scene;
pub mod utils;

pub use config::Configuration;
pub use core::guid::Guid;
pub use core::kernel::{Engine, FrameAdvance, Kernel};
pub use core::task_pool::{TaskPool, TaskPriority};
pub use errors::{DivideError, ErrorCode, Result};
pub use renderer::backend::{NullBackend, RenderBackend};
pub use renderer::command::CommandBuffer;
pub use renderer::pass::RenderPassManager;
pub use resources::cache::ResourceCache;
pub use scene::camera::Camera;
pub use scene::graph::SceneGraph;
