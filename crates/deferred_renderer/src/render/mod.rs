//! # Rendering
//!
//! Deferred renderer over the [`device::GpuDevice`] seam. Each frame runs a
//! layered shadow pass, a G-buffer geometry pass and a full-screen lighting
//! pass that writes the swapchain image.

pub mod commands;
pub mod device;
mod error;
pub mod passes;
mod renderer;
pub mod resources;

pub use commands::CommandRecorder;
pub use error::{RenderError, RenderResult};
pub use renderer::{FrameStatus, Renderer, SurfaceState};
