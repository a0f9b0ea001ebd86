//! # Deferred Renderer
//!
//! Rendering core of a real-time 3D engine built on Vulkan.
//!
//! ## Features
//!
//! - **Cascaded Shadows**: three-cascade directional shadow map rendered in one layered pass
//! - **Deferred Shading**: G-buffer with albedo, normal, metal/roughness and depth attachments
//! - **Pooled Bindings**: dynamic-offset material uniforms and cached texture descriptor sets
//! - **Frames in Flight**: per-swapchain-image fences, command buffers and uniforms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deferred_renderer::prelude::*;
//!
//! fn frame<D: GpuDevice>(renderer: &mut Renderer<D>, scene: &Scene) -> RenderResult<()> {
//!     let surface = SurfaceState::new(1280, 720);
//!     match renderer.render(surface, scene)? {
//!         FrameStatus::Presented | FrameStatus::Skipped => {}
//!         FrameStatus::SurfaceStale => log::debug!("swapchain will be rebuilt next frame"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Window creation, asset import, instance bootstrap and shader compilation live
//! outside this crate; they plug in through [`engine::Window`],
//! [`assets::ImageSource`], [`render::device::vulkan::VulkanContext`] and the
//! SPIR-V files under [`core::config::EngineProperties::shader_dir`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for applications driving the renderer
pub mod prelude {
    pub use crate::assets::{AssetError, FileImageSource, ImageData, ImageSource, MaterialData, MeshData, ModelData};
    pub use crate::core::config::EngineProperties;
    pub use crate::engine::{Application, Engine, EngineError, Window};
    pub use crate::events::{EventQueue, InputEvent, Key};
    pub use crate::foundation::math::{Mat4, Quat, Vec2, Vec3, Vec4};
    pub use crate::render::device::GpuDevice;
    pub use crate::render::{FrameStatus, RenderError, RenderResult, Renderer, SurfaceState};
    pub use crate::scene::{Camera, Entity, Light, Projection, Scene, SceneError};
}
