//! Renderer error types

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::assets::AssetError;
use crate::scene::SceneError;

/// Errors produced by the renderer and its device backends
#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan call failed
    #[error("Vulkan API error: {0}")]
    Api(vk::Result),

    /// A handle did not resolve to a live object
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The call is not valid in the current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What was wrong
        reason: String,
    },

    /// Startup could not complete
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory heap satisfies the request
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// SPIR-V could not be read
    #[error("Failed to load shader {path:?}: {source}")]
    Shader {
        /// Shader file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Loaded models carry more materials than the material buffer holds
    #[error("Material limit exceeded: {requested} materials, capacity {max}")]
    MaterialLimitExceeded {
        /// Materials across all loaded models
        requested: usize,
        /// Configured capacity
        max: usize,
    },

    /// Texture or model data failed to load
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Scene invariant violated
    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}
