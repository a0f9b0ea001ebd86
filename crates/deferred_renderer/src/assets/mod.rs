//! Asset interfaces
//!
//! Decoding meshes and images is the job of external importers. This module
//! defines the data they hand over ([`ModelData`], [`ImageData`]) and the
//! [`ImageSource`] seam the texture cache pulls pixels through.

mod image_loader;
mod model_data;

use std::path::PathBuf;

use thiserror::Error;

pub use image_loader::{FileImageSource, ImageData, ImageSource, MemoryImageSource};
pub use model_data::{MaterialData, MeshData, ModelData};

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// File does not exist
    #[error("Asset not found: {0}")]
    NotFound(PathBuf),

    /// File exists but could not be decoded
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),

    /// Decoder does not handle this format
    #[error("Unsupported asset format: {0}")]
    UnsupportedFormat(String),
}
