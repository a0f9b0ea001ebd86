//! Image loading for texture data

use std::collections::HashMap;
use std::path::Path;

use super::AssetError;

/// Decoded RGBA8 pixels ready for GPU upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Tightly packed RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color.iter().copied().cycle().take((width * height * 4) as usize).collect();
        Self { data, width, height }
    }

    /// True if any pixel is not fully opaque
    pub fn has_transparency(&self) -> bool {
        self.data.chunks_exact(4).any(|px| px[3] < 255)
    }

    /// Full mip chain length for this size
    pub fn mip_levels(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

/// Where the texture cache obtains pixels
pub trait ImageSource {
    /// Decode the image at `path` into RGBA8
    fn load(&self, path: &str) -> Result<ImageData, AssetError>;
}

/// Loads images from disk using the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load(&self, path: &str) -> Result<ImageData, AssetError> {
        let path_ref = Path::new(path);
        if !path_ref.exists() {
            return Err(AssetError::NotFound(path_ref.to_path_buf()));
        }

        log::debug!("Loading image from: {:?}", path_ref);

        let img = image::open(path_ref).map_err(|e| match e {
            image::ImageError::Unsupported(err) => AssetError::UnsupportedFormat(format!("{path}: {err}")),
            other => AssetError::LoadFailed(format!("{path}: {other}")),
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Loaded image {}x{} from {:?}", width, height, path_ref);

        Ok(ImageData { data: rgba.into_raw(), width, height })
    }
}

/// In-memory images keyed by path, for procedural or embedded textures
#[derive(Debug, Default, Clone)]
pub struct MemoryImageSource {
    images: HashMap<String, ImageData>,
}

impl MemoryImageSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under `path`
    pub fn with_image(mut self, path: impl Into<String>, image: ImageData) -> Self {
        self.images.insert(path.into(), image);
        self
    }
}

impl ImageSource for MemoryImageSource {
    fn load(&self, path: &str) -> Result<ImageData, AssetError> {
        self.images.get(path).cloned().ok_or_else(|| AssetError::NotFound(path.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_levels_cover_the_largest_dimension() {
        assert_eq!(ImageData::solid_color(1, 1, [0; 4]).mip_levels(), 1);
        assert_eq!(ImageData::solid_color(256, 64, [0; 4]).mip_levels(), 9);
        assert_eq!(ImageData::solid_color(300, 20, [0; 4]).mip_levels(), 9);
    }

    #[test]
    fn transparency_detects_any_translucent_pixel() {
        let mut image = ImageData::solid_color(2, 2, [255, 255, 255, 255]);
        assert!(!image.has_transparency());
        image.data[7] = 254;
        assert!(image.has_transparency());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = FileImageSource.load("no/such/texture.png").unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }
}
