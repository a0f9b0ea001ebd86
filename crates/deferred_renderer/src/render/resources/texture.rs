//! Deduplicating texture cache
//!
//! Textures are keyed by path and format. A blank or absent path resolves to
//! the default texture, which is loaded when the cache is created. Uploads
//! block until the GPU copy and mip generation finish.

use std::collections::{HashMap, HashSet};

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::assets::{ImageData, ImageSource};
use crate::render::device::{GpuDevice, ImageDesc, ImageHandle, SamplerDesc, SamplerHandle};
use crate::render::{RenderError, RenderResult};

new_key_type! {
    /// Texture owned by a [`TextureCache`]
    pub struct TextureId;
}

/// Format for color data sampled with sRGB decoding
pub const ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;
/// Format for linear data such as normal and metal/roughness maps
pub const LINEAR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A sampled GPU texture
#[derive(Debug, Clone)]
pub struct Texture {
    /// Image and view
    pub image: ImageHandle,
    /// Source path
    pub path: String,
    /// Pixel format
    pub format: vk::Format,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Mip chain length
    pub mip_levels: u32,
    /// Any pixel with alpha below 255
    pub has_transparency: bool,
}

/// Path-keyed texture store sharing one sampler
pub struct TextureCache {
    source: Box<dyn ImageSource>,
    textures: SlotMap<TextureId, Texture>,
    by_path: HashMap<(String, vk::Format), TextureId>,
    default_texture: TextureId,
    sampler: SamplerHandle,
}

impl TextureCache {
    /// Create the shared sampler and load the default texture from
    /// `default_path`; a white pixel stands in if that fails
    pub fn new(device: &mut dyn GpuDevice, source: Box<dyn ImageSource>, default_path: &str) -> RenderResult<Self> {
        let sampler = device.create_sampler(&SamplerDesc::texture())?;
        let default_image = source.load(default_path).unwrap_or_else(|err| {
            log::warn!("Default texture unavailable ({}); using a white pixel", err);
            ImageData::solid_color(1, 1, [255; 4])
        });

        let mut cache = Self {
            source,
            textures: SlotMap::with_key(),
            by_path: HashMap::new(),
            default_texture: TextureId::default(),
            sampler,
        };
        match cache.insert(device, default_path, ALBEDO_FORMAT, &default_image) {
            Ok(id) => cache.default_texture = id,
            Err(err) => {
                cache.cleanup(device);
                return Err(err);
            }
        }
        Ok(cache)
    }

    fn insert(
        &mut self,
        device: &mut dyn GpuDevice,
        path: &str,
        format: vk::Format,
        data: &ImageData,
    ) -> RenderResult<TextureId> {
        if data.width == 0 || data.height == 0 {
            return Err(RenderError::invalid(format!("texture '{path}' has no pixels")));
        }
        let mip_levels = data.mip_levels();
        let image = device.create_image(&ImageDesc {
            label: "texture",
            width: data.width,
            height: data.height,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            mip_levels,
            array_layers: 1,
        })?;
        if let Err(err) = device.upload_texture(image, &data.data) {
            device.destroy_image(image);
            return Err(err);
        }

        log::debug!("Texture '{}' uploaded ({}x{}, {} mips)", path, data.width, data.height, mip_levels);
        let id = self.textures.insert(Texture {
            image,
            path: path.to_string(),
            format,
            width: data.width,
            height: data.height,
            mip_levels,
            has_transparency: data.has_transparency(),
        });
        self.by_path.insert((path.to_string(), format), id);
        Ok(id)
    }

    /// Texture for `path` in `format`, loading it on the first request
    ///
    /// Blank or absent paths give the default texture. A path the image
    /// source can't load is an error.
    pub fn get_or_create(
        &mut self,
        device: &mut dyn GpuDevice,
        path: Option<&str>,
        format: vk::Format,
    ) -> RenderResult<TextureId> {
        let Some(path) = path.map(str::trim).filter(|path| !path.is_empty()) else {
            return Ok(self.default_texture);
        };
        if let Some(&id) = self.by_path.get(&(path.to_string(), format)) {
            return Ok(id);
        }
        let data = self.source.load(path)?;
        self.insert(device, path, format, &data)
    }

    /// Look up a texture
    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    /// Texture used for absent paths
    pub fn default_texture(&self) -> TextureId {
        self.default_texture
    }

    /// Sampler every texture is bound with
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    /// Number of live textures, default included
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// True before the default texture exists
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Ids of every live texture
    pub fn ids(&self) -> HashSet<TextureId> {
        self.textures.keys().collect()
    }

    /// Destroy every texture not in `keep`; the default texture always stays
    pub fn release_except(&mut self, device: &mut dyn GpuDevice, keep: &HashSet<TextureId>) {
        let default_texture = self.default_texture;
        let released: Vec<TextureId> =
            self.textures.keys().filter(|id| *id != default_texture && !keep.contains(id)).collect();
        for id in released {
            if let Some(texture) = self.textures.remove(id) {
                log::debug!("Texture '{}' released", texture.path);
                self.by_path.remove(&(texture.path, texture.format));
                device.destroy_image(texture.image);
            }
        }
    }

    /// Destroy every texture and the sampler
    pub fn cleanup(&mut self, device: &mut dyn GpuDevice) {
        for (_, texture) in self.textures.drain() {
            device.destroy_image(texture.image);
        }
        self.by_path.clear();
        device.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetError, MemoryImageSource};
    use crate::render::device::headless::HeadlessDevice;

    fn cache(device: &mut HeadlessDevice) -> TextureCache {
        let source = MemoryImageSource::new()
            .with_image("default.png", ImageData::solid_color(2, 2, [255; 4]))
            .with_image("brick.png", ImageData::solid_color(8, 4, [200, 80, 60, 255]))
            .with_image("glass.png", ImageData::solid_color(4, 4, [200, 200, 255, 128]));
        TextureCache::new(device, Box::new(source), "default.png").unwrap()
    }

    #[test]
    fn same_path_returns_same_texture() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let mut cache = cache(&mut device);

        let first = cache.get_or_create(&mut device, Some("brick.png"), ALBEDO_FORMAT).unwrap();
        let second = cache.get_or_create(&mut device, Some("brick.png"), ALBEDO_FORMAT).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 2);
        assert_eq!(device.upload_count(), 2);
        assert_eq!(cache.get(first).unwrap().mip_levels, 4);
    }

    #[test]
    fn blank_or_absent_paths_give_default_texture() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let mut cache = cache(&mut device);
        let default = cache.default_texture();

        assert_eq!(cache.get_or_create(&mut device, None, ALBEDO_FORMAT).unwrap(), default);
        assert_eq!(cache.get_or_create(&mut device, Some("  "), LINEAR_FORMAT).unwrap(), default);
        assert!(device.is_uploaded(cache.get(default).unwrap().image));
    }

    #[test]
    fn unknown_path_is_an_asset_error() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let mut cache = cache(&mut device);

        let result = cache.get_or_create(&mut device, Some("missing.png"), ALBEDO_FORMAT);
        assert!(matches!(result, Err(RenderError::Asset(AssetError::NotFound(_)))));
    }

    #[test]
    fn transparency_is_detected_and_cleanup_releases_images() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let mut cache = cache(&mut device);

        let glass = cache.get_or_create(&mut device, Some("glass.png"), ALBEDO_FORMAT).unwrap();
        assert!(cache.get(glass).unwrap().has_transparency);
        assert!(!cache.get(cache.default_texture()).unwrap().has_transparency);

        cache.cleanup(&mut device);
        let counts = device.resource_counts();
        assert_eq!((counts.images, counts.samplers), (0, 0));
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn missing_default_falls_back_to_white_pixel() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let cache = TextureCache::new(&mut device, Box::new(MemoryImageSource::new()), "nowhere.png").unwrap();
        let default = cache.get(cache.default_texture()).unwrap();
        assert_eq!((default.width, default.height), (1, 1));
    }
}
