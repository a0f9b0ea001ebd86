//! G-buffer attachments
//!
//! Three color targets and a depth target sized to the swapchain. They are
//! written by the geometry pass and sampled by the lighting pass, so every
//! image carries both attachment and sampled usage.

use ash::vk;

use crate::render::device::{GpuDevice, ImageDesc, ImageHandle};
use crate::render::RenderResult;

/// Base color and alpha
pub const ALBEDO_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// View-space normal packed into 10-10-10-2
pub const NORMAL_FORMAT: vk::Format = vk::Format::A2B10G10R10_UNORM_PACK32;
/// Metallic, roughness and occlusion
pub const PBR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Scene depth
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Color formats in attachment order
pub const COLOR_FORMATS: [vk::Format; 3] = [ALBEDO_FORMAT, NORMAL_FORMAT, PBR_FORMAT];

/// Geometry pass output
#[derive(Debug, Clone, Copy)]
pub struct GBuffer {
    albedo: ImageHandle,
    normal: ImageHandle,
    pbr: ImageHandle,
    depth: ImageHandle,
    extent: vk::Extent2D,
}

impl GBuffer {
    /// Allocate every attachment at `extent`
    pub fn new(device: &mut dyn GpuDevice, extent: vk::Extent2D) -> RenderResult<Self> {
        let color_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let desc = |label, format, usage| ImageDesc {
            label,
            width: extent.width,
            height: extent.height,
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
        };

        let mut created = Vec::with_capacity(4);
        let descs = [
            desc("gbuffer albedo", ALBEDO_FORMAT, color_usage),
            desc("gbuffer normal", NORMAL_FORMAT, color_usage),
            desc("gbuffer pbr", PBR_FORMAT, color_usage),
            desc(
                "gbuffer depth",
                DEPTH_FORMAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ),
        ];
        for desc in &descs {
            match device.create_image(desc) {
                Ok(image) => created.push(image),
                Err(err) => {
                    for image in created {
                        device.destroy_image(image);
                    }
                    return Err(err);
                }
            }
        }

        log::debug!("G-buffer created at {}x{}", extent.width, extent.height);
        Ok(Self { albedo: created[0], normal: created[1], pbr: created[2], depth: created[3], extent })
    }

    /// Size shared by every attachment
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Color targets in attachment order
    pub fn color_attachments(&self) -> [ImageHandle; 3] {
        [self.albedo, self.normal, self.pbr]
    }

    /// Depth target
    pub fn depth_attachment(&self) -> ImageHandle {
        self.depth
    }

    /// Colors followed by depth, the framebuffer attachment order
    pub fn attachments(&self) -> Vec<ImageHandle> {
        vec![self.albedo, self.normal, self.pbr, self.depth]
    }

    /// Release every attachment
    pub fn destroy(self, device: &mut dyn GpuDevice) {
        for image in self.attachments() {
            device.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;

    #[test]
    fn four_attachments_at_surface_size() {
        let mut device = HeadlessDevice::new(320, 200, 2);
        let gbuffer = GBuffer::new(&mut device, vk::Extent2D { width: 320, height: 200 }).unwrap();

        assert_eq!(gbuffer.attachments().len(), 4);
        assert_eq!(gbuffer.attachments()[3], gbuffer.depth_attachment());
        assert_eq!(device.resource_counts().images, 4);

        gbuffer.destroy(&mut device);
        assert_eq!(device.resource_counts().images, 0);
    }

    #[test]
    fn zero_extent_creates_nothing() {
        let mut device = HeadlessDevice::new(320, 200, 2);
        assert!(GBuffer::new(&mut device, vk::Extent2D { width: 0, height: 200 }).is_err());
        assert_eq!(device.resource_counts().images, 0);
    }
}
