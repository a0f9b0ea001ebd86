//! Swapchain creation and the surface property choices behind it

use ash::extensions::khr;
use ash::vk;

use super::context::VulkanContext;
use crate::render::{RenderError, RenderResult};

/// Prefer sRGB BGRA8, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO when vsync is on; otherwise mailbox, then immediate, then FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Requested image count clamped to the surface limits; a `max_image_count`
/// of zero means unbounded
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let mut count = requested;
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count.max(capabilities.min_image_count)
}

/// Surface extent, or the window size clamped to the surface limits when the
/// surface leaves it to the swapchain
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// Swapchain with its images and views
pub struct Swapchain {
    loader: khr::Swapchain,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Build a swapchain for the context's surface, retiring `old` if given
    pub fn new(
        context: &VulkanContext,
        requested_images: u32,
        vsync: bool,
        width: u32,
        height: u32,
        old: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let surface_loader = &context.surface_loader;
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(context.physical_device, context.surface)
                    .map_err(RenderError::Api)?,
                surface_loader
                    .get_physical_device_surface_formats(context.physical_device, context.surface)
                    .map_err(RenderError::Api)?,
                surface_loader
                    .get_physical_device_surface_present_modes(context.physical_device, context.surface)
                    .map_err(RenderError::Api)?,
            )
        };

        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| RenderError::InitializationFailed("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, vsync);
        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities, requested_images);

        log::debug!(
            "Creating swapchain {}x{} with {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let loader = khr::Swapchain::new(&context.instance, &context.device);
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(RenderError::Api)?;
        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(RenderError::Api(err));
            }
        };

        let mut swapchain =
            Self { loader, handle, format: surface_format.format, extent, images, views: Vec::new() };
        for &image in &swapchain.images {
            match create_view(&context.device, image, swapchain.format) {
                Ok(view) => swapchain.views.push(view),
                Err(err) => {
                    swapchain.destroy(&context.device);
                    return Err(err);
                }
            }
        }
        Ok(swapchain)
    }

    /// Raw handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Images paired with their views
    pub fn images(&self) -> impl Iterator<Item = (vk::Image, vk::ImageView)> + '_ {
        self.images.iter().copied().zip(self.views.iter().copied())
    }

    /// Number of images
    pub fn image_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.images.len() as u32;
        count
    }

    /// Acquire the next image; `None` when the swapchain is out of date
    pub fn acquire(&self, signal: vk::Semaphore) -> RenderResult<Option<u32>> {
        match unsafe { self.loader.acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null()) } {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(err) => Err(RenderError::Api(err)),
        }
    }

    /// Queue `index` for presentation; `false` when the swapchain is out of
    /// date or suboptimal
    pub fn present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> RenderResult<bool> {
        let swapchains = [self.handle];
        let indices = [index];
        let waits = [wait];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(!suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(err) => Err(RenderError::Api(err)),
        }
    }

    /// Destroy the views and the swapchain
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

fn create_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.create_image_view(&create_info, None) }.map_err(RenderError::Api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, ..unorm };

        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_follows_vsync() {
        let all = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(choose_image_count(&capabilities(2, 8), 3), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2), 3), 2);
        assert_eq!(choose_image_count(&capabilities(4, 0), 3), 4);
        assert_eq!(choose_image_count(&capabilities(2, 0), 6), 6);
    }

    #[test]
    fn extent_uses_surface_or_clamped_window_size() {
        let mut caps = capabilities(2, 3);
        assert_eq!(choose_extent(&caps, 8000, 600), vk::Extent2D { width: 4096, height: 600 });

        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&caps, 1024, 768), vk::Extent2D { width: 800, height: 600 });
    }
}
