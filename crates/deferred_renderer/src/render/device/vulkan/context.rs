//! Vulkan bootstrap hand-off
//!
//! Instance, adapter and logical device creation happen outside the renderer.
//! The bootstrap code fills a [`VulkanContext`] and may use the helpers here
//! so its choices honor [`EngineProperties`](crate::core::config::EngineProperties).

use std::ffi::{c_void, CStr};

use ash::extensions::khr::Surface;
use ash::vk;

/// Objects created by the external bootstrap
///
/// The bootstrap keeps ownership: it destroys the device, surface and instance
/// after every [`VulkanDevice`](super::VulkanDevice) built from this context
/// has been dropped.
#[derive(Clone)]
pub struct VulkanContext {
    /// Instance function table
    pub instance: ash::Instance,
    /// Selected adapter
    pub physical_device: vk::PhysicalDevice,
    /// Logical device function table
    pub device: ash::Device,
    /// Queue used for graphics, transfer and present
    pub graphics_queue: vk::Queue,
    /// Family of `graphics_queue`
    pub graphics_queue_family: u32,
    /// Surface extension loader
    pub surface_loader: Surface,
    /// Presentation surface
    pub surface: vk::SurfaceKHR,
    /// Whether the `samplerAnisotropy` feature was enabled on the device
    pub sampler_anisotropy: bool,
}

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// Instance layers to enable
pub fn instance_layers(validate: bool) -> Vec<&'static CStr> {
    if !validate {
        return Vec::new();
    }
    CStr::from_bytes_with_nul(VALIDATION_LAYER).into_iter().collect()
}

/// Device features the passes rely on: layered shadow rendering needs
/// geometry shaders and depth clamping; anisotropy is optional
pub fn required_device_features(anisotropy_available: bool) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::builder()
        .geometry_shader(true)
        .depth_clamp(true)
        .sampler_anisotropy(anisotropy_available)
        .build()
}

/// Messenger routing validation output to `log`
pub fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// What the bootstrap learned about one adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Driver-reported name
    pub name: String,
    /// Discrete GPU
    pub discrete: bool,
    /// Has a queue family supporting graphics and present
    pub suitable: bool,
}

/// Pick an adapter: the suitable one named `preferred` if present, otherwise
/// the first suitable discrete GPU, otherwise the first suitable adapter
pub fn choose_physical_device(candidates: &[DeviceCandidate], preferred: Option<&str>) -> Option<usize> {
    if let Some(name) = preferred {
        if let Some(index) = candidates.iter().position(|c| c.suitable && c.name == name) {
            return Some(index);
        }
        log::warn!("Requested physical device '{}' not found or unsuitable", name);
    }
    candidates
        .iter()
        .position(|c| c.suitable && c.discrete)
        .or_else(|| candidates.iter().position(|c| c.suitable))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, discrete: bool, suitable: bool) -> DeviceCandidate {
        DeviceCandidate { name: name.to_string(), discrete, suitable }
    }

    #[test]
    fn preferred_name_wins_when_suitable() {
        let devices = [candidate("iGPU", false, true), candidate("dGPU", true, true)];
        assert_eq!(choose_physical_device(&devices, Some("iGPU")), Some(0));
    }

    #[test]
    fn falls_back_to_discrete_then_any() {
        let devices = [candidate("iGPU", false, true), candidate("dGPU", true, true)];
        assert_eq!(choose_physical_device(&devices, Some("missing")), Some(1));

        let devices = [candidate("broken", true, false), candidate("iGPU", false, true)];
        assert_eq!(choose_physical_device(&devices, None), Some(1));

        assert_eq!(choose_physical_device(&[candidate("broken", true, false)], None), None);
    }

    #[test]
    fn validation_layer_only_when_requested() {
        assert!(instance_layers(false).is_empty());
        assert_eq!(instance_layers(true)[0].to_str().unwrap(), "VK_LAYER_KHRONOS_validation");
    }

    #[test]
    fn layered_shadows_need_geometry_shader_and_depth_clamp() {
        let features = required_device_features(false);
        assert_eq!(features.geometry_shader, vk::TRUE);
        assert_eq!(features.depth_clamp, vk::TRUE);
        assert_eq!(features.sampler_anisotropy, vk::FALSE);
    }
}
