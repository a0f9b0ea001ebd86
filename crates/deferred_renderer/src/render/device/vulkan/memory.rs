//! Device memory helpers

use ash::vk;

use crate::render::{RenderError, RenderResult};

/// Index of a memory type allowed by `type_bits` with all of `flags`
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..properties.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0 && properties.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(RenderError::NoSuitableMemoryType)
}

/// Allocate and bind memory for `buffer`
pub fn allocate_buffer_memory(
    device: &ash::Device,
    properties: &vk::PhysicalDeviceMemoryProperties,
    buffer: vk::Buffer,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory = allocate(device, properties, requirements, flags)?;
    if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(RenderError::Api(err));
    }
    Ok(memory)
}

/// Allocate and bind memory for `image`
pub fn allocate_image_memory(
    device: &ash::Device,
    properties: &vk::PhysicalDeviceMemoryProperties,
    image: vk::Image,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory = allocate(device, properties, requirements, flags)?;
    if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(RenderError::Api(err));
    }
    Ok(memory)
}

fn allocate(
    device: &ash::Device,
    properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(properties, requirements.memory_type_bits, flags)?;
    let allocate_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    unsafe { device.allocate_memory(&allocate_info, None) }.map_err(RenderError::Api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = *flags;
        }
        props
    }

    #[test]
    fn picks_first_type_with_required_flags_and_allowed_bit() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert!(matches!(
            find_memory_type(&props, 0b001, host),
            Err(RenderError::NoSuitableMemoryType)
        ));
    }
}
