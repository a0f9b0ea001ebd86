//! Frame-in-flight synchronization
//!
//! Image-acquired semaphores rotate round-robin because one must be handed to
//! acquire before the image index is known. Everything else belongs to the
//! acquired image's [`ImageSlot`] and is reused only after that slot's fence
//! has signaled.

use crate::render::device::{CommandBufferHandle, FenceHandle, GpuDevice, SemaphoreHandle};
use crate::render::RenderResult;

/// Objects owned by one swapchain image
#[derive(Debug, Clone, Copy)]
pub struct ImageSlot {
    /// Signaled when the lighting submission for this image completes
    pub in_flight: FenceHandle,
    /// Shadow pass commands
    pub shadow_commands: CommandBufferHandle,
    /// Geometry pass commands
    pub geometry_commands: CommandBufferHandle,
    /// Lighting pass commands
    pub lighting_commands: CommandBufferHandle,
    /// Shadow pass finished
    pub shadow_complete: SemaphoreHandle,
    /// Geometry pass finished
    pub geometry_complete: SemaphoreHandle,
    /// Lighting pass finished; present waits on it
    pub render_complete: SemaphoreHandle,
}

impl ImageSlot {
    fn new(device: &mut dyn GpuDevice) -> RenderResult<Self> {
        Ok(Self {
            in_flight: device.create_fence(true)?,
            shadow_commands: device.allocate_command_buffer()?,
            geometry_commands: device.allocate_command_buffer()?,
            lighting_commands: device.allocate_command_buffer()?,
            shadow_complete: device.create_semaphore()?,
            geometry_complete: device.create_semaphore()?,
            render_complete: device.create_semaphore()?,
        })
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_semaphore(self.render_complete);
        device.destroy_semaphore(self.geometry_complete);
        device.destroy_semaphore(self.shadow_complete);
        device.free_command_buffer(self.lighting_commands);
        device.free_command_buffer(self.geometry_commands);
        device.free_command_buffer(self.shadow_commands);
        device.destroy_fence(self.in_flight);
    }
}

/// Synchronization for every swapchain image
#[derive(Debug)]
pub struct FrameSync {
    image_acquired: Vec<SemaphoreHandle>,
    slots: Vec<ImageSlot>,
    current_frame: usize,
}

impl FrameSync {
    /// Objects for `image_count` images
    pub fn new(device: &mut dyn GpuDevice, image_count: u32) -> RenderResult<Self> {
        let mut sync = Self { image_acquired: Vec::new(), slots: Vec::new(), current_frame: 0 };
        for _ in 0..image_count {
            if let Err(err) = sync.push_slot(device) {
                sync.destroy(device);
                return Err(err);
            }
        }
        Ok(sync)
    }

    fn push_slot(&mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        self.image_acquired.push(device.create_semaphore()?);
        self.slots.push(ImageSlot::new(device)?);
        Ok(())
    }

    /// Number of slots
    pub fn image_count(&self) -> usize {
        self.slots.len()
    }

    /// Semaphore for the next acquire
    pub fn image_acquired(&self) -> SemaphoreHandle {
        self.image_acquired[self.current_frame]
    }

    /// Rotate to the next acquire semaphore; call after a successful acquire
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.image_acquired.len();
    }

    /// Slot of swapchain image `index`
    pub fn slot(&self, index: u32) -> Option<&ImageSlot> {
        self.slots.get(index as usize)
    }

    /// Destroy every object
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
        for semaphore in self.image_acquired.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.current_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;

    #[test]
    fn acquire_semaphores_rotate_round_robin() {
        let mut device = HeadlessDevice::new(8, 8, 3);
        let mut sync = FrameSync::new(&mut device, 3).unwrap();

        let first = sync.image_acquired();
        sync.advance();
        assert_ne!(sync.image_acquired(), first);
        sync.advance();
        sync.advance();
        assert_eq!(sync.image_acquired(), first);
        assert!(sync.slot(2).is_some());
        assert!(sync.slot(3).is_none());
    }

    #[test]
    fn destroy_releases_everything() {
        let mut device = HeadlessDevice::new(8, 8, 2);
        let mut sync = FrameSync::new(&mut device, 2).unwrap();
        let counts = device.resource_counts();
        assert_eq!(counts.fences, 2);
        assert_eq!(counts.semaphores, 8);
        assert_eq!(counts.command_buffers, 6);

        sync.destroy(&mut device);
        let counts = device.resource_counts();
        assert_eq!((counts.fences, counts.semaphores, counts.command_buffers), (0, 0, 0));
        assert!(device.validation_errors().is_empty());
    }
}
