//! Typed handles for device objects
//!
//! Each backend issues keys from its own slot maps; a handle is only
//! meaningful to the device that created it.

use slotmap::new_key_type;

new_key_type! {
    /// GPU buffer
    pub struct BufferHandle;
    /// GPU image together with its default view
    pub struct ImageHandle;
    /// Texture sampler
    pub struct SamplerHandle;
    /// Descriptor set layout
    pub struct DescriptorSetLayoutHandle;
    /// Descriptor pool
    pub struct DescriptorPoolHandle;
    /// Descriptor set allocated from a pool
    pub struct DescriptorSetHandle;
    /// Render pass
    pub struct RenderPassHandle;
    /// Framebuffer
    pub struct FramebufferHandle;
    /// Graphics pipeline with its layout
    pub struct PipelineHandle;
    /// Primary command buffer
    pub struct CommandBufferHandle;
    /// CPU-GPU fence
    pub struct FenceHandle;
    /// GPU-GPU semaphore
    pub struct SemaphoreHandle;
}
