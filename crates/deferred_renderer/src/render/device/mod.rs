//! # GPU device seam
//!
//! [`GpuDevice`] is the boundary between the renderer and everything the
//! renderer does not own: instance and adapter bootstrap, the presentation
//! surface and swapchain, and the memory allocator. Passes describe objects
//! with plain descriptor structs and record work as [`Command`] values, so the
//! same pass code drives the Vulkan backend and the headless recorder.
//!
//! Every object has explicit create/destroy calls. Nothing is reclaimed
//! implicitly while the device is alive; dropping a device releases whatever
//! is still outstanding.

mod handles;
pub mod headless;
pub mod vulkan;

use std::path::PathBuf;

use ash::vk;

pub use handles::*;

use crate::render::RenderResult;

/// Where buffer memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// GPU-only; filled through staging uploads
    DeviceLocal,
    /// Mappable and coherent; written directly every frame
    HostVisible,
}

/// Buffer creation parameters
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Debug name
    pub label: &'static str,
    /// Size in bytes
    pub size: u64,
    /// Vulkan usage flags
    pub usage: vk::BufferUsageFlags,
    /// Memory placement
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// Host-visible uniform buffer
    pub fn uniform(label: &'static str, size: u64) -> Self {
        Self { label, size, usage: vk::BufferUsageFlags::UNIFORM_BUFFER, location: MemoryLocation::HostVisible }
    }
}

/// Image creation parameters; the backend also creates a view covering every
/// mip level and layer (2D, or 2D array when `array_layers > 1`)
#[derive(Debug, Clone)]
pub struct ImageDesc {
    /// Debug name
    pub label: &'static str,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Mip chain length
    pub mip_levels: u32,
    /// Array layers
    pub array_layers: u32,
}

impl ImageDesc {
    /// Aspect covered by the default view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if is_depth_format(self.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// True for depth (and depth-stencil) formats
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Min/mag filter
    pub filter: vk::Filter,
    /// Address mode for u, v and w
    pub address_mode: vk::SamplerAddressMode,
    /// Border color for clamp-to-border
    pub border_color: vk::BorderColor,
    /// Highest mip level sampled
    pub max_lod: f32,
    /// Enable 16x anisotropic filtering
    pub anisotropy: bool,
}

impl SamplerDesc {
    /// Repeating, mipmapped, anisotropic texture sampler
    pub fn texture() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            max_lod: vk::LOD_CLAMP_NONE,
            anisotropy: true,
        }
    }

    /// Nearest, clamped sampler for reading full-screen attachments
    pub fn attachment() -> Self {
        Self {
            filter: vk::Filter::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            max_lod: 1.0,
            anisotropy: false,
        }
    }
}

/// One binding in a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Array size
    pub count: u32,
    /// Stages reading the binding
    pub stages: vk::ShaderStageFlags,
}

/// Descriptor count reserved in a pool for one type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Descriptors of that type
    pub count: u32,
}

/// Resource referenced by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Buffer range
    Buffer {
        /// Buffer
        buffer: BufferHandle,
        /// Start offset
        offset: u64,
        /// Range in bytes
        range: u64,
    },
    /// Image view plus sampler, read in shader-read-only layout
    SampledImage {
        /// Image
        image: ImageHandle,
        /// Sampler
        sampler: SamplerHandle,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
}

/// One descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target binding
    pub binding: u32,
    /// Descriptor type of the binding
    pub descriptor_type: vk::DescriptorType,
    /// New contents
    pub resource: DescriptorResource,
}

/// Render pass attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Format
    pub format: vk::Format,
    /// What happens to contents at pass start
    pub load_op: vk::AttachmentLoadOp,
    /// What happens to contents at pass end
    pub store_op: vk::AttachmentStoreOp,
    /// Layout at pass end
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Cleared at start, stored at end
    pub fn cleared(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout,
        }
    }
}

/// Single-subpass render pass
#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    /// Debug name; also labels recorded work in the headless device
    pub label: &'static str,
    /// Color attachments in binding order
    pub color_attachments: Vec<AttachmentDesc>,
    /// Depth attachment, placed after the color attachments
    pub depth_attachment: Option<AttachmentDesc>,
    /// External dependencies
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: RenderPassHandle,
    /// Attachments in render pass order
    pub attachments: Vec<ImageHandle>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Layers
    pub layers: u32,
}

/// Packed specialization constant data
#[derive(Debug, Clone, Default)]
pub struct SpecializationConstants {
    /// Map entries, one per constant id
    pub entries: Vec<vk::SpecializationMapEntry>,
    /// Tightly packed values
    pub data: Vec<u8>,
}

impl SpecializationConstants {
    fn push(mut self, bytes: [u8; 4]) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let entry = vk::SpecializationMapEntry {
            constant_id: self.entries.len() as u32,
            offset: self.data.len() as u32,
            size: bytes.len(),
        };
        self.entries.push(entry);
        self.data.extend_from_slice(&bytes);
        self
    }

    /// Append a 32-bit integer constant with the next id
    pub fn int(self, value: i32) -> Self {
        self.push(value.to_ne_bytes())
    }

    /// Append a 32-bit float constant with the next id
    pub fn float(self, value: f32) -> Self {
        self.push(value.to_ne_bytes())
    }

    /// Append a boolean, encoded as an integer 0/1
    pub fn flag(self, value: bool) -> Self {
        self.int(i32::from(value))
    }
}

/// One programmable stage
#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    /// Stage
    pub stage: vk::ShaderStageFlags,
    /// Compiled SPIR-V file
    pub path: PathBuf,
    /// Specialization constants for this stage
    pub specialization: Option<SpecializationConstants>,
}

/// Push constant block shared by the listed stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Stages reading the block
    pub stages: vk::ShaderStageFlags,
    /// Size in bytes
    pub size: u32,
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Debug name
    pub label: &'static str,
    /// Render pass the pipeline draws in
    pub render_pass: RenderPassHandle,
    /// Programmable stages
    pub stages: Vec<ShaderStageDesc>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Color attachments written (blend disabled)
    pub color_attachment_count: u32,
    /// Depth test and write
    pub depth_test: bool,
    /// Clamp depth instead of clipping
    pub depth_clamp: bool,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Set layouts in set-index order
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Push constant block
    pub push_constants: Option<PushConstantRange>,
}

/// Attachment clear value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth
    Depth(f32),
}

impl ClearValue {
    /// Backend representation
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
            Self::Depth(depth) => vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 } },
        }
    }
}

/// A recorded command
#[derive(Debug, Clone)]
pub enum Command {
    /// Begin a render pass over the whole framebuffer
    BeginRenderPass {
        /// Render pass
        render_pass: RenderPassHandle,
        /// Target
        framebuffer: FramebufferHandle,
        /// Render area
        extent: vk::Extent2D,
        /// One value per attachment
        clear_values: Vec<ClearValue>,
    },
    /// End the current render pass
    EndRenderPass,
    /// Bind a graphics pipeline
    BindPipeline(PipelineHandle),
    /// Set the dynamic viewport
    SetViewport(vk::Viewport),
    /// Set the dynamic scissor
    SetScissor(vk::Rect2D),
    /// Bind a vertex buffer at binding 0
    BindVertexBuffer(BufferHandle),
    /// Bind a 32-bit index buffer
    BindIndexBuffer(BufferHandle),
    /// Bind descriptor sets starting at `first_set`
    BindDescriptorSets {
        /// Pipeline whose layout is used
        pipeline: PipelineHandle,
        /// First set index
        first_set: u32,
        /// Sets
        sets: Vec<DescriptorSetHandle>,
        /// Offsets for dynamic bindings, in binding order
        dynamic_offsets: Vec<u32>,
    },
    /// Update push constants from offset 0
    PushConstants {
        /// Pipeline whose layout is used
        pipeline: PipelineHandle,
        /// Stages
        stages: vk::ShaderStageFlags,
        /// Bytes
        data: Vec<u8>,
    },
    /// Non-indexed draw
    Draw {
        /// Vertices
        vertex_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices
        index_count: u32,
        /// Instances
        instance_count: u32,
    },
}

/// Queue submission of one command buffer
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Work to execute
    pub command_buffer: CommandBufferHandle,
    /// Semaphores to wait on, with the stage that waits
    pub waits: &'a [(SemaphoreHandle, vk::PipelineStageFlags)],
    /// Semaphores to signal on completion
    pub signals: &'a [SemaphoreHandle],
    /// Fence to signal on completion
    pub fence: Option<FenceHandle>,
}

/// Swapchain properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Image format
    pub format: vk::Format,
    /// Number of images
    pub image_count: u32,
}

impl SwapchainInfo {
    /// Extent
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image index ready for rendering
    Image(u32),
    /// Swapchain out of date; rebuild before rendering
    Stale,
}

/// Result of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued for display
    Presented,
    /// Out of date or suboptimal; rebuild next frame
    Stale,
}

/// Device limits the renderer depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Alignment for dynamic uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest push constant block
    pub max_push_constants_size: u32,
}

/// GPU device abstraction consumed by the renderer
pub trait GpuDevice {
    /// Device limits
    fn limits(&self) -> DeviceLimits;

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle>;
    /// Copy `data` into a host-visible buffer at `offset`
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;
    /// Fill a device-local buffer through a staging copy, waiting for completion
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()>;
    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Create an image and its view
    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<ImageHandle>;
    /// Upload RGBA8 pixels to mip 0, generate the remaining mips and leave the
    /// image in shader-read-only layout, waiting for completion
    fn upload_texture(&mut self, image: ImageHandle, pixels: &[u8]) -> RenderResult<()>;
    /// Destroy an image and its view
    fn destroy_image(&mut self, image: ImageHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> RenderResult<SamplerHandle>;
    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&mut self, bindings: &[LayoutBinding]) -> RenderResult<DescriptorSetLayoutHandle>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);
    /// Create a descriptor pool
    fn create_descriptor_pool(&mut self, sizes: &[PoolSize], max_sets: u32) -> RenderResult<DescriptorPoolHandle>;
    /// Destroy a pool and every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);
    /// Allocate one set
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle>;
    /// Write descriptors into a set
    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()>;

    /// Create a render pass
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle>;
    /// Destroy a render pass
    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle);
    /// Create a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Create a graphics pipeline through the device pipeline cache
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineHandle>;
    /// Destroy a pipeline and its layout
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Allocate a primary command buffer
    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferHandle>;
    /// Free a command buffer
    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle);
    /// Reset and begin recording
    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()>;
    /// Record one command
    fn record(&mut self, command_buffer: CommandBufferHandle, command: Command) -> RenderResult<()>;
    /// Finish recording
    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()>;

    /// Create a fence
    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle>;
    /// Block until the fence signals; no timeout
    fn wait_fence(&mut self, fence: FenceHandle) -> RenderResult<()>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()>;
    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);
    /// Create a semaphore
    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle>;
    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Submit work to the graphics queue
    fn submit(&mut self, submission: &Submission<'_>) -> RenderResult<()>;
    /// Block until the device is idle
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Current swapchain properties
    fn swapchain_info(&self) -> SwapchainInfo;
    /// Swapchain images, indexed by acquire index
    fn swapchain_images(&self) -> Vec<ImageHandle>;
    /// Rebuild the swapchain for a new surface size
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()>;
    /// Acquire the next image, signaling `signal` when it is ready
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome>;
    /// Present an image once `wait` signals
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_constants_pack_sequential_ids() {
        let spec = SpecializationConstants::default().int(10).int(3).flag(true).float(0.5).flag(false);

        assert_eq!(spec.entries.len(), 5);
        assert_eq!(spec.data.len(), 20);
        assert_eq!(spec.entries[3].constant_id, 3);
        assert_eq!(spec.entries[3].offset, 12);
        assert_eq!(&spec.data[12..16], &0.5f32.to_ne_bytes());
        assert_eq!(&spec.data[8..12], &1i32.to_ne_bytes());
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        let desc = ImageDesc {
            label: "depth",
            width: 4,
            height: 4,
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            mip_levels: 1,
            array_layers: 1,
        };
        assert_eq!(desc.aspect(), vk::ImageAspectFlags::DEPTH);
    }
}
