//! Render pass and graphics pipeline construction

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use ash::vk;

use crate::render::device::{AttachmentDesc, PipelineDesc, RenderPassDesc};
use crate::render::{RenderError, RenderResult};

const ENTRY_POINT: &[u8] = b"main\0";

/// Shader module destroyed on drop
struct ShaderModule<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn from_file(device: &'a ash::Device, path: &Path) -> RenderResult<Self> {
        let shader_error = |source: std::io::Error| RenderError::Shader { path: path.to_path_buf(), source };
        let mut file = File::open(path).map_err(shader_error)?;
        let code = ash::util::read_spv(&mut file).map_err(shader_error)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

fn attachment_description(desc: &AttachmentDesc) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(desc.format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(desc.load_op)
        .store_op(desc.store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(desc.final_layout)
        .build()
}

/// Single-subpass render pass; color attachments first, depth last
pub(super) fn create_render_pass(device: &ash::Device, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass> {
    let mut attachments: Vec<_> = desc.color_attachments.iter().map(attachment_description).collect();
    let color_refs: Vec<_> = (0..attachments.len())
        .map(|index| vk::AttachmentReference {
            attachment: u32::try_from(index).unwrap_or(u32::MAX),
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();
    let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
        attachments.push(attachment_description(depth));
        vk::AttachmentReference {
            attachment: u32::try_from(attachments.len() - 1).unwrap_or(u32::MAX),
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass.build()];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&desc.dependencies);

    unsafe { device.create_render_pass(&create_info, None) }.map_err(RenderError::Api)
}

/// Graphics pipeline and its layout
///
/// Viewport and scissor are dynamic; blending is disabled on every color
/// attachment.
pub(super) fn create_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    desc: &PipelineDesc,
    render_pass: vk::RenderPass,
    set_layouts: &[vk::DescriptorSetLayout],
) -> RenderResult<(vk::Pipeline, vk::PipelineLayout)> {
    let entry_point = CStr::from_bytes_with_nul(ENTRY_POINT)
        .map_err(|err| RenderError::InitializationFailed(err.to_string()))?;

    let modules = desc
        .stages
        .iter()
        .map(|stage| ShaderModule::from_file(device, &stage.path))
        .collect::<RenderResult<Vec<_>>>()?;

    let specialization_infos: Vec<_> = desc
        .stages
        .iter()
        .map(|stage| {
            stage.specialization.as_ref().map(|spec| {
                vk::SpecializationInfo::builder().map_entries(&spec.entries).data(&spec.data).build()
            })
        })
        .collect();

    let stages: Vec<_> = desc
        .stages
        .iter()
        .zip(&modules)
        .zip(&specialization_infos)
        .map(|((stage, module), specialization)| {
            let mut info = vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(module.module)
                .name(entry_point);
            if let Some(specialization) = specialization {
                info = info.specialization_info(specialization);
            }
            info.build()
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&desc.vertex_bindings)
        .vertex_attribute_descriptions(&desc.vertex_attributes);
    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(desc.depth_clamp)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample =
        vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
    let blend_attachments: Vec<_> = (0..desc.color_attachment_count)
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let push_constant_ranges: Vec<_> = desc
        .push_constants
        .iter()
        .map(|range| vk::PushConstantRange { stage_flags: range.stages, offset: 0, size: range.size })
        .collect();
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(RenderError::Api)?;

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    match unsafe { device.create_graphics_pipelines(cache, &[create_info], None) } {
        Ok(pipelines) => {
            log::debug!("Created pipeline '{}'", desc.label);
            Ok((pipelines[0], layout))
        }
        Err((_, err)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(RenderError::Api(err))
        }
    }
}
