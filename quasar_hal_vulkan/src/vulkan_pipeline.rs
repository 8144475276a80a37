/// Pipeline - Vulkan implementation of NativePipeline and NativePassFormat
///
/// Pipelines target dynamic rendering: the pass format is the attachment
/// format list chained into `VkPipelineRenderingCreateInfo`, no render pass
/// objects exist.

use ash::vk;
use quasar_hal::backend::{NativeBindingLayout, NativePassFormat, NativePipeline, NativePipelineDesc, NativeShader};
use quasar_hal::pipeline::PassFormatKey;
use quasar_hal::quasar::types::{Format, PrimitiveType};
use quasar_hal::quasar::{Error, Result};
use quasar_hal::hal_err;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::vulkan_binding::vk_layout;
use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_convert::{
    blend_factor_to_vk, blend_op_to_vk, color_write_mask_to_vk, compare_op_to_vk, cull_mode_to_vk,
    format_to_vk, front_face_to_vk, input_rate_to_vk, polygon_mode_to_vk, sample_count_to_vk,
    shader_stage_to_vk, stencil_op_state_to_vk, topology_to_vk,
};
use crate::vulkan_shader::vk_shader;

/// States left to the command list
const DYNAMIC_STATES: [vk::DynamicState; 5] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::STENCIL_REFERENCE,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
    vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE,
];

// ===== PASS FORMAT =====

/// Attachment formats of a dynamic rendering pass
#[derive(Debug)]
pub struct PassFormat {
    pub(crate) color_formats: Vec<vk::Format>,
    pub(crate) depth_format: vk::Format,
    pub(crate) has_stencil: bool,
    pub(crate) samples: vk::SampleCountFlags,
}

impl PassFormat {
    pub(crate) fn new(key: &PassFormatKey) -> Self {
        let depth_format = match key.depth_format {
            Format::Unknown => vk::Format::UNDEFINED,
            format => format_to_vk(format),
        };
        Self {
            color_formats: key.color_formats.iter().map(|f| format_to_vk(*f)).collect(),
            depth_format,
            has_stencil: key.depth_format.has_stencil(),
            samples: sample_count_to_vk(key.sample_count),
        }
    }
}

impl NativePassFormat for PassFormat {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== PIPELINE =====

pub struct Pipeline {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) bind_point: vk::PipelineBindPoint,
    /// The pipeline layout must outlive the pipeline
    _layout: Arc<dyn NativeBindingLayout>,
}

impl Pipeline {
    pub(crate) fn graphics(ctx: Arc<GpuContext>, desc: &NativePipelineDesc<'_>) -> Result<Self> {
        let state = desc.state;
        let layout = vk_layout(desc.binding_layout)
            .ok_or_else(|| Error::InvalidResource("binding layout is not a Vulkan layout".to_string()))?;
        let pass_format = desc
            .pass_format
            .as_any()
            .downcast_ref::<PassFormat>()
            .ok_or_else(|| Error::InvalidResource("pass format is not a Vulkan pass format".to_string()))?;

        // Shader stages
        let shader_stages = desc
            .stages
            .iter()
            .map(|(stage, shader)| {
                let shader = shader_ref(shader)?;
                Ok(vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_to_vk(*stage))
                    .module(shader.module)
                    .name(&shader.entry_point))
            })
            .collect::<Result<Vec<_>>>()?;

        // Vertex input state (strides are rebound per draw)
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = state
            .vertex_layout
            .bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: input_rate_to_vk(binding.input_rate),
            })
            .collect();

        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = state
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        // Input assembly state (topology class fixed, exact topology dynamic)
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(state.primitive_type))
            .primitive_restart_enable(false);

        let tessellation_state = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(state.patch_control_points.max(1));

        // Viewport state (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // Rasterization state
        let rasterization = &state.rasterization;
        let rasterization_state = {
            let mut info = vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(!rasterization.depth_clip)
                .rasterizer_discard_enable(false)
                .polygon_mode(polygon_mode_to_vk(rasterization.polygon_mode))
                .line_width(1.0)
                .cull_mode(cull_mode_to_vk(rasterization.cull_mode))
                .front_face(front_face_to_vk(rasterization.front_face));
            if let Some(bias) = rasterization.depth_bias {
                info = info
                    .depth_bias_enable(true)
                    .depth_bias_constant_factor(bias.constant_factor)
                    .depth_bias_slope_factor(bias.slope_factor)
                    .depth_bias_clamp(bias.clamp);
            } else {
                info = info.depth_bias_enable(false);
            }
            info
        };

        // Depth/stencil state
        let depth_stencil = &state.depth_stencil;
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_stencil.depth_test_enable)
            .depth_write_enable(depth_stencil.depth_write_enable)
            .depth_compare_op(compare_op_to_vk(depth_stencil.depth_compare_op))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(depth_stencil.stencil_test_enable)
            .front(stencil_op_state_to_vk(
                &depth_stencil.front,
                depth_stencil.stencil_read_mask,
                depth_stencil.stencil_write_mask,
            ))
            .back(stencil_op_state_to_vk(
                &depth_stencil.back,
                depth_stencil.stencil_read_mask,
                depth_stencil.stencil_write_mask,
            ));

        // Multisample state
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(pass_format.samples)
            .alpha_to_coverage_enable(state.alpha_to_coverage);

        // Color blend state, same blending on every color attachment
        let blend = &state.color_blend;
        let color_blend_attachment = {
            let mut attachment = vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(color_write_mask_to_vk(&blend.color_write_mask))
                .blend_enable(blend.blend_enable);
            if blend.blend_enable {
                attachment = attachment
                    .src_color_blend_factor(blend_factor_to_vk(blend.src_color_factor))
                    .dst_color_blend_factor(blend_factor_to_vk(blend.dst_color_factor))
                    .color_blend_op(blend_op_to_vk(blend.color_blend_op))
                    .src_alpha_blend_factor(blend_factor_to_vk(blend.src_alpha_factor))
                    .dst_alpha_blend_factor(blend_factor_to_vk(blend.dst_alpha_factor))
                    .alpha_blend_op(blend_op_to_vk(blend.alpha_blend_op));
            }
            attachment
        };
        let color_blend_attachments = vec![color_blend_attachment; pass_format.color_formats.len()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        // Attachment formats for dynamic rendering
        let stencil_format = if pass_format.has_stencil {
            pass_format.depth_format
        } else {
            vk::Format::UNDEFINED
        };
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&pass_format.color_formats)
            .depth_attachment_format(pass_format.depth_format)
            .stencil_attachment_format(stencil_format);

        let mut pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .depth_stencil_state(&depth_stencil_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.pipeline_layout);
        if state.primitive_type == PrimitiveType::Patch {
            pipeline_create_info = pipeline_create_info.tessellation_state(&tessellation_state);
        }

        let pipelines = unsafe {
            ctx.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_create_info], None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create graphics pipeline: {:?}", e.1))?
        };

        Ok(Self {
            ctx,
            pipeline: pipelines[0],
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            _layout: desc.binding_layout.clone(),
        })
    }

    pub(crate) fn compute(
        ctx: Arc<GpuContext>,
        shader: &Arc<dyn NativeShader>,
        binding_layout: &Arc<dyn NativeBindingLayout>,
    ) -> Result<Self> {
        let layout = vk_layout(binding_layout)
            .ok_or_else(|| Error::InvalidResource("binding layout is not a Vulkan layout".to_string()))?;
        let shader = shader_ref(shader)?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module)
            .name(&shader.entry_point);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout.pipeline_layout);

        let pipelines = unsafe {
            ctx.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create compute pipeline: {:?}", e.1))?
        };

        Ok(Self {
            ctx,
            pipeline: pipelines[0],
            bind_point: vk::PipelineBindPoint::COMPUTE,
            _layout: binding_layout.clone(),
        })
    }
}

fn shader_ref(shader: &Arc<dyn NativeShader>) -> Result<&crate::vulkan_shader::Shader> {
    vk_shader(shader).ok_or_else(|| Error::InvalidResource("shader is not a Vulkan shader".to_string()))
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipeline", &self.pipeline)
            .field("bind_point", &self.bind_point)
            .finish()
    }
}

impl NativePipeline for Pipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

pub(crate) fn vk_pipeline(pipeline: &Arc<dyn NativePipeline>) -> Option<&Pipeline> {
    pipeline.as_any().downcast_ref::<Pipeline>()
}
