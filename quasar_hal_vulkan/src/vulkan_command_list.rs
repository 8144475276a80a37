/// CommandList - Vulkan implementation of NativeCommandList and NativeCommandAllocator
///
/// Encoders are infallible: the first failure is kept and reported by
/// `close()`.
///
/// Rendering uses dynamic rendering and is opened lazily. Binding render
/// targets only records them; the first draw opens a rendering scope that
/// loads the attachments, and barriers, copies, dispatches, target changes
/// and `close()` end it. Clears run in their own scope with a CLEAR load op.

use ash::vk;
use quasar_hal::backend::{
    BufferFootprint, BufferLocation, DescriptorHandle, IndexBufferView, NativeBindingInstance, NativeBindingLayout,
    NativeBuffer, NativeCommandAllocator, NativeCommandList, NativePipeline, NativeResource,
    NativeTexture, RenderTargetBinding, ResourceBarrier, VertexBufferView,
};
use quasar_hal::quasar::resource::TextureRegion;
use quasar_hal::quasar::types::{ClearFlags, PipelineType, PrimitiveType, QueueType, ScissorRect, Viewport};
use quasar_hal::quasar::{Error, Result};
use quasar_hal::{hal_err, hal_error};
use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use crate::vulkan_binding::{vk_instance, vk_layout};
use crate::vulkan_buffer::vk_buffer;
use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_convert::{bind_point_to_vk, index_type_to_vk, state_to_vk, topology_to_vk};
use crate::vulkan_descriptor_heap::{resolve_attachment, ResolvedAttachment};
use crate::vulkan_pipeline::vk_pipeline;
use crate::vulkan_texture::vk_texture;

/// Buffer rows of `footprint` against one subresource region
fn buffer_image_copy(footprint: &BufferFootprint, region: &TextureRegion, aspect: vk::ImageAspectFlags) -> vk::BufferImageCopy {
    let texel = footprint.format.size_in_bytes().max(1) as u64;
    vk::BufferImageCopy {
        buffer_offset: footprint.offset,
        buffer_row_length: (footprint.row_pitch / texel) as u32,
        buffer_image_height: region.height,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: region.mip,
            base_array_layer: region.layer,
            layer_count: 1,
        },
        image_offset: vk::Offset3D {
            x: region.x as i32,
            y: region.y as i32,
            z: 0,
        },
        image_extent: vk::Extent3D {
            width: region.width,
            height: region.height,
            depth: 1,
        },
    }
}

// ===== COMMAND ALLOCATOR =====

/// Command pool of one frame slot
///
/// Command buffers are kept across resets and handed out again in order.
pub struct CommandAllocator {
    ctx: Arc<GpuContext>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    next: usize,
}

impl CommandAllocator {
    pub(crate) fn new(ctx: Arc<GpuContext>, queue: QueueType) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe {
            ctx.device
                .create_command_pool(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create {:?} command pool: {:?}", queue, e))?
        };

        Ok(Self {
            ctx,
            pool,
            buffers: Vec::new(),
            next: 0,
        })
    }

    fn next_command_buffer(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(&command_buffer) = self.buffers.get(self.next) {
            self.next += 1;
            return Ok(command_buffer);
        }

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            self.ctx
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| hal_err!(SOURCE, "Failed to allocate command buffer: {:?}", e))?[0]
        };
        self.buffers.push(command_buffer);
        self.next = self.buffers.len();
        Ok(command_buffer)
    }
}

impl NativeCommandAllocator for CommandAllocator {
    fn reset(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| hal_err!(SOURCE, "Failed to reset command pool: {:?}", e))?;
        }
        self.next = 0;
        Ok(())
    }

    fn begin_command_list(&mut self) -> Result<Box<dyn NativeCommandList>> {
        let command_buffer = self.next_command_buffer()?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.ctx
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| hal_err!(SOURCE, "Failed to begin command buffer: {:?}", e))?;
        }

        Ok(Box::new(CommandList::new(self.ctx.clone(), command_buffer)))
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        unsafe {
            // Frees every command buffer of the pool
            self.ctx.device.destroy_command_pool(self.pool, None);
        }
    }
}

// ===== COMMAND LIST =====

/// Pipeline layout bound on one bind point
#[derive(Debug, Clone, Copy)]
struct BoundLayout {
    layout: vk::PipelineLayout,
    push_set: Option<u32>,
}

/// Vulkan command list implementation
pub struct CommandList {
    ctx: Arc<GpuContext>,
    pub(crate) command_buffer: vk::CommandBuffer,
    /// Targets of the next rendering scope
    targets: Option<RenderTargetBinding>,
    /// Whether a dynamic rendering scope is open
    rendering: bool,
    /// Indexed by bind point: graphics, compute
    layouts: [Option<BoundLayout>; 2],
    error: Option<Error>,
    pub(crate) closed: bool,
}

impl CommandList {
    fn new(ctx: Arc<GpuContext>, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            ctx,
            command_buffer,
            targets: None,
            rendering: false,
            layouts: [None, None],
            error: None,
            closed: false,
        }
    }

    /// Keep the first encoding failure for `close()`
    fn fail(&mut self, message: String) {
        hal_error!(SOURCE, "{}", message);
        if self.error.is_none() {
            self.error = Some(Error::InvalidResource(message));
        }
    }

    fn layout_slot(pipeline_type: PipelineType) -> usize {
        match pipeline_type {
            PipelineType::Graphics => 0,
            PipelineType::Compute => 1,
        }
    }

    fn bound_layout(&mut self, pipeline_type: PipelineType) -> Option<BoundLayout> {
        let bound = self.layouts[Self::layout_slot(pipeline_type)];
        if bound.is_none() {
            self.fail(format!("no {:?} binding layout bound", pipeline_type));
        }
        bound
    }

    /// Open a rendering scope over the bound targets, loading their content
    fn ensure_rendering(&mut self) {
        if self.rendering {
            return;
        }
        let Some(targets) = self.targets.as_ref() else {
            self.fail("draw without bound render targets".to_string());
            return;
        };

        let extent = vk::Extent2D {
            width: targets.width,
            height: targets.height,
        };
        let colors: Option<Vec<ResolvedAttachment>> = targets.colors.iter().map(resolve_attachment).collect();
        let depth = match &targets.depth {
            Some(handle) => resolve_attachment(handle).map(Some),
            None => Some(None),
        };
        let (Some(colors), Some(depth)) = (colors, depth) else {
            self.fail("bound render target slot holds no view".to_string());
            return;
        };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = colors
            .iter()
            .map(|color| color_attachment(color.view, vk::AttachmentLoadOp::LOAD, [0.0; 4]))
            .collect();
        let depth_info = depth.map(|d| depth_attachment(d.view, vk::AttachmentLoadOp::LOAD, 1.0, 0));
        let has_stencil = depth.is_some_and(|d| d.format.has_stencil());

        self.begin_rendering(extent, &color_attachments, depth_info.as_ref(), has_stencil);
    }

    fn begin_rendering(
        &mut self,
        extent: vk::Extent2D,
        colors: &[vk::RenderingAttachmentInfo],
        depth: Option<&vk::RenderingAttachmentInfo>,
        has_stencil: bool,
    ) {
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(colors);
        if let Some(depth) = depth {
            rendering_info = rendering_info.depth_attachment(depth);
            if has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }

        unsafe {
            self.ctx.device.cmd_begin_rendering(self.command_buffer, &rendering_info);
        }
        self.rendering = true;
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe {
                self.ctx.device.cmd_end_rendering(self.command_buffer);
            }
            self.rendering = false;
        }
    }

    fn buffer(&mut self, buffer: &Arc<dyn NativeBuffer>) -> Option<vk::Buffer> {
        let resolved = vk_buffer(buffer);
        if resolved.is_none() {
            self.fail("buffer is not a Vulkan buffer".to_string());
        }
        resolved
    }

    fn label(&self, label: &str) -> Option<CString> {
        self.ctx.debug_labels.as_ref()?;
        CString::new(label.replace('\0', " ")).ok()
    }
}

fn color_attachment(view: vk::ImageView, load_op: vk::AttachmentLoadOp, color: [f32; 4]) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        })
}

fn depth_attachment(view: vk::ImageView, load_op: vk::AttachmentLoadOp, depth: f32, stencil: u8) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth,
                stencil: stencil as u32,
            },
        })
}

impl NativeCommandList for CommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.end_rendering();

        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();
        for barrier in barriers {
            let src = state_to_vk(barrier.before);
            let dst = state_to_vk(barrier.after);
            match &barrier.resource {
                NativeResource::Buffer(buffer) => {
                    let Some(buffer) = self.buffer(buffer) else { continue };
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src.stages)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stages)
                            .dst_access_mask(dst.access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                NativeResource::Texture(texture) => {
                    let Some(texture) = vk_texture(texture) else {
                        self.fail("texture is not a Vulkan texture".to_string());
                        continue;
                    };
                    image_barriers.push(
                        vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(src.stages)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stages)
                            .dst_access_mask(dst.access)
                            .old_layout(src.layout)
                            .new_layout(dst.layout)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(texture.image)
                            .subresource_range(texture.subresource_range(barrier.subresource)),
                    );
                }
            }
        }

        let dependency = vk::DependencyInfo::default()
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe {
            self.ctx.device.cmd_pipeline_barrier2(self.command_buffer, &dependency);
        }
    }

    fn copy_buffer_region(
        &mut self,
        dest: &Arc<dyn NativeBuffer>,
        dest_offset: u64,
        src: &Arc<dyn NativeBuffer>,
        src_offset: u64,
        size: u64,
    ) {
        self.end_rendering();
        let (Some(dest), Some(src)) = (self.buffer(dest), self.buffer(src)) else {
            return;
        };
        let region = vk::BufferCopy {
            src_offset,
            dst_offset: dest_offset,
            size,
        };
        unsafe {
            self.ctx.device.cmd_copy_buffer(self.command_buffer, src, dest, &[region]);
        }
    }

    fn copy_texture(&mut self, dest: &Arc<dyn NativeTexture>, src: &Arc<dyn NativeTexture>) {
        self.end_rendering();
        let (Some(dest), Some(src)) = (vk_texture(dest), vk_texture(src)) else {
            self.fail("texture is not a Vulkan texture".to_string());
            return;
        };

        let layer_count = dest.array_layers.min(src.array_layers);
        let regions: Vec<vk::ImageCopy> = (0..dest.mip_levels.min(src.mip_levels))
            .map(|mip| {
                let layers = |aspect_mask| vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: mip,
                    base_array_layer: 0,
                    layer_count,
                };
                vk::ImageCopy {
                    src_subresource: layers(src.aspect()),
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: layers(dest.aspect()),
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D {
                        width: (dest.width.min(src.width) >> mip).max(1),
                        height: (dest.height.min(src.height) >> mip).max(1),
                        depth: 1,
                    },
                }
            })
            .collect();

        unsafe {
            self.ctx.device.cmd_copy_image(
                self.command_buffer,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dest.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
    }

    fn copy_buffer_to_texture(&mut self, dest: &Arc<dyn NativeTexture>, region: &TextureRegion, src: &BufferFootprint) {
        self.end_rendering();
        let Some(texture) = vk_texture(dest) else {
            self.fail("texture is not a Vulkan texture".to_string());
            return;
        };
        let Some(buffer) = self.buffer(&src.buffer) else { return };
        let copy = buffer_image_copy(src, region, texture.aspect());
        unsafe {
            self.ctx.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    fn copy_texture_to_buffer(&mut self, dest: &BufferFootprint, src: &Arc<dyn NativeTexture>, region: &TextureRegion) {
        self.end_rendering();
        let Some(texture) = vk_texture(src) else {
            self.fail("texture is not a Vulkan texture".to_string());
            return;
        };
        let Some(buffer) = self.buffer(&dest.buffer) else { return };
        let copy = buffer_image_copy(dest, region, texture.aspect());
        unsafe {
            self.ctx.device.cmd_copy_image_to_buffer(
                self.command_buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[copy],
            );
        }
    }

    fn set_binding_layout(&mut self, pipeline_type: PipelineType, layout: &Arc<dyn NativeBindingLayout>) {
        let Some(layout) = vk_layout(layout) else {
            self.fail("binding layout is not a Vulkan layout".to_string());
            return;
        };
        self.layouts[Self::layout_slot(pipeline_type)] = Some(BoundLayout {
            layout: layout.pipeline_layout,
            push_set: layout.push_set(),
        });
    }

    fn set_binding_instance(
        &mut self,
        pipeline_type: PipelineType,
        set_index: u32,
        instance: &Arc<dyn NativeBindingInstance>,
    ) {
        let Some(bound) = self.bound_layout(pipeline_type) else { return };
        let Some(instance) = vk_instance(instance) else {
            self.fail("binding instance is not a Vulkan instance".to_string());
            return;
        };
        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                bind_point_to_vk(pipeline_type),
                bound.layout,
                set_index,
                &[instance.descriptor_set],
                &[],
            );
        }
    }

    fn set_constant_buffer(&mut self, pipeline_type: PipelineType, root_index: u32, location: &BufferLocation) {
        let Some(bound) = self.bound_layout(pipeline_type) else { return };
        let Some(push_set) = bound.push_set.filter(|set| root_index >= *set) else {
            self.fail(format!("root index {} is not a volatile constant buffer slot", root_index));
            return;
        };
        let Some(buffer) = self.buffer(&location.buffer) else { return };

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: location.offset,
            range: location.size,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_binding(root_index - push_set)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe {
            self.ctx.push_descriptor.cmd_push_descriptor_set(
                self.command_buffer,
                bind_point_to_vk(pipeline_type),
                bound.layout,
                push_set,
                &[write],
            );
        }
    }

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]) {
        if views.is_empty() {
            return;
        }
        let mut buffers = Vec::with_capacity(views.len());
        for view in views {
            let Some(buffer) = self.buffer(&view.location.buffer) else { return };
            buffers.push(buffer);
        }
        let offsets: Vec<u64> = views.iter().map(|v| v.location.offset).collect();
        let sizes: Vec<u64> = views.iter().map(|v| v.location.size).collect();
        let strides: Vec<u64> = views.iter().map(|v| v.stride as u64).collect();

        unsafe {
            self.ctx.device.cmd_bind_vertex_buffers2(
                self.command_buffer,
                0,
                &buffers,
                &offsets,
                Some(sizes.as_slice()),
                Some(strides.as_slice()),
            );
        }
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView) {
        let Some(buffer) = self.buffer(&view.location.buffer) else { return };
        unsafe {
            self.ctx.device.cmd_bind_index_buffer(
                self.command_buffer,
                buffer,
                view.location.offset,
                index_type_to_vk(view.format),
            );
        }
    }

    fn set_pipeline(&mut self, pipeline_type: PipelineType, pipeline: &Arc<dyn NativePipeline>) {
        let Some(pipeline) = vk_pipeline(pipeline) else {
            self.fail("pipeline is not a Vulkan pipeline".to_string());
            return;
        };
        if pipeline.bind_point != bind_point_to_vk(pipeline_type) {
            self.fail(format!("pipeline bound as {:?} has bind point {:?}", pipeline_type, pipeline.bind_point));
            return;
        }
        unsafe {
            self.ctx
                .device
                .cmd_bind_pipeline(self.command_buffer, pipeline.bind_point, pipeline.pipeline);
        }
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveType) {
        unsafe {
            self.ctx
                .device
                .cmd_set_primitive_topology(self.command_buffer, topology_to_vk(topology));
        }
    }

    fn set_render_targets(&mut self, targets: Option<&RenderTargetBinding>) {
        self.end_rendering();
        self.targets = targets.cloned();
    }

    fn clear_render_target(&mut self, target: &DescriptorHandle, color: [f32; 4]) {
        self.end_rendering();
        let Some(resolved) = resolve_attachment(target) else {
            self.fail(format!("render target slot {} holds no view", target.index));
            return;
        };
        let attachments = [color_attachment(resolved.view, vk::AttachmentLoadOp::CLEAR, color)];
        self.begin_rendering(resolved.extent, &attachments, None, false);
        self.end_rendering();
    }

    fn clear_depth_stencil(&mut self, target: &DescriptorHandle, flags: ClearFlags, depth: f32, stencil: u8) {
        self.end_rendering();
        let Some(resolved) = resolve_attachment(target) else {
            self.fail(format!("depth stencil slot {} holds no view", target.index));
            return;
        };
        let has_stencil = resolved.format.has_stencil();

        let load_op = |clear: bool| {
            if clear {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            }
        };
        let depth_info = depth_attachment(resolved.view, load_op(flags.contains(ClearFlags::DEPTH)), depth, stencil);
        let stencil_info = depth_attachment(resolved.view, load_op(flags.contains(ClearFlags::STENCIL)), depth, stencil);

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: resolved.extent,
            })
            .layer_count(1)
            .depth_attachment(&depth_info);
        let rendering_info = if has_stencil {
            rendering_info.stencil_attachment(&stencil_info)
        } else {
            rendering_info
        };
        unsafe {
            self.ctx.device.cmd_begin_rendering(self.command_buffer, &rendering_info);
            self.ctx.device.cmd_end_rendering(self.command_buffer);
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let vk_viewport = vk::Viewport::default()
            .x(viewport.x)
            .y(viewport.y)
            .width(viewport.width)
            .height(viewport.height)
            .min_depth(viewport.min_depth)
            .max_depth(viewport.max_depth);
        unsafe {
            self.ctx.device.cmd_set_viewport(self.command_buffer, 0, &[vk_viewport]);
        }
    }

    fn set_scissors(&mut self, rect: &ScissorRect) {
        let vk_scissor = vk::Rect2D::default()
            .offset(vk::Offset2D { x: rect.left, y: rect.top })
            .extent(vk::Extent2D {
                width: (rect.right - rect.left).max(0) as u32,
                height: (rect.bottom - rect.top).max(0) as u32,
            });
        unsafe {
            self.ctx.device.cmd_set_scissor(self.command_buffer, 0, &[vk_scissor]);
        }
    }

    fn set_stencil_ref(&mut self, reference: u8) {
        unsafe {
            self.ctx.device.cmd_set_stencil_reference(
                self.command_buffer,
                vk::StencilFaceFlags::FRONT_AND_BACK,
                reference as u32,
            );
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.ensure_rendering();
        unsafe {
            self.ctx
                .device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.ensure_rendering();
        unsafe {
            self.ctx.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.end_rendering();
        unsafe {
            self.ctx.device.cmd_dispatch(self.command_buffer, x, y, z);
        }
    }

    fn begin_debug_group(&mut self, label: &str) {
        let (Some(labels), Some(name)) = (self.ctx.debug_labels.as_ref(), self.label(label)) else {
            return;
        };
        let info = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe {
            labels.cmd_begin_debug_utils_label(self.command_buffer, &info);
        }
    }

    fn end_debug_group(&mut self) {
        if let Some(labels) = self.ctx.debug_labels.as_ref() {
            unsafe {
                labels.cmd_end_debug_utils_label(self.command_buffer);
            }
        }
    }

    fn insert_debug_marker(&mut self, label: &str) {
        let (Some(labels), Some(name)) = (self.ctx.debug_labels.as_ref(), self.label(label)) else {
            return;
        };
        let info = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe {
            labels.cmd_insert_debug_utils_label(self.command_buffer, &info);
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("command list closed twice".to_string()));
        }
        self.end_rendering();
        self.closed = true;

        unsafe {
            self.ctx
                .device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| hal_err!(SOURCE, "Failed to end command buffer: {:?}", e))?;
        }
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

