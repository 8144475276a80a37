/// Texture - Vulkan implementation of NativeTexture

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use quasar_hal::backend::NativeTexture;
use quasar_hal::quasar::resource::TextureDesc;
use quasar_hal::quasar::types::{Format, ResourceState};
use quasar_hal::quasar::Result;
use quasar_hal::hal_err;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_convert::{aspect_mask, format_to_vk, sample_count_to_vk, state_to_vk, texture_usage_to_vk};

/// Vulkan 2D image (optionally arrayed, mipmapped or multisampled)
pub struct Texture {
    ctx: Arc<GpuContext>,
    pub(crate) image: vk::Image,
    allocation: Option<Allocation>,
    pub(crate) format: Format,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) mip_levels: u32,
    pub(crate) array_layers: u32,
}

impl Texture {
    /// Create an image and move every subresource into `default_state`
    pub(crate) fn new(ctx: &Arc<GpuContext>, desc: &TextureDesc, default_state: ResourceState) -> Result<Self> {
        unsafe {
            let create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format_to_vk(desc.format))
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: 1,
                })
                .mip_levels(desc.mip_levels)
                .array_layers(desc.array_layers)
                .samples(sample_count_to_vk(desc.sample_count))
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(texture_usage_to_vk(desc.usage))
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = ctx
                .device
                .create_image(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create texture image {}x{}: {:?}", desc.width, desc.height, e))?;

            let allocation = match ctx.allocate_image_memory(image, "texture") {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let texture = Self {
                ctx: ctx.clone(),
                image,
                allocation: Some(allocation),
                format: desc.format,
                width: desc.width,
                height: desc.height,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
            };
            texture.initialize_layout(default_state)?;
            Ok(texture)
        }
    }

    /// Leave UNDEFINED for the layout of the default state
    fn initialize_layout(&self, default_state: ResourceState) -> Result<()> {
        let target = state_to_vk(default_state);
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(target.stages)
            .dst_access_mask(target.access)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(target.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.full_range());
        let barriers = [barrier];

        self.ctx.submit_one_shot(|device, command_buffer| unsafe {
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            device.cmd_pipeline_barrier2(command_buffer, &dependency);
        })
    }

    pub(crate) fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_mask(self.format)
    }

    pub(crate) fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// Range of one subresource, indexed `mip + layer * mip_levels`
    pub(crate) fn subresource_range(&self, subresource: u32) -> vk::ImageSubresourceRange {
        let mip_levels = self.mip_levels.max(1);
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: subresource % mip_levels,
            level_count: 1,
            base_array_layer: subresource / mip_levels,
            layer_count: 1,
        }
    }

    /// Create a view of a mip and layer range (`Format::Unknown` keeps the texture format)
    pub(crate) fn create_view(&self, format: Format, base_mip: u32, mip_count: u32, base_layer: u32, layer_count: u32) -> Result<vk::ImageView> {
        let view_type = if layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let format = if format == Format::Unknown { self.format } else { format };

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(format_to_vk(format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(format),
                base_mip_level: base_mip,
                level_count: mip_count,
                base_array_layer: base_layer,
                layer_count,
            });

        unsafe {
            self.ctx
                .device
                .create_image_view(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create texture image view: {:?}", e))
        }
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mip_levels", &self.mip_levels)
            .field("array_layers", &self.array_layers)
            .finish()
    }
}

impl NativeTexture for Texture {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                self.ctx.free_allocation(allocation);
            }
            self.ctx.device.destroy_image(self.image, None);
        }
    }
}

/// Recover the Vulkan texture behind a native texture
pub(crate) fn vk_texture(texture: &Arc<dyn NativeTexture>) -> Option<&Texture> {
    texture.as_any().downcast_ref::<Texture>()
}
