/// Resource bindings - descriptor set layouts, pipeline layouts and descriptor sets
///
/// Volatile constant buffers do not live in any set: a binding layout with
/// volatile slots gets one extra push-descriptor set (index = number of
/// regular sets), and slot `n` is binding `n` of that set. The encoder
/// pushes a uniform buffer descriptor at the ring offset each time the slot
/// is rebound.

use ash::vk;
use quasar_hal::backend::{DescriptorWrite, NativeBindingInstance, NativeBindingLayout, NativeBindingSet, NativeDescriptorHeap};
use quasar_hal::memory::DescriptorRange;
use quasar_hal::quasar::resource::{BindingDesc, BindingType, ResourceBindingSetDesc, VolatileCBufferBinding};
use quasar_hal::quasar::types::ShaderStageFlags;
use quasar_hal::quasar::{Error, Result};
use quasar_hal::{hal_err, hal_error};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::vk_buffer;
use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_convert::{binding_type_to_vk, stage_flags_to_vk};
use crate::vulkan_descriptor_heap::vk_heap;
use crate::vulkan_texture::vk_texture;

// ===== BINDING SET =====

/// Descriptor set layout of one resource binding set
pub struct BindingSet {
    ctx: Arc<GpuContext>,
    pub(crate) layout: vk::DescriptorSetLayout,
    bindings: Vec<BindingDesc>,
}

impl BindingSet {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &ResourceBindingSetDesc) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding_type_to_vk(binding.binding_type))
                    .descriptor_count(1)
                    .stage_flags(stage_flags_to_vk(binding.stages))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            ctx.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?
        };

        Ok(Self {
            ctx,
            layout,
            bindings: desc.bindings.clone(),
        })
    }

    fn binding_type(&self, binding: u32) -> Option<BindingType> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.binding_type)
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("layout", &self.layout)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl NativeBindingSet for BindingSet {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for BindingSet {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

fn vk_set(set: &Arc<dyn NativeBindingSet>) -> Result<&BindingSet> {
    set.as_any()
        .downcast_ref::<BindingSet>()
        .ok_or_else(|| Error::InvalidResource("binding set is not a Vulkan binding set".to_string()))
}

// ===== BINDING LAYOUT =====

/// Pipeline layout: the regular sets, then the push set for volatile slots
pub struct BindingLayout {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    push_set_layout: Option<vk::DescriptorSetLayout>,
    push_set_index: u32,
    _sets: Vec<Arc<dyn NativeBindingSet>>,
}

impl BindingLayout {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        sets: &[Arc<dyn NativeBindingSet>],
        volatile_cbuffers: &[VolatileCBufferBinding],
    ) -> Result<Self> {
        let mut set_layouts = sets
            .iter()
            .map(|set| vk_set(set).map(|s| s.layout))
            .collect::<Result<Vec<_>>>()?;

        let push_set_layout = if volatile_cbuffers.is_empty() {
            None
        } else {
            let layout = Self::create_push_set_layout(&ctx, volatile_cbuffers)?;
            set_layouts.push(layout);
            Some(layout)
        };

        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe { ctx.device.create_pipeline_layout(&create_info, None) };
        let pipeline_layout = match pipeline_layout {
            Ok(layout) => layout,
            Err(e) => {
                if let Some(layout) = push_set_layout {
                    unsafe { ctx.device.destroy_descriptor_set_layout(layout, None) };
                }
                return Err(hal_err!(SOURCE, "Failed to create pipeline layout ({} sets): {:?}", set_layouts.len(), e));
            }
        };

        Ok(Self {
            ctx,
            pipeline_layout,
            push_set_layout,
            push_set_index: sets.len() as u32,
            _sets: sets.to_vec(),
        })
    }

    fn create_push_set_layout(
        ctx: &GpuContext,
        volatile_cbuffers: &[VolatileCBufferBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = volatile_cbuffers
            .iter()
            .map(|volatile| {
                let stages = if volatile.stages.is_empty() {
                    ShaderStageFlags::ALL_GRAPHICS | ShaderStageFlags::COMPUTE
                } else {
                    volatile.stages
                };
                vk::DescriptorSetLayoutBinding::default()
                    .binding(volatile.slot)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(stage_flags_to_vk(stages))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);

        unsafe {
            ctx.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create push descriptor set layout: {:?}", e))
        }
    }

    /// Set index of the push set, if the layout has volatile slots
    pub(crate) fn push_set(&self) -> Option<u32> {
        self.push_set_layout.map(|_| self.push_set_index)
    }
}

impl fmt::Debug for BindingLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingLayout")
            .field("pipeline_layout", &self.pipeline_layout)
            .field("push_set_index", &self.push_set_index)
            .finish()
    }
}

impl NativeBindingLayout for BindingLayout {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for BindingLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
            if let Some(layout) = self.push_set_layout {
                self.ctx.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

pub(crate) fn vk_layout(layout: &Arc<dyn NativeBindingLayout>) -> Option<&BindingLayout> {
    layout.as_any().downcast_ref::<BindingLayout>()
}

// ===== BINDING INSTANCE =====

/// Descriptor set allocated from the CBV/SRV/UAV heap's pool
pub struct BindingInstance {
    ctx: Arc<GpuContext>,
    heap: Arc<dyn NativeDescriptorHeap>,
    set: Arc<dyn NativeBindingSet>,
    pub(crate) descriptor_set: vk::DescriptorSet,
    range: DescriptorRange,
    /// Image views owned by texture bindings
    views: Mutex<FxHashMap<u32, vk::ImageView>>,
}

impl BindingInstance {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        set: &Arc<dyn NativeBindingSet>,
        heap: &Arc<dyn NativeDescriptorHeap>,
        range: DescriptorRange,
    ) -> Result<Self> {
        let set_layout = vk_set(set)?.layout;
        let pool = vk_heap(heap)
            .ok_or_else(|| Error::InvalidResource("descriptor heap is not a Vulkan heap".to_string()))?
            .pool
            .lock()?;

        let layouts = [set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);

        let descriptor_set = unsafe {
            ctx.device.allocate_descriptor_sets(&allocate_info).map_err(|e| {
                hal_error!(SOURCE, "Failed to allocate descriptor set for slots {:?}: {:?}", range, e);
                Error::ResourceExhausted(format!("descriptor pool exhausted: {:?}", e))
            })?[0]
        };
        drop(pool);

        Ok(Self {
            ctx,
            heap: heap.clone(),
            set: set.clone(),
            descriptor_set,
            range,
            views: Mutex::new(FxHashMap::default()),
        })
    }

    /// Update one binding of the descriptor set
    pub(crate) fn write(&self, binding: u32, write: &DescriptorWrite) -> Result<()> {
        let binding_type = vk_set(&self.set)?.binding_type(binding).ok_or_else(|| {
            Error::InvalidResource(format!("binding {} is not declared by the set", binding))
        })?;
        let descriptor_type = binding_type_to_vk(binding_type);

        match write {
            DescriptorWrite::ConstantBuffer { buffer, offset, size }
            | DescriptorWrite::StructuredBuffer { buffer, offset, size }
            | DescriptorWrite::WritableStructuredBuffer { buffer, offset, size } => {
                let expected = match write {
                    DescriptorWrite::ConstantBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
                    _ => vk::DescriptorType::STORAGE_BUFFER,
                };
                check_type(binding, descriptor_type, expected)?;
                let buffer = vk_buffer(buffer)
                    .ok_or_else(|| Error::InvalidResource("bound buffer is not a Vulkan buffer".to_string()))?;

                let buffer_info = [vk::DescriptorBufferInfo {
                    buffer,
                    offset: *offset,
                    range: *size,
                }];
                let descriptor_write = vk::WriteDescriptorSet::default()
                    .dst_set(self.descriptor_set)
                    .dst_binding(binding)
                    .descriptor_type(descriptor_type)
                    .buffer_info(&buffer_info);
                unsafe { self.ctx.device.update_descriptor_sets(&[descriptor_write], &[]) };
                self.replace_view(binding, None);
            }
            DescriptorWrite::Texture { texture, format, base_mip, mip_count } => {
                check_type(binding, descriptor_type, vk::DescriptorType::SAMPLED_IMAGE)?;
                let texture = vk_texture(texture)
                    .ok_or_else(|| Error::InvalidResource("bound texture is not a Vulkan texture".to_string()))?;
                let view = texture.create_view(*format, *base_mip, *mip_count, 0, texture.array_layers)?;
                self.write_image(binding, descriptor_type, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
            DescriptorWrite::WritableTexture { texture, format, mip } => {
                check_type(binding, descriptor_type, vk::DescriptorType::STORAGE_IMAGE)?;
                let texture = vk_texture(texture)
                    .ok_or_else(|| Error::InvalidResource("bound texture is not a Vulkan texture".to_string()))?;
                let view = texture.create_view(*format, *mip, 1, 0, texture.array_layers)?;
                self.write_image(binding, descriptor_type, view, vk::ImageLayout::GENERAL);
            }
        }
        Ok(())
    }

    fn write_image(&self, binding: u32, descriptor_type: vk::DescriptorType, view: vk::ImageView, layout: vk::ImageLayout) {
        let image_info = [vk::DescriptorImageInfo::default().image_view(view).image_layout(layout)];
        let descriptor_write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .image_info(&image_info);
        unsafe { self.ctx.device.update_descriptor_sets(&[descriptor_write], &[]) };
        self.replace_view(binding, Some(view));
    }

    fn replace_view(&self, binding: u32, view: Option<vk::ImageView>) {
        let Ok(mut views) = self.views.lock() else {
            return;
        };
        let previous = match view {
            Some(view) => views.insert(binding, view),
            None => views.remove(&binding),
        };
        if let Some(previous) = previous {
            unsafe { self.ctx.device.destroy_image_view(previous, None) };
        }
    }
}

fn check_type(binding: u32, declared: vk::DescriptorType, written: vk::DescriptorType) -> Result<()> {
    if declared != written {
        return Err(Error::InvalidResource(format!(
            "binding {} is declared as {:?}, cannot write a {:?}",
            binding, declared, written
        )));
    }
    Ok(())
}

impl fmt::Debug for BindingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingInstance")
            .field("descriptor_set", &self.descriptor_set)
            .field("range", &self.range)
            .finish()
    }
}

impl NativeBindingInstance for BindingInstance {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for BindingInstance {
    fn drop(&mut self) {
        unsafe {
            if let Ok(views) = self.views.get_mut() {
                for (_, view) in views.drain() {
                    self.ctx.device.destroy_image_view(view, None);
                }
            }
            if let Some(heap) = vk_heap(&self.heap) {
                if let Ok(pool) = heap.pool.lock() {
                    self.ctx.device.free_descriptor_sets(*pool, &[self.descriptor_set]).ok();
                }
            }
        }
    }
}

pub(crate) fn vk_instance(instance: &Arc<dyn NativeBindingInstance>) -> Option<&BindingInstance> {
    instance.as_any().downcast_ref::<BindingInstance>()
}
