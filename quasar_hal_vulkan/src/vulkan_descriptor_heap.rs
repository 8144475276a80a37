/// DescriptorHeap - Vulkan implementation of NativeDescriptorHeap
///
/// Vulkan has no descriptor heaps in the D3D sense:
/// - a CBV/SRV/UAV heap is a descriptor pool; binding instances allocate
///   their descriptor set from it, the HAL slot range is bookkeeping only
/// - RTV and DSV heaps are view tables: each slot owns the image view
///   dynamic rendering attaches

use ash::vk;
use quasar_hal::backend::{AttachmentView, DescriptorHandle, DescriptorHeapType, NativeDescriptorHeap, NativeTexture};
use quasar_hal::quasar::types::Format;
use quasar_hal::quasar::{Error, Result};
use quasar_hal::hal_err;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_texture::vk_texture;

/// Image view written into an RTV/DSV slot
pub(crate) struct AttachmentSlot {
    /// Keeps the image alive while the view exists
    _texture: Arc<dyn NativeTexture>,
    pub(crate) view: vk::ImageView,
    pub(crate) format: Format,
    pub(crate) extent: vk::Extent2D,
}

/// What a command list needs to attach an RTV/DSV slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedAttachment {
    pub(crate) view: vk::ImageView,
    pub(crate) format: Format,
    pub(crate) extent: vk::Extent2D,
}

pub struct DescriptorHeap {
    ctx: Arc<GpuContext>,
    heap_type: DescriptorHeapType,
    capacity: u32,
    /// Descriptor pool (CBV/SRV/UAV heaps only)
    pub(crate) pool: Mutex<vk::DescriptorPool>,
    attachments: Mutex<Vec<Option<AttachmentSlot>>>,
}

impl DescriptorHeap {
    pub(crate) fn new(ctx: Arc<GpuContext>, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self> {
        let pool = match heap_type {
            DescriptorHeapType::CbvSrvUav => Self::create_descriptor_pool(&ctx, capacity)?,
            DescriptorHeapType::RenderTarget | DescriptorHeapType::DepthStencil => vk::DescriptorPool::null(),
        };
        let attachment_slots = match heap_type {
            DescriptorHeapType::CbvSrvUav => 0,
            _ => capacity as usize,
        };

        Ok(Self {
            ctx,
            heap_type,
            capacity,
            pool: Mutex::new(pool),
            attachments: Mutex::new((0..attachment_slots).map(|_| None).collect()),
        })
    }

    /// One set per slot at most, every descriptor type sized to the heap
    fn create_descriptor_pool(ctx: &GpuContext, capacity: u32) -> Result<vk::DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::STORAGE_BUFFER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: capacity,
        });

        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(capacity);

        unsafe {
            ctx.device
                .create_descriptor_pool(&info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create descriptor pool of {} descriptors: {:?}", capacity, e))
        }
    }

    /// Create the view for an RTV/DSV slot, replacing any previous one
    pub(crate) fn write_attachment(&self, index: u32, view: &AttachmentView) -> Result<()> {
        if self.heap_type == DescriptorHeapType::CbvSrvUav {
            return Err(Error::InvalidResource(
                "attachment views need a render target or depth stencil heap".to_string(),
            ));
        }
        let texture = vk_texture(&view.texture)
            .ok_or_else(|| Error::InvalidResource("attachment texture is not a Vulkan texture".to_string()))?;
        let image_view = texture.create_view(view.format, view.mip, 1, view.layer, 1)?;
        let format = if view.format == Format::Unknown { texture.format } else { view.format };
        let extent = vk::Extent2D {
            width: (texture.width >> view.mip).max(1),
            height: (texture.height >> view.mip).max(1),
        };

        let mut attachments = self.attachments.lock()?;
        let Some(slot) = attachments.get_mut(index as usize) else {
            unsafe { self.ctx.device.destroy_image_view(image_view, None) };
            return Err(Error::InvalidResource(format!(
                "attachment slot {} outside heap of {}",
                index, self.capacity
            )));
        };
        if let Some(previous) = slot.replace(AttachmentSlot {
            _texture: view.texture.clone(),
            view: image_view,
            format,
            extent,
        }) {
            unsafe { self.ctx.device.destroy_image_view(previous.view, None) };
        }
        Ok(())
    }

    pub(crate) fn release_attachment(&self, index: u32) {
        let Ok(mut attachments) = self.attachments.lock() else {
            return;
        };
        if let Some(previous) = attachments.get_mut(index as usize).and_then(Option::take) {
            unsafe { self.ctx.device.destroy_image_view(previous.view, None) };
        }
    }

    pub(crate) fn attachment(&self, index: u32) -> Option<ResolvedAttachment> {
        let attachments = self.attachments.lock().ok()?;
        attachments
            .get(index as usize)?
            .as_ref()
            .map(|slot| ResolvedAttachment {
                view: slot.view,
                format: slot.format,
                extent: slot.extent,
            })
    }
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("heap_type", &self.heap_type)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl NativeDescriptorHeap for DescriptorHeap {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        unsafe {
            if let Ok(attachments) = self.attachments.get_mut() {
                for slot in attachments.drain(..).flatten() {
                    self.ctx.device.destroy_image_view(slot.view, None);
                }
            }
            if let Ok(pool) = self.pool.get_mut() {
                if *pool != vk::DescriptorPool::null() {
                    self.ctx.device.destroy_descriptor_pool(*pool, None);
                }
            }
        }
    }
}

pub(crate) fn vk_heap(heap: &Arc<dyn NativeDescriptorHeap>) -> Option<&DescriptorHeap> {
    heap.as_any().downcast_ref::<DescriptorHeap>()
}

/// Resolve an RTV/DSV handle to its image view
pub(crate) fn resolve_attachment(handle: &DescriptorHandle) -> Option<ResolvedAttachment> {
    vk_heap(&handle.heap)?.attachment(handle.index)
}
