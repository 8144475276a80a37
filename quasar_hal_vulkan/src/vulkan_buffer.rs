/// Buffer - Vulkan implementation of NativeBuffer and UploadHeap

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use quasar_hal::backend::{NativeBuffer, UploadHeap};
use quasar_hal::quasar::resource::BufferDesc;
use quasar_hal::quasar::types::{BufferMode, BufferUsage};
use quasar_hal::quasar::{Error, Result};
use quasar_hal::{hal_err, hal_error};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_convert::buffer_usage_to_vk;

/// Vulkan buffer
pub struct Buffer {
    ctx: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl Buffer {
    /// Create a buffer and bind fresh memory at `location`
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        unsafe {
            let create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = ctx
                .device
                .create_buffer(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create {} of size {} bytes: {:?}", name, size, e))?;

            let allocation = match ctx.allocate_buffer_memory(buffer, name, location) {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            Ok(Self {
                ctx,
                buffer,
                allocation: Some(allocation),
                size,
            })
        }
    }

    /// Create a buffer for a HAL description, uploading `initial_data`
    pub(crate) fn from_desc(ctx: &Arc<GpuContext>, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Self> {
        let location = match desc.mode {
            BufferMode::Readback => MemoryLocation::GpuToCpu,
            _ => MemoryLocation::GpuOnly,
        };
        let buffer = Self::new(ctx.clone(), desc.size, buffer_usage_to_vk(desc.usage), location, "buffer")?;

        if let Some(data) = initial_data.filter(|data| !data.is_empty()) {
            buffer.upload(data)?;
        }
        Ok(buffer)
    }

    /// Copy `data` to the start of a GPU-only buffer through a staging buffer
    fn upload(&self, data: &[u8]) -> Result<()> {
        let staging = Buffer::new(
            self.ctx.clone(),
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging buffer",
        )?;
        staging.write_mapped(0, data)?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as u64,
        };
        self.ctx.submit_one_shot(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, staging.buffer, self.buffer, &[region]);
        })
    }

    fn mapped_ptr(&self) -> Result<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or_else(|| hal_err!(SOURCE, "Buffer is not CPU-accessible"))
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        if offset.checked_add(len as u64).map_or(true, |end| end > self.size) {
            return Err(Error::InvalidResource(format!(
                "range {}..{} outside buffer of {} bytes",
                offset,
                offset + len as u64,
                self.size
            )));
        }
        Ok(())
    }

    /// Write into host-visible memory
    pub(crate) fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let mapped = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish()
    }
}

impl NativeBuffer for Buffer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        let mapped = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                self.ctx.free_allocation(allocation);
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Recover the Vulkan buffer behind a native buffer
pub(crate) fn vk_buffer(buffer: &Arc<dyn NativeBuffer>) -> Option<vk::Buffer> {
    buffer.as_any().downcast_ref::<Buffer>().map(|b| b.buffer)
}

// ===== UPLOAD HEAP =====

/// Persistently mapped CPU-to-GPU buffer backing a ring buffer
///
/// Ring spans are used as copy sources and bound directly as vertex
/// or constant buffers.
pub struct VulkanUploadHeap {
    buffer: Arc<Buffer>,
    native: Arc<dyn NativeBuffer>,
}

impl VulkanUploadHeap {
    pub(crate) fn new(ctx: Arc<GpuContext>, size: u64) -> Result<Self> {
        let usage = buffer_usage_to_vk(BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::CONSTANT);
        let buffer = Arc::new(Buffer::new(ctx, size, usage, MemoryLocation::CpuToGpu, "upload heap")?);
        if buffer.mapped_ptr().is_err() {
            hal_error!(SOURCE, "Upload heap of {} bytes is not host visible", size);
            return Err(Error::InitializationFailed("upload heap is not host visible".to_string()));
        }

        let native: Arc<dyn NativeBuffer> = buffer.clone();
        Ok(Self { buffer, native })
    }
}

impl UploadHeap for VulkanUploadHeap {
    fn size(&self) -> u64 {
        self.buffer.size
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.buffer.write_mapped(offset, data)
    }

    fn buffer(&self) -> &Arc<dyn NativeBuffer> {
        &self.native
    }
}
