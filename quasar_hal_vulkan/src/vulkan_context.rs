/// GpuContext - Shared GPU state for all Vulkan objects
///
/// Every native object (buffers, textures, heaps, pipelines, command
/// allocators) holds an `Arc<GpuContext>`, so the logical device and the
/// instance are only destroyed once the last object referencing them is gone.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use quasar_hal::quasar::{Error, Result};
use quasar_hal::{hal_err, hal_error};
use std::mem::ManuallyDrop;
use std::sync::Mutex;

pub(crate) const SOURCE: &str = "quasar::vulkan";

/// Shared GPU context
pub struct GpuContext {
    /// Loader, must outlive the instance
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,

    /// Wrapped in ManuallyDrop so memory pages are released before the device
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,

    /// Single queue used for graphics, compute and copy work
    pub(crate) queue: Mutex<vk::Queue>,
    pub(crate) queue_family: u32,

    /// Pool for blocking one-shot work (initial uploads, initial layouts)
    pub(crate) upload_command_pool: Mutex<vk::CommandPool>,

    /// VK_KHR_push_descriptor, used for volatile constant buffers
    pub(crate) push_descriptor: ash::khr::push_descriptor::Device,

    /// Command buffer labels (only with validation)
    pub(crate) debug_labels: Option<ash::ext::debug_utils::Device>,

    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    pub(crate) properties: vk::PhysicalDeviceProperties,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        allocator: Allocator,
        queue: vk::Queue,
        queue_family: u32,
        upload_command_pool: vk::CommandPool,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);
        let debug_labels = debug_utils_loader
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queue: Mutex::new(queue),
            queue_family,
            upload_command_pool: Mutex::new(upload_command_pool),
            push_descriptor,
            debug_labels,
            debug_utils_loader,
            debug_messenger,
            properties,
        }
    }

    /// Allocate and bind memory for a buffer
    pub(crate) fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        name: &str,
        location: MemoryLocation,
    ) -> Result<Allocation> {
        unsafe {
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = self
                .allocator
                .lock()?
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    hal_error!(SOURCE, "Out of GPU memory for {} ({:.2} MB): {}", name, size_mb, e);
                    Error::OutOfMemory
                })?;

            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.free_allocation(allocation);
                return Err(hal_err!(SOURCE, "Failed to bind memory of {}: {:?}", name, e));
            }
            Ok(allocation)
        }
    }

    /// Allocate and bind memory for an image
    pub(crate) fn allocate_image_memory(&self, image: vk::Image, name: &str) -> Result<Allocation> {
        unsafe {
            let requirements = self.device.get_image_memory_requirements(image);
            let allocation = self
                .allocator
                .lock()?
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| {
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    hal_error!(SOURCE, "Out of GPU memory for {} ({:.2} MB): {}", name, size_mb, e);
                    Error::OutOfMemory
                })?;

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                self.free_allocation(allocation);
                return Err(hal_err!(SOURCE, "Failed to bind memory of {}: {:?}", name, e));
            }
            Ok(allocation)
        }
    }

    /// Return an allocation to the allocator
    ///
    /// Never panics: a poisoned allocator leaks the allocation instead.
    pub(crate) fn free_allocation(&self, allocation: Allocation) {
        if let Ok(mut allocator) = self.allocator.lock() {
            if let Err(e) = allocator.free(allocation) {
                hal_error!(SOURCE, "Failed to free GPU allocation: {}", e);
            }
        }
    }

    /// Record `record` into a throwaway command buffer, submit it and block
    /// until the GPU has executed it
    pub(crate) fn submit_one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        unsafe {
            let pool = self.upload_command_pool.lock()?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| hal_err!(SOURCE, "Failed to allocate one-shot command buffer: {:?}", e))?[0];

            let result = self.run_one_shot(command_buffer, record);
            self.device.free_command_buffers(*pool, &[command_buffer]);
            result
        }
    }

    unsafe fn run_one_shot<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(|e| hal_err!(SOURCE, "Failed to begin one-shot command buffer: {:?}", e))?;

        record(&self.device, command_buffer);

        self.device
            .end_command_buffer(command_buffer)
            .map_err(|e| hal_err!(SOURCE, "Failed to end one-shot command buffer: {:?}", e))?;

        let fence = self
            .device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| hal_err!(SOURCE, "Failed to create one-shot fence: {:?}", e))?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let submitted = {
            let queue = self.queue.lock()?;
            self.device.queue_submit(*queue, &[submit_info], fence)
        };

        let result = submitted
            .map_err(|e| hal_err!(SOURCE, "Failed to submit one-shot command buffer: {:?}", e))
            .and_then(|_| {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(|e| hal_err!(SOURCE, "Failed to wait for one-shot fence: {:?}", e))
            });
        self.device.destroy_fence(fence, None);
        result
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            if let Ok(pool) = self.upload_command_pool.get_mut() {
                self.device.destroy_command_pool(*pool, None);
            }

            // Memory pages must go before the device
            ManuallyDrop::drop(&mut self.allocator);

            crate::vulkan_debug::cleanup_debug_config();

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
