/// VulkanBackend - Vulkan implementation of GraphicsBackend
///
/// Headless Vulkan 1.3 device: no surface, no swapchain. Every queue type
/// maps onto the same graphics+compute queue and every fence is a timeline
/// semaphore signalled by `vkQueueSubmit2`.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use quasar_hal::backend::{
    AttachmentView, DescriptorHeapType, DescriptorWrite, GraphicsBackend, NativeBindingInstance,
    NativeBindingLayout, NativeBindingSet, NativeBuffer, NativeCommandAllocator, NativeCommandList,
    NativeDescriptorHeap, NativeFence, NativePassFormat, NativePipeline, NativePipelineDesc,
    NativeShader, NativeTexture, UploadHeap,
};
use quasar_hal::memory::DescriptorRange;
use quasar_hal::pipeline::{PassFormatKey, ShaderDesc};
use quasar_hal::quasar::resource::{BufferDesc, ResourceBindingSetDesc, TextureDesc, VolatileCBufferBinding};
use quasar_hal::quasar::types::{QueueType, ResourceState};
use quasar_hal::quasar::{DeviceConfig, Error, Result};
use quasar_hal::{hal_err, hal_error, hal_info, hal_warn};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::vulkan_binding::{vk_instance, BindingInstance, BindingLayout, BindingSet};
use crate::vulkan_buffer::{Buffer, VulkanUploadHeap};
use crate::vulkan_command_list::{CommandAllocator, CommandList};
use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_debug::{self, DebugConfig};
use crate::vulkan_descriptor_heap::{vk_heap, DescriptorHeap};
use crate::vulkan_fence::TimelineFence;
use crate::vulkan_pipeline::{PassFormat, Pipeline};
use crate::vulkan_shader::Shader;
use crate::vulkan_texture::Texture;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan graphics backend
pub struct VulkanBackend {
    ctx: Arc<GpuContext>,
}

/// Physical device picked for the backend
struct DeviceChoice {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    features: vk::PhysicalDeviceFeatures,
}

impl VulkanBackend {
    /// Create the instance, pick a GPU and create the logical device
    ///
    /// Validation is enabled by `config.enable_validation` or the
    /// `vulkan-validation` feature. A missing validation layer only
    /// disables validation.
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` when no Vulkan 1.3 device with
    /// `VK_KHR_push_descriptor` is available.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        unsafe {
            // Create Vulkan Entry
            let entry = ash::Entry::load().map_err(|e| {
                hal_error!(SOURCE, "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let validation = Self::validation_requested(config) && Self::validation_layer_present(&entry);

            // Application Info
            let app_name = CString::new(config.app_name.as_str()).map_err(|_| {
                Error::InitializationFailed(format!("application name '{}' contains a NUL byte", config.app_name))
            })?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Quasar")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let mut extension_names = Vec::new();
            let mut layer_names = Vec::new();
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(VALIDATION_LAYER.as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                hal_error!(SOURCE, "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            // Setup debug messenger if validation is enabled
            let (debug_utils_loader, debug_messenger) = if validation {
                match Self::create_debug_messenger(&entry, &instance) {
                    Ok((loader, messenger)) => (Some(loader), Some(messenger)),
                    Err(e) => {
                        instance.destroy_instance(None);
                        return Err(e);
                    }
                }
            } else {
                (None, None)
            };

            let destroy_instance = || {
                if let (Some(loader), Some(messenger)) = (&debug_utils_loader, debug_messenger) {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
                vulkan_debug::cleanup_debug_config();
                instance.destroy_instance(None);
            };

            let choice = match Self::select_physical_device(&instance) {
                Ok(choice) => choice,
                Err(e) => {
                    destroy_instance();
                    return Err(e);
                }
            };

            let device = match Self::create_device(&instance, &choice) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance();
                    return Err(e);
                }
            };
            let queue = device.get_device_queue(choice.queue_family, 0);

            // Create GPU allocator
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device: choice.physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            });
            let allocator = match allocator {
                Ok(allocator) => allocator,
                Err(e) => {
                    hal_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
                    device.destroy_device(None);
                    destroy_instance();
                    return Err(Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)));
                }
            };

            // Upload command pool (TRANSIENT + RESET for reusable one-shot uploads)
            let upload_pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(choice.queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let upload_command_pool = match device.create_command_pool(&upload_pool_create_info, None) {
                Ok(pool) => pool,
                Err(e) => {
                    hal_error!(SOURCE, "Failed to create upload command pool: {:?}", e);
                    drop(allocator);
                    device.destroy_device(None);
                    destroy_instance();
                    return Err(Error::InitializationFailed(format!(
                        "Failed to create upload command pool: {:?}",
                        e
                    )));
                }
            };

            // GpuContext owns device, instance, and debug messenger destruction
            let ctx = Arc::new(GpuContext::new(
                entry,
                instance,
                choice.physical_device,
                device,
                allocator,
                queue,
                choice.queue_family,
                upload_command_pool,
                debug_utils_loader,
                debug_messenger,
            ));

            hal_info!(
                SOURCE,
                "Vulkan device '{}' ready (validation {})",
                device_name(&ctx.properties),
                if validation { "on" } else { "off" }
            );
            Ok(Self { ctx })
        }
    }

    fn validation_requested(config: &DeviceConfig) -> bool {
        config.enable_validation || cfg!(feature = "vulkan-validation")
    }

    unsafe fn validation_layer_present(entry: &ash::Entry) -> bool {
        let present = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
            })
            .unwrap_or(false);
        if !present {
            hal_warn!(SOURCE, "Validation requested but {:?} is not installed, continuing without it", VALIDATION_LAYER);
        }
        present
    }

    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let debug_config = DebugConfig::default();
        vulkan_debug::init_debug_config(debug_config);

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(vulkan_debug::severity_flags(debug_config.min_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug::vulkan_debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&debug_info, None)
            .map_err(|e| {
                hal_error!(SOURCE, "Failed to create debug messenger: {:?}", e);
                vulkan_debug::cleanup_debug_config();
                Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
            })?;
        Ok((debug_utils, messenger))
    }

    /// First suitable discrete GPU, else the first suitable device
    unsafe fn select_physical_device(instance: &ash::Instance) -> Result<DeviceChoice> {
        let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
            hal_error!(SOURCE, "Failed to enumerate physical devices: {:?}", e);
            Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
        })?;

        let mut candidates: Vec<(DeviceChoice, bool)> = physical_devices
            .into_iter()
            .filter_map(|physical_device| {
                let properties = instance.get_physical_device_properties(physical_device);
                let choice = Self::check_device(instance, physical_device, &properties)?;
                let discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
                Some((choice, discrete))
            })
            .collect();

        // Stable sort keeps enumeration order among equals
        candidates.sort_by_key(|(_, discrete)| !discrete);
        candidates.into_iter().next().map(|(choice, _)| choice).ok_or_else(|| {
            hal_error!(SOURCE, "No Vulkan 1.3 GPU with VK_KHR_push_descriptor found");
            Error::InitializationFailed("No suitable Vulkan GPU found".to_string())
        })
    }

    unsafe fn check_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        properties: &vk::PhysicalDeviceProperties,
    ) -> Option<DeviceChoice> {
        let name = device_name(properties);
        if properties.api_version < vk::API_VERSION_1_3 {
            hal_info!(SOURCE, "Skipping '{}': Vulkan 1.3 not supported", name);
            return None;
        }

        let has_push_descriptor = instance
            .enumerate_device_extension_properties(physical_device)
            .map(|extensions| {
                extensions
                    .iter()
                    .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::push_descriptor::NAME))
            })
            .unwrap_or(false);
        if !has_push_descriptor {
            hal_info!(SOURCE, "Skipping '{}': VK_KHR_push_descriptor missing", name);
            return None;
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let features = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features12)
                .push_next(&mut features13);
            instance.get_physical_device_features2(physical_device, &mut features2);
            features2.features
        };
        if features12.timeline_semaphore == vk::FALSE
            || features13.dynamic_rendering == vk::FALSE
            || features13.synchronization2 == vk::FALSE
        {
            hal_info!(SOURCE, "Skipping '{}': missing Vulkan 1.3 core features", name);
            return None;
        }

        let queue_family = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .position(|family| {
                family
                    .queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })? as u32;

        Some(DeviceChoice {
            physical_device,
            queue_family,
            features,
        })
    }

    unsafe fn create_device(instance: &ash::Instance, choice: &DeviceChoice) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(choice.queue_family)
            .queue_priorities(&queue_priorities)];

        let device_extension_names = [ash::khr::push_descriptor::NAME.as_ptr()];

        let base_features = vk::PhysicalDeviceFeatures::default()
            .tessellation_shader(choice.features.tessellation_shader == vk::TRUE)
            .geometry_shader(choice.features.geometry_shader == vk::TRUE)
            .depth_clamp(choice.features.depth_clamp == vk::TRUE)
            .fill_mode_non_solid(choice.features.fill_mode_non_solid == vk::TRUE)
            .depth_bias_clamp(choice.features.depth_bias_clamp == vk::TRUE);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(base_features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device_create_info = vk::DeviceCreateInfo::default()
            .push_next(&mut features2)
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extension_names);

        instance
            .create_device(choice.physical_device, &device_create_info, None)
            .map_err(|e| {
                hal_error!(SOURCE, "Failed to create logical device: {:?}", e);
                Error::InitializationFailed(format!("Failed to create device: {:?}", e))
            })
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> String {
        device_name(&self.ctx.properties)
    }

    /// Whether the validation layer is active
    pub fn validation_enabled(&self) -> bool {
        self.ctx.debug_messenger.is_some()
    }

    fn submit_timeline(&self, command_buffers: &[vk::CommandBuffer], fence: &dyn NativeFence, value: u64) -> Result<()> {
        let fence = fence
            .as_any()
            .downcast_ref::<TimelineFence>()
            .ok_or_else(|| Error::InvalidResource("fence is not a Vulkan timeline fence".to_string()))?;

        let command_buffer_infos: Vec<vk::CommandBufferSubmitInfo> = command_buffers
            .iter()
            .map(|&command_buffer| vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer))
            .collect();
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);

        let queue = self.ctx.queue.lock()?;
        unsafe {
            self.ctx
                .device
                .queue_submit2(*queue, &[submit_info], vk::Fence::null())
                .map_err(|e| hal_err!(SOURCE, "Failed to submit to GPU queue (signal {}): {:?}", value, e))
        }
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Arc<dyn NativeBuffer>> {
        Ok(Arc::new(Buffer::from_desc(&self.ctx, desc, initial_data)?))
    }

    fn create_texture(&self, desc: &TextureDesc, default_state: ResourceState) -> Result<Arc<dyn NativeTexture>> {
        Ok(Arc::new(Texture::new(&self.ctx, desc, default_state)?))
    }

    fn create_upload_heap(&self, size: u64) -> Result<Box<dyn UploadHeap>> {
        Ok(Box::new(VulkanUploadHeap::new(self.ctx.clone(), size)?))
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<Arc<dyn NativeDescriptorHeap>> {
        Ok(Arc::new(DescriptorHeap::new(self.ctx.clone(), heap_type, capacity)?))
    }

    fn write_attachment_view(
        &self,
        heap: &Arc<dyn NativeDescriptorHeap>,
        index: u32,
        view: &AttachmentView,
    ) -> Result<()> {
        vk_heap(heap)
            .ok_or_else(|| Error::InvalidResource("descriptor heap is not a Vulkan heap".to_string()))?
            .write_attachment(index, view)
    }

    fn release_attachment_view(&self, heap: &Arc<dyn NativeDescriptorHeap>, index: u32) {
        if let Some(heap) = vk_heap(heap) {
            heap.release_attachment(index);
        }
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn NativeShader>> {
        Ok(Arc::new(Shader::new(self.ctx.clone(), desc)?))
    }

    fn create_binding_set(&self, desc: &ResourceBindingSetDesc) -> Result<Arc<dyn NativeBindingSet>> {
        Ok(Arc::new(BindingSet::new(self.ctx.clone(), desc)?))
    }

    fn create_binding_layout(
        &self,
        sets: &[Arc<dyn NativeBindingSet>],
        volatile_cbuffers: &[VolatileCBufferBinding],
    ) -> Result<Arc<dyn NativeBindingLayout>> {
        Ok(Arc::new(BindingLayout::new(self.ctx.clone(), sets, volatile_cbuffers)?))
    }

    fn create_binding_instance(
        &self,
        set: &Arc<dyn NativeBindingSet>,
        heap: &Arc<dyn NativeDescriptorHeap>,
        range: DescriptorRange,
    ) -> Result<Arc<dyn NativeBindingInstance>> {
        Ok(Arc::new(BindingInstance::new(self.ctx.clone(), set, heap, range)?))
    }

    fn write_binding(
        &self,
        instance: &Arc<dyn NativeBindingInstance>,
        binding: u32,
        write: &DescriptorWrite,
    ) -> Result<()> {
        vk_instance(instance)
            .ok_or_else(|| Error::InvalidResource("binding instance is not a Vulkan instance".to_string()))?
            .write(binding, write)
    }

    fn create_pass_format(&self, key: &PassFormatKey) -> Result<Arc<dyn NativePassFormat>> {
        Ok(Arc::new(PassFormat::new(key)))
    }

    fn create_pipeline(&self, desc: &NativePipelineDesc<'_>) -> Result<Arc<dyn NativePipeline>> {
        Ok(Arc::new(Pipeline::graphics(self.ctx.clone(), desc)?))
    }

    fn create_compute_pipeline(
        &self,
        shader: &Arc<dyn NativeShader>,
        binding_layout: &Arc<dyn NativeBindingLayout>,
    ) -> Result<Arc<dyn NativePipeline>> {
        Ok(Arc::new(Pipeline::compute(self.ctx.clone(), shader, binding_layout)?))
    }

    fn create_command_allocator(&self, queue: QueueType) -> Result<Box<dyn NativeCommandAllocator>> {
        Ok(Box::new(CommandAllocator::new(self.ctx.clone(), queue)?))
    }

    fn create_fence(&self) -> Result<Box<dyn NativeFence>> {
        Ok(Box::new(TimelineFence::new(self.ctx.clone())?))
    }

    fn submit(
        &self,
        _queue: QueueType,
        lists: &[&dyn NativeCommandList],
        fence: &dyn NativeFence,
        signal_value: u64,
    ) -> Result<()> {
        let command_buffers = lists
            .iter()
            .map(|list| {
                let list = list
                    .as_any()
                    .downcast_ref::<CommandList>()
                    .ok_or_else(|| Error::InvalidResource("command list is not a Vulkan command list".to_string()))?;
                if !list.closed {
                    return Err(Error::InvalidState("command list submitted before close".to_string()));
                }
                Ok(list.command_buffer)
            })
            .collect::<Result<Vec<_>>>()?;

        self.submit_timeline(&command_buffers, fence, signal_value)
    }

    fn signal(&self, _queue: QueueType, fence: &dyn NativeFence, value: u64) -> Result<()> {
        self.submit_timeline(&[], fence, value)
    }

    fn wait_idle(&self) -> Result<()> {
        let _queue = self.ctx.queue.lock()?;
        unsafe {
            self.ctx
                .device
                .device_wait_idle()
                .map_err(|e| hal_err!(SOURCE, "Failed to wait for device idle: {:?}", e))
        }
    }
}
