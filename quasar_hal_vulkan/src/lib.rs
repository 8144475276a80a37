/*!
# Quasar HAL - Vulkan Backend

Vulkan implementation of the `quasar_hal` backend interface.

The backend drives a headless Vulkan 1.3 device through Ash, with
gpu-allocator for memory management. Descriptor heaps become descriptor
pools and image-view tables, volatile constant buffers become push
descriptors, and the device fence is a timeline semaphore.

```no_run
use std::sync::Arc;
use quasar_hal::quasar::{CommandRecorder, Device, DeviceConfig};
use quasar_hal_vulkan::VulkanBackend;

fn main() -> quasar_hal::quasar::Result<()> {
    let config = DeviceConfig::default();
    let backend = VulkanBackend::new(&config)?;
    let device = Device::new(Arc::new(backend), config)?;

    let mut recorder = CommandRecorder::new(&device)?;
    recorder.begin()?;
    let list = recorder.finish()?;
    device.execute(&[list])?;
    device.wait_idle()
}
```
*/

// Vulkan implementation modules
mod vulkan;
mod vulkan_binding;
mod vulkan_buffer;
mod vulkan_command_list;
mod vulkan_context;
mod vulkan_convert;
mod vulkan_debug;
mod vulkan_descriptor_heap;
mod vulkan_fence;
mod vulkan_pipeline;
mod vulkan_shader;
mod vulkan_texture;

pub use vulkan::VulkanBackend;

// Re-export debug utilities
pub use vulkan_debug::{get_validation_stats, log_validation_stats_report, DebugConfig, ValidationStats};
