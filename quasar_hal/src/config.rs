//! Device configuration
//!
//! `DeviceConfig` sizes every fixed-capacity pool of the HAL up front:
//! the per-recorder ring buffer, the descriptor heaps and the frame
//! pipeline depth. Nothing is grown at runtime.

use std::time::Duration;
use crate::error::{Error, Result};
use crate::types::RING_BUFFER_ALIGNMENT;

/// Configuration for a [`Device`](crate::device::Device) and its backend
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Number of frames that may be in flight per recorder (command allocator slots)
    pub frames_in_flight: u32,

    /// Size in bytes of each recorder's ring buffer (multiple of 256)
    pub ring_buffer_size: u64,

    /// Capacity of the shader-visible CBV/SRV/UAV heap
    pub cbv_srv_uav_heap_size: u32,

    /// Capacity of the render-target-view heap
    pub rtv_heap_size: u32,

    /// Capacity of the depth-stencil-view heap
    pub dsv_heap_size: u32,

    /// Upper bound for a single backpressure wait on the fence
    pub fence_timeout: Duration,

    /// Enable backend validation (Vulkan validation layers)
    pub enable_validation: bool,

    /// Application name reported to the driver
    pub app_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            ring_buffer_size: 16 * 1024 * 1024,
            cbv_srv_uav_heap_size: 65536,
            rtv_heap_size: 1024,
            dsv_heap_size: 256,
            fence_timeout: Duration::from_secs(5),
            enable_validation: cfg!(debug_assertions),
            app_name: "Quasar Application".to_string(),
        }
    }
}

impl DeviceConfig {
    /// Check that every pool size is usable
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InitializationFailed(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.ring_buffer_size == 0 || self.ring_buffer_size % RING_BUFFER_ALIGNMENT != 0 {
            return Err(Error::InitializationFailed(format!(
                "ring_buffer_size must be a positive multiple of {} (got {})",
                RING_BUFFER_ALIGNMENT, self.ring_buffer_size
            )));
        }
        for (name, size) in [
            ("cbv_srv_uav_heap_size", self.cbv_srv_uav_heap_size),
            ("rtv_heap_size", self.rtv_heap_size),
            ("dsv_heap_size", self.dsv_heap_size),
        ] {
            if size == 0 {
                return Err(Error::InitializationFailed(format!("{} must not be zero", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
