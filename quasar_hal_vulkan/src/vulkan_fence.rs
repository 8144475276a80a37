/// TimelineFence - Vulkan implementation of NativeFence on a timeline semaphore

use ash::vk;
use quasar_hal::backend::NativeFence;
use quasar_hal::quasar::Result;
use quasar_hal::{hal_err, hal_error};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::vulkan_context::{GpuContext, SOURCE};

pub struct TimelineFence {
    ctx: Arc<GpuContext>,
    pub(crate) semaphore: vk::Semaphore,
}

impl TimelineFence {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe {
            ctx.device
                .create_semaphore(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create timeline semaphore: {:?}", e))?
        };
        Ok(Self { ctx, semaphore })
    }
}

impl NativeFence for TimelineFence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        unsafe {
            self.ctx
                .device
                .get_semaphore_counter_value(self.semaphore)
                .unwrap_or_else(|e| {
                    hal_error!(SOURCE, "Failed to read timeline semaphore: {:?}", e);
                    0
                })
        }
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<bool> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);

        match unsafe { self.ctx.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(hal_err!(SOURCE, "Failed to wait for timeline value {}: {:?}", value, e)),
        }
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
