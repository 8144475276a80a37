/// Shader - Vulkan implementation of NativeShader

use ash::vk;
use quasar_hal::backend::NativeShader;
use quasar_hal::pipeline::ShaderDesc;
use quasar_hal::quasar::types::ShaderStage;
use quasar_hal::quasar::{Error, Result};
use quasar_hal::{hal_err, hal_error};
use std::any::Any;
use std::ffi::CString;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use crate::vulkan_context::{GpuContext, SOURCE};

/// SPIR-V shader module
pub struct Shader {
    ctx: Arc<GpuContext>,
    pub(crate) module: vk::ShaderModule,
    stage: ShaderStage,
    pub(crate) entry_point: CString,
}

impl Shader {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &ShaderDesc) -> Result<Self> {
        if desc.code.is_empty() || desc.code.len() % 4 != 0 {
            hal_error!(SOURCE, "Shader code is not SPIR-V (size: {} bytes)", desc.code.len());
            return Err(Error::InvalidResource("shader code is not a SPIR-V word stream".to_string()));
        }
        let entry_point = CString::new(desc.entry_point.as_str()).map_err(|_| {
            Error::InvalidResource(format!("shader entry point '{}' contains a NUL byte", desc.entry_point))
        })?;

        // Copies into u32 words, so the byte buffer needs no particular alignment
        let code = ash::util::read_spv(&mut Cursor::new(&desc.code))
            .map_err(|e| hal_err!(SOURCE, "Invalid SPIR-V for {:?} shader: {}", desc.stage, e))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe {
            ctx.device
                .create_shader_module(&create_info, None)
                .map_err(|e| hal_err!(SOURCE, "Failed to create shader module: {:?}", e))?
        };

        Ok(Self {
            ctx,
            module,
            stage: desc.stage,
            entry_point,
        })
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("module", &self.module)
            .field("stage", &self.stage)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

impl NativeShader for Shader {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}

pub(crate) fn vk_shader(shader: &Arc<dyn NativeShader>) -> Option<&Shader> {
    shader.as_any().downcast_ref::<Shader>()
}
