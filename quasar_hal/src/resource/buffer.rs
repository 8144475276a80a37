//! Buffer resource

use std::sync::Arc;

use crate::backend::{GraphicsBackend, NativeBuffer, NativeResource};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceId, SubresourceStates};
use crate::types::{BufferMode, BufferUsage, ResourceState};

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    pub mode: BufferMode,
    pub usage: BufferUsage,
}

/// GPU buffer
///
/// Volatile buffers have no native storage: each write lands in the
/// recorder's ring buffer and the buffer is rebound at the new location.
/// The location only lives for the recording scope that wrote it.
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    desc: BufferDesc,
    native: Option<Arc<dyn NativeBuffer>>,
    default_state: ResourceState,
    states: SubresourceStates,
}

impl Buffer {
    /// Create a buffer
    ///
    /// Static buffers need `initial_data`; volatile and readback buffers
    /// reject it.
    pub fn new(backend: &dyn GraphicsBackend, desc: BufferDesc, initial_data: Option<&[u8]>) -> Result<Self> {
        if desc.size == 0 {
            return Err(Error::InvalidResource("buffer size must not be zero".to_string()));
        }
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                return Err(Error::InvalidResource(format!(
                    "initial data ({} bytes) larger than buffer ({} bytes)",
                    data.len(), desc.size
                )));
            }
        }

        match (desc.mode, initial_data.is_some()) {
            (BufferMode::Static, false) => {
                return Err(Error::InvalidResource(
                    "static buffers need their content at creation".to_string(),
                ));
            }
            (BufferMode::Volatile | BufferMode::Readback, true) => {
                return Err(Error::InvalidResource(format!(
                    "{:?} buffers cannot be created with initial data",
                    desc.mode
                )));
            }
            _ => {}
        }

        let native = match desc.mode {
            BufferMode::Volatile => None,
            _ => Some(backend.create_buffer(&desc, initial_data)?),
        };

        let default_state = Self::default_state_for(desc.mode);

        Ok(Self {
            id: ResourceId::next(),
            desc,
            native,
            default_state,
            states: SubresourceStates::new(1, default_state),
        })
    }

    /// Resting state of a buffer created in `mode`
    pub fn default_state_for(mode: BufferMode) -> ResourceState {
        match mode {
            BufferMode::Readback => ResourceState::COPY_DEST,
            BufferMode::Static | BufferMode::Dynamic | BufferMode::Volatile => ResourceState::GENERIC_READ,
        }
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn mode(&self) -> BufferMode {
        self.desc.mode
    }

    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    /// Native storage (`None` for volatile buffers)
    pub fn native(&self) -> Option<&Arc<dyn NativeBuffer>> {
        self.native.as_ref()
    }

    /// Read the content of a readback buffer
    ///
    /// Only meaningful once the command list that copied into it completed.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        if self.desc.mode != BufferMode::Readback {
            return Err(Error::InvalidResource(format!(
                "only readback buffers can be read (buffer is {:?})",
                self.desc.mode
            )));
        }
        match &self.native {
            Some(native) => native.read(offset, out),
            None => Err(Error::InvalidResource("buffer has no storage".to_string())),
        }
    }
}

impl Resource for Buffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn default_state(&self) -> ResourceState {
        self.default_state
    }

    fn subresource_count(&self) -> u32 {
        1
    }

    fn current_state(&self, subresource: u32) -> ResourceState {
        self.states.get(subresource)
    }

    fn set_current_state(&self, subresource: u32, state: ResourceState) {
        self.states.set(subresource, state);
    }

    fn native_resource(&self) -> Option<NativeResource> {
        self.native.clone().map(NativeResource::Buffer)
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
