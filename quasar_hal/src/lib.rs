/*!
# Quasar HAL

Core of a GPU hardware abstraction layer for a real-time renderer.

The crate sits between a renderer and a native graphics API. It hides
resource state tracking, transient upload memory, descriptor slot
management, pipeline object caching and frame-level CPU/GPU
synchronization behind a small command recording API. Native APIs plug in
through the [`backend::GraphicsBackend`] trait; `quasar_hal_vulkan`
provides the Vulkan implementation and [`backend::mock`] a recording
backend for tests.

## Architecture

- **Device**: shared context (backend, descriptor heaps, pipeline cache,
  command list pool, queue fence)
- **CommandRecorder**: per-thread recording scope with automatic barriers
  and ring-buffer backed writes
- **RingBuffer**: per-frame transient upload memory reclaimed in FIFO order
- **HeapAllocator**: bitmap allocator over descriptor heap slots
- **ResourceStateCache**: per-scope subresource state tracking
- **PipelineCache**: pipeline objects keyed by their full creation state,
  with a nested render-pass-format cache

```no_run
use std::sync::Arc;
use quasar_hal::backend::mock::MockBackend;
use quasar_hal::quasar::{CommandRecorder, Device, DeviceConfig};

fn main() -> quasar_hal::quasar::Result<()> {
    let device = Device::new(Arc::new(MockBackend::new()), DeviceConfig::default())?;
    let mut recorder = CommandRecorder::new(&device)?;
    recorder.begin()?;
    let list = recorder.finish()?;
    device.execute(&[list])?;
    device.wait_idle()
}
```
*/

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod log;
pub mod memory;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_utils;

// Main quasar namespace module
pub mod quasar {
    // Error types
    pub use crate::error::{Error, Result};

    // Context and recording
    pub use crate::command::{CommandListId, CommandListState, CommandRecorder, VertexBufferBinding};
    pub use crate::config::DeviceConfig;
    pub use crate::device::Device;

    // Logging sub-module (types only, macros stay at the crate root)
    pub mod log {
        pub use crate::log::{reset_logger, set_logger, DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Allocators
    pub mod memory {
        pub use crate::memory::*;
    }

    // Pipeline sub-module
    pub mod pipeline {
        pub use crate::pipeline::*;
    }

    // Resource sub-module
    pub mod resource {
        pub use crate::resource::*;
    }

    // Shared enums, flags and constants
    pub mod types {
        pub use crate::types::*;
    }
}

// Re-export math library at crate root
pub use glam;
