//! GPU resources and binding objects
//!
//! Buffers and textures implement [`Resource`], the interface the state
//! cache and the recorder use to track access modes. Render targets and
//! binding instances own descriptor heap slots and give them back on drop.

pub mod binding;
pub mod buffer;
pub mod render_target;
pub mod texture;

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backend::NativeResource;
use crate::types::ResourceState;

pub use binding::{
    BindingDesc, BindingType, BoundResource, ResourceBindingInstance, ResourceBindingLayout, ResourceBindingSet,
    ResourceBindingSetDesc, VolatileCBufferBinding,
};
pub use buffer::{Buffer, BufferDesc};
pub use render_target::{RenderTarget, RenderTargetAttachment, RenderTargetDesc};
pub use texture::{Texture, TextureDesc, TextureRegion};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for HAL objects (resources, shaders, layouts)
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique identity of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        Self(next_object_id())
    }
}

/// GPU memory whose access mode is tracked across recording scopes
///
/// Outside a recording scope every subresource must be in
/// `default_state()`. Recorders move subresources away from it and back.
pub trait Resource: Send + Sync + Debug {
    fn id(&self) -> ResourceId;

    /// State the resource rests in between recording scopes
    fn default_state(&self) -> ResourceState;

    fn subresource_count(&self) -> u32;

    /// Last state applied to a subresource by an executed command list
    fn current_state(&self, subresource: u32) -> ResourceState;

    fn set_current_state(&self, subresource: u32, state: ResourceState);

    /// Native object barriers are issued on (`None` for storage-less buffers)
    fn native_resource(&self) -> Option<NativeResource>;
}

/// Per-subresource current states
#[derive(Debug)]
pub struct SubresourceStates {
    states: Mutex<Vec<ResourceState>>,
}

impl SubresourceStates {
    pub fn new(count: u32, state: ResourceState) -> Self {
        Self {
            states: Mutex::new(vec![state; count as usize]),
        }
    }

    /// State of a subresource (`COMMON` if out of range)
    pub fn get(&self, subresource: u32) -> ResourceState {
        self.states
            .lock()
            .ok()
            .and_then(|s| s.get(subresource as usize).copied())
            .unwrap_or(ResourceState::COMMON)
    }

    pub fn set(&self, subresource: u32, state: ResourceState) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(slot) = states.get_mut(subresource as usize) {
                *slot = state;
            }
        }
    }
}
