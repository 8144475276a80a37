//! Device context
//!
//! The device owns everything shared between recorders: the backend, the
//! three descriptor heap allocators, the pipeline cache, the command list
//! pool, the queue fence. It is created once and passed as `&Arc<Device>`
//! to whatever needs it.

use std::sync::{Arc, Mutex};

use crate::backend::{DescriptorHeapType, GraphicsBackend, NativeCommandList};
use crate::command::{CommandListId, CommandListManager, CommandListState, Fence, FramePipeline, FrameTicket};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::memory::HeapAllocator;
use crate::pipeline::{ComputePipelineState, PipelineCache, PipelineState, PipelineStateDesc, Shader, ShaderDesc, ShaderProgram};
use crate::resource::{
    Buffer, BufferDesc, RenderTarget, RenderTargetDesc, ResourceBindingInstance, ResourceBindingLayout,
    ResourceBindingSet, ResourceBindingSetDesc, Texture, TextureDesc, VolatileCBufferBinding,
};
use crate::types::QueueType;
use crate::{hal_bail, hal_debug, hal_error, hal_info, hal_warn};

pub struct Device {
    backend: Arc<dyn GraphicsBackend>,
    config: DeviceConfig,
    queue: QueueType,
    cbv_srv_uav_heap: Arc<Mutex<HeapAllocator>>,
    rtv_heap: Arc<Mutex<HeapAllocator>>,
    dsv_heap: Arc<Mutex<HeapAllocator>>,
    pipelines: Mutex<PipelineCache>,
    command_lists: Mutex<CommandListManager>,
    fence: Fence,
}

fn create_heap(
    backend: &dyn GraphicsBackend,
    heap_type: DescriptorHeapType,
    capacity: u32,
) -> Result<Arc<Mutex<HeapAllocator>>> {
    let native = backend.create_descriptor_heap(heap_type, capacity)?;
    Ok(Arc::new(Mutex::new(HeapAllocator::with_native(native))))
}

impl Device {
    /// Create a device on `backend`
    ///
    /// # Errors
    ///
    /// `InitializationFailed` for an invalid configuration, or whatever the
    /// backend returns while creating the heaps and the fence.
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: DeviceConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let device = Self {
            cbv_srv_uav_heap: create_heap(backend.as_ref(), DescriptorHeapType::CbvSrvUav, config.cbv_srv_uav_heap_size)?,
            rtv_heap: create_heap(backend.as_ref(), DescriptorHeapType::RenderTarget, config.rtv_heap_size)?,
            dsv_heap: create_heap(backend.as_ref(), DescriptorHeapType::DepthStencil, config.dsv_heap_size)?,
            fence: Fence::new(backend.as_ref())?,
            pipelines: Mutex::new(PipelineCache::new()),
            command_lists: Mutex::new(CommandListManager::new()),
            queue: QueueType::Graphics,
            backend,
            config,
        };

        hal_info!(
            "quasar::Device",
            "Device created on '{}' backend ({} frames in flight, {} byte ring buffers)",
            device.backend.name(),
            device.config.frames_in_flight,
            device.config.ring_buffer_size
        );
        Ok(Arc::new(device))
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn cbv_srv_uav_heap(&self) -> &Arc<Mutex<HeapAllocator>> {
        &self.cbv_srv_uav_heap
    }

    pub fn rtv_heap(&self) -> &Arc<Mutex<HeapAllocator>> {
        &self.rtv_heap
    }

    pub fn dsv_heap(&self) -> &Arc<Mutex<HeapAllocator>> {
        &self.dsv_heap
    }

    // ===== RESOURCE CREATION =====

    pub fn create_buffer(&self, desc: BufferDesc, initial_data: Option<&[u8]>) -> Result<Arc<Buffer>> {
        Ok(Arc::new(Buffer::new(self.backend.as_ref(), desc, initial_data)?))
    }

    pub fn create_texture(&self, desc: TextureDesc) -> Result<Arc<Texture>> {
        Ok(Arc::new(Texture::new(self.backend.as_ref(), desc)?))
    }

    pub fn create_render_target(&self, desc: RenderTargetDesc) -> Result<Arc<RenderTarget>> {
        Ok(Arc::new(RenderTarget::new(
            self.backend.clone(),
            self.rtv_heap.clone(),
            self.dsv_heap.clone(),
            desc,
        )?))
    }

    pub fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<Shader>> {
        Ok(Arc::new(Shader::new(self.backend.as_ref(), desc)?))
    }

    pub fn create_binding_set(&self, desc: ResourceBindingSetDesc) -> Result<Arc<ResourceBindingSet>> {
        Ok(Arc::new(ResourceBindingSet::new(self.backend.as_ref(), desc)?))
    }

    pub fn create_binding_layout(
        &self,
        sets: Vec<Arc<ResourceBindingSet>>,
        volatile_cbuffers: Vec<VolatileCBufferBinding>,
    ) -> Result<Arc<ResourceBindingLayout>> {
        Ok(Arc::new(ResourceBindingLayout::new(self.backend.as_ref(), sets, volatile_cbuffers)?))
    }

    /// Instance of `set` occupying a range of the CBV/SRV/UAV heap
    pub fn create_binding_instance(&self, set: &Arc<ResourceBindingSet>) -> Result<Arc<ResourceBindingInstance>> {
        Ok(Arc::new(ResourceBindingInstance::new(
            self.backend.clone(),
            self.cbv_srv_uav_heap.clone(),
            set.clone(),
        )?))
    }

    // ===== PIPELINES =====

    /// Cached graphics pipeline (see [`PipelineCache::get_or_create`])
    pub fn create_pipeline(
        &self,
        state: &PipelineStateDesc,
        program: &ShaderProgram,
        binding_layout: &Arc<ResourceBindingLayout>,
    ) -> Result<Arc<PipelineState>> {
        self.pipelines
            .lock()?
            .get_or_create(self.backend.as_ref(), state, program, binding_layout)
    }

    pub fn create_compute_pipeline(
        &self,
        shader: &Arc<Shader>,
        binding_layout: &Arc<ResourceBindingLayout>,
    ) -> Result<Arc<ComputePipelineState>> {
        self.pipelines
            .lock()?
            .get_or_create_compute(self.backend.as_ref(), shader, binding_layout)
    }

    /// Number of cached graphics pipelines and pass formats
    pub fn pipeline_cache_size(&self) -> Result<(usize, usize)> {
        let cache = self.pipelines.lock()?;
        Ok((cache.len(), cache.pass_formats().len()))
    }

    // ===== COMMAND LISTS =====

    pub(crate) fn register_command_list(&self, ticket: FrameTicket) -> Result<CommandListId> {
        Ok(self.command_lists.lock()?.request(self.queue, ticket))
    }

    pub(crate) fn mark_recorded(
        &self,
        id: CommandListId,
        native: Box<dyn NativeCommandList>,
        final_states: Vec<crate::command::FinalState>,
        retained: Vec<crate::command::Retained>,
    ) -> Result<()> {
        self.command_lists.lock()?.mark_recorded(id, native, final_states, retained)
    }

    pub fn command_list_state(&self, id: CommandListId) -> Option<CommandListState> {
        self.command_lists.lock().ok().and_then(|lists| lists.state(id))
    }

    /// Submit recorded lists in order and signal the next fence value
    ///
    /// Lists of one recorder must be submitted in the order they finished
    /// recording.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a list is not `Recorded`, appears twice, or would
    /// overtake an older unsubmitted list of the same recorder.
    pub fn execute(&self, ids: &[CommandListId]) -> Result<u64> {
        if ids.is_empty() {
            hal_bail!("quasar::Device", "execute() called with no command list");
        }

        let mut lists = self.command_lists.lock()?;
        let tickets = self.check_submission(&lists, ids)?;

        let fence_value = {
            let natives: Vec<&dyn NativeCommandList> =
                ids.iter().filter_map(|id| lists.native(*id)).collect();
            self.fence.signal(|fence, value| {
                self.backend.submit(self.queue, &natives, fence, value).map_err(|e| {
                    hal_error!("quasar::Device", "Submission of {} list(s) failed: {}", natives.len(), e);
                    e
                })
            })?
        };

        for (id, ticket) in ids.iter().zip(&tickets) {
            for (resource, subresource, state) in lists.begin_execute(*id, fence_value)? {
                resource.set_current_state(subresource, state);
            }
            ticket.pipeline.lock()?.on_frame_submitted(ticket.frame_index, fence_value)?;
        }
        for ticket in &tickets {
            self.retire_deferred_discards(&mut lists, &ticket.pipeline)?;
        }

        hal_debug!("quasar::Device", "Executed {} list(s) with fence value {}", ids.len(), fence_value);
        Ok(fence_value)
    }

    /// Retire a recorded list without running it
    ///
    /// The list gets a signal-only fence value so its frame slot and ring
    /// span are reclaimed through the normal completion path. A list whose
    /// recorder still has older unsubmitted frames is retired once those
    /// frames are executed or discarded; `Ok(None)` reports that case.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the list is not `Recorded` or is already discarded.
    pub fn discard(&self, id: CommandListId) -> Result<Option<u64>> {
        let mut lists = self.command_lists.lock()?;
        let state = lists.state(id).unwrap_or(CommandListState::Invalid);
        if state != CommandListState::Recorded {
            hal_bail!("quasar::Device", "Command list {:?} is {:?}, expected Recorded", id, state);
        }
        let ticket = lists
            .ticket(id)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("command list {:?} has no frame", id)))?;

        {
            let mut pipeline = ticket.pipeline.lock()?;
            if pipeline.is_discard_deferred(ticket.frame_index) {
                hal_bail!("quasar::Device", "Command list {:?} is already discarded", id);
            }
            match pipeline.unsubmitted_position(ticket.frame_index) {
                Some(0) => {}
                Some(_) => {
                    pipeline.defer_discard(ticket.frame_index, id);
                    hal_debug!(
                        "quasar::Device",
                        "Discard of list {:?} deferred until older frames are submitted",
                        id
                    );
                    return Ok(None);
                }
                None => hal_bail!("quasar::Device", "Frame {} of list {:?} is not awaiting submission", ticket.frame_index, id),
            }
        }

        let fence_value = self.signal_discard(&mut lists, id, &ticket)?;
        self.retire_deferred_discards(&mut lists, &ticket.pipeline)?;
        Ok(Some(fence_value))
    }

    fn signal_discard(&self, lists: &mut CommandListManager, id: CommandListId, ticket: &FrameTicket) -> Result<u64> {
        let fence_value = self
            .fence
            .signal(|fence, value| self.backend.signal(self.queue, fence, value))?;
        lists.begin_execute(id, fence_value)?;
        ticket.pipeline.lock()?.on_frame_submitted(ticket.frame_index, fence_value)?;

        hal_debug!("quasar::Device", "Discarded list {:?} with fence value {}", id, fence_value);
        Ok(fence_value)
    }

    /// Retire deferred discards that no longer overtake an unsubmitted frame
    fn retire_deferred_discards(&self, lists: &mut CommandListManager, pipeline: &Arc<Mutex<FramePipeline>>) -> Result<()> {
        loop {
            let ready = pipeline.lock()?.take_ready_discard();
            let Some((frame_index, id)) = ready else {
                return Ok(());
            };
            let ticket = FrameTicket {
                pipeline: pipeline.clone(),
                frame_index,
            };
            self.signal_discard(lists, id, &ticket)?;
        }
    }

    fn check_submission(&self, lists: &CommandListManager, ids: &[CommandListId]) -> Result<Vec<FrameTicket>> {
        let mut tickets: Vec<FrameTicket> = Vec::with_capacity(ids.len());

        for (i, id) in ids.iter().enumerate() {
            let state = lists.state(*id).unwrap_or(CommandListState::Invalid);
            if state != CommandListState::Recorded {
                hal_bail!("quasar::Device", "Command list {:?} is {:?}, expected Recorded", id, state);
            }
            if ids[..i].contains(id) {
                hal_bail!("quasar::Device", "Command list {:?} submitted twice", id);
            }

            let ticket = lists
                .ticket(*id)
                .cloned()
                .ok_or_else(|| Error::InvalidState(format!("command list {:?} has no frame", id)))?;
            let earlier = tickets
                .iter()
                .filter(|t| Arc::ptr_eq(&t.pipeline, &ticket.pipeline))
                .count();
            let (position, discarded) = {
                let pipeline = ticket.pipeline.lock()?;
                (
                    pipeline.unsubmitted_position(ticket.frame_index),
                    pipeline.is_discard_deferred(ticket.frame_index),
                )
            };
            if discarded {
                hal_bail!("quasar::Device", "Command list {:?} was discarded", id);
            }
            if position != Some(earlier) {
                hal_bail!(
                    "quasar::Device",
                    "Frame {} would be submitted before an older frame of the same recorder",
                    ticket.frame_index
                );
            }
            tickets.push(ticket);
        }
        Ok(tickets)
    }

    // ===== COMPLETION =====

    /// Retire lists whose fence value the GPU has reached
    ///
    /// Returns the number of lists retired. Frame pipelines reclaim their
    /// ring spans and allocator slots in fence order.
    pub fn poll_completions(&self) -> Result<usize> {
        let completed = self.fence.completed_value();
        let mut lists = self.command_lists.lock()?;
        let retired = lists.complete(completed);

        let mut first_error = None;
        for ticket in &retired {
            let result = ticket
                .pipeline
                .lock()
                .map_err(Error::from)
                .and_then(|mut pipeline| pipeline.on_frame_completed(ticket.frame_index));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(retired.len()),
        }
    }

    /// Block until the GPU reaches `value` (bounded by `fence_timeout`)
    pub fn wait_for_fence(&self, value: u64) -> Result<()> {
        self.fence.wait(value, self.config.fence_timeout).map_err(|e| {
            hal_error!("quasar::Device", "Waiting for fence value {} failed: {}", value, e);
            e
        })
    }

    /// Wait for all submitted work and retire every list
    pub fn wait_idle(&self) -> Result<()> {
        self.backend.wait_idle()?;
        let last = self.fence.last_signaled();
        if last > 0 {
            self.wait_for_fence(last)?;
        }
        self.poll_completions()?;
        Ok(())
    }

    pub fn completed_fence_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn last_fence_value(&self) -> u64 {
        self.fence.last_signaled()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            hal_warn!("quasar::Device", "wait_idle failed while dropping the device: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
