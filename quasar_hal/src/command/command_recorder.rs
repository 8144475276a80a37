//! Command recorder
//!
//! Records one command list per frame between [`CommandRecorder::begin`] and
//! [`CommandRecorder::finish`]. On top of plain command encoding the
//! recorder:
//!
//! - tracks resource states through a [`ResourceStateCache`] and emits the
//!   barriers each operation needs, batched per operation,
//! - serves buffer writes from its ring buffer (staged copy for dynamic
//!   buffers, rebinding at the new ring offset for volatile ones),
//! - elides redundant pipeline, layout and topology changes,
//! - returns every implicitly transitioned resource to its default state
//!   when the scope closes.
//!
//! Resources transitioned explicitly (`transition_buffer`,
//! `transition_texture`) must be transitioned back by the caller. One left
//! behind fails `finish()` and the list is discarded.

use std::any::Any;
use std::sync::{Arc, Mutex};

use bytemuck::Pod;
use glam::Vec4;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{
    BufferFootprint, BufferLocation, IndexBufferView, NativeBuffer, NativeCommandList, ResourceBarrier, VertexBufferView,
};
use crate::command::{CommandListId, FramePipeline, FrameTicket, Retained};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::memory::RingBuffer;
use crate::pipeline::{ComputePipelineState, PipelineState};
use crate::resource::{
    Buffer, RenderTarget, Resource, ResourceBindingInstance, ResourceBindingLayout, ResourceId, Texture,
    TextureRegion,
};
use crate::state::ResourceStateCache;
use crate::types::{
    BufferMode, BufferUsage, ClearFlags, IndexFormat, PipelineType, PrimitiveType, ResourceState,
    ScissorRect, Viewport, MAX_BINDING_SETS, MAX_VERTEX_BUFFERS, MAX_VOLATILE_CBUFFERS,
    TEXTURE_ROW_PITCH_ALIGNMENT,
};
use crate::{hal_bail, hal_debug, hal_error, hal_trace, hal_warn};

const SOURCE: &str = "quasar::CommandRecorder";

/// Buffer bound to a vertex buffer slot
#[derive(Debug, Clone)]
pub struct VertexBufferBinding {
    pub buffer: Arc<Buffer>,
    /// Byte offset of the first vertex
    pub offset: u64,
    pub stride: u32,
}

impl VertexBufferBinding {
    pub fn new(buffer: Arc<Buffer>, stride: u32) -> Self {
        Self { buffer, offset: 0, stride }
    }
}

fn reject(message: String) -> Error {
    hal_error!(SOURCE, "{}", message);
    Error::InvalidResource(message)
}

// ============================================================================
// PER-SCOPE CACHES
// ============================================================================

/// Bindings of one pipeline type
#[derive(Default)]
struct PipelineBindings {
    layout: Option<Arc<ResourceBindingLayout>>,
    instances: [Option<Arc<ResourceBindingInstance>>; MAX_BINDING_SETS],
    volatile_cbuffers: [Option<Arc<Buffer>>; MAX_VOLATILE_CBUFFERS],
}

/// Everything the recorder remembers for redundant-state elision
///
/// Reset at every `begin()` so each list re-establishes its own bindings.
#[derive(Default)]
struct ScopeCache {
    vertex_buffers: Vec<VertexBufferBinding>,
    /// Vertex buffers set but not emitted yet (unwritten volatile slot)
    vertex_buffers_dirty: bool,
    index_buffer: Option<(Arc<Buffer>, IndexFormat)>,
    graphics: PipelineBindings,
    compute: PipelineBindings,
    pipeline: Option<Arc<PipelineState>>,
    applied_pipeline: Option<u64>,
    compute_pipeline: Option<Arc<ComputePipelineState>>,
    applied_compute_pipeline: Option<u64>,
    topology: Option<PrimitiveType>,
    render_target: Option<Arc<RenderTarget>>,
    /// Ring offset of the latest write of each volatile buffer
    volatile_locations: FxHashMap<ResourceId, u64>,
    debug_depth: u32,
}

impl ScopeCache {
    fn bindings(&mut self, pipeline_type: PipelineType) -> &mut PipelineBindings {
        match pipeline_type {
            PipelineType::Graphics => &mut self.graphics,
            PipelineType::Compute => &mut self.compute,
        }
    }

    fn bindings_ref(&self, pipeline_type: PipelineType) -> &PipelineBindings {
        match pipeline_type {
            PipelineType::Graphics => &self.graphics,
            PipelineType::Compute => &self.compute,
        }
    }
}

struct Recording {
    id: CommandListId,
    native: Box<dyn NativeCommandList>,
    retained: Vec<Retained>,
    retained_keys: FxHashSet<usize>,
}

// ============================================================================
// RECORDER
// ============================================================================

pub struct CommandRecorder {
    device: Arc<Device>,
    frames: Arc<Mutex<FramePipeline>>,
    ring_buffer: Arc<dyn NativeBuffer>,
    frame_index: u64,
    recording: Option<Recording>,
    state_cache: ResourceStateCache,
    /// Subresources explicitly moved away from their default state
    explicit: FxHashSet<(ResourceId, u32)>,
    barriers: Vec<ResourceBarrier>,
    scope: ScopeCache,
}

impl CommandRecorder {
    /// Create a recorder with its own ring buffer and allocator slots
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        let config = device.config();
        let frames = FramePipeline::new(
            device.backend().as_ref(),
            device.queue(),
            config.frames_in_flight,
            config.ring_buffer_size,
        )?;
        let ring_buffer = frames.ring().native_buffer().clone();

        Ok(Self {
            device: device.clone(),
            frames: Arc::new(Mutex::new(frames)),
            ring_buffer,
            frame_index: 0,
            recording: None,
            state_cache: ResourceStateCache::new(),
            explicit: FxHashSet::default(),
            barriers: Vec::new(),
            scope: ScopeCache::default(),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Index of the frame recorded next (or being recorded)
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Id of the list being recorded
    pub fn current_list(&self) -> Option<CommandListId> {
        self.recording.as_ref().map(|r| r.id)
    }

    /// Ring offset a volatile buffer was last written to in this scope
    pub fn volatile_offset(&self, buffer: &Buffer) -> Option<u64> {
        self.scope.volatile_locations.get(&buffer.id()).copied()
    }

    /// Bytes of the ring buffer not yet reclaimed
    pub fn ring_used(&self) -> Result<u64> {
        Ok(self.frames.lock()?.ring().used())
    }

    // ===== SCOPE =====

    /// Open the list of the next frame
    ///
    /// Blocks until the GPU is done with the frame that last used the same
    /// allocator slot.
    ///
    /// # Errors
    ///
    /// `InvalidState` if already recording or if the slot still belongs to
    /// a frame that was never submitted nor discarded. `Timeout` if the
    /// slot's fence does not complete within `fence_timeout`.
    pub fn begin(&mut self) -> Result<()> {
        if let Some(recording) = &self.recording {
            hal_bail!(SOURCE, "begin() called while list {:?} is still recording", recording.id);
        }

        let frame_index = self.frame_index;
        self.wait_for_slot(frame_index)?;

        let native = self.frames.lock()?.begin_frame(frame_index)?;
        let ticket = FrameTicket {
            pipeline: self.frames.clone(),
            frame_index,
        };
        let id = match self.device.register_command_list(ticket) {
            Ok(id) => id,
            Err(e) => {
                if let Ok(mut frames) = self.frames.lock() {
                    frames.cancel_frame(frame_index);
                }
                return Err(e);
            }
        };

        self.state_cache.on_begin();
        self.explicit.clear();
        self.barriers.clear();
        self.scope = ScopeCache::default();
        self.recording = Some(Recording {
            id,
            native,
            retained: Vec::new(),
            retained_keys: FxHashSet::default(),
        });

        hal_trace!(SOURCE, "Frame {} recording into list {:?}", frame_index, id);
        Ok(())
    }

    fn wait_for_slot(&self, frame_index: u64) -> Result<()> {
        let pending = {
            let frames = self.frames.lock()?;
            frames.pending(frames.slot_for(frame_index))
        };
        let Some((previous, fence_value)) = pending else {
            return Ok(());
        };
        let Some(fence_value) = fence_value else {
            hal_bail!(
                SOURCE,
                "Frame {} was never submitted or discarded, its slot cannot host frame {}",
                previous, frame_index
            );
        };

        hal_debug!(
            SOURCE,
            "Frame {} waits for frame {} (fence value {})",
            frame_index, previous, fence_value
        );
        self.device.wait_for_fence(fence_value)?;
        self.device.poll_completions()?;

        let still_pending = {
            let frames = self.frames.lock()?;
            frames.pending(frames.slot_for(frame_index))
        };
        if let Some((previous, _)) = still_pending {
            hal_bail!(SOURCE, "Slot of frame {} still busy after its fence completed", previous);
        }
        Ok(())
    }

    /// Close the scope and hand the sealed list to the device
    ///
    /// The list is `Recorded` afterwards and can be passed to
    /// [`Device::execute`] or [`Device::discard`].
    ///
    /// # Errors
    ///
    /// `InvalidState` when not recording or when a subresource was left
    /// outside its default state; the native close error when sealing
    /// fails. In both failure cases the list is discarded so the frame still
    /// completes in order.
    pub fn finish(&mut self) -> Result<CommandListId> {
        self.require_recording("finish")?;

        self.release_render_target();

        for (resource, subresource, _) in self.state_cache.non_default_entries() {
            if !self.explicit.contains(&(resource.id(), subresource)) {
                let default_state = resource.default_state();
                self.transition(&resource, subresource, default_state);
            }
        }
        self.flush_barriers();

        if self.scope.debug_depth > 0 {
            hal_warn!(SOURCE, "{} debug group(s) left open, closing them", self.scope.debug_depth);
            if let Some(recording) = self.recording.as_mut() {
                for _ in 0..self.scope.debug_depth {
                    recording.native.end_debug_group();
                }
            }
        }

        let final_states = self.state_cache.entries();
        let leaks = self.state_cache.on_finish();
        self.explicit.clear();

        let Some(mut recording) = self.recording.take() else {
            hal_bail!(SOURCE, "finish() lost its recording");
        };
        let sealed = recording.native.close();

        let frame_index = self.frame_index;
        self.frame_index += 1;
        self.scope = ScopeCache::default();
        self.frames.lock()?.finish_frame(frame_index);

        let id = recording.id;
        self.device
            .mark_recorded(id, recording.native, final_states, recording.retained)?;

        let failure = match sealed {
            Err(e) => Some(e),
            Ok(()) if !leaks.is_empty() => Some(Error::InvalidState(format!(
                "{} subresource(s) left outside their default state",
                leaks.len()
            ))),
            Ok(()) => None,
        };
        if let Some(error) = failure {
            hal_error!(SOURCE, "Frame {} failed to finish, discarding list {:?}: {}", frame_index, id, error);
            if let Err(e) = self.device.discard(id) {
                hal_error!(SOURCE, "Discarding list {:?} failed: {}", id, e);
            }
            return Err(error);
        }

        hal_trace!(SOURCE, "Frame {} recorded as list {:?}", frame_index, id);
        Ok(id)
    }

    // ===== INTERNAL HELPERS =====

    fn require_recording(&self, operation: &str) -> Result<()> {
        if self.recording.is_none() {
            hal_bail!(SOURCE, "{}() called outside a recording scope", operation);
        }
        Ok(())
    }

    fn encoder(&mut self) -> Result<&mut dyn NativeCommandList> {
        match self.recording.as_mut() {
            Some(recording) => Ok(recording.native.as_mut()),
            None => hal_bail!(SOURCE, "No command list is recording"),
        }
    }

    /// Keep `object` alive until the list has executed
    fn retain<T: Any + Send + Sync>(&mut self, object: &Arc<T>) {
        if let Some(recording) = self.recording.as_mut() {
            let key = Arc::as_ptr(object) as *const () as usize;
            if recording.retained_keys.insert(key) {
                recording.retained.push(object.clone() as Retained);
            }
        }
    }

    /// Move a subresource to `state`, queueing a barrier when needed
    ///
    /// Returns the state before the call. Storage-less (volatile) buffers
    /// are not tracked.
    fn transition(&mut self, resource: &Arc<dyn Resource>, subresource: u32, state: ResourceState) -> ResourceState {
        let Some(native) = resource.native_resource() else {
            return resource.default_state();
        };

        let current = self.state_cache.get_state(resource, subresource);
        if current.satisfies(state) {
            return current;
        }

        self.state_cache.set_state(resource, subresource, state);
        self.barriers.push(ResourceBarrier {
            resource_id: resource.id(),
            resource: native,
            subresource,
            before: current,
            after: state,
        });
        current
    }

    fn transition_explicit(&mut self, resource: &Arc<dyn Resource>, subresource: u32, state: ResourceState) {
        self.transition(resource, subresource, state);
        let key = (resource.id(), subresource);
        if state == resource.default_state() {
            self.explicit.remove(&key);
        } else {
            self.explicit.insert(key);
        }
    }

    fn flush_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }
        if let Some(recording) = self.recording.as_mut() {
            recording.native.resource_barriers(&self.barriers);
        }
        self.barriers.clear();
    }

    /// Reserve `size` bytes of the ring buffer and let `fill` write them
    fn stage(&self, size: u64, fill: impl FnOnce(&mut RingBuffer, u64) -> Result<()>) -> Result<u64> {
        let mut frames = self.frames.lock()?;
        let ring = frames.ring_mut();
        let ring_offset = ring.allocate(size).ok_or_else(|| {
            let message = format!(
                "ring buffer cannot fit {} bytes ({} of {} used)",
                size,
                ring.used(),
                ring.capacity()
            );
            hal_error!(SOURCE, "{}", message);
            Error::ResourceExhausted(message)
        })?;
        fill(ring, ring_offset)?;
        Ok(ring_offset)
    }

    /// Where a buffer's content currently lives (`None` for an unwritten volatile buffer)
    fn buffer_location(&self, buffer: &Buffer, offset: u64) -> Option<BufferLocation> {
        let size = buffer.size().saturating_sub(offset);
        match buffer.native() {
            Some(native) => Some(BufferLocation {
                buffer: native.clone(),
                offset,
                size,
            }),
            None => self
                .scope
                .volatile_locations
                .get(&buffer.id())
                .map(|ring_offset| BufferLocation {
                    buffer: self.ring_buffer.clone(),
                    offset: ring_offset + offset,
                    size,
                }),
        }
    }

    // ===== EXPLICIT TRANSITIONS =====

    /// Move a buffer to `state`; it must be moved back before `finish()`
    pub fn transition_buffer(&mut self, buffer: &Arc<Buffer>, state: ResourceState) -> Result<()> {
        self.require_recording("transition_buffer")?;
        if buffer.mode() == BufferMode::Volatile {
            return Err(reject("volatile buffers have no state to transition".to_string()));
        }

        let resource: Arc<dyn Resource> = buffer.clone();
        self.transition_explicit(&resource, 0, state);
        self.flush_barriers();
        self.retain(buffer);
        Ok(())
    }

    /// Move one subresource (or all with `None`) of a texture to `state`
    pub fn transition_texture(
        &mut self,
        texture: &Arc<Texture>,
        subresource: Option<u32>,
        state: ResourceState,
    ) -> Result<()> {
        self.require_recording("transition_texture")?;
        let count = texture.subresource_count();
        let subresources = match subresource {
            Some(sub) if sub >= count => {
                return Err(reject(format!(
                    "subresource {} out of range ({} subresources)",
                    sub, count
                )));
            }
            Some(sub) => sub..sub + 1,
            None => 0..count,
        };

        let resource: Arc<dyn Resource> = texture.clone();
        for sub in subresources {
            self.transition_explicit(&resource, sub, state);
        }
        self.flush_barriers();
        self.retain(texture);
        Ok(())
    }

    // ===== BUFFER WRITES AND COPIES =====

    /// Write `data` into `buffer` at `offset` through the ring buffer
    ///
    /// Dynamic buffers get a staged copy wrapped in COPY_DEST transitions.
    /// Volatile buffers must be written whole; every slot they are bound to
    /// is rebound at the new ring offset.
    ///
    /// # Errors
    ///
    /// `InvalidResource` for static/readback buffers or an out-of-range
    /// region, `ResourceExhausted` when the ring buffer is full.
    pub fn write_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, data: &[u8]) -> Result<()> {
        self.require_recording("write_buffer")?;
        if data.is_empty() {
            return Err(reject("empty buffer write".to_string()));
        }

        let size = data.len() as u64;
        match buffer.mode() {
            BufferMode::Volatile if offset != 0 || size != buffer.size() => {
                return Err(reject(format!(
                    "volatile buffers are written whole ({} bytes at {}, buffer is {} bytes)",
                    size,
                    offset,
                    buffer.size()
                )));
            }
            BufferMode::Dynamic if offset + size > buffer.size() => {
                return Err(reject(format!(
                    "write of {} bytes at {} exceeds buffer size {}",
                    size,
                    offset,
                    buffer.size()
                )));
            }
            BufferMode::Static | BufferMode::Readback => {
                return Err(reject(format!("{:?} buffers cannot be written", buffer.mode())));
            }
            _ => {}
        }

        let ring_offset = self.stage(size, |ring, ring_offset| ring.write(ring_offset, data))?;

        if buffer.mode() == BufferMode::Volatile {
            self.scope.volatile_locations.insert(buffer.id(), ring_offset);
            self.rebind_volatile(buffer);
        } else {
            let dest = buffer
                .native()
                .cloned()
                .ok_or_else(|| reject("dynamic buffer has no storage".to_string()))?;
            let resource: Arc<dyn Resource> = buffer.clone();
            let previous = self.transition(&resource, 0, ResourceState::COPY_DEST);
            self.flush_barriers();

            let ring = self.ring_buffer.clone();
            self.encoder()?.copy_buffer_region(&dest, offset, &ring, ring_offset, size);

            self.transition(&resource, 0, previous);
            self.flush_barriers();
        }

        self.retain(buffer);
        Ok(())
    }

    /// [`write_buffer`](Self::write_buffer) for plain-old-data slices
    pub fn write_buffer_pod<T: Pod>(&mut self, buffer: &Arc<Buffer>, offset: u64, data: &[T]) -> Result<()> {
        self.write_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    /// Rebind every slot holding `buffer` at its new ring location
    fn rebind_volatile(&mut self, buffer: &Buffer) {
        let id = buffer.id();
        for pipeline_type in [PipelineType::Graphics, PipelineType::Compute] {
            let slots: Vec<u32> = self
                .scope
                .bindings_ref(pipeline_type)
                .volatile_cbuffers
                .iter()
                .enumerate()
                .filter(|(_, bound)| bound.as_ref().is_some_and(|b| b.id() == id))
                .map(|(slot, _)| slot as u32)
                .collect();
            for slot in slots {
                self.emit_volatile_cbuffers(pipeline_type, Some(slot));
            }
        }

        if self.scope.vertex_buffers.iter().any(|b| b.buffer.id() == id) {
            self.emit_vertex_buffers();
        }
    }

    /// Copy `size` bytes between buffers with storage
    ///
    /// Both buffers stay in their copy states until `finish()` restores them.
    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        dest: &Arc<Buffer>,
        size: u64,
        src_offset: u64,
        dest_offset: u64,
    ) -> Result<()> {
        self.require_recording("copy_buffer")?;
        if size == 0 {
            return Err(reject("zero-sized buffer copy".to_string()));
        }
        if Arc::ptr_eq(src, dest) {
            return Err(reject("buffer copy source and destination are the same buffer".to_string()));
        }
        let (Some(src_native), Some(dest_native)) = (src.native().cloned(), dest.native().cloned()) else {
            return Err(reject("volatile buffers cannot take part in copies".to_string()));
        };
        if dest.mode() == BufferMode::Static {
            return Err(reject("static buffers cannot be copied into".to_string()));
        }
        if src_offset + size > src.size() || dest_offset + size > dest.size() {
            return Err(reject(format!(
                "copy of {} bytes ({} -> {}) out of bounds ({} / {} bytes)",
                size,
                src_offset,
                dest_offset,
                src.size(),
                dest.size()
            )));
        }

        let src_resource: Arc<dyn Resource> = src.clone();
        let dest_resource: Arc<dyn Resource> = dest.clone();
        self.transition(&src_resource, 0, ResourceState::COPY_SOURCE);
        self.transition(&dest_resource, 0, ResourceState::COPY_DEST);
        self.flush_barriers();

        self.encoder()?
            .copy_buffer_region(&dest_native, dest_offset, &src_native, src_offset, size);
        self.retain(src);
        self.retain(dest);
        Ok(())
    }

    /// Copy every subresource of `src` into `dest`
    pub fn copy_texture(&mut self, src: &Arc<Texture>, dest: &Arc<Texture>) -> Result<()> {
        self.require_recording("copy_texture")?;
        if Arc::ptr_eq(src, dest) {
            return Err(reject("texture copy source and destination are the same texture".to_string()));
        }
        let (a, b) = (src.desc(), dest.desc());
        if (a.width, a.height, a.format, a.mip_levels, a.array_layers, a.sample_count)
            != (b.width, b.height, b.format, b.mip_levels, b.array_layers, b.sample_count)
        {
            return Err(reject(format!(
                "texture copy between {}x{} {:?} and {}x{} {:?}",
                a.width, a.height, a.format, b.width, b.height, b.format
            )));
        }

        let src_resource: Arc<dyn Resource> = src.clone();
        let dest_resource: Arc<dyn Resource> = dest.clone();
        let count = src.subresource_count();
        let mut previous = Vec::with_capacity(count as usize * 2);
        for sub in 0..count {
            previous.push((src_resource.clone(), sub, self.transition(&src_resource, sub, ResourceState::COPY_SOURCE)));
            previous.push((dest_resource.clone(), sub, self.transition(&dest_resource, sub, ResourceState::COPY_DEST)));
        }
        self.flush_barriers();

        self.encoder()?.copy_texture(dest.native(), src.native());

        for (resource, sub, state) in previous {
            self.transition(&resource, sub, state);
        }
        self.flush_barriers();
        self.retain(src);
        self.retain(dest);
        Ok(())
    }

    // ===== TEXTURE UPLOADS AND READBACKS =====

    /// Region of a buffer <-> texture copy, whole mip 0 / layer 0 by default
    fn copy_region(texture: &Texture, region: Option<&TextureRegion>) -> Result<TextureRegion> {
        let region = region.copied().unwrap_or_else(|| texture.full_region());
        let format = texture.desc().format;
        if format.is_depth() || TEXTURE_ROW_PITCH_ALIGNMENT % format.size_in_bytes() as u64 != 0 {
            return Err(reject(format!("{:?} textures cannot be copied through buffers", format)));
        }
        if texture.desc().sample_count > 1 {
            return Err(reject("multisampled textures cannot be copied through buffers".to_string()));
        }
        if let Err(e) = texture.validate_region(&region) {
            hal_error!(SOURCE, "{}", e);
            return Err(e);
        }
        Ok(region)
    }

    /// Upload `data` into one region of `texture` through the ring buffer
    ///
    /// `region` defaults to the whole mip 0 of layer 0. `row_stride` is the
    /// byte distance between rows in `data`, 0 for tightly packed rows.
    /// The subresource is moved to COPY_DEST for the copy and back to its
    /// previous state afterwards.
    ///
    /// # Errors
    ///
    /// `InvalidResource` for a region outside the texture, a depth or
    /// multisampled texture, a row stride shorter than one row or `data`
    /// too short for the region. `ResourceExhausted` when the ring buffer
    /// is full.
    pub fn write_texture(
        &mut self,
        texture: &Arc<Texture>,
        data: &[u8],
        region: Option<&TextureRegion>,
        row_stride: u32,
    ) -> Result<()> {
        self.require_recording("write_texture")?;
        let region = Self::copy_region(texture, region)?;

        let format = texture.desc().format;
        let row_size = region.row_size(format);
        let stride = match row_stride as u64 {
            0 => row_size,
            stride if stride < row_size => {
                return Err(reject(format!("row stride {} is shorter than a row ({} bytes)", stride, row_size)));
            }
            stride => stride,
        };
        let rows = region.height as u64;
        let needed = stride * (rows - 1) + row_size;
        if (data.len() as u64) < needed {
            return Err(reject(format!(
                "{} bytes of texel data for a region needing {}",
                data.len(),
                needed
            )));
        }

        let row_pitch = region.row_pitch(format);
        let ring_offset = self.stage(row_pitch * rows, |ring, ring_offset| {
            for row in 0..rows {
                let start = (row * stride) as usize;
                ring.write(ring_offset + row * row_pitch, &data[start..start + row_size as usize])?;
            }
            Ok(())
        })?;

        let resource: Arc<dyn Resource> = texture.clone();
        let subresource = texture.subresource_index(region.mip, region.layer);
        let previous = self.transition(&resource, subresource, ResourceState::COPY_DEST);
        self.flush_barriers();

        let footprint = BufferFootprint {
            buffer: self.ring_buffer.clone(),
            offset: ring_offset,
            row_pitch,
            format,
        };
        self.encoder()?
            .copy_buffer_to_texture(texture.native(), &region, &footprint);

        self.transition(&resource, subresource, previous);
        self.flush_barriers();
        self.retain(texture);
        Ok(())
    }

    /// Copy one region of `src` into `dest` starting at `buffer_offset`
    ///
    /// Rows land [`TextureRegion::row_pitch`] bytes apart. Both resources
    /// stay in their copy states until `finish()` restores them.
    ///
    /// # Errors
    ///
    /// `InvalidResource` for a region outside the texture, a volatile or
    /// static destination, a misaligned offset or a destination too small
    /// for the region.
    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Arc<Texture>,
        dest: &Arc<Buffer>,
        region: Option<&TextureRegion>,
        buffer_offset: u64,
    ) -> Result<()> {
        self.require_recording("copy_texture_to_buffer")?;
        let region = Self::copy_region(src, region)?;

        let Some(dest_native) = dest.native().cloned() else {
            return Err(reject("volatile buffers cannot receive texture copies".to_string()));
        };
        if dest.mode() == BufferMode::Static {
            return Err(reject("static buffers cannot be copied into".to_string()));
        }

        let format = src.desc().format;
        let texel = (format.size_in_bytes() as u64).max(4);
        if buffer_offset % texel != 0 {
            return Err(reject(format!("buffer offset {} is not a multiple of {}", buffer_offset, texel)));
        }
        let end = buffer_offset.checked_add(region.buffer_size(format));
        if end.map_or(true, |end| end > dest.size()) {
            return Err(reject(format!(
                "{}x{} region at offset {} does not fit a {} byte buffer",
                region.width,
                region.height,
                buffer_offset,
                dest.size()
            )));
        }

        let src_resource: Arc<dyn Resource> = src.clone();
        let dest_resource: Arc<dyn Resource> = dest.clone();
        let subresource = src.subresource_index(region.mip, region.layer);
        self.transition(&src_resource, subresource, ResourceState::COPY_SOURCE);
        self.transition(&dest_resource, 0, ResourceState::COPY_DEST);
        self.flush_barriers();

        let footprint = BufferFootprint {
            buffer: dest_native,
            offset: buffer_offset,
            row_pitch: region.row_pitch(format),
            format,
        };
        self.encoder()?.copy_texture_to_buffer(&footprint, src.native(), &region);
        self.retain(src);
        self.retain(dest);
        Ok(())
    }

    // ===== INPUT ASSEMBLY =====

    /// Bind vertex buffers to slots `0..bindings.len()`
    ///
    /// Volatile buffers not yet written in this scope are emitted by their
    /// first write.
    pub fn set_vertex_buffers(&mut self, bindings: &[VertexBufferBinding]) -> Result<()> {
        self.require_recording("set_vertex_buffers")?;
        if bindings.len() > MAX_VERTEX_BUFFERS {
            return Err(reject(format!(
                "{} vertex buffers (max {})",
                bindings.len(),
                MAX_VERTEX_BUFFERS
            )));
        }
        for binding in bindings {
            let buffer = &binding.buffer;
            if !buffer.usage().contains(BufferUsage::VERTEX) || buffer.mode() == BufferMode::Readback {
                return Err(reject("buffer is not usable as a vertex buffer".to_string()));
            }
            if binding.offset >= buffer.size() {
                return Err(reject(format!(
                    "vertex buffer offset {} past buffer size {}",
                    binding.offset,
                    buffer.size()
                )));
            }
        }

        for binding in bindings {
            let resource: Arc<dyn Resource> = binding.buffer.clone();
            self.transition(&resource, 0, ResourceState::VERTEX_AND_CONSTANT_BUFFER);
            self.retain(&binding.buffer);
        }
        self.flush_barriers();

        self.scope.vertex_buffers = bindings.to_vec();
        self.scope.vertex_buffers_dirty = true;
        self.emit_vertex_buffers();
        Ok(())
    }

    fn emit_vertex_buffers(&mut self) {
        let mut views = Vec::with_capacity(self.scope.vertex_buffers.len());
        for binding in &self.scope.vertex_buffers {
            match self.buffer_location(&binding.buffer, binding.offset) {
                Some(location) => views.push(VertexBufferView {
                    location,
                    stride: binding.stride,
                }),
                None => return,
            }
        }
        if let Some(recording) = self.recording.as_mut() {
            recording.native.set_vertex_buffers(&views);
        }
        self.scope.vertex_buffers_dirty = false;
    }

    pub fn set_index_buffer(&mut self, buffer: &Arc<Buffer>, format: IndexFormat) -> Result<()> {
        self.require_recording("set_index_buffer")?;
        if buffer.mode() == BufferMode::Volatile {
            return Err(reject("volatile buffers cannot be used as index buffers".to_string()));
        }
        if !buffer.usage().contains(BufferUsage::INDEX) || buffer.mode() == BufferMode::Readback {
            return Err(reject("buffer is not usable as an index buffer".to_string()));
        }
        if let Some((current, current_format)) = &self.scope.index_buffer {
            if Arc::ptr_eq(current, buffer) && *current_format == format {
                return Ok(());
            }
        }

        let resource: Arc<dyn Resource> = buffer.clone();
        self.transition(&resource, 0, ResourceState::INDEX_BUFFER);
        self.flush_barriers();

        let location = self
            .buffer_location(buffer, 0)
            .ok_or_else(|| reject("index buffer has no storage".to_string()))?;
        self.encoder()?
            .set_index_buffer(&IndexBufferView { location, format });
        self.scope.index_buffer = Some((buffer.clone(), format));
        self.retain(buffer);
        Ok(())
    }

    // ===== RESOURCE BINDING =====

    /// Bind a layout; sets and volatile constant buffers already bound are re-emitted
    pub fn set_resource_binding_layout(
        &mut self,
        pipeline_type: PipelineType,
        layout: &Arc<ResourceBindingLayout>,
    ) -> Result<()> {
        self.require_recording("set_resource_binding_layout")?;
        self.apply_layout(pipeline_type, layout)
    }

    fn apply_layout(&mut self, pipeline_type: PipelineType, layout: &Arc<ResourceBindingLayout>) -> Result<()> {
        let bindings = self.scope.bindings(pipeline_type);
        if bindings.layout.as_ref().is_some_and(|l| l.id() == layout.id()) {
            return Ok(());
        }
        bindings.layout = Some(layout.clone());

        // Instances of sets the new layout does not have at their slot are dropped
        for (slot, instance) in bindings.instances.iter_mut().enumerate() {
            let matches = instance.as_ref().is_some_and(|i| {
                layout.sets().get(slot).is_some_and(|set| set.id() == i.set().id())
            });
            if !matches {
                *instance = None;
            }
        }
        let instances: Vec<(u32, Arc<ResourceBindingInstance>)> = bindings
            .instances
            .iter()
            .enumerate()
            .filter_map(|(slot, i)| i.clone().map(|i| (slot as u32, i)))
            .collect();

        let encoder = self.encoder()?;
        encoder.set_binding_layout(pipeline_type, layout.native());
        for (slot, instance) in &instances {
            encoder.set_binding_instance(pipeline_type, *slot, instance.native());
        }
        self.emit_volatile_cbuffers(pipeline_type, None);
        self.retain(layout);
        Ok(())
    }

    /// Bind a resource binding instance to set `slot`
    ///
    /// The instance's resources are transitioned to the states their
    /// bindings require.
    pub fn bind_resources(
        &mut self,
        pipeline_type: PipelineType,
        slot: u32,
        instance: &Arc<ResourceBindingInstance>,
    ) -> Result<()> {
        self.require_recording("bind_resources")?;
        if slot as usize >= MAX_BINDING_SETS {
            return Err(reject(format!("binding set slot {} out of range", slot)));
        }

        let layout = self.scope.bindings_ref(pipeline_type).layout.clone();
        if let Some(layout) = &layout {
            match layout.sets().get(slot as usize) {
                None => {
                    return Err(reject(format!(
                        "binding layout has {} set(s), cannot bind slot {}",
                        layout.set_count(),
                        slot
                    )));
                }
                Some(set) if set.id() != instance.set().id() => {
                    return Err(reject(format!(
                        "instance of set {} bound to slot {} expecting set {}",
                        instance.set().id(),
                        slot,
                        set.id()
                    )));
                }
                Some(_) => {}
            }
        }

        self.transition_bound(instance);

        let bindings = self.scope.bindings(pipeline_type);
        let unchanged = bindings.instances[slot as usize]
            .as_ref()
            .is_some_and(|i| Arc::ptr_eq(i, instance));
        bindings.instances[slot as usize] = Some(instance.clone());

        if layout.is_some() && !unchanged {
            self.encoder()?
                .set_binding_instance(pipeline_type, slot, instance.native());
        }
        self.retain(instance);
        Ok(())
    }

    fn transition_bound(&mut self, instance: &ResourceBindingInstance) {
        for bound in instance.bound_resources() {
            for subresource in &bound.subresources {
                self.transition(&bound.resource, *subresource, bound.required_state);
            }
        }
        self.flush_barriers();
    }

    /// Bind a constant buffer directly to a volatile slot of the layout
    ///
    /// Volatile buffers are bound at their ring location, which moves with
    /// every write.
    pub fn bind_volatile_cbuffer(&mut self, pipeline_type: PipelineType, slot: u32, buffer: &Arc<Buffer>) -> Result<()> {
        self.require_recording("bind_volatile_cbuffer")?;
        if slot as usize >= MAX_VOLATILE_CBUFFERS {
            return Err(reject(format!("volatile constant buffer slot {} out of range", slot)));
        }
        if !buffer.usage().contains(BufferUsage::CONSTANT) || buffer.mode() == BufferMode::Readback {
            return Err(reject("buffer is not usable as a constant buffer".to_string()));
        }
        if let Some(layout) = &self.scope.bindings_ref(pipeline_type).layout {
            if !layout.has_volatile_slot(slot) {
                return Err(reject(format!("binding layout declares no volatile slot {}", slot)));
            }
        }

        let resource: Arc<dyn Resource> = buffer.clone();
        self.transition(&resource, 0, ResourceState::VERTEX_AND_CONSTANT_BUFFER);
        self.flush_barriers();

        self.scope.bindings(pipeline_type).volatile_cbuffers[slot as usize] = Some(buffer.clone());
        self.emit_volatile_cbuffers(pipeline_type, Some(slot));
        self.retain(buffer);
        Ok(())
    }

    /// Emit the bound volatile constant buffers (all, or only `only`)
    fn emit_volatile_cbuffers(&mut self, pipeline_type: PipelineType, only: Option<u32>) {
        let bindings = self.scope.bindings_ref(pipeline_type);
        let Some(layout) = bindings.layout.clone() else {
            return;
        };

        let mut commands = Vec::new();
        for (slot, buffer) in bindings.volatile_cbuffers.iter().enumerate() {
            let slot = slot as u32;
            if only.is_some_and(|s| s != slot) || !layout.has_volatile_slot(slot) {
                continue;
            }
            let Some(buffer) = buffer else {
                continue;
            };
            if let Some(location) = self.buffer_location(buffer, 0) {
                commands.push((layout.root_index(slot), location));
            }
        }

        if let Some(recording) = self.recording.as_mut() {
            for (root_index, location) in &commands {
                recording.native.set_constant_buffer(pipeline_type, *root_index, location);
            }
        }
    }

    // ===== RENDER TARGETS =====

    /// Bind a render target (`None` unbinds)
    ///
    /// Color attachments move to RENDER_TARGET and depth to DEPTH_WRITE.
    /// The previous target returns to its default state. Viewport and
    /// scissors are reset to cover the new target.
    pub fn set_render_target(&mut self, target: Option<&Arc<RenderTarget>>) -> Result<()> {
        self.require_recording("set_render_target")?;
        let unchanged = match (&self.scope.render_target, target) {
            (Some(current), Some(target)) => current.id() == target.id(),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        self.release_render_target();
        let Some(target) = target else {
            return Ok(());
        };

        for (resource, subresource) in target.color_subresources() {
            self.transition(&resource, subresource, ResourceState::RENDER_TARGET);
        }
        if let Some((resource, subresource)) = target.depth_subresource() {
            self.transition(&resource, subresource, ResourceState::DEPTH_WRITE);
        }
        self.flush_barriers();

        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: target.width() as f32,
            height: target.height() as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissors = ScissorRect {
            left: 0,
            top: 0,
            right: target.width() as i32,
            bottom: target.height() as i32,
        };

        let encoder = self.encoder()?;
        encoder.set_render_targets(Some(target.binding()));
        encoder.set_viewport(&viewport);
        encoder.set_scissors(&scissors);

        self.scope.render_target = Some(target.clone());
        self.retain(target);
        Ok(())
    }

    /// Unbind the current target and return its attachments to default
    fn release_render_target(&mut self) {
        let Some(target) = self.scope.render_target.take() else {
            return;
        };
        if let Some(recording) = self.recording.as_mut() {
            recording.native.set_render_targets(None);
        }
        for (resource, subresource) in target.color_subresources().into_iter().chain(target.depth_subresource()) {
            let default_state = resource.default_state();
            self.transition(&resource, subresource, default_state);
        }
        self.flush_barriers();
    }

    /// Clear the bound render target
    ///
    /// Color attachment `i` is cleared to `colors[i]`, or to the last color
    /// given when fewer colors than attachments are passed.
    pub fn clear(&mut self, flags: ClearFlags, colors: &[Vec4], depth: f32, stencil: u8) -> Result<()> {
        self.require_recording("clear")?;
        let Some(target) = self.scope.render_target.clone() else {
            hal_bail!(SOURCE, "clear() needs a bound render target");
        };

        let depth_flags = flags & (ClearFlags::DEPTH | ClearFlags::STENCIL);
        if flags.contains(ClearFlags::COLOR) && (colors.is_empty() || target.colors().is_empty()) {
            return Err(reject("color clear needs clear colors and a color attachment".to_string()));
        }
        if !depth_flags.is_empty() && target.depth_handle().is_none() {
            return Err(reject("depth/stencil clear on a target without depth attachment".to_string()));
        }
        if depth_flags.contains(ClearFlags::STENCIL) && !target.depth_format().has_stencil() {
            return Err(reject(format!("{:?} has no stencil component", target.depth_format())));
        }

        let encoder = self.encoder()?;
        if flags.contains(ClearFlags::COLOR) {
            for index in 0..target.colors().len() {
                let color = colors[index.min(colors.len() - 1)];
                if let Some(handle) = target.color_handle(index) {
                    encoder.clear_render_target(handle, color.to_array());
                }
            }
        }
        if let Some(handle) = target.depth_handle().filter(|_| !depth_flags.is_empty()) {
            encoder.clear_depth_stencil(handle, depth_flags, depth, stencil);
        }
        Ok(())
    }

    // ===== FIXED FUNCTION =====

    pub fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        self.require_recording("set_viewport")?;
        self.encoder()?.set_viewport(viewport);
        Ok(())
    }

    pub fn set_scissors(&mut self, rect: &ScissorRect) -> Result<()> {
        self.require_recording("set_scissors")?;
        self.encoder()?.set_scissors(rect);
        Ok(())
    }

    pub fn set_stencil_ref(&mut self, reference: u8) -> Result<()> {
        self.require_recording("set_stencil_ref")?;
        self.encoder()?.set_stencil_ref(reference);
        Ok(())
    }

    // ===== PIPELINES =====

    /// Select the graphics pipeline for the next draws (applied lazily)
    pub fn set_pipeline_state(&mut self, pipeline: &Arc<PipelineState>) -> Result<()> {
        self.require_recording("set_pipeline_state")?;
        self.scope.pipeline = Some(pipeline.clone());
        self.retain(pipeline);
        Ok(())
    }

    /// Select the compute pipeline for the next dispatches (applied lazily)
    pub fn set_compute_pipeline_state(&mut self, pipeline: &Arc<ComputePipelineState>) -> Result<()> {
        self.require_recording("set_compute_pipeline_state")?;
        self.scope.compute_pipeline = Some(pipeline.clone());
        self.retain(pipeline);
        Ok(())
    }

    // ===== DRAW / DISPATCH =====

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.require_recording("draw")?;
        self.prepare_draw(false)?;
        self.encoder()?
            .draw(vertex_count, instance_count, first_vertex, first_instance);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_recording("draw_indexed")?;
        self.prepare_draw(true)?;
        self.encoder()?
            .draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_recording("dispatch")?;
        let Some(pipeline) = self.scope.compute_pipeline.clone() else {
            hal_bail!(SOURCE, "dispatch() without a compute pipeline state");
        };

        self.apply_layout(PipelineType::Compute, pipeline.binding_layout())?;
        self.validate_bindings(PipelineType::Compute)?;
        self.ensure_bound_states(PipelineType::Compute);

        if self.scope.applied_compute_pipeline != Some(pipeline.id()) {
            self.encoder()?
                .set_pipeline(PipelineType::Compute, pipeline.native());
            self.scope.applied_compute_pipeline = Some(pipeline.id());
        }
        self.encoder()?.dispatch(x, y, z);
        Ok(())
    }

    /// Validate the bound state and apply the pending pipeline
    fn prepare_draw(&mut self, indexed: bool) -> Result<()> {
        let Some(pipeline) = self.scope.pipeline.clone() else {
            hal_bail!(SOURCE, "Draw without a pipeline state");
        };
        let Some(target) = self.scope.render_target.clone() else {
            hal_bail!(SOURCE, "Draw without a render target");
        };

        let target_formats = target.pass_format_key();
        let pipeline_formats = pipeline.state().pass_format_key();
        if target_formats != pipeline_formats {
            hal_bail!(
                SOURCE,
                "Render target formats {:?} do not match pipeline formats {:?}",
                target_formats, pipeline_formats
            );
        }
        if indexed && self.scope.index_buffer.is_none() {
            hal_bail!(SOURCE, "draw_indexed() without an index buffer");
        }
        for binding in &pipeline.state().vertex_layout.bindings {
            let Some(vertex_buffer) = self.scope.vertex_buffers.get(binding.binding as usize) else {
                hal_bail!(SOURCE, "Vertex buffer slot {} is not bound", binding.binding);
            };
            if self.buffer_location(&vertex_buffer.buffer, 0).is_none() {
                hal_bail!(
                    SOURCE,
                    "Volatile vertex buffer in slot {} was not written in this scope",
                    binding.binding
                );
            }
        }

        self.apply_layout(PipelineType::Graphics, pipeline.binding_layout())?;
        self.validate_bindings(PipelineType::Graphics)?;
        self.ensure_bound_states(PipelineType::Graphics);
        if self.scope.vertex_buffers_dirty {
            self.emit_vertex_buffers();
        }

        if self.scope.applied_pipeline != Some(pipeline.id()) {
            self.encoder()?
                .set_pipeline(PipelineType::Graphics, pipeline.native());
            self.scope.applied_pipeline = Some(pipeline.id());
        }
        let topology = pipeline.primitive_type();
        if self.scope.topology != Some(topology) {
            self.encoder()?.set_primitive_topology(topology);
            self.scope.topology = Some(topology);
        }
        Ok(())
    }

    /// Every set of the layout has a complete instance and every volatile
    /// slot a constant buffer with content
    fn validate_bindings(&self, pipeline_type: PipelineType) -> Result<()> {
        let bindings = self.scope.bindings_ref(pipeline_type);
        let Some(layout) = &bindings.layout else {
            hal_bail!(SOURCE, "No {:?} binding layout bound", pipeline_type);
        };

        for slot in 0..layout.set_count() as usize {
            match &bindings.instances[slot] {
                None => hal_bail!(SOURCE, "{:?} set {} has no bound instance", pipeline_type, slot),
                Some(instance) if !instance.is_complete() => {
                    hal_bail!(SOURCE, "Instance bound to {:?} set {} is not fully written", pipeline_type, slot)
                }
                Some(_) => {}
            }
        }

        for cb in layout.volatile_cbuffers() {
            let Some(buffer) = &bindings.volatile_cbuffers[cb.slot as usize] else {
                hal_bail!(SOURCE, "{:?} volatile constant buffer slot {} is not bound", pipeline_type, cb.slot);
            };
            if self.buffer_location(buffer, 0).is_none() {
                hal_bail!(
                    SOURCE,
                    "Volatile constant buffer in {:?} slot {} was not written in this scope",
                    pipeline_type, cb.slot
                );
            }
        }
        Ok(())
    }

    /// Re-establish the states bound resources need (no-op unless something moved them)
    fn ensure_bound_states(&mut self, pipeline_type: PipelineType) {
        let bindings = self.scope.bindings_ref(pipeline_type);
        let instances: Vec<Arc<ResourceBindingInstance>> = bindings.instances.iter().flatten().cloned().collect();
        let mut buffers: Vec<(Arc<dyn Resource>, ResourceState)> = bindings
            .volatile_cbuffers
            .iter()
            .flatten()
            .map(|b| (b.clone() as Arc<dyn Resource>, ResourceState::VERTEX_AND_CONSTANT_BUFFER))
            .collect();

        if pipeline_type == PipelineType::Graphics {
            buffers.extend(
                self.scope
                    .vertex_buffers
                    .iter()
                    .map(|b| (b.buffer.clone() as Arc<dyn Resource>, ResourceState::VERTEX_AND_CONSTANT_BUFFER)),
            );
            if let Some((buffer, _)) = &self.scope.index_buffer {
                buffers.push((buffer.clone() as Arc<dyn Resource>, ResourceState::INDEX_BUFFER));
            }
        }

        for instance in &instances {
            for bound in instance.bound_resources() {
                for subresource in &bound.subresources {
                    self.transition(&bound.resource, *subresource, bound.required_state);
                }
            }
        }
        for (resource, state) in &buffers {
            self.transition(resource, 0, *state);
        }
        self.flush_barriers();
    }

    // ===== DEBUG LABELS =====

    pub fn begin_debug_group(&mut self, label: &str) -> Result<()> {
        self.require_recording("begin_debug_group")?;
        self.encoder()?.begin_debug_group(label);
        self.scope.debug_depth += 1;
        Ok(())
    }

    pub fn end_debug_group(&mut self) -> Result<()> {
        self.require_recording("end_debug_group")?;
        if self.scope.debug_depth == 0 {
            hal_bail!(SOURCE, "end_debug_group() without an open group");
        }
        self.encoder()?.end_debug_group();
        self.scope.debug_depth -= 1;
        Ok(())
    }

    pub fn insert_debug_marker(&mut self, label: &str) -> Result<()> {
        self.require_recording("insert_debug_marker")?;
        self.encoder()?.insert_debug_marker(label);
        Ok(())
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if self.recording.is_none() {
            return;
        }
        hal_warn!(SOURCE, "Recorder dropped while recording frame {}, discarding", self.frame_index);
        if let Ok(id) = self.finish() {
            if let Err(e) = self.device.discard(id) {
                hal_error!(SOURCE, "Discarding list {:?} failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "command_recorder_tests.rs"]
mod tests;
