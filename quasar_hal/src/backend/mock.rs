//! Mock backend for tests (no GPU required)
//!
//! Every native object carries a process-unique id so tests can tell
//! objects apart. Command lists record [`RecordedCommand`] values instead
//! of encoding anything. Submission executes buffer copies on the mock
//! buffers' CPU storage and signals the fence, but the "GPU" only reports
//! completion when the test calls [`MockBackend::complete_all`] or a fence
//! wait targets a signalled value.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::backend::{
    AttachmentView, BufferFootprint, BufferLocation, DescriptorHandle, DescriptorHeapType, DescriptorWrite,
    GraphicsBackend, IndexBufferView, NativeBindingInstance, NativeBindingLayout,
    NativeBindingSet, NativeBuffer, NativeCommandAllocator, NativeCommandList,
    NativeDescriptorHeap, NativeFence, NativePassFormat, NativePipeline, NativePipelineDesc,
    NativeShader, NativeTexture, RenderTargetBinding, ResourceBarrier,
    UploadHeap, VertexBufferView,
};
use crate::error::{Error, Result};
use crate::hal_err;
use crate::memory::DescriptorRange;
use crate::pipeline::{PassFormatKey, ShaderDesc};
use crate::resource::{
    BufferDesc, ResourceBindingSetDesc, ResourceId, TextureDesc, TextureRegion, VolatileCBufferBinding,
};
use crate::types::{
    ClearFlags, Format, IndexFormat, PipelineType, PrimitiveType, QueueType, ResourceState,
    ScissorRect, ShaderStage, Viewport, MAX_BINDING_SETS, MAX_VOLATILE_CBUFFERS,
};

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Id of a mock native object (0 if `object` is not a mock object)
pub fn object_id(object: &dyn Any) -> u64 {
    if let Some(o) = object.downcast_ref::<MockBuffer>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockTexture>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockDescriptorHeap>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockShader>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockBindingSet>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockBindingLayout>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockBindingInstance>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockPassFormat>() {
        return o.id;
    }
    if let Some(o) = object.downcast_ref::<MockPipeline>() {
        return o.id;
    }
    0
}

// ============================================================================
// Mock Buffer
// ============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    pub id: u64,
    pub size: u64,
    data: Arc<Mutex<Vec<u8>>>,
}

impl MockBuffer {
    pub fn new(size: u64) -> Self {
        Self {
            id: next_id(),
            size,
            data: Arc::new(Mutex::new(vec![0; size as usize])),
        }
    }

    /// Snapshot of the CPU-side storage
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn copy_from(&self, dest_offset: u64, src: &MockBuffer, src_offset: u64, size: u64) -> Result<()> {
        if dest_offset + size > self.size || src_offset + size > src.size {
            return Err(Error::InvalidResource(format!(
                "mock copy of {} bytes out of bounds ({}+{} -> {}+{})",
                size, src.size, src_offset, self.size, dest_offset
            )));
        }
        let bytes = {
            let src_data = src.data.lock().map_err(|_| Error::BackendError("poisoned mock buffer".to_string()))?;
            src_data[src_offset as usize..(src_offset + size) as usize].to_vec()
        };
        let mut dest_data = self.data.lock().map_err(|_| Error::BackendError("poisoned mock buffer".to_string()))?;
        dest_data[dest_offset as usize..(dest_offset + size) as usize].copy_from_slice(&bytes);
        Ok(())
    }
}

impl NativeBuffer for MockBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        if offset + out.len() as u64 > self.size {
            return Err(Error::InvalidResource(format!(
                "read of {} bytes at {} exceeds buffer size {}",
                out.len(), offset, self.size
            )));
        }
        let data = self.data.lock().map_err(|_| Error::BackendError("poisoned mock buffer".to_string()))?;
        out.copy_from_slice(&data[offset as usize..offset as usize + out.len()]);
        Ok(())
    }
}

// ============================================================================
// Mock Upload Heap
// ============================================================================

/// Upload heap whose storage tests can inspect
pub struct MockUploadHeap {
    buffer: Arc<dyn NativeBuffer>,
    data: Arc<Mutex<Vec<u8>>>,
    size: u64,
}

impl MockUploadHeap {
    pub fn new(size: u64) -> Self {
        let buffer = MockBuffer::new(size);
        let data = buffer.data.clone();
        Self {
            buffer: Arc::new(buffer),
            data,
            size,
        }
    }

    /// Shared handle to the heap storage
    pub fn contents(&self) -> Arc<Mutex<Vec<u8>>> {
        self.data.clone()
    }
}

impl UploadHeap for MockUploadHeap {
    fn size(&self) -> u64 {
        self.size
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::InvalidResource(format!(
                "upload heap write of {} bytes at {} exceeds size {}",
                data.len(), offset, self.size
            )));
        }
        let mut storage = self.data.lock().map_err(|_| Error::BackendError("poisoned upload heap".to_string()))?;
        storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn buffer(&self) -> &Arc<dyn NativeBuffer> {
        &self.buffer
    }
}

// ============================================================================
// Mock Texture / Heap / Shader
// ============================================================================

#[derive(Debug)]
pub struct MockTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub initial_state: ResourceState,
}

impl NativeTexture for MockTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MockDescriptorHeap {
    pub id: u64,
    pub heap_type: DescriptorHeapType,
    pub capacity: u32,
    /// Slot -> (texture id, format) of the attachment view written there
    views: Mutex<FxHashMap<u32, (u64, Format)>>,
}

impl MockDescriptorHeap {
    /// Attachment view stored in a slot
    pub fn view(&self, index: u32) -> Option<(u64, Format)> {
        self.views.lock().ok().and_then(|v| v.get(&index).copied())
    }

    pub fn view_count(&self) -> usize {
        self.views.lock().map(|v| v.len()).unwrap_or(0)
    }
}

impl NativeDescriptorHeap for MockDescriptorHeap {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[derive(Debug)]
pub struct MockShader {
    pub id: u64,
    pub stage: ShaderStage,
    pub entry_point: String,
}

impl NativeShader for MockShader {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn stage(&self) -> ShaderStage {
        self.stage
    }
}

// ============================================================================
// Mock Binding Objects
// ============================================================================

#[derive(Debug)]
pub struct MockBindingSet {
    pub id: u64,
    pub binding_count: u32,
}

impl NativeBindingSet for MockBindingSet {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MockBindingLayout {
    pub id: u64,
    pub set_count: usize,
    pub volatile_cbuffer_count: usize,
}

impl NativeBindingLayout for MockBindingLayout {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MockBindingInstance {
    pub id: u64,
    pub range: DescriptorRange,
    writes: Mutex<FxHashMap<u32, DescriptorWrite>>,
}

impl MockBindingInstance {
    /// Last descriptor written to `binding`
    pub fn written(&self, binding: u32) -> Option<DescriptorWrite> {
        self.writes.lock().ok().and_then(|w| w.get(&binding).cloned())
    }
}

impl NativeBindingInstance for MockBindingInstance {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock Pass Format / Pipeline
// ============================================================================

#[derive(Debug)]
pub struct MockPassFormat {
    pub id: u64,
    pub key: PassFormatKey,
}

impl NativePassFormat for MockPassFormat {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MockPipeline {
    pub id: u64,
    pub pipeline_type: PipelineType,
    /// Id of the pass format the pipeline was linked against (graphics only)
    pub pass_format: Option<u64>,
    pub stages: Vec<ShaderStage>,
}

impl NativePipeline for MockPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Recorded Commands
// ============================================================================

/// One encoded command, with native objects replaced by their mock ids
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Barrier {
        resource_id: ResourceId,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    },
    CopyBuffer {
        dest: u64,
        dest_offset: u64,
        src: u64,
        src_offset: u64,
        size: u64,
    },
    CopyTexture { dest: u64, src: u64 },
    CopyBufferToTexture {
        texture: u64,
        region: TextureRegion,
        buffer: u64,
        offset: u64,
        row_pitch: u64,
    },
    CopyTextureToBuffer {
        buffer: u64,
        offset: u64,
        row_pitch: u64,
        texture: u64,
        region: TextureRegion,
    },
    SetBindingLayout { pipeline_type: PipelineType, layout: u64 },
    SetBindingInstance {
        pipeline_type: PipelineType,
        set_index: u32,
        instance: u64,
    },
    SetConstantBuffer {
        pipeline_type: PipelineType,
        root_index: u32,
        buffer: u64,
        offset: u64,
        size: u64,
    },
    /// (buffer, offset, size, stride) per slot
    SetVertexBuffers(Vec<(u64, u64, u64, u32)>),
    SetIndexBuffer { buffer: u64, offset: u64, format: IndexFormat },
    SetPipeline { pipeline_type: PipelineType, pipeline: u64 },
    SetTopology(PrimitiveType),
    SetRenderTargets { colors: Vec<u32>, depth: Option<u32> },
    UnsetRenderTargets,
    ClearRenderTarget { index: u32, color: [f32; 4] },
    ClearDepthStencil { index: u32, flags: ClearFlags, depth: f32, stencil: u8 },
    SetViewport(Viewport),
    SetScissors(ScissorRect),
    SetStencilRef(u8),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    BeginDebugGroup(String),
    EndDebugGroup,
    DebugMarker(String),
}

impl RecordedCommand {
    pub fn is_barrier(&self) -> bool {
        matches!(self, RecordedCommand::Barrier { .. })
    }
}

/// Lists and signal value of one `submit` call
#[derive(Debug, Clone)]
pub struct Submission {
    pub fence_value: u64,
    pub lists: Vec<Vec<RecordedCommand>>,
}

// ============================================================================
// Mock Command List / Allocator
// ============================================================================

struct PendingCopy {
    dest: Arc<dyn NativeBuffer>,
    dest_offset: u64,
    src: Arc<dyn NativeBuffer>,
    src_offset: u64,
    size: u64,
}

pub struct MockCommandList {
    pub id: u64,
    commands: Arc<Mutex<Vec<RecordedCommand>>>,
    copies: Vec<PendingCopy>,
    closed: bool,
    fail_close: bool,
}

impl MockCommandList {
    fn push(&mut self, command: RecordedCommand) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn location_tuple(location: &BufferLocation) -> (u64, u64, u64) {
    (object_id(location.buffer.as_any()), location.offset, location.size)
}

impl NativeCommandList for MockCommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        for barrier in barriers {
            self.push(RecordedCommand::Barrier {
                resource_id: barrier.resource_id,
                subresource: barrier.subresource,
                before: barrier.before,
                after: barrier.after,
            });
        }
    }

    fn copy_buffer_region(
        &mut self,
        dest: &Arc<dyn NativeBuffer>,
        dest_offset: u64,
        src: &Arc<dyn NativeBuffer>,
        src_offset: u64,
        size: u64,
    ) {
        self.push(RecordedCommand::CopyBuffer {
            dest: object_id(dest.as_any()),
            dest_offset,
            src: object_id(src.as_any()),
            src_offset,
            size,
        });
        self.copies.push(PendingCopy {
            dest: dest.clone(),
            dest_offset,
            src: src.clone(),
            src_offset,
            size,
        });
    }

    fn copy_texture(&mut self, dest: &Arc<dyn NativeTexture>, src: &Arc<dyn NativeTexture>) {
        self.push(RecordedCommand::CopyTexture {
            dest: object_id(dest.as_any()),
            src: object_id(src.as_any()),
        });
    }

    fn copy_buffer_to_texture(&mut self, dest: &Arc<dyn NativeTexture>, region: &TextureRegion, src: &BufferFootprint) {
        self.push(RecordedCommand::CopyBufferToTexture {
            texture: object_id(dest.as_any()),
            region: *region,
            buffer: object_id(src.buffer.as_any()),
            offset: src.offset,
            row_pitch: src.row_pitch,
        });
    }

    fn copy_texture_to_buffer(&mut self, dest: &BufferFootprint, src: &Arc<dyn NativeTexture>, region: &TextureRegion) {
        self.push(RecordedCommand::CopyTextureToBuffer {
            buffer: object_id(dest.buffer.as_any()),
            offset: dest.offset,
            row_pitch: dest.row_pitch,
            texture: object_id(src.as_any()),
            region: *region,
        });
    }

    fn set_binding_layout(&mut self, pipeline_type: PipelineType, layout: &Arc<dyn NativeBindingLayout>) {
        self.push(RecordedCommand::SetBindingLayout {
            pipeline_type,
            layout: object_id(layout.as_any()),
        });
    }

    fn set_binding_instance(
        &mut self,
        pipeline_type: PipelineType,
        set_index: u32,
        instance: &Arc<dyn NativeBindingInstance>,
    ) {
        self.push(RecordedCommand::SetBindingInstance {
            pipeline_type,
            set_index,
            instance: object_id(instance.as_any()),
        });
    }

    fn set_constant_buffer(&mut self, pipeline_type: PipelineType, root_index: u32, location: &BufferLocation) {
        let (buffer, offset, size) = location_tuple(location);
        self.push(RecordedCommand::SetConstantBuffer {
            pipeline_type,
            root_index,
            buffer,
            offset,
            size,
        });
    }

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]) {
        let slots = views
            .iter()
            .map(|view| {
                let (buffer, offset, size) = location_tuple(&view.location);
                (buffer, offset, size, view.stride)
            })
            .collect();
        self.push(RecordedCommand::SetVertexBuffers(slots));
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView) {
        let (buffer, offset, _) = location_tuple(&view.location);
        self.push(RecordedCommand::SetIndexBuffer {
            buffer,
            offset,
            format: view.format,
        });
    }

    fn set_pipeline(&mut self, pipeline_type: PipelineType, pipeline: &Arc<dyn NativePipeline>) {
        self.push(RecordedCommand::SetPipeline {
            pipeline_type,
            pipeline: object_id(pipeline.as_any()),
        });
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveType) {
        self.push(RecordedCommand::SetTopology(topology));
    }

    fn set_render_targets(&mut self, targets: Option<&RenderTargetBinding>) {
        match targets {
            Some(binding) => self.push(RecordedCommand::SetRenderTargets {
                colors: binding.colors.iter().map(|h| h.index).collect(),
                depth: binding.depth.as_ref().map(|h| h.index),
            }),
            None => self.push(RecordedCommand::UnsetRenderTargets),
        }
    }

    fn clear_render_target(&mut self, target: &DescriptorHandle, color: [f32; 4]) {
        self.push(RecordedCommand::ClearRenderTarget {
            index: target.index,
            color,
        });
    }

    fn clear_depth_stencil(&mut self, target: &DescriptorHandle, flags: ClearFlags, depth: f32, stencil: u8) {
        self.push(RecordedCommand::ClearDepthStencil {
            index: target.index,
            flags,
            depth,
            stencil,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.push(RecordedCommand::SetViewport(*viewport));
    }

    fn set_scissors(&mut self, rect: &ScissorRect) {
        self.push(RecordedCommand::SetScissors(*rect));
    }

    fn set_stencil_ref(&mut self, reference: u8) {
        self.push(RecordedCommand::SetStencilRef(reference));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(RecordedCommand::Dispatch { x, y, z });
    }

    fn begin_debug_group(&mut self, label: &str) {
        self.push(RecordedCommand::BeginDebugGroup(label.to_string()));
    }

    fn end_debug_group(&mut self) {
        self.push(RecordedCommand::EndDebugGroup);
    }

    fn insert_debug_marker(&mut self, label: &str) {
        self.push(RecordedCommand::DebugMarker(label.to_string()));
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("mock command list closed twice".to_string()));
        }
        if self.fail_close {
            return Err(hal_err!("quasar::mock", "Injected command list close failure"));
        }
        self.closed = true;
        Ok(())
    }
}

pub struct MockCommandAllocator {
    state: Arc<MockState>,
    pub resets: usize,
}

impl NativeCommandAllocator for MockCommandAllocator {
    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        self.state.allocator_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn begin_command_list(&mut self) -> Result<Box<dyn NativeCommandList>> {
        let commands = Arc::new(Mutex::new(Vec::new()));
        if let Ok(mut lists) = self.state.lists.lock() {
            lists.push(commands.clone());
        }
        Ok(Box::new(MockCommandList {
            id: next_id(),
            commands,
            copies: Vec::new(),
            closed: false,
            fail_close: self.state.fail_close.swap(false, Ordering::Relaxed),
        }))
    }
}

// ============================================================================
// Mock Fence
// ============================================================================

#[derive(Debug, Default)]
struct FenceState {
    completed: AtomicU64,
    signaled: AtomicU64,
    waits: AtomicUsize,
}

impl FenceState {
    fn signal(&self, value: u64) {
        self.signaled.fetch_max(value, Ordering::SeqCst);
    }

    fn complete_to(&self, value: u64) {
        let target = value.min(self.signaled.load(Ordering::SeqCst));
        self.completed.fetch_max(target, Ordering::SeqCst);
    }
}

pub struct MockFence {
    state: Arc<FenceState>,
}

impl MockFence {
    pub fn signaled_value(&self) -> u64 {
        self.state.signaled.load(Ordering::SeqCst)
    }
}

impl NativeFence for MockFence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// A wait on a signalled value lets the "GPU" finish up to it; a wait on
    /// a value nothing will ever signal times out immediately.
    fn wait(&self, value: u64, _timeout: Duration) -> Result<bool> {
        self.state.waits.fetch_add(1, Ordering::Relaxed);
        if self.state.signaled.load(Ordering::SeqCst) < value {
            return Ok(self.completed_value() >= value);
        }
        self.state.complete_to(value);
        Ok(true)
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

#[derive(Default)]
struct MockState {
    lists: Mutex<Vec<Arc<Mutex<Vec<RecordedCommand>>>>>,
    submissions: Mutex<Vec<Submission>>,
    signals: Mutex<Vec<u64>>,
    fences: Mutex<Vec<Arc<FenceState>>>,
    allocator_resets: AtomicUsize,
    buffers_created: AtomicUsize,
    pass_formats_created: AtomicUsize,
    pipelines_created: AtomicUsize,
    fail_pipeline_creation: AtomicBool,
    fail_close: AtomicBool,
}

/// Backend that records instead of rendering
#[derive(Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the "GPU" finish everything signalled so far
    pub fn complete_all(&self) {
        if let Ok(fences) = self.state.fences.lock() {
            for fence in fences.iter() {
                fence.complete_to(u64::MAX);
            }
        }
    }

    /// Let the "GPU" finish up to `value`
    pub fn complete_to(&self, value: u64) {
        if let Ok(fences) = self.state.fences.lock() {
            for fence in fences.iter() {
                fence.complete_to(value);
            }
        }
    }

    /// Commands of the most recently opened command list
    pub fn last_commands(&self) -> Vec<RecordedCommand> {
        self.state
            .lists
            .lock()
            .ok()
            .and_then(|lists| lists.last().and_then(|c| c.lock().ok().map(|c| c.clone())))
            .unwrap_or_default()
    }

    /// Number of command lists opened so far
    pub fn list_count(&self) -> usize {
        self.state.lists.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Signal-only fence values (discarded lists)
    pub fn signals(&self) -> Vec<u64> {
        self.state.signals.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of fence waits performed
    pub fn fence_waits(&self) -> usize {
        self.state
            .fences
            .lock()
            .map(|f| f.iter().map(|s| s.waits.load(Ordering::Relaxed)).sum())
            .unwrap_or(0)
    }

    pub fn allocator_resets(&self) -> usize {
        self.state.allocator_resets.load(Ordering::Relaxed)
    }

    pub fn buffers_created(&self) -> usize {
        self.state.buffers_created.load(Ordering::Relaxed)
    }

    pub fn pass_formats_created(&self) -> usize {
        self.state.pass_formats_created.load(Ordering::Relaxed)
    }

    pub fn pipelines_created(&self) -> usize {
        self.state.pipelines_created.load(Ordering::Relaxed)
    }

    /// Make every pipeline creation fail until reset
    pub fn set_fail_pipeline_creation(&self, fail: bool) {
        self.state.fail_pipeline_creation.store(fail, Ordering::Relaxed);
    }

    /// Make `close()` fail on the next command list opened
    pub fn fail_next_close(&self) {
        self.state.fail_close.store(true, Ordering::Relaxed);
    }
}

fn downcast_fence(fence: &dyn NativeFence) -> Result<&MockFence> {
    fence
        .as_any()
        .downcast_ref::<MockFence>()
        .ok_or_else(|| Error::InvalidResource("fence was not created by the mock backend".to_string()))
}

impl GraphicsBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Arc<dyn NativeBuffer>> {
        if desc.size == 0 {
            return Err(Error::InvalidResource("buffer size must not be zero".to_string()));
        }
        let buffer = MockBuffer::new(desc.size);
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                return Err(Error::InvalidResource(format!(
                    "initial data ({} bytes) larger than buffer ({} bytes)",
                    data.len(), desc.size
                )));
            }
            let mut storage = buffer.data.lock().map_err(|_| Error::BackendError("poisoned mock buffer".to_string()))?;
            storage[..data.len()].copy_from_slice(data);
        }
        self.state.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(buffer))
    }

    fn create_texture(&self, desc: &TextureDesc, default_state: ResourceState) -> Result<Arc<dyn NativeTexture>> {
        Ok(Arc::new(MockTexture {
            id: next_id(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            initial_state: default_state,
        }))
    }

    fn create_upload_heap(&self, size: u64) -> Result<Box<dyn UploadHeap>> {
        Ok(Box::new(MockUploadHeap::new(size)))
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<Arc<dyn NativeDescriptorHeap>> {
        Ok(Arc::new(MockDescriptorHeap {
            id: next_id(),
            heap_type,
            capacity,
            views: Mutex::new(FxHashMap::default()),
        }))
    }

    fn write_attachment_view(
        &self,
        heap: &Arc<dyn NativeDescriptorHeap>,
        index: u32,
        view: &AttachmentView,
    ) -> Result<()> {
        let heap = heap
            .as_any()
            .downcast_ref::<MockDescriptorHeap>()
            .ok_or_else(|| Error::InvalidResource("heap was not created by the mock backend".to_string()))?;
        let mut views = heap.views.lock().map_err(|_| Error::BackendError("poisoned mock heap".to_string()))?;
        views.insert(index, (object_id(view.texture.as_any()), view.format));
        Ok(())
    }

    fn release_attachment_view(&self, heap: &Arc<dyn NativeDescriptorHeap>, index: u32) {
        if let Some(heap) = heap.as_any().downcast_ref::<MockDescriptorHeap>() {
            if let Ok(mut views) = heap.views.lock() {
                views.remove(&index);
            }
        }
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn NativeShader>> {
        if desc.code.is_empty() {
            return Err(hal_err!("quasar::mock", "Shader '{}' has no bytecode", desc.entry_point));
        }
        Ok(Arc::new(MockShader {
            id: next_id(),
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        }))
    }

    fn create_binding_set(&self, desc: &ResourceBindingSetDesc) -> Result<Arc<dyn NativeBindingSet>> {
        Ok(Arc::new(MockBindingSet {
            id: next_id(),
            binding_count: desc.bindings.len() as u32,
        }))
    }

    fn create_binding_layout(
        &self,
        sets: &[Arc<dyn NativeBindingSet>],
        volatile_cbuffers: &[VolatileCBufferBinding],
    ) -> Result<Arc<dyn NativeBindingLayout>> {
        if sets.len() > MAX_BINDING_SETS || volatile_cbuffers.len() > MAX_VOLATILE_CBUFFERS {
            return Err(hal_err!(
                "quasar::mock",
                "Binding layout too large ({} sets, {} volatile constant buffers)",
                sets.len(), volatile_cbuffers.len()
            ));
        }
        Ok(Arc::new(MockBindingLayout {
            id: next_id(),
            set_count: sets.len(),
            volatile_cbuffer_count: volatile_cbuffers.len(),
        }))
    }

    fn create_binding_instance(
        &self,
        set: &Arc<dyn NativeBindingSet>,
        _heap: &Arc<dyn NativeDescriptorHeap>,
        range: DescriptorRange,
    ) -> Result<Arc<dyn NativeBindingInstance>> {
        if let Some(set) = set.as_any().downcast_ref::<MockBindingSet>() {
            if set.binding_count != range.count {
                return Err(hal_err!(
                    "quasar::mock",
                    "Descriptor range of {} slots for a set with {} bindings",
                    range.count, set.binding_count
                ));
            }
        }
        Ok(Arc::new(MockBindingInstance {
            id: next_id(),
            range,
            writes: Mutex::new(FxHashMap::default()),
        }))
    }

    fn write_binding(
        &self,
        instance: &Arc<dyn NativeBindingInstance>,
        binding: u32,
        write: &DescriptorWrite,
    ) -> Result<()> {
        let instance = instance
            .as_any()
            .downcast_ref::<MockBindingInstance>()
            .ok_or_else(|| Error::InvalidResource("instance was not created by the mock backend".to_string()))?;
        let mut writes = instance.writes.lock().map_err(|_| Error::BackendError("poisoned mock instance".to_string()))?;
        writes.insert(binding, write.clone());
        Ok(())
    }

    fn create_pass_format(&self, key: &PassFormatKey) -> Result<Arc<dyn NativePassFormat>> {
        self.state.pass_formats_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MockPassFormat {
            id: next_id(),
            key: key.clone(),
        }))
    }

    fn create_pipeline(&self, desc: &NativePipelineDesc<'_>) -> Result<Arc<dyn NativePipeline>> {
        if self.state.fail_pipeline_creation.load(Ordering::Relaxed) {
            return Err(hal_err!("quasar::mock", "Injected pipeline creation failure"));
        }
        self.state.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MockPipeline {
            id: next_id(),
            pipeline_type: PipelineType::Graphics,
            pass_format: Some(object_id(desc.pass_format.as_any())),
            stages: desc.stages.iter().map(|(stage, _)| *stage).collect(),
        }))
    }

    fn create_compute_pipeline(
        &self,
        _shader: &Arc<dyn NativeShader>,
        _binding_layout: &Arc<dyn NativeBindingLayout>,
    ) -> Result<Arc<dyn NativePipeline>> {
        if self.state.fail_pipeline_creation.load(Ordering::Relaxed) {
            return Err(hal_err!("quasar::mock", "Injected pipeline creation failure"));
        }
        self.state.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MockPipeline {
            id: next_id(),
            pipeline_type: PipelineType::Compute,
            pass_format: None,
            stages: vec![ShaderStage::Compute],
        }))
    }

    fn create_command_allocator(&self, _queue: QueueType) -> Result<Box<dyn NativeCommandAllocator>> {
        Ok(Box::new(MockCommandAllocator {
            state: self.state.clone(),
            resets: 0,
        }))
    }

    fn create_fence(&self) -> Result<Box<dyn NativeFence>> {
        let state = Arc::new(FenceState::default());
        self.state
            .fences
            .lock()
            .map_err(|_| Error::BackendError("poisoned mock state".to_string()))?
            .push(state.clone());
        Ok(Box::new(MockFence { state }))
    }

    fn submit(
        &self,
        _queue: QueueType,
        lists: &[&dyn NativeCommandList],
        fence: &dyn NativeFence,
        signal_value: u64,
    ) -> Result<()> {
        let fence = downcast_fence(fence)?;
        let mut recorded = Vec::with_capacity(lists.len());

        for list in lists {
            let list = list
                .as_any()
                .downcast_ref::<MockCommandList>()
                .ok_or_else(|| Error::InvalidResource("list was not created by the mock backend".to_string()))?;
            if !list.closed {
                return Err(hal_err!("quasar::mock", "Submitted command list {} is still open", list.id));
            }
            for copy in &list.copies {
                let dest = copy.dest.as_any().downcast_ref::<MockBuffer>();
                let src = copy.src.as_any().downcast_ref::<MockBuffer>();
                if let (Some(dest), Some(src)) = (dest, src) {
                    dest.copy_from(copy.dest_offset, src, copy.src_offset, copy.size)?;
                }
            }
            recorded.push(list.commands());
        }

        self.state
            .submissions
            .lock()
            .map_err(|_| Error::BackendError("poisoned mock state".to_string()))?
            .push(Submission {
                fence_value: signal_value,
                lists: recorded,
            });
        fence.state.signal(signal_value);
        Ok(())
    }

    fn signal(&self, _queue: QueueType, fence: &dyn NativeFence, value: u64) -> Result<()> {
        let fence = downcast_fence(fence)?;
        self.state
            .signals
            .lock()
            .map_err(|_| Error::BackendError("poisoned mock state".to_string()))?
            .push(value);
        fence.state.signal(value);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.complete_all();
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
