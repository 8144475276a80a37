//! Backend capability interface
//!
//! The HAL core never talks to a driver directly. Everything native goes
//! through [`GraphicsBackend`] (object creation, submission) and
//! [`NativeCommandList`] (command encoding). Parameters are plain structs
//! and enums so that backends stay swappable behind the same contract.
//!
//! Native objects are trait objects; a backend recovers its own concrete
//! type through `as_any()` downcasting.

pub mod mock;

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::memory::DescriptorRange;
use crate::pipeline::{PassFormatKey, PipelineStateDesc, ShaderDesc};
use crate::resource::{
    BufferDesc, ResourceBindingSetDesc, ResourceId, TextureDesc, TextureRegion, VolatileCBufferBinding,
};
use crate::types::{
    ClearFlags, Format, IndexFormat, PipelineType, PrimitiveType, QueueType, ResourceState,
    ScissorRect, ShaderStage, Viewport,
};

// ============================================================================
// NATIVE OBJECTS
// ============================================================================

/// GPU buffer memory
pub trait NativeBuffer: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;

    /// Size in bytes
    fn size(&self) -> u64;

    /// Read back CPU-visible content (readback buffers)
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;
}

/// GPU image memory
pub trait NativeTexture: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Typed descriptor heap
pub trait NativeDescriptorHeap: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn heap_type(&self) -> DescriptorHeapType;
    fn capacity(&self) -> u32;
}

/// Compiled shader stage
pub trait NativeShader: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn stage(&self) -> ShaderStage;
}

/// Layout of one resource binding set (descriptor table / set layout)
pub trait NativeBindingSet: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Full binding layout (root signature / pipeline layout)
pub trait NativeBindingLayout: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Filled instance of a binding set (descriptor table range / descriptor set)
pub trait NativeBindingInstance: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Attachment format description pipelines are compatible with
pub trait NativePassFormat: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Linked graphics or compute pipeline
pub trait NativePipeline: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// CPU-writable, GPU-readable memory backing a ring buffer
pub trait UploadHeap: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Copy `data` into the heap at `offset`
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// The heap as a buffer usable as copy source or binding
    fn buffer(&self) -> &Arc<dyn NativeBuffer>;
}

/// Command memory pool (one per frame slot)
pub trait NativeCommandAllocator: Send {
    /// Release all command memory. Only legal once the GPU is done with it.
    fn reset(&mut self) -> Result<()>;

    /// Open a new command list recording into this allocator
    fn begin_command_list(&mut self) -> Result<Box<dyn NativeCommandList>>;
}

/// Monotonically increasing GPU-to-CPU completion signal
pub trait NativeFence: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Highest value the GPU has signalled
    fn completed_value(&self) -> u64;

    /// Block until `value` is reached or `timeout` elapses
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait(&self, value: u64, timeout: Duration) -> Result<bool>;
}

// ============================================================================
// PLAIN PARAMETER TYPES
// ============================================================================

/// Descriptor heap purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Shader-visible constant buffer / shader resource / unordered access views
    CbvSrvUav,
    /// Render target views
    RenderTarget,
    /// Depth stencil views
    DepthStencil,
}

/// Span of a buffer bound to the pipeline
#[derive(Debug, Clone)]
pub struct BufferLocation {
    pub buffer: Arc<dyn NativeBuffer>,
    pub offset: u64,
    pub size: u64,
}

/// Vertex buffer slot content
#[derive(Debug, Clone)]
pub struct VertexBufferView {
    pub location: BufferLocation,
    pub stride: u32,
}

/// Index buffer content
#[derive(Debug, Clone)]
pub struct IndexBufferView {
    pub location: BufferLocation,
    pub format: IndexFormat,
}

/// Texture rows laid out in a buffer
#[derive(Debug, Clone)]
pub struct BufferFootprint {
    pub buffer: Arc<dyn NativeBuffer>,
    pub offset: u64,
    /// Bytes between the starts of two rows
    pub row_pitch: u64,
    pub format: Format,
}

/// Resource referenced by a barrier
#[derive(Debug, Clone)]
pub enum NativeResource {
    Buffer(Arc<dyn NativeBuffer>),
    Texture(Arc<dyn NativeTexture>),
}

/// One state transition of one subresource
#[derive(Debug, Clone)]
pub struct ResourceBarrier {
    pub resource_id: ResourceId,
    pub resource: NativeResource,
    pub subresource: u32,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Slot inside a descriptor heap
#[derive(Debug, Clone)]
pub struct DescriptorHandle {
    pub heap: Arc<dyn NativeDescriptorHeap>,
    pub index: u32,
}

/// Render target / depth stencil view written into an RTV or DSV heap slot
#[derive(Debug, Clone)]
pub struct AttachmentView {
    pub texture: Arc<dyn NativeTexture>,
    pub format: Format,
    pub mip: u32,
    pub layer: u32,
}

/// Attachments bound for drawing
#[derive(Debug, Clone)]
pub struct RenderTargetBinding {
    pub colors: Vec<DescriptorHandle>,
    pub depth: Option<DescriptorHandle>,
    pub width: u32,
    pub height: u32,
}

/// Content written into one binding of a binding instance
#[derive(Debug, Clone)]
pub enum DescriptorWrite {
    ConstantBuffer { buffer: Arc<dyn NativeBuffer>, offset: u64, size: u64 },
    Texture { texture: Arc<dyn NativeTexture>, format: Format, base_mip: u32, mip_count: u32 },
    WritableTexture { texture: Arc<dyn NativeTexture>, format: Format, mip: u32 },
    StructuredBuffer { buffer: Arc<dyn NativeBuffer>, offset: u64, size: u64 },
    WritableStructuredBuffer { buffer: Arc<dyn NativeBuffer>, offset: u64, size: u64 },
}

/// Everything a backend needs to link a graphics pipeline
pub struct NativePipelineDesc<'a> {
    pub state: &'a PipelineStateDesc,
    pub stages: &'a [(ShaderStage, Arc<dyn NativeShader>)],
    pub pass_format: &'a Arc<dyn NativePassFormat>,
    pub binding_layout: &'a Arc<dyn NativeBindingLayout>,
}

// ============================================================================
// ENCODER
// ============================================================================

/// Native command list in the recording state
///
/// Methods are infallible encoders; errors surface at `close()` or submit,
/// the way native command lists report them.
pub trait NativeCommandList: Send {
    fn as_any(&self) -> &dyn Any;

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    fn copy_buffer_region(
        &mut self,
        dest: &Arc<dyn NativeBuffer>,
        dest_offset: u64,
        src: &Arc<dyn NativeBuffer>,
        src_offset: u64,
        size: u64,
    );

    fn copy_texture(&mut self, dest: &Arc<dyn NativeTexture>, src: &Arc<dyn NativeTexture>);

    /// Copy buffer rows into one subresource region (texture in COPY_DEST)
    fn copy_buffer_to_texture(&mut self, dest: &Arc<dyn NativeTexture>, region: &TextureRegion, src: &BufferFootprint);

    /// Copy one subresource region into buffer rows (texture in COPY_SOURCE)
    fn copy_texture_to_buffer(&mut self, dest: &BufferFootprint, src: &Arc<dyn NativeTexture>, region: &TextureRegion);

    fn set_binding_layout(&mut self, pipeline_type: PipelineType, layout: &Arc<dyn NativeBindingLayout>);

    fn set_binding_instance(
        &mut self,
        pipeline_type: PipelineType,
        set_index: u32,
        instance: &Arc<dyn NativeBindingInstance>,
    );

    /// Bind a constant buffer directly at a buffer location (volatile CB root slot)
    fn set_constant_buffer(&mut self, pipeline_type: PipelineType, root_index: u32, location: &BufferLocation);

    fn set_vertex_buffers(&mut self, views: &[VertexBufferView]);

    fn set_index_buffer(&mut self, view: &IndexBufferView);

    fn set_pipeline(&mut self, pipeline_type: PipelineType, pipeline: &Arc<dyn NativePipeline>);

    fn set_primitive_topology(&mut self, topology: PrimitiveType);

    /// Bind attachments (`None` unbinds)
    fn set_render_targets(&mut self, targets: Option<&RenderTargetBinding>);

    fn clear_render_target(&mut self, target: &DescriptorHandle, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, target: &DescriptorHandle, flags: ClearFlags, depth: f32, stencil: u8);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_scissors(&mut self, rect: &ScissorRect);

    fn set_stencil_ref(&mut self, reference: u8);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn begin_debug_group(&mut self, label: &str);

    fn end_debug_group(&mut self);

    fn insert_debug_marker(&mut self, label: &str);

    /// Seal the list. No command may be encoded afterwards.
    fn close(&mut self) -> Result<()>;
}

// ============================================================================
// BACKEND
// ============================================================================

/// Capability set of a native graphics backend
pub trait GraphicsBackend: Send + Sync {
    /// Backend name for diagnostics ("vulkan", "mock")
    fn name(&self) -> &str;

    /// Create buffer storage. Never called for volatile buffers.
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Arc<dyn NativeBuffer>>;

    /// Create a texture and leave every subresource in `default_state`
    fn create_texture(&self, desc: &TextureDesc, default_state: ResourceState) -> Result<Arc<dyn NativeTexture>>;

    fn create_upload_heap(&self, size: u64) -> Result<Box<dyn UploadHeap>>;

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<Arc<dyn NativeDescriptorHeap>>;

    /// Write a render target or depth stencil view into an RTV/DSV heap slot
    fn write_attachment_view(
        &self,
        heap: &Arc<dyn NativeDescriptorHeap>,
        index: u32,
        view: &AttachmentView,
    ) -> Result<()>;

    /// Release whatever `write_attachment_view` created for a slot
    fn release_attachment_view(&self, heap: &Arc<dyn NativeDescriptorHeap>, index: u32);

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn NativeShader>>;

    fn create_binding_set(&self, desc: &ResourceBindingSetDesc) -> Result<Arc<dyn NativeBindingSet>>;

    fn create_binding_layout(
        &self,
        sets: &[Arc<dyn NativeBindingSet>],
        volatile_cbuffers: &[VolatileCBufferBinding],
    ) -> Result<Arc<dyn NativeBindingLayout>>;

    /// Create an instance of `set` occupying `range` of the CBV/SRV/UAV heap
    fn create_binding_instance(
        &self,
        set: &Arc<dyn NativeBindingSet>,
        heap: &Arc<dyn NativeDescriptorHeap>,
        range: DescriptorRange,
    ) -> Result<Arc<dyn NativeBindingInstance>>;

    /// Write one binding of an instance
    fn write_binding(
        &self,
        instance: &Arc<dyn NativeBindingInstance>,
        binding: u32,
        write: &DescriptorWrite,
    ) -> Result<()>;

    fn create_pass_format(&self, key: &PassFormatKey) -> Result<Arc<dyn NativePassFormat>>;

    fn create_pipeline(&self, desc: &NativePipelineDesc<'_>) -> Result<Arc<dyn NativePipeline>>;

    fn create_compute_pipeline(
        &self,
        shader: &Arc<dyn NativeShader>,
        binding_layout: &Arc<dyn NativeBindingLayout>,
    ) -> Result<Arc<dyn NativePipeline>>;

    fn create_command_allocator(&self, queue: QueueType) -> Result<Box<dyn NativeCommandAllocator>>;

    fn create_fence(&self) -> Result<Box<dyn NativeFence>>;

    /// Execute sealed lists in order, then signal `fence` to `signal_value`
    fn submit(
        &self,
        queue: QueueType,
        lists: &[&dyn NativeCommandList],
        fence: &dyn NativeFence,
        signal_value: u64,
    ) -> Result<()>;

    /// Signal `fence` to `value` once all previously submitted work is done
    fn signal(&self, queue: QueueType, fence: &dyn NativeFence, value: u64) -> Result<()>;

    fn wait_idle(&self) -> Result<()>;
}
