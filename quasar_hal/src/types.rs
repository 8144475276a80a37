//! Plain enums, flags and limits shared by the HAL and its backends

use bitflags::bitflags;

// ===== LIMITS =====

/// Maximum number of vertex buffer slots
pub const MAX_VERTEX_BUFFERS: usize = 4;

/// Maximum number of volatile constant buffer slots per pipeline type
pub const MAX_VOLATILE_CBUFFERS: usize = 8;

/// Maximum number of simultaneously bound color render targets
pub const MAX_RENDER_TARGETS: usize = 8;

/// Maximum number of resource binding sets in a binding layout
pub const MAX_BINDING_SETS: usize = 8;

/// Alignment of every ring buffer allocation (constant buffer offset rule)
pub const RING_BUFFER_ALIGNMENT: u64 = 256;

/// Row pitch alignment of texture data laid out in a buffer
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;

bitflags! {
    /// Access mode a resource (or one of its subresources) is usable in
    ///
    /// `COMMON` is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const COPY_DEST = 1 << 8;
        const COPY_SOURCE = 1 << 9;
        const PRESENT = 1 << 10;

        const SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::SHADER_RESOURCE.bits()
            | Self::COPY_SOURCE.bits();
    }
}

impl ResourceState {
    /// Whether the state allows GPU writes
    ///
    /// Write states are exclusive: a transition is needed even when the
    /// requested bits are already contained.
    pub fn is_write(self) -> bool {
        self.intersects(
            ResourceState::RENDER_TARGET
                | ResourceState::UNORDERED_ACCESS
                | ResourceState::DEPTH_WRITE
                | ResourceState::COPY_DEST,
        )
    }

    /// Whether a resource in `self` can be used as `required` without a barrier
    pub fn satisfies(self, required: ResourceState) -> bool {
        if self == required {
            return true;
        }
        if required.is_empty() || self.is_write() || required.is_write() {
            return false;
        }
        self.contains(required)
    }
}

/// How a buffer's content is updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMode {
    /// Content given at creation, never written again
    Static,
    /// Persistent, partially updated through a staged copy from the ring buffer
    Dynamic,
    /// No native storage; fully replaced on every write by a ring buffer span
    Volatile,
    /// GPU-to-CPU copy destination, readable on the CPU
    Readback,
}

bitflags! {
    /// Pipeline bindings a buffer may be used for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const STORAGE = 1 << 3;
        const COPY_SOURCE = 1 << 4;
        const COPY_DEST = 1 << 5;
    }
}

bitflags! {
    /// Pipeline bindings a texture may be used for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SOURCE = 1 << 4;
        const COPY_DEST = 1 << 5;
        const READBACK = 1 << 6;
    }
}

/// Texture and vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(non_camel_case_types)]
pub enum Format {
    Unknown,

    // Color formats
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    B8G8R8A8_UNORM,
    B8G8R8A8_SRGB,
    R16G16B16A16_FLOAT,
    R11G11B10_FLOAT,
    R32_FLOAT,
    R32_UINT,

    // Vertex attribute formats
    R32G32_FLOAT,
    R32G32B32_FLOAT,
    R32G32B32A32_FLOAT,
    R8G8B8A8_SNORM,

    // Depth formats
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl Format {
    /// Whether the format is a depth (or depth-stencil) format
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16_UNORM | Format::D32_FLOAT | Format::D24_UNORM_S8_UINT)
    }

    /// Whether the format carries a stencil component
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24_UNORM_S8_UINT)
    }

    /// Size of one texel / vertex element in bytes (0 for Unknown)
    pub fn size_in_bytes(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::D16_UNORM => 2,
            Format::R8G8B8A8_UNORM
            | Format::R8G8B8A8_SRGB
            | Format::B8G8R8A8_UNORM
            | Format::B8G8R8A8_SRGB
            | Format::R8G8B8A8_SNORM
            | Format::R11G11B10_FLOAT
            | Format::R32_FLOAT
            | Format::R32_UINT
            | Format::D32_FLOAT
            | Format::D24_UNORM_S8_UINT => 4,
            Format::R16G16B16A16_FLOAT | Format::R32G32_FLOAT => 8,
            Format::R32G32B32_FLOAT => 12,
            Format::R32G32B32A32_FLOAT => 16,
        }
    }
}

/// Queue a command list is recorded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Copy,
}

/// Pipeline bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineType {
    Graphics,
    Compute,
}

/// Index buffer element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    /// Patch list with the control point count of the pipeline
    Patch,
}

bitflags! {
    /// What `clear` touches on the bound render target
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

bitflags! {
    /// Set of shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const HULL = 1 << 1;
        const DOMAIN = 1 << 2;
        const GEOMETRY = 1 << 3;
        const PIXEL = 1 << 4;
        const COMPUTE = 1 << 5;
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits()
            | Self::GEOMETRY.bits()
            | Self::PIXEL.bits();
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Hull => ShaderStageFlags::HULL,
            ShaderStage::Domain => ShaderStageFlags::DOMAIN,
            ShaderStage::Geometry => ShaderStageFlags::GEOMETRY,
            ShaderStage::Pixel => ShaderStageFlags::PIXEL,
            ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

/// Viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Scissor rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
