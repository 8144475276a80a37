//! Shaders, pipeline state descriptions and the pipeline object cache

pub mod pipeline_cache;
pub mod pipeline_state;
pub mod shader;

pub use pipeline_cache::{
    ComputePipelineState, PassFormatCache, PassFormatKey, PipelineCache, PipelineCacheKey,
    PipelineState,
};
pub use pipeline_state::{
    BlendFactor, BlendOp, ColorBlendState, ColorWriteMask, CompareOp, CullMode, DepthBias,
    DepthStencilState, FrontFace, PipelineStateDesc, PolygonMode, RasterizationState,
    StencilOp, StencilOpState, VertexAttribute, VertexBinding, VertexInputRate, VertexLayout,
};
pub use shader::{Shader, ShaderDesc, ShaderProgram};
