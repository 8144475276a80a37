//! Pipeline object cache
//!
//! Linking a pipeline is expensive, so every distinct
//! (fixed-function state, binding layout, shader program) combination is
//! built once and shared. Target formats are resolved through a nested
//! [`PassFormatCache`], so pipelines with the same attachment formats share
//! one native pass format object.
//!
//! # Contract
//!
//! Identical keys return the same `Arc` (pointer-equal). A failed native
//! creation is logged and returned; nothing is inserted and the next call
//! with the same key tries again from scratch.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backend::{GraphicsBackend, NativePassFormat, NativePipeline, NativePipelineDesc};
use crate::error::{Error, Result};
use crate::pipeline::{PipelineStateDesc, Shader, ShaderProgram};
use crate::resource::{next_object_id, ResourceBindingLayout};
use crate::types::{Format, PrimitiveType, ShaderStage, MAX_RENDER_TARGETS, MAX_VERTEX_BUFFERS};
use crate::{hal_debug, hal_error};

// ===== PASS FORMATS =====

/// Attachment formats a pipeline renders into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PassFormatKey {
    pub color_formats: Vec<Format>,
    /// `Format::Unknown` without depth attachment
    pub depth_format: Format,
    pub sample_count: u32,
}

/// Native pass format objects keyed by attachment formats
#[derive(Default)]
pub struct PassFormatCache {
    formats: FxHashMap<PassFormatKey, Arc<dyn NativePassFormat>>,
    hits: u64,
    misses: u64,
}

impl PassFormatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        backend: &dyn GraphicsBackend,
        key: &PassFormatKey,
    ) -> Result<Arc<dyn NativePassFormat>> {
        if let Some(format) = self.formats.get(key) {
            self.hits += 1;
            return Ok(format.clone());
        }

        self.misses += 1;
        let format = backend.create_pass_format(key).map_err(|e| {
            hal_error!(
                "quasar::PassFormatCache",
                "Pass format creation failed for {:?}: {}",
                key, e
            );
            e
        })?;
        self.formats.insert(key.clone(), format.clone());
        Ok(format)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ===== PIPELINE OBJECTS =====

/// Logical identity of a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineCacheKey {
    pub state: PipelineStateDesc,
    pub binding_layout: u64,
    pub shaders: Vec<(ShaderStage, u64)>,
}

/// Linked graphics pipeline
pub struct PipelineState {
    id: u64,
    key: PipelineCacheKey,
    native: Arc<dyn NativePipeline>,
    binding_layout: Arc<ResourceBindingLayout>,
    program: ShaderProgram,
    pass_format: Arc<dyn NativePassFormat>,
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("id", &self.id)
            .field("binding_layout", &self.binding_layout.id())
            .field("shaders", &self.key.shaders)
            .finish()
    }
}

impl PipelineState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &PipelineCacheKey {
        &self.key
    }

    pub fn state(&self) -> &PipelineStateDesc {
        &self.key.state
    }

    pub fn native(&self) -> &Arc<dyn NativePipeline> {
        &self.native
    }

    pub fn binding_layout(&self) -> &Arc<ResourceBindingLayout> {
        &self.binding_layout
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.key.state.primitive_type
    }

    pub fn pass_format(&self) -> &Arc<dyn NativePassFormat> {
        &self.pass_format
    }
}

/// Linked compute pipeline
pub struct ComputePipelineState {
    id: u64,
    native: Arc<dyn NativePipeline>,
    binding_layout: Arc<ResourceBindingLayout>,
    shader: Arc<Shader>,
}

impl std::fmt::Debug for ComputePipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipelineState")
            .field("id", &self.id)
            .field("binding_layout", &self.binding_layout.id())
            .field("shader", &self.shader.id())
            .finish()
    }
}

impl ComputePipelineState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn native(&self) -> &Arc<dyn NativePipeline> {
        &self.native
    }

    pub fn binding_layout(&self) -> &Arc<ResourceBindingLayout> {
        &self.binding_layout
    }

    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }
}

// ===== CACHE =====

/// Graphics and compute pipelines plus the pass formats they use
#[derive(Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineCacheKey, Arc<PipelineState>>,
    compute: FxHashMap<(u64, u64), Arc<ComputePipelineState>>,
    pass_formats: PassFormatCache,
    hits: u64,
    misses: u64,
}

fn validate_state(state: &PipelineStateDesc, program: &ShaderProgram) -> Result<()> {
    program.validate()?;

    if state.color_formats.len() > MAX_RENDER_TARGETS {
        return Err(Error::InvalidResource(format!(
            "{} color formats (max {})",
            state.color_formats.len(), MAX_RENDER_TARGETS
        )));
    }
    if state.color_formats.iter().any(|f| f.is_depth() || *f == Format::Unknown) {
        return Err(Error::InvalidResource("invalid color attachment format".to_string()));
    }
    if state.depth_format != Format::Unknown && !state.depth_format.is_depth() {
        return Err(Error::InvalidResource(format!(
            "{:?} is not a depth format",
            state.depth_format
        )));
    }
    if let Some(binding) = state
        .vertex_layout
        .bindings
        .iter()
        .find(|b| b.binding as usize >= MAX_VERTEX_BUFFERS)
    {
        return Err(Error::InvalidResource(format!(
            "vertex binding {} out of range (max {})",
            binding.binding, MAX_VERTEX_BUFFERS
        )));
    }

    let tessellated = program.hull.is_some();
    match state.primitive_type {
        PrimitiveType::Patch if !tessellated => Err(Error::InvalidResource(
            "patch topology needs hull and domain shaders".to_string(),
        )),
        PrimitiveType::Patch if !(1..=32).contains(&state.patch_control_points) => {
            Err(Error::InvalidResource(format!(
                "invalid patch control point count {}",
                state.patch_control_points
            )))
        }
        PrimitiveType::Patch => Ok(()),
        _ if tessellated => Err(Error::InvalidResource(
            "tessellation shaders need patch topology".to_string(),
        )),
        _ => Ok(()),
    }
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pipeline for (state, program, layout), linked on first request
    pub fn get_or_create(
        &mut self,
        backend: &dyn GraphicsBackend,
        state: &PipelineStateDesc,
        program: &ShaderProgram,
        binding_layout: &Arc<ResourceBindingLayout>,
    ) -> Result<Arc<PipelineState>> {
        let key = PipelineCacheKey {
            state: state.clone(),
            binding_layout: binding_layout.id(),
            shaders: program.shader_ids(),
        };

        if let Some(pipeline) = self.pipelines.get(&key) {
            self.hits += 1;
            return Ok(pipeline.clone());
        }
        self.misses += 1;

        if let Err(e) = validate_state(state, program) {
            hal_error!("quasar::PipelineCache", "Rejected pipeline {:?}: {}", key.shaders, e);
            return Err(e);
        }

        let pass_format = self.pass_formats.get_or_create(backend, &state.pass_format_key())?;

        let stages: Vec<_> = program
            .stages()
            .into_iter()
            .map(|(stage, shader)| (stage, shader.native().clone()))
            .collect();

        let native = backend
            .create_pipeline(&NativePipelineDesc {
                state,
                stages: &stages,
                pass_format: &pass_format,
                binding_layout: binding_layout.native(),
            })
            .map_err(|e| {
                hal_error!(
                    "quasar::PipelineCache",
                    "Pipeline creation failed (shaders {:?}, layout {}): {}",
                    key.shaders, key.binding_layout, e
                );
                e
            })?;

        let pipeline = Arc::new(PipelineState {
            id: next_object_id(),
            key: key.clone(),
            native,
            binding_layout: binding_layout.clone(),
            program: program.clone(),
            pass_format,
        });
        hal_debug!(
            "quasar::PipelineCache",
            "Created pipeline {} ({} cached)",
            pipeline.id,
            self.pipelines.len() + 1
        );
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Cached compute pipeline for (shader, layout)
    pub fn get_or_create_compute(
        &mut self,
        backend: &dyn GraphicsBackend,
        shader: &Arc<Shader>,
        binding_layout: &Arc<ResourceBindingLayout>,
    ) -> Result<Arc<ComputePipelineState>> {
        let key = (binding_layout.id(), shader.id());
        if let Some(pipeline) = self.compute.get(&key) {
            self.hits += 1;
            return Ok(pipeline.clone());
        }
        self.misses += 1;

        if shader.stage() != ShaderStage::Compute {
            let message = format!("{:?} shader used as compute pipeline", shader.stage());
            hal_error!("quasar::PipelineCache", "{}", message);
            return Err(Error::InvalidResource(message));
        }

        let native = backend
            .create_compute_pipeline(shader.native(), binding_layout.native())
            .map_err(|e| {
                hal_error!(
                    "quasar::PipelineCache",
                    "Compute pipeline creation failed (shader {}, layout {}): {}",
                    shader.id(), binding_layout.id(), e
                );
                e
            })?;

        let pipeline = Arc::new(ComputePipelineState {
            id: next_object_id(),
            native,
            binding_layout: binding_layout.clone(),
            shader: shader.clone(),
        });
        self.compute.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    pub fn pass_formats(&self) -> &PassFormatCache {
        &self.pass_formats
    }

    /// Number of cached graphics pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty() && self.compute.is_empty()
    }

    pub fn compute_len(&self) -> usize {
        self.compute.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
#[path = "pipeline_cache_tests.rs"]
mod tests;
