//! Precompiled shaders and shader programs
//!
//! Shaders arrive as bytecode plus a name -> slot table produced by an
//! offline compiler. Nothing here compiles or reflects source.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backend::{GraphicsBackend, NativeShader};
use crate::error::{Error, Result};
use crate::resource::next_object_id;
use crate::types::ShaderStage;

/// Shader creation parameters
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    /// Compiled bytecode (SPIR-V for the Vulkan backend)
    pub code: Vec<u8>,
    pub entry_point: String,
    /// Resource name -> binding slot
    pub resource_slots: Vec<(String, u32)>,
}

/// Compiled shader stage
#[derive(Debug)]
pub struct Shader {
    id: u64,
    stage: ShaderStage,
    entry_point: String,
    slots: FxHashMap<String, u32>,
    native: Arc<dyn NativeShader>,
}

impl Shader {
    pub fn new(backend: &dyn GraphicsBackend, desc: &ShaderDesc) -> Result<Self> {
        let mut slots = FxHashMap::default();
        for (name, slot) in &desc.resource_slots {
            if slots.insert(name.clone(), *slot).is_some() {
                return Err(Error::InvalidResource(format!(
                    "shader resource '{}' listed twice",
                    name
                )));
            }
        }

        let native = backend.create_shader(desc)?;
        Ok(Self {
            id: next_object_id(),
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
            slots,
            native,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Binding slot of a named resource
    pub fn resource_slot(&self, name: &str) -> Option<u32> {
        self.slots.get(name).copied()
    }

    pub fn native(&self) -> &Arc<dyn NativeShader> {
        &self.native
    }
}

/// Graphics shader stages linked together
#[derive(Debug, Clone, Default)]
pub struct ShaderProgram {
    pub vertex: Option<Arc<Shader>>,
    pub hull: Option<Arc<Shader>>,
    pub domain: Option<Arc<Shader>>,
    pub geometry: Option<Arc<Shader>>,
    pub pixel: Option<Arc<Shader>>,
}

impl ShaderProgram {
    pub fn new(vertex: Arc<Shader>) -> Self {
        Self {
            vertex: Some(vertex),
            ..Default::default()
        }
    }

    pub fn with_pixel(mut self, pixel: Arc<Shader>) -> Self {
        self.pixel = Some(pixel);
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<Shader>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_tessellation(mut self, hull: Arc<Shader>, domain: Arc<Shader>) -> Self {
        self.hull = Some(hull);
        self.domain = Some(domain);
        self
    }

    /// Present stages in pipeline order, keyed by the slot they occupy
    pub fn stages(&self) -> Vec<(ShaderStage, &Arc<Shader>)> {
        [
            (ShaderStage::Vertex, &self.vertex),
            (ShaderStage::Hull, &self.hull),
            (ShaderStage::Domain, &self.domain),
            (ShaderStage::Geometry, &self.geometry),
            (ShaderStage::Pixel, &self.pixel),
        ]
        .into_iter()
        .filter_map(|(stage, shader)| shader.as_ref().map(|s| (stage, s)))
        .collect()
    }

    /// Check the program can be linked
    ///
    /// A vertex shader is required, every shader must sit in the slot of
    /// its own stage, and hull and domain come together.
    pub fn validate(&self) -> Result<()> {
        if self.vertex.is_none() {
            return Err(Error::InvalidResource("shader program has no vertex shader".to_string()));
        }
        for (slot, shader) in self.stages() {
            if shader.stage() != slot {
                return Err(Error::InvalidResource(format!(
                    "{:?} shader placed in the {:?} slot",
                    shader.stage(), slot
                )));
            }
        }
        if self.hull.is_some() != self.domain.is_some() {
            return Err(Error::InvalidResource(
                "hull and domain shaders must be used together".to_string(),
            ));
        }
        Ok(())
    }

    /// Shader ids per stage (cache key part)
    pub fn shader_ids(&self) -> Vec<(ShaderStage, u64)> {
        self.stages().into_iter().map(|(stage, s)| (stage, s.id())).collect()
    }

    /// Slot of a named resource in the first stage that declares it
    pub fn resource_slot(&self, name: &str) -> Option<u32> {
        self.stages().into_iter().find_map(|(_, s)| s.resource_slot(name))
    }
}
