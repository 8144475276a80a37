//! Resource binding objects
//!
//! A [`ResourceBindingSet`] describes one group of bindings (a descriptor
//! table). A [`ResourceBindingLayout`] combines sets with volatile constant
//! buffer slots bound directly at ring buffer locations. A
//! [`ResourceBindingInstance`] is a filled set occupying a range of the
//! shader-visible descriptor heap.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashSet;

use crate::backend::{
    DescriptorWrite, GraphicsBackend, NativeBindingInstance, NativeBindingLayout, NativeBindingSet,
    NativeBuffer,
};
use crate::error::{Error, Result};
use crate::memory::{DescriptorRange, HeapAllocator};
use crate::resource::{next_object_id, Buffer, Resource, Texture};
use crate::types::{
    BufferMode, BufferUsage, ResourceState, ShaderStageFlags, TextureUsage, MAX_BINDING_SETS,
    MAX_VOLATILE_CBUFFERS,
};
use crate::{hal_err, hal_warn};

// ===== DESCRIPTIONS =====

/// Kind of resource a binding slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    ConstantBuffer,
    Texture,
    WritableTexture,
    StructuredBuffer,
    WritableStructuredBuffer,
}

impl BindingType {
    /// State a bound resource must be in when drawing
    pub fn required_state(self) -> ResourceState {
        match self {
            BindingType::ConstantBuffer => ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            BindingType::Texture | BindingType::StructuredBuffer => ResourceState::SHADER_RESOURCE,
            BindingType::WritableTexture | BindingType::WritableStructuredBuffer => {
                ResourceState::UNORDERED_ACCESS
            }
        }
    }
}

/// One binding slot of a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingDesc {
    /// Binding index as declared by the shader
    pub binding: u32,
    pub binding_type: BindingType,
    pub stages: ShaderStageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceBindingSetDesc {
    pub bindings: Vec<BindingDesc>,
}

/// Constant buffer slot bound at a ring buffer location instead of through a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolatileCBufferBinding {
    /// Slot index, `< MAX_VOLATILE_CBUFFERS`
    pub slot: u32,
    pub stages: ShaderStageFlags,
}

// ===== SET =====

#[derive(Debug)]
pub struct ResourceBindingSet {
    id: u64,
    desc: ResourceBindingSetDesc,
    native: Arc<dyn NativeBindingSet>,
}

impl ResourceBindingSet {
    pub fn new(backend: &dyn GraphicsBackend, desc: ResourceBindingSetDesc) -> Result<Self> {
        if desc.bindings.is_empty() {
            return Err(Error::InvalidResource("binding set has no binding".to_string()));
        }
        let mut seen = FxHashSet::default();
        for binding in &desc.bindings {
            if !seen.insert(binding.binding) {
                return Err(Error::InvalidResource(format!(
                    "binding {} declared twice",
                    binding.binding
                )));
            }
        }

        let native = backend.create_binding_set(&desc)?;
        Ok(Self {
            id: next_object_id(),
            desc,
            native,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &ResourceBindingSetDesc {
        &self.desc
    }

    /// Heap slots an instance of this set occupies
    pub fn descriptor_count(&self) -> u32 {
        self.desc.bindings.len() as u32
    }

    fn position(&self, binding: u32) -> Option<usize> {
        self.desc.bindings.iter().position(|b| b.binding == binding)
    }

    pub fn native(&self) -> &Arc<dyn NativeBindingSet> {
        &self.native
    }
}

// ===== LAYOUT =====

/// Sets plus volatile constant buffer slots
///
/// Root parameters are laid out sets first, then volatile slots: the root
/// index of volatile slot `s` is `set_count + s`.
#[derive(Debug)]
pub struct ResourceBindingLayout {
    id: u64,
    sets: Vec<Arc<ResourceBindingSet>>,
    volatile_cbuffers: Vec<VolatileCBufferBinding>,
    native: Arc<dyn NativeBindingLayout>,
}

impl ResourceBindingLayout {
    pub fn new(
        backend: &dyn GraphicsBackend,
        sets: Vec<Arc<ResourceBindingSet>>,
        volatile_cbuffers: Vec<VolatileCBufferBinding>,
    ) -> Result<Self> {
        if sets.len() > MAX_BINDING_SETS {
            return Err(Error::InvalidResource(format!(
                "{} binding sets (max {})",
                sets.len(), MAX_BINDING_SETS
            )));
        }
        let mut seen = FxHashSet::default();
        for cb in &volatile_cbuffers {
            if cb.slot as usize >= MAX_VOLATILE_CBUFFERS || !seen.insert(cb.slot) {
                return Err(Error::InvalidResource(format!(
                    "invalid or duplicate volatile constant buffer slot {}",
                    cb.slot
                )));
            }
        }

        let native_sets: Vec<_> = sets.iter().map(|s| s.native().clone()).collect();
        let native = backend.create_binding_layout(&native_sets, &volatile_cbuffers)?;

        Ok(Self {
            id: next_object_id(),
            sets,
            volatile_cbuffers,
            native,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sets(&self) -> &[Arc<ResourceBindingSet>] {
        &self.sets
    }

    pub fn set_count(&self) -> u32 {
        self.sets.len() as u32
    }

    pub fn volatile_cbuffers(&self) -> &[VolatileCBufferBinding] {
        &self.volatile_cbuffers
    }

    pub fn has_volatile_slot(&self, slot: u32) -> bool {
        self.volatile_cbuffers.iter().any(|cb| cb.slot == slot)
    }

    /// Root index of a volatile constant buffer slot
    pub fn root_index(&self, slot: u32) -> u32 {
        self.set_count() + slot
    }

    pub fn native(&self) -> &Arc<dyn NativeBindingLayout> {
        &self.native
    }
}

// ===== INSTANCE =====

/// Resource held by an instance binding, with the subresources the shader touches
#[derive(Debug, Clone)]
pub struct BoundResource {
    pub resource: Arc<dyn Resource>,
    pub subresources: Vec<u32>,
    pub required_state: ResourceState,
}

/// Filled binding set living in the shader-visible heap
pub struct ResourceBindingInstance {
    id: u64,
    set: Arc<ResourceBindingSet>,
    range: DescriptorRange,
    native: Arc<dyn NativeBindingInstance>,
    backend: Arc<dyn GraphicsBackend>,
    heap: Arc<Mutex<HeapAllocator>>,
    bound: Mutex<Vec<Option<BoundResource>>>,
}

impl std::fmt::Debug for ResourceBindingInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBindingInstance")
            .field("id", &self.id)
            .field("set", &self.set.id())
            .field("range", &self.range)
            .finish()
    }
}

impl ResourceBindingInstance {
    /// Allocate heap slots for `set` and create the native instance
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        heap: Arc<Mutex<HeapAllocator>>,
        set: Arc<ResourceBindingSet>,
    ) -> Result<Self> {
        let count = set.descriptor_count();
        let (range, native) = {
            let mut allocator = heap.lock()?;
            let native_heap = allocator
                .native()
                .cloned()
                .ok_or_else(|| Error::InitializationFailed("descriptor heap has no native heap".to_string()))?;
            let offset = allocator.allocate(count).ok_or_else(|| {
                Error::ResourceExhausted(format!(
                    "descriptor heap cannot fit {} more slot(s) ({} of {} used)",
                    count,
                    allocator.allocated(),
                    allocator.capacity()
                ))
            })?;
            let range = DescriptorRange { offset, count };
            match backend.create_binding_instance(set.native(), &native_heap, range) {
                Ok(native) => (range, native),
                Err(e) => {
                    allocator.free(offset, count)?;
                    return Err(e);
                }
            }
        };

        Ok(Self {
            id: next_object_id(),
            bound: Mutex::new(vec![None; count as usize]),
            set,
            range,
            native,
            backend,
            heap,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set(&self) -> &Arc<ResourceBindingSet> {
        &self.set
    }

    pub fn range(&self) -> DescriptorRange {
        self.range
    }

    pub fn native(&self) -> &Arc<dyn NativeBindingInstance> {
        &self.native
    }

    fn slot(&self, binding: u32, expected: BindingType) -> Result<usize> {
        let position = self.set.position(binding).ok_or_else(|| {
            Error::InvalidResource(format!("binding {} not declared in the set", binding))
        })?;
        let declared = self.set.desc().bindings[position].binding_type;
        if declared != expected {
            return Err(Error::InvalidResource(format!(
                "binding {} is {:?}, not {:?}",
                binding, declared, expected
            )));
        }
        Ok(position)
    }

    fn write(&self, position: usize, binding: u32, write: DescriptorWrite, bound: BoundResource) -> Result<()> {
        self.backend
            .write_binding(&self.native, binding, &write)
            .map_err(|e| hal_err!("quasar::ResourceBindingInstance", "Descriptor write failed for binding {}: {}", binding, e))?;
        let mut slots = self.bound.lock()?;
        slots[position] = Some(bound);
        Ok(())
    }

    fn storage_buffer<'a>(buffer: &'a Buffer, usage: BufferUsage) -> Result<&'a Arc<dyn NativeBuffer>> {
        if buffer.mode() == BufferMode::Volatile {
            return Err(Error::InvalidResource(
                "volatile buffers bind through volatile constant buffer slots".to_string(),
            ));
        }
        if !buffer.usage().contains(usage) {
            return Err(Error::InvalidResource(format!("buffer lacks {:?} usage", usage)));
        }
        buffer
            .native()
            .ok_or_else(|| Error::InvalidResource("buffer has no storage".to_string()))
    }

    /// Bind a whole buffer as constant buffer
    pub fn set_constant_buffer(&self, binding: u32, buffer: &Arc<Buffer>) -> Result<()> {
        let position = self.slot(binding, BindingType::ConstantBuffer)?;
        let native = Self::storage_buffer(buffer, BufferUsage::CONSTANT)?;
        self.write(
            position,
            binding,
            DescriptorWrite::ConstantBuffer { buffer: native.clone(), offset: 0, size: buffer.size() },
            BoundResource {
                resource: buffer.clone(),
                subresources: vec![0],
                required_state: BindingType::ConstantBuffer.required_state(),
            },
        )
    }

    /// Bind every mip and layer of a texture for sampling
    pub fn set_texture(&self, binding: u32, texture: &Arc<Texture>) -> Result<()> {
        let position = self.slot(binding, BindingType::Texture)?;
        let desc = texture.desc();
        if !desc.usage.contains(TextureUsage::SHADER_READ) {
            return Err(Error::InvalidResource("texture lacks SHADER_READ usage".to_string()));
        }
        self.write(
            position,
            binding,
            DescriptorWrite::Texture {
                texture: texture.native().clone(),
                format: desc.format,
                base_mip: 0,
                mip_count: desc.mip_levels,
            },
            BoundResource {
                resource: texture.clone(),
                subresources: (0..desc.subresource_count()).collect(),
                required_state: BindingType::Texture.required_state(),
            },
        )
    }

    /// Bind one mip (all layers) of a texture for shader writes
    pub fn set_writable_texture(&self, binding: u32, texture: &Arc<Texture>, mip: u32) -> Result<()> {
        let position = self.slot(binding, BindingType::WritableTexture)?;
        let desc = texture.desc();
        if !desc.usage.contains(TextureUsage::SHADER_WRITE) {
            return Err(Error::InvalidResource("texture lacks SHADER_WRITE usage".to_string()));
        }
        if mip >= desc.mip_levels {
            return Err(Error::InvalidResource(format!(
                "mip {} out of range ({} levels)",
                mip, desc.mip_levels
            )));
        }
        self.write(
            position,
            binding,
            DescriptorWrite::WritableTexture {
                texture: texture.native().clone(),
                format: desc.format,
                mip,
            },
            BoundResource {
                resource: texture.clone(),
                subresources: (0..desc.array_layers).map(|layer| texture.subresource_index(mip, layer)).collect(),
                required_state: BindingType::WritableTexture.required_state(),
            },
        )
    }

    pub fn set_structured_buffer(&self, binding: u32, buffer: &Arc<Buffer>) -> Result<()> {
        let position = self.slot(binding, BindingType::StructuredBuffer)?;
        let native = Self::storage_buffer(buffer, BufferUsage::STORAGE)?;
        self.write(
            position,
            binding,
            DescriptorWrite::StructuredBuffer { buffer: native.clone(), offset: 0, size: buffer.size() },
            BoundResource {
                resource: buffer.clone(),
                subresources: vec![0],
                required_state: BindingType::StructuredBuffer.required_state(),
            },
        )
    }

    pub fn set_writable_structured_buffer(&self, binding: u32, buffer: &Arc<Buffer>) -> Result<()> {
        let position = self.slot(binding, BindingType::WritableStructuredBuffer)?;
        let native = Self::storage_buffer(buffer, BufferUsage::STORAGE)?;
        self.write(
            position,
            binding,
            DescriptorWrite::WritableStructuredBuffer { buffer: native.clone(), offset: 0, size: buffer.size() },
            BoundResource {
                resource: buffer.clone(),
                subresources: vec![0],
                required_state: BindingType::WritableStructuredBuffer.required_state(),
            },
        )
    }

    /// Resources currently written into the instance
    pub fn bound_resources(&self) -> Vec<BoundResource> {
        self.bound
            .lock()
            .map(|slots| slots.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether every binding of the set has been written
    pub fn is_complete(&self) -> bool {
        self.bound
            .lock()
            .map(|slots| slots.iter().all(Option::is_some))
            .unwrap_or(false)
    }
}

impl Drop for ResourceBindingInstance {
    fn drop(&mut self) {
        match self.heap.lock() {
            Ok(mut heap) => {
                let _ = heap.free(self.range.offset, self.range.count);
            }
            Err(_) => hal_warn!(
                "quasar::ResourceBindingInstance",
                "Descriptor heap lock poisoned, {} slot(s) leaked",
                self.range.count
            ),
        }
    }
}

#[cfg(test)]
#[path = "binding_tests.rs"]
mod tests;
