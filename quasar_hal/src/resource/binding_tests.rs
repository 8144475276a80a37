//! Unit tests for binding.rs

use std::sync::{Arc, Mutex};

use crate::backend::mock::{MockBackend, MockBindingInstance};
use crate::backend::{DescriptorHeapType, DescriptorWrite, GraphicsBackend};
use crate::error::Error;
use crate::memory::HeapAllocator;
use crate::resource::{
    BindingDesc, BindingType, Buffer, BufferDesc, ResourceBindingInstance, ResourceBindingLayout,
    ResourceBindingSet, ResourceBindingSetDesc, Texture, TextureDesc, VolatileCBufferBinding,
};
use crate::types::{BufferMode, BufferUsage, ResourceState, ShaderStageFlags, TextureUsage};

fn heap(backend: &MockBackend, capacity: u32) -> Arc<Mutex<HeapAllocator>> {
    let native = backend.create_descriptor_heap(DescriptorHeapType::CbvSrvUav, capacity).unwrap();
    Arc::new(Mutex::new(HeapAllocator::with_native(native)))
}

fn binding(binding: u32, binding_type: BindingType) -> BindingDesc {
    BindingDesc {
        binding,
        binding_type,
        stages: ShaderStageFlags::ALL_GRAPHICS,
    }
}

fn material_set(backend: &MockBackend) -> Arc<ResourceBindingSet> {
    let desc = ResourceBindingSetDesc {
        bindings: vec![
            binding(0, BindingType::ConstantBuffer),
            binding(1, BindingType::Texture),
            binding(2, BindingType::WritableStructuredBuffer),
        ],
    };
    Arc::new(ResourceBindingSet::new(backend, desc).unwrap())
}

fn buffer(backend: &MockBackend, mode: BufferMode, usage: BufferUsage) -> Arc<Buffer> {
    let data = [0u8; 256];
    let initial = (mode == BufferMode::Static).then_some(&data[..]);
    Arc::new(Buffer::new(backend, BufferDesc { size: 256, mode, usage }, initial).unwrap())
}

// ============================================================================
// SET / LAYOUT
// ============================================================================

#[test]
fn test_set_rejects_duplicate_and_empty_bindings() {
    let backend = MockBackend::new();
    let duplicate = ResourceBindingSetDesc {
        bindings: vec![binding(0, BindingType::Texture), binding(0, BindingType::ConstantBuffer)],
    };
    assert!(ResourceBindingSet::new(&backend, duplicate).is_err());
    assert!(ResourceBindingSet::new(&backend, ResourceBindingSetDesc::default()).is_err());
}

#[test]
fn test_layout_root_indices_follow_sets() {
    let backend = MockBackend::new();
    let set = material_set(&backend);
    let layout = ResourceBindingLayout::new(
        &backend,
        vec![set.clone(), set],
        vec![
            VolatileCBufferBinding { slot: 0, stages: ShaderStageFlags::VERTEX },
            VolatileCBufferBinding { slot: 3, stages: ShaderStageFlags::PIXEL },
        ],
    )
    .unwrap();

    assert_eq!(layout.set_count(), 2);
    assert_eq!(layout.root_index(0), 2);
    assert_eq!(layout.root_index(3), 5);
    assert!(layout.has_volatile_slot(3));
    assert!(!layout.has_volatile_slot(1));
}

#[test]
fn test_layout_rejects_bad_volatile_slots() {
    let backend = MockBackend::new();
    let cb = |slot| VolatileCBufferBinding { slot, stages: ShaderStageFlags::VERTEX };
    assert!(ResourceBindingLayout::new(&backend, Vec::new(), vec![cb(8)]).is_err());
    assert!(ResourceBindingLayout::new(&backend, Vec::new(), vec![cb(1), cb(1)]).is_err());
}

// ============================================================================
// INSTANCE
// ============================================================================

#[test]
fn test_instance_occupies_heap_range_until_dropped() {
    let backend = Arc::new(MockBackend::new());
    let heap = heap(&backend, 16);
    let set = material_set(&backend);

    let a = ResourceBindingInstance::new(backend.clone(), heap.clone(), set.clone()).unwrap();
    let b = ResourceBindingInstance::new(backend.clone(), heap.clone(), set).unwrap();
    assert_eq!(a.range().offset, 0);
    assert_eq!(b.range().offset, 3);
    assert_eq!(heap.lock().unwrap().allocated(), 6);

    drop(a);
    drop(b);
    assert_eq!(heap.lock().unwrap().allocated(), 0);
}

#[test]
fn test_instance_creation_fails_on_full_heap() {
    let backend = Arc::new(MockBackend::new());
    let heap = heap(&backend, 2);
    let result = ResourceBindingInstance::new(backend.clone(), heap, material_set(&backend));
    assert!(matches!(result, Err(Error::ResourceExhausted(_))));
}

#[test]
fn test_writes_reach_native_instance_and_track_states() {
    let backend = Arc::new(MockBackend::new());
    let heap = heap(&backend, 16);
    let instance = ResourceBindingInstance::new(backend.clone(), heap, material_set(&backend)).unwrap();

    let constants = buffer(&backend, BufferMode::Dynamic, BufferUsage::CONSTANT);
    let storage = buffer(&backend, BufferMode::Dynamic, BufferUsage::STORAGE);
    let texture = Arc::new(
        Texture::new(
            backend.as_ref(),
            TextureDesc {
                width: 8,
                height: 8,
                mip_levels: 2,
                ..Default::default()
            },
        )
        .unwrap(),
    );

    instance.set_constant_buffer(0, &constants).unwrap();
    assert!(!instance.is_complete());
    instance.set_texture(1, &texture).unwrap();
    instance.set_writable_structured_buffer(2, &storage).unwrap();
    assert!(instance.is_complete());

    let native = instance.native().as_any().downcast_ref::<MockBindingInstance>().unwrap();
    assert!(matches!(native.written(1), Some(DescriptorWrite::Texture { mip_count: 2, .. })));

    let bound = instance.bound_resources();
    assert_eq!(bound.len(), 3);
    assert_eq!(bound[0].required_state, ResourceState::VERTEX_AND_CONSTANT_BUFFER);
    assert_eq!(bound[1].subresources, vec![0, 1]);
    assert_eq!(bound[2].required_state, ResourceState::UNORDERED_ACCESS);
}

#[test]
fn test_write_validation() {
    let backend = Arc::new(MockBackend::new());
    let heap = heap(&backend, 16);
    let instance = ResourceBindingInstance::new(backend.clone(), heap, material_set(&backend)).unwrap();

    let volatile = buffer(&backend, BufferMode::Volatile, BufferUsage::CONSTANT);
    let vertex_only = buffer(&backend, BufferMode::Static, BufferUsage::VERTEX);
    let constants = buffer(&backend, BufferMode::Dynamic, BufferUsage::CONSTANT);

    // Volatile buffers never live in a descriptor table
    assert!(instance.set_constant_buffer(0, &volatile).is_err());
    assert!(instance.set_constant_buffer(0, &vertex_only).is_err());
    // Wrong binding type and undeclared binding
    assert!(instance.set_structured_buffer(0, &constants).is_err());
    assert!(instance.set_constant_buffer(7, &constants).is_err());
    assert!(instance.bound_resources().is_empty());
}
