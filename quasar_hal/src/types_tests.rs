//! Unit tests for types.rs

use crate::types::*;

// ============================================================================
// RESOURCE STATE
// ============================================================================

#[test]
fn test_common_is_empty() {
    assert!(ResourceState::COMMON.is_empty());
}

#[test]
fn test_generic_read_composition() {
    let read = ResourceState::GENERIC_READ;
    assert!(read.contains(ResourceState::VERTEX_AND_CONSTANT_BUFFER));
    assert!(read.contains(ResourceState::INDEX_BUFFER));
    assert!(read.contains(ResourceState::PIXEL_SHADER_RESOURCE));
    assert!(read.contains(ResourceState::NON_PIXEL_SHADER_RESOURCE));
    assert!(read.contains(ResourceState::COPY_SOURCE));
    assert!(!read.contains(ResourceState::COPY_DEST));
}

#[test]
fn test_read_state_satisfies_contained_read() {
    assert!(ResourceState::GENERIC_READ.satisfies(ResourceState::VERTEX_AND_CONSTANT_BUFFER));
    assert!(ResourceState::SHADER_RESOURCE.satisfies(ResourceState::PIXEL_SHADER_RESOURCE));
}

#[test]
fn test_write_states_never_satisfy_others() {
    assert!(!ResourceState::COPY_DEST.satisfies(ResourceState::COPY_SOURCE));
    assert!(!ResourceState::RENDER_TARGET.satisfies(ResourceState::PIXEL_SHADER_RESOURCE));
    assert!(ResourceState::RENDER_TARGET.satisfies(ResourceState::RENDER_TARGET));
}

#[test]
fn test_common_requires_exact_match() {
    assert!(!ResourceState::GENERIC_READ.satisfies(ResourceState::COMMON));
    assert!(ResourceState::COMMON.satisfies(ResourceState::COMMON));
}

// ============================================================================
// FORMAT
// ============================================================================

#[test]
fn test_depth_formats() {
    assert!(Format::D32_FLOAT.is_depth());
    assert!(Format::D24_UNORM_S8_UINT.has_stencil());
    assert!(!Format::D32_FLOAT.has_stencil());
    assert!(!Format::R8G8B8A8_UNORM.is_depth());
}

#[test]
fn test_format_sizes() {
    assert_eq!(Format::R32G32B32_FLOAT.size_in_bytes(), 12);
    assert_eq!(Format::R16G16B16A16_FLOAT.size_in_bytes(), 8);
    assert_eq!(Format::Unknown.size_in_bytes(), 0);
}

#[test]
fn test_stage_to_flags() {
    assert_eq!(ShaderStageFlags::from(ShaderStage::Pixel), ShaderStageFlags::PIXEL);
    assert!(ShaderStageFlags::ALL_GRAPHICS.contains(ShaderStageFlags::VERTEX));
    assert!(!ShaderStageFlags::ALL_GRAPHICS.contains(ShaderStageFlags::COMPUTE));
}

#[test]
fn test_limits() {
    assert_eq!(MAX_VERTEX_BUFFERS, 4);
    assert_eq!(RING_BUFFER_ALIGNMENT, 256);
}
