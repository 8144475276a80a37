//! Unit tests for texture.rs

use crate::backend::mock::{MockBackend, MockTexture};
use crate::resource::{Resource, Texture, TextureDesc, TextureRegion};
use crate::types::{Format, ResourceState, TextureUsage};

fn desc_with(usage: TextureUsage, format: Format) -> TextureDesc {
    TextureDesc {
        width: 64,
        height: 32,
        format,
        usage,
        ..Default::default()
    }
}

#[test]
fn test_default_state_priority() {
    let color = Format::R8G8B8A8_UNORM;
    let cases = [
        (TextureUsage::SHADER_READ | TextureUsage::RENDER_TARGET, color, ResourceState::SHADER_RESOURCE),
        (TextureUsage::RENDER_TARGET | TextureUsage::READBACK, color, ResourceState::RENDER_TARGET),
        (TextureUsage::DEPTH_STENCIL, Format::D32_FLOAT, ResourceState::DEPTH_WRITE),
        (TextureUsage::READBACK | TextureUsage::COPY_DEST, color, ResourceState::COPY_DEST),
        (TextureUsage::SHADER_WRITE, color, ResourceState::COMMON),
    ];
    for (usage, format, expected) in cases {
        assert_eq!(desc_with(usage, format).default_state(), expected, "{:?}", usage);
    }
}

#[test]
fn test_subresource_indexing() {
    let backend = MockBackend::new();
    let texture = Texture::new(
        &backend,
        TextureDesc {
            mip_levels: 4,
            array_layers: 3,
            ..desc_with(TextureUsage::SHADER_READ, Format::R8G8B8A8_UNORM)
        },
    )
    .unwrap();

    assert_eq!(texture.subresource_count(), 12);
    assert_eq!(texture.subresource_index(0, 0), 0);
    assert_eq!(texture.subresource_index(3, 0), 3);
    assert_eq!(texture.subresource_index(1, 2), 9);
    for sub in 0..12 {
        assert_eq!(texture.current_state(sub), ResourceState::SHADER_RESOURCE);
    }
}

#[test]
fn test_native_texture_starts_in_default_state() {
    let backend = MockBackend::new();
    let texture = Texture::new(&backend, desc_with(TextureUsage::DEPTH_STENCIL, Format::D24_UNORM_S8_UINT)).unwrap();
    let native = texture.native().as_any().downcast_ref::<MockTexture>().unwrap();
    assert_eq!(native.initial_state, ResourceState::DEPTH_WRITE);
    assert_eq!(native.width, 64);
}

#[test]
fn test_invalid_descriptions_are_rejected() {
    let backend = MockBackend::new();
    let base = desc_with(TextureUsage::SHADER_READ, Format::R8G8B8A8_UNORM);

    assert!(Texture::new(&backend, TextureDesc { width: 0, ..base.clone() }).is_err());
    assert!(Texture::new(&backend, TextureDesc { mip_levels: 0, ..base.clone() }).is_err());
    assert!(Texture::new(&backend, TextureDesc { format: Format::Unknown, ..base.clone() }).is_err());
    assert!(Texture::new(&backend, TextureDesc { sample_count: 3, ..base.clone() }).is_err());
    // Depth usage needs a depth format and the other way round
    assert!(Texture::new(&backend, desc_with(TextureUsage::DEPTH_STENCIL, Format::R32_FLOAT)).is_err());
    assert!(Texture::new(&backend, desc_with(TextureUsage::SHADER_READ, Format::D32_FLOAT)).is_err());
}

#[test]
fn test_region_validation_uses_mip_extent() {
    let backend = MockBackend::new();
    let texture = Texture::new(
        &backend,
        TextureDesc {
            mip_levels: 3,
            array_layers: 2,
            ..desc_with(TextureUsage::SHADER_READ, Format::R8G8B8A8_UNORM)
        },
    )
    .unwrap();

    assert_eq!(texture.mip_extent(1), (32, 16));
    assert!(texture.validate_region(&texture.full_region()).is_ok());

    let mip1 = TextureRegion { mip: 1, layer: 1, x: 16, y: 8, width: 16, height: 8 };
    assert!(texture.validate_region(&mip1).is_ok());
    assert!(texture.validate_region(&TextureRegion { width: 17, ..mip1 }).is_err());
    assert!(texture.validate_region(&TextureRegion { mip: 3, ..mip1 }).is_err());
    assert!(texture.validate_region(&TextureRegion { layer: 2, ..mip1 }).is_err());
    assert!(texture.validate_region(&TextureRegion { height: 0, ..mip1 }).is_err());
}

#[test]
fn test_region_row_pitch_is_aligned() {
    let region = TextureRegion { width: 10, height: 3, ..Default::default() };
    assert_eq!(region.row_size(Format::R8G8B8A8_UNORM), 40);
    assert_eq!(region.row_pitch(Format::R8G8B8A8_UNORM), 256);
    assert_eq!(region.buffer_size(Format::R8G8B8A8_UNORM), 256 * 2 + 40);

    let wide = TextureRegion { width: 64, height: 1, ..Default::default() };
    assert_eq!(wide.row_pitch(Format::R8G8B8A8_UNORM), 256);
    assert_eq!(wide.row_pitch(Format::R16G16B16A16_FLOAT), 512);
}
