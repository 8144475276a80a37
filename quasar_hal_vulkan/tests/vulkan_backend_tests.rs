//! GPU tests for the Vulkan backend
//!
//! These tests drive a real Vulkan 1.3 device through the HAL.
//! All tests require a GPU and are marked with #[ignore].
//!
//! Run with: cargo test -p quasar_hal_vulkan --test vulkan_backend_tests -- --ignored

use std::sync::Arc;
use std::time::Duration;

use quasar_hal::backend::{GraphicsBackend, NativeFence};
use quasar_hal::glam::Vec4;
use quasar_hal::quasar::pipeline::ShaderDesc;
use quasar_hal::quasar::resource::{
    BufferDesc, RenderTargetAttachment, RenderTargetDesc, TextureDesc, TextureRegion,
};
use quasar_hal::quasar::types::{BufferMode, BufferUsage, ClearFlags, Format, ShaderStage, TextureUsage};
use quasar_hal::quasar::{CommandRecorder, Device, DeviceConfig, Error};
use quasar_hal_vulkan::VulkanBackend;

fn test_config() -> DeviceConfig {
    DeviceConfig {
        frames_in_flight: 2,
        ring_buffer_size: 1024 * 1024,
        cbv_srv_uav_heap_size: 1024,
        rtv_heap_size: 64,
        dsv_heap_size: 16,
        app_name: "quasar_hal_vulkan tests".to_string(),
        ..Default::default()
    }
}

fn create_device() -> Arc<Device> {
    let config = test_config();
    let backend = VulkanBackend::new(&config).unwrap();
    Device::new(Arc::new(backend), config).unwrap()
}

fn readback_buffer(device: &Arc<Device>, size: u64) -> Arc<quasar_hal::quasar::resource::Buffer> {
    device
        .create_buffer(
            BufferDesc {
                size,
                mode: BufferMode::Readback,
                usage: BufferUsage::COPY_DEST,
            },
            None,
        )
        .unwrap()
}

// ============================================================================
// DEVICE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_backend() {
    let backend = VulkanBackend::new(&test_config()).unwrap();

    assert_eq!(backend.name(), "vulkan");
    assert!(!backend.device_name().is_empty());
    backend.wait_idle().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_empty_frame_round_trip() {
    let device = create_device();
    let mut recorder = CommandRecorder::new(&device).unwrap();

    recorder.begin().unwrap();
    let list = recorder.finish().unwrap();
    let value = device.execute(&[list]).unwrap();
    device.wait_for_fence(value).unwrap();

    assert!(device.completed_fence_value() >= value);
}

// ============================================================================
// FENCE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_timeline_fence_signal_and_timeout() {
    let backend = VulkanBackend::new(&test_config()).unwrap();
    let fence = backend.create_fence().unwrap();
    let queue = quasar_hal::quasar::types::QueueType::Graphics;

    assert_eq!(fence.completed_value(), 0);
    backend.signal(queue, fence.as_ref(), 5).unwrap();

    assert!(fence.wait(5, Duration::from_secs(5)).unwrap());
    assert!(fence.completed_value() >= 5);
    assert!(!fence.wait(10, Duration::from_millis(1)).unwrap());
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_static_buffer_initial_data_reads_back() {
    let device = create_device();
    let data: Vec<u8> = (0..64u8).collect();
    let source = device
        .create_buffer(
            BufferDesc {
                size: 64,
                mode: BufferMode::Static,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_SOURCE,
            },
            Some(&data),
        )
        .unwrap();
    let readback = readback_buffer(&device, 64);

    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    recorder.copy_buffer(&source, &readback, 64, 0, 0).unwrap();
    let list = recorder.finish().unwrap();
    let value = device.execute(&[list]).unwrap();
    device.wait_for_fence(value).unwrap();

    let mut out = vec![0u8; 64];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_dynamic_buffer_write_then_copy() {
    let device = create_device();
    let dynamic = device
        .create_buffer(
            BufferDesc {
                size: 256,
                mode: BufferMode::Dynamic,
                usage: BufferUsage::CONSTANT | BufferUsage::COPY_SOURCE,
            },
            None,
        )
        .unwrap();
    let readback = readback_buffer(&device, 16);

    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    recorder.write_buffer(&dynamic, 32, &[7u8; 16]).unwrap();
    recorder.copy_buffer(&dynamic, &readback, 16, 32, 0).unwrap();
    let list = recorder.finish().unwrap();
    let value = device.execute(&[list]).unwrap();
    device.wait_for_fence(value).unwrap();

    let mut out = [0u8; 16];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, [7u8; 16]);
}

// ============================================================================
// RENDER TARGET TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_clear_color_and_depth_target() {
    let device = create_device();
    let color = device
        .create_texture(TextureDesc {
            width: 64,
            height: 64,
            format: Format::R8G8B8A8_UNORM,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
            ..Default::default()
        })
        .unwrap();
    let depth = device
        .create_texture(TextureDesc {
            width: 64,
            height: 64,
            format: Format::D24_UNORM_S8_UINT,
            usage: TextureUsage::DEPTH_STENCIL,
            ..Default::default()
        })
        .unwrap();
    let target = device
        .create_render_target(RenderTargetDesc {
            colors: vec![RenderTargetAttachment::new(color)],
            depth: Some(RenderTargetAttachment::new(depth)),
        })
        .unwrap();

    let mut recorder = CommandRecorder::new(&device).unwrap();
    for _ in 0..3 {
        recorder.begin().unwrap();
        recorder.begin_debug_group("clear").unwrap();
        recorder.set_render_target(Some(&target)).unwrap();
        recorder
            .clear(
                ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL,
                &[Vec4::new(0.1, 0.2, 0.3, 1.0)],
                1.0,
                0,
            )
            .unwrap();
        recorder.set_render_target(None).unwrap();
        recorder.end_debug_group().unwrap();
        let list = recorder.finish().unwrap();
        device.execute(&[list]).unwrap();
    }
    device.wait_idle().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_texture_copy_between_mipmapped_textures() {
    let device = create_device();
    let desc = TextureDesc {
        width: 128,
        height: 128,
        format: Format::R8G8B8A8_UNORM,
        mip_levels: 4,
        array_layers: 2,
        usage: TextureUsage::SHADER_READ | TextureUsage::COPY_SOURCE | TextureUsage::COPY_DEST,
        ..Default::default()
    };
    let src = device.create_texture(desc.clone()).unwrap();
    let dest = device.create_texture(desc).unwrap();

    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    recorder.copy_texture(&src, &dest).unwrap();
    let list = recorder.finish().unwrap();
    let value = device.execute(&[list]).unwrap();
    device.wait_for_fence(value).unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_texture_region_upload_reads_back() {
    let device = create_device();
    let texture = device
        .create_texture(TextureDesc {
            width: 64,
            height: 64,
            format: Format::R8G8B8A8_UNORM,
            mip_levels: 2,
            array_layers: 2,
            usage: TextureUsage::SHADER_READ | TextureUsage::COPY_SOURCE | TextureUsage::COPY_DEST,
            ..Default::default()
        })
        .unwrap();
    let region = TextureRegion { mip: 1, layer: 1, x: 4, y: 2, width: 10, height: 3 };
    // 40 byte rows packed 48 bytes apart
    let data: Vec<u8> = (0..48 * 3).map(|i| i as u8).collect();
    let readback = readback_buffer(&device, region.buffer_size(Format::R8G8B8A8_UNORM));

    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    recorder.write_texture(&texture, &data, Some(&region), 48).unwrap();
    recorder.copy_texture_to_buffer(&texture, &readback, Some(&region), 0).unwrap();
    let list = recorder.finish().unwrap();
    let value = device.execute(&[list]).unwrap();
    device.wait_for_fence(value).unwrap();

    for row in 0..3usize {
        let mut out = [0u8; 40];
        readback.read(row as u64 * 256, &mut out).unwrap();
        assert_eq!(&out[..], &data[row * 48..row * 48 + 40], "row {}", row);
    }
}

// ============================================================================
// SHADER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_shader_rejects_non_spirv_code() {
    let device = create_device();
    let desc = ShaderDesc {
        stage: ShaderStage::Vertex,
        code: vec![1, 2, 3],
        entry_point: "main".to_string(),
        resource_slots: Vec::new(),
    };

    let result = device.create_shader(&desc);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}
