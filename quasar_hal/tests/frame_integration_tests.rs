//! Integration tests for frame recording, submission and completion
//!
//! These tests drive the public API against the mock backend.
//! No GPU required.
//!
//! Run with: cargo test --test frame_integration_tests

use std::sync::Arc;
use std::time::Duration;

use quasar_hal::backend::mock::{MockBackend, RecordedCommand};
use quasar_hal::quasar::pipeline::{PipelineStateDesc, ShaderDesc, ShaderProgram};
use quasar_hal::quasar::resource::{
    Buffer, BufferDesc, RenderTargetAttachment, RenderTargetDesc, TextureDesc, VolatileCBufferBinding,
};
use quasar_hal::quasar::types::{
    BufferMode, BufferUsage, ClearFlags, Format, PipelineType, ShaderStage, ShaderStageFlags, TextureUsage,
};
use quasar_hal::quasar::{CommandListState, CommandRecorder, Device, DeviceConfig, Error};

// ============================================================================
// HELPERS
// ============================================================================

fn create_device(frames_in_flight: u32, ring_buffer_size: u64) -> (Arc<MockBackend>, Arc<Device>) {
    let backend = Arc::new(MockBackend::new());
    let config = DeviceConfig {
        frames_in_flight,
        ring_buffer_size,
        fence_timeout: Duration::from_millis(50),
        ..DeviceConfig::default()
    };
    let device = Device::new(backend.clone(), config).expect("device creation");
    (backend, device)
}

fn constants(device: &Device, size: u64) -> Arc<Buffer> {
    device
        .create_buffer(
            BufferDesc {
                size,
                mode: BufferMode::Volatile,
                usage: BufferUsage::CONSTANT,
            },
            None,
        )
        .expect("volatile buffer")
}

fn shader(stage: ShaderStage) -> ShaderDesc {
    ShaderDesc {
        stage,
        code: vec![0x03, 0x02, 0x23, 0x07],
        entry_point: "main".to_string(),
        resource_slots: vec![("Globals".to_string(), 0)],
    }
}

// ============================================================================
// FRAME LOOP TESTS
// ============================================================================

#[test]
fn test_integration_frame_loop_draws_and_retires() {
    let (backend, device) = create_device(2, 64 * 1024);
    let mut recorder = CommandRecorder::new(&device).unwrap();

    let color = device
        .create_texture(TextureDesc {
            width: 128,
            height: 128,
            format: Format::B8G8R8A8_UNORM,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
            ..TextureDesc::default()
        })
        .unwrap();
    let target = device
        .create_render_target(RenderTargetDesc {
            colors: vec![RenderTargetAttachment::new(color)],
            depth: None,
        })
        .unwrap();

    let layout = device
        .create_binding_layout(
            Vec::new(),
            vec![VolatileCBufferBinding {
                slot: 0,
                stages: ShaderStageFlags::VERTEX | ShaderStageFlags::PIXEL,
            }],
        )
        .unwrap();
    let program = ShaderProgram::new(device.create_shader(&shader(ShaderStage::Vertex)).unwrap())
        .with_pixel(device.create_shader(&shader(ShaderStage::Pixel)).unwrap());
    let state = PipelineStateDesc {
        color_formats: vec![Format::B8G8R8A8_UNORM],
        ..PipelineStateDesc::default()
    };
    let pipeline = device.create_pipeline(&state, &program, &layout).unwrap();
    let globals = constants(&device, 256);

    let mut fence_values = Vec::new();
    for frame in 0..6u32 {
        recorder.begin().unwrap();
        recorder.set_render_target(Some(&target)).unwrap();
        recorder
            .clear(ClearFlags::COLOR, &[glam::Vec4::new(0.0, 0.0, 0.0, 1.0)], 1.0, 0)
            .unwrap();
        recorder.set_pipeline_state(&pipeline).unwrap();
        recorder.bind_volatile_cbuffer(PipelineType::Graphics, 0, &globals).unwrap();
        recorder.write_buffer_pod(&globals, 0, &[frame as f32; 64]).unwrap();
        recorder.draw(3, 1, 0, 0).unwrap();
        let list = recorder.finish().unwrap();

        fence_values.push(device.execute(&[list]).unwrap());
    }

    assert_eq!(fence_values, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(backend.submissions().len(), 6);
    // Frames 2..6 each waited for the frame two slots back
    assert_eq!(backend.fence_waits(), 4);

    device.wait_idle().unwrap();
    assert_eq!(device.completed_fence_value(), 6);
    assert_eq!(recorder.ring_used().unwrap(), 0);
}

#[test]
fn test_integration_volatile_rebinding_follows_latest_write() {
    let (backend, device) = create_device(2, 64 * 1024);
    let mut recorder = CommandRecorder::new(&device).unwrap();
    let layout = device
        .create_binding_layout(
            Vec::new(),
            vec![
                VolatileCBufferBinding { slot: 0, stages: ShaderStageFlags::VERTEX },
                VolatileCBufferBinding { slot: 2, stages: ShaderStageFlags::PIXEL },
            ],
        )
        .unwrap();
    let shared = constants(&device, 128);

    recorder.begin().unwrap();
    recorder.set_resource_binding_layout(PipelineType::Graphics, &layout).unwrap();
    recorder.bind_volatile_cbuffer(PipelineType::Graphics, 0, &shared).unwrap();
    recorder.bind_volatile_cbuffer(PipelineType::Graphics, 2, &shared).unwrap();

    for value in 0..3u8 {
        recorder.write_buffer(&shared, 0, &[value; 128]).unwrap();
    }
    let latest = recorder.volatile_offset(&shared).unwrap();
    recorder.finish().unwrap();

    let bound: Vec<(u32, u64)> = backend
        .last_commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetConstantBuffer { root_index, offset, .. } => Some((*root_index, *offset)),
            _ => None,
        })
        .collect();
    assert_eq!(bound.len(), 6);
    assert_eq!(&bound[4..], &[(0, latest), (2, latest)]);
}

#[test]
fn test_integration_two_recorders_share_one_queue() {
    let (backend, device) = create_device(2, 4096);
    let mut main = CommandRecorder::new(&device).unwrap();
    let mut worker = CommandRecorder::new(&device).unwrap();

    main.begin().unwrap();
    worker.begin().unwrap();
    let worker_list = worker.finish().unwrap();
    let main_list = main.finish().unwrap();

    let value = device.execute(&[main_list, worker_list]).unwrap();
    assert_eq!(backend.submissions()[0].lists.len(), 2);
    assert_eq!(device.command_list_state(main_list), Some(CommandListState::Executing));

    backend.complete_to(value);
    assert_eq!(device.poll_completions().unwrap(), 2);
}

#[test]
fn test_integration_unsubmitted_frames_block_slot_reuse() {
    let (_backend, device) = create_device(1, 4096);
    let mut recorder = CommandRecorder::new(&device).unwrap();

    recorder.begin().unwrap();
    let list = recorder.finish().unwrap();
    assert!(matches!(recorder.begin(), Err(Error::InvalidState(_))));

    device.discard(list).unwrap();
    recorder.begin().unwrap();
    recorder.finish().unwrap();
}

#[test]
fn test_integration_ring_exhaustion_recovers_after_completion() {
    let (backend, device) = create_device(2, 1024);
    let mut recorder = CommandRecorder::new(&device).unwrap();
    let big = constants(&device, 768);

    recorder.begin().unwrap();
    recorder.write_buffer(&big, 0, &[1; 768]).unwrap();
    let list = recorder.finish().unwrap();
    device.execute(&[list]).unwrap();

    recorder.begin().unwrap();
    let error = recorder.write_buffer(&big, 0, &[2; 768]).unwrap_err();
    assert!(matches!(error, Error::ResourceExhausted(_)));

    backend.complete_all();
    device.poll_completions().unwrap();
    recorder.write_buffer(&big, 0, &[2; 768]).unwrap();
    recorder.finish().unwrap();
}
