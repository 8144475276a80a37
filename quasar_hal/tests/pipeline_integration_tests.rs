//! Integration tests for the pipeline cache and its pass-format cache
//!
//! No GPU required.
//!
//! Run with: cargo test --test pipeline_integration_tests

use std::sync::Arc;

use quasar_hal::backend::mock::{MockBackend, MockPipeline};
use quasar_hal::quasar::pipeline::{
    BlendFactor, ColorBlendState, PipelineState, PipelineStateDesc, ShaderDesc, ShaderProgram,
};
use quasar_hal::quasar::resource::ResourceBindingLayout;
use quasar_hal::quasar::types::{Format, ShaderStage};
use quasar_hal::quasar::{Device, DeviceConfig, Error};

// ============================================================================
// HELPERS
// ============================================================================

fn create_device() -> (Arc<MockBackend>, Arc<Device>) {
    let backend = Arc::new(MockBackend::new());
    let device = Device::new(backend.clone(), DeviceConfig::default()).unwrap();
    (backend, device)
}

fn program(device: &Device) -> ShaderProgram {
    let desc = |stage| ShaderDesc {
        stage,
        code: vec![0x03, 0x02, 0x23, 0x07],
        entry_point: "main".to_string(),
        resource_slots: Vec::new(),
    };
    ShaderProgram::new(device.create_shader(&desc(ShaderStage::Vertex)).unwrap())
        .with_pixel(device.create_shader(&desc(ShaderStage::Pixel)).unwrap())
}

fn pass_format_of(pipeline: &PipelineState) -> Option<u64> {
    pipeline
        .native()
        .as_any()
        .downcast_ref::<MockPipeline>()
        .and_then(|mock| mock.pass_format)
}

fn empty_layout(device: &Device) -> Arc<ResourceBindingLayout> {
    device.create_binding_layout(Vec::new(), Vec::new()).unwrap()
}

// ============================================================================
// CACHE TESTS
// ============================================================================

#[test]
fn test_integration_blend_variants_share_pass_format() {
    let (backend, device) = create_device();
    let program = program(&device);
    let layout = empty_layout(&device);

    let opaque = PipelineStateDesc::default();
    let blended = PipelineStateDesc {
        color_blend: ColorBlendState {
            blend_enable: true,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            ..ColorBlendState::default()
        },
        ..PipelineStateDesc::default()
    };

    let a = device.create_pipeline(&opaque, &program, &layout).unwrap();
    let b = device.create_pipeline(&blended, &program, &layout).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(pass_format_of(&a), pass_format_of(&b));
    assert_eq!(backend.pipelines_created(), 2);
    assert_eq!(backend.pass_formats_created(), 1);
    assert_eq!(device.pipeline_cache_size().unwrap(), (2, 1));
}

#[test]
fn test_integration_new_attachment_formats_add_pass_format() {
    let (backend, device) = create_device();
    let program = program(&device);
    let layout = empty_layout(&device);

    let ldr = PipelineStateDesc::default();
    let hdr = PipelineStateDesc {
        color_formats: vec![Format::R16G16B16A16_FLOAT],
        depth_format: Format::D32_FLOAT,
        ..PipelineStateDesc::default()
    };

    let a = device.create_pipeline(&ldr, &program, &layout).unwrap();
    let b = device.create_pipeline(&hdr, &program, &layout).unwrap();
    let again = device.create_pipeline(&hdr, &program, &layout).unwrap();

    assert_ne!(pass_format_of(&a), pass_format_of(&b));
    assert!(Arc::ptr_eq(&b, &again));
    assert_eq!(backend.pass_formats_created(), 2);
}

#[test]
fn test_integration_failed_creation_is_retried_next_time() {
    let (backend, device) = create_device();
    let program = program(&device);
    let layout = empty_layout(&device);
    let state = PipelineStateDesc::default();

    backend.set_fail_pipeline_creation(true);
    assert!(matches!(
        device.create_pipeline(&state, &program, &layout),
        Err(Error::BackendError(_))
    ));
    assert_eq!(device.pipeline_cache_size().unwrap().0, 0);

    backend.set_fail_pipeline_creation(false);
    device.create_pipeline(&state, &program, &layout).unwrap();
    assert_eq!(device.pipeline_cache_size().unwrap().0, 1);
}
