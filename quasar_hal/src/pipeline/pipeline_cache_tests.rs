//! Unit tests for pipeline_cache.rs

use std::sync::Arc;

use serial_test::serial;

use crate::backend::mock::{MockBackend, MockPipeline};
use crate::error::Error;
use crate::log::{self, LogSeverity};
use crate::pipeline::{
    PipelineCache, PipelineStateDesc, RasterizationState, CullMode, Shader, ShaderDesc,
    ShaderProgram,
};
use crate::resource::ResourceBindingLayout;
use crate::test_utils::CaptureLogger;
use crate::types::{Format, PrimitiveType, ShaderStage};

fn shader(backend: &MockBackend, stage: ShaderStage) -> Arc<Shader> {
    let desc = ShaderDesc {
        stage,
        code: vec![0x03, 0x02, 0x23, 0x07],
        entry_point: "main".to_string(),
        resource_slots: Vec::new(),
    };
    Arc::new(Shader::new(backend, &desc).unwrap())
}

fn layout(backend: &MockBackend) -> Arc<ResourceBindingLayout> {
    Arc::new(ResourceBindingLayout::new(backend, Vec::new(), Vec::new()).unwrap())
}

fn program(backend: &MockBackend) -> ShaderProgram {
    ShaderProgram::new(shader(backend, ShaderStage::Vertex)).with_pixel(shader(backend, ShaderStage::Pixel))
}

fn native_id(pipeline: &crate::pipeline::PipelineState) -> (u64, Option<u64>) {
    let mock = pipeline.native().as_any().downcast_ref::<MockPipeline>().unwrap();
    (mock.id, mock.pass_format)
}

#[test]
fn test_identical_requests_share_one_pipeline() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let program = program(&backend);
    let layout = layout(&backend);
    let state = PipelineStateDesc::default();

    let first = cache.get_or_create(&backend, &state, &program, &layout).unwrap();
    let second = cache.get_or_create(&backend, &state.clone(), &program.clone(), &layout).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.pipelines_created(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!((cache.hits(), cache.misses()), (1, 1));
}

#[test]
fn test_any_key_part_change_creates_new_pipeline() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let program = program(&backend);
    let layout = layout(&backend);
    let state = PipelineStateDesc::default();

    let base = cache.get_or_create(&backend, &state, &program, &layout).unwrap();

    let culled = PipelineStateDesc {
        rasterization: RasterizationState {
            cull_mode: CullMode::Front,
            ..state.rasterization
        },
        ..state.clone()
    };
    let other_state = cache.get_or_create(&backend, &culled, &program, &layout).unwrap();
    let other_layout = cache.get_or_create(&backend, &state, &program, &self::layout(&backend)).unwrap();
    let other_program = cache
        .get_or_create(&backend, &state, &self::program(&backend), &layout)
        .unwrap();

    assert!(!Arc::ptr_eq(&base, &other_state));
    assert!(!Arc::ptr_eq(&base, &other_layout));
    assert!(!Arc::ptr_eq(&base, &other_program));
    assert_eq!(cache.len(), 4);
    assert_eq!(backend.pipelines_created(), 4);
}

#[test]
fn test_pipelines_with_same_targets_share_pass_format() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let layout = layout(&backend);
    let state = PipelineStateDesc::default();

    let a = cache.get_or_create(&backend, &state, &program(&backend), &layout).unwrap();
    let b = cache.get_or_create(&backend, &state, &program(&backend), &layout).unwrap();
    assert_ne!(native_id(&a).0, native_id(&b).0);
    assert_eq!(native_id(&a).1, native_id(&b).1);
    assert!(Arc::ptr_eq(a.pass_format(), b.pass_format()));
    assert_eq!(backend.pass_formats_created(), 1);

    let hdr = PipelineStateDesc {
        color_formats: vec![Format::R16G16B16A16_FLOAT],
        depth_format: Format::D32_FLOAT,
        ..state
    };
    let c = cache.get_or_create(&backend, &hdr, &program(&backend), &layout).unwrap();
    assert_ne!(native_id(&a).1, native_id(&c).1);
    assert_eq!(cache.pass_formats().len(), 2);
    assert_eq!(cache.pass_formats().hits(), 1);
}

#[test]
#[serial]
fn test_failed_creation_is_logged_and_not_cached() {
    let capture = CaptureLogger::install();
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let program = program(&backend);
    let layout = layout(&backend);
    let state = PipelineStateDesc::default();

    backend.set_fail_pipeline_creation(true);
    let result = cache.get_or_create(&backend, &state, &program, &layout);
    assert!(matches!(result, Err(Error::BackendError(_))));
    assert!(cache.is_empty());
    assert!(capture.contains(LogSeverity::Error, "Pipeline creation failed"));

    backend.set_fail_pipeline_creation(false);
    let pipeline = cache.get_or_create(&backend, &state, &program, &layout).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(backend.pipelines_created(), 1);
    assert_eq!(pipeline.primitive_type(), PrimitiveType::Triangles);

    log::reset_logger();
}

#[test]
fn test_invalid_programs_are_rejected() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let layout = layout(&backend);
    let state = PipelineStateDesc::default();

    let no_vertex = ShaderProgram {
        pixel: Some(shader(&backend, ShaderStage::Pixel)),
        ..Default::default()
    };
    assert!(matches!(
        cache.get_or_create(&backend, &state, &no_vertex, &layout),
        Err(Error::InvalidResource(_))
    ));

    let swapped = ShaderProgram::new(shader(&backend, ShaderStage::Pixel));
    assert!(cache.get_or_create(&backend, &state, &swapped, &layout).is_err());

    let tessellated = program(&backend)
        .with_tessellation(shader(&backend, ShaderStage::Hull), shader(&backend, ShaderStage::Domain));
    assert!(cache.get_or_create(&backend, &state, &tessellated, &layout).is_err());

    let patches = PipelineStateDesc {
        primitive_type: PrimitiveType::Patch,
        patch_control_points: 3,
        ..state
    };
    assert!(cache.get_or_create(&backend, &patches, &tessellated, &layout).is_ok());
    assert_eq!(backend.pipelines_created(), 1);
}

#[test]
fn test_depth_format_in_color_list_is_rejected() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let state = PipelineStateDesc {
        color_formats: vec![Format::D32_FLOAT],
        ..Default::default()
    };
    assert!(cache.get_or_create(&backend, &state, &program(&backend), &layout(&backend)).is_err());
    assert_eq!(backend.pass_formats_created(), 0);
}

#[test]
fn test_compute_pipelines_cached_per_shader_and_layout() {
    let backend = MockBackend::new();
    let mut cache = PipelineCache::new();
    let compute = shader(&backend, ShaderStage::Compute);
    let layout = layout(&backend);

    let a = cache.get_or_create_compute(&backend, &compute, &layout).unwrap();
    let b = cache.get_or_create_compute(&backend, &compute, &layout).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.compute_len(), 1);
    assert_eq!(cache.len(), 0);

    let vertex = shader(&backend, ShaderStage::Vertex);
    assert!(cache.get_or_create_compute(&backend, &vertex, &layout).is_err());
    assert_eq!(cache.compute_len(), 1);
}
