//! Unit tests for device.rs

use std::sync::Arc;
use std::time::Duration;

use crate::backend::mock::MockBackend;
use crate::command::{CommandListState, CommandRecorder};
use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::Error;
use crate::pipeline::{PipelineStateDesc, ShaderDesc, ShaderProgram};
use crate::resource::{BindingDesc, BindingType, ResourceBindingSetDesc};
use crate::types::{ShaderStage, ShaderStageFlags};

fn test_config() -> DeviceConfig {
    DeviceConfig {
        frames_in_flight: 2,
        ring_buffer_size: 4096,
        cbv_srv_uav_heap_size: 64,
        rtv_heap_size: 8,
        dsv_heap_size: 4,
        fence_timeout: Duration::from_millis(10),
        ..DeviceConfig::default()
    }
}

fn setup() -> (Arc<MockBackend>, Arc<Device>) {
    let backend = Arc::new(MockBackend::new());
    let device = Device::new(backend.clone(), test_config()).unwrap();
    (backend, device)
}

fn shader_desc(stage: ShaderStage) -> ShaderDesc {
    ShaderDesc {
        stage,
        code: vec![0x03, 0x02, 0x23, 0x07],
        entry_point: "main".to_string(),
        resource_slots: Vec::new(),
    }
}

#[test]
fn test_new_rejects_invalid_config() {
    let backend = Arc::new(MockBackend::new());
    let config = DeviceConfig {
        frames_in_flight: 0,
        ..test_config()
    };
    assert!(matches!(Device::new(backend, config), Err(Error::InitializationFailed(_))));
}

#[test]
fn test_execute_without_lists_fails() {
    let (_backend, device) = setup();
    assert!(matches!(device.execute(&[]), Err(Error::InvalidState(_))));
}

#[test]
fn test_execute_hands_out_increasing_fence_values() {
    let (backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();

    recorder.begin().unwrap();
    let first = recorder.finish().unwrap();
    assert_eq!(device.command_list_state(first), Some(CommandListState::Recorded));
    assert_eq!(device.execute(&[first]).unwrap(), 1);
    assert_eq!(device.command_list_state(first), Some(CommandListState::Executing));

    recorder.begin().unwrap();
    let second = recorder.finish().unwrap();
    assert_eq!(device.execute(&[second]).unwrap(), 2);
    assert_eq!(backend.submissions().len(), 2);
    assert_eq!(device.last_fence_value(), 2);

    backend.complete_all();
    assert_eq!(device.poll_completions().unwrap(), 2);
    assert_eq!(device.completed_fence_value(), 2);
    assert_eq!(device.command_list_state(second), Some(CommandListState::Free));
}

#[test]
fn test_lists_of_one_recorder_submit_in_finish_order() {
    let (_backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();

    recorder.begin().unwrap();
    let older = recorder.finish().unwrap();
    recorder.begin().unwrap();
    let newer = recorder.finish().unwrap();

    assert!(matches!(device.execute(&[newer]), Err(Error::InvalidState(_))));
    assert!(matches!(device.execute(&[newer, older]), Err(Error::InvalidState(_))));
    assert_eq!(device.command_list_state(older), Some(CommandListState::Recorded));

    device.execute(&[older, newer]).unwrap();
    assert_eq!(device.command_list_state(newer), Some(CommandListState::Executing));
}

#[test]
fn test_lists_of_different_recorders_submit_in_any_order() {
    let (_backend, device) = setup();
    let mut first = CommandRecorder::new(&device).unwrap();
    let mut second = CommandRecorder::new(&device).unwrap();

    first.begin().unwrap();
    let a = first.finish().unwrap();
    second.begin().unwrap();
    let b = second.finish().unwrap();

    device.execute(&[b]).unwrap();
    device.execute(&[a]).unwrap();
}

#[test]
fn test_same_list_cannot_be_submitted_twice() {
    let (_backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    let id = recorder.finish().unwrap();

    assert!(device.execute(&[id, id]).is_err());
    device.execute(&[id]).unwrap();
    assert!(device.execute(&[id]).is_err());
}

#[test]
fn test_recording_list_cannot_be_executed() {
    let (_backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    let id = recorder.current_list().unwrap();

    assert_eq!(device.command_list_state(id), Some(CommandListState::Recording));
    assert!(matches!(device.execute(&[id]), Err(Error::InvalidState(_))));
    recorder.finish().unwrap();
}

#[test]
fn test_discard_signals_without_submitting() {
    let (backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    let id = recorder.finish().unwrap();

    let value = device.discard(id).unwrap().unwrap();
    assert!(backend.submissions().is_empty());
    assert_eq!(backend.signals(), vec![value]);
    assert_eq!(device.command_list_state(id), Some(CommandListState::Executing));

    backend.complete_all();
    assert_eq!(device.poll_completions().unwrap(), 1);
}

#[test]
fn test_discard_behind_unsubmitted_frame_is_deferred() {
    let (backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    let older = recorder.finish().unwrap();
    recorder.begin().unwrap();
    let newer = recorder.finish().unwrap();

    assert_eq!(device.discard(newer).unwrap(), None);
    assert!(backend.signals().is_empty());
    assert_eq!(device.command_list_state(newer), Some(CommandListState::Recorded));
    assert!(matches!(device.discard(newer), Err(Error::InvalidState(_))));
    assert!(matches!(device.execute(&[newer]), Err(Error::InvalidState(_))));

    let value = device.execute(&[older]).unwrap();
    let signals = backend.signals();
    assert_eq!(signals.len(), 1);
    assert!(signals[0] > value);
    assert_eq!(device.command_list_state(newer), Some(CommandListState::Executing));

    backend.complete_all();
    assert_eq!(device.poll_completions().unwrap(), 2);
}

#[test]
fn test_deferred_discards_retire_in_chain() {
    let (backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    recorder.begin().unwrap();
    let first = recorder.finish().unwrap();
    recorder.begin().unwrap();
    let second = recorder.finish().unwrap();

    assert_eq!(device.discard(second).unwrap(), None);
    let value = device.discard(first).unwrap().unwrap();

    assert_eq!(backend.signals(), vec![value, value + 1]);
    assert_eq!(device.command_list_state(second), Some(CommandListState::Executing));
    backend.complete_all();
    assert_eq!(device.poll_completions().unwrap(), 2);
}

#[test]
fn test_wait_for_unsignaled_value_times_out() {
    let (_backend, device) = setup();
    assert!(matches!(device.wait_for_fence(1), Err(Error::Timeout(_))));
}

#[test]
fn test_wait_idle_retires_everything() {
    let (_backend, device) = setup();
    let mut recorder = CommandRecorder::new(&device).unwrap();
    for _ in 0..2 {
        recorder.begin().unwrap();
        let id = recorder.finish().unwrap();
        device.execute(&[id]).unwrap();
    }

    device.wait_idle().unwrap();
    assert_eq!(device.completed_fence_value(), 2);
    assert_eq!(recorder.ring_used().unwrap(), 0);
}

#[test]
fn test_pipelines_are_cached_per_device() {
    let (backend, device) = setup();
    let program = ShaderProgram::new(device.create_shader(&shader_desc(ShaderStage::Vertex)).unwrap())
        .with_pixel(device.create_shader(&shader_desc(ShaderStage::Pixel)).unwrap());
    let layout = device.create_binding_layout(Vec::new(), Vec::new()).unwrap();
    let state = PipelineStateDesc::default();

    let first = device.create_pipeline(&state, &program, &layout).unwrap();
    let second = device.create_pipeline(&state, &program, &layout).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.pipelines_created(), 1);
    assert_eq!(device.pipeline_cache_size().unwrap(), (1, 1));
}

#[test]
fn test_binding_instances_take_heap_slots_until_dropped() {
    let (_backend, device) = setup();
    let set = device
        .create_binding_set(ResourceBindingSetDesc {
            bindings: vec![
                BindingDesc {
                    binding: 0,
                    binding_type: BindingType::ConstantBuffer,
                    stages: ShaderStageFlags::ALL_GRAPHICS,
                },
                BindingDesc {
                    binding: 1,
                    binding_type: BindingType::Texture,
                    stages: ShaderStageFlags::PIXEL,
                },
            ],
        })
        .unwrap();

    let instance = device.create_binding_instance(&set).unwrap();
    assert_eq!(device.cbv_srv_uav_heap().lock().unwrap().allocated(), 2);

    drop(instance);
    assert_eq!(device.cbv_srv_uav_heap().lock().unwrap().allocated(), 0);
}
