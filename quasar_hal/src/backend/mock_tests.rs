//! Unit tests for mock.rs

use std::sync::Arc;
use std::time::Duration;

use crate::backend::mock::{object_id, MockBackend, MockBuffer, RecordedCommand};
use crate::backend::{GraphicsBackend, NativeBuffer, NativeCommandList};
use crate::resource::BufferDesc;
use crate::types::{BufferMode, BufferUsage, QueueType};

fn dynamic_desc(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        mode: BufferMode::Dynamic,
        usage: BufferUsage::CONSTANT,
    }
}

#[test]
fn test_object_ids_are_unique() {
    let a = MockBuffer::new(16);
    let b = MockBuffer::new(16);
    assert_ne!(a.id, b.id);
    assert_eq!(object_id(&a), a.id);
    assert_eq!(object_id(&42u32), 0);
}

#[test]
fn test_buffer_initial_data_is_readable() {
    let backend = MockBackend::new();
    let buffer = backend.create_buffer(&dynamic_desc(8), Some(&[1, 2, 3])).unwrap();
    let mut out = [0u8; 4];
    buffer.read(0, &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 0]);
    assert!(buffer.read(6, &mut out).is_err());
}

#[test]
fn test_fence_completes_only_when_driven() {
    let backend = MockBackend::new();
    let fence = backend.create_fence().unwrap();
    backend.signal(QueueType::Graphics, fence.as_ref(), 3).unwrap();
    assert_eq!(fence.completed_value(), 0);

    backend.complete_to(2);
    assert_eq!(fence.completed_value(), 2);

    backend.complete_all();
    assert_eq!(fence.completed_value(), 3);
}

#[test]
fn test_fence_wait_on_unsignalled_value_times_out() {
    let backend = MockBackend::new();
    let fence = backend.create_fence().unwrap();
    assert!(!fence.wait(1, Duration::from_millis(1)).unwrap());

    backend.signal(QueueType::Graphics, fence.as_ref(), 1).unwrap();
    assert!(fence.wait(1, Duration::from_millis(1)).unwrap());
    assert_eq!(fence.completed_value(), 1);
    assert_eq!(backend.fence_waits(), 2);
}

#[test]
fn test_submit_executes_copies_and_records_commands() {
    let backend = MockBackend::new();
    let src = backend.create_buffer(&dynamic_desc(8), Some(&[9; 8])).unwrap();
    let dest = backend.create_buffer(&dynamic_desc(8), None).unwrap();
    let fence = backend.create_fence().unwrap();

    let mut allocator = backend.create_command_allocator(QueueType::Graphics).unwrap();
    let mut list = allocator.begin_command_list().unwrap();
    list.copy_buffer_region(&dest, 2, &src, 0, 4);
    list.close().unwrap();

    let lists: [&dyn NativeCommandList; 1] = [list.as_ref()];
    backend.submit(QueueType::Graphics, &lists, fence.as_ref(), 1).unwrap();

    let mut out = [0u8; 8];
    dest.read(0, &mut out).unwrap();
    assert_eq!(out, [0, 0, 9, 9, 9, 9, 0, 0]);

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].fence_value, 1);
    assert!(matches!(
        submissions[0].lists[0][0],
        RecordedCommand::CopyBuffer { dest_offset: 2, size: 4, .. }
    ));
}

#[test]
fn test_submit_rejects_open_list() {
    let backend = MockBackend::new();
    let fence = backend.create_fence().unwrap();
    let mut allocator = backend.create_command_allocator(QueueType::Graphics).unwrap();
    let list = allocator.begin_command_list().unwrap();

    let lists: [&dyn NativeCommandList; 1] = [list.as_ref()];
    assert!(backend.submit(QueueType::Graphics, &lists, fence.as_ref(), 1).is_err());
    assert_eq!(fence.completed_value(), 0);
}

#[test]
fn test_injected_close_failure_hits_next_list_only() {
    let backend = MockBackend::new();
    let mut allocator = backend.create_command_allocator(QueueType::Graphics).unwrap();
    backend.fail_next_close();

    let mut first = allocator.begin_command_list().unwrap();
    let mut second = allocator.begin_command_list().unwrap();
    assert!(first.close().is_err());
    assert!(second.close().is_ok());
    assert!(second.close().is_err());
}

#[test]
fn test_shared_buffer_handle_sees_copies() {
    let backend = MockBackend::new();
    let buffer: Arc<dyn NativeBuffer> = backend.create_buffer(&dynamic_desc(4), Some(&[5; 4])).unwrap();
    let mock = buffer.as_any().downcast_ref::<MockBuffer>().unwrap();
    assert_eq!(mock.contents(), vec![5; 4]);
    assert_eq!(backend.buffers_created(), 1);
}
