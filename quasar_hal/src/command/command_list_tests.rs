//! Unit tests for command_list.rs

use std::sync::{Arc, Mutex};

use crate::backend::mock::MockBackend;
use crate::backend::{GraphicsBackend, NativeCommandList};
use crate::command::{CommandListManager, CommandListState, FramePipeline, FrameTicket};
use crate::types::QueueType;

fn ticket(backend: &MockBackend, frame_index: u64) -> FrameTicket {
    let pipeline = FramePipeline::new(backend, QueueType::Graphics, 2, 1024).unwrap();
    FrameTicket {
        pipeline: Arc::new(Mutex::new(pipeline)),
        frame_index,
    }
}

fn sealed_list(backend: &MockBackend) -> Box<dyn NativeCommandList> {
    let mut allocator = backend.create_command_allocator(QueueType::Graphics).unwrap();
    let mut list = allocator.begin_command_list().unwrap();
    list.close().unwrap();
    list
}

#[test]
fn test_list_walks_through_lifecycle() {
    let backend = MockBackend::new();
    let mut manager = CommandListManager::new();

    let id = manager.request(QueueType::Graphics, ticket(&backend, 0));
    assert_eq!(manager.state(id), Some(CommandListState::Recording));
    assert!(manager.native(id).is_none());

    manager.mark_recorded(id, sealed_list(&backend), Vec::new(), Vec::new()).unwrap();
    assert_eq!(manager.state(id), Some(CommandListState::Recorded));
    assert!(manager.native(id).is_some());

    manager.begin_execute(id, 4).unwrap();
    assert_eq!(manager.state(id), Some(CommandListState::Executing));
    assert_eq!(manager.fence_value(id), Some(4));

    assert!(manager.complete(3).is_empty());
    let retired = manager.complete(4);
    assert_eq!(retired.len(), 1);
    assert_eq!(manager.state(id), Some(CommandListState::Free));
}

#[test]
fn test_transitions_out_of_order_are_rejected() {
    let backend = MockBackend::new();
    let mut manager = CommandListManager::new();
    let id = manager.request(QueueType::Graphics, ticket(&backend, 0));

    assert!(manager.begin_execute(id, 1).is_err());
    manager.mark_recorded(id, sealed_list(&backend), Vec::new(), Vec::new()).unwrap();
    assert!(manager.mark_recorded(id, sealed_list(&backend), Vec::new(), Vec::new()).is_err());
}

#[test]
fn test_free_entries_are_pruned_on_next_request() {
    let backend = MockBackend::new();
    let mut manager = CommandListManager::new();

    let first = manager.request(QueueType::Graphics, ticket(&backend, 0));
    manager.mark_recorded(first, sealed_list(&backend), Vec::new(), Vec::new()).unwrap();
    manager.begin_execute(first, 1).unwrap();
    manager.complete(1);
    assert_eq!(manager.active_count(), 0);

    let second = manager.request(QueueType::Graphics, ticket(&backend, 1));
    assert_eq!(manager.state(first), None);
    assert_eq!(manager.state(second), Some(CommandListState::Recording));
}

#[test]
fn test_completion_returns_tickets_in_fence_order() {
    let backend = MockBackend::new();
    let mut manager = CommandListManager::new();

    let ids: Vec<_> = (0..3)
        .map(|frame| {
            let id = manager.request(QueueType::Graphics, ticket(&backend, frame));
            manager.mark_recorded(id, sealed_list(&backend), Vec::new(), Vec::new()).unwrap();
            id
        })
        .collect();
    manager.begin_execute(ids[2], 9).unwrap();
    manager.begin_execute(ids[0], 5).unwrap();
    manager.begin_execute(ids[1], 7).unwrap();
    assert_eq!(manager.executing_count(), 3);

    let frames: Vec<u64> = manager.complete(8).iter().map(|t| t.frame_index).collect();
    assert_eq!(frames, vec![0, 1]);
    assert_eq!(manager.executing_count(), 1);
}
