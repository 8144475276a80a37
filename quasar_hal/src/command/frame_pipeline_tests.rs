//! Unit tests for frame_pipeline.rs

use crate::backend::mock::MockBackend;
use crate::command::{CommandListId, FramePipeline};
use crate::types::QueueType;

fn pipeline(backend: &MockBackend, slots: u32) -> FramePipeline {
    FramePipeline::new(backend, QueueType::Graphics, slots, 4096).unwrap()
}

#[test]
fn test_frames_map_to_slots_round_robin() {
    let backend = MockBackend::new();
    let frames = pipeline(&backend, 3);
    assert_eq!(frames.slot_count(), 3);
    assert_eq!(frames.slot_for(0), 0);
    assert_eq!(frames.slot_for(4), 1);
    assert!(FramePipeline::new(&backend, QueueType::Graphics, 0, 4096).is_err());
}

#[test]
fn test_slot_stays_busy_until_completion() {
    let backend = MockBackend::new();
    let mut frames = pipeline(&backend, 1);

    frames.begin_frame(0).unwrap();
    assert_eq!(frames.pending(0), Some((0, None)));
    assert!(frames.begin_frame(1).is_err());

    frames.finish_frame(0);
    frames.on_frame_submitted(0, 7).unwrap();
    assert_eq!(frames.pending(0), Some((0, Some(7))));

    frames.on_frame_completed(0).unwrap();
    assert_eq!(frames.pending(0), None);
    frames.begin_frame(1).unwrap();
    assert_eq!(backend.allocator_resets(), 2);
}

#[test]
fn test_frames_submit_in_finish_order() {
    let backend = MockBackend::new();
    let mut frames = pipeline(&backend, 2);

    frames.begin_frame(0).unwrap();
    frames.finish_frame(0);
    frames.begin_frame(1).unwrap();
    frames.finish_frame(1);

    assert_eq!(frames.unsubmitted_position(1), Some(1));
    assert!(frames.on_frame_submitted(1, 1).is_err());
    frames.on_frame_submitted(0, 1).unwrap();
    frames.on_frame_submitted(1, 2).unwrap();
    assert_eq!(frames.unsubmitted_position(1), None);
}

#[test]
fn test_completion_reclaims_ring_span() {
    let backend = MockBackend::new();
    let mut frames = pipeline(&backend, 2);

    frames.begin_frame(0).unwrap();
    frames.ring_mut().allocate(1000).unwrap();
    frames.finish_frame(0);
    assert_eq!(frames.ring().used(), 1024);

    frames.on_frame_submitted(0, 1).unwrap();
    frames.on_frame_completed(0).unwrap();
    assert_eq!(frames.ring().used(), 0);
    assert_eq!(frames.ring().pending_frames(), 0);
}

#[test]
fn test_cancel_releases_slot() {
    let backend = MockBackend::new();
    let mut frames = pipeline(&backend, 1);
    frames.begin_frame(0).unwrap();
    frames.cancel_frame(0);
    assert_eq!(frames.pending(0), None);
}

#[test]
fn test_deferred_discard_waits_for_older_frames() {
    let backend = MockBackend::new();
    let mut frames = pipeline(&backend, 2);
    let id = CommandListId::default();

    frames.begin_frame(0).unwrap();
    frames.finish_frame(0);
    frames.begin_frame(1).unwrap();
    frames.finish_frame(1);

    frames.defer_discard(1, id);
    frames.defer_discard(1, id);
    assert!(frames.is_discard_deferred(1));
    assert_eq!(frames.take_ready_discard(), None);

    frames.on_frame_submitted(0, 1).unwrap();
    assert_eq!(frames.take_ready_discard(), Some((1, id)));
    assert_eq!(frames.take_ready_discard(), None);
    assert!(!frames.is_discard_deferred(1));
}
