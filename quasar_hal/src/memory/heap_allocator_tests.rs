//! Unit tests for heap_allocator.rs

use crate::backend::DescriptorHeapType;
use crate::error::Error;
use crate::log::{self, LogSeverity};
use crate::memory::heap_allocator::HeapAllocator;
use crate::test_utils::CaptureLogger;
use serial_test::serial;

fn heap(capacity: u32) -> HeapAllocator {
    HeapAllocator::new(DescriptorHeapType::CbvSrvUav, capacity)
}

/// Free everything still allocated so Drop stays quiet
fn release(mut heap: HeapAllocator, ranges: &[(u32, u32)]) {
    for &(offset, count) in ranges {
        heap.free(offset, count).unwrap();
    }
}

// ============================================================================
// ALLOCATE
// ============================================================================

#[test]
fn test_new_heap_is_empty() {
    let h = heap(100);
    assert_eq!(h.capacity(), 100);
    assert_eq!(h.allocated(), 0);
    assert_eq!(h.bitmap().len(), 2);
    assert!(h.bitmap().iter().all(|&w| w == 0));
}

#[test]
fn test_sequential_allocations() {
    let mut h = heap(16);
    assert_eq!(h.allocate(4), Some(0));
    assert_eq!(h.allocate(2), Some(4));
    assert_eq!(h.allocate(1), Some(6));
    assert_eq!(h.allocated(), 7);
    release(h, &[(0, 4), (4, 2), (6, 1)]);
}

#[test]
fn test_first_fit_reuses_lowest_hole() {
    let mut h = heap(16);
    let a = h.allocate(4).unwrap();
    let b = h.allocate(4).unwrap();
    h.free(a, 4).unwrap();

    assert_eq!(h.allocate(3), Some(0));
    // Hole of 1 at index 3 is too small for 2
    assert_eq!(h.allocate(2), Some(8));
    release(h, &[(0, 3), (b, 4), (8, 2)]);
}

#[test]
fn test_allocation_fails_when_exhausted() {
    let mut h = heap(8);
    assert_eq!(h.allocate(8), Some(0));
    assert_eq!(h.allocate(1), None);
    release(h, &[(0, 8)]);
}

#[test]
fn test_fragmented_heap_cannot_serve_large_run() {
    let mut h = heap(8);
    for i in 0..8 {
        assert_eq!(h.allocate(1), Some(i));
    }
    h.free(1, 1).unwrap();
    h.free(3, 1).unwrap();
    h.free(5, 1).unwrap();
    // 3 slots free but no 2 contiguous
    assert_eq!(h.allocate(2), None);
    release(h, &[(0, 1), (2, 1), (4, 1), (6, 2)]);
}

#[test]
fn test_zero_count_allocation_fails() {
    let mut h = heap(8);
    assert_eq!(h.allocate(0), None);
}

#[test]
fn test_run_crossing_word_boundary() {
    let mut h = heap(200);
    assert_eq!(h.allocate(60), Some(0));
    assert_eq!(h.allocate(10), Some(60));
    assert_eq!(h.bitmap()[0], u64::MAX);
    assert_eq!(h.bitmap()[1], 0b11_1111);
    release(h, &[(0, 60), (60, 10)]);
}

#[test]
fn test_full_words_are_skipped() {
    let mut h = heap(256);
    assert_eq!(h.allocate(128), Some(0));
    assert_eq!(h.allocate(5), Some(128));
    h.free(64, 64).unwrap();
    assert_eq!(h.allocate(64), Some(64));
    release(h, &[(0, 128), (128, 5)]);
}

// ============================================================================
// FREE
// ============================================================================

#[test]
fn test_allocate_then_free_restores_bitmap() {
    for k in [1u32, 3, 63, 64, 65, 130, 200] {
        let mut h = heap(200);
        let before = h.bitmap().to_vec();
        let offset = h.allocate(k).unwrap();
        h.free(offset, k).unwrap();
        assert_eq!(h.bitmap(), &before[..], "k = {}", k);
        assert_eq!(h.allocated(), 0);
    }
}

#[test]
fn test_allocate_then_free_restores_bitmap_on_busy_heap() {
    let mut h = heap(150);
    h.allocate(7).unwrap();
    h.allocate(70).unwrap();
    h.free(0, 7).unwrap();
    let before = h.bitmap().to_vec();
    let allocated_before = h.allocated();

    for k in [1u32, 7, 20, 73] {
        let offset = h.allocate(k).unwrap();
        h.free(offset, k).unwrap();
        assert_eq!(h.bitmap(), &before[..]);
        assert_eq!(h.allocated(), allocated_before);
    }
    release(h, &[(7, 70)]);
}

#[test]
#[serial]
fn test_double_free_is_rejected() {
    let capture = CaptureLogger::install();
    let mut h = heap(16);
    let offset = h.allocate(4).unwrap();
    h.free(offset, 4).unwrap();
    let result = h.free(offset, 4);
    let logged = capture.count(LogSeverity::Error);
    log::reset_logger();

    assert!(matches!(result, Err(Error::InvalidState(_))));
    assert_eq!(logged, 1);
    assert_eq!(h.allocated(), 0);
}

#[test]
#[serial]
fn test_partial_invalid_free_leaves_bitmap_untouched() {
    let capture = CaptureLogger::install();
    let mut h = heap(16);
    h.allocate(2).unwrap();
    let before = h.bitmap().to_vec();
    // Slot 2 is not allocated
    let result = h.free(0, 3);
    log::reset_logger();
    drop(capture);

    assert!(result.is_err());
    assert_eq!(h.bitmap(), &before[..]);
    release(h, &[(0, 2)]);
}

#[test]
#[serial]
fn test_free_out_of_range_is_rejected() {
    let _capture = CaptureLogger::install();
    let mut h = heap(16);
    let result = h.free(15, 2);
    log::reset_logger();
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[test]
#[serial]
fn test_drop_with_outstanding_allocations_logs_leak() {
    let capture = CaptureLogger::install();
    {
        let mut h = HeapAllocator::new(DescriptorHeapType::RenderTarget, 8);
        h.allocate(3).unwrap();
    }
    let leaked = capture.contains(LogSeverity::Warn, "still allocated");
    log::reset_logger();
    assert!(leaked);
}

#[test]
#[serial]
fn test_drop_of_empty_heap_is_silent() {
    let capture = CaptureLogger::install();
    {
        let mut h = heap(8);
        let offset = h.allocate(8).unwrap();
        h.free(offset, 8).unwrap();
    }
    let entries = capture.entries();
    log::reset_logger();
    assert!(entries.is_empty());
}
