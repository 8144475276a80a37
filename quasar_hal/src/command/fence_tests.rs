//! Unit tests for fence.rs

use std::time::Duration;

use crate::backend::mock::MockBackend;
use crate::command::Fence;
use crate::error::Error;

#[test]
fn test_signal_hands_out_increasing_values() {
    let backend = MockBackend::new();
    let fence = Fence::new(&backend).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(fence.signal(|_, value| {
            assert!(value > 0);
            Ok(())
        }).unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(fence.last_signaled(), 3);
}

#[test]
fn test_failed_submit_does_not_consume_value() {
    let backend = MockBackend::new();
    let fence = Fence::new(&backend).unwrap();

    let failed = fence.signal(|_, _| Err(Error::BackendError("queue lost".to_string())));
    assert!(failed.is_err());
    assert_eq!(fence.last_signaled(), 0);

    assert_eq!(fence.signal(|_, _| Ok(())).unwrap(), 1);
}

#[test]
fn test_wait_times_out_on_value_never_signaled() {
    let backend = MockBackend::new();
    let fence = Fence::new(&backend).unwrap();

    let result = fence.wait(1, Duration::from_millis(1));
    assert!(matches!(result, Err(Error::Timeout(_))));
}

#[test]
fn test_wait_returns_once_value_completes() {
    use crate::backend::GraphicsBackend;
    use crate::types::QueueType;

    let backend = MockBackend::new();
    let fence = Fence::new(&backend).unwrap();
    let value = fence
        .signal(|native, value| backend.signal(QueueType::Graphics, native, value))
        .unwrap();

    assert!(!fence.is_complete(value));
    fence.wait(value, Duration::from_millis(1)).unwrap();
    assert!(fence.is_complete(value));
    assert_eq!(backend.fence_waits(), 1);

    // Already complete: no native wait
    fence.wait(value, Duration::from_millis(1)).unwrap();
    assert_eq!(backend.fence_waits(), 1);
}
