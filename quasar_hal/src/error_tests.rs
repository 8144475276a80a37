//! Unit tests for error.rs
//!
//! Tests Display, Debug, Clone and the std::error::Error impl for every variant.

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkCreateBuffer returned ERROR_DEVICE_LOST".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("ERROR_DEVICE_LOST"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("static buffer cannot be written".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("static buffer"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("ring buffer size is zero".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("ring buffer size is zero"));
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState("recorder is not recording".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Invalid state"));
    assert!(display.contains("not recording"));
}

#[test]
fn test_resource_exhausted_display() {
    let err = Error::ResourceExhausted("ring buffer full".to_string());
    assert_eq!(format!("{}", err), "Resource exhausted: ring buffer full");
}

#[test]
fn test_timeout_display() {
    let err = Error::Timeout("fence value 12".to_string());
    assert_eq!(format!("{}", err), "Timeout: fence value 12");
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    assert!(format!("{:?}", Error::BackendError("x".into())).contains("BackendError"));
    assert!(format!("{:?}", Error::InvalidState("x".into())).contains("InvalidState"));
    assert!(format!("{:?}", Error::ResourceExhausted("x".into())).contains("ResourceExhausted"));
    assert!(format!("{:?}", Error::Timeout("x".into())).contains("Timeout"));
}

#[test]
fn test_error_clone_and_eq() {
    let err = Error::InvalidResource("texture".to_string());
    let copy = err.clone();
    assert_eq!(err, copy);
    assert_ne!(err, Error::OutOfMemory);
}

// ============================================================================
// RESULT ALIAS
// ============================================================================

fn fails() -> Result<u32> {
    Err(Error::ResourceExhausted("heap".to_string()))
}

fn propagates() -> Result<u32> {
    let value = fails()?;
    Ok(value + 1)
}

#[test]
fn test_result_question_mark_propagates() {
    assert_eq!(propagates(), Err(Error::ResourceExhausted("heap".to_string())));
}

#[test]
fn test_poisoned_lock_maps_to_invalid_state() {
    let mutex = std::sync::Arc::new(std::sync::Mutex::new(0u32));
    let clone = mutex.clone();
    let _ = std::thread::spawn(move || {
        let _guard = clone.lock().unwrap();
        panic!("poison");
    })
    .join();

    let result: Result<()> = mutex.lock().map(|_| ()).map_err(Error::from);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}
