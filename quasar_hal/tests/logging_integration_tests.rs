//! Integration tests for HAL diagnostics routed through a custom logger
//!
//! No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests

use std::sync::{Arc, Mutex};

use quasar_hal::backend::mock::MockBackend;
use quasar_hal::quasar::log::{self, LogEntry, LogSeverity, Logger};
use quasar_hal::quasar::resource::TextureDesc;
use quasar_hal::quasar::types::{ResourceState, TextureUsage};
use quasar_hal::quasar::{CommandRecorder, Device, DeviceConfig};
use serial_test::serial;

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_device_creation_is_logged() {
    let (logger, entries) = TestLogger::new();
    log::set_logger(logger);

    let device = Device::new(Arc::new(MockBackend::new()), DeviceConfig::default()).unwrap();
    drop(device);

    let entries = entries.lock().unwrap();
    assert!(entries
        .iter()
        .any(|e| e.severity == LogSeverity::Info && e.source == "quasar::Device"));
    log::reset_logger();
}

#[test]
#[serial]
fn test_integration_state_leak_is_logged_with_location() {
    let (logger, entries) = TestLogger::new();
    log::set_logger(logger);

    let device = Device::new(Arc::new(MockBackend::new()), DeviceConfig::default()).unwrap();
    let texture = device
        .create_texture(TextureDesc {
            usage: TextureUsage::SHADER_READ | TextureUsage::SHADER_WRITE,
            ..TextureDesc::default()
        })
        .unwrap();
    let mut recorder = CommandRecorder::new(&device).unwrap();

    recorder.begin().unwrap();
    recorder
        .transition_texture(&texture, None, ResourceState::UNORDERED_ACCESS)
        .unwrap();
    assert!(recorder.finish().is_err());

    {
        let entries = entries.lock().unwrap();
        let errors: Vec<&LogEntry> = entries
            .iter()
            .filter(|e| e.severity == LogSeverity::Error)
            .collect();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| e.file.is_some() && e.line.is_some()));
        assert!(errors.iter().any(|e| e.message.contains("discarding")));
    }
    log::reset_logger();
}
