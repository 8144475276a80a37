//! Unit tests for log.rs
//!
//! Tests LogSeverity, LogEntry, DefaultLogger and the process-wide logger macros.

use crate::error::{Error, Result};
use crate::log::{self, DefaultLogger, LogEntry, LogSeverity, Logger};
use crate::test_utils::CaptureLogger;
use serial_test::serial;
use std::time::SystemTime;

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_debug() {
    assert_eq!(format!("{:?}", LogSeverity::Trace), "Trace");
    assert_eq!(format!("{:?}", LogSeverity::Error), "Error");
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_with_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "quasar::RingBuffer".to_string(),
        message: "frame mismatch".to_string(),
        file: Some("ring_buffer.rs"),
        line: Some(42),
    };

    assert_eq!(entry.file, Some("ring_buffer.rs"));
    assert_eq!(entry.line, Some(42));
}

#[test]
fn test_default_logger_does_not_panic() {
    let logger = DefaultLogger;
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        logger.log(&LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: "quasar::test".to_string(),
            message: "message".to_string(),
            file: if severity == LogSeverity::Error { Some("file.rs") } else { None },
            line: if severity == LogSeverity::Error { Some(1) } else { None },
        });
    }
}

// ============================================================================
// GLOBAL LOGGER + MACROS
// ============================================================================

#[test]
#[serial]
fn test_macros_route_to_custom_logger() {
    let capture = CaptureLogger::install();

    crate::hal_trace!("quasar::test", "trace {}", 1);
    crate::hal_debug!("quasar::test", "debug {}", 2);
    crate::hal_info!("quasar::test", "info {}", 3);
    crate::hal_warn!("quasar::test", "warn {}", 4);
    crate::hal_error!("quasar::test", "error {}", 5);

    let entries = capture.entries();
    log::reset_logger();

    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].severity, LogSeverity::Trace);
    assert_eq!(entries[4].severity, LogSeverity::Error);
    assert_eq!(entries[4].message, "error 5");
    assert!(entries[4].file.is_some());
    assert!(entries[4].line.is_some());
    assert!(entries[3].file.is_none());
}

#[test]
#[serial]
fn test_hal_err_logs_and_builds_backend_error() {
    let capture = CaptureLogger::install();

    let err = crate::hal_err!("quasar::vulkan", "create failed: {}", "ERROR_OUT_OF_DATE");

    let entries = capture.entries();
    log::reset_logger();

    assert_eq!(err, Error::BackendError("create failed: ERROR_OUT_OF_DATE".to_string()));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, "quasar::vulkan");
}

fn bails(recording: bool) -> Result<u32> {
    if !recording {
        crate::hal_bail!("quasar::test", "not recording");
    }
    Ok(7)
}

#[test]
#[serial]
fn test_hal_bail_returns_invalid_state() {
    let capture = CaptureLogger::install();

    assert_eq!(bails(true), Ok(7));
    assert_eq!(bails(false), Err(Error::InvalidState("not recording".to_string())));

    let errors = capture.count(LogSeverity::Error);
    log::reset_logger();
    assert_eq!(errors, 1);
}
