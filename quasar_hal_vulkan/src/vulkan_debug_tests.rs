//! Unit tests for the validation message routing
//!
//! The callback is invoked directly with hand-built callback data, no GPU needed.

use super::*;
use quasar_hal::log::{LogEntry, Logger};
use serial_test::serial;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn invoke(severity: vk::DebugUtilsMessageSeverityFlagsEXT, message: &CStr) -> vk::Bool32 {
    let data = vk::DebugUtilsMessengerCallbackDataEXT::default()
        .message_id_name(c"VUID-test")
        .message(message);
    unsafe {
        vulkan_debug_callback(
            severity,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            &data,
            std::ptr::null_mut(),
        )
    }
}

#[test]
fn test_log_severity_mapping() {
    assert_eq!(log_severity(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), LogSeverity::Error);
    assert_eq!(log_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), LogSeverity::Warn);
    assert_eq!(log_severity(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), LogSeverity::Info);
    assert_eq!(log_severity(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), LogSeverity::Debug);
}

#[test]
fn test_severity_flags_include_everything_above_minimum() {
    let warn = severity_flags(LogSeverity::Warn);
    assert!(warn.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
    assert!(warn.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
    assert!(!warn.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));

    assert_eq!(severity_flags(LogSeverity::Error), vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
    assert!(severity_flags(LogSeverity::Trace).contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
}

#[test]
#[serial]
fn test_callback_routes_messages_into_logger() {
    let logger = TestLogger::default();
    log::set_logger(logger.clone());
    init_debug_config(DebugConfig::default());

    assert_eq!(invoke(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, c"image layout mismatch"), vk::FALSE);
    invoke(vk::DebugUtilsMessageSeverityFlagsEXT::INFO, c"below minimum");

    let entries = logger.entries.lock().unwrap().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, LogSeverity::Error);
    assert_eq!(entries[0].source, "quasar::vulkan::validation");
    assert!(entries[0].message.contains("VUID-test"));
    assert!(entries[0].message.contains("image layout mismatch"));
    assert_eq!(get_validation_stats().errors, 1);
    assert_eq!(get_validation_stats().total(), 1);

    cleanup_debug_config();
    log::reset_logger();
}

#[test]
#[serial]
fn test_callback_ignored_without_config() {
    let logger = TestLogger::default();
    log::set_logger(logger.clone());
    cleanup_debug_config();

    invoke(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, c"late message");
    assert!(logger.entries.lock().unwrap().is_empty());

    log::reset_logger();
}
