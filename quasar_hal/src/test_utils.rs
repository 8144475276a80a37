//! Shared helpers for unit tests

use crate::log::{self, LogEntry, LogSeverity, Logger};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Logger that captures the entries logged by the installing thread
///
/// Installing it replaces the process-wide logger, so tests using it
/// must be `#[serial]` and call `log::reset_logger()` when done. Entries
/// from other threads (tests running in parallel) are ignored.
#[derive(Clone)]
pub struct CaptureLogger {
    thread: ThreadId,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl CaptureLogger {
    /// Install a fresh capture logger and return a handle to its entries
    pub fn install() -> Self {
        let capture = Self {
            thread: thread::current().id(),
            entries: Arc::new(Mutex::new(Vec::new())),
        };
        log::set_logger(capture.clone());
        capture
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, severity: LogSeverity) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn contains(&self, severity: LogSeverity, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.severity == severity && e.message.contains(needle))
    }
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        if thread::current().id() == self.thread {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }
}
