//! Error types for the Quasar HAL
//!
//! Every fallible operation in the HAL returns [`Result`]. Errors fall into
//! three families:
//! - contract violations (`InvalidState`): an operation called outside the
//!   state it requires, or a resource left in a non-default state
//! - capacity exhaustion (`ResourceExhausted`, `OutOfMemory`): ring buffer,
//!   descriptor heap or allocator pool is full; never grown implicitly
//! - native failures (`BackendError`, `InitializationFailed`): the driver
//!   refused to create or submit something

use std::fmt;
use std::sync::PoisonError;

/// Result type for HAL operations
pub type Result<T> = std::result::Result<T, Error>;

/// HAL errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock, ...)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource or invalid resource usage (buffer, texture, shader, ...)
    InvalidResource(String),

    /// Initialization failed (device, backend, ring buffer, heaps)
    InitializationFailed(String),

    /// Operation called in a state that does not allow it
    InvalidState(String),

    /// Fixed-capacity pool exhausted (ring buffer, descriptor heap)
    ResourceExhausted(String),

    /// Waiting on the GPU took longer than the configured timeout
    Timeout(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::InvalidState("lock poisoned by a panicking thread".to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
