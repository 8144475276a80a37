//! Device fence: monotonically increasing GPU-to-CPU completion signal
//!
//! Every submission and every discarded list consumes the next value. The
//! value is only consumed when the native signal succeeds, so completed
//! values never skip over a value nothing will signal.

use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{GraphicsBackend, NativeFence};
use crate::error::{Error, Result};
use crate::hal_trace;

pub struct Fence {
    native: Box<dyn NativeFence>,
    last_signaled: Mutex<u64>,
}

impl Fence {
    pub fn new(backend: &dyn GraphicsBackend) -> Result<Self> {
        Ok(Self {
            native: backend.create_fence()?,
            last_signaled: Mutex::new(0),
        })
    }

    /// Run `submit` with the next fence value and commit that value on success
    ///
    /// The value lock is held across `submit` so values reach the queue in
    /// increasing order.
    pub fn signal<F>(&self, submit: F) -> Result<u64>
    where
        F: FnOnce(&dyn NativeFence, u64) -> Result<()>,
    {
        let mut last = self.last_signaled.lock()?;
        let value = *last + 1;
        submit(self.native.as_ref(), value)?;
        *last = value;
        hal_trace!("quasar::Fence", "Signaled value {}", value);
        Ok(value)
    }

    /// Highest value handed to the queue so far
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled.lock().map(|v| *v).unwrap_or(0)
    }

    /// Highest value the GPU has reached
    pub fn completed_value(&self) -> u64 {
        self.native.completed_value()
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Block until `value` completes
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the GPU does not reach `value` within `timeout`.
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<()> {
        if self.is_complete(value) {
            return Ok(());
        }
        if self.native.wait(value, timeout)? {
            Ok(())
        } else {
            Err(Error::Timeout(format!(
                "fence value {} not reached within {:?} (completed {})",
                value,
                timeout,
                self.completed_value()
            )))
        }
    }

    pub fn native(&self) -> &dyn NativeFence {
        self.native.as_ref()
    }
}

#[cfg(test)]
#[path = "fence_tests.rs"]
mod tests;
