//! Per-recording-scope resource state tracking

pub mod resource_state_cache;

pub use resource_state_cache::{ResourceStateCache, StateLeak};
