//! Unit tests for config.rs

use crate::config::DeviceConfig;
use crate::error::Error;

#[test]
fn test_default_config_is_valid() {
    let config = DeviceConfig::default();
    assert_eq!(config.frames_in_flight, 3);
    assert_eq!(config.ring_buffer_size % 256, 0);
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_frames_in_flight_rejected() {
    let config = DeviceConfig { frames_in_flight: 0, ..Default::default() };
    assert!(matches!(config.validate(), Err(Error::InitializationFailed(_))));
}

#[test]
fn test_unaligned_ring_size_rejected() {
    let config = DeviceConfig { ring_buffer_size: 1000, ..Default::default() };
    let err = config.validate().unwrap_err();
    assert!(format!("{}", err).contains("ring_buffer_size"));
}

#[test]
fn test_empty_heap_rejected() {
    let config = DeviceConfig { dsv_heap_size: 0, ..Default::default() };
    let err = config.validate().unwrap_err();
    assert!(format!("{}", err).contains("dsv_heap_size"));
}
