//! Error types for device capability implementations.

use thiserror::Error;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors surfaced by device drivers.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Communication with the device failed (serial/USB round trip,
    /// relay board I/O, sensor read).
    #[error("device I/O failed: {0}")]
    Io(String),

    /// The requested selector port does not exist in the port map.
    #[error("unknown selector port: {0}")]
    UnknownPort(String),

    /// A commanded position or speed is outside the device's travel
    /// or speed range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The device does not implement this optional capability
    /// (e.g. a fixed-speed mixer asked to change rpm).
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}
