use std::io;

use thiserror::Error;

use crate::session::SessionState;

/// Failure to open the serial link to a device.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("device already open on '{current}'; close it before opening '{requested}'")]
    Busy { current: String, requested: String },
    #[error("device unavailable at '{locator}': {source}")]
    DeviceUnavailable {
        locator: String,
        #[source]
        source: serialport::Error,
    },
    #[error("invalid device locator: '{0}'")]
    InvalidLocator(String),
}

/// Failure to decode an inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: got {actual} of {expected} bytes")]
    Truncated { expected: usize, actual: usize },
    #[error("malformed frame: expected marker {expected:#04x}, found {found:#04x}")]
    Malformed { expected: u8, found: u8 },
}

/// Failure in the sensor buffer store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer allocation failed for {sensors} sensors x {window_points} points")]
    Allocation { sensors: usize, window_points: usize },
    #[error("shape mismatch: reading has {got} values, buffers hold {expected} sensors")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Failure while talking over an established session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("'{operation}' requires an open link (state: {state})")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Umbrella error for the acquisition core.
#[derive(Debug, Error)]
pub enum AcqError {
    #[error("open error: {0}")]
    Open(#[from] OpenError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub type Result<T, E = AcqError> = std::result::Result<T, E>;
