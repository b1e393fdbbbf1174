//! Error types for the board session.

use std::time::Duration;

use firmata_protocol::{PinMode, ProtocolError};
use thiserror::Error;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open {device}: {reason}")]
    OpenFailed {
        /// Device path or description.
        device: String,
        /// Underlying cause.
        reason: String,
    },

    /// A read or write failed. The stream may still be usable.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The other end went away.
    #[error("transport disconnected")]
    Disconnected,

    /// The transport has been closed locally.
    #[error("transport closed")]
    Closed,
}

/// Errors returned by [`Board`](crate::Board) operations.
#[derive(Debug, Error)]
pub enum BoardError {
    /// The transport could not be opened.
    #[error("transport open failed: {0}")]
    TransportOpenFailed(String),

    /// A transport read or write failed.
    #[error("transport error: {0}")]
    TransportIo(#[from] TransportError),

    /// The device did not complete the handshake in time.
    #[error("handshake timed out after {elapsed:?} ({attempts} query retries)")]
    HandshakeTimeout {
        /// Time spent waiting.
        elapsed: Duration,
        /// Number of query retries sent.
        attempts: u32,
    },

    /// The pin is not in the pin table.
    #[error("unknown pin {0}")]
    UnknownPin(u8),

    /// The mode is not valid for this operation or device.
    #[error("pin {pin}: invalid mode {mode}")]
    InvalidMode {
        /// Pin the operation targeted.
        pin: u8,
        /// Offending mode.
        mode: PinMode,
    },

    /// The device does not support this mode on this pin.
    #[error("pin {pin} does not support mode {mode}")]
    UnsupportedMode {
        /// Pin the operation targeted.
        pin: u8,
        /// Requested mode.
        mode: PinMode,
    },

    /// A command could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The background reader could not be started.
    #[error("failed to start reader thread: {0}")]
    ReaderSpawn(std::io::Error),
}

impl BoardError {
    /// Whether this error came from an invalid request rather than the device link.
    pub fn is_pin_error(&self) -> bool {
        matches!(
            self,
            BoardError::UnknownPin(_) | BoardError::InvalidMode { .. } | BoardError::UnsupportedMode { .. }
        )
    }
}

/// Result type alias for board operations.
pub type BoardResult<T> = Result<T, BoardError>;
