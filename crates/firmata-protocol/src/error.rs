//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when decoding or encoding Firmata messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Sysex frame is missing its start or end marker.
    #[error("sysex frame not delimited by 0xF0 ... 0xF7")]
    UnterminatedSysex,

    /// A capability record could not be parsed.
    #[error("malformed capability record for pin {pin}: {reason}")]
    MalformedCapabilityRecord {
        /// Pin the record belongs to.
        pin: u8,
        /// What was wrong with it.
        reason: String,
    },

    /// Mode byte outside the known pin modes.
    #[error("invalid pin mode: 0x{0:02X}")]
    InvalidPinMode(u8),

    /// Pin number cannot be addressed on the wire.
    #[error("pin {0} out of range")]
    PinOutOfRange(u8),

    /// Invalid data in frame.
    #[error("invalid frame data: {0}")]
    InvalidData(String),
}
