//! Firmata host session.
//!
//! Drives a microcontroller running Firmata firmware over a byte stream:
//! discovers the device's pins with a handshake, keeps an authoritative pin
//! table, and exposes pin-level reads, writes, mode changes and reporting.
//!
//! ```no_run
//! use firmata_board::{Board, BoardConfig};
//! use firmata_protocol::{PinMode, PinState};
//!
//! # fn main() -> Result<(), firmata_board::BoardError> {
//! let board = Board::open_serial("/dev/ttyACM0", 57_600, BoardConfig::default())?;
//! board.set_pin_mode(13, PinMode::Output)?;
//! board.digital_write(13, PinState::High)?;
//! board.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! For tests and offline use, [`sim::SimulatedDevice`] answers the protocol
//! in-process over a [`transport::ChannelTransport`].

mod board;
mod config;
mod error;
mod handshake;
mod pins;
mod reader;
pub mod sim;
pub mod transport;

pub use board::{Board, FirmwareInfo};
pub use config::BoardConfig;
pub use error::{BoardError, BoardResult, TransportError};
pub use handshake::{Handshake, HandshakeAction, HandshakePhase, TimerKind};
pub use pins::{Pin, PinTable, PinUpdate};
pub use transport::{channel_pair, ChannelTransport, Transport};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;
