//! Firmata Wire Protocol
//!
//! This crate provides types and utilities for talking to a microcontroller
//! running a Firmata firmware sketch. It has no knowledge of the transport and
//! performs no I/O: bytes go in, typed messages come out, and typed commands
//! are encoded back into bytes.
//!
//! # Protocol Overview
//!
//! Firmata layers its messages over a MIDI-like byte framing. Every message
//! starts with a byte that has the high bit set; data bytes are 7-bit.
//!
//! - **Fixed-width messages** (3 bytes): `[header][lsb][msb]`. Digital port
//!   reports, analog channel reports and the protocol version.
//! - **Sysex messages** (variable length): `[0xF0][command][...][0xF7]`. Used
//!   for the firmware report, capability and analog-mapping responses.
//!
//! # Example
//!
//! ```rust,ignore
//! use firmata_protocol::{Command, FrameCodec, Message};
//!
//! // Build a command
//! let query = Command::CapabilityQuery.encode();
//!
//! // Parse device output
//! let mut codec = FrameCodec::new();
//! codec.push(&received_data);
//! while let Some(frame) = codec.decode() {
//!     let message = Message::decode(&frame)?;
//! }
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod message;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use message::*;
pub use types::*;
