//! Messages received from the firmware.

use crate::constants::*;
use crate::error::*;
use crate::frame::{Frame, FrameShape};
use crate::types::*;

/// Messages received from the firmware.
///
/// This is the closed set of device messages the host acts on. Anything else
/// decodes to [`Message::Unknown`] carrying its command identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Firmware name and version (sysex `0x79`).
    FirmwareReport {
        /// Firmware major version.
        major: u8,
        /// Firmware minor version.
        minor: u8,
        /// Sketch name.
        name: String,
    },

    /// Supported modes of every pin (sysex `0x6C`).
    CapabilityResponse(Vec<PinCapability>),

    /// Analog channel of every pin, `None` for pins without one (sysex `0x6A`).
    AnalogMappingResponse(Vec<Option<u8>>),

    /// Values of the 8 pins in a port (`0x90 | port`).
    DigitalMessage {
        /// Port number.
        port: u8,
        /// Pin levels, bit 0 is the lowest pin of the port.
        value: u16,
    },

    /// Value of an analog channel (`0xE0 | channel`).
    AnalogMessage {
        /// A0-style analog channel.
        channel: u8,
        /// 14-bit value.
        value: u16,
    },

    /// Protocol version (`0xF9`).
    ProtocolVersion {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },

    /// A well-framed message the host does not handle.
    Unknown(u8),
}

impl Message {
    /// Decode a message from a frame.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.shape {
            FrameShape::FixedWidth => decode_fixed_width(&frame.payload),
            FrameShape::Sysex => decode_sysex(&frame.payload),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::FirmwareReport { .. } => "FirmwareReport",
            Message::CapabilityResponse(_) => "CapabilityResponse",
            Message::AnalogMappingResponse(_) => "AnalogMappingResponse",
            Message::DigitalMessage { .. } => "DigitalMessage",
            Message::AnalogMessage { .. } => "AnalogMessage",
            Message::ProtocolVersion { .. } => "ProtocolVersion",
            Message::Unknown(_) => "Unknown",
        }
    }
}

fn decode_fixed_width(payload: &[u8]) -> Result<Message, ProtocolError> {
    if payload.len() < 3 {
        return Err(ProtocolError::FrameTooShort {
            expected: 3,
            actual: payload.len(),
        });
    }

    let header = payload[0];
    let (lsb, msb) = (payload[1], payload[2]);

    if header < MULTI_INSTANCE_THRESHOLD {
        let instance = header & 0x0F;
        return Ok(match header & 0xF0 {
            DIGITAL_MESSAGE => Message::DigitalMessage {
                port: instance,
                value: decode_u14(lsb, msb),
            },
            ANALOG_MESSAGE => Message::AnalogMessage {
                channel: instance,
                value: decode_u14(lsb, msb),
            },
            command => Message::Unknown(command),
        });
    }

    Ok(match header {
        REPORT_VERSION => Message::ProtocolVersion {
            major: lsb,
            minor: msb,
        },
        command => Message::Unknown(command),
    })
}

fn decode_sysex(payload: &[u8]) -> Result<Message, ProtocolError> {
    if payload.len() < 3 {
        return Err(ProtocolError::FrameTooShort {
            expected: 3,
            actual: payload.len(),
        });
    }
    if payload[0] != START_SYSEX || payload[payload.len() - 1] != END_SYSEX {
        return Err(ProtocolError::UnterminatedSysex);
    }

    let command = payload[1];
    let body = &payload[2..payload.len() - 1];

    match command {
        REPORT_FIRMWARE => {
            if body.len() < 2 {
                return Err(ProtocolError::FrameTooShort {
                    expected: 5,
                    actual: payload.len(),
                });
            }
            Ok(Message::FirmwareReport {
                major: body[0],
                minor: body[1],
                name: decode_firmware_name(&body[2..]),
            })
        }

        CAPABILITY_RESPONSE => Ok(Message::CapabilityResponse(decode_capabilities(body))),

        ANALOG_MAPPING_RESPONSE => Ok(Message::AnalogMappingResponse(
            body.iter()
                .map(|&channel| (channel != NO_ANALOG_CHANNEL).then_some(channel))
                .collect(),
        )),

        other => Ok(Message::Unknown(other)),
    }
}

/// Decode a firmware name.
///
/// StandardFirmata sends each character as an `(lsb, msb)` pair; simpler
/// firmwares send plain 7-bit ASCII. A name is treated as pair-encoded when
/// it has even length and every second byte is zero.
fn decode_firmware_name(bytes: &[u8]) -> String {
    let pair_encoded = !bytes.is_empty()
        && bytes.len() % 2 == 0
        && bytes.chunks(2).all(|pair| pair[1] == 0);

    if pair_encoded {
        bytes.chunks(2).map(|pair| (pair[0] & DATA_MASK) as char).collect()
    } else {
        bytes.iter().map(|&b| (b & DATA_MASK) as char).collect()
    }
}

/// Parse the body of a capability response.
///
/// Each pin's record is a list of `(mode, resolution)` pairs terminated by
/// `0x7F`. A malformed record is logged and the pin reported with no modes,
/// so the numbering of the pins after it is unaffected.
pub fn decode_capabilities(body: &[u8]) -> Vec<PinCapability> {
    let mut pins = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let end = rest
            .iter()
            .position(|&b| b == CAPABILITY_SEPARATOR)
            .unwrap_or(rest.len());
        let record = &rest[..end];
        rest = rest.get(end + 1..).unwrap_or(&[]);

        if pins.len() >= MAX_PINS {
            log::warn!(
                "capability response lists more than {} pins, ignoring the rest",
                MAX_PINS
            );
            break;
        }
        let pin = pins.len() as u8;

        match decode_capability_record(pin, record) {
            Ok(capability) => pins.push(capability),
            Err(e) => {
                log::warn!("{}", e);
                pins.push(PinCapability {
                    pin,
                    modes: Vec::new(),
                });
            }
        }
    }

    pins
}

fn decode_capability_record(pin: u8, record: &[u8]) -> Result<PinCapability, ProtocolError> {
    if record.len() % 2 != 0 {
        return Err(ProtocolError::MalformedCapabilityRecord {
            pin,
            reason: format!("odd record length {}", record.len()),
        });
    }

    let mut modes = Vec::with_capacity(record.len() / 2);
    for pair in record.chunks(2) {
        match PinMode::try_from(pair[0]) {
            Ok(mode) => modes.push(ModeResolution {
                mode,
                resolution: pair[1],
            }),
            Err(_) => log::debug!("pin {}: skipping unsupported mode 0x{:02X}", pin, pair[0]),
        }
    }

    Ok(PinCapability { pin, modes })
}
