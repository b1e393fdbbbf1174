//! Commands that can be sent to the firmware.

use crate::constants::*;
use crate::error::ProtocolError;
use crate::frame::wrap_sysex;
use crate::types::*;

/// Commands that can be sent to the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the supported modes of every pin.
    CapabilityQuery,

    /// Ask for the analog channel of every pin.
    AnalogMappingQuery,

    /// Ask for the firmware name and version.
    FirmwareQuery,

    /// Ask for the protocol version.
    ProtocolVersionQuery,

    /// Set a pin's mode.
    SetPinMode {
        /// Device pin number.
        pin: u8,
        /// New mode.
        mode: PinMode,
    },

    /// Write the levels of all 8 pins of a port.
    DigitalPortWrite {
        /// Port number.
        port: u8,
        /// Pin levels, bit 0 is the lowest pin of the port.
        mask: u16,
    },

    /// Write an analog (PWM/servo) value to a pin.
    AnalogWrite {
        /// Device pin number.
        pin: u8,
        /// Value to write.
        value: u16,
    },

    /// Enable or disable reporting of an analog channel.
    ReportAnalog {
        /// A0-style analog channel.
        channel: u8,
        /// Whether reports should be sent.
        enabled: bool,
    },

    /// Enable or disable reporting of a digital port.
    ReportDigital {
        /// Port number.
        port: u8,
        /// Whether reports should be sent.
        enabled: bool,
    },

    /// Set the firmware's sampling interval.
    SamplingInterval {
        /// Interval in milliseconds.
        interval_ms: u16,
    },

    /// Reset the firmware to its power-on state.
    SystemReset,
}

impl Command {
    /// Get the command identifier for this command.
    ///
    /// Sysex commands report their sysex sub-command.
    pub fn code(&self) -> u8 {
        match self {
            Command::CapabilityQuery => CAPABILITY_QUERY,
            Command::AnalogMappingQuery => ANALOG_MAPPING_QUERY,
            Command::FirmwareQuery => REPORT_FIRMWARE,
            Command::ProtocolVersionQuery => REPORT_VERSION,
            Command::SetPinMode { .. } => SET_PIN_MODE,
            Command::DigitalPortWrite { .. } => DIGITAL_MESSAGE,
            Command::AnalogWrite { pin, .. } if *pin > MAX_ANALOG_MESSAGE_PIN => EXTENDED_ANALOG,
            Command::AnalogWrite { .. } => ANALOG_MESSAGE,
            Command::ReportAnalog { .. } => REPORT_ANALOG,
            Command::ReportDigital { .. } => REPORT_DIGITAL,
            Command::SamplingInterval { .. } => SAMPLING_INTERVAL,
            Command::SystemReset => SYSTEM_RESET,
        }
    }

    /// Check that every field fits its wire encoding.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match *self {
            Command::SetPinMode { pin, .. } if pin > DATA_MASK => Err(ProtocolError::PinOutOfRange(pin)),
            Command::AnalogWrite { pin, .. } if pin > DATA_MASK => Err(ProtocolError::PinOutOfRange(pin)),
            Command::DigitalPortWrite { port, .. } | Command::ReportDigital { port, .. } if port > 0x0F => {
                Err(ProtocolError::InvalidData(format!("port {} out of range", port)))
            }
            Command::ReportAnalog { channel, .. } if channel > 0x0F => {
                Err(ProtocolError::InvalidData(format!("analog channel {} out of range", channel)))
            }
            _ => Ok(()),
        }
    }

    /// Encode the command to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::CapabilityQuery => wrap_sysex(CAPABILITY_QUERY, &[]),
            Command::AnalogMappingQuery => wrap_sysex(ANALOG_MAPPING_QUERY, &[]),
            Command::FirmwareQuery => wrap_sysex(REPORT_FIRMWARE, &[]),
            Command::ProtocolVersionQuery => vec![REPORT_VERSION],

            Command::SetPinMode { pin, mode } => vec![SET_PIN_MODE, pin & DATA_MASK, mode.code()],

            Command::DigitalPortWrite { port, mask } => {
                let [lsb, msb] = encode_u14(mask);
                vec![DIGITAL_MESSAGE | (port & 0x0F), lsb, msb]
            }

            Command::AnalogWrite { pin, value } if pin <= MAX_ANALOG_MESSAGE_PIN => {
                let [lsb, msb] = encode_u14(value);
                vec![ANALOG_MESSAGE | pin, lsb, msb]
            }

            Command::AnalogWrite { pin, value } => {
                // Extended analog carries the value in as many 7-bit groups as needed
                let mut body = vec![pin & DATA_MASK];
                let mut remaining = value;
                loop {
                    body.push((remaining & DATA_MASK as u16) as u8);
                    remaining >>= 7;
                    if remaining == 0 {
                        break;
                    }
                }
                wrap_sysex(EXTENDED_ANALOG, &body)
            }

            Command::ReportAnalog { channel, enabled } => {
                vec![REPORT_ANALOG | (channel & 0x0F), enabled as u8]
            }

            Command::ReportDigital { port, enabled } => {
                vec![REPORT_DIGITAL | (port & 0x0F), enabled as u8]
            }

            Command::SamplingInterval { interval_ms } => {
                wrap_sysex(SAMPLING_INTERVAL, &encode_u14(interval_ms))
            }

            Command::SystemReset => vec![SYSTEM_RESET],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries() {
        assert_eq!(Command::CapabilityQuery.encode(), vec![0xF0, 0x6B, 0xF7]);
        assert_eq!(Command::AnalogMappingQuery.encode(), vec![0xF0, 0x69, 0xF7]);
        assert_eq!(Command::FirmwareQuery.encode(), vec![0xF0, 0x79, 0xF7]);
        assert_eq!(Command::ProtocolVersionQuery.encode(), vec![0xF9]);
    }

    #[test]
    fn test_set_pin_mode() {
        let cmd = Command::SetPinMode {
            pin: 13,
            mode: PinMode::Output,
        };
        assert_eq!(cmd.encode(), vec![0xF4, 13, 1]);
        assert_eq!(cmd.code(), SET_PIN_MODE);
    }

    #[test]
    fn test_digital_port_write() {
        let cmd = Command::DigitalPortWrite { port: 1, mask: 0b1000_1000 };
        assert_eq!(cmd.encode(), vec![0x91, 0x08, 0x01]);
    }

    #[test]
    fn test_report_toggles() {
        assert_eq!(Command::ReportAnalog { channel: 2, enabled: true }.encode(), vec![0xC2, 1]);
        assert_eq!(Command::ReportDigital { port: 0, enabled: false }.encode(), vec![0xD0, 0]);
    }

    #[test]
    fn test_analog_write() {
        assert_eq!(Command::AnalogWrite { pin: 9, value: 200 }.encode(), vec![0xE9, 0x48, 0x01]);

        let extended = Command::AnalogWrite { pin: 20, value: 200 };
        assert_eq!(extended.code(), EXTENDED_ANALOG);
        assert_eq!(extended.encode(), vec![0xF0, 0x6F, 20, 0x48, 0x01, 0xF7]);
        assert_eq!(
            Command::AnalogWrite { pin: 20, value: 0 }.encode(),
            vec![0xF0, 0x6F, 20, 0x00, 0xF7]
        );
    }

    #[test]
    fn test_sampling_interval() {
        assert_eq!(
            Command::SamplingInterval { interval_ms: 1000 }.encode(),
            vec![0xF0, 0x7A, 0x68, 0x07, 0xF7]
        );
    }

    #[test]
    fn test_validate() {
        assert!(Command::SetPinMode { pin: 200, mode: PinMode::Input }.validate().is_err());
        assert!(Command::ReportDigital { port: 16, enabled: true }.validate().is_err());
        assert!(Command::DigitalPortWrite { port: 15, mask: 0 }.validate().is_ok());
    }
}
