//! Protocol constants
//!
//! Command bytes, sysex sub-commands and other protocol-specific values used
//! by Firmata. Values follow `Firmata.h`.

// ============================================================================
// Message Command Bytes (0x80-0xFF)
// ============================================================================

/// Digital port value (`0x90 | port`), 8 pins per message.
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Analog channel value (`0xE0 | channel`), also used for PWM output.
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Enable/disable analog reporting by analog channel (`0xC0 | channel`).
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable/disable digital reporting by port (`0xD0 | port`).
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Set a pin's mode.
pub const SET_PIN_MODE: u8 = 0xF4;
/// Report the protocol version.
pub const REPORT_VERSION: u8 = 0xF9;
/// Reset the firmware to its power-on state.
pub const SYSTEM_RESET: u8 = 0xFF;
/// Start of a sysex message.
pub const START_SYSEX: u8 = 0xF0;
/// End of a sysex message.
pub const END_SYSEX: u8 = 0xF7;

/// Headers at or above this value identify single-instance commands and are
/// used verbatim; below it the low nibble carries a port or channel number.
pub const MULTI_INSTANCE_THRESHOLD: u8 = 0xF0;

// ============================================================================
// Sysex Commands (0x00-0x7F)
// ============================================================================

/// Analog write to any pin (PWM, servo), for pins above 15.
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Ask for supported modes and resolutions of all pins.
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Reply with supported modes and resolutions.
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Ask for the mapping of analog channels to pin numbers.
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Reply with the analog mapping.
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Ask for a pin's current mode and value.
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Reply with a pin's current mode and value.
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Report name and version of the firmware.
pub const REPORT_FIRMWARE: u8 = 0x79;
/// Set the poll rate of the firmware main loop.
pub const SAMPLING_INTERVAL: u8 = 0x7A;

// ============================================================================
// Pin Mode Bytes
// ============================================================================

/// Digital input.
pub const PIN_MODE_INPUT: u8 = 0x00;
/// Digital output.
pub const PIN_MODE_OUTPUT: u8 = 0x01;
/// Analog input.
pub const PIN_MODE_ANALOG: u8 = 0x02;
/// PWM output.
pub const PIN_MODE_PWM: u8 = 0x03;
/// Servo output.
pub const PIN_MODE_SERVO: u8 = 0x04;
/// Shift register in/out.
pub const PIN_MODE_SHIFT: u8 = 0x05;
/// Pin included in an I2C bus.
pub const PIN_MODE_I2C: u8 = 0x06;

// ============================================================================
// Other Values
// ============================================================================

/// Terminates a capability record and marks "no analog channel" in the
/// analog-mapping response.
pub const CAPABILITY_SEPARATOR: u8 = 0x7F;
/// Analog-mapping value for pins with no analog capability.
pub const NO_ANALOG_CHANNEL: u8 = 0x7F;
/// Mask for a single 7-bit data byte.
pub const DATA_MASK: u8 = 0x7F;
/// Number of digital pins grouped into one port.
pub const PINS_PER_PORT: u8 = 8;
/// Pin numbers travel as a single 7-bit data byte.
pub const MAX_PINS: usize = 128;
/// Highest pin addressable by a plain analog message.
pub const MAX_ANALOG_MESSAGE_PIN: u8 = 0x0F;
/// Baud rate StandardFirmata expects.
pub const DEFAULT_BAUD: u32 = 57_600;
