//! Pin table.
//!
//! The table is the authoritative host-side view of every pin: its mode, the
//! modes it supports, its last known value and whether it is reporting. It is
//! built once from the handshake responses and afterwards only mutated by
//! device reports and by the board API, always under the session lock.
//!
//! Write operations are pure: they validate and return a [`PinUpdate`] with
//! the [`Command`] the caller must send, leaving the table untouched. The
//! caller sends first and applies the update only once the send succeeded,
//! all under one lock, so a failed write leaves the table as it was.

use std::collections::{BTreeMap, BTreeSet};

use firmata_protocol::{
    pin_to_port, Command, ModeSet, PinCapability, PinMode, PinState, MAX_PINS, PINS_PER_PORT,
};
use tracing::{debug, warn};

use crate::error::{BoardError, BoardResult};

/// Host-side state of a single pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    /// Device pin number (not the A0-style analog channel).
    pub number: u8,
    /// Port the pin belongs to (`number >> 3`).
    pub port: u8,
    /// Current mode. Always an element of `supported_modes`.
    pub mode: PinMode,
    /// Modes the device reported for this pin.
    pub supported_modes: ModeSet,
    /// A0-style analog channel, for analog-capable pins.
    pub analog_index: Option<u8>,
    /// Last known digital level.
    pub digital_value: PinState,
    /// Last known analog value.
    pub analog_value: u16,
    /// Whether the device has been asked to report this pin.
    pub reporting: bool,
}

impl Pin {
    fn new(number: u8, supported_modes: ModeSet, analog_index: Option<u8>) -> Self {
        let mode = if analog_index.is_some() && supported_modes.contains(PinMode::Analog) {
            PinMode::Analog
        } else if supported_modes.contains(PinMode::Output) {
            PinMode::Output
        } else {
            supported_modes.iter().next().unwrap_or(PinMode::Input)
        };

        Pin {
            number,
            port: pin_to_port(number),
            mode,
            supported_modes,
            analog_index,
            digital_value: PinState::Low,
            analog_value: 0,
            reporting: false,
        }
    }

    /// Whether the pin has an analog channel.
    pub fn is_analog(&self) -> bool {
        self.analog_index.is_some()
    }
}

/// A validated change to the pin table and the command that carries it.
///
/// Produced by the [`PinTable`] write operations, which never mutate the
/// table themselves. Apply it with [`PinTable::apply`] once the command has
/// reached the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct PinUpdate {
    /// Command to send, `None` when the device needs nothing.
    pub command: Option<Command>,
    pins: Vec<Pin>,
}

impl PinUpdate {
    fn send(command: Command, pin: Pin) -> Self {
        PinUpdate {
            command: Some(command),
            pins: vec![pin],
        }
    }

    fn local(pin: Pin) -> Self {
        PinUpdate {
            command: None,
            pins: vec![pin],
        }
    }

    /// New state of every pin the update touches.
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Whether applying the update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.pins.is_empty()
    }
}

/// All pins of a board, keyed by device pin number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinTable {
    pins: BTreeMap<u8, Pin>,
    /// Analog channel → pin number.
    analog_pins: BTreeMap<u8, u8>,
    /// Union of every pin's supported modes.
    device_modes: ModeSet,
}

impl PinTable {
    /// Build the table from a capability response and an analog mapping.
    ///
    /// Analog-capable pins without an analog channel in `mapping` are logged
    /// and left out, as are pin numbers past the 7-bit range. Pins that are neither analog nor digital capable (for
    /// example the serial pins, which report no modes) are left out too.
    pub fn build(capabilities: &[PinCapability], mapping: &[Option<u8>]) -> PinTable {
        let mut table = PinTable::default();

        for capability in capabilities {
            if capability.pin as usize >= MAX_PINS {
                warn!("pin {}: beyond the 7-bit pin range, excluding it", capability.pin);
                continue;
            }
            let modes = capability.mode_set();

            if capability.is_analog() {
                let Some(channel) = mapping.get(capability.pin as usize).copied().flatten() else {
                    warn!(
                        "pin {}: analog capable but has no analog channel, excluding it",
                        capability.pin
                    );
                    continue;
                };
                table.insert(Pin::new(capability.pin, modes, Some(channel)));
            } else if capability.is_digital() {
                table.insert(Pin::new(capability.pin, modes, None));
            } else {
                debug!("pin {}: no usable modes ({})", capability.pin, modes);
            }
        }

        table
    }

    fn insert(&mut self, pin: Pin) {
        if let Some(channel) = pin.analog_index {
            self.analog_pins.insert(channel, pin.number);
        }
        self.device_modes = self.device_modes.union(pin.supported_modes);
        self.pins.insert(pin.number, pin);
    }

    /// Number of pins.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Copy of a pin's state.
    pub fn get(&self, pin: u8) -> Option<Pin> {
        self.pins.get(&pin).copied()
    }

    /// Copies of all pins, ordered by pin number.
    pub fn pins(&self) -> Vec<Pin> {
        self.pins.values().copied().collect()
    }

    /// Every mode supported by at least one pin.
    pub fn device_modes(&self) -> ModeSet {
        self.device_modes
    }

    fn require(&self, pin: u8) -> BoardResult<&Pin> {
        self.pins.get(&pin).ok_or(BoardError::UnknownPin(pin))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Last known digital level of a pin.
    pub fn digital_read(&self, pin: u8) -> BoardResult<PinState> {
        Ok(self.require(pin)?.digital_value)
    }

    /// Last known analog value of a pin.
    ///
    /// Not checked against the pin's mode: the value is whatever the device
    /// last reported, which is only meaningful in `Analog` or `Pwm` mode.
    pub fn analog_read(&self, pin: u8) -> BoardResult<u16> {
        Ok(self.require(pin)?.analog_value)
    }

    /// Pins grouped by port.
    pub fn port_to_pins(&self) -> BTreeMap<u8, BTreeSet<u8>> {
        let mut ports: BTreeMap<u8, BTreeSet<u8>> = BTreeMap::new();
        for pin in self.pins.values() {
            ports.entry(pin.port).or_default().insert(pin.number);
        }
        ports
    }

    /// Device pin numbers ordered by analog channel.
    pub fn analog_mapping(&self) -> Vec<u8> {
        self.analog_pins.values().copied().collect()
    }

    /// Pin number behind an analog channel.
    pub fn analog_pin(&self, channel: u8) -> Option<u8> {
        self.analog_pins.get(&channel).copied()
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Plan a pin level change and the port write that carries it.
    ///
    /// All 8 pins of the port must be in the table, since the port write
    /// sets every one of them.
    pub fn digital_write(&self, pin: u8, value: PinState) -> BoardResult<PinUpdate> {
        let entry = *self.require(pin)?;
        let port = pin_to_port(entry.number);
        let first = port * PINS_PER_PORT;

        let mut mask = 0u16;
        for bit in 0..PINS_PER_PORT {
            let number = first + bit;
            let sibling = self.require(number)?;
            let level = if number == pin { value } else { sibling.digital_value };
            if level.is_high() {
                mask |= 1 << bit;
            }
        }

        Ok(PinUpdate::send(
            Command::DigitalPortWrite { port, mask },
            Pin {
                digital_value: value,
                ..entry
            },
        ))
    }

    /// Plan a PWM duty value change.
    pub fn analog_write(&self, pin: u8, value: u16) -> BoardResult<PinUpdate> {
        let entry = *self.require(pin)?;
        if entry.mode != PinMode::Pwm {
            return Err(BoardError::InvalidMode {
                pin,
                mode: entry.mode,
            });
        }
        let command = Command::AnalogWrite { pin, value };
        command.validate()?;
        Ok(PinUpdate::send(
            command,
            Pin {
                analog_value: value,
                ..entry
            },
        ))
    }

    /// Plan a mode change.
    ///
    /// The update carries no command when the pin is already in `mode`.
    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> BoardResult<PinUpdate> {
        let entry = *self.require(pin)?;

        if !self.device_modes.contains(mode) {
            return Err(BoardError::InvalidMode { pin, mode });
        }
        if !entry.supported_modes.contains(mode) {
            return Err(BoardError::UnsupportedMode { pin, mode });
        }
        if entry.mode == mode {
            return Ok(PinUpdate::default());
        }

        let command = Command::SetPinMode { pin, mode };
        command.validate()?;
        Ok(PinUpdate::send(command, Pin { mode, ..entry }))
    }

    /// Plan enabling or disabling value reports for a pin.
    ///
    /// Analog pins are toggled by analog channel, everything else by port.
    /// A port stays on while any other input pin in it is still reporting,
    /// so disabling one of several reporting inputs sends nothing.
    pub fn set_pin_reporting(&self, pin: u8, enabled: bool) -> BoardResult<PinUpdate> {
        let entry = *self.require(pin)?;
        let changed = Pin {
            reporting: enabled,
            ..entry
        };

        if let (PinMode::Analog, Some(channel)) = (entry.mode, entry.analog_index) {
            let command = Command::ReportAnalog { channel, enabled };
            command.validate()?;
            return Ok(PinUpdate::send(command, changed));
        }
        if enabled && entry.mode != PinMode::Input {
            return Err(BoardError::InvalidMode {
                pin,
                mode: entry.mode,
            });
        }

        let command = Command::ReportDigital {
            port: entry.port,
            enabled,
        };
        command.validate()?;

        if !enabled {
            let still_reporting: Vec<u8> = self
                .pins
                .values()
                .filter(|p| p.port == entry.port && p.number != pin)
                .filter(|p| p.mode == PinMode::Input && p.reporting)
                .map(|p| p.number)
                .collect();
            if !still_reporting.is_empty() {
                debug!(
                    "port {} kept on for pins {:?}",
                    entry.port, still_reporting
                );
                return Ok(PinUpdate::local(changed));
            }
        }

        Ok(PinUpdate::send(command, changed))
    }

    /// Write the planned pin states into the table.
    ///
    /// The board calls this only after the update's command was sent.
    pub fn apply(&mut self, update: &PinUpdate) {
        for pin in &update.pins {
            if let Some(entry) = self.pins.get_mut(&pin.number) {
                *entry = *pin;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Device reports
    // ------------------------------------------------------------------------

    /// Apply a digital port report. Only pins in `Input` mode take the value.
    pub fn apply_digital_report(&mut self, port: u8, value: u16) {
        let first = port.saturating_mul(PINS_PER_PORT);
        for bit in 0..PINS_PER_PORT {
            let Some(pin) = first.checked_add(bit).and_then(|n| self.pins.get_mut(&n)) else {
                continue;
            };
            if pin.mode == PinMode::Input {
                pin.digital_value = PinState::from(value & (1 << bit) != 0);
            }
        }
    }

    /// Apply an analog channel report.
    pub fn apply_analog_report(&mut self, channel: u8, value: u16) {
        match self.analog_pin(channel).and_then(|n| self.pins.get_mut(&n)) {
            Some(pin) => pin.analog_value = value,
            None => debug!("analog report for unmapped channel {}", channel),
        }
    }

    /// Return every pin to the state it had when the table was built, as the
    /// device does after a system reset.
    pub fn reset_to_defaults(&mut self) {
        for pin in self.pins.values_mut() {
            *pin = Pin::new(pin.number, pin.supported_modes, pin.analog_index);
        }
    }
}
