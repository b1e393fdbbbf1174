//! Common types used in the protocol.

use crate::constants::*;
use crate::error::ProtocolError;

/// The mode a pin can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PinMode {
    /// Digital input.
    Input,
    /// Digital output.
    Output,
    /// Analog input.
    Analog,
    /// PWM output.
    Pwm,
    /// Servo output.
    Servo,
    /// Shift register in/out.
    Shift,
    /// Part of an I2C bus.
    I2c,
}

impl PinMode {
    /// All pin modes, in wire order.
    pub const ALL: [PinMode; 7] = [
        PinMode::Input,
        PinMode::Output,
        PinMode::Analog,
        PinMode::Pwm,
        PinMode::Servo,
        PinMode::Shift,
        PinMode::I2c,
    ];

    /// Wire value of this mode.
    pub fn code(self) -> u8 {
        match self {
            PinMode::Input => PIN_MODE_INPUT,
            PinMode::Output => PIN_MODE_OUTPUT,
            PinMode::Analog => PIN_MODE_ANALOG,
            PinMode::Pwm => PIN_MODE_PWM,
            PinMode::Servo => PIN_MODE_SERVO,
            PinMode::Shift => PIN_MODE_SHIFT,
            PinMode::I2c => PIN_MODE_I2C,
        }
    }

    /// Upper-case name as used by Arduino sketches.
    pub fn name(self) -> &'static str {
        match self {
            PinMode::Input => "INPUT",
            PinMode::Output => "OUTPUT",
            PinMode::Analog => "ANALOG",
            PinMode::Pwm => "PWM",
            PinMode::Servo => "SERVO",
            PinMode::Shift => "SHIFT",
            PinMode::I2c => "I2C",
        }
    }
}

impl TryFrom<u8> for PinMode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            PIN_MODE_INPUT => Ok(PinMode::Input),
            PIN_MODE_OUTPUT => Ok(PinMode::Output),
            PIN_MODE_ANALOG => Ok(PinMode::Analog),
            PIN_MODE_PWM => Ok(PinMode::Pwm),
            PIN_MODE_SERVO => Ok(PinMode::Servo),
            PIN_MODE_SHIFT => Ok(PinMode::Shift),
            PIN_MODE_I2C => Ok(PinMode::I2c),
            other => Err(ProtocolError::InvalidPinMode(other)),
        }
    }
}

impl std::fmt::Display for PinMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PinMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PinMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::InvalidData(format!("unknown pin mode '{}'", s)))
    }
}

/// A set of pin modes, stored as a bitmask over the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeSet(u8);

impl ModeSet {
    /// The empty set.
    pub const EMPTY: ModeSet = ModeSet(0);

    /// Add a mode.
    pub fn insert(&mut self, mode: PinMode) {
        self.0 |= 1 << mode.code();
    }

    /// Whether the set contains `mode`.
    pub fn contains(&self, mode: PinMode) -> bool {
        self.0 & (1 << mode.code()) != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of modes in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Union of two sets.
    pub fn union(self, other: ModeSet) -> ModeSet {
        ModeSet(self.0 | other.0)
    }

    /// Iterate the modes in wire order.
    pub fn iter(&self) -> impl Iterator<Item = PinMode> + '_ {
        PinMode::ALL.into_iter().filter(move |mode| self.contains(*mode))
    }
}

impl FromIterator<PinMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = PinMode>>(iter: I) -> Self {
        let mut set = ModeSet::EMPTY;
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}

impl std::fmt::Display for ModeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().map(PinMode::name).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Logic level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinState {
    /// Logic low.
    #[default]
    Low,
    /// Logic high.
    High,
}

impl PinState {
    /// Whether the level is high.
    pub fn is_high(self) -> bool {
        self == PinState::High
    }
}

impl From<bool> for PinState {
    fn from(high: bool) -> Self {
        if high {
            PinState::High
        } else {
            PinState::Low
        }
    }
}

impl std::fmt::Display for PinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinState::Low => f.write_str("LOW"),
            PinState::High => f.write_str("HIGH"),
        }
    }
}

impl std::str::FromStr for PinState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "1" | "on" => Ok(PinState::High),
            "low" | "0" | "off" => Ok(PinState::Low),
            _ => Err(ProtocolError::InvalidData(format!("unknown pin state '{}'", s))),
        }
    }
}

/// A supported mode together with its value resolution in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeResolution {
    /// The mode.
    pub mode: PinMode,
    /// Resolution in bits (e.g. 10 for a 10-bit ADC).
    pub resolution: u8,
}

/// Capabilities of a single pin, as reported in the capability response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PinCapability {
    /// Device pin number (position in the capability response).
    pub pin: u8,
    /// Supported modes and their resolutions.
    pub modes: Vec<ModeResolution>,
}

impl PinCapability {
    /// The supported modes as a set.
    pub fn mode_set(&self) -> ModeSet {
        self.modes.iter().map(|m| m.mode).collect()
    }

    /// Whether the pin can be used as an analog input.
    pub fn is_analog(&self) -> bool {
        self.mode_set().contains(PinMode::Analog)
    }

    /// Whether the pin can be used for digital I/O.
    pub fn is_digital(&self) -> bool {
        let modes = self.mode_set();
        modes.contains(PinMode::Input) || modes.contains(PinMode::Output)
    }

    /// Resolution reported for `mode`, if supported.
    pub fn resolution(&self, mode: PinMode) -> Option<u8> {
        self.modes.iter().find(|m| m.mode == mode).map(|m| m.resolution)
    }
}

/// Port a pin belongs to.
pub fn pin_to_port(pin: u8) -> u8 {
    pin >> 3
}

/// Split a 14-bit value into its `(lsb, msb)` 7-bit wire bytes.
pub fn encode_u14(value: u16) -> [u8; 2] {
    [(value & DATA_MASK as u16) as u8, ((value >> 7) & DATA_MASK as u16) as u8]
}

/// Join two 7-bit wire bytes into a 14-bit value.
pub fn decode_u14(lsb: u8, msb: u8) -> u16 {
    (lsb & DATA_MASK) as u16 | ((msb & DATA_MASK) as u16) << 7
}
