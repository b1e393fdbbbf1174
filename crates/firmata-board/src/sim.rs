//! In-process simulated Firmata device.
//!
//! Runs on its own thread at the far end of a [`channel_pair`] and answers
//! the handshake queries the way StandardFirmata does. Every byte the host
//! sends is recorded so tests can assert on the exact wire output, and
//! arbitrary frames can be injected towards the host.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use firmata_protocol::{
    encode_u14, wrap_sysex, ModeResolution, PinCapability, PinMode, ANALOG_MAPPING_QUERY,
    ANALOG_MAPPING_RESPONSE, ANALOG_MESSAGE, CAPABILITY_QUERY, CAPABILITY_RESPONSE,
    CAPABILITY_SEPARATOR, DIGITAL_MESSAGE, END_SYSEX, NO_ANALOG_CHANNEL, REPORT_ANALOG,
    REPORT_DIGITAL, REPORT_FIRMWARE, REPORT_VERSION, SET_PIN_MODE, START_SYSEX, SYSTEM_RESET,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::transport::{channel_pair, write_all, ChannelTransport, Transport};

/// Behaviour of a [`SimulatedDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Firmware name sent in the firmware report.
    pub firmware_name: String,
    /// Firmware version.
    pub firmware_version: (u8, u8),
    /// Protocol version sent in answer to `0xF9`.
    pub protocol_version: (u8, u8),
    /// Capability record of every pin, in pin order.
    pub capabilities: Vec<PinCapability>,
    /// Analog channel of every pin.
    pub analog_mapping: Vec<Option<u8>>,
    /// Send a firmware report as soon as the device starts.
    pub announce_on_boot: bool,
    /// Number of capability queries to ignore before answering.
    pub drop_capability_queries: u32,
    /// Never answer anything.
    pub silent: bool,
    /// Value reported when analog reporting is enabled for a channel.
    pub analog_values: BTreeMap<u8, u16>,
    /// Pin levels reported when digital reporting is enabled for a port.
    pub port_values: BTreeMap<u8, u16>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig::uno()
    }
}

impl SimConfig {
    /// An Arduino Uno running StandardFirmata: 14 digital pins (PWM on
    /// 3, 5, 6, 9, 10 and 11) and 6 analog inputs on pins 14 to 19.
    pub fn uno() -> Self {
        const PWM_PINS: [u8; 6] = [3, 5, 6, 9, 10, 11];

        let mut capabilities = Vec::new();
        let mut analog_mapping = Vec::new();
        for pin in 0..20u8 {
            let mut modes = vec![
                ModeResolution { mode: PinMode::Input, resolution: 1 },
                ModeResolution { mode: PinMode::Output, resolution: 1 },
            ];
            if pin >= 14 {
                modes.push(ModeResolution { mode: PinMode::Analog, resolution: 10 });
                analog_mapping.push(Some(pin - 14));
            } else {
                if PWM_PINS.contains(&pin) {
                    modes.push(ModeResolution { mode: PinMode::Pwm, resolution: 8 });
                }
                if pin >= 2 {
                    modes.push(ModeResolution { mode: PinMode::Servo, resolution: 14 });
                }
                analog_mapping.push(None);
            }
            capabilities.push(PinCapability { pin, modes });
        }

        SimConfig {
            firmware_name: "StandardFirmata.ino".to_string(),
            firmware_version: (2, 5),
            protocol_version: (2, 5),
            capabilities,
            analog_mapping,
            announce_on_boot: true,
            drop_capability_queries: 0,
            silent: false,
            analog_values: BTreeMap::new(),
            port_values: BTreeMap::new(),
        }
    }

    /// A two pin device: pin 0 digital, pin 1 analog on channel 0.
    pub fn two_pin() -> Self {
        SimConfig {
            firmware_name: "StdFirmata".to_string(),
            capabilities: vec![
                PinCapability {
                    pin: 0,
                    modes: vec![
                        ModeResolution { mode: PinMode::Input, resolution: 1 },
                        ModeResolution { mode: PinMode::Output, resolution: 1 },
                    ],
                },
                PinCapability {
                    pin: 1,
                    modes: vec![ModeResolution { mode: PinMode::Analog, resolution: 10 }],
                },
            ],
            analog_mapping: vec![None, Some(0)],
            ..SimConfig::uno()
        }
    }
}

// ============================================================================
// Response encoding
// ============================================================================

/// Firmware report frame, name pair-encoded as StandardFirmata sends it.
pub fn firmware_report(major: u8, minor: u8, name: &str) -> Vec<u8> {
    let mut body = vec![major, minor];
    for byte in name.bytes() {
        body.push(byte & 0x7F);
        body.push(0);
    }
    wrap_sysex(REPORT_FIRMWARE, &body)
}

/// Capability response frame.
pub fn capability_response(capabilities: &[PinCapability]) -> Vec<u8> {
    let mut body = Vec::new();
    for capability in capabilities {
        for entry in &capability.modes {
            body.push(entry.mode.code());
            body.push(entry.resolution);
        }
        body.push(CAPABILITY_SEPARATOR);
    }
    wrap_sysex(CAPABILITY_RESPONSE, &body)
}

/// Analog mapping response frame.
pub fn analog_mapping_response(mapping: &[Option<u8>]) -> Vec<u8> {
    let body: Vec<u8> = mapping.iter().map(|c| c.unwrap_or(NO_ANALOG_CHANNEL)).collect();
    wrap_sysex(ANALOG_MAPPING_RESPONSE, &body)
}

/// Digital port report frame.
pub fn digital_report(port: u8, value: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(value);
    vec![DIGITAL_MESSAGE | (port & 0x0F), lsb, msb]
}

/// Analog channel report frame.
pub fn analog_report(channel: u8, value: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(value);
    vec![ANALOG_MESSAGE | (channel & 0x0F), lsb, msb]
}

/// Protocol version frame.
pub fn protocol_version(major: u8, minor: u8) -> Vec<u8> {
    vec![REPORT_VERSION, major, minor]
}

// ============================================================================
// Host command parsing
// ============================================================================

/// Splits the host's byte stream into commands.
///
/// Host commands have different lengths from device messages (report
/// toggles are two bytes, reset is one), so the device side has its own
/// splitter rather than reusing the host's frame codec.
#[derive(Debug, Default)]
struct HostParser {
    buffer: Vec<u8>,
}

impl HostParser {
    fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_command(&mut self) -> Option<Vec<u8>> {
        loop {
            let &header = self.buffer.first()?;
            let len = match header {
                START_SYSEX => match self.buffer.iter().position(|&b| b == END_SYSEX) {
                    Some(end) => end + 1,
                    None => return None,
                },
                SET_PIN_MODE => 3,
                REPORT_VERSION | SYSTEM_RESET => 1,
                h if h & 0xF0 == DIGITAL_MESSAGE || h & 0xF0 == ANALOG_MESSAGE => 3,
                h if h & 0xF0 == REPORT_ANALOG || h & 0xF0 == REPORT_DIGITAL => 2,
                other => {
                    trace!("sim: skipping byte 0x{:02X}", other);
                    self.buffer.remove(0);
                    continue;
                }
            };
            if self.buffer.len() < len {
                return None;
            }
            return Some(self.buffer.drain(..len).collect());
        }
    }
}

// ============================================================================
// Device
// ============================================================================

struct DeviceShared {
    received: Mutex<Vec<u8>>,
    arrived: Condvar,
    commands: Mutex<Vec<Vec<u8>>>,
    capability_queries: AtomicU32,
    stop: AtomicBool,
}

/// Handle to a running simulated device.
pub struct SimulatedDevice {
    shared: Arc<DeviceShared>,
    injector: Mutex<ChannelTransport>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// Start a device. Returns the host end of the link and the device handle.
    pub fn spawn(config: SimConfig) -> (ChannelTransport, SimulatedDevice) {
        let (host, device) = channel_pair();
        let host = host.with_name("sim");

        let shared = Arc::new(DeviceShared {
            received: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
            commands: Mutex::new(Vec::new()),
            capability_queries: AtomicU32::new(0),
            stop: AtomicBool::new(false),
        });

        let injector = Mutex::new(device.clone());
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("firmata-sim".to_string())
            .spawn(move || run(device, config, thread_shared))
            .ok();
        if handle.is_none() {
            warn!("sim: failed to start device thread");
        }

        (
            host,
            SimulatedDevice {
                shared,
                injector,
                handle,
            },
        )
    }

    /// Send raw bytes to the host.
    pub fn inject(&self, bytes: &[u8]) -> Result<(), TransportError> {
        write_all(&mut *self.injector.lock(), bytes)
    }

    /// Every byte received from the host so far.
    pub fn received(&self) -> Vec<u8> {
        self.shared.received.lock().clone()
    }

    /// Take and clear the received bytes.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.received.lock())
    }

    /// Host commands received so far, one entry per command.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.shared.commands.lock().clone()
    }

    /// Number of capability queries seen, answered or not.
    pub fn capability_queries(&self) -> u32 {
        self.shared.capability_queries.load(Ordering::Acquire)
    }

    /// Wait until at least `len` bytes have been received.
    ///
    /// Returns the received bytes, or `None` on timeout.
    pub fn wait_for_received(&self, len: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut received = self.shared.received.lock();
        while received.len() < len {
            if self.shared.arrived.wait_until(&mut received, deadline).timed_out() {
                return (received.len() >= len).then(|| received.clone());
            }
        }
        Some(received.clone())
    }

    /// Stop the device thread.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut transport: ChannelTransport, config: SimConfig, shared: Arc<DeviceShared>) {
    if config.announce_on_boot && !config.silent {
        let (major, minor) = config.firmware_version;
        let frame = firmware_report(major, minor, &config.firmware_name);
        if write_all(&mut transport, &frame).is_err() {
            return;
        }
    }

    let mut parser = HostParser::default();
    let mut buf = [0u8; 256];
    while !shared.stop.load(Ordering::Acquire) {
        let n = match transport.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                debug!("sim: link closed: {}", e);
                break;
            }
        };

        {
            let mut received = shared.received.lock();
            received.extend_from_slice(&buf[..n]);
            shared.arrived.notify_all();
        }

        parser.push(&buf[..n]);
        while let Some(command) = parser.next_command() {
            trace!("sim: host command {}", hex::encode(&command));
            let mut capability_queries = shared.capability_queries.load(Ordering::Acquire);
            if command[..] == [START_SYSEX, CAPABILITY_QUERY, END_SYSEX] {
                capability_queries = shared.capability_queries.fetch_add(1, Ordering::AcqRel) + 1;
            }
            let replies = respond(&config, &command, capability_queries);
            shared.commands.lock().push(command);

            for reply in replies {
                if let Err(e) = write_all(&mut transport, &reply) {
                    debug!("sim: reply failed: {}", e);
                    return;
                }
            }
        }
    }
}

/// Replies to one host command.
fn respond(config: &SimConfig, command: &[u8], capability_queries: u32) -> Vec<Vec<u8>> {
    if config.silent {
        return Vec::new();
    }

    let header = command[0];
    match header {
        START_SYSEX => match command.get(1).copied() {
            Some(REPORT_FIRMWARE) => {
                let (major, minor) = config.firmware_version;
                vec![firmware_report(major, minor, &config.firmware_name)]
            }
            Some(CAPABILITY_QUERY) => {
                if capability_queries <= config.drop_capability_queries {
                    debug!("sim: dropping capability query {}", capability_queries);
                    Vec::new()
                } else {
                    vec![capability_response(&config.capabilities)]
                }
            }
            Some(ANALOG_MAPPING_QUERY) => {
                vec![analog_mapping_response(&config.analog_mapping)]
            }
            _ => Vec::new(),
        },
        REPORT_VERSION => {
            let (major, minor) = config.protocol_version;
            vec![protocol_version(major, minor)]
        }
        h if h & 0xF0 == REPORT_ANALOG => {
            let channel = h & 0x0F;
            if command.get(1) == Some(&1) {
                let value = config.analog_values.get(&channel).copied().unwrap_or(0);
                vec![analog_report(channel, value)]
            } else {
                Vec::new()
            }
        }
        h if h & 0xF0 == REPORT_DIGITAL => {
            let port = h & 0x0F;
            if command.get(1) == Some(&1) {
                let value = config.port_values.get(&port).copied().unwrap_or(0);
                vec![digital_report(port, value)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}
