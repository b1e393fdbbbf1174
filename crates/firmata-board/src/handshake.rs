//! Device discovery handshake.
//!
//! Before any pin operation is valid the host has to learn what the device
//! has: its firmware, the modes of every pin and the analog channel of every
//! analog pin. The sequence is
//!
//! 1. wait for the device to announce its firmware, or for the boot delay
//!    to expire (many boards reset when the port opens);
//! 2. send a capability query;
//! 3. on the capability response, send an analog-mapping query;
//! 4. on the analog-mapping response, build the pin table.
//!
//! Responses can be lost while the device is still booting, so unanswered
//! queries are re-sent on a retry timer, a bounded number of times.
//!
//! The state machine performs no I/O. Every event returns a list of
//! [`HandshakeAction`]s for the reader loop to carry out.

use std::time::Duration;

use firmata_protocol::{Command, PinCapability};
use tracing::{debug, info, warn};

use crate::config::BoardConfig;
use crate::pins::PinTable;

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for the firmware report or the boot delay.
    AwaitingFirmware,
    /// Capability query sent.
    AwaitingCapability,
    /// Capability response received, analog-mapping query sent.
    AwaitingAnalogMapping,
    /// Pin table built.
    Ready,
}

/// One-shot timers the handshake schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// The device has had time to boot.
    Boot,
    /// Re-send whatever is still unanswered.
    Retry,
}

/// Something the reader loop must do on behalf of the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// Send a command to the device.
    Send(Command),
    /// Fire `TimerKind` after the given delay.
    Schedule(TimerKind, Duration),
    /// The pin table is complete; the session is ready.
    Ready(PinTable),
    /// Retries are exhausted.
    Failed {
        /// Number of retries sent.
        attempts: u32,
    },
}

/// Handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    phase: HandshakePhase,
    retry_delay: Duration,
    max_retries: u32,
    /// Whether a firmware report has been seen since open.
    firmware_seen: bool,
    capabilities: Option<Vec<PinCapability>>,
    analog_mapping: Option<Vec<Option<u8>>>,
    retries: u32,
    /// Whether a retry timer is outstanding.
    retry_pending: bool,
    failed: bool,
}

impl Handshake {
    /// Create a handshake using the timing in `config`.
    pub fn new(config: &BoardConfig) -> Self {
        Handshake {
            phase: HandshakePhase::AwaitingFirmware,
            retry_delay: config.retry_delay(),
            max_retries: config.max_retries,
            firmware_seen: false,
            capabilities: None,
            analog_mapping: None,
            retries: 0,
            retry_pending: false,
            failed: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether the pin table has been built.
    pub fn is_ready(&self) -> bool {
        self.phase == HandshakePhase::Ready
    }

    /// Number of retries sent so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Actions to run when the session starts.
    pub fn start(&mut self, boot_delay: Duration) -> Vec<HandshakeAction> {
        vec![HandshakeAction::Schedule(TimerKind::Boot, boot_delay)]
    }

    /// A firmware report arrived.
    ///
    /// The first report after open means the device has finished booting,
    /// which starts the query sequence without waiting for the boot delay.
    pub fn on_firmware_report(&mut self) -> Vec<HandshakeAction> {
        let first = !self.firmware_seen;
        self.firmware_seen = true;

        if first && self.phase == HandshakePhase::AwaitingFirmware {
            debug!("device announced itself, querying capabilities");
            return self.begin_queries(false);
        }
        Vec::new()
    }

    /// A timer fired.
    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<HandshakeAction> {
        match kind {
            TimerKind::Boot => {
                if self.phase != HandshakePhase::AwaitingFirmware {
                    return Vec::new();
                }
                debug!("boot delay elapsed without firmware report, querying device");
                self.begin_queries(true)
            }
            TimerKind::Retry => {
                self.retry_pending = false;
                self.retry()
            }
        }
    }

    /// A capability response arrived.
    pub fn on_capability_response(&mut self, capabilities: Vec<PinCapability>) -> Vec<HandshakeAction> {
        if self.is_ready() {
            debug!("ignoring capability response, pin table already built");
            return Vec::new();
        }
        if self.capabilities.is_some() {
            debug!("duplicate capability response");
            return Vec::new();
        }

        debug!("capability response for {} pins", capabilities.len());
        self.capabilities = Some(capabilities);

        if self.analog_mapping.is_some() {
            return self.build();
        }

        self.phase = HandshakePhase::AwaitingAnalogMapping;
        let mut actions = vec![HandshakeAction::Send(Command::AnalogMappingQuery)];
        actions.extend(self.schedule_retry());
        actions
    }

    /// An analog-mapping response arrived.
    pub fn on_analog_mapping(&mut self, mapping: Vec<Option<u8>>) -> Vec<HandshakeAction> {
        if self.is_ready() {
            debug!("ignoring analog mapping response, pin table already built");
            return Vec::new();
        }

        debug!(
            "analog mapping for {} pins ({} analog)",
            mapping.len(),
            mapping.iter().filter(|m| m.is_some()).count()
        );
        self.analog_mapping = Some(mapping);

        if self.capabilities.is_some() {
            self.build()
        } else {
            Vec::new()
        }
    }

    fn begin_queries(&mut self, query_firmware: bool) -> Vec<HandshakeAction> {
        self.phase = HandshakePhase::AwaitingCapability;
        let mut actions = Vec::new();
        if query_firmware {
            actions.push(HandshakeAction::Send(Command::FirmwareQuery));
        }
        actions.push(HandshakeAction::Send(Command::CapabilityQuery));
        actions.extend(self.schedule_retry());
        actions
    }

    fn schedule_retry(&mut self) -> Option<HandshakeAction> {
        if self.retry_pending {
            return None;
        }
        self.retry_pending = true;
        Some(HandshakeAction::Schedule(TimerKind::Retry, self.retry_delay))
    }

    fn retry(&mut self) -> Vec<HandshakeAction> {
        if self.is_ready() || self.failed {
            return Vec::new();
        }
        if self.retries >= self.max_retries {
            warn!("handshake failed after {} retries", self.retries);
            self.failed = true;
            return vec![HandshakeAction::Failed {
                attempts: self.retries,
            }];
        }

        self.retries += 1;
        let mut actions = Vec::new();
        if self.capabilities.is_none() {
            debug!("retry {}: capability query", self.retries);
            actions.push(HandshakeAction::Send(Command::CapabilityQuery));
        }
        if self.analog_mapping.is_none() {
            debug!("retry {}: analog mapping query", self.retries);
            actions.push(HandshakeAction::Send(Command::AnalogMappingQuery));
        }
        actions.extend(self.schedule_retry());
        actions
    }

    fn build(&mut self) -> Vec<HandshakeAction> {
        let (Some(capabilities), Some(mapping)) = (&self.capabilities, &self.analog_mapping) else {
            return Vec::new();
        };

        let table = PinTable::build(capabilities, mapping);
        info!(
            "pin table ready: {} pins, {} analog",
            table.len(),
            table.analog_mapping().len()
        );
        self.phase = HandshakePhase::Ready;
        vec![HandshakeAction::Ready(table)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmata_protocol::{ModeResolution, PinMode};

    fn config() -> BoardConfig {
        BoardConfig {
            max_retries: 2,
            ..BoardConfig::default()
        }
    }

    fn capabilities() -> Vec<PinCapability> {
        vec![
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
        ]
    }

    fn sends(actions: &[HandshakeAction]) -> Vec<Command> {
        actions
            .iter()
            .filter_map(|a| match a {
                HandshakeAction::Send(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_firmware_report_starts_queries() {
        let mut hs = Handshake::new(&config());
        let actions = hs.on_firmware_report();
        assert_eq!(sends(&actions), vec![Command::CapabilityQuery]);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingCapability);

        // Second report does not restart the sequence
        assert!(hs.on_firmware_report().is_empty());
        // Neither does the boot timer
        assert!(hs.on_timer(TimerKind::Boot).is_empty());
    }

    #[test]
    fn test_boot_timer_starts_queries() {
        let mut hs = Handshake::new(&config());
        let actions = hs.on_timer(TimerKind::Boot);
        assert_eq!(sends(&actions), vec![Command::FirmwareQuery, Command::CapabilityQuery]);
        assert!(actions.contains(&HandshakeAction::Schedule(TimerKind::Retry, config().retry_delay())));
    }

    #[test]
    fn test_full_sequence() {
        let mut hs = Handshake::new(&config());
        hs.on_firmware_report();

        let actions = hs.on_capability_response(capabilities());
        assert_eq!(sends(&actions), vec![Command::AnalogMappingQuery]);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingAnalogMapping);

        let actions = hs.on_analog_mapping(vec![None, Some(0)]);
        let [HandshakeAction::Ready(table)] = actions.as_slice() else {
            panic!("expected ready, got {:?}", actions);
        };
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().analog_index, Some(0));
        assert!(hs.is_ready());
    }

    #[test]
    fn test_mapping_before_capabilities() {
        let mut hs = Handshake::new(&config());
        hs.on_firmware_report();
        assert!(hs.on_analog_mapping(vec![None, Some(0)]).is_empty());

        let actions = hs.on_capability_response(capabilities());
        assert!(matches!(actions.as_slice(), [HandshakeAction::Ready(_)]));
    }

    #[test]
    fn test_build_once() {
        let mut hs = Handshake::new(&config());
        hs.on_firmware_report();
        hs.on_capability_response(capabilities());
        hs.on_analog_mapping(vec![None, Some(0)]);

        assert!(hs.on_capability_response(capabilities()).is_empty());
        assert!(hs.on_analog_mapping(vec![None, Some(0)]).is_empty());
        assert!(hs.on_timer(TimerKind::Retry).is_empty());
    }

    #[test]
    fn test_retry_resends_unanswered_queries() {
        let mut hs = Handshake::new(&config());
        hs.on_firmware_report();

        let actions = hs.on_timer(TimerKind::Retry);
        assert_eq!(sends(&actions), vec![Command::CapabilityQuery, Command::AnalogMappingQuery]);

        hs.on_capability_response(capabilities());
        let actions = hs.on_timer(TimerKind::Retry);
        assert_eq!(sends(&actions), vec![Command::AnalogMappingQuery]);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut hs = Handshake::new(&config());
        hs.on_timer(TimerKind::Boot);

        assert!(!hs.on_timer(TimerKind::Retry).is_empty());
        assert!(!hs.on_timer(TimerKind::Retry).is_empty());
        let actions = hs.on_timer(TimerKind::Retry);
        assert_eq!(actions, vec![HandshakeAction::Failed { attempts: 2 }]);
        assert!(hs.on_timer(TimerKind::Retry).is_empty());
    }
}
