//! Background reader loop.
//!
//! One thread per session reads the transport, frames the bytes, decodes
//! each frame and dispatches it. Messages are handled one at a time in
//! arrival order, on this thread, so handlers must never wait for a later
//! frame.
//!
//! The loop also owns the handshake and its one-shot timers. Timers live in
//! a min-heap and are checked between reads, which is why reads are bounded
//! by the transport's poll interval.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use firmata_protocol::{Frame, FrameCodec, Message};
use tracing::{debug, info, trace, warn};

use crate::board::{FirmwareInfo, Shared};
use crate::config::BoardConfig;
use crate::error::TransportError;
use crate::handshake::{Handshake, HandshakeAction, TimerKind};
use crate::transport::Transport;

/// Size of the read buffer handed to the transport.
const READ_CHUNK: usize = 256;

/// Outcome of the handshake, sent once to the waiting constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadySignal {
    /// Pin table built.
    Ready,
    /// Retries exhausted.
    Failed {
        /// Number of retries sent.
        attempts: u32,
    },
}

/// A one-shot timer.
#[derive(Debug, Clone, Copy)]
struct Timer {
    due: Instant,
    kind: TimerKind,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for min-heap (earliest first)
        other.due.cmp(&self.due)
    }
}

/// State owned by the reader thread.
pub(crate) struct Reader {
    transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    codec: FrameCodec,
    handshake: Handshake,
    timers: BinaryHeap<Timer>,
    boot_delay: Duration,
    error_backoff: Duration,
    ready_tx: Option<Sender<ReadySignal>>,
}

impl Reader {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        shared: Arc<Shared>,
        config: &BoardConfig,
        ready_tx: Sender<ReadySignal>,
    ) -> Self {
        Reader {
            transport,
            shared,
            codec: FrameCodec::new(),
            handshake: Handshake::new(config),
            timers: BinaryHeap::new(),
            boot_delay: config.boot_delay(),
            error_backoff: config.poll_interval(),
            ready_tx: Some(ready_tx),
        }
    }

    /// Start the loop on its own thread.
    pub(crate) fn spawn(self, label: &str) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("firmata-reader-{}", label))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        let actions = self.handshake.start(self.boot_delay);
        self.perform(actions);

        let mut buf = [0u8; READ_CHUNK];
        while !self.shared.is_stopped() {
            match self.transport.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    self.codec.push(&buf[..n]);
                    while let Some(frame) = self.codec.decode() {
                        self.dispatch(frame);
                    }
                }
                Err(TransportError::Disconnected) | Err(TransportError::Closed) => {
                    if !self.shared.is_stopped() {
                        warn!("transport went away, stopping reader");
                    }
                    break;
                }
                Err(e) => {
                    warn!("read error, dropping partial frame: {}", e);
                    self.codec.abort_frame();
                    thread::sleep(self.error_backoff);
                }
            }

            self.fire_due_timers();
        }

        debug!(
            "reader loop exiting ({} noise bytes discarded)",
            self.codec.discarded()
        );
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while self.timers.peek().is_some_and(|t| t.due <= now) {
            let Some(timer) = self.timers.pop() else {
                break;
            };
            let actions = self.handshake.on_timer(timer.kind);
            self.shared.set_retries(self.handshake.retries());
            self.perform(actions);
        }
    }

    /// Route one frame to its handler.
    fn dispatch(&mut self, frame: Frame) {
        trace!("rx {}", hex::encode(&frame.payload));

        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed frame {}: {}", hex::encode(&frame.payload), e);
                return;
            }
        };

        let actions = match message {
            Message::FirmwareReport { major, minor, name } => {
                info!("firmware: {} {}.{}", name, major, minor);
                self.shared.session.lock().firmware = FirmwareInfo { name, major, minor };
                self.handshake.on_firmware_report()
            }
            Message::ProtocolVersion { major, minor } => {
                debug!("protocol version {}.{}", major, minor);
                self.shared.session.lock().protocol_version = Some((major, minor));
                Vec::new()
            }
            Message::CapabilityResponse(capabilities) => {
                self.handshake.on_capability_response(capabilities)
            }
            Message::AnalogMappingResponse(mapping) => self.handshake.on_analog_mapping(mapping),
            Message::DigitalMessage { port, value } => {
                if self.handshake.is_ready() {
                    self.shared.session.lock().pins.apply_digital_report(port, value);
                }
                Vec::new()
            }
            Message::AnalogMessage { channel, value } => {
                if self.handshake.is_ready() {
                    self.shared.session.lock().pins.apply_analog_report(channel, value);
                }
                Vec::new()
            }
            Message::Unknown(command) => {
                trace!("no handler for command 0x{:02X}", command);
                Vec::new()
            }
        };

        self.perform(actions);
    }

    fn perform(&mut self, actions: Vec<HandshakeAction>) {
        for action in actions {
            match action {
                HandshakeAction::Send(command) => {
                    if let Err(e) = self.shared.session.lock().send(&command) {
                        warn!("failed to send {:?}: {}", command, e);
                    }
                }
                HandshakeAction::Schedule(kind, delay) => {
                    self.timers.push(Timer {
                        due: Instant::now() + delay,
                        kind,
                    });
                }
                HandshakeAction::Ready(table) => {
                    self.shared.session.lock().pins = table;
                    self.signal(ReadySignal::Ready);
                }
                HandshakeAction::Failed { attempts } => {
                    self.signal(ReadySignal::Failed { attempts });
                }
            }
        }
    }

    fn signal(&mut self, signal: ReadySignal) {
        if let Some(tx) = self.ready_tx.take() {
            // The constructor may already have given up
            let _ = tx.send(signal);
        }
    }
}
