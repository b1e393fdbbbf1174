//! Board session.
//!
//! A [`Board`] owns one transport and one background reader. The constructor
//! blocks until the handshake has built the pin table, so every method on a
//! returned `Board` can assume the table exists.
//!
//! The pin table and the writer share one lock. A write operation validates,
//! sends the command and only then updates the table, all while holding it.
//! Concurrent writes to pins of the same port cannot lose each other's bits,
//! and a write that fails to send leaves the table as it was.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;
use firmata_protocol::{Command, PinMode, PinState};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::BoardConfig;
use crate::error::{BoardError, BoardResult, TransportError};
use crate::pins::{Pin, PinTable, PinUpdate};
use crate::reader::{ReadySignal, Reader};
use crate::transport::{write_all, Transport};

/// Firmware identity reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    /// Firmware name, e.g. `StandardFirmata.ino`.
    pub name: String,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl FirmwareInfo {
    /// Version as `major.minor`.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.name, self.major, self.minor)
    }
}

/// State guarded by the session lock.
pub(crate) struct Session {
    writer: Box<dyn Transport>,
    pub(crate) firmware: FirmwareInfo,
    pub(crate) protocol_version: Option<(u8, u8)>,
    pub(crate) pins: PinTable,
}

impl Session {
    /// Encode and write one command.
    pub(crate) fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let bytes = command.encode();
        trace!("tx {:?} {}", command, hex::encode(&bytes));
        write_all(self.writer.as_mut(), &bytes)
    }

    fn send_checked(&mut self, command: &Command) -> BoardResult<()> {
        command.validate()?;
        self.send(command)?;
        Ok(())
    }

    /// Send an update's command, then apply it to the table. A failed send
    /// leaves the table untouched.
    fn commit(&mut self, update: PinUpdate) -> BoardResult<()> {
        if let Some(command) = &update.command {
            self.send_checked(command)?;
        }
        self.pins.apply(&update);
        Ok(())
    }
}

/// State shared between the board handle and its reader thread.
pub(crate) struct Shared {
    pub(crate) session: Mutex<Session>,
    stop: AtomicBool,
    retries: AtomicU32,
}

impl Shared {
    fn new(writer: Box<dyn Transport>) -> Self {
        Shared {
            session: Mutex::new(Session {
                writer,
                firmware: FirmwareInfo::default(),
                protocol_version: None,
                pins: PinTable::default(),
            }),
            stop: AtomicBool::new(false),
            retries: AtomicU32::new(0),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_retries(&self, retries: u32) {
        self.retries.store(retries, Ordering::Release);
    }
}

/// A connected Firmata device.
pub struct Board {
    label: String,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl Board {
    /// Open a session over `transport` and run the handshake.
    ///
    /// Returns once the pin table is built. Fails with
    /// [`BoardError::HandshakeTimeout`] if the device does not answer within
    /// `config.handshake_timeout_ms` or the query retries run out.
    pub fn new<T: Transport>(transport: T, config: BoardConfig) -> BoardResult<Board> {
        Board::from_boxed(Box::new(transport), config)
    }

    /// Like [`Board::new`], for an already boxed transport.
    ///
    /// The transport's poll interval is set from `config.poll_interval_ms`.
    pub fn from_boxed(mut transport: Box<dyn Transport>, config: BoardConfig) -> BoardResult<Board> {
        let label = transport.describe();
        transport.set_poll_interval(config.poll_interval())?;
        let writer = transport.try_clone()?;
        let shared = Arc::new(Shared::new(writer));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let reader = Reader::new(transport, Arc::clone(&shared), &config, ready_tx);

        debug!("opening board on {}", label);
        let started = Instant::now();
        let handle = reader.spawn(&label).map_err(BoardError::ReaderSpawn)?;

        let mut board = Board {
            label,
            shared,
            reader: Some(handle),
        };

        let failure = match ready_rx.recv_timeout(config.handshake_timeout()) {
            Ok(ReadySignal::Ready) => {
                info!("{} ready ({})", board, board.firmware());
                return Ok(board);
            }
            Ok(ReadySignal::Failed { attempts }) => BoardError::HandshakeTimeout {
                elapsed: started.elapsed(),
                attempts,
            },
            Err(RecvTimeoutError::Timeout) => BoardError::HandshakeTimeout {
                elapsed: started.elapsed(),
                attempts: board.shared.retries.load(Ordering::Acquire),
            },
            Err(RecvTimeoutError::Disconnected) => BoardError::TransportIo(TransportError::Disconnected),
        };

        warn!("{}: {}", board, failure);
        if let Err(e) = board.shutdown() {
            debug!("error closing after failed handshake: {}", e);
        }
        Err(failure)
    }

    /// Open a serial device and run the handshake.
    #[cfg(feature = "serial")]
    pub fn open_serial(path: &str, baud: u32, config: BoardConfig) -> BoardResult<Board> {
        let transport = crate::transport::SerialTransport::open(path, baud, config.poll_interval())
            .map_err(|e| BoardError::TransportOpenFailed(e.to_string()))?;
        Board::new(transport, config)
    }

    /// Stop the reader, flush pending output and close the transport.
    pub fn close(mut self) -> BoardResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> BoardResult<()> {
        self.shared.stop.store(true, Ordering::Release);

        let result = {
            let mut session = self.shared.session.lock();
            session.writer.flush().and_then(|_| session.writer.close())
        };

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("reader thread for {} panicked", self.label);
            }
        }
        debug!("closed {}", self.label);

        result.map_err(BoardError::from)
    }

    /// Transport description.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Firmware identity from the most recent report.
    pub fn firmware(&self) -> FirmwareInfo {
        self.shared.session.lock().firmware.clone()
    }

    /// Protocol version, if the device has reported one.
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        self.shared.session.lock().protocol_version
    }

    // ------------------------------------------------------------------------
    // Pin table queries
    // ------------------------------------------------------------------------

    /// Copy of one pin's state.
    pub fn pin(&self, pin: u8) -> BoardResult<Pin> {
        self.shared.session.lock().pins.get(pin).ok_or(BoardError::UnknownPin(pin))
    }

    /// Copies of all pins, ordered by pin number.
    pub fn pins(&self) -> Vec<Pin> {
        self.shared.session.lock().pins.pins()
    }

    /// Pins grouped by port.
    pub fn port_to_pins(&self) -> BTreeMap<u8, BTreeSet<u8>> {
        self.shared.session.lock().pins.port_to_pins()
    }

    /// Device pin numbers ordered by analog channel: entry `n` is the pin
    /// behind `An`.
    pub fn analog_mapping(&self) -> Vec<u8> {
        self.shared.session.lock().pins.analog_mapping()
    }

    /// Last known digital level of a pin.
    pub fn digital_read(&self, pin: u8) -> BoardResult<PinState> {
        self.shared.session.lock().pins.digital_read(pin)
    }

    /// Last known analog value of a pin.
    pub fn analog_read(&self, pin: u8) -> BoardResult<u16> {
        self.shared.session.lock().pins.analog_read(pin)
    }

    // ------------------------------------------------------------------------
    // Pin operations
    // ------------------------------------------------------------------------

    /// Drive a pin high or low.
    ///
    /// Sends the whole port. Fails with [`BoardError::UnknownPin`] without
    /// sending anything if any pin of the port is missing from the table.
    pub fn digital_write(&self, pin: u8, value: PinState) -> BoardResult<()> {
        let mut session = self.shared.session.lock();
        let update = session.pins.digital_write(pin, value)?;
        session.commit(update)
    }

    /// Set a PWM pin's duty value.
    pub fn analog_write(&self, pin: u8, value: u16) -> BoardResult<()> {
        let mut session = self.shared.session.lock();
        let update = session.pins.analog_write(pin, value)?;
        session.commit(update)
    }

    /// Change a pin's mode. Setting the current mode again sends nothing.
    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> BoardResult<()> {
        let mut session = self.shared.session.lock();
        let update = session.pins.set_pin_mode(pin, mode)?;
        if update.is_empty() {
            debug!("pin {} already in {} mode", pin, mode);
        }
        session.commit(update)
    }

    /// Ask the device to start or stop reporting a pin.
    ///
    /// Analog pins are reported per channel, digital inputs per port. A port
    /// keeps reporting until its last reporting input is disabled.
    pub fn set_pin_reporting(&self, pin: u8, enabled: bool) -> BoardResult<()> {
        let mut session = self.shared.session.lock();
        let update = session.pins.set_pin_reporting(pin, enabled)?;
        session.commit(update)
    }

    // ------------------------------------------------------------------------
    // Device control
    // ------------------------------------------------------------------------

    /// Set how often the device samples reporting pins.
    pub fn set_sampling_interval(&self, interval_ms: u16) -> BoardResult<()> {
        self.shared
            .session
            .lock()
            .send_checked(&Command::SamplingInterval { interval_ms })
    }

    /// Reset the device and return the pin table to its initial state.
    pub fn reset(&self) -> BoardResult<()> {
        let mut session = self.shared.session.lock();
        session.send_checked(&Command::SystemReset)?;
        session.pins.reset_to_defaults();
        Ok(())
    }

    /// Ask the device to report its firmware again.
    ///
    /// The answer updates [`Board::firmware`] when it arrives.
    pub fn query_firmware(&self) -> BoardResult<()> {
        self.shared.session.lock().send_checked(&Command::FirmwareQuery)
    }

    /// Ask the device to report its protocol version.
    pub fn query_protocol_version(&self) -> BoardResult<()> {
        self.shared
            .session
            .lock()
            .send_checked(&Command::ProtocolVersionQuery)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Firmata board on '{}'", self.label)
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("label", &self.label)
            .field("running", &self.reader.is_some())
            .finish()
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        if self.reader.is_some() {
            if let Err(e) = self.shutdown() {
                debug!("error closing {} on drop: {}", self.label, e);
            }
        }
    }
}
