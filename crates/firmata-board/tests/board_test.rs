//! End-to-end tests: a `Board` talking to a `SimulatedDevice` over an
//! in-process channel transport.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use firmata_board::sim::{self, SimConfig, SimulatedDevice};
use firmata_board::{Board, BoardConfig, BoardError, ChannelTransport, Transport, TransportError};
use firmata_protocol::{PinMode, PinState};

const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("firmata_board=debug")
        .try_init();
}

/// Open a board against a simulated device.
fn open(config: SimConfig) -> (Board, SimulatedDevice) {
    init_logging();
    let (transport, device) = SimulatedDevice::spawn(config);
    let board = Board::new(transport, BoardConfig::fast()).expect("handshake should complete");
    (board, device)
}

/// Switches shared by every handle of a [`FlakyTransport`].
#[derive(Default)]
struct LinkControl {
    fail_next_read: AtomicBool,
    poll_interval_ms: AtomicU64,
}

/// Channel transport whose next read can be made to fail with an I/O error.
struct FlakyTransport {
    inner: ChannelTransport,
    control: Arc<LinkControl>,
}

impl FlakyTransport {
    fn new(inner: ChannelTransport, control: &Arc<LinkControl>) -> Self {
        FlakyTransport {
            inner,
            control: Arc::clone(control),
        }
    }
}

impl Transport for FlakyTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.control.fail_next_read.swap(false, Ordering::AcqRel) {
            return Err(TransportError::Io(io::Error::new(io::ErrorKind::Other, "framing error")));
        }
        self.inner.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.inner.write(data)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush()
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(FlakyTransport::new(self.inner.clone(), &self.control)))
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<(), TransportError> {
        self.control
            .poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
        self.inner.set_poll_interval(interval)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close()
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

fn open_flaky(config: BoardConfig) -> (Board, SimulatedDevice, Arc<LinkControl>) {
    init_logging();
    let (transport, device) = SimulatedDevice::spawn(SimConfig::uno());
    let control = Arc::new(LinkControl::default());
    let board = Board::new(FlakyTransport::new(transport, &control), config)
        .expect("handshake should complete");
    (board, device, control)
}

/// Poll `condition` until it holds or `WAIT` expires.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Wait for `len` bytes from the host and clear the log.
fn expect_sent(device: &SimulatedDevice, len: usize) -> Vec<u8> {
    let received = device
        .wait_for_received(len, WAIT)
        .expect("host should have sent bytes");
    device.take_received();
    received
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_firmware_report_ascii_name() {
    init_logging();
    let (transport, device) = SimulatedDevice::spawn(SimConfig {
        firmware_name: "Other".to_string(),
        announce_on_boot: false,
        ..SimConfig::two_pin()
    });
    device
        .inject(&[0xF0, 0x79, 2, 5, b'S', b't', b'd', b'F', b'i', b'r', b'm', b'a', b't', b'a', 0xF7])
        .expect("inject should succeed");

    let board = Board::new(transport, BoardConfig::fast()).expect("handshake should complete");
    let firmware = board.firmware();
    assert_eq!(firmware.name, "StdFirmata");
    assert_eq!(firmware.version(), "2.5");
    assert_eq!(firmware.to_string(), "StdFirmata 2.5");
}

#[test]
fn test_two_pin_board_table() {
    let (board, _device) = open(SimConfig::two_pin());

    let pins = board.pins();
    assert_eq!(pins.len(), 2);

    let pin0 = board.pin(0).unwrap();
    assert_eq!(pin0.analog_index, None);
    assert!(pin0.supported_modes.contains(PinMode::Input));
    assert!(pin0.supported_modes.contains(PinMode::Output));

    let pin1 = board.pin(1).unwrap();
    assert_eq!(pin1.analog_index, Some(0));
    assert_eq!(pin1.mode, PinMode::Analog);

    assert_eq!(board.analog_mapping(), vec![1]);
}

#[test]
fn test_boot_delay_queries_silent_announcer() {
    // No firmware announcement: the boot timer has to start the queries
    let (board, device) = open(SimConfig {
        announce_on_boot: false,
        ..SimConfig::uno()
    });

    assert_eq!(board.firmware().name, "StandardFirmata.ino");
    let commands = device.commands();
    assert_eq!(commands[0], vec![0xF0, 0x79, 0xF7]);
    assert_eq!(commands[1], vec![0xF0, 0x6B, 0xF7]);
    assert!(commands.contains(&vec![0xF0, 0x69, 0xF7]));
}

#[test]
fn test_retry_after_dropped_capability_query() {
    let (board, device) = open(SimConfig {
        drop_capability_queries: 1,
        ..SimConfig::uno()
    });

    assert_eq!(board.pins().len(), 20);
    assert!(device.capability_queries() >= 2);
}

#[test]
fn test_handshake_fails_when_device_is_silent() {
    init_logging();
    let (transport, _device) = SimulatedDevice::spawn(SimConfig {
        silent: true,
        ..SimConfig::uno()
    });
    let config = BoardConfig {
        max_retries: 2,
        retry_delay_ms: 20,
        ..BoardConfig::fast()
    };

    match Board::new(transport, config) {
        Err(BoardError::HandshakeTimeout { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected handshake timeout, got {:?}", other),
    }
}

#[test]
fn test_handshake_overall_timeout() {
    init_logging();
    let (transport, _device) = SimulatedDevice::spawn(SimConfig {
        silent: true,
        ..SimConfig::uno()
    });
    let config = BoardConfig {
        max_retries: 1000,
        handshake_timeout_ms: 100,
        ..BoardConfig::fast()
    };

    let started = Instant::now();
    let result = Board::new(transport, config);
    assert!(matches!(result, Err(BoardError::HandshakeTimeout { .. })));
    assert!(started.elapsed() < WAIT);
}

#[test]
fn test_duplicate_responses_do_not_rebuild() {
    let (board, device) = open(SimConfig::two_pin());
    board.set_pin_mode(0, PinMode::Input).unwrap();

    let config = SimConfig::two_pin();
    device.inject(&sim::capability_response(&config.capabilities)).unwrap();
    device.inject(&sim::analog_mapping_response(&config.analog_mapping)).unwrap();

    // Let the reader process the duplicates, then check the table kept its state
    device.inject(&sim::protocol_version(9, 9)).unwrap();
    assert!(eventually(|| board.protocol_version() == Some((9, 9))));
    assert_eq!(board.pin(0).unwrap().mode, PinMode::Input);
}

// ============================================================================
// Pin operations
// ============================================================================

#[test]
fn test_digital_write_sends_port_mask() {
    let (board, device) = open(SimConfig::uno());
    device.take_received();

    board.digital_write(1, PinState::High).unwrap();
    assert_eq!(expect_sent(&device, 3), vec![0x90, 0x02, 0x00]);

    board.digital_write(3, PinState::High).unwrap();
    assert_eq!(expect_sent(&device, 3), vec![0x90, 0x0A, 0x00]);

    assert_eq!(board.digital_read(3).unwrap(), PinState::High);
    assert_eq!(board.digital_read(2).unwrap(), PinState::Low);
}

#[test]
fn test_digital_write_incomplete_port_sends_nothing() {
    let (board, device) = open(SimConfig::two_pin());
    device.take_received();

    let err = board.digital_write(0, PinState::High).unwrap_err();
    assert!(matches!(err, BoardError::UnknownPin(2)));
    assert_eq!(board.digital_read(0).unwrap(), PinState::Low);

    thread::sleep(Duration::from_millis(50));
    assert!(device.received().is_empty());
}

#[test]
fn test_unknown_pin_errors() {
    let (board, _device) = open(SimConfig::two_pin());
    assert!(matches!(board.digital_read(42), Err(BoardError::UnknownPin(42))));
    assert!(matches!(board.analog_read(42), Err(BoardError::UnknownPin(42))));
    assert!(matches!(board.pin(42), Err(BoardError::UnknownPin(42))));
    assert!(matches!(board.set_pin_mode(42, PinMode::Input), Err(BoardError::UnknownPin(42))));
}

#[test]
fn test_set_pin_mode_wire_format() {
    let (board, device) = open(SimConfig::uno());
    device.take_received();

    board.set_pin_mode(13, PinMode::Input).unwrap();
    assert_eq!(expect_sent(&device, 3), vec![0xF4, 13, 0x00]);
    assert_eq!(board.pin(13).unwrap().mode, PinMode::Input);

    // Same mode again sends nothing
    board.set_pin_mode(13, PinMode::Input).unwrap();
    board.set_pin_mode(13, PinMode::Output).unwrap();
    assert_eq!(expect_sent(&device, 3), vec![0xF4, 13, 0x01]);
}

#[test]
fn test_failed_send_leaves_table_unchanged() {
    let (board, device) = open(SimConfig::uno());
    drop(device);

    assert!(matches!(
        board.digital_write(1, PinState::High),
        Err(BoardError::TransportIo(_))
    ));
    assert_eq!(board.digital_read(1).unwrap(), PinState::Low);

    assert!(matches!(
        board.set_pin_mode(13, PinMode::Input),
        Err(BoardError::TransportIo(_))
    ));
    assert_eq!(board.pin(13).unwrap().mode, PinMode::Output);

    // The retry sends again instead of treating the mode as already set
    assert!(matches!(
        board.set_pin_mode(13, PinMode::Input),
        Err(BoardError::TransportIo(_))
    ));
    assert_eq!(board.pin(13).unwrap().mode, PinMode::Output);
}

#[test]
fn test_set_pin_mode_rejections() {
    let (board, device) = open(SimConfig::uno());
    device.take_received();

    assert!(matches!(
        board.set_pin_mode(4, PinMode::Pwm),
        Err(BoardError::UnsupportedMode { pin: 4, mode: PinMode::Pwm })
    ));
    assert!(matches!(
        board.set_pin_mode(4, PinMode::I2c),
        Err(BoardError::InvalidMode { pin: 4, mode: PinMode::I2c })
    ));
    assert_eq!(board.pin(4).unwrap().mode, PinMode::Output);

    thread::sleep(Duration::from_millis(50));
    assert!(device.received().is_empty());
}

#[test]
fn test_analog_write_pwm() {
    let (board, device) = open(SimConfig::uno());
    board.set_pin_mode(9, PinMode::Pwm).unwrap();
    device.take_received();

    board.analog_write(9, 200).unwrap();
    assert_eq!(expect_sent(&device, 3), vec![0xE9, 0x48, 0x01]);
    assert_eq!(board.analog_read(9).unwrap(), 200);

    assert!(matches!(
        board.analog_write(13, 10),
        Err(BoardError::InvalidMode { pin: 13, mode: PinMode::Output })
    ));
}

// ============================================================================
// Reporting
// ============================================================================

#[test]
fn test_analog_reporting() {
    let (board, device) = open(SimConfig {
        analog_values: BTreeMap::from([(0, 512)]),
        ..SimConfig::uno()
    });
    device.take_received();

    board.set_pin_reporting(14, true).unwrap();
    assert_eq!(expect_sent(&device, 2), vec![0xC0, 0x01]);
    assert!(eventually(|| board.analog_read(14).unwrap() == 512));
    assert!(board.pin(14).unwrap().reporting);

    device.inject(&sim::analog_report(0, 1023)).unwrap();
    assert!(eventually(|| board.analog_read(14).unwrap() == 1023));

    board.set_pin_reporting(14, false).unwrap();
    assert_eq!(expect_sent(&device, 2), vec![0xC0, 0x00]);
}

#[test]
fn test_digital_reporting_updates_inputs_only() {
    let (board, device) = open(SimConfig {
        port_values: BTreeMap::from([(0, 0b0000_0100)]),
        ..SimConfig::uno()
    });
    board.set_pin_mode(2, PinMode::Input).unwrap();
    device.take_received();

    board.set_pin_reporting(2, true).unwrap();
    assert_eq!(expect_sent(&device, 2), vec![0xD0, 0x01]);
    assert!(eventually(|| board.digital_read(2).unwrap() == PinState::High));

    // Pin 3 is an output; a report claiming it is high must not change it
    device.inject(&sim::digital_report(0, 0b0000_1000)).unwrap();
    assert!(eventually(|| board.digital_read(2).unwrap() == PinState::Low));
    assert_eq!(board.digital_read(3).unwrap(), PinState::Low);
}

#[test]
fn test_port_reporting_kept_for_remaining_input() {
    let (board, device) = open(SimConfig::uno());
    for pin in [2, 3] {
        board.set_pin_mode(pin, PinMode::Input).unwrap();
        board.set_pin_reporting(pin, true).unwrap();
    }
    expect_sent(&device, 10);

    // Pin 3 still needs port 0
    board.set_pin_reporting(2, false).unwrap();
    assert!(!board.pin(2).unwrap().reporting);
    assert!(board.pin(3).unwrap().reporting);
    thread::sleep(Duration::from_millis(50));
    assert!(device.received().is_empty());

    board.set_pin_reporting(3, false).unwrap();
    assert_eq!(expect_sent(&device, 2), vec![0xD0, 0x00]);
    assert!(!board.pin(3).unwrap().reporting);
}

#[test]
fn test_reporting_rejects_output_pin() {
    let (board, _device) = open(SimConfig::uno());
    assert!(matches!(
        board.set_pin_reporting(7, true),
        Err(BoardError::InvalidMode { pin: 7, mode: PinMode::Output })
    ));
}

// ============================================================================
// Device control and lifecycle
// ============================================================================

#[test]
fn test_sampling_interval_and_reset() {
    let (board, device) = open(SimConfig::uno());
    board.set_pin_mode(5, PinMode::Pwm).unwrap();
    device.take_received();

    board.set_sampling_interval(100).unwrap();
    assert_eq!(expect_sent(&device, 5), vec![0xF0, 0x7A, 0x64, 0x00, 0xF7]);

    board.reset().unwrap();
    assert_eq!(expect_sent(&device, 1), vec![0xFF]);
    assert_eq!(board.pin(5).unwrap().mode, PinMode::Output);
}

#[test]
fn test_protocol_version_query() {
    let (board, device) = open(SimConfig {
        protocol_version: (2, 6),
        ..SimConfig::uno()
    });
    device.take_received();

    board.query_protocol_version().unwrap();
    assert_eq!(expect_sent(&device, 1), vec![0xF9]);
    assert!(eventually(|| board.protocol_version() == Some((2, 6))));
}

#[test]
fn test_noise_between_frames_is_skipped() {
    let (board, device) = open(SimConfig::uno());
    board.set_pin_mode(14, PinMode::Analog).unwrap();

    let mut bytes = vec![0x00, 0x42, 0x13];
    bytes.extend(sim::analog_report(0, 300));
    device.inject(&bytes).unwrap();
    assert!(eventually(|| board.analog_read(14).unwrap() == 300));
}

#[test]
fn test_read_error_drops_partial_frame() {
    let (board, device, control) = open_flaky(BoardConfig::fast());

    // Half a firmware report, then the link fails mid-frame
    device.inject(&[0xF0, 0x79, 0x02]).unwrap();
    thread::sleep(Duration::from_millis(50));
    control.fail_next_read.store(true, Ordering::Release);
    assert!(eventually(|| !control.fail_next_read.load(Ordering::Acquire)));

    device.inject(&sim::analog_report(0, 300)).unwrap();
    assert!(eventually(|| board.analog_read(14).unwrap() == 300));
    assert_eq!(board.firmware().name, "StandardFirmata.ino");
}

#[test]
fn test_configured_poll_interval_reaches_transport() {
    let config = BoardConfig {
        poll_interval_ms: 7,
        ..BoardConfig::fast()
    };
    let (_board, _device, control) = open_flaky(config);
    assert_eq!(control.poll_interval_ms.load(Ordering::Acquire), 7);
}

#[test]
fn test_display_and_close() {
    let (board, device) = open(SimConfig::uno());
    assert_eq!(board.to_string(), "Firmata board on 'sim'");

    board.close().expect("close should succeed");
    assert!(device.inject(&[0x90, 0, 0]).is_err());
}

#[test]
fn test_concurrent_writes_same_port() {
    let (board, device) = open(SimConfig::uno());
    device.take_received();

    thread::scope(|scope| {
        for pin in 2..8u8 {
            let board = &board;
            scope.spawn(move || board.digital_write(pin, PinState::High).unwrap());
        }
    });

    // Every write carried the bits of the writes before it
    let sent = expect_sent(&device, 18);
    let last = &sent[sent.len() - 3..];
    assert_eq!(last, &[0x90, 0x7C, 0x01]);
}
