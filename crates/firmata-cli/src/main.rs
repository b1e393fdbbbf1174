//! `firmata`: inspect and drive a board running Firmata firmware.

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use firmata_board::sim::{SimConfig, SimulatedDevice};
use firmata_board::{Board, BoardError, FirmwareInfo, Pin};
use firmata_protocol::{PinMode, PinState};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

/// Talk to a microcontroller running Firmata firmware
#[derive(Parser, Debug)]
#[command(name = "firmata", version, about, long_about = None)]
struct Args {
    /// Serial device (e.g. /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate [default: 57600]
    #[arg(short, long)]
    baud: Option<u32>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a built-in simulated Arduino Uno instead of a serial device
    #[arg(long)]
    simulate: bool,

    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show firmware and pin table
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set a pin's mode (input, output, analog, pwm, servo, shift, i2c)
    Mode { pin: u8, mode: PinMode },

    /// Drive a digital pin high or low
    Write { pin: u8, value: PinState },

    /// Set a PWM pin's duty value
    Pwm { pin: u8, value: u16 },

    /// Read a pin once
    Read {
        pin: u8,

        /// Time to wait for the device to report
        #[arg(long, default_value_t = 200)]
        wait_ms: u64,
    },

    /// Print pin values until interrupted
    Watch {
        #[arg(required = true)]
        pins: Vec<u8>,

        /// Print interval
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.baud = baud;
    }
    debug!("configuration: {:?}", config);

    // Keep the simulated device alive as long as the board
    let (board, _device) = open_board(&args, &config)?;

    match args.command {
        Command::Info { json } => print_info(&board, json)?,
        Command::Mode { pin, mode } => {
            board.set_pin_mode(pin, mode)?;
            println!("pin {} -> {}", pin, mode);
        }
        Command::Write { pin, value } => {
            board.set_pin_mode(pin, PinMode::Output)?;
            board.digital_write(pin, value)?;
            println!("pin {} -> {}", pin, value);
        }
        Command::Pwm { pin, value } => {
            board.set_pin_mode(pin, PinMode::Pwm)?;
            board.analog_write(pin, value)?;
            println!("pin {} -> {}", pin, value);
        }
        Command::Read { pin, wait_ms } => {
            start_reporting(&board, pin)?;
            thread::sleep(Duration::from_millis(wait_ms));
            println!("{}", format_value(&board.pin(pin)?));
            board.set_pin_reporting(pin, false)?;
        }
        Command::Watch { pins, interval_ms } => watch(&board, &pins, interval_ms)?,
    }

    board.close()?;
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_board(
    args: &Args,
    config: &CliConfig,
) -> Result<(Board, Option<SimulatedDevice>), Box<dyn std::error::Error>> {
    if args.simulate {
        info!("using simulated device");
        let (transport, device) = SimulatedDevice::spawn(SimConfig {
            analog_values: BTreeMap::from([(0, 512), (1, 1023)]),
            port_values: BTreeMap::from([(0, 0b0000_0100)]),
            ..SimConfig::uno()
        });
        let board = Board::new(transport, config.board.clone())?;
        return Ok((board, Some(device)));
    }

    let port = config
        .port
        .clone()
        .ok_or("no serial port given (use --port, a config file or --simulate)")?;
    Ok((open_serial(&port, config)?, None))
}

#[cfg(feature = "serial")]
fn open_serial(port: &str, config: &CliConfig) -> Result<Board, BoardError> {
    info!("opening {} at {} baud", port, config.baud);
    Board::open_serial(port, config.baud, config.board.clone())
}

#[cfg(not(feature = "serial"))]
fn open_serial(port: &str, _config: &CliConfig) -> Result<Board, BoardError> {
    Err(BoardError::TransportOpenFailed(format!(
        "{}: built without serial support",
        port
    )))
}

/// Put a pin in a readable mode and ask the device to report it.
fn start_reporting(board: &Board, pin: u8) -> Result<(), BoardError> {
    let current = board.pin(pin)?;
    if current.is_analog() {
        board.set_pin_mode(pin, PinMode::Analog)?;
    } else {
        board.set_pin_mode(pin, PinMode::Input)?;
    }
    board.set_pin_reporting(pin, true)
}

fn format_value(pin: &Pin) -> String {
    if pin.mode == PinMode::Analog || pin.mode == PinMode::Pwm {
        format!("pin {}: {}", pin.number, pin.analog_value)
    } else {
        format!("pin {}: {}", pin.number, pin.digital_value)
    }
}

fn watch(board: &Board, pins: &[u8], interval_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    for &pin in pins {
        start_reporting(board, pin)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        let line: Vec<String> = pins
            .iter()
            .map(|&pin| board.pin(pin).map(|p| format_value(&p)))
            .collect::<Result<_, _>>()?;
        println!("{}", line.join("  "));
        thread::sleep(Duration::from_millis(interval_ms));
    }

    for &pin in pins {
        board.set_pin_reporting(pin, false)?;
    }
    Ok(())
}

// ============================================================================
// Info
// ============================================================================

#[derive(Serialize)]
struct PinReport {
    pin: u8,
    port: u8,
    mode: String,
    supported_modes: Vec<String>,
    analog_channel: Option<u8>,
}

#[derive(Serialize)]
struct InfoReport {
    transport: String,
    firmware: FirmwareInfo,
    protocol_version: Option<String>,
    analog_mapping: Vec<u8>,
    pins: Vec<PinReport>,
}

fn print_info(board: &Board, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    board.query_protocol_version()?;
    thread::sleep(Duration::from_millis(100));

    let report = InfoReport {
        transport: board.label().to_string(),
        firmware: board.firmware(),
        protocol_version: board
            .protocol_version()
            .map(|(major, minor)| format!("{}.{}", major, minor)),
        analog_mapping: board.analog_mapping(),
        pins: board
            .pins()
            .iter()
            .map(|pin| PinReport {
                pin: pin.number,
                port: pin.port,
                mode: pin.mode.to_string(),
                supported_modes: pin.supported_modes.iter().map(|m| m.to_string()).collect(),
                analog_channel: pin.analog_index,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", board);
    println!("firmware: {}", report.firmware);
    if let Some(version) = &report.protocol_version {
        println!("protocol: {}", version);
    }
    println!(
        "pins:     {} ({} analog)",
        report.pins.len(),
        report.analog_mapping.len()
    );
    println!();
    println!("{:>4}  {:>4}  {:<8} {:<6} supported", "pin", "port", "mode", "analog");
    for pin in &report.pins {
        let analog = pin
            .analog_channel
            .map(|c| format!("A{}", c))
            .unwrap_or_default();
        println!(
            "{:>4}  {:>4}  {:<8} {:<6} {}",
            pin.pin,
            pin.port,
            pin.mode,
            analog,
            pin.supported_modes.join(" ")
        );
    }
    Ok(())
}
