//! Byte transports a board session can run over.
//!
//! The session needs two handles to the same stream: one owned by the
//! background reader and one used by the API for writes. Transports therefore
//! expose [`Transport::try_clone`], mirroring `serialport::SerialPort`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::TransportError;

/// Default time a channel read blocks before returning empty-handed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A duplex byte stream to a device.
pub trait Transport: Send + 'static {
    /// Read available bytes into `buf`.
    ///
    /// Blocks for at most the transport's poll interval and returns `Ok(0)`
    /// if nothing arrived in that time.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Block until buffered output has been handed to the device.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Open a second handle to the same stream.
    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Change how long [`Transport::read`] blocks waiting for data.
    fn set_poll_interval(&mut self, _interval: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the stream. Further reads and writes fail.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Human readable description (device path, peer name).
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// Write all of `data`, retrying partial writes.
pub fn write_all(transport: &mut dyn Transport, mut data: &[u8]) -> Result<(), TransportError> {
    while !data.is_empty() {
        let written = transport.write(data)?;
        if written == 0 {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "transport accepted no bytes",
            )));
        }
        data = &data[written..];
    }
    Ok(())
}

// ============================================================================
// In-process channel transport
// ============================================================================

/// One end of an in-process duplex pipe.
///
/// Chunks written on one end arrive, in order, on the other. Closing either
/// end makes both ends fail with [`TransportError::Closed`] or
/// [`TransportError::Disconnected`].
#[derive(Clone)]
pub struct ChannelTransport {
    name: String,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    /// Bytes of a received chunk that did not fit the caller's buffer.
    pending: Vec<u8>,
    poll_interval: Duration,
    closed: Arc<AtomicBool>,
}

/// Create a connected pair of channel transports.
///
/// The first end is conventionally the host side, the second the device side.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (host_tx, device_rx) = crossbeam_channel::unbounded();
    let (device_tx, host_rx) = crossbeam_channel::unbounded();
    let closed = Arc::new(AtomicBool::new(false));

    let host = ChannelTransport {
        name: "channel:host".to_string(),
        tx: host_tx,
        rx: host_rx,
        pending: Vec::new(),
        poll_interval: DEFAULT_POLL_INTERVAL,
        closed: Arc::clone(&closed),
    };
    let device = ChannelTransport {
        name: "channel:device".to_string(),
        tx: device_tx,
        rx: device_rx,
        pending: Vec::new(),
        poll_interval: DEFAULT_POLL_INTERVAL,
        closed,
    };
    (host, device)
}

impl ChannelTransport {
    /// Set how long a read blocks waiting for data.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the name returned by [`Transport::describe`].
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// How long a read blocks waiting for data.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Transport for ChannelTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }

        match self.rx.recv_timeout(self.poll_interval) {
            Ok(chunk) => {
                self.pending = chunk;
                Ok(self.drain_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::Disconnected)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut clone = self.clone();
        clone.pending.clear();
        Ok(Box::new(clone))
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<(), TransportError> {
        self.poll_interval = interval;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ============================================================================
// Serial port transport
// ============================================================================

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    use serialport::{ClearBuffer, SerialPort};

    use super::Transport;
    use crate::error::TransportError;

    /// A transport over a serial device.
    pub struct SerialTransport {
        path: String,
        port: Box<dyn SerialPort>,
        closed: bool,
    }

    impl SerialTransport {
        /// Open `path` at `baud`, discarding anything already buffered.
        ///
        /// Reads block for at most `poll_interval`.
        pub fn open(path: &str, baud: u32, poll_interval: Duration) -> Result<Self, TransportError> {
            let port = serialport::new(path, baud)
                .timeout(poll_interval)
                .open()
                .map_err(|e| TransportError::OpenFailed {
                    device: path.to_string(),
                    reason: e.to_string(),
                })?;

            port.clear(ClearBuffer::All).map_err(|e| TransportError::OpenFailed {
                device: path.to_string(),
                reason: format!("error flushing port: {}", e),
            })?;

            Ok(SerialTransport {
                path: path.to_string(),
                port,
                closed: false,
            })
        }
    }

    impl Transport for SerialTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
                Err(e) => Err(TransportError::Io(e)),
            }
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            Ok(self.port.write(data)?)
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(self.port.flush()?)
        }

        fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
            let port = self
                .port
                .try_clone()
                .map_err(|e| TransportError::Io(e.into()))?;
            Ok(Box::new(SerialTransport {
                path: self.path.clone(),
                port,
                closed: self.closed,
            }))
        }

        fn set_poll_interval(&mut self, interval: Duration) -> Result<(), TransportError> {
            self.port
                .set_timeout(interval)
                .map_err(|e| TransportError::Io(e.into()))
        }

        fn close(&mut self) -> Result<(), TransportError> {
            if !self.closed {
                self.port.flush()?;
                self.closed = true;
            }
            Ok(())
        }

        fn describe(&self) -> String {
            self.path.clone()
        }
    }
}
