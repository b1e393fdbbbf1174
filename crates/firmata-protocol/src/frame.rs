//! Frame decoding utilities.
//!
//! Firmata has two message shapes, told apart by the first byte:
//!
//! ```text
//! fixed width:  +--------+-----+-----+
//!               | header | lsb | msb |
//!               +--------+-----+-----+
//!
//! sysex:        +------+---------+-------------+------+
//!               | 0xF0 | command | data[0..n]  | 0xF7 |
//!               +------+---------+-------------+------+
//! ```
//!
//! Any other byte in header position is noise (for example the tail of a
//! frame cut short by a read error) and is discarded so the stream stays in
//! sync.

use bytes::{Buf, BytesMut};

use crate::constants::*;

/// Initial capacity of the receive buffer. The buffer grows as needed.
pub const INITIAL_BUFFER_SIZE: usize = 64;

/// Length of a fixed-width message, header included.
pub const FIXED_WIDTH_LEN: usize = 3;

/// The two message shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameShape {
    /// Exactly three bytes: header plus two data bytes.
    FixedWidth,
    /// Variable length, delimited by `0xF0` and `0xF7`.
    Sysex,
}

/// A complete frame as read from the device.
///
/// The payload always includes the header byte. For sysex frames it also
/// includes the start and end markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message shape.
    pub shape: FrameShape,
    /// Raw bytes of the frame.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Command identifier of this frame.
    ///
    /// Fixed-width headers below `0xF0` carry a port or channel in their low
    /// nibble, which is masked off. Sysex frames are identified by the byte
    /// after the start marker.
    pub fn command(&self) -> u8 {
        match self.shape {
            FrameShape::FixedWidth => {
                let header = self.payload.first().copied().unwrap_or(0);
                if header < MULTI_INSTANCE_THRESHOLD {
                    header & 0xF0
                } else {
                    header
                }
            }
            FrameShape::Sysex => self.payload.get(1).copied().unwrap_or(END_SYSEX),
        }
    }

    /// Sysex body between the command byte and the end marker.
    pub fn sysex_body(&self) -> &[u8] {
        match self.shape {
            FrameShape::Sysex if self.payload.len() >= 3 => &self.payload[2..self.payload.len() - 1],
            _ => &[],
        }
    }
}

/// Whether `byte` starts a fixed-width frame the host understands.
pub fn is_fixed_width_header(byte: u8) -> bool {
    matches!(byte & 0xF0, DIGITAL_MESSAGE | ANALOG_MESSAGE) || byte == REPORT_VERSION
}

/// A codec that turns received bytes into frames.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Number of header-position bytes thrown away while resyncing.
    discarded: u64,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            discarded: 0,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete frame from the buffer.
    ///
    /// Returns `Some(frame)` if a complete frame is available, or `None` if
    /// more data is needed.
    pub fn decode(&mut self) -> Option<Frame> {
        // Drop bytes that cannot start a frame
        while let Some(&header) = self.buffer.first() {
            if header == START_SYSEX || is_fixed_width_header(header) {
                break;
            }
            log::trace!("discarding unexpected byte 0x{:02X}", header);
            self.buffer.advance(1);
            self.discarded += 1;
        }

        let header = *self.buffer.first()?;

        if header == START_SYSEX {
            let end = self.buffer.iter().position(|&b| b == END_SYSEX)?;
            let payload = self.buffer.split_to(end + 1).to_vec();
            return Some(Frame {
                shape: FrameShape::Sysex,
                payload,
            });
        }

        if self.buffer.len() < FIXED_WIDTH_LEN {
            return None;
        }
        let payload = self.buffer.split_to(FIXED_WIDTH_LEN).to_vec();
        Some(Frame {
            shape: FrameShape::FixedWidth,
            payload,
        })
    }

    /// Drop the frame currently being assembled.
    ///
    /// Called when the transport reports an error mid-frame; reading resumes
    /// with the next byte received.
    pub fn abort_frame(&mut self) {
        if !self.buffer.is_empty() {
            log::debug!("aborting partial frame of {} bytes", self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes discarded while resynchronising.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Wrap a sysex command and body in start/end markers.
pub fn wrap_sysex(command: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(body.len() + 3);
    buf.push(START_SYSEX);
    buf.push(command);
    buf.extend_from_slice(body);
    buf.push(END_SYSEX);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec) -> Vec<Frame> {
        std::iter::from_fn(|| codec.decode()).collect()
    }

    #[test]
    fn test_sysex_verbatim() {
        let mut codec = FrameCodec::new();
        let data = [0xF0, 0x79, 2, 5, b'S', b't', b'd', 0xF7];
        codec.push(&data);

        let frame = codec.decode().expect("should decode frame");
        assert_eq!(frame.shape, FrameShape::Sysex);
        assert_eq!(frame.payload, data);
        assert_eq!(frame.command(), REPORT_FIRMWARE);
        assert_eq!(frame.sysex_body(), &[2, 5, b'S', b't', b'd']);
        assert!(codec.decode().is_none());
    }

    #[test]
    fn test_long_sysex() {
        let mut codec = FrameCodec::new();
        let mut data = vec![0xF0, CAPABILITY_RESPONSE];
        for _ in 0..200 {
            data.extend_from_slice(&[0x00, 0x01, 0x01, 0x01, 0x7F]);
        }
        data.push(0xF7);
        codec.push(&data);

        let frame = codec.decode().expect("should decode frame");
        assert_eq!(frame.payload.len(), data.len());
        assert_eq!(frame.payload, data);
    }

    #[test]
    fn test_fixed_width() {
        let mut codec = FrameCodec::new();
        codec.push(&[0x91, 0x05, 0x00, 0xE2, 0x7F, 0x07, 0xF9, 2, 5]);

        let frames = decode_all(&mut codec);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload, vec![0x91, 0x05, 0x00]);
        assert_eq!(frames[0].command(), DIGITAL_MESSAGE);
        assert_eq!(frames[1].command(), ANALOG_MESSAGE);
        assert_eq!(frames[2].command(), REPORT_VERSION);
        assert!(frames.iter().all(|f| f.shape == FrameShape::FixedWidth));
    }

    #[test]
    fn test_partial_frames() {
        let mut codec = FrameCodec::new();
        codec.push(&[0xF0, 0x6A, 0x7F]);
        assert!(codec.decode().is_none());
        codec.push(&[0x00, 0xF7, 0x90]);
        let frame = codec.decode().expect("should decode sysex");
        assert_eq!(frame.payload, vec![0xF0, 0x6A, 0x7F, 0x00, 0xF7]);

        assert!(codec.decode().is_none());
        codec.push(&[0x01]);
        assert!(codec.decode().is_none());
        codec.push(&[0x00]);
        assert_eq!(codec.decode().unwrap().payload, vec![0x90, 0x01, 0x00]);
    }

    #[test]
    fn test_resync_on_unknown_header() {
        let mut codec = FrameCodec::new();
        codec.push(&[0x12, 0xA5, 0x90, 0x08, 0x00]);

        let frames = decode_all(&mut codec);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0x90, 0x08, 0x00]);
        assert_eq!(codec.discarded(), 2);
    }

    #[test]
    fn test_abort_frame() {
        let mut codec = FrameCodec::new();
        codec.push(&[0xF0, 0x79, 2]);
        assert!(codec.decode().is_none());
        codec.abort_frame();
        assert_eq!(codec.buffered_len(), 0);

        codec.push(&[5, 0xF7, 0xF9, 2, 5]);
        let frames = decode_all(&mut codec);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0xF9, 2, 5]);
    }

    #[test]
    fn test_wrap_sysex() {
        assert_eq!(wrap_sysex(CAPABILITY_QUERY, &[]), vec![0xF0, 0x6B, 0xF7]);
    }
}
