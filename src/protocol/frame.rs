//! Frame encoding and decoding for the checksummed A0 protocol.
//!
//! The wire format is:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬─────────────┬──────────┐
//! │  0xA0    │   len    │ address  │ command  │   payload   │ checksum │
//! │  1 byte  │  1 byte  │  1 byte  │  1 byte  │ len-3 bytes │  1 byte  │
//! └──────────┴──────────┴──────────┴──────────┴─────────────┴──────────┘
//! ```
//!
//! `len` counts address through checksum. The checksum is the two's
//! complement of the byte sum from `len` to the last payload byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Frame header byte.
pub const FRAME_HEADER: u8 = 0xA0;

/// Smallest valid length byte (address + command + checksum).
pub const MIN_LENGTH: usize = 3;

/// Largest payload a single length byte can describe.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - MIN_LENGTH;

/// Computes the A0 checksum over `data`.
#[must_use]
pub fn calculate_checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Encodes a command into a complete frame.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn encode(address: u8, command: u8, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let len = payload.len() + MIN_LENGTH;
    let mut buf = BytesMut::with_capacity(len + 2);
    buf.put_u8(FRAME_HEADER);
    buf.put_u8(len as u8);
    buf.put_u8(address);
    buf.put_u8(command);
    buf.put_slice(payload);
    let checksum = calculate_checksum(&buf[1..]);
    buf.put_u8(checksum);
    Ok(buf.freeze())
}

/// A decoded A0 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A0Frame {
    /// Reader address.
    pub address: u8,
    /// Command code.
    pub command: u8,
    /// Bytes between the command code and the checksum.
    pub payload: Bytes,
    /// The complete frame as received.
    pub raw: Bytes,
}

/// Stream decoder that handles partial data and resynchronizes on garbage.
#[derive(Debug, Default)]
pub struct A0Decoder {
    buffer: BytesMut,
}

impl A0Decoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` for a valid frame and `Ok(None)` when more
    /// data is needed. Invalid input is consumed before an error is returned,
    /// so calling `decode` again continues with the following bytes.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidLength`] if the length byte is below [`MIN_LENGTH`];
    ///   only the header byte is dropped.
    /// - [`FrameError::ChecksumMismatch`] if the trailing byte is wrong; the
    ///   whole frame is dropped.
    pub fn decode(&mut self) -> Result<Option<A0Frame>, FrameError> {
        match self.buffer.iter().position(|b| *b == FRAME_HEADER) {
            Some(0) => {}
            Some(offset) => {
                tracing::trace!("discarding {} bytes before frame header", offset);
                self.buffer.advance(offset);
            }
            None => {
                self.buffer.clear();
                return Ok(None);
            }
        }

        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let length = self.buffer[1] as usize;
        if length < MIN_LENGTH {
            self.buffer.advance(1);
            return Err(FrameError::InvalidLength { length });
        }

        let total = length + 2;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let raw = self.buffer.split_to(total).freeze();
        let expected = calculate_checksum(&raw[1..total - 1]);
        let actual = raw[total - 1];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Some(A0Frame {
            address: raw[2],
            command: raw[3],
            payload: raw.slice(4..total - 1),
            raw,
        }))
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
