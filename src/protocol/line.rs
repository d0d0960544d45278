//! Framer for readers that print one identifier per line.
//!
//! Example stream: `E2000017221101441890\r\nE2000017221101441891\r\n`.

use bytes::BytesMut;

use super::{FrameOutcome, Framer};
use crate::error::FrameError;
use crate::types::TagEvent;

/// Default cap on buffered bytes without a terminator.
pub const DEFAULT_MAX_BUFFER: usize = 4096;

const TERMINATOR: &[u8] = b"\r\n";

/// Splits a byte stream on `\r\n` and yields one tag per non-empty line.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Offset up to which the buffer holds no terminator.
    scanned: usize,
    max_buffer: usize,
}

impl LineFramer {
    /// Creates a framer with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Creates a framer that discards its buffer beyond `max_buffer` bytes.
    #[must_use]
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_buffer,
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn next_line_end(&self) -> Option<usize> {
        self.buffer[self.scanned..]
            .windows(TERMINATOR.len())
            .position(|window| window == TERMINATOR)
            .map(|pos| self.scanned + pos)
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer for LineFramer {
    fn protocol(&self) -> &'static str {
        "line"
    }

    fn parse(&mut self, chunk: &[u8]) -> Vec<FrameOutcome> {
        self.buffer.extend_from_slice(chunk);
        let mut outcomes = Vec::new();

        while let Some(end) = self.next_line_end() {
            let segment = self.buffer.split_to(end + TERMINATOR.len()).freeze();
            self.scanned = 0;

            let line = segment.slice(..end);
            let text = String::from_utf8_lossy(&line);
            let tag_id = text.trim();
            if tag_id.is_empty() {
                continue;
            }
            tracing::trace!("line frame: {}", tag_id);
            outcomes.push(FrameOutcome::Tag(TagEvent::new(tag_id, line.clone())));
        }

        // A trailing '\r' may still pair with the next chunk's '\n'.
        self.scanned = self.buffer.len().saturating_sub(TERMINATOR.len() - 1);

        if self.buffer.len() > self.max_buffer {
            let size = self.buffer.len();
            tracing::warn!(
                "line buffer exceeded {} bytes without a terminator, discarding",
                self.max_buffer
            );
            self.reset();
            outcomes.push(FrameOutcome::Malformed(FrameError::TooLarge {
                size,
                max: self.max_buffer,
            }));
        }

        outcomes
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}
