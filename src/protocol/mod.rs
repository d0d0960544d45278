//! Protocol framers for reader byte streams.
//!
//! A [`Framer`] turns transport chunks into [`TagEvent`]s. Chunks may split
//! or merge frames arbitrarily; framers buffer whatever is incomplete.
//!
//! - [`LineFramer`]: ASCII identifiers terminated by `\r\n`
//! - [`BinaryFramer`]: checksummed A0 frames
//! - [`PayloadFramer`]: one tag per broker message

pub mod binary;
pub mod command;
pub mod frame;
pub mod line;
pub mod payload;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::types::{ReaderSettings, TagEvent};

pub use binary::BinaryFramer;
pub use command::{BROADCAST_ADDRESS, CommandCode};
pub use frame::{A0Decoder, A0Frame, FRAME_HEADER, calculate_checksum, encode as encode_frame};
pub use line::LineFramer;
pub use payload::PayloadFramer;

/// One result of parsing a chunk.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// A complete tag read.
    Tag(TagEvent),
    /// Input that was discarded.
    Malformed(FrameError),
}

/// Stateful parser from transport bytes to tag reads.
pub trait Framer: Send {
    /// Short protocol name, for logs.
    fn protocol(&self) -> &'static str;

    /// Consumes a chunk and returns the outcomes it completed, in stream order.
    fn parse(&mut self, chunk: &[u8]) -> Vec<FrameOutcome>;

    /// Drops any buffered partial frame.
    fn reset(&mut self);

    /// Command that starts continuous scanning, if the protocol has one.
    fn start_scan_command(&self) -> Option<Bytes> {
        None
    }

    /// Command that stops scanning, if the protocol has one.
    fn stop_scan_command(&self) -> Option<Bytes> {
        None
    }

    /// Commands applying `settings`; empty when the protocol cannot configure.
    fn configure_commands(&self, _settings: &ReaderSettings) -> Result<Vec<Bytes>> {
        Ok(Vec::new())
    }
}

/// Built-in protocol selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// `\r\n` terminated ASCII identifiers.
    Line,
    /// Checksummed binary A0 frames.
    A0,
    /// One broker message per tag.
    Payload,
}

impl ProtocolKind {
    /// Creates a fresh framer for this protocol.
    #[must_use]
    pub fn framer(self) -> Box<dyn Framer> {
        match self {
            Self::Line => Box::new(LineFramer::new()),
            Self::A0 => Box::new(BinaryFramer::new()),
            Self::Payload => Box::new(PayloadFramer::new()),
        }
    }

    /// Reader model reported for readers speaking this protocol.
    #[must_use]
    pub const fn model(self) -> &'static str {
        match self {
            Self::Line => "UF3-S",
            Self::A0 => "A0",
            Self::Payload => "MQTT",
        }
    }
}
