//! Framer for readers speaking the checksummed A0 protocol.
//!
//! Tag reports arrive under the inventory command that produced them, with a
//! payload of `[freq_ant][pc:2][epc...][rssi]`.

use bytes::Bytes;

use super::command::{self, BROADCAST_ADDRESS, CommandCode, INVENTORY_REPEAT};
use super::frame::{self, A0Decoder, A0Frame};
use super::{FrameOutcome, Framer};
use crate::error::Result;
use crate::types::{ReaderSettings, TagEvent};

/// Smallest tag report payload: antenna byte, PC word, one EPC byte, RSSI.
const MIN_TAG_PAYLOAD: usize = 5;

/// A0 framer producing tags from inventory responses.
#[derive(Debug)]
pub struct BinaryFramer {
    decoder: A0Decoder,
    address: u8,
}

impl BinaryFramer {
    /// Creates a framer addressing every reader on the link.
    #[must_use]
    pub fn new() -> Self {
        Self::with_address(BROADCAST_ADDRESS)
    }

    /// Creates a framer whose commands target `address`.
    #[must_use]
    pub fn with_address(address: u8) -> Self {
        Self {
            decoder: A0Decoder::new(),
            address,
        }
    }

    fn command(&self, code: CommandCode, payload: &[u8]) -> Result<Bytes> {
        Ok(frame::encode(self.address, code.into(), payload)?)
    }
}

impl Default for BinaryFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts a tag from an inventory response, if the frame carries one.
fn tag_from_frame(frame: &A0Frame) -> Option<TagEvent> {
    let Some(code) = CommandCode::from_byte(frame.command) else {
        tracing::trace!("skipping frame with unknown command 0x{:02x}", frame.command);
        return None;
    };
    if !code.is_tag_report() {
        tracing::trace!("skipping {:?} response", code);
        return None;
    }

    let payload = &frame.payload;
    if payload.len() < MIN_TAG_PAYLOAD {
        // Round summaries and error replies share the inventory command code.
        tracing::trace!("skipping short {:?} frame ({} bytes)", code, payload.len());
        return None;
    }

    let last = payload.len() - 1;
    let antenna = (payload[0] & 0x03) + 1;
    let epc = &payload[3..last];
    let rssi = -i16::from(payload[last]);

    Some(
        TagEvent::new(hex::encode_upper(epc), frame.raw.clone())
            .with_rssi(rssi)
            .with_antenna(antenna),
    )
}

impl Framer for BinaryFramer {
    fn protocol(&self) -> &'static str {
        "a0"
    }

    fn parse(&mut self, chunk: &[u8]) -> Vec<FrameOutcome> {
        self.decoder.feed(chunk);
        let mut outcomes = Vec::new();

        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => {
                    tracing::trace!("a0 frame: {}", hex::encode(&frame.raw));
                    if let Some(tag) = tag_from_frame(&frame) {
                        outcomes.push(FrameOutcome::Tag(tag));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("discarding malformed a0 frame: {}", e);
                    outcomes.push(FrameOutcome::Malformed(e));
                }
            }
        }

        outcomes
    }

    fn reset(&mut self) {
        self.decoder.clear();
    }

    fn start_scan_command(&self) -> Option<Bytes> {
        self.command(CommandCode::RealTimeInventory, &[INVENTORY_REPEAT])
            .ok()
    }

    fn configure_commands(&self, settings: &ReaderSettings) -> Result<Vec<Bytes>> {
        let mut commands = Vec::new();
        if let Some(power) = settings.power {
            commands.push(self.command(CommandCode::SetOutputPower, &[power])?);
        }
        if let Some(region) = settings.region {
            commands.push(self.command(
                CommandCode::SetFrequencyRegion,
                &command::region_payload(region),
            )?);
        }
        if let Some(beep) = settings.beep {
            commands.push(self.command(CommandCode::SetBeeperMode, &[command::beeper_mode(beep)])?);
        }
        Ok(commands)
    }
}
