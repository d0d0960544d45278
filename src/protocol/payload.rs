//! Framer for broker-delivered messages, one tag per message.

use bytes::Bytes;
use serde_json::Value;

use super::{FrameOutcome, Framer};
use crate::types::TagEvent;

/// JSON keys checked for the tag identifier, in order.
const ID_KEYS: [&str; 3] = ["epc", "id", "tagId"];

/// Treats each chunk as a complete message.
///
/// JSON objects yield their `epc`, `id` or `tagId` field and a numeric
/// `rssi`; any other payload is identified by its hex encoding.
#[derive(Debug, Default)]
pub struct PayloadFramer;

impl PayloadFramer {
    /// Creates a payload framer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn tag_from_json(value: &Value, raw: &Bytes) -> Option<TagEvent> {
    let object = value.as_object()?;
    let tag_id = ID_KEYS
        .iter()
        .find_map(|key| {
            object
                .get(*key)
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
        })?;

    let mut tag = TagEvent::new(tag_id, raw.clone());
    if let Some(rssi) = object.get("rssi").and_then(Value::as_f64) {
        tag = tag.with_rssi(rssi.round() as i16);
    }
    Some(tag)
}

impl Framer for PayloadFramer {
    fn protocol(&self) -> &'static str {
        "payload"
    }

    fn parse(&mut self, chunk: &[u8]) -> Vec<FrameOutcome> {
        if chunk.is_empty() {
            tracing::trace!("skipping empty message");
            return Vec::new();
        }

        let raw = Bytes::copy_from_slice(chunk);
        let tag = serde_json::from_slice::<Value>(chunk)
            .ok()
            .and_then(|value| tag_from_json(&value, &raw))
            .unwrap_or_else(|| TagEvent::new(hex::encode_upper(chunk), raw));

        vec![FrameOutcome::Tag(tag)]
    }

    fn reset(&mut self) {}
}
