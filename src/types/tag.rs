//! Tag read events.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single tag read produced by a framer.
///
/// Created once per successfully parsed frame and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    /// Tag identifier: free text for the line protocol, hex EPC for binary frames.
    pub tag_id: String,
    /// When the frame carrying this tag was parsed.
    pub timestamp: DateTime<Utc>,
    /// Signal strength in dBm, when the protocol reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    /// Antenna the tag was seen on (1-based), when the protocol reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna: Option<u8>,
    /// Bytes of the frame the tag was decoded from.
    pub raw: Bytes,
}

impl TagEvent {
    /// Creates a tag event captured now.
    pub fn new(tag_id: impl Into<String>, raw: Bytes) -> Self {
        Self {
            tag_id: tag_id.into(),
            timestamp: Utc::now(),
            rssi: None,
            antenna: None,
            raw,
        }
    }

    /// Sets the signal strength.
    #[must_use]
    pub const fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Sets the antenna number.
    #[must_use]
    pub const fn with_antenna(mut self, antenna: u8) -> Self {
        self.antenna = Some(antenna);
        self
    }

    /// Capture time as milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_event_json_shape() {
        let tag = TagEvent::new("E200", Bytes::from_static(b"E200")).with_rssi(-61);
        let json = serde_json::to_value(&tag).unwrap();
        assert_eq!(json["tagId"], "E200");
        assert_eq!(json["rssi"], -61);
        assert!(json.get("antenna").is_none());
        assert!(json["timestamp"].is_string());
    }
}
