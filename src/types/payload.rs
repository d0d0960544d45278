//! Publishable payloads.

use bytes::Bytes;

use crate::error::Result;
use crate::types::TagEvent;

/// A payload handed to `publish`.
///
/// Binary payloads are sent as-is; everything else is serialized first.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes.
    Binary(Bytes),
    /// UTF-8 text.
    Text(String),
    /// Structured value, sent as JSON.
    Json(serde_json::Value),
}

impl Payload {
    /// Builds the payload for re-publishing a tag.
    ///
    /// The raw frame is preferred; tags without one are sent as JSON.
    pub fn from_tag(tag: &TagEvent) -> Result<Self> {
        if tag.raw.is_empty() {
            Ok(Self::Json(serde_json::to_value(tag)?))
        } else {
            Ok(Self::Binary(tag.raw.clone()))
        }
    }

    /// Serializes the payload to bytes.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Binary(bytes) => Ok(bytes),
            Self::Text(text) => Ok(Bytes::from(text)),
            Self::Json(value) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}
