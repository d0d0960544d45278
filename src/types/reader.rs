//! Reader identity, connection state and settings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical medium a reader is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP socket.
    Tcp,
    /// Serial port (USB or RS-232).
    Serial,
    /// MQTT broker subscription.
    Mqtt,
}

impl TransportKind {
    /// Returns the lowercase name of the transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Serial => "serial",
            Self::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a reader, carried by lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Unique identifier, e.g. `tcp-192.168.1.20:8088`.
    pub id: String,
    /// Reader model, used as the source of reader errors.
    pub model: String,
    /// Transport the reader is reached through.
    pub transport: TransportKind,
    /// Host:port, device path or broker URL.
    pub address: String,
}

impl ReaderInfo {
    /// Creates reader info with an id derived from transport and address.
    pub fn new(model: impl Into<String>, transport: TransportKind, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: format!("{transport}-{address}"),
            model: model.into(),
            transport,
            address,
        }
    }

    /// Suggested info for a reader on a serial port.
    pub fn serial(path: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(model, TransportKind::Serial, path)
    }
}

/// Connection state of a reader.
///
/// `Error` is not terminal: a new `connect()` re-enters `Connecting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Connection attempt in progress.
    Connecting,
    /// Transport is usable.
    Connected,
    /// Closed by the caller or by the remote end.
    Disconnected,
    /// Transport-level failure.
    Error,
}

/// Frequency regulation region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// FCC, 902-928 MHz.
    Fcc,
    /// ETSI, 865-868 MHz.
    Etsi,
    /// China, 920-925 MHz.
    Chn,
}

/// Reader settings forwarded by `configure`.
///
/// Fields left `None` are not touched on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// RF output power in dBm.
    #[serde(default)]
    pub power: Option<u8>,
    /// Frequency region.
    #[serde(default)]
    pub region: Option<Region>,
    /// Beep on tag read.
    #[serde(default)]
    pub beep: Option<bool>,
}

impl ReaderSettings {
    /// Returns true if no setting is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.power.is_none() && self.region.is_none() && self.beep.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_info_id() {
        let info = ReaderInfo::new("UF3-S", TransportKind::Tcp, "192.168.1.20:8088");
        assert_eq!(info.id, "tcp-192.168.1.20:8088");

        let serial = ReaderInfo::serial("/dev/ttyUSB0", "UF3-S");
        assert_eq!(serial.id, "serial-/dev/ttyUSB0");
        assert_eq!(serial.transport, TransportKind::Serial);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: ReaderSettings =
            serde_json::from_str(r#"{"power": 26, "region": "etsi"}"#).unwrap();
        assert_eq!(settings.power, Some(26));
        assert_eq!(settings.region, Some(Region::Etsi));
        assert_eq!(settings.beep, None);
        assert!(!settings.is_empty());
        assert!(ReaderSettings::default().is_empty());
    }
}
