//! Connection endpoints.

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolKind;
use crate::transport::serial::DEFAULT_BAUD_RATE;
use crate::types::TransportKind;

const fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Identifies a physical connection to a reader.
///
/// An endpoint is consumed by a connection attempt; connecting somewhere else
/// takes a new endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportEndpoint {
    /// Reader reachable over TCP.
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        protocol: Option<ProtocolKind>,
    },
    /// Reader on a serial port.
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default)]
        protocol: Option<ProtocolKind>,
    },
    /// Tag reads published to an MQTT broker.
    Mqtt {
        broker_url: String,
        topic: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        protocol: Option<ProtocolKind>,
    },
}

impl TransportEndpoint {
    /// TCP endpoint using the default protocol.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
            protocol: None,
        }
    }

    /// Serial endpoint at the default baud rate.
    pub fn serial(path: impl Into<String>) -> Self {
        Self::Serial {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            protocol: None,
        }
    }

    /// MQTT endpoint without credentials.
    pub fn mqtt(broker_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::Mqtt {
            broker_url: broker_url.into(),
            topic: topic.into(),
            username: None,
            password: None,
            client_id: None,
            protocol: None,
        }
    }

    /// Overrides the wire protocol.
    #[must_use]
    pub fn with_protocol(mut self, kind: ProtocolKind) -> Self {
        match &mut self {
            Self::Tcp { protocol, .. }
            | Self::Serial { protocol, .. }
            | Self::Mqtt { protocol, .. } => *protocol = Some(kind),
        }
        self
    }

    /// Sets the serial baud rate. Ignored for other transports.
    #[must_use]
    pub fn with_baud_rate(mut self, rate: u32) -> Self {
        if let Self::Serial { baud_rate, .. } = &mut self {
            *baud_rate = rate;
        }
        self
    }

    /// Sets MQTT credentials. Ignored for other transports.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        if let Self::Mqtt {
            username, password, ..
        } = &mut self
        {
            *username = Some(user.into());
            *password = Some(pass.into());
        }
        self
    }

    /// Transport kind of this endpoint.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp { .. } => TransportKind::Tcp,
            Self::Serial { .. } => TransportKind::Serial,
            Self::Mqtt { .. } => TransportKind::Mqtt,
        }
    }

    /// Address of the endpoint: host:port, device path or broker URL.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port, .. } => format!("{host}:{port}"),
            Self::Serial { path, .. } => path.clone(),
            Self::Mqtt { broker_url, .. } => broker_url.clone(),
        }
    }

    /// Wire protocol, falling back to the transport's default.
    ///
    /// Stream transports default to the line protocol, MQTT to one tag per message.
    #[must_use]
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            Self::Tcp { protocol, .. } | Self::Serial { protocol, .. } => {
                protocol.unwrap_or(ProtocolKind::Line)
            }
            Self::Mqtt { protocol, .. } => protocol.unwrap_or(ProtocolKind::Payload),
        }
    }
}
