//! Error types for the rfid-reader library.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// The main error type for reader operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not be established or maintained.
    #[error("connection error: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Arc<Error>>,
    },

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Operation attempted on an inactive transport.
    #[error("not connected")]
    NotConnected,

    /// Capability not offered by the active transport.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: &'static str },

    /// Operation timed out.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A pending operation was cancelled, e.g. a connection attempt by a disconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// Endpoint description could not be turned into a connection.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint { reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// MQTT request could not be queued.
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// MQTT connection/event loop error.
    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    /// Payload serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Builds a connection error wrapping an underlying cause.
    pub fn connection(reason: impl Into<String>, cause: impl Into<Self>) -> Self {
        Self::Connection {
            reason: reason.into(),
            source: Some(Arc::new(cause.into())),
        }
    }

    /// Builds a connection error without an underlying cause.
    pub fn connection_reason(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
            source: None,
        }
    }

    /// Converts a duration into a timeout error.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::Cancelled
            | Self::InvalidEndpoint { .. }
            | Self::MqttConnection(_) => ErrorCode::ConnectionError,
            Self::Frame(_) => ErrorCode::FrameError,
            Self::NotConnected => ErrorCode::NotConnected,
            Self::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            Self::Io(_) | Self::Serial(_) | Self::MqttClient(_) | Self::Serialization(_) => {
                ErrorCode::ReaderError
            }
        }
    }
}

/// Frame-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame or accumulated data exceeds the maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Length byte cannot describe a valid frame.
    #[error("invalid frame length: {length}")]
    InvalidLength { length: usize },

    /// Trailing checksum does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Stable error codes carried by [`SdkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Catch-all reader failure.
    ReaderError,
    /// Transport could not be established or maintained.
    ConnectionError,
    /// Malformed or oversized framer input.
    FrameError,
    /// Operation on an inactive transport.
    NotConnected,
    /// Capability not offered by the active transport.
    UnsupportedOperation,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReaderError => "READER_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::FrameError => "FRAME_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure value routed through the event bus error channel.
#[derive(Debug, Clone)]
pub struct SdkError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human readable message.
    pub message: String,
    /// Model identifier of the reader that produced the error.
    pub source: Option<String>,
    /// Underlying error, when there is one.
    pub cause: Option<Arc<Error>>,
}

impl SdkError {
    /// Creates an error value with no source or cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            cause: None,
        }
    }

    /// Sets the reader model that produced this error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: Arc<Error>) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{}] {}: {}", self.code, source, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;
