//! # rfid-reader
//!
//! A Rust client library for UHF RFID tag readers.
//!
//! This library connects to readers over TCP, serial ports or an MQTT broker,
//! decodes their byte streams into tag reads and publishes everything that
//! happens as typed events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Event-driven architecture with per-reader event buses
//! - Line-delimited, checksummed A0 binary and broker payload protocols
//! - Managed MQTT reconnection with exponential backoff
//! - Cumulative session statistics
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfid_reader::{Event, EventKind, RfidClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rfid_reader::Error> {
//!     let mut client = RfidClient::new();
//!
//!     client.on(EventKind::Tag, |event| {
//!         if let Event::Tag(tag) = event {
//!             println!("tag {} rssi {:?}", tag.tag_id, tag.rssi);
//!         }
//!     });
//!
//!     client.connect_tcp("192.168.1.20", 8088).await?;
//!     client.start().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     client.stop().await?;
//!     println!("unique tags: {}", client.stats_snapshot().unique);
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transport`] - Byte links (TCP, serial, MQTT)
//! - [`protocol`] - Framers turning bytes into tag reads
//! - [`reader`] - A transport bound to a framer, with connection state
//! - [`event`] - Event bus for lifecycle, tag and error events
//! - [`reconnect`] - Retry policy with exponential backoff
//! - [`discovery`] - Serial port listing and TCP network scans
//! - [`types`] - Data structures (tags, endpoints, settings, statistics)
//! - [`client`] - High-level [`RfidClient`] session facade

pub mod client;
pub mod discovery;
pub mod error;
pub mod event;
pub mod protocol;
pub mod reader;
pub mod reconnect;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::RfidClient;
pub use discovery::{list_ports, scan_tcp_range};
pub use error::{Error, ErrorCode, FrameError, Result, SdkError};
pub use event::{Event, EventBus, EventKind, ListenerHandle, Subscription};
pub use protocol::{BinaryFramer, Framer, LineFramer, PayloadFramer, ProtocolKind};
pub use reader::Reader;
pub use reconnect::RetryPolicy;
pub use transport::{MqttTransport, SerialTransport, TcpTransport, Transport};
pub use types::{
    ConnectionState, Payload, ReaderInfo, ReaderSettings, Region, SessionStats, StatsSnapshot,
    TagEvent, TransportEndpoint, TransportKind,
};
