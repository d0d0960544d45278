//! Data types shared across the library.
//!
//! This module contains the core data structures:
//! - Tag read events
//! - Reader identity, state and settings
//! - Connection endpoints
//! - Session statistics
//! - Publishable payloads

pub mod endpoint;
pub mod payload;
pub mod reader;
pub mod stats;
pub mod tag;

pub use endpoint::TransportEndpoint;
pub use payload::Payload;
pub use reader::{ConnectionState, ReaderInfo, ReaderSettings, Region, TransportKind};
pub use stats::{SessionStats, StatsSnapshot};
pub use tag::TagEvent;
