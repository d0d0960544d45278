//! Finding readers attached to this machine or reachable on the network.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures::future::join_all;

use crate::error::{Error, Result};
use crate::transport::{PortInfo, TcpConfig, TcpTransport, Transport};
use crate::types::{ReaderInfo, TransportKind};

pub use crate::transport::list_ports;

/// Port UF3-S readers listen on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8088;

/// Default per-address probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest range probed in one scan (a /16).
pub const MAX_SCAN_ADDRESSES: u32 = 65_536;

const DISCOVERED_MODEL: &str = "UF3-S";

/// Lists serial ports, logging and swallowing enumeration failures.
#[must_use]
pub fn list_serial_ports() -> Vec<PortInfo> {
    list_ports().unwrap_or_else(|e| {
        tracing::warn!("error listing serial ports: {}", e);
        Vec::new()
    })
}

/// Returns every address from `start` to `end` inclusive.
///
/// # Errors
///
/// Returns [`Error::InvalidEndpoint`] if `start` is after `end` or the range
/// exceeds [`MAX_SCAN_ADDRESSES`].
pub fn ip_range(start: Ipv4Addr, end: Ipv4Addr) -> Result<Vec<Ipv4Addr>> {
    let (first, last) = (u32::from(start), u32::from(end));
    if first > last {
        return Err(Error::InvalidEndpoint {
            reason: format!("scan range start {start} is after end {end}"),
        });
    }
    if last - first >= MAX_SCAN_ADDRESSES {
        return Err(Error::InvalidEndpoint {
            reason: format!("scan range {start}-{end} exceeds {MAX_SCAN_ADDRESSES} addresses"),
        });
    }
    Ok((first..=last).map(Ipv4Addr::from).collect())
}

async fn probe(address: Ipv4Addr, port: u16, timeout: Duration) -> Option<ReaderInfo> {
    let config = TcpConfig::new(address.to_string(), port).connect_timeout(timeout);
    let mut transport = TcpTransport::new(config);
    match transport.connect().await {
        Ok(()) => {
            if let Err(e) = transport.disconnect().await {
                tracing::trace!("closing probe to {}:{} failed: {}", address, port, e);
            }
            Some(ReaderInfo::new(
                DISCOVERED_MODEL,
                TransportKind::Tcp,
                format!("{address}:{port}"),
            ))
        }
        Err(e) => {
            tracing::trace!("no reader at {}:{}: {}", address, port, e);
            None
        }
    }
}

/// Probes every address in the inclusive range concurrently.
///
/// Returns one [`ReaderInfo`] per address that accepted a connection, in
/// address order.
pub async fn scan_tcp_range(
    start: Ipv4Addr,
    end: Ipv4Addr,
    port: u16,
    timeout: Duration,
) -> Result<Vec<ReaderInfo>> {
    let addresses = ip_range(start, end)?;
    tracing::debug!(
        "probing {} addresses from {} to {} on port {}",
        addresses.len(),
        start,
        end,
        port
    );

    let found: Vec<ReaderInfo> = join_all(
        addresses
            .into_iter()
            .map(|address| probe(address, port, timeout)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    tracing::info!("found {} readers on port {}", found.len(), port);
    Ok(found)
}
