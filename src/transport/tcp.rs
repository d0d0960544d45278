//! TCP transport for network-attached readers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

use super::{CloseHandler, DataHandler, DeliveryTargets, ErrorHandler, Transport, run_read_loop};
use crate::error::{Error, Result};
use crate::types::TransportKind;

/// Default time allowed for the TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for TCP transport.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Reader host name or IP address.
    pub host: String,
    /// Reader port.
    pub port: u16,
    /// Time allowed for the TCP handshake.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm so short commands go out immediately.
    pub nodelay: bool,
}

impl TcpConfig {
    /// Creates a new TCP configuration with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets `TCP_NODELAY`.
    #[must_use]
    pub const fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP transport.
///
/// The socket is split; a background task owns the read half and the
/// transport keeps the write half.
pub struct TcpTransport {
    config: TcpConfig,
    writer: Option<OwnedWriteHalf>,
    read_task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    targets: DeliveryTargets,
}

impl TcpTransport {
    /// Creates a new TCP transport with the given configuration.
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            writer: None,
            read_task: None,
            connected: Arc::new(AtomicBool::new(false)),
            targets: DeliveryTargets::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn teardown(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }
            self.teardown();
            self.writer = None;

            let address = self.config.address();
            let timeout = self.config.connect_timeout;
            tracing::info!("connecting to tcp reader at {}", address);

            let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!("tcp connect to {} failed: {}", address, e);
                    return Err(Error::connection(format!("tcp connect to {address} failed"), e));
                }
                Err(_) => {
                    tracing::warn!("tcp connect to {} timed out after {:?}", address, timeout);
                    return Err(Error::connection(
                        format!("tcp connect to {address} timed out"),
                        Error::timeout(timeout),
                    ));
                }
            };

            if let Err(e) = stream.set_nodelay(self.config.nodelay) {
                tracing::warn!("failed to set TCP_NODELAY: {}", e);
            }

            let (read_half, write_half) = stream.into_split();
            self.connected.store(true, Ordering::SeqCst);
            self.read_task = Some(tokio::spawn(run_read_loop(
                read_half,
                "tcp",
                Arc::clone(&self.connected),
                self.targets.clone(),
            )));
            self.writer = Some(write_half);

            tracing::info!("connected to tcp reader at {}", address);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.teardown();
            if let Some(mut writer) = self.writer.take() {
                tracing::info!("disconnecting from tcp reader at {}", self.config.address());
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("tcp shutdown: {}", e);
                }
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

            tracing::trace!("tcp sending {} bytes", data.len());
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn on_data(&mut self, handler: DataHandler) {
        self.targets.set_data(handler);
    }

    fn on_error(&mut self, handler: ErrorHandler) {
        self.targets.set_error(handler);
    }

    fn on_close(&mut self, handler: CloseHandler) {
        self.targets.set_close(handler);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}
