//! Transport layer for reader communication.
//!
//! Every transport moves raw bytes and reports what happens to the link
//! through three handlers: data, error and close. Each slot holds exactly one
//! handler; registering again replaces the previous one.
//!
//! - [`TcpTransport`]: network-attached readers
//! - [`SerialTransport`]: USB/serial readers
//! - [`MqttTransport`]: readers publishing through a broker

#[cfg(test)]
pub(crate) mod mock;
pub mod mqtt;
pub mod serial;
pub mod tcp;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::types::TransportKind;

/// Size of the buffer used by stream read loops.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Receives every chunk read from the link, in arrival order.
pub type DataHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Receives link failures after connect.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Notified when the remote end closes the link.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Returns the kind of link.
    fn kind(&self) -> TransportKind;

    /// Connects; resolves only once the link is usable.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Releases the link. Calling it again is a no-op.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Sends raw bytes to the reader.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Publishes a message; only broker transports support this.
    fn publish(
        &mut self,
        _payload: Bytes,
        _topic: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async {
            Err(Error::UnsupportedOperation {
                operation: "publish",
            })
        })
    }

    /// Sets the data handler.
    fn on_data(&mut self, handler: DataHandler);

    /// Sets the error handler.
    fn on_error(&mut self, handler: ErrorHandler);

    /// Sets the close handler.
    fn on_close(&mut self, handler: CloseHandler);

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

#[derive(Default)]
struct Targets {
    data: Option<DataHandler>,
    error: Option<ErrorHandler>,
    close: Option<CloseHandler>,
}

/// Handler slots shared between a transport and its background task.
#[derive(Clone, Default)]
pub struct DeliveryTargets {
    inner: Arc<RwLock<Targets>>,
}

impl DeliveryTargets {
    /// Creates empty handler slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Targets> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Targets> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the data handler.
    pub fn set_data(&self, handler: DataHandler) {
        self.write().data = Some(handler);
    }

    /// Replaces the error handler.
    pub fn set_error(&self, handler: ErrorHandler) {
        self.write().error = Some(handler);
    }

    /// Replaces the close handler.
    pub fn set_close(&self, handler: CloseHandler) {
        self.write().close = Some(handler);
    }

    /// Hands a chunk to the data handler.
    pub fn deliver_data(&self, chunk: Bytes) {
        let handler = self.read().data.clone();
        match handler {
            Some(handler) => handler(chunk),
            None => tracing::trace!("no data handler, dropping {} bytes", chunk.len()),
        }
    }

    /// Hands a link failure to the error handler.
    pub fn deliver_error(&self, error: Error) {
        let handler = self.read().error.clone();
        match handler {
            Some(handler) => handler(error),
            None => tracing::warn!("transport error with no handler: {}", error),
        }
    }

    /// Notifies the close handler.
    pub fn deliver_close(&self) {
        let handler = self.read().close.clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

impl fmt::Debug for DeliveryTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets = self.read();
        f.debug_struct("DeliveryTargets")
            .field("data", &targets.data.is_some())
            .field("error", &targets.error.is_some())
            .field("close", &targets.close.is_some())
            .finish()
    }
}

/// Reads from a stream until it ends, delivering each chunk in order.
///
/// End of stream clears `connected` and reports a close; a read failure
/// clears `connected` and reports the error.
pub(crate) async fn run_read_loop<R>(
    mut reader: R,
    label: &'static str,
    connected: Arc<AtomicBool>,
    targets: DeliveryTargets,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("{} link closed by peer", label);
                connected.store(false, Ordering::SeqCst);
                targets.deliver_close();
                return;
            }
            Ok(n) => {
                tracing::trace!("{} received {} bytes", label, n);
                targets.deliver_data(Bytes::copy_from_slice(&buf[..n]));
            }
            Err(e) => {
                tracing::warn!("{} read error: {}", label, e);
                connected.store(false, Ordering::SeqCst);
                targets.deliver_error(Error::Io(e));
                return;
            }
        }
    }
}

pub use mqtt::{MqttConfig, MqttTransport};
pub use serial::{PortInfo, SerialConfig, SerialTransport, list_ports};
pub use tcp::{TcpConfig, TcpTransport};

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_handlers_replace_previous() {
        let targets = DeliveryTargets::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        targets.set_data(Arc::new(move |chunk: Bytes| first.lock().unwrap().push(("first", chunk))));
        let second = Arc::clone(&seen);
        targets.set_data(Arc::new(move |chunk: Bytes| second.lock().unwrap().push(("second", chunk))));

        targets.deliver_data(Bytes::from_static(b"E200"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "second");
    }

    #[test]
    fn test_delivery_without_handlers_is_silent() {
        let targets = DeliveryTargets::new();
        targets.deliver_data(Bytes::from_static(b"x"));
        targets.deliver_error(Error::NotConnected);
        targets.deliver_close();
    }

    #[tokio::test]
    async fn test_read_loop_delivers_then_closes() {
        let (mut client, server) = tokio::io::duplex(64);
        let targets = DeliveryTargets::new();
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let sink = Arc::clone(&chunks);
        targets.set_data(Arc::new(move |chunk: Bytes| sink.lock().unwrap().extend_from_slice(&chunk)));
        let flag = Arc::clone(&closed);
        targets.set_close(Arc::new(move || flag.store(true, Ordering::SeqCst)));

        let connected = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_read_loop(server, "test", Arc::clone(&connected), targets));

        tokio::io::AsyncWriteExt::write_all(&mut client, b"E200\r\n").await.unwrap();
        drop(client);
        task.await.unwrap();

        assert_eq!(&chunks.lock().unwrap()[..], b"E200\r\n");
        assert!(closed.load(Ordering::SeqCst));
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_default_publish_is_unsupported() {
        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", 1));
        let result = transport.publish(Bytes::from_static(b"{}"), None).await;
        assert!(matches!(
            result,
            Err(Error::UnsupportedOperation { operation: "publish" })
        ));
    }
}
