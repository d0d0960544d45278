//! Scripted in-memory transport for tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::{CloseHandler, DataHandler, DeliveryTargets, ErrorHandler, Transport};
use crate::error::{Error, Result};
use crate::reconnect::{ReconnectController, RetryPolicy};
use crate::types::TransportKind;

/// How the link goes down inside `connect()`, after the attempt succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkLoss {
    /// Peer hangs up.
    Close,
    /// Read fails.
    Error,
    /// Link flag drops without a delivered event.
    Silent,
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
    disconnects: AtomicU32,
    failing_disconnect: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    published: Mutex<Vec<(Option<String>, Bytes)>>,
}

/// Transport whose link is driven by a [`MockHandle`].
pub(crate) struct MockTransport {
    kind: TransportKind,
    shared: Arc<Shared>,
    targets: DeliveryTargets,
    reconnect: Option<ReconnectController>,
    connect_delay: Option<Duration>,
    link_loss: Option<LinkLoss>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub(crate) struct MockHandle {
    shared: Arc<Shared>,
    targets: DeliveryTargets,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            kind: TransportKind::Tcp,
            shared: Arc::new(Shared::default()),
            targets: DeliveryTargets::new(),
            reconnect: None,
            connect_delay: None,
            link_loss: None,
        }
    }

    /// Fails the next `count` connection attempts.
    pub(crate) fn failing(self, count: u32) -> Self {
        self.shared.remaining_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Retries attempts the way the broker transport does.
    pub(crate) fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = Some(ReconnectController::new(policy));
        self
    }

    /// Delays every attempt.
    pub(crate) const fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Makes `disconnect()` return an error after releasing the link.
    pub(crate) fn failing_disconnect(self) -> Self {
        self.shared.failing_disconnect.store(true, Ordering::SeqCst);
        self
    }

    /// Drops the link while `connect()` is still running.
    pub(crate) const fn losing_link(mut self, loss: LinkLoss) -> Self {
        self.link_loss = Some(loss);
        self
    }

    /// Reports a different transport kind; `Mqtt` enables publishing.
    pub(crate) const fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
            targets: self.targets.clone(),
        }
    }
}

async fn attempt(shared: Arc<Shared>, delay: Option<Duration>) -> Result<()> {
    shared.attempts.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let failed = shared
        .remaining_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        return Err(Error::connection_reason("mock connection refused"));
    }
    Ok(())
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let delay = self.connect_delay;
            match self.reconnect.as_mut() {
                Some(controller) => {
                    let shared = Arc::clone(&self.shared);
                    controller
                        .run(|_| attempt(Arc::clone(&shared), delay))
                        .await?;
                }
                None => attempt(Arc::clone(&self.shared), delay).await?,
            }
            self.shared.connected.store(true, Ordering::SeqCst);
            if let Some(loss) = self.link_loss {
                self.shared.connected.store(false, Ordering::SeqCst);
                match loss {
                    LinkLoss::Close => self.targets.deliver_close(),
                    LinkLoss::Error => self
                        .targets
                        .deliver_error(Error::Io(std::io::Error::other("reset during connect"))),
                    LinkLoss::Silent => {}
                }
            }
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
            self.shared.connected.store(false, Ordering::SeqCst);
            if self.shared.failing_disconnect.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("mock teardown failed")));
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            self.shared.sent.lock().unwrap().push(data);
            Ok(())
        })
    }

    fn publish(
        &mut self,
        payload: Bytes,
        topic: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.kind != TransportKind::Mqtt {
                return Err(Error::UnsupportedOperation {
                    operation: "publish",
                });
            }
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            self.shared.published.lock().unwrap().push((topic, payload));
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
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl MockHandle {
    /// Delivers a chunk as if read from the link.
    pub(crate) fn push(&self, chunk: &[u8]) {
        self.targets.deliver_data(Bytes::copy_from_slice(chunk));
    }

    /// Reports a link failure.
    pub(crate) fn fail(&self, error: Error) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.targets.deliver_error(error);
    }

    /// Simulates the peer closing the link.
    pub(crate) fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.targets.deliver_close();
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub(crate) fn published(&self) -> Vec<(Option<String>, Bytes)> {
        self.shared.published.lock().unwrap().clone()
    }
}
