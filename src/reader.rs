//! A single reader: one transport, one framer, one event bus.
//!
//! The reader owns the connection state machine:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ok──▶ Connected ──disconnect / peer close──▶ Disconnected
//!                        │                  │
//!                        └──fail──▶ Error ◀─┘ link failure
//! ```
//!
//! Bytes from the transport are emitted as `raw_data`, then parsed; complete
//! tags are emitted in stream order and malformed input is reported on the
//! error channel without touching the connection state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{Notify, watch};

use crate::error::{Error, ErrorCode, FrameError, Result, SdkError};
use crate::event::{Event, EventBus};
use crate::protocol::{FrameOutcome, Framer};
use crate::transport::Transport;
use crate::types::{ConnectionState, Payload, ReaderInfo, ReaderSettings};

/// Wakes a pending connect when `disconnect` is called.
#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// State reachable from transport callbacks.
struct Shared {
    info: ReaderInfo,
    framer: Mutex<Box<dyn Framer>>,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn lock_framer(&self) -> MutexGuard<'_, Box<dyn Framer>> {
        self.framer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn handle_raw_data(&self, chunk: Bytes) {
        self.bus.emit(Event::RawData(chunk.clone()));

        let outcomes = self.lock_framer().parse(&chunk);
        for outcome in outcomes {
            match outcome {
                FrameOutcome::Tag(tag) => {
                    tracing::debug!("tag {} from {}", tag.tag_id, self.info.id);
                    self.bus.emit(Event::Tag(tag));
                }
                FrameOutcome::Malformed(e) => self.report_frame_error(e),
            }
        }
    }

    fn handle_link_error(&self, error: Error) {
        tracing::warn!("reader {} link error: {}", self.info.id, error);
        self.state.send_replace(ConnectionState::Error);
        self.report(ErrorCode::ReaderError, Arc::new(error));
    }

    fn handle_close(&self) {
        let closed = self.state.send_if_modified(|state| {
            if matches!(*state, ConnectionState::Connected | ConnectionState::Connecting) {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if closed {
            tracing::info!("reader {} closed by peer", self.info.id);
            self.bus.emit(Event::Disconnected(self.info.clone()));
        }
    }

    fn report_frame_error(&self, error: FrameError) {
        self.report(ErrorCode::FrameError, Arc::new(Error::Frame(error)));
    }

    fn report(&self, code: ErrorCode, cause: Arc<Error>) {
        let error = SdkError::new(code, cause.to_string())
            .with_source(self.info.model.as_str())
            .with_cause(cause);
        self.bus.emit_error(error);
    }
}

/// A reader bound to a transport and a protocol framer.
pub struct Reader {
    shared: Arc<Shared>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    cancel: CancelSignal,
    scanning: AtomicBool,
}

impl Reader {
    /// Creates a reader and wires the transport's handlers to it.
    #[must_use]
    pub fn new(
        info: ReaderInfo,
        mut transport: Box<dyn Transport>,
        framer: Box<dyn Framer>,
        bus: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(Shared {
            info,
            framer: Mutex::new(framer),
            bus,
            state,
        });

        let on_data = Arc::clone(&shared);
        transport.on_data(Arc::new(move |chunk| on_data.handle_raw_data(chunk)));
        let on_error = Arc::clone(&shared);
        transport.on_error(Arc::new(move |error| on_error.handle_link_error(error)));
        let on_close = Arc::clone(&shared);
        transport.on_close(Arc::new(move || on_close.handle_close()));

        Self {
            shared,
            transport: tokio::sync::Mutex::new(transport),
            cancel: CancelSignal::default(),
            scanning: AtomicBool::new(false),
        }
    }

    /// Returns the reader description.
    #[must_use]
    pub fn info(&self) -> &ReaderInfo {
        &self.shared.info
    }

    /// Returns the reader's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watches connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns true between `start_scan` and `stop_scan`.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Returns the framer's protocol name.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        self.shared.lock_framer().protocol()
    }

    /// Connects the transport.
    ///
    /// Emits `connecting`, then `connected` on success. On failure the state
    /// becomes `Error`, one error event is emitted and the failure is
    /// returned. A link that drops while the transport is still connecting
    /// fails the call after its close or error has been reported.
    /// A concurrent [`Reader::disconnect`] cancels the attempt,
    /// which then returns [`Error::Cancelled`] without an error event.
    pub async fn connect(&self) -> Result<()> {
        let info = &self.shared.info;
        if self.is_connected() {
            tracing::debug!("reader {} already connected", info.id);
            return Ok(());
        }

        self.cancel.reset();
        self.shared.state.send_replace(ConnectionState::Connecting);
        self.shared.bus.emit(Event::Connecting(info.clone()));
        self.shared.lock_framer().reset();

        let mut transport = self.transport.lock().await;
        let result = tokio::select! {
            result = transport.connect() => result,
            () = self.cancel.cancelled() => Err(Error::Cancelled),
        };

        match result {
            Ok(()) => {
                let link_up = transport.is_connected();
                drop(transport);
                if self.promote_connecting(link_up) {
                    tracing::info!("reader {} connected via {}", info.id, info.transport);
                    self.shared.bus.emit(Event::Connected(info.clone()));
                    Ok(())
                } else {
                    tracing::warn!("reader {} lost its link while connecting", info.id);
                    Err(Error::connection_reason(format!(
                        "link to {} lost while connecting",
                        info.address
                    )))
                }
            }
            Err(Error::Cancelled) => {
                tracing::debug!("reader {} connection attempt cancelled", info.id);
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.shared.state.send_replace(ConnectionState::Error);
                drop(transport);
                tracing::warn!("reader {} failed to connect: {}", info.id, e);
                let cause = Arc::new(e);
                self.shared.report(ErrorCode::ReaderError, Arc::clone(&cause));
                Err(Error::Connection {
                    reason: format!("failed to connect to {}", info.address),
                    source: Some(cause),
                })
            }
        }
    }

    /// Moves `Connecting` to `Connected` once the transport reports success.
    ///
    /// A close or link error delivered during `transport.connect()` has
    /// already moved the state on; that outcome wins. A link that is already
    /// down with nothing delivered yet counts as a peer close.
    fn promote_connecting(&self, link_up: bool) -> bool {
        let mut next = None;
        self.shared.state.send_if_modified(|state| {
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = if link_up {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            next = Some(*state);
            true
        });
        match next {
            Some(ConnectionState::Connected) => true,
            Some(_) => {
                self.shared
                    .bus
                    .emit(Event::Disconnected(self.shared.info.clone()));
                false
            }
            None => false,
        }
    }

    /// Disconnects, cancelling a pending connect.
    ///
    /// Emits `disconnected` unless the reader already was disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel.cancel();
        self.scanning.store(false, Ordering::SeqCst);

        let result = self.transport.lock().await.disconnect().await;

        let previous = self.shared.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            tracing::info!("reader {} disconnected", self.shared.info.id);
            self.shared.bus.emit(Event::Disconnected(self.shared.info.clone()));
        }
        result
    }

    /// Feeds bytes through the framer as if read from the transport.
    pub fn handle_raw_data(&self, chunk: Bytes) {
        self.shared.handle_raw_data(chunk);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Starts continuous scanning.
    ///
    /// Sends the protocol's start command when it has one; readers that
    /// stream tags on their own need nothing.
    pub async fn start_scan(&self) -> Result<()> {
        self.ensure_connected()?;
        let command = self.shared.lock_framer().start_scan_command();
        if let Some(command) = command {
            tracing::debug!("sending start scan command: {}", hex::encode(&command));
            self.transport.lock().await.send(command).await?;
        }
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stops scanning. The connection stays open.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        let command = self.shared.lock_framer().stop_scan_command();
        if let Some(command) = command {
            if self.is_connected() {
                self.transport.lock().await.send(command).await?;
            }
        }
        Ok(())
    }

    /// Applies reader settings.
    ///
    /// Protocols without configuration commands send nothing and emit a
    /// `diagnostic` event instead.
    pub async fn configure(&self, settings: &ReaderSettings) -> Result<()> {
        self.ensure_connected()?;
        let (commands, protocol) = {
            let framer = self.shared.lock_framer();
            (framer.configure_commands(settings)?, framer.protocol())
        };
        if commands.is_empty() && !settings.is_empty() {
            tracing::debug!("{} protocol has no configuration commands", protocol);
            self.shared.bus.emit(Event::Diagnostic(format!(
                "{protocol} protocol ignores reader settings"
            )));
        }

        let mut transport = self.transport.lock().await;
        for command in commands {
            transport.send(command).await?;
        }
        Ok(())
    }

    /// Publishes a payload through the transport.
    ///
    /// Only broker transports support this; others return
    /// [`Error::UnsupportedOperation`].
    pub async fn publish(&self, payload: Payload, topic: Option<String>) -> Result<()> {
        let bytes = payload.into_bytes()?;
        self.transport.lock().await.publish(bytes, topic).await
    }

    /// Sends raw bytes to the reader.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.transport.lock().await.send(data).await
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("info", &self.shared.info)
            .field("state", &self.state())
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}
