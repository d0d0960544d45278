//! Main [`RfidClient`] implementation.
//!
//! This module provides the high-level [`RfidClient`] that manages one active
//! reader, forwards its lifecycle and error events, and keeps cumulative
//! session statistics over the tags it reports.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind, ListenerHandle, Subscription};
use crate::protocol::Framer;
use crate::reader::Reader;
use crate::transport::{
    MqttConfig, MqttTransport, SerialConfig, SerialTransport, TcpConfig, TcpTransport, Transport,
};
use crate::types::{
    ConnectionState, Payload, ReaderInfo, ReaderSettings, SessionStats, StatsSnapshot, TagEvent,
    TransportEndpoint,
};

/// Lifecycle and diagnostic events forwarded from the active reader.
const FORWARDED: [EventKind; 4] = [
    EventKind::Connecting,
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::Diagnostic,
];

/// Builds the transport described by an endpoint.
fn transport_for(endpoint: &TransportEndpoint) -> Box<dyn Transport> {
    match endpoint {
        TransportEndpoint::Tcp { host, port, .. } => {
            Box::new(TcpTransport::new(TcpConfig::new(host.clone(), *port)))
        }
        TransportEndpoint::Serial {
            path, baud_rate, ..
        } => Box::new(SerialTransport::new(
            SerialConfig::new(path.clone()).baud_rate(*baud_rate),
        )),
        TransportEndpoint::Mqtt {
            broker_url,
            topic,
            username,
            password,
            client_id,
            ..
        } => {
            let mut config = MqttConfig::new(broker_url.clone(), topic.clone());
            config.username.clone_from(username);
            config.password.clone_from(password);
            config.client_id.clone_from(client_id);
            Box::new(MqttTransport::new(config))
        }
    }
}

/// Client managing one reader session at a time.
///
/// Events from the active reader are re-published on the client's own bus:
/// `connecting`, `connected`, `disconnected`, `diagnostic` and `error` as they
/// happen, and
/// `tag` plus `stats` once [`RfidClient::start`] has been called.
pub struct RfidClient {
    bus: EventBus,
    reader: Option<Arc<Reader>>,
    stats: Arc<Mutex<SessionStats>>,
    forwarders: Vec<ListenerHandle>,
    tag_listener: Option<ListenerHandle>,
}

fn lock_stats(stats: &Mutex<SessionStats>) -> MutexGuard<'_, SessionStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RfidClient {
    /// Creates a client with no active reader.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    /// Creates a client publishing on the given bus.
    #[must_use]
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            bus,
            reader: None,
            stats: Arc::new(Mutex::new(SessionStats::new())),
            forwarders: Vec::new(),
            tag_listener: None,
        }
    }

    /// Connects to the reader described by `endpoint`.
    ///
    /// Any active reader is disconnected first.
    ///
    /// # Errors
    ///
    /// Returns the reader's connection error; the client is then left
    /// without an active reader.
    pub async fn connect(&mut self, endpoint: &TransportEndpoint) -> Result<()> {
        let protocol = endpoint.protocol();
        let info = ReaderInfo::new(protocol.model(), endpoint.kind(), endpoint.address());
        self.connect_with(info, transport_for(endpoint), protocol.framer())
            .await
    }

    /// Connects to a TCP reader speaking the line protocol.
    pub async fn connect_tcp(&mut self, host: impl Into<String>, port: u16) -> Result<()> {
        self.connect(&TransportEndpoint::tcp(host, port)).await
    }

    /// Connects to a serial reader speaking the line protocol.
    pub async fn connect_serial(&mut self, path: impl Into<String>) -> Result<()> {
        self.connect(&TransportEndpoint::serial(path)).await
    }

    /// Connects to a broker and treats each message on `topic` as a tag.
    pub async fn connect_mqtt(
        &mut self,
        broker_url: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<()> {
        self.connect(&TransportEndpoint::mqtt(broker_url, topic))
            .await
    }

    /// Connects through a caller-supplied transport and framer.
    pub async fn connect_with(
        &mut self,
        info: ReaderInfo,
        transport: Box<dyn Transport>,
        framer: Box<dyn Framer>,
    ) -> Result<()> {
        self.teardown().await;

        let reader = Arc::new(Reader::new(info, transport, framer, self.bus.scope()));
        self.forwarders = self.forward_events(reader.events());
        self.reader = Some(Arc::clone(&reader));

        if let Err(e) = reader.connect().await {
            for handle in self.forwarders.drain(..) {
                handle.unsubscribe();
            }
            if let Err(cleanup) = reader.disconnect().await {
                tracing::warn!(
                    "cleanup after failed connect to {}: {}",
                    reader.info().id,
                    cleanup
                );
            }
            self.detach();
            return Err(e);
        }
        Ok(())
    }

    fn forward_events(&self, source: &EventBus) -> Vec<ListenerHandle> {
        let mut handles: Vec<ListenerHandle> = FORWARDED
            .into_iter()
            .map(|kind| {
                let target = self.bus.clone();
                source.on(kind, move |event| {
                    target.emit(event.clone());
                })
            })
            .collect();

        let target = self.bus.clone();
        handles.push(source.on(EventKind::Error, move |event| {
            if let Event::Error(error) = event {
                target.emit_error(error.clone());
            }
        }));
        handles
    }

    fn active_reader(&self) -> Result<Arc<Reader>> {
        self.reader.clone().ok_or(Error::NotConnected)
    }

    /// Starts collecting tags and asks the reader to scan.
    ///
    /// Every tag updates the cumulative statistics, is re-emitted unchanged
    /// and is followed by a `stats` event. Calling `start` again does not
    /// count tags twice.
    pub async fn start(&mut self) -> Result<()> {
        let reader = self.active_reader()?;

        if self.tag_listener.is_none() {
            let bus = self.bus.clone();
            let stats = Arc::clone(&self.stats);
            self.tag_listener = Some(reader.events().on(EventKind::Tag, move |event| {
                if let Event::Tag(tag) = event {
                    let snapshot = lock_stats(&stats).record(&tag.tag_id);
                    bus.emit(Event::Tag(tag.clone()));
                    bus.emit(Event::Stats(snapshot));
                }
            }));
        }

        reader.start_scan().await
    }

    /// Asks the reader to stop scanning. The connection stays open.
    pub async fn stop(&mut self) -> Result<()> {
        match &self.reader {
            Some(reader) => reader.stop_scan().await,
            None => Ok(()),
        }
    }

    /// Applies reader settings.
    pub async fn configure(&self, settings: &ReaderSettings) -> Result<()> {
        self.active_reader()?.configure(settings).await
    }

    /// Publishes a payload through the active reader's transport.
    pub async fn publish(&self, payload: impl Into<Payload>, topic: Option<String>) -> Result<()> {
        self.active_reader()?.publish(payload.into(), topic).await
    }

    /// Re-publishes a tag read: its raw frame, or JSON for tags without one.
    pub async fn publish_tag(&self, tag: &TagEvent, topic: Option<String>) -> Result<()> {
        let reader = self.active_reader()?;
        reader.publish(Payload::from_tag(tag)?, topic).await
    }

    /// Disconnects the active reader, if any.
    ///
    /// Never fails; transport errors during teardown are logged.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(reader) = self.reader.clone() {
            if let Err(e) = reader.disconnect().await {
                tracing::warn!("error disconnecting reader {}: {}", reader.info().id, e);
            }
        }
        self.detach();
    }

    fn detach(&mut self) {
        for handle in self.forwarders.drain(..) {
            handle.unsubscribe();
        }
        if let Some(handle) = self.tag_listener.take() {
            handle.unsubscribe();
        }
        self.reader = None;
    }

    /// Returns a copy of the cumulative statistics.
    #[must_use]
    pub fn cumulative_stats(&self) -> SessionStats {
        lock_stats(&self.stats).clone()
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        lock_stats(&self.stats).snapshot()
    }

    /// Clears the statistics and emits the zeroed snapshot.
    pub fn reset_cumulative_stats(&self) {
        let snapshot = {
            let mut stats = lock_stats(&self.stats);
            stats.reset();
            stats.snapshot()
        };
        self.bus.emit(Event::Stats(snapshot));
    }

    /// Returns the active reader.
    #[must_use]
    pub const fn reader(&self) -> Option<&Arc<Reader>> {
        self.reader.as_ref()
    }

    /// Returns the active reader's state, or `Idle` without one.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.reader
            .as_ref()
            .map_or(ConnectionState::Idle, |reader| reader.state())
    }

    /// Returns true if a reader is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the client's event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to an event kind on the client bus.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.on(kind, listener)
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }
}

impl Default for RfidClient {
    fn default() -> Self {
        Self::new()
    }
}
