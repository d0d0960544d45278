//! Event system for reader notifications.
//!
//! The [`EventBus`] delivers typed [`Event`]s synchronously to registered
//! listeners, in subscription order. Each emission works on a snapshot of the
//! listener set, so listeners may subscribe, unsubscribe or emit from inside a
//! callback. Errors travel on a distinguished channel ([`EventBus::emit_error`])
//! that also reaches global error handlers and is logged when nobody listens.
//!
//! For async consumers, [`EventBus::subscribe`] returns a [`Subscription`] that
//! yields every event through a channel.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result, SdkError};
use crate::types::{ReaderInfo, StatsSnapshot, TagEvent};

/// Listener count per event kind above which a leak warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 100;

/// Event kinds that listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Connection attempt started.
    Connecting,
    /// Connection established.
    Connected,
    /// Connection closed.
    Disconnected,
    /// Error reported on the error channel.
    Error,
    /// Tag detected.
    Tag,
    /// Raw chunk received from the transport.
    RawData,
    /// Session statistics changed.
    Stats,
    /// Free-form diagnostic message.
    Diagnostic,
}

impl EventKind {
    /// All event kinds, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Connecting,
        Self::Connected,
        Self::Disconnected,
        Self::Error,
        Self::Tag,
        Self::RawData,
        Self::Stats,
        Self::Diagnostic,
    ];

    /// Returns the event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Tag => "tag",
            Self::RawData => "raw_data",
            Self::Stats => "stats",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection attempt started.
    Connecting(ReaderInfo),
    /// Connection established.
    Connected(ReaderInfo),
    /// Connection closed.
    Disconnected(ReaderInfo),
    /// Error value from the error channel.
    Error(SdkError),
    /// Tag detected.
    Tag(TagEvent),
    /// Raw chunk received from the transport, before framing.
    RawData(Bytes),
    /// Session statistics snapshot.
    Stats(StatsSnapshot),
    /// Diagnostic message.
    Diagnostic(String),
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connecting(_) => EventKind::Connecting,
            Self::Connected(_) => EventKind::Connected,
            Self::Disconnected(_) => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::Tag(_) => EventKind::Tag,
            Self::RawData(_) => EventKind::RawData,
            Self::Stats(_) => EventKind::Stats,
            Self::Diagnostic(_) => EventKind::Diagnostic,
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&SdkError) + Send + Sync>;

struct Entry {
    id: u64,
    /// `None` matches every kind.
    kind: Option<EventKind>,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
    error_handlers: Vec<(u64, ErrorHandler)>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn count(&self, kind: EventKind) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind.is_none_or(|k| k == kind))
            .count()
    }

    /// Clones the listeners matching `kind` and drops the `once` entries among them.
    fn take_matching(&mut self, kind: EventKind) -> Vec<Listener> {
        let mut matched = Vec::new();
        self.entries.retain(|entry| {
            if entry.kind.is_none_or(|k| k == kind) {
                matched.push(Arc::clone(&entry.listener));
                !entry.once
            } else {
                true
            }
        });
        matched
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len() + self.error_handlers.len();
        self.entries.retain(|entry| entry.id != id);
        self.error_handlers.retain(|(handler_id, _)| *handler_id != id);
        before != self.entries.len() + self.error_handlers.len()
    }
}

struct BusInner {
    registry: Mutex<Registry>,
    max_listeners: usize,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Typed publish/subscribe dispatcher.
///
/// Cloning an `EventBus` yields another handle to the same subscriber set; use
/// [`EventBus::scope`] for an independent bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates an event bus with the default listener limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// Creates an event bus warning above `max_listeners` listeners per kind.
    #[must_use]
    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                max_listeners,
            }),
        }
    }

    /// Subscribes to an event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), false, Arc::new(listener))
    }

    /// Subscribes to the next event of a kind only.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), true, Arc::new(listener))
    }

    /// Registers a global error handler, called for every [`EventBus::emit_error`].
    pub fn on_error<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&SdkError) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.error_handlers.push((id, Arc::new(handler)));
        self.handle(id)
    }

    fn register(&self, kind: Option<EventKind>, once: bool, listener: Listener) -> ListenerHandle {
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.entries.push(Entry {
            id,
            kind,
            once,
            listener,
        });

        let max = self.inner.max_listeners;
        for checked in kind.map_or(EventKind::ALL.to_vec(), |k| vec![k]) {
            let count = registry.count(checked);
            if count == max + 1 {
                tracing::warn!(
                    "{} listeners registered for '{}' (limit {}), possible listener leak",
                    count,
                    checked,
                    max
                );
            }
        }

        self.handle(id)
    }

    fn handle(&self, id: u64) -> ListenerHandle {
        ListenerHandle {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Delivers an event to all current subscribers of its kind.
    ///
    /// Returns true if at least one listener was invoked.
    pub fn emit(&self, event: Event) -> bool {
        let listeners = self.inner.lock().take_matching(event.kind());
        for listener in &listeners {
            listener(&event);
        }
        !listeners.is_empty()
    }

    /// Delivers an error to `error` subscribers and global error handlers.
    ///
    /// With neither registered, the error is logged once as unhandled.
    pub fn emit_error(&self, error: SdkError) {
        let (listeners, handlers) = {
            let mut registry = self.inner.lock();
            let listeners = registry.take_matching(EventKind::Error);
            let handlers: Vec<ErrorHandler> = registry
                .error_handlers
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect();
            (listeners, handlers)
        };

        if listeners.is_empty() && handlers.is_empty() {
            tracing::warn!(
                code = %error.code,
                source = error.source.as_deref().unwrap_or("-"),
                "unhandled reader error: {}",
                error.message
            );
            return;
        }

        let event = Event::Error(error.clone());
        for listener in &listeners {
            listener(&event);
        }
        for handler in &handlers {
            handler(&error);
        }
    }

    /// Waits for the next event of a kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time, or
    /// [`Error::Cancelled`] if the listener is removed while waiting.
    pub async fn wait_for(&self, kind: EventKind, timeout: Duration) -> Result<Event> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handle = self.once(kind, move |event| {
            if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(event.clone());
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                handle.unsubscribe();
                Err(Error::timeout(timeout))
            }
        }
    }

    /// Subscribes to every event through an async channel.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let handle = self.register(
            None,
            false,
            Arc::new(move |event: &Event| {
                let _ = tx.send(event.clone());
            }),
        );
        Subscription { receiver, handle }
    }

    /// Number of listeners that would receive an event of this kind.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.lock().count(kind)
    }

    /// Number of global error handlers.
    #[must_use]
    pub fn error_handler_count(&self) -> usize {
        self.inner.lock().error_handlers.len()
    }

    /// Event kinds with at least one listener.
    #[must_use]
    pub fn active_events(&self) -> Vec<EventKind> {
        let registry = self.inner.lock();
        EventKind::ALL
            .into_iter()
            .filter(|kind| registry.count(*kind) > 0)
            .collect()
    }

    /// Listener counts per active event kind, for debugging.
    #[must_use]
    pub fn listener_details(&self) -> BTreeMap<EventKind, usize> {
        let registry = self.inner.lock();
        EventKind::ALL
            .into_iter()
            .map(|kind| (kind, registry.count(kind)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Removes the listeners of one kind, or every listener.
    ///
    /// Global error handlers are kept; see [`EventBus::clear`].
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut registry = self.inner.lock();
        match kind {
            Some(kind) => registry.entries.retain(|entry| entry.kind != Some(kind)),
            None => registry.entries.clear(),
        }
    }

    /// Removes every listener and error handler.
    pub fn clear(&self) {
        let mut registry = self.inner.lock();
        registry.entries.clear();
        registry.error_handlers.clear();
    }

    /// Creates an independent bus with the same listener limit.
    #[must_use]
    pub fn scope(&self) -> Self {
        Self::with_max_listeners(self.inner.max_listeners)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_details())
            .field("error_handlers", &self.error_handler_count())
            .finish()
    }
}

/// Handle returned by subscriptions; removes the listener when asked.
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    bus: Weak<BusInner>,
    id: u64,
}

impl ListenerHandle {
    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| inner.lock().remove(self.id))
    }
}

/// A channel-backed subscription to every event of a bus.
///
/// Unsubscribes when dropped.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Event>,
    handle: ListenerHandle,
}

impl Subscription {
    /// Receives the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;
    use crate::error::ErrorCode;

    fn diagnostic(text: &str) -> Event {
        Event::Diagnostic(text.to_owned())
    }

    fn recorder(bus: &EventBus, kind: EventKind) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(kind, move |event| {
            sink.lock().unwrap().push(format!("{event:?}"));
        });
        seen
    }

    #[test]
    fn test_emit_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            bus.on(EventKind::Diagnostic, move |_| order.lock().unwrap().push(n));
        }

        assert!(bus.emit(diagnostic("x")));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let tags = recorder(&bus, EventKind::Tag);

        assert!(!bus.emit(diagnostic("ignored")));
        assert!(tags.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_added_during_emit_is_not_invoked() {
        let bus = EventBus::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let counter = Arc::clone(&late_calls);
        bus.on(EventKind::Diagnostic, move |_| {
            let counter = Arc::clone(&counter);
            inner_bus.on(EventKind::Diagnostic, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.emit(diagnostic("first"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        bus.emit(diagnostic("second"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_delivers_a_single_time() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.once(EventKind::Diagnostic, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(diagnostic("a"));
        bus.emit(diagnostic("b"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventKind::Diagnostic), 0);
    }

    #[test]
    fn test_unsubscribe_handle() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = bus.on(EventKind::Diagnostic, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        bus.emit(diagnostic("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_emit_reentrantly() {
        let bus = EventBus::new();
        let stats = recorder(&bus, EventKind::Stats);

        let inner_bus = bus.clone();
        bus.on(EventKind::Diagnostic, move |_| {
            inner_bus.emit(Event::Stats(StatsSnapshot::default()));
        });

        bus.emit(diagnostic("trigger"));
        assert_eq!(stats.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_emit_error_reaches_listeners_and_handlers() {
        let bus = EventBus::new();
        let listener_calls = Arc::new(AtomicUsize::new(0));
        let handler_codes = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&listener_calls);
        bus.on(EventKind::Error, move |event| {
            assert!(matches!(event, Event::Error(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let codes = Arc::clone(&handler_codes);
        bus.on_error(move |error| codes.lock().unwrap().push(error.code));

        bus.emit_error(SdkError::new(ErrorCode::ReaderError, "boom"));

        assert_eq!(listener_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*handler_codes.lock().unwrap(), vec![ErrorCode::ReaderError]);
    }

    #[test]
    fn test_emit_error_without_listeners_does_not_panic() {
        let bus = EventBus::new();
        bus.emit_error(SdkError::new(ErrorCode::FrameError, "nobody listens"));
        assert_eq!(bus.listener_count(EventKind::Error), 0);
    }

    #[test]
    fn test_error_handler_unsubscribe() {
        let bus = EventBus::new();
        let handle = bus.on_error(|_| {});
        assert_eq!(bus.error_handler_count(), 1);
        assert!(handle.unsubscribe());
        assert_eq!(bus.error_handler_count(), 0);
    }

    #[test]
    fn test_scope_is_independent() {
        let parent = EventBus::new();
        let parent_seen = recorder(&parent, EventKind::Diagnostic);
        let child = parent.scope();
        let child_seen = recorder(&child, EventKind::Diagnostic);

        child.emit(diagnostic("child"));
        assert!(parent_seen.lock().unwrap().is_empty());
        assert_eq!(child_seen.lock().unwrap().len(), 1);
        assert_eq!(parent.listener_count(EventKind::Diagnostic), 1);
    }

    #[test]
    fn test_listener_details_and_removal() {
        let bus = EventBus::new();
        bus.on(EventKind::Tag, |_| {});
        bus.on(EventKind::Tag, |_| {});
        bus.on(EventKind::Stats, |_| {});

        assert_eq!(bus.active_events(), vec![EventKind::Tag, EventKind::Stats]);
        assert_eq!(bus.listener_details().get(&EventKind::Tag), Some(&2));

        bus.remove_all_listeners(Some(EventKind::Tag));
        assert_eq!(bus.active_events(), vec![EventKind::Stats]);

        bus.on_error(|_| {});
        bus.clear();
        assert!(bus.active_events().is_empty());
        assert_eq!(bus.error_handler_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_with_next_event() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit(diagnostic("ready"));
        });

        let event = bus
            .wait_for(EventKind::Diagnostic, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(event, Event::Diagnostic(ref text) if text == "ready"));
        assert_eq!(bus.listener_count(EventKind::Diagnostic), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let bus = EventBus::new();
        let result = bus
            .wait_for(EventKind::Connected, Duration::from_millis(250))
            .await;

        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 250 })));
        assert_eq!(bus.listener_count(EventKind::Connected), 0);
    }

    #[tokio::test]
    async fn test_subscription_receives_all_kinds() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.emit(diagnostic("one"));
        bus.emit(Event::Stats(StatsSnapshot { total: 1, unique: 1 }));

        assert!(matches!(sub.recv().await, Some(Event::Diagnostic(_))));
        assert!(matches!(sub.next().await, Some(Event::Stats(_))));
        assert!(sub.try_recv().is_none());

        assert_eq!(bus.listener_count(EventKind::Tag), 1);
        drop(sub);
        assert_eq!(bus.listener_count(EventKind::Tag), 0);
    }

    #[test]
    fn test_subscription_counts_as_error_listener() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit_error(SdkError::new(ErrorCode::ReaderError, "seen"));
        assert!(matches!(sub.try_recv(), Some(Event::Error(_))));
    }
}
