//! MQTT transport for readers that publish through a broker.
//!
//! The broker client's own reconnect behaviour is not used: each connection
//! attempt builds a fresh client, and attempts are driven by a
//! [`ReconnectController`]. `connect` resolves only after the broker has
//! acknowledged both the session and the topic subscription. A connection
//! lost after that is reported as a close and not restarted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::task::JoinHandle;
use url::Url;

use super::{CloseHandler, DataHandler, DeliveryTargets, ErrorHandler, Transport};
use crate::error::{Error, Result};
use crate::reconnect::{ReconnectController, RetryPolicy};
use crate::types::TransportKind;

/// Default port for plain MQTT.
pub const DEFAULT_PORT: u16 = 1883;

/// Default port for MQTT over TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 32;

/// Time given to the event loop to flush a DISCONNECT before it is aborted.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker location resolved from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Whether the connection uses TLS.
    pub tls: bool,
}

impl BrokerAddress {
    /// Parses a broker URL.
    ///
    /// A URL without a scheme is taken as `mqtt://`. `mqtt` and `tcp` are
    /// plain connections, `mqtts` and `ssl` use TLS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] for unparseable URLs, unsupported
    /// schemes, and missing or purely numeric hosts.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let normalized = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("mqtt://{trimmed}")
        };

        let url = Url::parse(&normalized).map_err(|e| Error::InvalidEndpoint {
            reason: format!("invalid broker url '{raw}': {e}"),
        })?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(Error::InvalidEndpoint {
                    reason: format!("unsupported broker scheme '{other}'"),
                });
            }
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidEndpoint {
                reason: format!("broker url '{raw}' has no host"),
            })?;
        if host.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidEndpoint {
                reason: format!("broker url '{raw}' has a numeric host"),
            });
        }

        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(Self {
            host: host.to_owned(),
            port,
            tls,
        })
    }
}

/// Configuration for MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL, e.g. `mqtt://broker.local:1883`.
    pub broker_url: String,
    /// Topic the reader publishes tags to; also the default publish topic.
    pub topic: String,
    /// Broker user name.
    pub username: Option<String>,
    /// Broker password.
    pub password: Option<String>,
    /// Client identifier; generated per connection when unset.
    pub client_id: Option<String>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Quality of service for the subscription and publishes.
    pub qos: QoS,
    /// Connection retry policy.
    pub retry: RetryPolicy,
}

impl MqttConfig {
    /// Creates a new MQTT configuration with default settings.
    #[must_use]
    pub fn new(broker_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            topic: topic.into(),
            username: None,
            password: None,
            client_id: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            qos: QoS::AtMostOnce,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets a fixed client identifier.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (at least one second).
    #[must_use]
    pub const fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Sets the quality of service.
    #[must_use]
    pub const fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds client options from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the broker URL is invalid.
    pub fn options(&self) -> Result<MqttOptions> {
        let broker = BrokerAddress::parse(&self.broker_url)?;
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("rfid-reader-{}", chrono::Utc::now().timestamp_millis()));

        let mut options = MqttOptions::new(client_id, broker.host, broker.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        if broker.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        Ok(options)
    }
}

/// Opens a session and subscribes; resolves once both are acknowledged.
async fn establish(options: MqttOptions, topic: &str, qos: QoS) -> Result<(AsyncClient, EventLoop)> {
    let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            if ack.code != ConnectReturnCode::Success {
                return Err(Error::connection_reason(format!(
                    "broker refused connection: {:?}",
                    ack.code
                )));
            }
            break;
        }
    }

    client.subscribe(topic, qos).await?;
    loop {
        if let Event::Incoming(Packet::SubAck(ack)) = event_loop.poll().await? {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                return Err(Error::connection_reason(format!(
                    "broker rejected subscription to '{topic}'"
                )));
            }
            return Ok((client, event_loop));
        }
    }
}

/// Delivers incoming publishes until the session ends.
async fn run_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    targets: DeliveryTargets,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(
                    "mqtt message on '{}': {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                targets.deliver_data(publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::debug!("broker ended the session");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if !closing.load(Ordering::SeqCst) {
                    tracing::warn!("mqtt connection lost: {}", e);
                }
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    if !closing.load(Ordering::SeqCst) {
        targets.deliver_close();
    }
}

/// MQTT transport.
pub struct MqttTransport {
    config: MqttConfig,
    reconnect: ReconnectController,
    client: Option<AsyncClient>,
    poll_task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    targets: DeliveryTargets,
}

impl MqttTransport {
    /// Creates a new MQTT transport with the given configuration.
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        let reconnect = ReconnectController::new(config.retry.clone());
        Self {
            config,
            reconnect,
            client: None,
            poll_task: None,
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            targets: DeliveryTargets::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Retries performed by the current connection attempt.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.reconnect.retry_count()
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

impl Transport for MqttTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }
            self.closing.store(true, Ordering::SeqCst);
            self.abort_task();
            self.client = None;

            let options = self.config.options()?;
            let topic = self.config.topic.clone();
            let qos = self.config.qos;
            tracing::info!(
                "connecting to mqtt broker {} (topic '{}')",
                self.config.broker_url,
                topic
            );

            let (client, event_loop) = self
                .reconnect
                .run(|attempt| {
                    let options = options.clone();
                    let topic = topic.clone();
                    async move {
                        tracing::debug!("mqtt connect attempt {}", attempt);
                        establish(options, &topic, qos).await
                    }
                })
                .await?;

            self.closing.store(false, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            self.poll_task = Some(tokio::spawn(run_event_loop(
                event_loop,
                Arc::clone(&self.connected),
                Arc::clone(&self.closing),
                self.targets.clone(),
            )));
            self.client = Some(client);

            tracing::info!("subscribed to '{}'", topic);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.closing.store(true, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);

            if let Some(client) = self.client.take() {
                tracing::info!("disconnecting from mqtt broker {}", self.config.broker_url);
                if let Err(e) = client.disconnect().await {
                    tracing::debug!("mqtt disconnect request: {}", e);
                }
            }
            if let Some(mut task) = self.poll_task.take() {
                if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.publish(data, None)
    }

    fn publish(
        &mut self,
        payload: Bytes,
        topic: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            let client = self.client.as_ref().ok_or(Error::NotConnected)?;
            let topic = topic.unwrap_or_else(|| self.config.topic.clone());

            tracing::trace!("mqtt publishing {} bytes to '{}'", payload.len(), topic);
            client
                .publish_bytes(topic, self.config.qos, false, payload)
                .await?;
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

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.abort_task();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    use super::*;

    /// Reads one MQTT control packet, returning its type byte and body.
    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = (topic.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);
        let mut packet = vec![0x30, body.len() as u8];
        packet.extend(body);
        packet
    }

    /// Minimal broker: drops the first `refuse` connections, then accepts one
    /// session, sends `greeting` after the SUBACK and forwards client publishes.
    /// With `hang_up` the session is closed right after the SUBACK.
    async fn fake_broker(
        refuse: usize,
        greeting: Vec<u8>,
        hang_up: bool,
    ) -> (u16, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for _ in 0..refuse {
                let (socket, _) = listener.accept().await.unwrap();
                drop(socket);
            }
            let (mut socket, _) = listener.accept().await.unwrap();
            while let Some((header, body)) = read_packet(&mut socket).await {
                match header >> 4 {
                    1 => socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                    8 => {
                        socket
                            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                            .await
                            .unwrap();
                        if hang_up {
                            break;
                        }
                        if !greeting.is_empty() {
                            socket
                                .write_all(&publish_packet("readers/dock-1", &greeting))
                                .await
                                .unwrap();
                        }
                    }
                    3 => {
                        let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                        let topic = String::from_utf8_lossy(&body[2..2 + len]).into_owned();
                        let _ = tx.send((topic, body[2 + len..].to_vec()));
                    }
                    12 => socket.write_all(&[0xD0, 0x00]).await.unwrap(),
                    14 => break,
                    _ => {}
                }
            }
        });

        (port, rx)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(40))
            .attempt_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_broker_url_normalization() {
        let plain = BrokerAddress::parse("broker.local").unwrap();
        assert_eq!(plain, BrokerAddress { host: "broker.local".into(), port: 1883, tls: false });

        let tls = BrokerAddress::parse("mqtts://broker.local").unwrap();
        assert_eq!((tls.port, tls.tls), (8883, true));

        let ssl = BrokerAddress::parse("ssl://broker.local:9000").unwrap();
        assert_eq!((ssl.port, ssl.tls), (9000, true));

        let tcp = BrokerAddress::parse("tcp://10.1.2.3:1884").unwrap();
        assert_eq!((tcp.host.as_str(), tcp.port, tcp.tls), ("10.1.2.3", 1884, false));
    }

    #[test]
    fn test_broker_url_rejections() {
        for url in ["http://broker.local", "1883", "mqtt://", "mqtt://12345"] {
            assert!(
                matches!(BrokerAddress::parse(url), Err(Error::InvalidEndpoint { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_defaults_and_client_id() {
        let config = MqttConfig::new("broker.local", "readers/+");
        assert_eq!(config.keep_alive, DEFAULT_KEEP_ALIVE);
        assert_eq!(config.qos, QoS::AtMostOnce);
        assert_eq!(config.retry, RetryPolicy::default());

        let options = config.options().unwrap();
        assert!(options.client_id().starts_with("rfid-reader-"));
        assert_eq!(options.broker_address(), ("broker.local".to_owned(), 1883));

        let fixed = MqttConfig::new("broker.local", "t").client_id("dock-1").options().unwrap();
        assert_eq!(fixed.client_id(), "dock-1");
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let mut transport = MqttTransport::new(MqttConfig::new("broker.local", "t"));
        assert!(matches!(
            transport.publish(Bytes::from_static(b"{}"), None).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_retry() {
        let mut transport = MqttTransport::new(MqttConfig::new("ftp://broker", "t"));
        assert!(matches!(
            transport.connect().await,
            Err(Error::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_subscribe_receive_publish() {
        let (port, mut published) = fake_broker(0, b"{\"epc\":\"E200\"}".to_vec(), false).await;
        let config = MqttConfig::new(format!("mqtt://127.0.0.1:{port}"), "readers/dock-1")
            .retry(fast_retry());
        let mut transport = MqttTransport::new(config);

        let (data_tx, mut data_rx) = mpsc::unbounded_channel();
        transport.on_data(Arc::new(move |chunk: Bytes| {
            let _ = data_tx.send(chunk);
        }));

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(&data_rx.recv().await.unwrap()[..], b"{\"epc\":\"E200\"}");

        transport
            .publish(Bytes::from_static(b"ack"), Some("readers/dock-1/ack".into()))
            .await
            .unwrap();
        let (topic, payload) = published.recv().await.unwrap();
        assert_eq!(topic, "readers/dock-1/ack");
        assert_eq!(payload, b"ack");

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_retries_until_broker_accepts() {
        let (port, _published) = fake_broker(3, b"E200".to_vec(), false).await;
        let config = MqttConfig::new(format!("127.0.0.1:{port}"), "readers/dock-1")
            .retry(fast_retry());
        let mut transport = MqttTransport::new(config);

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.retry_count(), 0);
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_when_broker_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig::new(format!("mqtt://127.0.0.1:{port}"), "t")
            .retry(fast_retry().max_retries(1));
        let mut transport = MqttTransport::new(config);

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.to_string().contains("after 2 attempts"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_broker_hang_up_reports_close() {
        let (port, _published) = fake_broker(0, Vec::new(), true).await;
        let config = MqttConfig::new(format!("mqtt://127.0.0.1:{port}"), "readers/dock-1")
            .retry(fast_retry());
        let mut transport = MqttTransport::new(config);
        let (close_tx, mut close_rx) = mpsc::unbounded_channel();
        transport.on_close(Arc::new(move || {
            let _ = close_tx.send(());
        }));

        transport.connect().await.unwrap();
        close_rx.recv().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish(Bytes::from_static(b"x"), None).await,
            Err(Error::NotConnected)
        ));
    }
}
