//! # Sync Channel Module
//!
//! Topic-based data synchronisation over a pluggable message transport.
//!
//! A [`DataSync`] handle talks to a background driver task that owns the
//! connection. The driver:
//! - reconnects with backoff when the connection drops, then resubscribes
//!   every topic and flushes frames queued while offline
//! - runs each topic's transformer on incoming data before delivery
//! - keeps the last value per topic and hands it to new local subscribers
//! - answers `ping` frames with `pong`
//!
//! Frames are JSON-encoded [`SyncMessage`] envelopes. Framing on the wire
//! (WebSocket or otherwise) belongs to the [`SyncTransport`] implementation.

use crate::etl::error::{EtlError, Result};
use crate::etl::pipeline::BoxedTransformer;
use crate::etl::retry::RetryConfig;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opens connections to the sync peer.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SyncConnection>>;
}

/// One open connection carrying text frames.
#[async_trait]
pub trait SyncConnection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next incoming frame, `None` once the peer closed the connection.
    ///
    /// Must be cancel safe: the driver polls it alongside local commands.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMessageType {
    Subscribe,
    Unsubscribe,
    Data,
    Ack,
    Error,
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncMessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl SyncMessage {
    /// A message with a fresh time-ordered id.
    pub fn new(kind: SyncMessageType) -> Self {
        Self {
            kind,
            topic: None,
            data: None,
            id: Some(Uuid::now_v7().to_string()),
            meta: None,
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::new(SyncMessageType::Subscribe)
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::new(SyncMessageType::Unsubscribe)
        }
    }

    pub fn data(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            data: Some(data),
            meta: Some(json!({"sentAt": Utc::now().to_rfc3339()})),
            ..Self::new(SyncMessageType::Data)
        }
    }

    pub fn ping() -> Self {
        Self::new(SyncMessageType::Ping)
    }

    /// Reply to a ping, echoing its id.
    pub fn pong(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::new(SyncMessageType::Pong)
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EtlError::Serialization(e.to_string()))
    }

    pub fn from_frame(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(EtlError::from_serde)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Delay schedule between connection attempts
    pub retry: RetryConfig,
    /// Failed attempts tolerated after the first before giving up
    pub max_reconnect_attempts: u32,
    /// Outgoing frames kept while disconnected; the oldest are dropped first
    pub max_queue_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_reconnect_attempts: 5,
            max_queue_size: 1000,
        }
    }
}

impl SyncConfig {
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// Reconnect attempts exhausted; the driver has stopped
    Failed,
}

/// Values delivered for one local subscription.
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next value, `None` after the topic was unsubscribed or the channel
    /// shut down.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

enum Command {
    Subscribe {
        topic: String,
        transformer: Option<BoxedTransformer<Value, Value>>,
        reply: oneshot::Sender<mpsc::UnboundedReceiver<Value>>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        data: Value,
    },
    Disconnect,
}

/// Handle to a running sync channel.
pub struct DataSync {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    driver: JoinHandle<()>,
}

impl DataSync {
    /// Start the driver and wait for the first connection.
    ///
    /// Fails if every attempt allowed by the config fails.
    pub async fn connect(transport: Arc<dyn SyncTransport>, config: SyncConfig) -> Result<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let driver = tokio::spawn(
            Driver {
                transport,
                config,
                commands: command_rx,
                state: state_tx,
                topics: HashMap::new(),
                queue: VecDeque::new(),
            }
            .run(),
        );

        let mut watcher = state.clone();
        let settled = watcher
            .wait_for(|s| {
                matches!(
                    s,
                    ConnectionState::Connected | ConnectionState::Failed | ConnectionState::Disconnected
                )
            })
            .await
            .map(|s| *s);

        match settled {
            Ok(ConnectionState::Connected) => Ok(Self {
                commands,
                state,
                driver,
            }),
            _ => Err(EtlError::Connection(
                "unable to establish sync connection".to_string(),
            )),
        }
    }

    /// Subscribe to `topic`. A transformer, if given, replaces the topic's
    /// current one and applies to every value delivered afterwards.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        transformer: Option<BoxedTransformer<Value, Value>>,
    ) -> Result<Subscription> {
        let topic = topic.into();
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Subscribe {
            topic: topic.clone(),
            transformer,
            reply,
        })?;
        let receiver = receiver.await.map_err(|_| closed())?;
        Ok(Subscription { topic, receiver })
    }

    /// Drop every local subscription to `topic` and tell the peer.
    pub fn unsubscribe(&self, topic: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe {
            topic: topic.into(),
        })
    }

    /// Send data on `topic`, queueing it while disconnected.
    pub fn publish(&self, topic: impl Into<String>, data: Value) -> Result<()> {
        self.send(Command::Publish {
            topic: topic.into(),
            data,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection and wait for the driver to stop.
    pub async fn disconnect(self) -> Result<()> {
        // The driver may already be gone after a failure; joining still works.
        let _ = self.commands.send(Command::Disconnect);
        self.driver
            .await
            .map_err(|e| EtlError::Unknown(format!("sync driver panicked: {e}")))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

fn closed() -> EtlError {
    EtlError::Connection("sync channel is closed".to_string())
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<mpsc::UnboundedSender<Value>>,
    transformer: Option<BoxedTransformer<Value, Value>>,
    last_value: Option<Value>,
}

enum Established {
    Connected(Box<dyn SyncConnection>),
    Shutdown,
    Exhausted,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

enum Flow {
    Continue,
    Shutdown,
}

struct Driver {
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    topics: HashMap<String, Topic>,
    queue: VecDeque<String>,
}

impl Driver {
    async fn run(mut self) {
        let mut reconnecting = false;
        loop {
            let connection = match self.establish(reconnecting).await {
                Established::Connected(connection) => connection,
                Established::Shutdown => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Established::Exhausted => {
                    error!(
                        "Giving up on sync connection after {} attempts",
                        self.config.max_reconnect_attempts + 1
                    );
                    self.set_state(ConnectionState::Failed);
                    return;
                }
            };

            info!("Sync connection established");
            self.set_state(ConnectionState::Connected);

            match self.session(connection).await {
                SessionEnd::Shutdown => {
                    info!("Sync connection closed");
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                SessionEnd::Lost => {
                    warn!("Sync connection lost, reconnecting");
                    reconnecting = true;
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn establish(&mut self, reconnecting: bool) -> Established {
        let max_attempts = self.config.max_reconnect_attempts;
        self.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        for attempt in 0..=max_attempts {
            match self.transport.connect().await {
                Ok(connection) => return Established::Connected(connection),
                Err(e) => warn!("Sync connection attempt {} failed: {}", attempt + 1, e),
            }
            if attempt == max_attempts {
                break;
            }

            // Keep serving local commands while backing off.
            let delay = tokio::time::sleep(self.config.retry.calculate_delay(attempt));
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    command = self.commands.recv() => match command {
                        Some(command) => {
                            if let Flow::Shutdown = self.handle_offline(command) {
                                return Established::Shutdown;
                            }
                        }
                        None => return Established::Shutdown,
                    },
                }
            }
        }

        Established::Exhausted
    }

    async fn session(&mut self, mut connection: Box<dyn SyncConnection>) -> SessionEnd {
        let topics: Vec<String> = self.topics.keys().cloned().collect();
        for topic in topics {
            if let Err(e) = send_message(connection.as_mut(), &SyncMessage::subscribe(topic)).await {
                warn!("Failed to resubscribe: {}", e);
                return SessionEnd::Lost;
            }
        }

        while let Some(frame) = self.queue.pop_front() {
            if let Err(e) = connection.send(frame.clone()).await {
                warn!("Failed to flush queued frame: {}", e);
                self.queue.push_front(frame);
                return SessionEnd::Lost;
            }
        }

        loop {
            tokio::select! {
                incoming = connection.recv() => match incoming {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.on_frame(connection.as_mut(), &frame).await {
                            warn!("Failed to answer sync frame: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Sync connection error: {}", e);
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
                command = self.commands.recv() => {
                    let command = match command {
                        Some(command) => command,
                        None => Command::Disconnect,
                    };
                    match self.handle_online(command, connection.as_mut()).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Shutdown) => {
                            if let Err(e) = connection.close().await {
                                debug!("Error while closing sync connection: {}", e);
                            }
                            return SessionEnd::Shutdown;
                        }
                        Err(e) => {
                            warn!("Failed to send sync frame: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` when the topic had no local subscribers before.
    fn register(
        &mut self,
        topic: String,
        transformer: Option<BoxedTransformer<Value, Value>>,
        reply: oneshot::Sender<mpsc::UnboundedReceiver<Value>>,
    ) -> bool {
        let is_new = !self.topics.contains_key(&topic);
        let entry = self.topics.entry(topic).or_default();
        if transformer.is_some() {
            entry.transformer = transformer;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(snapshot) = &entry.last_value {
            let _ = sender.send(snapshot.clone());
        }
        entry.subscribers.push(sender);
        let _ = reply.send(receiver);
        is_new
    }

    fn enqueue(&mut self, frame: String) {
        if self.config.max_queue_size == 0 {
            warn!("Sync queue disabled, dropping frame");
            return;
        }
        if self.queue.len() >= self.config.max_queue_size {
            warn!("Sync queue full, dropping oldest frame");
            self.queue.pop_front();
        }
        self.queue.push_back(frame);
    }

    fn handle_offline(&mut self, command: Command) -> Flow {
        match command {
            Command::Subscribe {
                topic,
                transformer,
                reply,
            } => {
                self.register(topic, transformer, reply);
            }
            Command::Unsubscribe { topic } => {
                self.topics.remove(&topic);
            }
            Command::Publish { topic, data } => match SyncMessage::data(topic, data).to_frame() {
                Ok(frame) => self.enqueue(frame),
                Err(e) => warn!("Dropping unpublishable data: {}", e),
            },
            Command::Disconnect => return Flow::Shutdown,
        }
        Flow::Continue
    }

    async fn handle_online(&mut self, command: Command, connection: &mut dyn SyncConnection) -> Result<Flow> {
        match command {
            Command::Subscribe {
                topic,
                transformer,
                reply,
            } => {
                if self.register(topic.clone(), transformer, reply) {
                    send_message(connection, &SyncMessage::subscribe(topic)).await?;
                }
            }
            Command::Unsubscribe { topic } => {
                if self.topics.remove(&topic).is_some() {
                    send_message(connection, &SyncMessage::unsubscribe(topic)).await?;
                }
            }
            Command::Publish { topic, data } => {
                let frame = match SyncMessage::data(topic, data).to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping unpublishable data: {}", e);
                        return Ok(Flow::Continue);
                    }
                };
                if let Err(e) = connection.send(frame.clone()).await {
                    self.enqueue(frame);
                    return Err(e);
                }
            }
            Command::Disconnect => return Ok(Flow::Shutdown),
        }
        Ok(Flow::Continue)
    }

    async fn on_frame(&mut self, connection: &mut dyn SyncConnection, frame: &str) -> Result<()> {
        let message = match SyncMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed sync frame: {}", e);
                return Ok(());
            }
        };

        match message.kind {
            SyncMessageType::Ping => send_message(connection, &SyncMessage::pong(message.id)).await,
            // Subscribe acks may carry the current value as a snapshot.
            SyncMessageType::Data | SyncMessageType::Ack => {
                if let (Some(topic), Some(data)) = (message.topic, message.data) {
                    self.deliver(&topic, data).await;
                }
                Ok(())
            }
            SyncMessageType::Error => {
                warn!(
                    "Sync peer reported an error for topic {:?}: {}",
                    message.topic,
                    message.data.unwrap_or(Value::Null)
                );
                Ok(())
            }
            other => {
                debug!("Ignoring {:?} frame from peer", other);
                Ok(())
            }
        }
    }

    async fn deliver(&mut self, topic: &str, data: Value) {
        let Some(entry) = self.topics.get_mut(topic) else {
            debug!("Dropping data for unsubscribed topic {}", topic);
            return;
        };

        let value = match entry.transformer.clone() {
            Some(transformer) => match transformer.transform(data).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Transformer for topic {} rejected data: {}", topic, e);
                    return;
                }
            },
            None => data,
        };

        entry.last_value = Some(value.clone());
        entry.subscribers.retain(|sender| sender.send(value.clone()).is_ok());
    }
}

async fn send_message(connection: &mut dyn SyncConnection, message: &SyncMessage) -> Result<()> {
    connection.send(message.to_frame()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::pipeline::FnTransformer;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Peer side of one mock connection.
    struct PeerEnd {
        inbox: mpsc::UnboundedReceiver<String>,
        outbox: mpsc::UnboundedSender<String>,
    }

    impl PeerEnd {
        async fn next_message(&mut self) -> SyncMessage {
            let frame = self.inbox.recv().await.unwrap();
            SyncMessage::from_frame(&frame).unwrap()
        }

        fn push(&self, message: SyncMessage) {
            self.outbox.send(message.to_frame().unwrap()).unwrap();
        }
    }

    struct MockConnection {
        to_peer: mpsc::UnboundedSender<String>,
        from_peer: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl SyncConnection for MockConnection {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.to_peer
                .send(frame)
                .map_err(|_| EtlError::Connection("peer gone".to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.from_peer.recv().await.map(Ok)
        }
    }

    struct MockTransport {
        refuse: AtomicU32,
        attempts: AtomicU32,
        peers: Mutex<mpsc::UnboundedSender<PeerEnd>>,
    }

    impl MockTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEnd>) {
            let (peers, accepted) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                refuse: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
                peers: Mutex::new(peers),
            });
            (transport, accepted)
        }
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn connect(&self) -> Result<Box<dyn SyncConnection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EtlError::Connection("refused".to_string()));
            }

            let (to_peer, inbox) = mpsc::unbounded_channel();
            let (outbox, from_peer) = mpsc::unbounded_channel();
            self.peers
                .lock()
                .unwrap()
                .send(PeerEnd { inbox, outbox })
                .map_err(|_| EtlError::Connection("no listener".to_string()))?;
            Ok(Box::new(MockConnection { to_peer, from_peer }))
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::from_json(&json!({
            "retry": {"retryDelayMs": 50, "jitterMs": 0},
            "maxReconnectAttempts": 3
        }))
        .unwrap()
    }

    fn data_frame(topic: &str, data: Value) -> SyncMessage {
        SyncMessage::data(topic, data)
    }

    #[test]
    fn test_message_envelope() {
        let message = SyncMessage::subscribe("orders");
        let frame: Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
        assert_eq!(frame["type"], json!("subscribe"));
        assert_eq!(frame["topic"], json!("orders"));
        assert!(frame.get("data").is_none());
        assert!(Uuid::parse_str(frame["id"].as_str().unwrap()).is_ok());

        let parsed = SyncMessage::from_frame(r#"{"type":"ack","topic":"orders","data":[1]}"#).unwrap();
        assert_eq!(parsed.kind, SyncMessageType::Ack);
        assert_eq!(parsed.id, None);
        assert!(SyncMessage::from_frame(r#"{"type":"shout"}"#).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_transform_and_snapshot() {
        let (transport, mut peers) = MockTransport::new();
        let sync = DataSync::connect(transport, fast_config()).await.unwrap();
        assert_eq!(sync.state(), ConnectionState::Connected);
        let mut peer = peers.recv().await.unwrap();

        let doubler: BoxedTransformer<Value, Value> = Arc::new(FnTransformer(|v: Value| {
            Ok::<_, EtlError>(json!(v["price"].as_f64().unwrap_or_default() * 2.0))
        }));
        let mut first = sync.subscribe("prices", Some(doubler)).await.unwrap();
        assert_eq!(first.topic(), "prices");

        let request = peer.next_message().await;
        assert_eq!(request.kind, SyncMessageType::Subscribe);
        assert_eq!(request.topic.as_deref(), Some("prices"));

        peer.push(data_frame("prices", json!({"price": 21.0})));
        assert_eq!(first.recv().await, Some(json!(42.0)));

        // Second local subscriber gets the snapshot without another peer request.
        let mut second = sync.subscribe("prices", None).await.unwrap();
        assert_eq!(second.recv().await, Some(json!(42.0)));

        peer.push(SyncMessage {
            kind: SyncMessageType::Ack,
            topic: Some("prices".to_string()),
            data: Some(json!({"price": 5})),
            id: None,
            meta: None,
        });
        assert_eq!(first.recv().await, Some(json!(10.0)));
        assert_eq!(second.recv().await, Some(json!(10.0)));

        sync.unsubscribe("prices").unwrap();
        let request = peer.next_message().await;
        assert_eq!(request.kind, SyncMessageType::Unsubscribe);
        assert_eq!(first.recv().await, None);

        sync.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (transport, mut peers) = MockTransport::new();
        let sync = DataSync::connect(transport, fast_config()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        let ping = SyncMessage::ping();
        let ping_id = ping.id.clone();
        peer.outbox.send("not json".to_string()).unwrap();
        peer.push(ping);

        let pong = peer.next_message().await;
        assert_eq!(pong.kind, SyncMessageType::Pong);
        assert_eq!(pong.id, ping_id);

        sync.publish("audit", json!({"event": "login"})).unwrap();
        let published = peer.next_message().await;
        assert_eq!(published.kind, SyncMessageType::Data);
        assert_eq!(published.data, Some(json!({"event": "login"})));
        assert!(published.meta.unwrap().get("sentAt").is_some());

        sync.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_and_flushes_queue() {
        let (transport, mut peers) = MockTransport::new();
        let sync = DataSync::connect(transport.clone(), fast_config()).await.unwrap();
        let mut states = sync.watch_state();

        let mut peer = peers.recv().await.unwrap();
        let mut updates = sync.subscribe("inventory", None).await.unwrap();
        assert_eq!(peer.next_message().await.kind, SyncMessageType::Subscribe);

        transport.refuse.store(2, Ordering::SeqCst);
        drop(peer);
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        sync.publish("inventory", json!({"sku": "A-1", "qty": 3})).unwrap();

        let mut peer = peers.recv().await.unwrap();
        let resubscribe = peer.next_message().await;
        assert_eq!(resubscribe.kind, SyncMessageType::Subscribe);
        assert_eq!(resubscribe.topic.as_deref(), Some("inventory"));

        let flushed = peer.next_message().await;
        assert_eq!(flushed.kind, SyncMessageType::Data);
        assert_eq!(flushed.data, Some(json!({"sku": "A-1", "qty": 3})));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);

        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        peer.push(data_frame("inventory", json!({"sku": "A-1", "qty": 2})));
        assert_eq!(updates.recv().await, Some(json!({"sku": "A-1", "qty": 2})));

        sync.disconnect().await.unwrap();
        assert!(peer.inbox.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_queue_size_drops_offline_frames() {
        let mut config = fast_config();
        config.max_queue_size = 0;
        let (transport, mut peers) = MockTransport::new();
        let sync = DataSync::connect(transport.clone(), config).await.unwrap();
        let mut states = sync.watch_state();

        let peer = peers.recv().await.unwrap();
        transport.refuse.store(1, Ordering::SeqCst);
        drop(peer);
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        sync.publish("audit", json!({"seq": 1})).unwrap();

        let mut peer = peers.recv().await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        sync.publish("audit", json!({"seq": 2})).unwrap();

        let next = peer.next_message().await;
        assert_eq!(next.data, Some(json!({"seq": 2})));

        sync.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let (transport, _peers) = MockTransport::new();
        transport.refuse.store(u32::MAX, Ordering::SeqCst);

        let err = DataSync::connect(transport.clone(), fast_config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_disconnect_closes_subscriptions() {
        let (transport, mut peers) = MockTransport::new();
        let sync = DataSync::connect(transport, fast_config()).await.unwrap();
        let _peer = peers.recv().await.unwrap();

        let mut updates = sync.subscribe("metrics", None).await.unwrap();
        let mut states = sync.watch_state();
        sync.disconnect().await.unwrap();

        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(updates.recv().await, None);
    }
}
