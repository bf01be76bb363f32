//! # MQTT Transport
//!
//! MQTT client with automatic reconnection at a fixed interval.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MQTT Connection States                             │
//! │                                                                         │
//! │  ┌────────────┐    spawn()      ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    ConnAck   │   error                         │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │              connection error      │  retry interval elapsed   │
//! │        │                    │               │                           │
//! │        │                    ▼               │                           │
//! │        │              ┌────────────┐        │                           │
//! │        └───────────── │Reconnecting│ ◄──────┘                          │
//! │       (shutdown or    └────────────┘                                    │
//! │        retries spent)                                                   │
//! │                                                                         │
//! │  ON EVERY CONNACK                                                      │
//! │  ────────────────                                                      │
//! │  1. subscribe <events>, <tags>                                         │
//! │  2. publish fetchTags on <cmd>                                         │
//! │  3. emit TransportEvent::Connected                                     │
//! │                                                                         │
//! │  RECONNECT STRATEGY: constant interval (default 3s)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport only reports link changes and raw messages. It never
//! touches pending add/delete operations; those resolve by device reply or
//! by their own timeout.

use backoff::backoff::{Backoff, Constant};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use smartlock_core::Command;

use crate::config::{TagSyncConfig, TopicsConfig};
use crate::error::{SyncError, SyncResult};

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 16;

/// Capacity of the transport → agent event queue.
const EVENT_CAPACITY: usize = 100;

/// Keep-alive floor accepted by the broker client.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

// =============================================================================
// Transport State
// =============================================================================

/// Connection state for the MQTT transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting the first connection.
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Waiting before reconnection attempt.
    Backoff,
    /// Reconnection in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// What the transport reports to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the session and subscriptions were requested.
    Connected,

    /// The link dropped. Reconnection is already scheduled.
    Disconnected,

    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: String },
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the MQTT transport.
#[derive(Clone)]
pub struct TransportConfig {
    /// Broker URL (`mqtt`, `mqtts`, `ws` or `wss`).
    pub url: String,

    /// MQTT client id.
    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// MQTT keep-alive interval.
    pub keep_alive: Duration,

    /// Fixed delay between reconnect attempts.
    pub retry_interval: Duration,

    /// Maximum consecutive reconnect attempts (0 = infinite).
    pub max_retries: u32,

    /// QoS for subscriptions and publishes.
    pub qos: QoS,

    pub topics: TopicsConfig,
}

impl TransportConfig {
    /// Derives transport settings from the agent configuration.
    pub fn from_config(config: &TagSyncConfig) -> Self {
        TransportConfig {
            url: config.broker.url.clone(),
            client_id: config.client.id.clone(),
            username: config.broker.username.clone(),
            password: config.broker.password.clone(),
            keep_alive: Duration::from_secs(config.broker.keep_alive_secs),
            retry_interval: config.retry_interval(),
            max_retries: config.broker.max_retries,
            qos: qos_from_level(config.broker.qos),
            topics: config.topics.clone(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_config(&TagSyncConfig::default())
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .field("retry_interval", &self.retry_interval)
            .field("max_retries", &self.max_retries)
            .field("qos", &self.qos)
            .field("topics", &self.topics)
            .finish()
    }
}

/// Maps a numeric QoS level onto rumqttc's enum. Levels above 2 fall back to 0.
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Builds rumqttc options from the broker URL.
///
/// `ws`/`wss` brokers take the whole URL as host, as rumqttc expects.
fn mqtt_options(config: &TransportConfig) -> SyncResult<MqttOptions> {
    let url = url::Url::parse(&config.url)?;
    let host = url
        .host_str()
        .ok_or_else(|| SyncError::InvalidUrl(format!("Broker URL has no host: {}", config.url)))?
        .to_string();

    let mut options = match url.scheme() {
        "mqtt" => MqttOptions::new(&config.client_id, host, url.port().unwrap_or(1883)),
        "mqtts" => {
            let mut options =
                MqttOptions::new(&config.client_id, host, url.port().unwrap_or(8883));
            options.set_transport(rumqttc::Transport::tls_with_default_config());
            options
        }
        "ws" => {
            let mut options =
                MqttOptions::new(&config.client_id, config.url.clone(), url.port().unwrap_or(80));
            options.set_transport(rumqttc::Transport::Ws);
            options
        }
        "wss" => {
            let mut options =
                MqttOptions::new(&config.client_id, config.url.clone(), url.port().unwrap_or(443));
            options.set_transport(rumqttc::Transport::wss_with_default_config());
            options
        }
        other => {
            return Err(SyncError::InvalidUrl(format!(
                "Unsupported broker scheme '{}'",
                other
            )))
        }
    };

    options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }

    Ok(options)
}

// =============================================================================
// Transport Handle
// =============================================================================

/// Where publishes go.
#[derive(Clone)]
enum Outlet {
    Mqtt(AsyncClient),

    /// Records publishes instead of sending them.
    #[cfg(test)]
    Captured(mpsc::UnboundedSender<(String, String)>),
}

/// Handle for interacting with the transport from other components.
#[derive(Clone)]
pub struct TransportHandle {
    outlet: Outlet,

    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,

    /// Shutdown signal.
    shutdown_tx: Arc<watch::Sender<bool>>,

    qos: QoS,
}

impl TransportHandle {
    /// Publishes `payload` on `topic`.
    ///
    /// Nothing is queued while the link is down: the call logs and returns
    /// [`SyncError::Disconnected`]. Never waits on the client request queue;
    /// a full queue is [`SyncError::PublishFailed`].
    pub async fn publish(&self, topic: &str, payload: &str) -> SyncResult<()> {
        if !self.is_connected().await {
            warn!(topic, payload, "Dropping publish while disconnected");
            return Err(SyncError::Disconnected);
        }

        match &self.outlet {
            Outlet::Mqtt(client) => {
                client.try_publish(topic, self.qos, false, payload.as_bytes().to_vec())?
            }
            #[cfg(test)]
            Outlet::Captured(tx) => tx
                .send((topic.to_string(), payload.to_string()))
                .map_err(|_| SyncError::ChannelError("Capture receiver dropped".into()))?,
        }

        debug!(topic, payload, "Published");
        Ok(())
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Triggers graceful shutdown: sends MQTT DISCONNECT and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx.send_replace(true);

        match &self.outlet {
            Outlet::Mqtt(client) => {
                if let Err(e) = client.try_disconnect() {
                    debug!(?e, "Disconnect request not queued");
                }
            }
            #[cfg(test)]
            Outlet::Captured(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
            }
        }

        Ok(())
    }

    /// A handle that records publishes on a channel, for agent tests.
    #[cfg(test)]
    pub(crate) fn captured() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let handle = TransportHandle {
            outlet: Outlet::Captured(tx),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            shutdown_tx: Arc::new(shutdown_tx),
            qos: QoS::AtMostOnce,
        };
        (handle, rx)
    }

    #[cfg(test)]
    pub(crate) async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }
}

// =============================================================================
// Session Setup
// =============================================================================

/// The client calls made when the broker accepts a session.
///
/// Both must be non-blocking: they run on the task that drives the event
/// loop, so waiting on the request queue would wait on ourselves.
trait SessionClient {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError>;
    fn publish(&self, topic: &str, qos: QoS, payload: String) -> Result<(), ClientError>;
}

impl SessionClient for AsyncClient {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        self.try_subscribe(topic, qos)
    }

    fn publish(&self, topic: &str, qos: QoS, payload: String) -> Result<(), ClientError> {
        self.try_publish(topic, qos, false, payload.into_bytes())
    }
}

/// Subscribes to the device channels and asks for the current tag list.
fn on_connected(client: &impl SessionClient, topics: &TopicsConfig, qos: QoS) {
    for topic in [&topics.events, &topics.tags] {
        if let Err(e) = client.subscribe(topic, qos) {
            error!(topic = %topic, error = %SyncError::from(e), "Failed to subscribe");
        }
    }

    match client.publish(&topics.cmd, qos, Command::FetchTags.to_payload()) {
        Ok(()) => debug!(topic = %topics.cmd, "Requested tag list"),
        Err(e) => error!(error = %SyncError::from(e), "Failed to request tag list"),
    }
}

async fn is_connected(state: &RwLock<ConnectionState>) -> bool {
    *state.read().await == ConnectionState::Connected
}

// =============================================================================
// MQTT Transport
// =============================================================================

/// MQTT transport with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let config = TransportConfig::from_config(&TagSyncConfig::load(None)?);
/// let (handle, mut events) = Transport::spawn(config)?;
///
/// while let Some(event) = events.recv().await {
///     if let TransportEvent::Message { topic, payload } = event {
///         println!("{topic}: {payload}");
///     }
/// }
/// ```
pub struct Transport {
    config: TransportConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    state: Arc<RwLock<ConnectionState>>,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Transport {
    /// Creates a new transport and spawns its background task.
    ///
    /// Returns a handle for publishing and a receiver for link events and
    /// inbound messages. Must be called within a tokio runtime.
    pub fn spawn(
        config: TransportConfig,
    ) -> SyncResult<(TransportHandle, mpsc::Receiver<TransportEvent>)> {
        let options = mqtt_options(&config)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let handle = TransportHandle {
            outlet: Outlet::Mqtt(client.clone()),
            state: state.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
            qos: config.qos,
        };

        let transport = Transport {
            config,
            client,
            eventloop,
            state,
            events_tx,
            shutdown_rx,
        };

        tokio::spawn(transport.run());

        Ok((handle, events_rx))
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(url = %self.config.url, client_id = %self.config.client_id, "Transport starting");

        let mut backoff = Constant::new(self.config.retry_interval);
        let mut retry_count = 0u32;

        *self.state.write().await = ConnectionState::Connecting;

        loop {
            if self.stopping() && !is_connected(&self.state).await {
                break;
            }

            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(session_present = ack.session_present, "Connected to broker");
                    backoff.reset();
                    retry_count = 0;
                    *self.state.write().await = ConnectionState::Connected;
                    on_connected(&self.client, &self.config.topics, self.config.qos);

                    if self.events_tx.send(TransportEvent::Connected).await.is_err() {
                        warn!("Transport event receiver dropped");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    debug!(topic = %publish.topic, %payload, "Received message");

                    let event = TransportEvent::Message {
                        topic: publish.topic,
                        payload,
                    };
                    if self.events_tx.send(event).await.is_err() {
                        warn!("Transport event receiver dropped");
                        break;
                    }
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    info!("Disconnect sent, closing connection");
                    *self.state.write().await = ConnectionState::Disconnected;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.stopping() {
                        break;
                    }

                    let e = SyncError::from(e);
                    error!(error = %e, retryable = e.is_retryable(), "Broker connection error");
                    let was_connected = is_connected(&self.state).await;
                    *self.state.write().await = ConnectionState::Backoff;

                    if was_connected
                        && self
                            .events_tx
                            .send(TransportEvent::Disconnected)
                            .await
                            .is_err()
                    {
                        warn!("Transport event receiver dropped");
                        break;
                    }

                    if self.config.max_retries > 0 {
                        retry_count += 1;
                        if retry_count >= self.config.max_retries {
                            error!(
                                max_retries = self.config.max_retries,
                                "Max reconnection attempts reached"
                            );
                            break;
                        }
                    }

                    let Some(duration) = backoff.next_backoff() else {
                        error!("Backoff exhausted");
                        break;
                    };
                    debug!(?duration, attempt = retry_count, "Waiting before reconnect");

                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {
                            *self.state.write().await = ConnectionState::Reconnecting;
                        }
                        _ = self.shutdown_rx.changed() => {
                            info!("Shutdown during backoff");
                            break;
                        }
                    }
                }
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Transport stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
