//! # Tag Sync Agent
//!
//! Serialized actor that owns the [`SyncMachine`] and executes its effects
//! against the MQTT transport.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TagSyncAgent Architecture                         │
//! │                                                                         │
//! │   AgentHandle ──requests──┐                                             │
//! │                           │                                             │
//! │   Transport ───events─────┼──► ┌──────────────────────────────────┐    │
//! │                           │    │  select! { biased;               │    │
//! │   sleep tasks ─timeouts───┘    │    1. shutdown                   │    │
//! │        ▲                       │    2. transport events           │    │
//! │        │                       │    3. operator requests          │    │
//! │        │                       │    4. timeout firings  }         │    │
//! │        │                       │                                  │    │
//! │        │                       │  SyncMachine ──► Vec<Effect>     │    │
//! │        │                       └───────────────┬──────────────────┘    │
//! │        │                                       │                        │
//! │        │        ┌──────────────────────────────┼────────────────┐      │
//! │        │        ▼                              ▼                ▼      │
//! │   ScheduleTimeout               Publish ──► cmd topic   Notify ──► UI  │
//! │                                                                         │
//! │  After every input: TagSyncStatus ──► Arc<RwLock<_>> + emit_status     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device events are polled before timeouts, so a reply and a timeout that
//! become ready together resolve as a reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use smartlock_core::{
    decode, issue, Channel, Confirmation, Effect, InboundEvent, Intent, MachineView, Notice,
    OperationId, SlotKind, SyncMachine, TagId,
};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{TagSyncConfig, TopicsConfig};
use crate::error::{SyncError, SyncResult};
use crate::transport::{ConnectionState, Transport, TransportConfig, TransportEvent, TransportHandle};

/// Capacity of the operator request queue.
const REQUEST_CAPACITY: usize = 32;

// =============================================================================
// Tag Sync Status
// =============================================================================

/// Current agent status for external queries.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSyncStatus {
    /// Current transport state.
    pub connection_state: ConnectionState,

    /// Whether the agent considers the broker link up.
    pub is_connected: bool,

    /// Tag list and pending operations.
    pub view: MachineView,

    /// The most recent failure notice.
    pub last_notice: Option<Notice>,
}

impl Default for TagSyncStatus {
    fn default() -> Self {
        TagSyncStatus {
            connection_state: ConnectionState::Disconnected,
            is_connected: false,
            view: MachineView::default(),
            last_notice: None,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for pushing agent events to a UI.
pub trait TagEventEmitter: Send + Sync {
    /// Emits a status change event.
    fn emit_status(&self, status: &TagSyncStatus);

    /// Emits a failure notice for the operator.
    fn emit_notice(&self, notice: &Notice);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl TagEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &TagSyncStatus) {}
    fn emit_notice(&self, _notice: &Notice) {}
}

// =============================================================================
// Requests
// =============================================================================

enum AgentRequest {
    Issue {
        intent: Intent,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Query {
        reply: oneshot::Sender<TagSyncStatus>,
    },
}

// =============================================================================
// Tag Sync Agent
// =============================================================================

/// The actor. Every input is handled to completion before the next one.
pub struct TagSyncAgent {
    machine: SyncMachine,
    connected: bool,
    topics: TopicsConfig,
    transport: TransportHandle,
    status: Arc<RwLock<TagSyncStatus>>,
    emitter: Arc<dyn TagEventEmitter>,
    timeout_tx: mpsc::UnboundedSender<(SlotKind, OperationId)>,
    last_notice: Option<Notice>,
}

impl TagSyncAgent {
    /// Connects to the broker and starts the agent.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: TagSyncConfig, emitter: Arc<dyn TagEventEmitter>) -> SyncResult<AgentHandle> {
        config.validate()?;

        info!(
            client_id = %config.client_id(),
            broker = %config.broker.url,
            cmd_topic = %config.topics.cmd,
            "Starting tag sync agent"
        );

        let (transport, events_rx) = Transport::spawn(TransportConfig::from_config(&config))?;
        Ok(Self::spawn(&config, transport, events_rx, emitter))
    }

    /// Spawns the actor loop on an existing transport.
    pub(crate) fn spawn(
        config: &TagSyncConfig,
        transport: TransportHandle,
        events_rx: mpsc::Receiver<TransportEvent>,
        emitter: Arc<dyn TagEventEmitter>,
    ) -> AgentHandle {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(TagSyncStatus::default()));

        let agent = TagSyncAgent {
            machine: SyncMachine::new(config.timeouts()),
            connected: false,
            topics: config.topics.clone(),
            transport,
            status: status.clone(),
            emitter,
            timeout_tx,
            last_notice: None,
        };

        tokio::spawn(agent.run(events_rx, requests_rx, timeout_rx, shutdown_rx));

        AgentHandle {
            requests_tx,
            shutdown_tx,
            status,
        }
    }

    /// Main actor loop.
    async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<TransportEvent>,
        mut requests_rx: mpsc::Receiver<AgentRequest>,
        mut timeout_rx: mpsc::UnboundedReceiver<(SlotKind, OperationId)>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut transport_open = true;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Tag sync agent received shutdown");
                    break;
                }

                event = events_rx.recv(), if transport_open => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        error!("Transport stopped, no further reconnects");
                        transport_open = false;
                        self.connected = false;
                    }
                },

                Some(request) = requests_rx.recv() => match request {
                    AgentRequest::Issue { intent, reply } => {
                        let result = self.on_intent(intent).await;
                        let _ = reply.send(result);
                    }
                    AgentRequest::Query { reply } => {
                        self.publish_status().await;
                        let _ = reply.send(self.status.read().await.clone());
                        continue;
                    }
                },

                Some((slot, op)) = timeout_rx.recv() => {
                    let effects = self.machine.expire(slot, op);
                    if effects.is_empty() {
                        debug!(%slot, %op, "Stale timeout ignored");
                    }
                    self.execute(effects).await;
                }
            }

            self.publish_status().await;
        }

        if let Err(e) = self.transport.shutdown().await {
            warn!(error = %e, "Transport shutdown failed");
        }
        self.connected = false;
        self.publish_status().await;
        info!("Tag sync agent stopped");
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("Broker link up");
                self.connected = true;
            }
            TransportEvent::Disconnected => {
                // Pending operations keep waiting for a reply or their timeout
                warn!("Broker link down");
                self.connected = false;
            }
            TransportEvent::Message { topic, payload } => {
                let channel = if topic == self.topics.events {
                    Channel::Events
                } else if topic == self.topics.tags {
                    Channel::Tags
                } else {
                    debug!(%topic, "Message on unrelated topic ignored");
                    return;
                };

                match decode(channel, &payload) {
                    Ok(InboundEvent::Unknown(text)) => {
                        warn!(%text, "Unknown device event ignored");
                    }
                    Ok(event) => {
                        debug!(%channel, event = event.name(), "Device event");
                        let effects = self.machine.apply(event);
                        self.execute(effects).await;
                    }
                    Err(e) => {
                        let e = SyncError::from(e);
                        warn!(%channel, error = %e, "Dropping malformed payload");
                    }
                }
            }
        }
    }

    async fn on_intent(&mut self, intent: Intent) -> SyncResult<()> {
        debug!(?intent, connected = self.connected, "Operator intent");

        match issue(&mut self.machine, intent, self.connected, Utc::now()) {
            Ok(effects) => {
                self.execute(effects).await;
                Ok(())
            }
            Err(rejection) => {
                info!(%rejection, "Intent rejected");
                Err(SyncError::Rejected(rejection))
            }
        }
    }

    // =========================================================================
    // Effects
    // =========================================================================

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(command) => {
                    let payload = command.to_payload();
                    if let Err(e) = self.transport.publish(&self.topics.cmd, &payload).await {
                        warn!(%command, error = %e, "Command not published");
                    }
                }
                Effect::Notify(notice) => {
                    info!(%notice, timeout = notice.is_timeout(), "Operation failed");
                    self.emitter.emit_notice(&notice);
                    self.last_notice = Some(notice);
                }
                Effect::ScheduleTimeout { slot, op, after } => {
                    self.schedule_timeout(slot, op, after);
                }
            }
        }
    }

    /// Posts `(slot, op)` back into the agent's own queue after `after`.
    fn schedule_timeout(&self, slot: SlotKind, op: OperationId, after: Duration) {
        debug!(%slot, %op, ?after, "Timeout scheduled");
        let timeout_tx = self.timeout_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = timeout_tx.send((slot, op));
        });
    }

    async fn publish_status(&self) {
        let status = TagSyncStatus {
            connection_state: self.transport.state().await,
            is_connected: self.connected,
            view: self.machine.view(),
            last_notice: self.last_notice.clone(),
        };

        let mut current = self.status.write().await;
        if *current != status {
            *current = status;
            self.emitter.emit_status(&current);
        }
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running [`TagSyncAgent`].
///
/// Operations resolve once the intent has been guarded and, if accepted,
/// published. The outcome on the device arrives later as a status change or
/// a [`Notice`].
#[derive(Clone)]
pub struct AgentHandle {
    requests_tx: mpsc::Sender<AgentRequest>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<TagSyncStatus>>,
}

impl AgentHandle {
    /// Momentarily releases the lock.
    pub async fn open_door(&self) -> SyncResult<()> {
        self.issue(Intent::OpenDoor).await
    }

    /// Puts the device in add mode.
    pub async fn add_tag(&self) -> SyncResult<()> {
        self.issue(Intent::StartAdd).await
    }

    /// Deletes `tag` if the operator confirmed.
    pub async fn delete_tag(&self, tag: TagId, confirmation: Confirmation) -> SyncResult<()> {
        self.issue(Intent::StartDelete { tag, confirmation }).await
    }

    /// Asks the device for its current tag list.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.issue(Intent::Refresh).await
    }

    /// Gets the last published status.
    pub async fn status(&self) -> TagSyncStatus {
        self.status.read().await.clone()
    }

    /// Gets the status from the agent itself, after every input queued
    /// before this call has been handled.
    pub async fn query(&self) -> SyncResult<TagSyncStatus> {
        let (reply, rx) = oneshot::channel();
        self.requests_tx
            .send(AgentRequest::Query { reply })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Signals the agent to shut down gracefully.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    async fn issue(&self, intent: Intent) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.requests_tx
            .send(AgentRequest::Issue { intent, reply })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for starting a TagSyncAgent with options.
pub struct TagSyncAgentBuilder {
    config: TagSyncConfig,
    emitter: Option<Arc<dyn TagEventEmitter>>,
}

impl TagSyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: TagSyncConfig) -> Self {
        TagSyncAgentBuilder {
            config,
            emitter: None,
        }
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn TagEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Starts the agent.
    pub fn start(self) -> SyncResult<AgentHandle> {
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        TagSyncAgent::start(self.config, emitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartlock_core::{Rejection, TagSet};

    const EVENTS: &str = "smartlock/esp32/events";
    const TAGS: &str = "smartlock/esp32/tags";
    const CMD: &str = "smartlock/esp32/cmd";

    struct RecordingEmitter {
        notices: mpsc::UnboundedSender<Notice>,
    }

    impl TagEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &TagSyncStatus) {}

        fn emit_notice(&self, notice: &Notice) {
            let _ = self.notices.send(notice.clone());
        }
    }

    struct Harness {
        agent: AgentHandle,
        transport: TransportHandle,
        events: mpsc::Sender<TransportEvent>,
        published: mpsc::UnboundedReceiver<(String, String)>,
        notices: mpsc::UnboundedReceiver<Notice>,
    }

    impl Harness {
        fn new() -> Self {
            let mut config = TagSyncConfig::default();
            config.client.id = "web-client-test01".into();

            let (transport, published) = TransportHandle::captured();
            let (events, events_rx) = mpsc::channel(16);
            let (notices_tx, notices) = mpsc::unbounded_channel();
            let emitter = Arc::new(RecordingEmitter {
                notices: notices_tx,
            });

            let agent = TagSyncAgent::spawn(&config, transport.clone(), events_rx, emitter);

            Harness {
                agent,
                transport,
                events,
                published,
                notices,
            }
        }

        async fn connected() -> Self {
            let harness = Self::new();
            harness.transport.set_state(ConnectionState::Connected).await;
            harness.events.send(TransportEvent::Connected).await.unwrap();
            harness
        }

        async fn device(&self, topic: &str, payload: &str) {
            self.events
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                })
                .await
                .unwrap();
        }

        async fn settle(&self) -> TagSyncStatus {
            self.agent.query().await.unwrap()
        }

        fn publishes(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok((topic, payload)) = self.published.try_recv() {
                assert_eq!(topic, CMD);
                out.push(payload);
            }
            out
        }
    }

    fn tag(id: &str) -> TagId {
        TagId::parse(id).unwrap()
    }

    fn tags(ids: &[&str]) -> TagSet {
        TagSet::from_snapshot(ids.iter().map(|id| tag(id)))
    }

    #[test]
    fn test_tag_sync_status_default() {
        let status = TagSyncStatus::default();
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert!(!status.is_connected);
        assert!(status.view.tags.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_tag_round_trip() {
        let mut h = Harness::connected().await;
        h.device(TAGS, r#"{"tags":["T1","T2"]}"#).await;

        h.agent.add_tag().await.unwrap();
        assert_eq!(h.publishes(), vec!["addTag"]);
        assert!(h.settle().await.view.adding);

        h.device(EVENTS, "tagAdded:T3").await;
        let status = h.settle().await;
        assert_eq!(h.publishes(), vec!["fetchTags"]);
        assert!(!status.view.adding);
        // Not patched locally
        assert_eq!(status.view.tags, tags(&["T1", "T2"]));

        h.device(TAGS, r#"{"tags":["T1","T2","T3"]}"#).await;
        assert_eq!(h.settle().await.view.tags, tags(&["T1", "T2", "T3"]));
        assert!(h.notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_intents_rejected() {
        let mut h = Harness::new();

        let err = h.agent.add_tag().await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotConnected));
        assert!(h.agent.open_door().await.is_err());
        assert!(h.publishes().is_empty());
        assert!(!h.settle().await.view.adding);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_add_rejected_while_pending() {
        let mut h = Harness::connected().await;
        h.agent.add_tag().await.unwrap();

        let err = h.agent.add_tag().await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::AddInProgress));
        assert_eq!(h.publishes(), vec!["addTag"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_times_out_after_configured_window() {
        let mut h = Harness::connected().await;
        h.agent.add_tag().await.unwrap();

        let early = tokio::time::timeout(Duration::from_secs(24), h.notices.recv()).await;
        assert!(early.is_err());

        assert_eq!(h.notices.recv().await, Some(Notice::AddTimedOut));
        let status = h.settle().await;
        assert!(!status.view.adding);
        assert_eq!(status.last_notice, Some(Notice::AddTimedOut));

        // Late reply: one refresh, no second notice
        h.publishes();
        h.device(EVENTS, "tagAdded:T3").await;
        h.settle().await;
        assert_eq!(h.publishes(), vec!["fetchTags"]);
        assert!(h.notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_failure_notifies_and_frees_slot() {
        let mut h = Harness::connected().await;
        h.agent.add_tag().await.unwrap();
        h.device(EVENTS, "tagAddFailed").await;
        h.settle().await;

        assert_eq!(h.notices.recv().await, Some(Notice::AddFailed));
        assert!(h.agent.add_tag().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_success_while_idle_is_ignored() {
        let mut h = Harness::connected().await;
        h.device(TAGS, r#"{"tags":["T1"]}"#).await;
        let before = h.settle().await;

        h.device(EVENTS, "tagAdded:T9").await;
        h.device(EVENTS, "tagDeleted:T1").await;
        let after = h.settle().await;

        assert_eq!(after, before);
        assert!(h.publishes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_round_trip() {
        let mut h = Harness::connected().await;
        h.device(TAGS, r#"{"tags":["T1","T2"]}"#).await;

        h.agent
            .delete_tag(tag("T2"), Confirmation::Approved)
            .await
            .unwrap();
        assert_eq!(h.publishes(), vec!["deleteTag:T2"]);
        assert_eq!(h.settle().await.view.deleting, Some(tag("T2")));

        h.device(EVENTS, "tagDeleted:T2").await;
        h.settle().await;
        assert_eq!(h.publishes(), vec!["fetchTags"]);

        h.device(TAGS, r#"{"tags":["T1"]}"#).await;
        let status = h.settle().await;
        assert_eq!(status.view.tags, tags(&["T1"]));
        assert_eq!(status.view.deleting, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_and_concurrent_deletes_rejected() {
        let mut h = Harness::connected().await;

        let err = h
            .agent
            .delete_tag(tag("T1"), Confirmation::Declined)
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::DeleteDeclined { tag: tag("T1") }));
        assert!(h.publishes().is_empty());

        h.agent
            .delete_tag(tag("T1"), Confirmation::Approved)
            .await
            .unwrap();
        let err = h
            .agent
            .delete_tag(tag("T2"), Confirmation::Approved)
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::DeleteInProgress { tag: tag("T1") }));
        assert_eq!(h.publishes(), vec!["deleteTag:T1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_notifies() {
        let mut h = Harness::connected().await;
        h.agent
            .delete_tag(tag("T1"), Confirmation::Approved)
            .await
            .unwrap();
        h.device(EVENTS, "tagDeleteFailed").await;
        h.settle().await;

        assert_eq!(
            h.notices.recv().await,
            Some(Notice::DeleteFailed { tag: tag("T1") })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_pending_operations() {
        let mut h = Harness::connected().await;
        h.agent.add_tag().await.unwrap();

        h.transport.set_state(ConnectionState::Backoff).await;
        h.events.send(TransportEvent::Disconnected).await.unwrap();
        let status = h.settle().await;
        assert!(!status.is_connected);
        assert!(status.view.adding);

        let err = h.agent.add_tag().await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotConnected));

        // The pending add still resolves by its own timeout
        assert_eq!(h.notices.recv().await, Some(Notice::AddTimedOut));
        assert_eq!(h.publishes(), vec!["addTag"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_foreign_payloads_ignored() {
        let mut h = Harness::connected().await;
        h.device(TAGS, r#"{"tags":["T1"]}"#).await;

        h.device(TAGS, "not json").await;
        h.device(TAGS, r#"{"tags":["T1",""]}"#).await;
        h.device(EVENTS, "rebooting").await;
        h.device("some/other/topic", r#"{"tags":[]}"#).await;

        assert_eq!(h.settle().await.view.tags, tags(&["T1"]));
        assert!(h.publishes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_door_and_refresh_publish() {
        let mut h = Harness::connected().await;
        h.agent.open_door().await.unwrap();
        h.agent.refresh().await.unwrap();
        assert_eq!(h.publishes(), vec!["OPEN", "fetchTags"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_agent() {
        let h = Harness::connected().await;
        h.agent.shutdown().await.unwrap();

        assert!(matches!(
            h.agent.add_tag().await,
            Err(SyncError::ShuttingDown)
        ));
        assert_eq!(h.transport.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_beats_timeout_ready_in_same_tick() {
        let config = TagSyncConfig::default();
        let (transport, mut published) = TransportHandle::captured();
        transport.set_state(ConnectionState::Connected).await;

        let (events, events_rx) = mpsc::channel(16);
        let (_requests_tx, requests_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let (notices_tx, mut notices) = mpsc::unbounded_channel();

        let mut machine = SyncMachine::new(config.timeouts());
        let op = machine
            .begin_add(Utc::now())
            .unwrap()
            .into_iter()
            .find_map(|effect| match effect {
                Effect::ScheduleTimeout { op, .. } => Some(op),
                _ => None,
            })
            .unwrap();

        let status = Arc::new(RwLock::new(TagSyncStatus::default()));
        let agent = TagSyncAgent {
            machine,
            connected: true,
            topics: config.topics.clone(),
            transport,
            status: status.clone(),
            emitter: Arc::new(RecordingEmitter {
                notices: notices_tx,
            }),
            timeout_tx: timeout_tx.clone(),
            last_notice: None,
        };

        // The add window has elapsed and the reply is queued: both ready at once
        timeout_tx.send((SlotKind::Add, op)).unwrap();
        events
            .send(TransportEvent::Message {
                topic: EVENTS.to_string(),
                payload: "tagAdded:T3".to_string(),
            })
            .await
            .unwrap();

        let task = tokio::spawn(agent.run(events_rx, requests_rx, timeout_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(()).await.unwrap();
        task.await.unwrap();

        assert!(notices.try_recv().is_err());
        assert_eq!(
            published.try_recv().unwrap(),
            (CMD.to_string(), "fetchTags".to_string())
        );
        assert!(published.try_recv().is_err());

        let status = status.read().await;
        assert!(!status.view.adding);
        assert_eq!(status.last_notice, None);
    }
}
