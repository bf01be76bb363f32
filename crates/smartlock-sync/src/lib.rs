//! # smartlock-sync: MQTT Tag Sync Engine
//!
//! This crate connects the pure [`smartlock_core`] state machine to a real
//! MQTT broker and serializes every input through a single actor.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Tag Sync Agent Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 TagSyncAgent (Serialized Actor)                  │  │
//! │  │                                                                  │  │
//! │  │  Owns SyncMachine, executes its effects                         │  │
//! │  │  Publishes TagSyncStatus after every input                      │  │
//! │  └────────────┬──────────────────────────────────┬──────────────────┘  │
//! │               │                                  │                      │
//! │               ▼                                  ▼                      │
//! │  ┌────────────────────────┐        ┌────────────────────────────────┐  │
//! │  │   Transport (rumqttc)  │        │   TagEventEmitter              │  │
//! │  │                        │        │                                │  │
//! │  │ mqtt/mqtts/ws/wss      │        │ emit_status  (UI refresh)      │  │
//! │  │ fixed-interval retry   │        │ emit_notice  (failure alerts)  │  │
//! │  │ subscribe + fetchTags  │        │                                │  │
//! │  │ on every ConnAck       │        │                                │  │
//! │  └────────────────────────┘        └────────────────────────────────┘  │
//! │                                                                         │
//! │  TOPICS (default prefix smartlock/esp32):                              │
//! │  • <prefix>/cmd    - commands to the lock                              │
//! │  • <prefix>/events - single-line outcomes from the lock                │
//! │  • <prefix>/tags   - JSON tag list snapshots                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `TagSyncAgent` actor, `AgentHandle`, emitter trait
//! - [`config`] - Broker, topic and timeout configuration
//! - [`error`] - Sync error types
//! - [`transport`] - MQTT client with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use smartlock_sync::{TagSyncAgentBuilder, TagSyncConfig};
//!
//! let config = TagSyncConfig::load(None)?;
//! let agent = TagSyncAgentBuilder::new(config).start()?;
//!
//! agent.add_tag().await?;
//!
//! let status = agent.status().await;
//! println!("Connected: {}", status.is_connected);
//! println!("Tags: {}", status.view.tags.len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentHandle, NoOpEmitter, TagEventEmitter, TagSyncAgent, TagSyncAgentBuilder, TagSyncStatus};
pub use config::TagSyncConfig;
pub use error::{SyncError, SyncResult};
pub use transport::{ConnectionState, TransportEvent};
