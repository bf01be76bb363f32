//! # smartlock-core: Pure Tag Reconciliation Logic
//!
//! This crate is the **heart** of the smartlock tag manager. It turns a
//! fire-and-forget publish/subscribe channel into a request/response
//! abstraction the UI can rely on, without performing any I/O itself.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Smartlock Tag Manager                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  Operator UI (console / web)                    │   │
//! │  │      Open Door ──► Add Tag ──► Delete Tag (confirm) ──► List    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Intent                                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ★ smartlock-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ protocol  │  │  machine  │  │  issuer   │  │   │
//! │  │   │  TagId    │  │ Command   │  │  Slot<P>  │  │  guards   │  │   │
//! │  │   │  TagSet   │  │ decoder   │  │  Effect   │  │ Rejection │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CLOCK • NO NETWORK • TRANSITIONS RETURN EFFECTS   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │ Effect                                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               smartlock-sync (agent + MQTT transport)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Tag identifiers and the authoritative tag set
//! - [`protocol`] - Outbound commands and the inbound event decoder
//! - [`machine`] - Add/delete slot state machine
//! - [`issuer`] - Guards that turn operator intents into effects
//! - [`error`] - Decode errors and user-facing rejections
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use smartlock_core::{decode, issue, Channel, Effect, Intent, SyncMachine};
//!
//! let mut machine = SyncMachine::default();
//!
//! // Operator presses "Add Tag" while the broker link is up
//! let effects = issue(&mut machine, Intent::StartAdd, true, Utc::now()).unwrap();
//! assert!(matches!(effects[0], Effect::Publish(_)));
//!
//! // Device reports the scanned card
//! let event = decode(Channel::Events, "tagAdded:04A1B2C3").unwrap();
//! let effects = machine.apply(event);
//!
//! // The tag list is re-fetched, never patched locally
//! assert_eq!(effects.len(), 1);
//! assert!(machine.add_slot().is_idle());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod issuer;
pub mod machine;
pub mod protocol;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, Rejection};
pub use issuer::{issue, Confirmation, Intent};
pub use machine::{
    Effect, MachineView, Notice, OperationTimeouts, PendingAdd, PendingDelete, Slot, SlotKind,
    SyncMachine,
};
pub use protocol::{decode, decode_event, decode_snapshot, Channel, Command, InboundEvent};
pub use types::{OperationId, TagId, TagSet};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default time the device gets to report the outcome of an add.
///
/// Covers the operator walking to the reader and presenting a card.
pub const DEFAULT_ADD_TIMEOUT_SECS: u64 = 25;

/// Default time the device gets to report the outcome of a delete.
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 25;
