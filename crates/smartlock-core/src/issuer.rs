//! # Command Issuer
//!
//! Turns operator intents into effects, refusing the ones that cannot be
//! carried out. A refused intent leaves the machine untouched and publishes
//! nothing.
//!
//! ## Guard Order
//! ```text
//! Intent ──► connected? ──► slot free? ──► confirmed? ──► machine.begin_*
//!               │ no           │ no           │ no
//!               ▼              ▼              ▼
//!          NotConnected   *InProgress    DeleteDeclined
//! ```
//!
//! Connectivity is checked first: while offline every intent gets the same
//! answer, whatever the slots look like.

use chrono::{DateTime, Utc};

use crate::error::Rejection;
use crate::machine::{Effect, SyncMachine};
use crate::protocol::Command;
use crate::types::TagId;

/// The operator's answer to "Delete tag {id}?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(approved: bool) -> Self {
        if approved {
            Confirmation::Approved
        } else {
            Confirmation::Declined
        }
    }
}

/// Something the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Momentarily release the lock.
    OpenDoor,

    /// Put the device in add mode and wait for a card.
    StartAdd,

    /// Remove `tag` from the device.
    StartDelete {
        tag: TagId,
        confirmation: Confirmation,
    },

    /// Ask the device for its current tag list.
    Refresh,
}

/// Applies the guards for `intent` and, if they pass, opens the slot.
///
/// `OpenDoor` and `Refresh` touch no slot and only need the link to be up.
pub fn issue(
    machine: &mut SyncMachine,
    intent: Intent,
    connected: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Effect>, Rejection> {
    if !connected {
        return Err(Rejection::NotConnected);
    }

    match intent {
        Intent::OpenDoor => Ok(vec![Effect::Publish(Command::OpenDoor)]),
        Intent::Refresh => Ok(vec![Effect::Publish(Command::FetchTags)]),
        Intent::StartAdd => machine.begin_add(now),
        Intent::StartDelete { tag, confirmation } => {
            if let Some(pending) = machine.delete_slot().pending() {
                return Err(Rejection::DeleteInProgress {
                    tag: pending.tag.clone(),
                });
            }
            if confirmation == Confirmation::Declined {
                return Err(Rejection::DeleteDeclined { tag });
            }
            machine.begin_delete(tag, now)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
