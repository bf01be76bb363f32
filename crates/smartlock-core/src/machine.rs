//! # Tag Synchronization State Machine
//!
//! Owns the authoritative tag set and one slot per operation kind. Every
//! transition returns the [`Effect`]s the caller must carry out; the machine
//! itself never publishes, sleeps or logs.
//!
//! ## Slot Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Add / Delete Slot States                            │
//! │                                                                         │
//! │            begin_*                                                      │
//! │   ┌──────┐ ─────────► ┌─────────┐  success ──► Idle + Publish(fetch)   │
//! │   │ Idle │            │ Pending │  failure ──► Idle + Notify(failed)   │
//! │   └──────┘ ◄───────── └────┬────┘                                       │
//! │      ▲                     │ timeout (same op id)                       │
//! │      │                     ▼                                            │
//! │      │               ┌──────────┐  Notify(timed out) already sent       │
//! │      │               │  Lapsed  │                                       │
//! │      │               └────┬─────┘                                       │
//! │      │  late success ─────┤──► Idle + Publish(fetch), no notice         │
//! │      └──late failure ─────┘──► Idle, no notice                          │
//! │                                                                         │
//! │  Lapsed accepts begin_* exactly like Idle.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution Rules
//! - A slot is resolved by exactly one of success, failure or timeout.
//! - Resolving an already-resolved slot is a no-op: a reply while `Idle`
//!   changes nothing and publishes nothing.
//! - The slot is cleared before effects are returned, so an effect can
//!   never re-enter a half-updated machine.
//! - Success never touches the tag set. It asks the device for a fresh
//!   snapshot instead; only [`InboundEvent::Snapshot`] replaces the set.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ts_rs::TS;

use crate::error::Rejection;
use crate::protocol::{Command, InboundEvent};
use crate::types::{OperationId, TagId, TagSet};
use crate::{DEFAULT_ADD_TIMEOUT_SECS, DEFAULT_DELETE_TIMEOUT_SECS};

// =============================================================================
// Slots
// =============================================================================

/// Which single-operation slot an effect or timeout refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Add,
    Delete,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::Add => write!(f, "add"),
            SlotKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single-operation-at-a-time state holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<P> {
    /// Nothing in flight.
    Idle,

    /// A command was published and awaits the device's answer.
    Pending(P),

    /// The operation timed out and the operator was told. A late answer
    /// from the device is still recognised, but only to refresh the list.
    Lapsed(P),
}

impl<P> Slot<P> {
    /// Returns true if the slot accepts a new operation.
    pub fn is_idle(&self) -> bool {
        !self.is_pending()
    }

    /// Returns true if an operation awaits the device.
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending(_))
    }

    /// The in-flight operation, if any.
    pub fn pending(&self) -> Option<&P> {
        match self {
            Slot::Pending(p) => Some(p),
            _ => None,
        }
    }
}

impl<P> Default for Slot<P> {
    fn default() -> Self {
        Slot::Idle
    }
}

/// An add waiting for a card to be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAdd {
    pub op: OperationId,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A delete waiting for the device to confirm removal of `tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub op: OperationId,
    pub tag: TagId,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

// =============================================================================
// Timeouts
// =============================================================================

/// How long each kind of operation may stay pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub add: Duration,
    pub delete: Duration,
}

impl OperationTimeouts {
    /// Timeout for the given slot.
    pub fn for_slot(&self, slot: SlotKind) -> Duration {
        match slot {
            SlotKind::Add => self.add,
            SlotKind::Delete => self.delete,
        }
    }
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        OperationTimeouts {
            add: Duration::from_secs(DEFAULT_ADD_TIMEOUT_SECS),
            delete: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
        }
    }
}

fn deadline_after(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// Notices & Effects
// =============================================================================

/// A user-visible failure notice.
///
/// Timeouts and explicit device failures lead to the same transition; the
/// notice keeps them apart for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    AddFailed,
    AddTimedOut,
    DeleteFailed { tag: TagId },
    DeleteTimedOut { tag: TagId },
}

impl Notice {
    /// Text shown to the operator.
    pub fn message(&self) -> String {
        match self {
            Notice::AddFailed => "Add failed on device.".to_string(),
            Notice::AddTimedOut => {
                "Add timed out: device may not have received a tag.".to_string()
            }
            Notice::DeleteFailed { tag } => format!("Delete of tag {} failed on device.", tag),
            Notice::DeleteTimedOut { tag } => {
                format!("Delete of tag {} timed out: device did not answer.", tag)
            }
        }
    }

    /// The slot this notice resolved.
    pub fn slot(&self) -> SlotKind {
        match self {
            Notice::AddFailed | Notice::AddTimedOut => SlotKind::Add,
            Notice::DeleteFailed { .. } | Notice::DeleteTimedOut { .. } => SlotKind::Delete,
        }
    }

    /// Returns true if the device stayed silent rather than reporting failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Notice::AddTimedOut | Notice::DeleteTimedOut { .. })
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Publish a command on the cmd channel.
    Publish(Command),

    /// Show a failure notice to the operator.
    Notify(Notice),

    /// Call [`SyncMachine::expire`] with `slot` and `op` once `after` elapses.
    ScheduleTimeout {
        slot: SlotKind,
        op: OperationId,
        after: Duration,
    },
}

// =============================================================================
// View
// =============================================================================

/// Serializable snapshot of the machine for the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MachineView {
    /// Tags as last reported by the device.
    pub tags: TagSet,

    /// Whether an add is waiting for a card.
    pub adding: bool,

    /// When the pending add gives up.
    #[ts(as = "Option<String>")]
    pub add_deadline: Option<DateTime<Utc>>,

    /// Tag currently being deleted.
    pub deleting: Option<TagId>,

    /// When the pending delete gives up.
    #[ts(as = "Option<String>")]
    pub delete_deadline: Option<DateTime<Utc>>,
}

// =============================================================================
// Machine
// =============================================================================

/// The tag synchronization state machine.
///
/// Driven by a single serialized stream of inputs (operator intents via
/// [`crate::issue`], decoded device events, timeout firings), so it needs
/// no internal locking.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    tags: TagSet,
    add: Slot<PendingAdd>,
    delete: Slot<PendingDelete>,
    timeouts: OperationTimeouts,
    next_op: u64,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new(OperationTimeouts::default())
    }
}

impl SyncMachine {
    /// Creates a machine with an empty tag set and both slots idle.
    pub fn new(timeouts: OperationTimeouts) -> Self {
        SyncMachine {
            tags: TagSet::new(),
            add: Slot::Idle,
            delete: Slot::Idle,
            timeouts,
            next_op: 1,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The authoritative tag set.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// The add slot.
    pub fn add_slot(&self) -> &Slot<PendingAdd> {
        &self.add
    }

    /// The delete slot.
    pub fn delete_slot(&self) -> &Slot<PendingDelete> {
        &self.delete
    }

    /// Configured timeouts.
    pub fn timeouts(&self) -> OperationTimeouts {
        self.timeouts
    }

    /// UI snapshot.
    pub fn view(&self) -> MachineView {
        MachineView {
            tags: self.tags.clone(),
            adding: self.add.is_pending(),
            add_deadline: self.add.pending().map(|p| p.deadline),
            deleting: self.delete.pending().map(|p| p.tag.clone()),
            delete_deadline: self.delete.pending().map(|p| p.deadline),
        }
    }

    // =========================================================================
    // Opening Slots
    // =========================================================================

    /// Opens the add slot and asks the device to enter add mode.
    ///
    /// Only checks the slot; connectivity is the issuer's concern.
    pub fn begin_add(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>, Rejection> {
        if self.add.is_pending() {
            return Err(Rejection::AddInProgress);
        }

        let op = self.next_operation();
        let after = self.timeouts.add;
        self.add = Slot::Pending(PendingAdd {
            op,
            started_at: now,
            deadline: deadline_after(now, after),
        });

        Ok(vec![
            Effect::Publish(Command::AddTag),
            Effect::ScheduleTimeout {
                slot: SlotKind::Add,
                op,
                after,
            },
        ])
    }

    /// Opens the delete slot for `tag` and asks the device to remove it.
    pub fn begin_delete(
        &mut self,
        tag: TagId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, Rejection> {
        if let Some(pending) = self.delete.pending() {
            return Err(Rejection::DeleteInProgress {
                tag: pending.tag.clone(),
            });
        }

        let op = self.next_operation();
        let after = self.timeouts.delete;
        self.delete = Slot::Pending(PendingDelete {
            op,
            tag: tag.clone(),
            started_at: now,
            deadline: deadline_after(now, after),
        });

        Ok(vec![
            Effect::Publish(Command::DeleteTag(tag)),
            Effect::ScheduleTimeout {
                slot: SlotKind::Delete,
                op,
                after,
            },
        ])
    }

    // =========================================================================
    // Resolving Slots
    // =========================================================================

    /// Applies a decoded device event.
    pub fn apply(&mut self, event: InboundEvent) -> Vec<Effect> {
        match event {
            InboundEvent::Snapshot(tags) => {
                self.tags = tags;
                Vec::new()
            }
            InboundEvent::AddSucceeded(_) => self.resolve_add(true),
            InboundEvent::AddFailed => self.resolve_add(false),
            InboundEvent::DeleteSucceeded(tag) => self.resolve_delete_success(&tag),
            InboundEvent::DeleteFailed => self.resolve_delete_failure(),
            InboundEvent::AddModeAcknowledged | InboundEvent::Unknown(_) => Vec::new(),
        }
    }

    /// Fires the timeout scheduled for operation `op` on `slot`.
    ///
    /// A no-op unless that exact operation is still pending.
    pub fn expire(&mut self, slot: SlotKind, op: OperationId) -> Vec<Effect> {
        match slot {
            SlotKind::Add => match std::mem::take(&mut self.add) {
                Slot::Pending(p) if p.op == op => {
                    self.add = Slot::Lapsed(p);
                    vec![Effect::Notify(Notice::AddTimedOut)]
                }
                other => {
                    self.add = other;
                    Vec::new()
                }
            },
            SlotKind::Delete => match std::mem::take(&mut self.delete) {
                Slot::Pending(p) if p.op == op => {
                    let notice = Notice::DeleteTimedOut { tag: p.tag.clone() };
                    self.delete = Slot::Lapsed(p);
                    vec![Effect::Notify(notice)]
                }
                other => {
                    self.delete = other;
                    Vec::new()
                }
            },
        }
    }

    fn resolve_add(&mut self, succeeded: bool) -> Vec<Effect> {
        match std::mem::take(&mut self.add) {
            Slot::Idle => Vec::new(),
            Slot::Pending(_) if succeeded => vec![Effect::Publish(Command::FetchTags)],
            Slot::Pending(_) => vec![Effect::Notify(Notice::AddFailed)],
            Slot::Lapsed(_) if succeeded => vec![Effect::Publish(Command::FetchTags)],
            Slot::Lapsed(_) => Vec::new(),
        }
    }

    fn resolve_delete_success(&mut self, tag: &TagId) -> Vec<Effect> {
        match std::mem::take(&mut self.delete) {
            Slot::Pending(p) | Slot::Lapsed(p) if &p.tag == tag => {
                vec![Effect::Publish(Command::FetchTags)]
            }
            other => {
                // Not the deletion we are waiting for.
                self.delete = other;
                Vec::new()
            }
        }
    }

    fn resolve_delete_failure(&mut self) -> Vec<Effect> {
        match std::mem::take(&mut self.delete) {
            Slot::Pending(p) => vec![Effect::Notify(Notice::DeleteFailed { tag: p.tag })],
            Slot::Idle | Slot::Lapsed(_) => Vec::new(),
        }
    }

    fn next_operation(&mut self) -> OperationId {
        let op = OperationId(self.next_op);
        self.next_op += 1;
        op
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_event;

    fn tag(id: &str) -> TagId {
        TagId::parse(id).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn snapshot(ids: &[&str]) -> InboundEvent {
        InboundEvent::Snapshot(TagSet::from_snapshot(ids.iter().map(|id| tag(id))))
    }

    fn scheduled_op(effects: &[Effect]) -> OperationId {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::ScheduleTimeout { op, .. } => Some(*op),
                _ => None,
            })
            .expect("no timeout scheduled")
    }

    #[test]
    fn test_begin_add_publishes_and_schedules() {
        let mut machine = SyncMachine::default();
        let effects = machine.begin_add(now()).unwrap();

        assert_eq!(effects[0], Effect::Publish(Command::AddTag));
        assert!(matches!(
            effects[1],
            Effect::ScheduleTimeout {
                slot: SlotKind::Add,
                after,
                ..
            } if after == Duration::from_secs(25)
        ));

        let pending = machine.add_slot().pending().unwrap();
        assert_eq!(pending.started_at, now());
        assert_eq!(pending.deadline, now() + chrono::Duration::seconds(25));
    }

    #[test]
    fn test_second_add_rejected_without_effects() {
        let mut machine = SyncMachine::default();
        machine.begin_add(now()).unwrap();

        for _ in 0..3 {
            assert_eq!(machine.begin_add(now()), Err(Rejection::AddInProgress));
        }
        assert!(machine.add_slot().is_pending());
    }

    #[test]
    fn test_add_success_refetches_instead_of_patching() {
        let mut machine = SyncMachine::default();
        machine.apply(snapshot(&["T1", "T2"]));
        machine.begin_add(now()).unwrap();

        let effects = machine.apply(decode_event("tagAdded:T3"));

        assert_eq!(effects, vec![Effect::Publish(Command::FetchTags)]);
        assert!(machine.add_slot().is_idle());
        // The new tag only appears once the device reports it
        assert!(!machine.tags().contains(&tag("T3")));
    }

    #[test]
    fn test_add_success_with_spaced_uid_resolves_before_timeout() {
        let mut machine = SyncMachine::default();
        let op = scheduled_op(&machine.begin_add(now()).unwrap());

        assert_eq!(
            machine.apply(decode_event("tagAdded:04 A1 B2 C3")),
            vec![Effect::Publish(Command::FetchTags)]
        );
        assert!(machine.expire(SlotKind::Add, op).is_empty());
    }

    #[test]
    fn test_add_success_while_idle_is_ignored() {
        let mut machine = SyncMachine::default();
        machine.apply(snapshot(&["T1"]));
        let before = machine.view();

        let effects = machine.apply(InboundEvent::AddSucceeded(tag("T9")));

        assert!(effects.is_empty());
        assert_eq!(machine.view(), before);
        assert_eq!(*machine.add_slot(), Slot::Idle);
    }

    #[test]
    fn test_add_failure_notifies_once() {
        let mut machine = SyncMachine::default();
        machine.begin_add(now()).unwrap();

        assert_eq!(
            machine.apply(InboundEvent::AddFailed),
            vec![Effect::Notify(Notice::AddFailed)]
        );
        assert!(machine.apply(InboundEvent::AddFailed).is_empty());
    }

    #[test]
    fn test_add_timeout_then_late_success() {
        let mut machine = SyncMachine::default();
        let op = scheduled_op(&machine.begin_add(now()).unwrap());

        assert_eq!(
            machine.expire(SlotKind::Add, op),
            vec![Effect::Notify(Notice::AddTimedOut)]
        );
        assert!(machine.add_slot().is_idle());
        assert!(!machine.view().adding);

        // Late success: refresh only, no notice, slot not re-opened
        assert_eq!(
            machine.apply(InboundEvent::AddSucceeded(tag("T3"))),
            vec![Effect::Publish(Command::FetchTags)]
        );
        assert_eq!(*machine.add_slot(), Slot::Idle);

        // A second duplicate finds a genuinely idle slot
        assert!(machine
            .apply(InboundEvent::AddSucceeded(tag("T3")))
            .is_empty());
    }

    #[test]
    fn test_add_timeout_then_late_failure_is_silent() {
        let mut machine = SyncMachine::default();
        let op = scheduled_op(&machine.begin_add(now()).unwrap());
        machine.expire(SlotKind::Add, op);

        assert!(machine.apply(InboundEvent::AddFailed).is_empty());
        assert_eq!(*machine.add_slot(), Slot::Idle);
    }

    #[test]
    fn test_timeout_after_resolution_is_noop() {
        let mut machine = SyncMachine::default();
        let op = scheduled_op(&machine.begin_add(now()).unwrap());
        machine.apply(InboundEvent::AddSucceeded(tag("T3")));

        assert!(machine.expire(SlotKind::Add, op).is_empty());
        assert_eq!(*machine.add_slot(), Slot::Idle);
    }

    #[test]
    fn test_stale_timer_does_not_clear_newer_operation() {
        let mut machine = SyncMachine::default();
        let first = scheduled_op(&machine.begin_add(now()).unwrap());
        machine.apply(InboundEvent::AddFailed);

        let second = scheduled_op(&machine.begin_add(now()).unwrap());
        assert_ne!(first, second);

        assert!(machine.expire(SlotKind::Add, first).is_empty());
        assert!(machine.add_slot().is_pending());
        assert_eq!(
            machine.expire(SlotKind::Add, second),
            vec![Effect::Notify(Notice::AddTimedOut)]
        );
    }

    #[test]
    fn test_add_allowed_again_after_lapse() {
        let mut machine = SyncMachine::default();
        let op = scheduled_op(&machine.begin_add(now()).unwrap());
        machine.expire(SlotKind::Add, op);

        assert!(machine.begin_add(now()).is_ok());
        assert!(machine.add_slot().is_pending());
    }

    #[test]
    fn test_snapshot_replaces_set() {
        let mut machine = SyncMachine::default();
        machine.apply(snapshot(&["A", "B"]));
        machine.apply(snapshot(&["B"]));

        assert_eq!(machine.tags().as_slice(), &[tag("B")]);
    }

    #[test]
    fn test_delete_in_progress_rejects_other_tag() {
        let mut machine = SyncMachine::default();
        machine.begin_delete(tag("T1"), now()).unwrap();

        assert_eq!(
            machine.begin_delete(tag("T2"), now()),
            Err(Rejection::DeleteInProgress { tag: tag("T1") })
        );
        assert_eq!(machine.view().deleting, Some(tag("T1")));
    }

    #[test]
    fn test_delete_success_requires_matching_tag() {
        let mut machine = SyncMachine::default();
        let effects = machine.begin_delete(tag("T2"), now()).unwrap();
        assert_eq!(effects[0], Effect::Publish(Command::DeleteTag(tag("T2"))));

        assert!(machine
            .apply(InboundEvent::DeleteSucceeded(tag("T1")))
            .is_empty());
        assert!(machine.delete_slot().is_pending());

        assert_eq!(
            machine.apply(InboundEvent::DeleteSucceeded(tag("T2"))),
            vec![Effect::Publish(Command::FetchTags)]
        );
        assert_eq!(*machine.delete_slot(), Slot::Idle);
    }

    #[test]
    fn test_delete_failure_and_timeout() {
        let mut machine = SyncMachine::default();
        machine.begin_delete(tag("T2"), now()).unwrap();
        assert_eq!(
            machine.apply(InboundEvent::DeleteFailed),
            vec![Effect::Notify(Notice::DeleteFailed { tag: tag("T2") })]
        );

        let op = scheduled_op(&machine.begin_delete(tag("T2"), now()).unwrap());
        assert_eq!(
            machine.expire(SlotKind::Delete, op),
            vec![Effect::Notify(Notice::DeleteTimedOut { tag: tag("T2") })]
        );
        assert_eq!(
            machine.apply(InboundEvent::DeleteSucceeded(tag("T2"))),
            vec![Effect::Publish(Command::FetchTags)]
        );
        assert_eq!(*machine.delete_slot(), Slot::Idle);
    }

    #[test]
    fn test_add_and_delete_slots_are_independent() {
        let mut machine = SyncMachine::default();
        machine.begin_add(now()).unwrap();
        machine.begin_delete(tag("T1"), now()).unwrap();

        machine.apply(InboundEvent::DeleteFailed);
        assert!(machine.add_slot().is_pending());
        assert!(machine.delete_slot().is_idle());
    }

    #[test]
    fn test_informational_events_change_nothing() {
        let mut machine = SyncMachine::default();
        machine.begin_add(now()).unwrap();
        let before = machine.view();

        assert!(machine.apply(InboundEvent::AddModeAcknowledged).is_empty());
        assert!(machine
            .apply(InboundEvent::Unknown("noise".into()))
            .is_empty());
        assert_eq!(machine.view(), before);
    }

    #[test]
    fn test_notice_messages() {
        assert!(Notice::AddTimedOut.is_timeout());
        assert!(!Notice::AddFailed.is_timeout());
        assert_eq!(Notice::DeleteFailed { tag: tag("T2") }.slot(), SlotKind::Delete);
        assert_eq!(
            Notice::DeleteFailed { tag: tag("T2") }.message(),
            "Delete of tag T2 failed on device."
        );
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let mut machine = SyncMachine::default();
        machine.begin_delete(tag("T2"), now()).unwrap();
        let json = serde_json::to_string(&machine.view()).unwrap();
        assert!(json.contains("\"deleting\":\"T2\""));
        assert!(json.contains("\"addDeadline\":null"));
    }
}
