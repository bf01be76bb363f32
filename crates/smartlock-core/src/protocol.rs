//! # Device Wire Protocol
//!
//! Vocabulary spoken with the lock controller over the three MQTT channels.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Smartlock Wire Protocol                            │
//! │                                                                         │
//! │  CMD (web → device), plain text                                        │
//! │  ─────────────────────────────                                         │
//! │  fetchTags            request a full tag snapshot                      │
//! │  addTag               enter add mode, wait for a card                  │
//! │  deleteTag:<id>       remove one tag                                   │
//! │  OPEN                 pulse the door strike                            │
//! │                                                                         │
//! │  EVENTS (device → web), plain text                                     │
//! │  ─────────────────────────────────                                     │
//! │  tagAdded:<id>        AddSucceeded(id)                                 │
//! │  tagAddFailed         AddFailed                                        │
//! │  tagDeleted:<id>      DeleteSucceeded(id)                              │
//! │  tagDeleteFailed      DeleteFailed                                     │
//! │  AddModeStarted       AddModeAcknowledged (informational)              │
//! │  anything else        Unknown (logged, ignored)                        │
//! │                                                                         │
//! │  TAGS (device → web), JSON                                             │
//! │  ─────────────────────────                                             │
//! │  { "tags": ["04A1B2C3", ...] }   Snapshot(TagSet)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Decode Failures
//! A malformed snapshot yields an error and no event: the current tag set is
//! left as it was rather than cleared. Unrecognised event text is not an
//! error, it decodes to [`InboundEvent::Unknown`] so the caller can log it.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{TagId, TagSet};

// Wire literals
const FETCH_TAGS: &str = "fetchTags";
const ADD_TAG: &str = "addTag";
const DELETE_TAG_PREFIX: &str = "deleteTag:";
const OPEN_DOOR: &str = "OPEN";

const TAG_ADDED_PREFIX: &str = "tagAdded:";
const TAG_ADD_FAILED: &str = "tagAddFailed";
const TAG_DELETED_PREFIX: &str = "tagDeleted:";
const TAG_DELETE_FAILED: &str = "tagDeleteFailed";
const ADD_MODE_STARTED: &str = "AddModeStarted";

// =============================================================================
// Outbound Commands
// =============================================================================

/// A command published on the `cmd` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to publish its full tag list.
    FetchTags,

    /// Put the device into add mode; the next card scanned is enrolled.
    AddTag,

    /// Remove one tag from the device.
    DeleteTag(TagId),

    /// Open the door. Fire-and-forget: no acknowledgement is modeled.
    OpenDoor,
}

impl Command {
    /// Encodes the command as its plain-text wire payload.
    pub fn to_payload(&self) -> String {
        match self {
            Command::FetchTags => FETCH_TAGS.to_string(),
            Command::AddTag => ADD_TAG.to_string(),
            Command::DeleteTag(tag) => format!("{}{}", DELETE_TAG_PREFIX, tag),
            Command::OpenDoor => OPEN_DOOR.to_string(),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::FetchTags => "fetch_tags",
            Command::AddTag => "add_tag",
            Command::DeleteTag(_) => "delete_tag",
            Command::OpenDoor => "open_door",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_payload())
    }
}

impl std::str::FromStr for Command {
    type Err = CoreError;

    /// Parses a wire payload back into a command (device side of the link).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            FETCH_TAGS => Ok(Command::FetchTags),
            ADD_TAG => Ok(Command::AddTag),
            OPEN_DOOR => Ok(Command::OpenDoor),
            _ => match s.strip_prefix(DELETE_TAG_PREFIX) {
                Some(id) => Ok(Command::DeleteTag(TagId::parse(id)?)),
                None => Err(CoreError::UnknownCommand(s.to_string())),
            },
        }
    }
}

// =============================================================================
// Inbound Channels & Events
// =============================================================================

/// The inbound channel a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Plain-text operation events.
    Events,

    /// JSON tag snapshots.
    Tags,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Events => write!(f, "events"),
            Channel::Tags => write!(f, "tags"),
        }
    }
}

/// A decoded message from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Full authoritative tag list.
    Snapshot(TagSet),

    /// A card was enrolled.
    AddSucceeded(TagId),

    /// Add mode ended without enrolling a card.
    AddFailed,

    /// A tag was removed.
    DeleteSucceeded(TagId),

    /// The device could not remove the tag.
    DeleteFailed,

    /// The device entered add mode and waits for a card.
    AddModeAcknowledged,

    /// Text outside the vocabulary.
    Unknown(String),
}

impl InboundEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Snapshot(_) => "snapshot",
            InboundEvent::AddSucceeded(_) => "add_succeeded",
            InboundEvent::AddFailed => "add_failed",
            InboundEvent::DeleteSucceeded(_) => "delete_succeeded",
            InboundEvent::DeleteFailed => "delete_failed",
            InboundEvent::AddModeAcknowledged => "add_mode_acknowledged",
            InboundEvent::Unknown(_) => "unknown",
        }
    }
}

/// The JSON document published on the tags channel.
///
/// A missing or `null` `tags` field means the device has no tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl TagsDocument {
    /// Builds a document from tag ids (used by device simulators).
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a TagId>) -> Self {
        TagsDocument {
            tags: tags.into_iter().map(|t| t.as_str().to_string()).collect(),
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Decodes a payload received on `channel`.
pub fn decode(channel: Channel, payload: &str) -> CoreResult<InboundEvent> {
    match channel {
        Channel::Events => Ok(decode_event(payload)),
        Channel::Tags => decode_snapshot(payload).map(InboundEvent::Snapshot),
    }
}

/// Decodes a plain-text operation event.
///
/// Never fails: anything outside the vocabulary, including a known prefix
/// followed by an invalid id, becomes [`InboundEvent::Unknown`].
pub fn decode_event(payload: &str) -> InboundEvent {
    let text = payload.trim();

    match text {
        TAG_ADD_FAILED => return InboundEvent::AddFailed,
        TAG_DELETE_FAILED => return InboundEvent::DeleteFailed,
        ADD_MODE_STARTED => return InboundEvent::AddModeAcknowledged,
        _ => {}
    }

    if let Some(id) = text.strip_prefix(TAG_ADDED_PREFIX) {
        if let Ok(tag) = TagId::parse(id) {
            return InboundEvent::AddSucceeded(tag);
        }
    } else if let Some(id) = text.strip_prefix(TAG_DELETED_PREFIX) {
        if let Ok(tag) = TagId::parse(id) {
            return InboundEvent::DeleteSucceeded(tag);
        }
    }

    InboundEvent::Unknown(text.to_string())
}

/// Decodes a JSON tag snapshot.
///
/// Fails as a whole if any listed id is invalid, so a half-understood
/// snapshot never replaces the current set.
pub fn decode_snapshot(payload: &str) -> CoreResult<TagSet> {
    let document: TagsDocument = serde_json::from_str(payload)?;

    let tags = document
        .tags
        .iter()
        .map(|raw| {
            TagId::parse(raw).map_err(|e| CoreError::MalformedSnapshot(e.to_string()))
        })
        .collect::<CoreResult<Vec<TagId>>>()?;

    Ok(TagSet::from_snapshot(tags))
}

// =============================================================================
// Unit Tests
// =============================================================================
