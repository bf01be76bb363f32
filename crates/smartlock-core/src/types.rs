//! # Domain Types
//!
//! Core domain types shared by the decoder, the state machine and the UI.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     TagId       │   │     TagSet      │   │  OperationId    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  validated      │   │  device order   │   │  u64 counter    │       │
//! │  │  opaque string  │   │  no duplicates  │   │  matches timers │       │
//! │  │  "04A1B2C3"     │   │  replace only   │   │  to operations  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replace-Only Tag Set
//! [`TagSet`] deliberately has no insert or remove. The device is the single
//! source of truth: after an add or delete succeeds the list is re-fetched
//! and swapped in whole, so the local view never diverges from what the
//! device reports.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Tag Id
// =============================================================================

/// An access-control credential identifier (e.g. an RFID card UID).
///
/// Opaque to this system: no ordering or structure is assumed beyond the
/// validation rules in [`TagId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export)]
pub struct TagId(String);

impl TagId {
    /// Parses and validates a tag identifier.
    ///
    /// ## Rules
    /// - Surrounding whitespace is trimmed
    /// - Must not be empty
    /// - Must not contain control characters
    ///
    /// Inner spaces are kept: readers often print UIDs as spaced hex bytes.
    ///
    /// ## Example
    /// ```rust
    /// use smartlock_core::TagId;
    ///
    /// assert!(TagId::parse("04A1B2C3").is_ok());
    /// assert!(TagId::parse("").is_err());
    /// assert_eq!(TagId::parse(" 04 A1 ").unwrap().as_str(), "04 A1");
    /// assert!(TagId::parse("04\tA1").is_err());
    /// ```
    pub fn parse(value: &str) -> CoreResult<Self> {
        let trimmed = value.trim();

        let invalid = |reason: &str| CoreError::InvalidTagId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("must not be empty"));
        }

        if trimmed.chars().any(char::is_control) {
            return Err(invalid("must not contain control characters"));
        }

        Ok(TagId(trimmed.to_string()))
    }

    /// Returns the raw identifier.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TagId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagId::parse(s)
    }
}

impl TryFrom<String> for TagId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TagId::parse(&value)
    }
}

impl From<TagId> for String {
    fn from(tag: TagId) -> Self {
        tag.0
    }
}

// =============================================================================
// Tag Set
// =============================================================================

/// The authoritative set of tags, as last reported by the device.
///
/// ## Invariants
/// - Ids are distinct (first occurrence wins when a snapshot repeats one)
/// - Order is whatever order the device listed them in
/// - Only ever replaced wholesale, never patched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct TagSet(Vec<TagId>);

impl TagSet {
    /// Creates an empty tag set (session start, before the first snapshot).
    pub fn new() -> Self {
        TagSet(Vec::new())
    }

    /// Builds a tag set from a device snapshot, collapsing duplicates.
    pub fn from_snapshot(tags: impl IntoIterator<Item = TagId>) -> Self {
        let mut unique: Vec<TagId> = Vec::new();
        for tag in tags {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        TagSet(unique)
    }

    /// Number of tags.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the device reported no tags.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `tag` is enrolled on the device.
    pub fn contains(&self, tag: &TagId) -> bool {
        self.0.contains(tag)
    }

    /// Iterates tags in device order.
    pub fn iter(&self) -> std::slice::Iter<'_, TagId> {
        self.0.iter()
    }

    /// Returns the tags as a slice in device order.
    #[inline]
    pub fn as_slice(&self) -> &[TagId] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a TagId;
    type IntoIter = std::slice::Iter<'a, TagId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Operation Id
// =============================================================================

/// Identifies one opened add/delete operation.
///
/// Timeout firings carry the id of the operation that scheduled them, so a
/// timer left over from an earlier operation can never clear a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, TS)]
#[ts(export)]
pub struct OperationId(pub u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str) -> TagId {
        TagId::parse(id).unwrap()
    }

    #[test]
    fn test_tag_id_trims_whitespace() {
        assert_eq!(tag("  04A1B2C3\n").as_str(), "04A1B2C3");
    }

    #[test]
    fn test_tag_id_rejects_invalid() {
        assert!(TagId::parse("").is_err());
        assert!(TagId::parse("   ").is_err());
        assert!(TagId::parse("04\u{7}A1").is_err());
        assert!(TagId::parse("04\tA1").is_err());
    }

    #[test]
    fn test_tag_id_keeps_inner_spaces_and_long_ids() {
        assert_eq!(tag(" 04 A1 B2 C3 ").as_str(), "04 A1 B2 C3");
        let long = "A".repeat(200);
        assert_eq!(tag(&long).as_str(), long);
    }

    #[test]
    fn test_tag_id_allows_colons() {
        // The wire prefix is stripped once, so ids may contain ':' themselves.
        assert_eq!(tag("AA:BB:CC:DD").to_string(), "AA:BB:CC:DD");
    }

    #[test]
    fn test_tag_id_serde_validates() {
        let parsed: TagId = serde_json::from_str("\"04A1\"").unwrap();
        assert_eq!(parsed, tag("04A1"));
        assert!(serde_json::from_str::<TagId>("\"\"").is_err());
    }

    #[test]
    fn test_tag_set_collapses_duplicates_in_device_order() {
        let set = TagSet::from_snapshot(vec![tag("B"), tag("A"), tag("B")]);
        assert_eq!(set.as_slice(), &[tag("B"), tag("A")]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&tag("A")));
        assert!(!set.contains(&tag("C")));
    }

    #[test]
    fn test_tag_set_serializes_as_array() {
        let set = TagSet::from_snapshot(vec![tag("T1"), tag("T2")]);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["T1","T2"]"#);
    }

    #[test]
    fn test_operation_id_display() {
        assert_eq!(OperationId(7).to_string(), "op-7");
    }
}
