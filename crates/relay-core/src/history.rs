//! Persisted history records and the identity of a history source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::{Message, MessageId, MessageRole, MessageState};

/// Stands in for an absent half of a [`HydrationKey`].
pub const HYDRATION_KEY_SENTINEL: &str = "~";

// ============================================================================
// Hydration Key
// ============================================================================

/// Identity of one persisted-history source.
///
/// Built from the agent's external session id and the project path; absent
/// or empty parts normalize to [`HYDRATION_KEY_SENTINEL`], so the key is
/// always well-formed and two "unknown" sources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HydrationKey(String);

impl HydrationKey {
    pub fn new(external_session_id: Option<&str>, project_path: Option<&str>) -> Self {
        let part = |value: Option<&str>| match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => HYDRATION_KEY_SENTINEL.to_string(),
        };
        Self(format!(
            "{}::{}",
            part(external_session_id),
            part(project_path)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HydrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// History Record
// ============================================================================

/// One conversation entry read back from the agent's own history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: MessageId,
    pub role: MessageRole,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Position in the source file; breaks timestamp ties.
    #[serde(default)]
    pub sequence: u64,
}

impl HistoryRecord {
    /// Canonical ordering: timestamp ascending (untimed entries first),
    /// then file position.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.sequence.cmp(&other.sequence))
    }

    /// Converts into a completed transcript message at `order`.
    pub fn into_message(self, order: u64) -> Message {
        Message {
            id: self.id,
            role: self.role,
            state: MessageState::Complete,
            order,
            queue_position: None,
            error_message: None,
            text: self.text,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Sorts records in place by [`HistoryRecord::canonical_cmp`].
pub fn sort_canonical(records: &mut [HistoryRecord]) {
    records.sort_by(HistoryRecord::canonical_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, secs: Option<i64>, sequence: u64) -> HistoryRecord {
        HistoryRecord {
            id: MessageId::new(id),
            role: MessageRole::User,
            text: String::new(),
            timestamp: secs.and_then(|s| Utc.timestamp_opt(s, 0).single()),
            sequence,
        }
    }

    #[test]
    fn test_hydration_key_sentinel() {
        assert_eq!(HydrationKey::new(None, None).as_str(), "~::~");
        assert_eq!(HydrationKey::new(Some("abc"), None).as_str(), "abc::~");
        assert_eq!(HydrationKey::new(Some(""), Some("/p")).as_str(), "~::/p");
        assert_eq!(
            HydrationKey::new(Some("abc"), Some("/p")),
            HydrationKey::new(Some(" abc "), Some("/p"))
        );
    }

    #[test]
    fn test_canonical_sort() {
        let mut records = vec![
            record("c", Some(30), 0),
            record("b", Some(10), 2),
            record("a", Some(10), 1),
            record("z", None, 5),
        ];
        sort_canonical(&mut records);

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn test_into_message_is_complete() {
        let msg = record("a", Some(10), 0).into_message(7);
        assert_eq!(msg.order, 7);
        assert_eq!(msg.state, MessageState::Complete);
        assert!(msg.queue_position.is_none());
    }
}
