//! The per-session record owned by the store actor.

use std::fmt;

use chrono::{DateTime, Utc};
use relay_core::{HydrationKey, InteractiveRequest, Message, SessionId, SessionRuntime};
use relay_protocol::{SnapshotReason, TranscriptSnapshot};
use serde::Serialize;

use super::commands::HydrationFuture;

/// One active session's conversation and process state.
///
/// Only the store actor holds a `SessionEntry`; everything else sees
/// [`SessionView`] copies.
pub struct SessionEntry {
    pub session_id: SessionId,
    pub runtime: SessionRuntime,
    /// Dispatched and agent messages, sorted by `order`.
    pub transcript: Vec<Message>,
    /// User messages not yet dispatched, sorted by `order`.
    pub queue: Vec<Message>,
    pub pending_request: Option<InteractiveRequest>,
    pub next_order: u64,
    /// Transcript populated at least once since the last reset.
    pub initialized: bool,
    pub hydrated_key: Option<HydrationKey>,
    pub hydrating_key: Option<HydrationKey>,
    /// Snapshot reason the in-flight hydration commits with.
    pub hydrating_reason: Option<SnapshotReason>,
    /// Bumped by every hydration attempt and every reset.
    pub hydrate_generation: u64,
    pub hydrate_promise: Option<HydrationFuture>,
    /// Survive resets so a crashed session can be rehydrated.
    pub last_known_external_session_id: Option<String>,
    pub last_known_project_path: Option<String>,
    pub last_hydrated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionEntry {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            runtime: SessionRuntime::new(),
            transcript: Vec::new(),
            queue: Vec::new(),
            pending_request: None,
            next_order: 0,
            initialized: false,
            hydrated_key: None,
            hydrating_key: None,
            hydrating_reason: None,
            hydrate_generation: 0,
            hydrate_promise: None,
            last_known_external_session_id: None,
            last_known_project_path: None,
            last_hydrated_at: None,
            created_at: Utc::now(),
        }
    }

    /// Clears conversation state in place after the process went away.
    ///
    /// Bumping the generation orphans any in-flight hydration: its result
    /// will no longer match and is discarded on arrival. The last known
    /// external identity is kept.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending_request = None;
        self.transcript.clear();
        self.next_order = 0;
        self.initialized = false;
        self.hydrated_key = None;
        self.hydrating_key = None;
        self.hydrating_reason = None;
        self.hydrate_generation += 1;
        self.hydrate_promise = None;
    }

    /// Returns true while a hydration is in flight.
    #[must_use]
    pub fn is_hydrating(&self) -> bool {
        self.hydrate_promise.is_some()
    }

    /// Copies runtime and conversation state for subscribers.
    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            runtime: self.runtime.clone(),
            transcript: self.transcript.clone(),
            queue: self.queue.clone(),
            pending_request: self.pending_request.clone(),
        }
    }

    /// Copies the whole entry into a read-only view.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            runtime: self.runtime.clone(),
            transcript: self.transcript.clone(),
            queue: self.queue.clone(),
            pending_request: self.pending_request.clone(),
            next_order: self.next_order,
            message_count: self.message_count(),
            initialized: self.initialized,
            hydrated_key: self.hydrated_key.clone(),
            hydrating: self.is_hydrating(),
            hydrate_generation: self.hydrate_generation,
            last_known_external_session_id: self.last_known_external_session_id.clone(),
            last_known_project_path: self.last_known_project_path.clone(),
            last_hydrated_at: self.last_hydrated_at,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("session_id", &self.session_id)
            .field("runtime", &self.runtime)
            .field("transcript", &self.transcript.len())
            .field("queue", &self.queue.len())
            .field("next_order", &self.next_order)
            .field("initialized", &self.initialized)
            .field("hydrated_key", &self.hydrated_key)
            .field("hydrating_key", &self.hydrating_key)
            .field("hydrate_generation", &self.hydrate_generation)
            .finish_non_exhaustive()
    }
}

/// Read-only copy of a [`SessionEntry`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub runtime: SessionRuntime,
    pub transcript: Vec<Message>,
    pub queue: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<InteractiveRequest>,
    pub next_order: u64,
    pub message_count: usize,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hydrated_key: Option<HydrationKey>,
    pub hydrating: bool,
    pub hydrate_generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_external_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hydrated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{MessageId, MessageRole, MessageState};

    fn message(id: &str, order: u64) -> Message {
        Message {
            id: MessageId::new(id),
            role: MessageRole::User,
            state: MessageState::Pending,
            order,
            queue_position: Some(0),
            error_message: None,
            text: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_reset_clears_conversation_but_keeps_identity() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.transcript.push(message("a", 0));
        entry.queue.push(message("b", 1));
        entry.next_order = 2;
        entry.initialized = true;
        entry.hydrated_key = Some(HydrationKey::new(Some("ext"), None));
        entry.hydrate_generation = 4;
        entry.last_known_external_session_id = Some("ext".to_string());

        entry.reset();

        assert!(entry.transcript.is_empty());
        assert!(entry.queue.is_empty());
        assert_eq!(entry.next_order, 0);
        assert!(!entry.initialized);
        assert!(entry.hydrated_key.is_none());
        assert!(!entry.is_hydrating());
        assert_eq!(entry.hydrate_generation, 5);
        assert_eq!(entry.last_known_external_session_id.as_deref(), Some("ext"));
    }

    #[test]
    fn test_view_counts_transcript_and_queue() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.transcript.push(message("a", 0));
        entry.queue.push(message("b", 1));

        let view = entry.view();
        assert_eq!(view.message_count, 2);
        assert!(!view.hydrating);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["session_id"], "s-1");
        assert!(json.get("hydrated_key").is_none());
    }
}
