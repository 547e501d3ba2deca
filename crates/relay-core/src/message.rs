//! Messages and their role-scoped lifecycle state machine.
//!
//! Every message carries a [`MessageState`]. Which transitions are legal
//! depends on the message's [`MessageRole`]:
//!
//! ```text
//! user:   Pending ─▶ Sent ─▶ Accepted ─▶ Dispatched ─▶ Complete
//!            │                  ▲
//!            └──────────────────┘        (Cancelled / Failed from any non-terminal)
//!
//! agent:  Pending ─▶ Sent ─▶ Dispatched ─▶ Accepted ─▶ Complete
//!                                                     (Failed from any non-terminal)
//! ```
//!
//! Terminal states (`Complete`, `Cancelled`, `Failed`) are never left and
//! never re-entered, not even by a self-transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::MessageId;

// ============================================================================
// Role
// ============================================================================

/// Who originated a message. Selects the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Typed by the human and queued for the agent process.
    User,

    /// Emitted by the agent process itself.
    #[serde(alias = "claude", alias = "assistant")]
    Agent,
}

impl MessageRole {
    /// Returns the wire label for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    /// Created locally, not yet acknowledged.
    #[default]
    Pending,
    /// Handed to the server.
    Sent,
    /// Delivered to the agent process.
    Dispatched,
    /// Confirmed. For user messages: queued and waiting for dispatch.
    Accepted,
    /// Finished normally.
    Complete,
    /// Withdrawn before completion (user messages only).
    Cancelled,
    /// Failed; `error_message` usually says why.
    Failed,
}

impl MessageState {
    /// Returns true if no transition may leave this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }

    /// Returns true if a user message in this state still sits in the queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Pending | Self::Sent | Self::Accepted)
    }

    /// Returns the wire label for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Dispatched => "DISPATCHED",
            Self::Accepted => "ACCEPTED",
            Self::Complete => "COMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `role` may move a message from `from` to `to`.
///
/// Pure lookup over (role, from, to); no side effects.
#[must_use]
pub fn is_valid_transition(role: MessageRole, from: MessageState, to: MessageState) -> bool {
    use MessageState::*;

    if from.is_terminal() {
        return false;
    }

    match role {
        MessageRole::User => matches!(
            (from, to),
            (Pending, Sent | Accepted | Failed | Cancelled)
                | (Sent, Accepted | Failed | Cancelled)
                | (Accepted, Dispatched | Failed | Cancelled)
                | (Dispatched, Complete | Failed | Cancelled)
        ),
        MessageRole::Agent => matches!(
            (from, to),
            (Pending, Sent | Failed)
                | (Sent, Dispatched | Failed)
                | (Dispatched, Accepted | Failed)
                | (Accepted, Complete | Failed)
        ),
    }
}

/// An attempted state change the role's table does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {role} message transition: {from} -> {to}")]
pub struct TransitionError {
    pub role: MessageRole,
    pub from: MessageState,
    pub to: MessageState,
}

// ============================================================================
// Message
// ============================================================================

/// One entry in a session's transcript or queue.
///
/// The core tracks ordering and lifecycle only; `text` is carried through
/// for clients but never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub state: MessageState,
    /// Position within the session. Assigned once, unique per session.
    pub order: u64,
    /// Number of accepted-but-undispatched messages ahead of this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Returns true if this is a user message still waiting for dispatch.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.role == MessageRole::User && self.state.is_queued()
    }

    /// Applies `to` if the role's table allows it, together with `metadata`.
    ///
    /// Leaving the queued states clears `queue_position` unless the
    /// metadata supplies a new one. Nothing is modified on error.
    pub fn transition(
        &mut self,
        to: MessageState,
        metadata: MessageMetadata,
    ) -> Result<(), TransitionError> {
        if !is_valid_transition(self.role, self.state, to) {
            return Err(TransitionError {
                role: self.role,
                from: self.state,
                to,
            });
        }

        self.state = to;
        if !to.is_queued() {
            self.queue_position = None;
        }
        if let Some(position) = metadata.queue_position {
            self.queue_position = Some(position);
        }
        if let Some(error) = metadata.error_message {
            self.error_message = Some(error);
        }
        Ok(())
    }
}

/// Optional fields applied together with a state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl MessageMetadata {
    /// Metadata carrying only an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            queue_position: None,
            error_message: Some(message.into()),
        }
    }
}

/// A user-originated submission, as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub text: String,
    /// Per-message agent settings (model, permission mode, ...). Opaque here.
    #[serde(default)]
    pub settings: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Output emitted by the agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    /// Initial state; `Pending` if absent.
    #[serde(default)]
    pub state: Option<MessageState>,
    pub timestamp: DateTime<Utc>,
}
