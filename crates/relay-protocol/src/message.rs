//! Outbound envelopes pushed to remote subscribers.
//!
//! The core never writes to a socket. A transport collaborator subscribes
//! to store events, wraps them in [`OutboundMessage`] and sends the JSON.

use crate::version::ProtocolVersion;
use relay_core::{InteractiveRequest, Message, SessionId, SessionRuntime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a full snapshot was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// The process exited and the session was reset.
    ProcessExitReset,
    /// History was reloaded after a process exit.
    ProcessExitRehydrate,
    /// A hydration request completed outside the exit path.
    Hydrated,
}

impl SnapshotReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessExitReset => "process_exit_reset",
            Self::ProcessExitRehydrate => "process_exit_rehydrate",
            Self::Hydrated => "hydrated",
        }
    }
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime plus conversation state of one session at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    pub runtime: SessionRuntime,
    pub transcript: Vec<Message>,
    #[serde(default)]
    pub queue: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<InteractiveRequest>,
}

/// Event payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    /// The runtime snapshot changed.
    RuntimeDelta {
        session_id: SessionId,
        runtime: SessionRuntime,
    },

    /// Full state after a reset or rehydration.
    Snapshot {
        session_id: SessionId,
        reason: SnapshotReason,
        /// Ask the subscriber to cross-check its incremental state.
        include_parity_snapshot: bool,
        snapshot: Box<TranscriptSnapshot>,
    },

    /// A single message was created or changed state.
    MessageUpdated {
        session_id: SessionId,
        message: Box<Message>,
    },

    /// The session was closed for good.
    SessionClosed { session_id: SessionId },
}

impl OutboundPayload {
    /// Returns the session this payload belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::RuntimeDelta { session_id, .. }
            | Self::Snapshot { session_id, .. }
            | Self::MessageUpdated { session_id, .. }
            | Self::SessionClosed { session_id } => session_id,
        }
    }
}

/// Versioned envelope around an [`OutboundPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub payload: OutboundPayload,
}

impl OutboundMessage {
    /// Wraps a payload with the current protocol version.
    pub fn new(payload: OutboundPayload) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            payload,
        }
    }

    /// Encodes as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_delta_serialization() {
        let msg = OutboundMessage::new(OutboundPayload::RuntimeDelta {
            session_id: SessionId::new("s-1"),
            runtime: SessionRuntime::new(),
        });
        let json = msg.to_json_line().unwrap();
        assert!(json.contains("\"type\":\"runtime_delta\""));
        assert!(json.contains("\"session_id\":\"s-1\""));
        assert!(json.contains("\"protocol_version\":{\"major\":1,\"minor\":0}"));
        assert!(json.contains("\"activity\":\"IDLE\""));
    }

    #[test]
    fn test_snapshot_serialization() {
        let msg = OutboundMessage::new(OutboundPayload::Snapshot {
            session_id: SessionId::new("s-1"),
            reason: SnapshotReason::ProcessExitReset,
            include_parity_snapshot: true,
            snapshot: Box::new(TranscriptSnapshot {
                runtime: SessionRuntime::new(),
                transcript: Vec::new(),
                queue: Vec::new(),
                pending_request: None,
            }),
        });
        let json = msg.to_json_line().unwrap();
        assert!(json.contains("\"reason\":\"process_exit_reset\""));
        assert!(json.contains("\"include_parity_snapshot\":true"));

        let parsed: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.payload.session_id().as_str(), "s-1");
    }
}
