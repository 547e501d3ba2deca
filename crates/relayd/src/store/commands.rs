//! Session store commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `SessionStoreActor`:
//! - `StoreCommand`: Commands sent to the actor
//! - `StoreError`: Errors that can occur during store operations
//! - `StoreEvent`: Events published by the store for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use futures::future::Shared;
use relay_core::{
    AgentOutput, HistoryRecord, HydrationKey, InteractiveRequest, Message, MessageId,
    MessageMetadata, MessageState, QueuedMessage, RuntimeUpdate, SessionId, SessionRuntime,
    TransitionError,
};
use relay_protocol::{OutboundMessage, OutboundPayload, SnapshotReason, TranscriptSnapshot};
use thiserror::Error;
use tokio::sync::oneshot;

use super::entry::SessionView;
use super::runtime::MarkOptions;
use crate::collab::HistoryError;

// ============================================================================
// Hydration Types
// ============================================================================

/// Which persisted history a session should mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationTarget {
    /// The agent's own session id (names the transcript file).
    pub external_session_id: Option<String>,
    /// Working directory the agent runs in.
    pub project_path: Option<String>,
}

impl HydrationTarget {
    pub fn new(external_session_id: Option<String>, project_path: Option<String>) -> Self {
        Self {
            external_session_id,
            project_path,
        }
    }

    pub fn key(&self) -> HydrationKey {
        HydrationKey::new(
            self.external_session_id.as_deref(),
            self.project_path.as_deref(),
        )
    }
}

/// How an `ensure_hydrated` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// History from this source is already merged in.
    AlreadyHydrated,
    /// History was loaded and committed.
    Hydrated { generation: u64, message_count: usize },
    /// A reset or newer request overtook this load; its result was dropped.
    Superseded { generation: u64 },
}

/// Errors a hydration can end with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HydrateError {
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The store shut down before the load was committed.
    #[error("hydration interrupted: store stopped")]
    Interrupted,
}

pub type HydrationResult = Result<HydrationOutcome, HydrateError>;

/// Handle to an in-flight hydration. Every clone resolves to the same result.
pub type HydrationFuture = Shared<oneshot::Receiver<HydrationResult>>;

/// Reply to `EnsureHydrated`: either settled at once or still loading.
pub enum HydrationTicket {
    Ready(HydrationOutcome),
    Pending(HydrationFuture),
}

impl std::fmt::Debug for HydrationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(outcome) => f.debug_tuple("Ready").field(outcome).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl HydrationTicket {
    /// Waits for the hydration to settle.
    pub async fn resolve(self) -> HydrationResult {
        match self {
            Self::Ready(outcome) => Ok(outcome),
            Self::Pending(future) => future.await.map_err(|_| HydrateError::Interrupted)?,
        }
    }
}

// ============================================================================
// Store Commands
// ============================================================================

/// Commands sent to the store actor.
///
/// Each request carries a oneshot channel for the response. Commands that
/// mutate a session create its entry on first reference.
#[derive(Debug)]
pub enum StoreCommand {
    /// Allocate the next order value of a session.
    AllocateOrder {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<u64, StoreError>>,
    },

    /// Queue a message submitted by the user.
    CreateUserMessage {
        session_id: SessionId,
        message: Box<QueuedMessage>,
        respond_to: oneshot::Sender<Result<Message, StoreError>>,
    },

    /// Append output emitted by the agent process.
    AppendAgentMessage {
        session_id: SessionId,
        output: Box<AgentOutput>,
        respond_to: oneshot::Sender<Result<Message, StoreError>>,
    },

    /// Move a message to a new state.
    ///
    /// # Errors
    /// - `StoreError::SessionNotFound` / `StoreError::MessageNotFound`
    /// - `StoreError::InvalidTransition` if the role's table forbids it
    UpdateMessageState {
        session_id: SessionId,
        message_id: MessageId,
        state: MessageState,
        metadata: MessageMetadata,
        respond_to: oneshot::Sender<Result<Message, StoreError>>,
    },

    /// Merge history messages without touching messages already in memory.
    LoadFromHistory {
        session_id: SessionId,
        messages: Vec<Message>,
        respond_to: oneshot::Sender<Result<usize, StoreError>>,
    },

    /// Count transcript and queued messages. `None` for unknown sessions.
    MessageCount {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<usize>>,
    },

    /// Apply a runtime update.
    MarkRuntime {
        session_id: SessionId,
        update: RuntimeUpdate,
        options: MarkOptions,
        respond_to: oneshot::Sender<Result<SessionRuntime, StoreError>>,
    },

    /// Reconcile the transcript with persisted history.
    EnsureHydrated {
        session_id: SessionId,
        target: HydrationTarget,
        respond_to: oneshot::Sender<Result<HydrationTicket, StoreError>>,
    },

    /// A history load finished. Sent by the load task, not by clients.
    HydrationLoaded {
        session_id: SessionId,
        generation: u64,
        key: HydrationKey,
        result: Result<Vec<HistoryRecord>, HistoryError>,
        done: oneshot::Sender<HydrationResult>,
    },

    /// The session's agent process terminated.
    ProcessExited {
        session_id: SessionId,
        code: Option<i32>,
        respond_to: oneshot::Sender<Result<SessionRuntime, StoreError>>,
    },

    /// Set or clear the outstanding interactive request.
    SetPendingRequest {
        session_id: SessionId,
        request: Option<Box<InteractiveRequest>>,
        respond_to: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Get a single session view.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Get all session views.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Permanently drop a session.
    CloseSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), StoreError>>,
    },
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store has reached its maximum session capacity.
    #[error("store is full (max: {max} sessions)")]
    StoreFull { max: usize },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("message {message_id} not found in session {session_id}")]
    MessageNotFound {
        session_id: SessionId,
        message_id: MessageId,
    },

    /// The role's transition table rejected the change.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Hydrate(#[from] HydrateError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Store Events
// ============================================================================

/// Events published by the store to subscribers.
///
/// For one session, events arrive in the order the store applied them.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The runtime snapshot changed.
    RuntimeChanged {
        session_id: SessionId,
        runtime: SessionRuntime,
    },

    /// Full state after a reset or a committed hydration.
    Snapshot {
        session_id: SessionId,
        reason: SnapshotReason,
        include_parity_snapshot: bool,
        snapshot: Box<TranscriptSnapshot>,
    },

    /// A message was created or changed state.
    MessageChanged {
        session_id: SessionId,
        message: Box<Message>,
    },

    /// The session was closed and its entry removed.
    Closed { session_id: SessionId },
}

impl StoreEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::RuntimeChanged { session_id, .. }
            | Self::Snapshot { session_id, .. }
            | Self::MessageChanged { session_id, .. }
            | Self::Closed { session_id } => session_id,
        }
    }

    /// Wraps the event in a versioned envelope for a transport.
    pub fn to_outbound(&self) -> OutboundMessage {
        let payload = match self.clone() {
            Self::RuntimeChanged {
                session_id,
                runtime,
            } => OutboundPayload::RuntimeDelta {
                session_id,
                runtime,
            },
            Self::Snapshot {
                session_id,
                reason,
                include_parity_snapshot,
                snapshot,
            } => OutboundPayload::Snapshot {
                session_id,
                reason,
                include_parity_snapshot,
                snapshot,
            },
            Self::MessageChanged {
                session_id,
                message,
            } => OutboundPayload::MessageUpdated {
                session_id,
                message,
            },
            Self::Closed { session_id } => OutboundPayload::SessionClosed { session_id },
        };
        OutboundMessage::new(payload)
    }
}
