//! Relay Core - Shared types for coding-agent session state
//!
//! This crate provides the domain types shared between the wire
//! protocol (relay-protocol) and the runtime (relayd): identifiers,
//! per-message lifecycle states and their transition tables, the
//! process runtime snapshot, and persisted history records.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod history;
pub mod message;
pub mod request;
pub mod runtime;
pub mod session;

// Re-exports for convenience
pub use history::{sort_canonical, HistoryRecord, HydrationKey, HYDRATION_KEY_SENTINEL};
pub use message::{
    is_valid_transition, AgentOutput, Message, MessageMetadata, MessageRole, MessageState,
    QueuedMessage, TransitionError,
};
pub use request::{InteractiveRequest, RequestKind};
pub use runtime::{Activity, ProcessExit, ProcessState, RuntimePhase, RuntimeUpdate, SessionRuntime};
pub use session::{MessageId, SessionId};
