//! Session store using the actor pattern.
//!
//! The store is the single owner of every session's runtime snapshot,
//! transcript, queue and hydration bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  StoreCommand   ┌───────────────────┐  StoreEvent   ┌─────────────┐
//! │ StoreHandle  │────(mpsc)──────▶│ SessionStoreActor │──(broadcast)─▶│ subscribers │
//! └──────────────┘                 └───────────────────┘               └─────────────┘
//!        ▲                            │            ▲
//!        │ snapshot()                 │ spawn      │ HydrationLoaded
//!        │                            ▼            │ (weak sender)
//!  ┌────────────┐                 ┌───────────────────┐
//!  │ SessionView│◀── refresh ──── │  history load     │
//!  │  DashMap   │                 │  task             │
//!  └────────────┘                 └───────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod entry;
mod exit;
mod handle;
mod hydrate;
mod messages;
mod runtime;

pub use actor::{SessionStoreActor, SessionViews};
pub use commands::{
    HydrateError, HydrationFuture, HydrationOutcome, HydrationResult, HydrationTarget,
    HydrationTicket, StoreCommand, StoreError, StoreEvent,
};
pub use entry::{SessionEntry, SessionView};
pub use handle::StoreHandle;
pub use runtime::{mark_runtime, MarkMode, MarkOptions};

use crate::collab::Collaborators;

/// Default command channel capacity.
pub const COMMAND_BUFFER: usize = 100;
/// Default event channel capacity.
pub const EVENT_BUFFER: usize = 256;
/// Default maximum number of live sessions.
pub const MAX_SESSIONS: usize = 100;

/// Sizing of the store's channels and session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub command_buffer: usize,
    pub event_buffer: usize,
    pub max_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            command_buffer: COMMAND_BUFFER,
            event_buffer: EVENT_BUFFER,
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// Spawns the store actor and returns a handle to it.
///
/// The actor stops once every handle clone is dropped. Must be called
/// from within a tokio runtime.
///
/// ```no_run
/// use std::sync::Arc;
/// use relayd::collab::Collaborators;
/// use relayd::history::JsonlHistoryLoader;
/// use relayd::store::{spawn_store, StoreConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let loader = JsonlHistoryLoader::new("/home/me/.claude/projects");
///     let store = spawn_store(StoreConfig::default(), Collaborators::new(Arc::new(loader)));
///     let sessions = store.list_sessions().await;
///     println!("{} sessions", sessions.len());
/// }
/// ```
pub fn spawn_store(config: StoreConfig, collaborators: Collaborators) -> StoreHandle {
    // Zero-capacity channels panic on creation
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
    let views: SessionViews = Arc::new(DashMap::new());

    let actor = SessionStoreActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        event_tx.clone(),
        Arc::clone(&views),
        collaborators,
        config.max_sessions,
    );
    tokio::spawn(actor.run());

    StoreHandle::new(cmd_tx, event_tx, views)
}
