//! Runtime snapshot updates.

use chrono::{DateTime, Utc};
use relay_core::{RuntimeUpdate, SessionRuntime};
use tokio::sync::broadcast;
use tracing::trace;

use super::commands::StoreEvent;
use super::entry::SessionEntry;

/// How a [`RuntimeUpdate`] combines with the current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkMode {
    /// Overlay supplied fields on the current snapshot.
    #[default]
    Merge,
    /// Start from defaults, then apply supplied fields.
    Replace,
}

/// Options for [`mark_runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOptions {
    pub mode: MarkMode,
    /// Broadcast `RuntimeChanged` after applying.
    pub emit_delta: bool,
    /// Stamp instead of the current time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for MarkOptions {
    fn default() -> Self {
        Self {
            mode: MarkMode::Merge,
            emit_delta: true,
            updated_at: None,
        }
    }
}

impl MarkOptions {
    pub fn replace() -> Self {
        Self {
            mode: MarkMode::Replace,
            ..Self::default()
        }
    }

    /// Same options, without the broadcast.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.emit_delta = false;
        self
    }

    #[must_use]
    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Applies `update` to the entry's runtime and returns the new snapshot.
///
/// `last_exit` is never carried over: an update that does not supply one
/// clears it, in both modes. Phase and process state combinations are
/// not validated.
pub fn mark_runtime(
    entry: &mut SessionEntry,
    update: RuntimeUpdate,
    options: MarkOptions,
    events: &broadcast::Sender<StoreEvent>,
) -> SessionRuntime {
    let base = match options.mode {
        MarkMode::Merge => entry.runtime.clone(),
        MarkMode::Replace => SessionRuntime::new(),
    };

    let runtime = SessionRuntime {
        phase: update.phase.unwrap_or(base.phase),
        process_state: update.process_state.unwrap_or(base.process_state),
        activity: update.activity.unwrap_or(base.activity),
        last_exit: update.last_exit,
        updated_at: options.updated_at.unwrap_or_else(Utc::now),
    };
    entry.runtime = runtime.clone();

    trace!(
        session_id = %entry.session_id,
        phase = %runtime.phase,
        process_state = ?runtime.process_state,
        activity = ?runtime.activity,
        "Runtime marked"
    );

    if options.emit_delta {
        // No subscribers is fine
        let _ = events.send(StoreEvent::RuntimeChanged {
            session_id: entry.session_id.clone(),
            runtime: runtime.clone(),
        });
    }

    runtime
}
