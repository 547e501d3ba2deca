//! Reaction to the agent process going away.

use std::sync::Arc;

use relay_core::{
    Activity, ProcessExit, ProcessState, RuntimePhase, RuntimeUpdate, SessionId, SessionRuntime,
};
use relay_protocol::SnapshotReason;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::commands::{HydrationFuture, HydrationOutcome, HydrationTarget, StoreEvent};
use super::entry::SessionEntry;
use super::runtime::{mark_runtime, MarkOptions};
use crate::collab::ErrorReporter;

/// `ErrorReporter` context for failed post-exit reloads.
pub(crate) const REHYDRATE_CONTEXT: &str = "process_exit_rehydrate";

/// Resets the entry after an exit and publishes the reset snapshot.
///
/// A missing or nonzero exit code puts the session in the `Error` phase.
pub(crate) fn apply_exit(
    entry: &mut SessionEntry,
    code: Option<i32>,
    events: &broadcast::Sender<StoreEvent>,
) -> SessionRuntime {
    let exit = ProcessExit::now(code);
    let phase = if exit.unexpected {
        RuntimePhase::Error
    } else {
        RuntimePhase::Idle
    };

    info!(
        session_id = %entry.session_id,
        code = ?code,
        unexpected = exit.unexpected,
        dropped_messages = entry.message_count(),
        "Agent process exited, resetting session"
    );

    entry.reset();

    let runtime = mark_runtime(
        entry,
        RuntimeUpdate::default()
            .phase(phase)
            .process_state(ProcessState::Stopped)
            .activity(Activity::Idle)
            .last_exit(exit),
        MarkOptions::default(),
        events,
    );

    let _ = events.send(StoreEvent::Snapshot {
        session_id: entry.session_id.clone(),
        reason: SnapshotReason::ProcessExitReset,
        include_parity_snapshot: true,
        snapshot: Box::new(entry.snapshot()),
    });

    runtime
}

/// History source to reload after an exit, if one was ever seen.
pub(crate) fn rehydrate_target(entry: &SessionEntry) -> Option<HydrationTarget> {
    entry
        .last_known_external_session_id
        .as_ref()
        .map(|external| {
            HydrationTarget::new(Some(external.clone()), entry.last_known_project_path.clone())
        })
}

/// Waits for a post-exit rehydration and reports its failure.
///
/// The snapshot itself is published by the store when the load commits.
pub(crate) fn watch_rehydrate(
    session_id: SessionId,
    future: HydrationFuture,
    reporter: Arc<dyn ErrorReporter>,
) {
    tokio::spawn(async move {
        match future.await {
            Ok(Ok(HydrationOutcome::Superseded { generation })) => {
                debug!(
                    session_id = %session_id,
                    generation = generation,
                    "Post-exit rehydration superseded"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => reporter.report(&session_id, REHYDRATE_CONTEXT, &e),
            Err(_) => {
                debug!(session_id = %session_id, "Store stopped during post-exit rehydration");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::{MessageId, QueuedMessage};

    fn busy_entry() -> SessionEntry {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.create_user_message(QueuedMessage {
            id: MessageId::new("m-1"),
            text: "hello".to_string(),
            settings: serde_json::Value::Null,
            timestamp: Utc::now(),
        });
        entry.runtime.phase = RuntimePhase::Running;
        entry.runtime.process_state = ProcessState::Running;
        entry.runtime.activity = Activity::Thinking;
        entry
    }

    #[test]
    fn test_exit_without_code_is_error() {
        let (tx, _rx) = broadcast::channel(16);
        let mut entry = busy_entry();

        let runtime = apply_exit(&mut entry, None, &tx);

        assert_eq!(runtime.phase, RuntimePhase::Error);
        assert_eq!(runtime.process_state, ProcessState::Stopped);
        assert_eq!(runtime.activity, Activity::Idle);
        let exit = runtime.last_exit.unwrap();
        assert_eq!(exit.code, None);
        assert!(exit.unexpected);
    }

    #[test]
    fn test_clean_exit_is_idle() {
        let (tx, _rx) = broadcast::channel(16);
        let mut entry = busy_entry();

        let runtime = apply_exit(&mut entry, Some(0), &tx);

        assert_eq!(runtime.phase, RuntimePhase::Idle);
        assert_eq!(runtime.process_state, ProcessState::Stopped);
        assert!(!runtime.last_exit.unwrap().unexpected);
    }

    #[test]
    fn test_exit_resets_and_publishes_snapshot() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut entry = busy_entry();
        let generation = entry.hydrate_generation;

        apply_exit(&mut entry, Some(137), &tx);

        assert_eq!(entry.message_count(), 0);
        assert_eq!(entry.next_order, 0);
        assert_eq!(entry.hydrate_generation, generation + 1);

        assert!(matches!(rx.try_recv().unwrap(), StoreEvent::RuntimeChanged { .. }));
        match rx.try_recv().unwrap() {
            StoreEvent::Snapshot {
                reason,
                include_parity_snapshot,
                snapshot,
                ..
            } => {
                assert_eq!(reason, SnapshotReason::ProcessExitReset);
                assert!(include_parity_snapshot);
                assert!(snapshot.transcript.is_empty());
                assert!(snapshot.queue.is_empty());
                assert_eq!(snapshot.runtime.phase, RuntimePhase::Error);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_rehydrate_target_needs_external_id() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        assert!(rehydrate_target(&entry).is_none());

        entry.last_known_project_path = Some("/work".to_string());
        assert!(rehydrate_target(&entry).is_none());

        entry.last_known_external_session_id = Some("ext-1".to_string());
        let target = rehydrate_target(&entry).unwrap();
        assert_eq!(target.key().as_str(), "ext-1::/work");
    }
}
