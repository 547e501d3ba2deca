//! Race-safe hydration of a session transcript from persisted history.
//!
//! A hydration runs in three steps:
//!
//! 1. [`SessionEntry::begin_hydration`] (actor) decides whether a load is
//!    needed, bumps the generation and hands out a shared future.
//! 2. [`spawn_load`] reads history off the actor task and posts the result
//!    back as `StoreCommand::HydrationLoaded`.
//! 3. [`SessionEntry::commit_history`] (actor) applies the result only if
//!    the generation captured in step 1 is still current.
//!
//! Anything that bumps the generation in between (a reset, a load for a
//! different key) turns the pending result into `Superseded`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use relay_core::{sort_canonical, HistoryRecord, HydrationKey, SessionId};
use relay_protocol::SnapshotReason;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::commands::{
    HydrateError, HydrationFuture, HydrationOutcome, HydrationResult, HydrationTarget,
    StoreCommand,
};
use super::entry::SessionEntry;
use crate::collab::{Collaborators, HistoryError, HydrationTrace};

// ============================================================================
// Begin
// ============================================================================

/// Result of asking an entry to hydrate.
pub(crate) enum HydrationStart {
    /// Nothing to load.
    Ready(HydrationOutcome),
    /// A load for the same key is already running.
    Joined(HydrationFuture),
    /// A new load must be spawned.
    Started {
        future: HydrationFuture,
        job: LoadJob,
    },
}

/// Everything the load task needs, captured at start time.
pub(crate) struct LoadJob {
    pub session_id: SessionId,
    pub generation: u64,
    pub key: HydrationKey,
    pub target: HydrationTarget,
    pub done: oneshot::Sender<HydrationResult>,
}

impl SessionEntry {
    /// Decides how to satisfy a hydration request for `target`.
    ///
    /// `reason` is the snapshot reason published if the load commits.
    pub(crate) fn begin_hydration(
        &mut self,
        target: &HydrationTarget,
        reason: SnapshotReason,
    ) -> HydrationStart {
        let key = target.key();

        if self.initialized && self.hydrated_key.as_ref() == Some(&key) {
            return HydrationStart::Ready(HydrationOutcome::AlreadyHydrated);
        }

        if let (Some(promise), Some(hydrating)) = (&self.hydrate_promise, &self.hydrating_key) {
            if hydrating == &key {
                debug!(
                    session_id = %self.session_id,
                    key = %key,
                    "Joining in-flight hydration"
                );
                return HydrationStart::Joined(promise.clone());
            }
        }

        self.hydrate_generation += 1;
        let generation = self.hydrate_generation;

        if let Some(external) = &target.external_session_id {
            self.last_known_external_session_id = Some(external.clone());
        }
        if let Some(project) = &target.project_path {
            self.last_known_project_path = Some(project.clone());
        }

        let (done, rx) = oneshot::channel();
        let future = rx.shared();
        self.hydrating_key = Some(key.clone());
        self.hydrating_reason = Some(reason);
        self.hydrate_promise = Some(future.clone());

        debug!(
            session_id = %self.session_id,
            key = %key,
            generation = generation,
            "Hydration started"
        );

        HydrationStart::Started {
            future,
            job: LoadJob {
                session_id: self.session_id.clone(),
                generation,
                key,
                target: target.clone(),
                done,
            },
        }
    }
}

// ============================================================================
// Load
// ============================================================================

/// Loads history for `job` on a separate task.
///
/// The result travels back through a weak sender so a pending load never
/// keeps the store alive. If the store is gone, `done` is dropped and
/// waiters see `HydrateError::Interrupted`.
pub(crate) fn spawn_load(
    job: LoadJob,
    collaborators: &Collaborators,
    commands: mpsc::WeakSender<StoreCommand>,
) {
    let loader = Arc::clone(&collaborators.loader);
    let trace_sink = Arc::clone(&collaborators.trace_sink);

    tokio::spawn(async move {
        let LoadJob {
            session_id,
            generation,
            key,
            target,
            done,
        } = job;

        let started = Instant::now();
        let result = loader
            .load_history(
                target.external_session_id.as_deref(),
                target.project_path.as_deref(),
            )
            .await
            .map(|mut records| {
                sort_canonical(&mut records);
                records
            });

        trace_sink.record(
            &session_id,
            HydrationTrace {
                key: key.clone(),
                generation,
                record_count: result.as_ref().ok().map(Vec::len),
                elapsed: started.elapsed(),
            },
        );

        let Some(commands) = commands.upgrade() else {
            debug!(session_id = %session_id, "Store stopped before history load finished");
            return;
        };

        let loaded = StoreCommand::HydrationLoaded {
            session_id,
            generation,
            key,
            result,
            done,
        };
        if commands.send(loaded).await.is_err() {
            debug!("Store stopped before history load was delivered");
        }
    });
}

// ============================================================================
// Commit
// ============================================================================

impl SessionEntry {
    /// Applies a finished load if `generation` is still current.
    ///
    /// History is merged in after everything already in memory, including
    /// messages that arrived while the load was running. Returns the
    /// outcome for waiters and, when history was applied, the snapshot
    /// reason to publish. A failed load clears the in-flight bookkeeping
    /// but leaves the conversation untouched.
    pub(crate) fn commit_history(
        &mut self,
        generation: u64,
        key: HydrationKey,
        result: Result<Vec<HistoryRecord>, HistoryError>,
    ) -> (HydrationResult, Option<SnapshotReason>) {
        if generation != self.hydrate_generation {
            debug!(
                session_id = %self.session_id,
                generation = generation,
                current = self.hydrate_generation,
                "Discarding superseded history load"
            );
            return (Ok(HydrationOutcome::Superseded { generation }), None);
        }

        self.hydrate_promise = None;
        self.hydrating_key = None;
        let reason = self.hydrating_reason.take();

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    key = %key,
                    error = %e,
                    "History load failed"
                );
                return (Err(HydrateError::History(e)), None);
            }
        };

        // Live messages win over history, and history takes fresh orders
        // so nothing already handed out is reused.
        let mut seen: HashSet<_> = self
            .queue
            .iter()
            .chain(self.transcript.iter())
            .map(|m| m.id.clone())
            .collect();
        let mut merged = 0;
        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            let order = self.allocate_order();
            self.transcript.push(record.into_message(order));
            merged += 1;
        }
        self.transcript.sort_by_key(|m| m.order);

        self.initialized = true;
        self.hydrated_key = Some(key);
        self.last_hydrated_at = Some(Utc::now());

        let message_count = self.message_count();
        info!(
            session_id = %self.session_id,
            generation = generation,
            merged = merged,
            messages = message_count,
            "Transcript hydrated"
        );

        (
            Ok(HydrationOutcome::Hydrated {
                generation,
                message_count,
            }),
            Some(reason.unwrap_or(SnapshotReason::Hydrated)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use relay_core::{Message, MessageId, MessageRole, MessageState, QueuedMessage};

    fn record(id: &str, seconds: i64) -> HistoryRecord {
        HistoryRecord {
            id: MessageId::new(id),
            role: MessageRole::Agent,
            text: String::new(),
            timestamp: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)),
            sequence: seconds as u64,
        }
    }

    fn target(ext: &str) -> HydrationTarget {
        HydrationTarget::new(Some(ext.to_string()), Some("/work".to_string()))
    }

    fn started(start: HydrationStart) -> (HydrationFuture, LoadJob) {
        match start {
            HydrationStart::Started { future, job } => (future, job),
            _ => panic!("expected a new load"),
        }
    }

    #[test]
    fn test_begin_bumps_generation_and_remembers_identity() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        assert_eq!(job.generation, 1);
        assert_eq!(entry.hydrate_generation, 1);
        assert!(entry.is_hydrating());
        assert_eq!(entry.hydrating_key, Some(job.key.clone()));
        assert_eq!(entry.last_known_external_session_id.as_deref(), Some("ext-1"));
        assert_eq!(entry.last_known_project_path.as_deref(), Some("/work"));
    }

    #[test]
    fn test_same_key_joins_in_flight_load() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let _first = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        let second = entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated);
        assert!(matches!(second, HydrationStart::Joined(_)));
        assert_eq!(entry.hydrate_generation, 1);
    }

    #[test]
    fn test_other_key_supersedes_in_flight_load() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let (_f1, first) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));
        let (_f2, second) = started(entry.begin_hydration(&target("ext-2"), SnapshotReason::Hydrated));

        assert_eq!(second.generation, 2);
        let (result, reason) = entry.commit_history(first.generation, first.key, Ok(vec![record("a", 0)]));
        assert_eq!(result, Ok(HydrationOutcome::Superseded { generation: 1 }));
        assert!(reason.is_none());
        assert!(entry.transcript.is_empty());
        assert!(entry.is_hydrating());
    }

    #[test]
    fn test_commit_applies_history() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        let (result, reason) = entry.commit_history(
            job.generation,
            job.key.clone(),
            Ok(vec![record("a", 0), record("b", 1), record("a", 2)]),
        );

        assert_eq!(
            result,
            Ok(HydrationOutcome::Hydrated {
                generation: 1,
                message_count: 2
            })
        );
        assert_eq!(reason, Some(SnapshotReason::Hydrated));
        assert_eq!(entry.transcript.len(), 2);
        assert_eq!(entry.transcript[1].order, 1);
        assert_eq!(entry.next_order, 2);
        assert!(entry.initialized);
        assert_eq!(entry.hydrated_key, Some(job.key));
        assert!(entry.last_hydrated_at.is_some());
        assert!(!entry.is_hydrating());

        let again = entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated);
        assert!(matches!(
            again,
            HydrationStart::Ready(HydrationOutcome::AlreadyHydrated)
        ));
    }

    #[test]
    fn test_commit_orders_history_after_queue() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.create_user_message(QueuedMessage {
            id: MessageId::new("q-1"),
            text: String::new(),
            settings: serde_json::Value::Null,
            timestamp: Utc::now(),
        });
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        let (result, reason) =
            entry.commit_history(job.generation, job.key, Ok(vec![record("h-1", 0)]));

        assert_eq!(
            result,
            Ok(HydrationOutcome::Hydrated {
                generation: 1,
                message_count: 2
            })
        );
        assert_eq!(reason, Some(SnapshotReason::Hydrated));
        assert_eq!(entry.queue[0].order, 0);
        assert_eq!(entry.transcript[0].order, 1);
        assert_eq!(entry.next_order, 2);
    }

    #[test]
    fn test_commit_keeps_live_transcript() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        // Arrives while the load is running; also present in history
        let order = entry.allocate_order();
        entry.insert_into_transcript(Message {
            state: MessageState::Sent,
            ..record("live", 0).into_message(order)
        });

        let (result, _) = entry.commit_history(
            job.generation,
            job.key,
            Ok(vec![record("h-1", 0), record("live", 1)]),
        );

        assert!(result.is_ok());
        let ids: Vec<(&str, u64)> = entry
            .transcript
            .iter()
            .map(|m| (m.id.as_str(), m.order))
            .collect();
        assert_eq!(ids, vec![("live", 0), ("h-1", 1)]);
        assert_eq!(entry.transcript[0].state, MessageState::Sent);
        assert_eq!(entry.next_order, 2);
    }

    #[test]
    fn test_commit_never_lowers_next_order() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.allocate_order();
        entry.allocate_order();
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        let (result, _) = entry.commit_history(job.generation, job.key, Ok(Vec::new()));

        assert!(result.is_ok());
        assert_eq!(entry.next_order, 2);
        assert_eq!(entry.allocate_order(), 2);
    }

    #[test]
    fn test_failed_load_leaves_conversation_untouched() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        entry.transcript.push(record("keep", 0).into_message(0));
        let (_future, job) = started(entry.begin_hydration(&target("ext-1"), SnapshotReason::Hydrated));

        let (result, reason) = entry.commit_history(
            job.generation,
            job.key,
            Err(HistoryError::Backend("down".to_string())),
        );

        assert!(matches!(result, Err(HydrateError::History(_))));
        assert!(reason.is_none());
        assert_eq!(entry.transcript.len(), 1);
        assert!(!entry.initialized);
        assert!(!entry.is_hydrating());
    }

    #[test]
    fn test_commit_uses_recorded_reason() {
        let mut entry = SessionEntry::new(SessionId::new("s-1"));
        let (_future, job) = started(
            entry.begin_hydration(&target("ext-1"), SnapshotReason::ProcessExitRehydrate),
        );

        let (_, reason) = entry.commit_history(job.generation, job.key, Ok(Vec::new()));
        assert_eq!(reason, Some(SnapshotReason::ProcessExitRehydrate));
    }
}
