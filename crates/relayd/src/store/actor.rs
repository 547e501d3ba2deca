//! Store actor - owns all session entries and processes commands.
//!
//! The SessionStoreActor is the single writer of session state. It
//! receives commands via an mpsc channel, publishes events via broadcast,
//! and mirrors every entry into a shared map of read-only views.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply and event send failures are ignored; the caller may be gone

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use relay_core::{
    AgentOutput, HistoryRecord, HydrationKey, InteractiveRequest, Message, MessageId,
    MessageMetadata, MessageState, QueuedMessage, RuntimeUpdate, SessionId, SessionRuntime,
};
use relay_protocol::SnapshotReason;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::commands::{
    HydrationOutcome, HydrationResult, HydrationTarget, HydrationTicket, StoreCommand,
    StoreError, StoreEvent,
};
use super::entry::{SessionEntry, SessionView};
use super::exit::{apply_exit, rehydrate_target, watch_rehydrate, REHYDRATE_CONTEXT};
use super::hydrate::{spawn_load, HydrationStart};
use super::runtime::{mark_runtime, MarkOptions};
use crate::collab::{Collaborators, HistoryError};

/// Shared read side of the store, refreshed after every mutation.
pub type SessionViews = Arc<DashMap<SessionId, Arc<SessionView>>>;

// ============================================================================
// Store Actor
// ============================================================================

/// The store actor - owns every [`SessionEntry`].
///
/// Commands are processed one at a time, so per-session order allocation
/// and event emission follow arrival order. Slow work (history loads)
/// runs on spawned tasks that report back through `commands`.
pub struct SessionStoreActor {
    receiver: mpsc::Receiver<StoreCommand>,

    /// Weak so that in-flight loads never keep the actor running.
    commands: mpsc::WeakSender<StoreCommand>,

    sessions: HashMap<SessionId, SessionEntry>,

    views: SessionViews,

    event_publisher: broadcast::Sender<StoreEvent>,

    collaborators: Collaborators,

    max_sessions: usize,
}

impl SessionStoreActor {
    pub fn new(
        receiver: mpsc::Receiver<StoreCommand>,
        commands: mpsc::WeakSender<StoreCommand>,
        event_publisher: broadcast::Sender<StoreEvent>,
        views: SessionViews,
        collaborators: Collaborators,
        max_sessions: usize,
    ) -> Self {
        Self {
            receiver,
            commands,
            sessions: HashMap::new(),
            views,
            event_publisher,
            collaborators,
            max_sessions,
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Session store starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Session store stopped");
    }

    /// Number of live entries.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Dispatches a command to its handler.
    pub(crate) fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::AllocateOrder {
                session_id,
                respond_to,
            } => {
                let result = self.handle_allocate_order(&session_id);
                let _ = respond_to.send(result);
            }
            StoreCommand::CreateUserMessage {
                session_id,
                message,
                respond_to,
            } => {
                let result = self.handle_create_user_message(&session_id, *message);
                let _ = respond_to.send(result);
            }
            StoreCommand::AppendAgentMessage {
                session_id,
                output,
                respond_to,
            } => {
                let result = self.handle_append_agent_message(&session_id, *output);
                let _ = respond_to.send(result);
            }
            StoreCommand::UpdateMessageState {
                session_id,
                message_id,
                state,
                metadata,
                respond_to,
            } => {
                let result =
                    self.handle_update_message_state(&session_id, &message_id, state, metadata);
                let _ = respond_to.send(result);
            }
            StoreCommand::LoadFromHistory {
                session_id,
                messages,
                respond_to,
            } => {
                let result = self.handle_load_from_history(&session_id, messages);
                let _ = respond_to.send(result);
            }
            StoreCommand::MessageCount {
                session_id,
                respond_to,
            } => {
                let count = self.sessions.get(&session_id).map(SessionEntry::message_count);
                let _ = respond_to.send(count);
            }
            StoreCommand::MarkRuntime {
                session_id,
                update,
                options,
                respond_to,
            } => {
                let result = self.handle_mark_runtime(&session_id, update, options);
                let _ = respond_to.send(result);
            }
            StoreCommand::EnsureHydrated {
                session_id,
                target,
                respond_to,
            } => {
                let result =
                    self.handle_ensure_hydrated(&session_id, &target, SnapshotReason::Hydrated);
                let _ = respond_to.send(result);
            }
            StoreCommand::HydrationLoaded {
                session_id,
                generation,
                key,
                result,
                done,
            } => {
                self.handle_hydration_loaded(&session_id, generation, key, result, done);
            }
            StoreCommand::ProcessExited {
                session_id,
                code,
                respond_to,
            } => {
                let result = self.handle_process_exited(&session_id, code);
                let _ = respond_to.send(result);
            }
            StoreCommand::SetPendingRequest {
                session_id,
                request,
                respond_to,
            } => {
                let result = self.handle_set_pending_request(&session_id, request.map(|r| *r));
                let _ = respond_to.send(result);
            }
            StoreCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let view = self.sessions.get(&session_id).map(SessionEntry::view);
                let _ = respond_to.send(view);
            }
            StoreCommand::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list_sessions());
            }
            StoreCommand::CloseSession {
                session_id,
                respond_to,
            } => {
                let result = self.handle_close_session(&session_id);
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_allocate_order(&mut self, session_id: &SessionId) -> Result<u64, StoreError> {
        let order = self.entry_mut(session_id)?.allocate_order();
        self.refresh_view(session_id);
        Ok(order)
    }

    fn handle_create_user_message(
        &mut self,
        session_id: &SessionId,
        message: QueuedMessage,
    ) -> Result<Message, StoreError> {
        let message = self.entry_mut(session_id)?.create_user_message(message);
        debug!(
            session_id = %session_id,
            message_id = %message.id,
            order = message.order,
            queue_position = ?message.queue_position,
            "User message queued"
        );
        self.publish_message(session_id, &message);
        self.refresh_view(session_id);
        Ok(message)
    }

    fn handle_append_agent_message(
        &mut self,
        session_id: &SessionId,
        output: AgentOutput,
    ) -> Result<Message, StoreError> {
        let message = self.entry_mut(session_id)?.append_agent_message(output);
        self.publish_message(session_id, &message);
        self.refresh_view(session_id);
        Ok(message)
    }

    fn handle_update_message_state(
        &mut self,
        session_id: &SessionId,
        message_id: &MessageId,
        state: MessageState,
        metadata: MessageMetadata,
    ) -> Result<Message, StoreError> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;

        let message = match entry.update_message_state(message_id, state, metadata) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    message_id = %message_id,
                    error = %e,
                    "Message state update rejected"
                );
                return Err(e);
            }
        };

        debug!(
            session_id = %session_id,
            message_id = %message_id,
            state = message.state.as_str(),
            "Message state updated"
        );
        self.publish_message(session_id, &message);
        self.refresh_view(session_id);
        Ok(message)
    }

    fn handle_load_from_history(
        &mut self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> Result<usize, StoreError> {
        let offered = messages.len();
        let inserted = self.entry_mut(session_id)?.load_from_history(messages);
        debug!(
            session_id = %session_id,
            offered = offered,
            inserted = inserted,
            "Merged history messages"
        );
        self.refresh_view(session_id);
        Ok(inserted)
    }

    fn handle_mark_runtime(
        &mut self,
        session_id: &SessionId,
        update: RuntimeUpdate,
        options: MarkOptions,
    ) -> Result<SessionRuntime, StoreError> {
        if !self.sessions.contains_key(session_id) && self.sessions.len() >= self.max_sessions {
            return Err(self.store_full(session_id));
        }
        let entry = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionEntry::new(session_id.clone()));
        let runtime = mark_runtime(entry, update, options, &self.event_publisher);
        self.refresh_view(session_id);
        Ok(runtime)
    }

    fn handle_ensure_hydrated(
        &mut self,
        session_id: &SessionId,
        target: &HydrationTarget,
        reason: SnapshotReason,
    ) -> Result<HydrationTicket, StoreError> {
        let start = self.entry_mut(session_id)?.begin_hydration(target, reason);

        let ticket = match start {
            HydrationStart::Ready(outcome) => HydrationTicket::Ready(outcome),
            HydrationStart::Joined(future) => HydrationTicket::Pending(future),
            HydrationStart::Started { future, job } => {
                spawn_load(job, &self.collaborators, self.commands.clone());
                HydrationTicket::Pending(future)
            }
        };

        self.refresh_view(session_id);
        Ok(ticket)
    }

    fn handle_hydration_loaded(
        &mut self,
        session_id: &SessionId,
        generation: u64,
        key: HydrationKey,
        result: Result<Vec<HistoryRecord>, HistoryError>,
        done: oneshot::Sender<HydrationResult>,
    ) {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, "History loaded for closed session");
            let _ = done.send(Ok(HydrationOutcome::Superseded { generation }));
            return;
        };

        let (outcome, reason) = entry.commit_history(generation, key, result);

        if let Some(reason) = reason {
            let _ = self.event_publisher.send(StoreEvent::Snapshot {
                session_id: session_id.clone(),
                reason,
                include_parity_snapshot: reason == SnapshotReason::ProcessExitRehydrate,
                snapshot: Box::new(entry.snapshot()),
            });
        }

        self.refresh_view(session_id);
        let _ = done.send(outcome);
    }

    fn handle_process_exited(
        &mut self,
        session_id: &SessionId,
        code: Option<i32>,
    ) -> Result<SessionRuntime, StoreError> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;

        let runtime = apply_exit(entry, code, &self.event_publisher);
        let target = rehydrate_target(entry);
        self.refresh_view(session_id);

        if let Some(target) = target {
            debug!(
                session_id = %session_id,
                key = %target.key(),
                "Rehydrating after process exit"
            );
            match self.handle_ensure_hydrated(
                session_id,
                &target,
                SnapshotReason::ProcessExitRehydrate,
            ) {
                Ok(HydrationTicket::Pending(future)) => watch_rehydrate(
                    session_id.clone(),
                    future,
                    Arc::clone(&self.collaborators.error_reporter),
                ),
                Ok(HydrationTicket::Ready(_)) => {}
                Err(e) => {
                    self.collaborators
                        .error_reporter
                        .report(session_id, REHYDRATE_CONTEXT, &e)
                }
            }
        }

        Ok(runtime)
    }

    fn handle_set_pending_request(
        &mut self,
        session_id: &SessionId,
        request: Option<InteractiveRequest>,
    ) -> Result<(), StoreError> {
        let entry = self.entry_mut(session_id)?;
        debug!(
            session_id = %session_id,
            request_id = ?request.as_ref().map(|r| r.id.as_str()),
            "Pending request set"
        );
        entry.pending_request = request;
        self.refresh_view(session_id);
        Ok(())
    }

    fn handle_list_sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self.sessions.values().map(SessionEntry::view).collect();
        views.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        views
    }

    fn handle_close_session(&mut self, session_id: &SessionId) -> Result<(), StoreError> {
        if self.sessions.remove(session_id).is_none() {
            return Err(StoreError::SessionNotFound(session_id.clone()));
        }
        self.views.remove(session_id);

        info!(session_id = %session_id, "Session closed");
        let _ = self.event_publisher.send(StoreEvent::Closed {
            session_id: session_id.clone(),
        });
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Returns the entry, creating it on first reference.
    ///
    /// # Errors
    /// `StoreError::StoreFull` if a new entry would exceed `max_sessions`.
    fn entry_mut(&mut self, session_id: &SessionId) -> Result<&mut SessionEntry, StoreError> {
        if !self.sessions.contains_key(session_id) {
            if self.sessions.len() >= self.max_sessions {
                return Err(self.store_full(session_id));
            }
            debug!(session_id = %session_id, "Session entry created");
        }

        Ok(self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionEntry::new(session_id.clone())))
    }

    fn store_full(&self, session_id: &SessionId) -> StoreError {
        warn!(
            session_id = %session_id,
            current = self.sessions.len(),
            max = self.max_sessions,
            "Session store is full, rejecting new session"
        );
        StoreError::StoreFull {
            max: self.max_sessions,
        }
    }

    fn publish_message(&self, session_id: &SessionId, message: &Message) {
        let _ = self.event_publisher.send(StoreEvent::MessageChanged {
            session_id: session_id.clone(),
            message: Box::new(message.clone()),
        });
    }

    fn refresh_view(&self, session_id: &SessionId) {
        if let Some(entry) = self.sessions.get(session_id) {
            self.views
                .insert(session_id.clone(), Arc::new(entry.view()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::HistoryLoader;
    use async_trait::async_trait;
    use chrono::Utc;
    use relay_core::{HistoryRecord, MessageRole};

    struct EmptyLoader;

    #[async_trait]
    impl HistoryLoader for EmptyLoader {
        async fn load_history(
            &self,
            _external_session_id: Option<&str>,
            _project_path: Option<&str>,
        ) -> Result<Vec<HistoryRecord>, HistoryError> {
            Ok(Vec::new())
        }
    }

    fn create_actor(
        max_sessions: usize,
    ) -> (
        mpsc::Sender<StoreCommand>,
        SessionStoreActor,
        broadcast::Receiver<StoreEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(64);
        let actor = SessionStoreActor::new(
            cmd_rx,
            cmd_tx.downgrade(),
            event_tx,
            Arc::new(DashMap::new()),
            Collaborators::new(Arc::new(EmptyLoader)),
            max_sessions,
        );
        (cmd_tx, actor, event_rx)
    }

    fn queued(id: &str) -> Box<QueuedMessage> {
        Box::new(QueuedMessage {
            id: MessageId::new(id),
            text: String::new(),
            settings: serde_json::Value::Null,
            timestamp: Utc::now(),
        })
    }

    async fn allocate(actor: &mut SessionStoreActor, session: &str) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::AllocateOrder {
            session_id: SessionId::new(session),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_allocate_order_is_per_session() {
        let (_tx, mut actor, _rx) = create_actor(10);

        assert_eq!(allocate(&mut actor, "a").await, Ok(0));
        assert_eq!(allocate(&mut actor, "a").await, Ok(1));
        assert_eq!(allocate(&mut actor, "b").await, Ok(0));
        assert_eq!(allocate(&mut actor, "a").await, Ok(2));
        assert_eq!(actor.session_count(), 2);
    }

    #[tokio::test]
    async fn test_max_sessions_limit() {
        let (_tx, mut actor, _rx) = create_actor(2);

        assert!(allocate(&mut actor, "a").await.is_ok());
        assert!(allocate(&mut actor, "b").await.is_ok());
        assert_eq!(
            allocate(&mut actor, "c").await,
            Err(StoreError::StoreFull { max: 2 })
        );
        // Existing sessions keep working
        assert_eq!(allocate(&mut actor, "a").await, Ok(1));
    }

    #[tokio::test]
    async fn test_create_user_message_publishes_and_refreshes_view() {
        let (_tx, mut actor, mut events) = create_actor(10);

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::CreateUserMessage {
            session_id: SessionId::new("s-1"),
            message: queued("m-1"),
            respond_to: tx,
        });
        let message = rx.await.unwrap().unwrap();
        assert_eq!(message.role, MessageRole::User);

        match events.try_recv().unwrap() {
            StoreEvent::MessageChanged { message, .. } => {
                assert_eq!(message.id.as_str(), "m-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let view = actor.views.get(&SessionId::new("s-1")).unwrap();
        assert_eq!(view.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let (_tx, mut actor, _rx) = create_actor(10);

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::UpdateMessageState {
            session_id: SessionId::new("ghost"),
            message_id: MessageId::new("m-1"),
            state: MessageState::Sent,
            metadata: MessageMetadata::default(),
            respond_to: tx,
        });

        assert_eq!(
            rx.await.unwrap(),
            Err(StoreError::SessionNotFound(SessionId::new("ghost")))
        );
        assert_eq!(actor.session_count(), 0);
    }

    #[tokio::test]
    async fn test_message_count_for_unknown_session_is_none() {
        let (_tx, mut actor, _rx) = create_actor(10);

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::MessageCount {
            session_id: SessionId::new("ghost"),
            respond_to: tx,
        });
        assert_eq!(rx.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_session_removes_entry_and_view() {
        let (_tx, mut actor, mut events) = create_actor(10);
        allocate(&mut actor, "s-1").await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::CloseSession {
            session_id: SessionId::new("s-1"),
            respond_to: tx,
        });
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(actor.session_count(), 0);
        assert!(actor.views.is_empty());
        assert!(matches!(events.try_recv().unwrap(), StoreEvent::Closed { .. }));

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::CloseSession {
            session_id: SessionId::new("s-1"),
            respond_to: tx,
        });
        assert!(matches!(
            rx.await.unwrap(),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_process_exit_unknown_session() {
        let (_tx, mut actor, _rx) = create_actor(10);

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::ProcessExited {
            session_id: SessionId::new("ghost"),
            code: Some(1),
            respond_to: tx,
        });
        assert!(matches!(
            rx.await.unwrap(),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sessions_sorted() {
        let (_tx, mut actor, _rx) = create_actor(10);
        allocate(&mut actor, "b").await.unwrap();
        allocate(&mut actor, "a").await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(StoreCommand::ListSessions { respond_to: tx });
        let ids: Vec<String> = rx
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.session_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
