//! Client interface for the session store actor.
//!
//! The `StoreHandle` is cheap to clone. Mutations and most queries go
//! through the actor; [`StoreHandle::snapshot`] reads the shared view map
//! directly and never waits.

use std::sync::Arc;

use relay_core::{
    AgentOutput, InteractiveRequest, Message, MessageId, MessageMetadata, MessageState,
    QueuedMessage, RuntimeUpdate, SessionId, SessionRuntime,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::actor::SessionViews;
use super::commands::{
    HydrationOutcome, HydrationTarget, HydrationTicket, StoreCommand, StoreError, StoreEvent,
};
use super::entry::SessionView;
use super::runtime::MarkOptions;

// ============================================================================
// Store Handle
// ============================================================================

/// Handle for interacting with the store actor.
///
/// ```ignore
/// let store = spawn_store(StoreConfig::default(), collaborators);
/// let mut events = store.subscribe();
///
/// store.ensure_hydrated(session_id.clone(), target).await?;
/// let message = store.create_user_message(session_id, queued).await?;
/// ```
#[derive(Clone)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreCommand>,
    event_sender: broadcast::Sender<StoreEvent>,
    views: SessionViews,
}

impl StoreHandle {
    pub fn new(
        sender: mpsc::Sender<StoreCommand>,
        event_sender: broadcast::Sender<StoreEvent>,
        views: SessionViews,
    ) -> Self {
        Self {
            sender,
            event_sender,
            views,
        }
    }

    /// Sends a command and waits for its reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Returns the next order value for a session, starting at 0.
    ///
    /// # Errors
    ///
    /// - `StoreError::StoreFull` if the session is new and the store is full
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn allocate_order(&self, session_id: SessionId) -> Result<u64, StoreError> {
        self.request(|respond_to| StoreCommand::AllocateOrder {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Queues a user submission as a `Pending` message.
    pub async fn create_user_message(
        &self,
        session_id: SessionId,
        message: QueuedMessage,
    ) -> Result<Message, StoreError> {
        self.request(|respond_to| StoreCommand::CreateUserMessage {
            session_id,
            message: Box::new(message),
            respond_to,
        })
        .await?
    }

    /// Appends output produced by the agent.
    pub async fn append_agent_message(
        &self,
        session_id: SessionId,
        output: AgentOutput,
    ) -> Result<Message, StoreError> {
        self.request(|respond_to| StoreCommand::AppendAgentMessage {
            session_id,
            output: Box::new(output),
            respond_to,
        })
        .await?
    }

    /// Moves a message to `state`, applying `metadata` in the same step.
    ///
    /// # Errors
    ///
    /// - `StoreError::SessionNotFound` / `StoreError::MessageNotFound`
    /// - `StoreError::InvalidTransition` if the role's table forbids it
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn update_state(
        &self,
        session_id: SessionId,
        message_id: MessageId,
        state: MessageState,
        metadata: MessageMetadata,
    ) -> Result<Message, StoreError> {
        self.request(|respond_to| StoreCommand::UpdateMessageState {
            session_id,
            message_id,
            state,
            metadata,
            respond_to,
        })
        .await?
    }

    /// Merges history messages, skipping ids already present.
    ///
    /// Returns how many messages were inserted.
    pub async fn load_from_history(
        &self,
        session_id: SessionId,
        messages: Vec<Message>,
    ) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreCommand::LoadFromHistory {
            session_id,
            messages,
            respond_to,
        })
        .await?
    }

    /// Transcript plus queue length. `None` if the session is unknown.
    pub async fn get_message_count(
        &self,
        session_id: SessionId,
    ) -> Result<Option<usize>, StoreError> {
        self.request(|respond_to| StoreCommand::MessageCount {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn mark_runtime(
        &self,
        session_id: SessionId,
        update: RuntimeUpdate,
        options: MarkOptions,
    ) -> Result<SessionRuntime, StoreError> {
        self.request(|respond_to| StoreCommand::MarkRuntime {
            session_id,
            update,
            options,
            respond_to,
        })
        .await?
    }

    /// Starts or joins a hydration without waiting for it.
    pub async fn begin_hydration(
        &self,
        session_id: SessionId,
        target: HydrationTarget,
    ) -> Result<HydrationTicket, StoreError> {
        self.request(|respond_to| StoreCommand::EnsureHydrated {
            session_id,
            target,
            respond_to,
        })
        .await?
    }

    /// Merges `target`'s history into the session and waits for it.
    ///
    /// Concurrent calls for the same target share one load.
    ///
    /// # Errors
    ///
    /// - `StoreError::Hydrate` if the load failed or the store stopped
    /// - `StoreError::StoreFull` / `StoreError::ChannelClosed`
    pub async fn ensure_hydrated(
        &self,
        session_id: SessionId,
        target: HydrationTarget,
    ) -> Result<HydrationOutcome, StoreError> {
        let ticket = self.begin_hydration(session_id, target).await?;
        Ok(ticket.resolve().await?)
    }

    /// Reports that the session's agent process exited.
    pub async fn process_exited(
        &self,
        session_id: SessionId,
        code: Option<i32>,
    ) -> Result<SessionRuntime, StoreError> {
        self.request(|respond_to| StoreCommand::ProcessExited {
            session_id,
            code,
            respond_to,
        })
        .await?
    }

    /// Sets or clears the outstanding interactive request.
    pub async fn set_pending_request(
        &self,
        session_id: SessionId,
        request: Option<InteractiveRequest>,
    ) -> Result<(), StoreError> {
        self.request(|respond_to| StoreCommand::SetPendingRequest {
            session_id,
            request: request.map(Box::new),
            respond_to,
        })
        .await?
    }

    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionView>, StoreError> {
        self.request(|respond_to| StoreCommand::GetSession {
            session_id,
            respond_to,
        })
        .await
    }

    /// All sessions, sorted by id. Empty if the actor has shut down.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        self.request(|respond_to| StoreCommand::ListSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Removes a session and everything it holds.
    pub async fn close_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.request(|respond_to| StoreCommand::CloseSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Latest view of a session as of the last applied command.
    pub fn snapshot(&self, session_id: &SessionId) -> Option<Arc<SessionView>> {
        self.views
            .get(session_id)
            .map(|view| Arc::clone(view.value()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true while the actor is accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    fn create_test_handle() -> (StoreHandle, mpsc::Receiver<StoreCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        let handle = StoreHandle::new(cmd_tx, event_tx, Arc::new(DashMap::new()));
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_closed_channel_maps_to_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.allocate_order(SessionId::new("s-1")).await;
        assert_eq!(result, Err(StoreError::ChannelClosed));
        assert!(handle.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_state_forwards_fields() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(StoreCommand::UpdateMessageState {
                session_id,
                message_id,
                state,
                metadata,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(session_id.as_str(), "s-1");
                assert_eq!(message_id.as_str(), "m-1");
                assert_eq!(state, MessageState::Failed);
                assert_eq!(metadata.error_message.as_deref(), Some("boom"));
                let _ = respond_to.send(Err(StoreError::MessageNotFound {
                    session_id,
                    message_id,
                }));
                return true;
            }
            false
        });

        let result = handle
            .update_state(
                SessionId::new("s-1"),
                MessageId::new("m-1"),
                MessageState::Failed,
                MessageMetadata::error("boom"),
            )
            .await;
        assert!(matches!(result, Err(StoreError::MessageNotFound { .. })));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_reply_is_channel_closed() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            // Drop the command, and with it the reply sender
            let _ = rx.recv().await;
        });

        let result = handle.close_session(SessionId::new("s-1")).await;
        assert_eq!(result, Err(StoreError::ChannelClosed));
    }

    #[test]
    fn test_snapshot_reads_views() {
        let (handle, _rx) = create_test_handle();
        let id = SessionId::new("s-1");
        assert!(handle.snapshot(&id).is_none());

        let entry = super::super::entry::SessionEntry::new(id.clone());
        handle.views.insert(id.clone(), Arc::new(entry.view()));

        let view = handle.snapshot(&id).unwrap();
        assert_eq!(view.session_id, id);
        assert_eq!(view.message_count, 0);
    }
}
