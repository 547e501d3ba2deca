//! Message state machine: order allocation, queueing, and state changes.
//!
//! User messages live in the session queue while they are `Pending`,
//! `Sent` or `Accepted`. The first transition out of those states moves
//! them into the transcript at their order position. Agent output goes
//! straight to the transcript.

use relay_core::{
    AgentOutput, Message, MessageId, MessageMetadata, MessageRole, MessageState, QueuedMessage,
};
use tracing::debug;

use super::commands::StoreError;
use super::entry::SessionEntry;

impl SessionEntry {
    /// Returns the next order value and advances the counter.
    pub fn allocate_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Number of queued messages confirmed but not yet dispatched.
    #[must_use]
    pub fn accepted_queue_len(&self) -> u32 {
        let accepted = self
            .queue
            .iter()
            .filter(|m| m.state == MessageState::Accepted)
            .count();
        u32::try_from(accepted).unwrap_or(u32::MAX)
    }

    /// Returns true if a message with this id is in the transcript or queue.
    #[must_use]
    pub fn contains_message(&self, id: &MessageId) -> bool {
        self.find_message(id).is_some()
    }

    pub fn find_message(&self, id: &MessageId) -> Option<&Message> {
        self.queue
            .iter()
            .chain(self.transcript.iter())
            .find(|m| &m.id == id)
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.transcript.len() + self.queue.len()
    }

    /// Queues a user submission as a `Pending` message.
    ///
    /// Resubmitting an id already known to the session returns the existing
    /// message unchanged.
    pub fn create_user_message(&mut self, queued: QueuedMessage) -> Message {
        if let Some(existing) = self.find_message(&queued.id) {
            debug!(
                session_id = %self.session_id,
                message_id = %queued.id,
                "User message already known, not queueing again"
            );
            return existing.clone();
        }

        let queue_position = self.accepted_queue_len();
        let message = Message {
            id: queued.id,
            role: MessageRole::User,
            state: MessageState::Pending,
            order: self.allocate_order(),
            queue_position: Some(queue_position),
            error_message: None,
            text: queued.text,
            timestamp: queued.timestamp,
        };
        self.queue.push(message.clone());
        message
    }

    /// Appends agent output to the transcript.
    ///
    /// Like user messages, a repeated id returns the existing message.
    pub fn append_agent_message(&mut self, output: AgentOutput) -> Message {
        if let Some(existing) = self.find_message(&output.id) {
            return existing.clone();
        }

        let message = Message {
            id: output.id,
            role: MessageRole::Agent,
            state: output.state.unwrap_or_default(),
            order: self.allocate_order(),
            queue_position: None,
            error_message: None,
            text: output.text,
            timestamp: output.timestamp,
        };
        self.insert_into_transcript(message.clone());
        message
    }

    /// Moves a message to `to`, applying `metadata` in the same step.
    ///
    /// # Errors
    ///
    /// - `StoreError::MessageNotFound` if the id is unknown
    /// - `StoreError::InvalidTransition` if the role's table forbids it;
    ///   the message is left untouched
    pub fn update_message_state(
        &mut self,
        id: &MessageId,
        to: MessageState,
        metadata: MessageMetadata,
    ) -> Result<Message, StoreError> {
        if let Some(idx) = self.queue.iter().position(|m| &m.id == id) {
            let still_queued = match self.queue.get_mut(idx) {
                Some(message) => {
                    message.transition(to, metadata)?;
                    message.is_queued()
                }
                None => return Err(self.message_not_found(id)),
            };

            if still_queued {
                return self
                    .queue
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| self.message_not_found(id));
            }

            let message = self.queue.remove(idx);
            self.insert_into_transcript(message.clone());
            return Ok(message);
        }

        match self.transcript.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.transition(to, metadata)?;
                Ok(message.clone())
            }
            None => Err(self.message_not_found(id)),
        }
    }

    /// Merges history into the transcript without clobbering memory.
    ///
    /// Messages whose id is already present are skipped, so repeating the
    /// call is harmless. An order value already taken in this session is
    /// replaced by a freshly allocated one. User messages still in a queued
    /// state go to the queue. Returns how many were inserted.
    pub fn load_from_history(&mut self, messages: Vec<Message>) -> usize {
        let mut inserted = 0;

        for mut message in messages {
            if self.contains_message(&message.id) {
                continue;
            }

            let taken = self
                .queue
                .iter()
                .chain(self.transcript.iter())
                .any(|m| m.order == message.order);
            if taken {
                message.order = self.allocate_order();
            } else if message.order >= self.next_order {
                self.next_order = message.order + 1;
            }

            if message.is_queued() {
                message.queue_position = Some(self.accepted_queue_len());
                let pos = self.queue.partition_point(|m| m.order < message.order);
                self.queue.insert(pos, message);
            } else {
                message.queue_position = None;
                self.insert_into_transcript(message);
            }
            inserted += 1;
        }

        inserted
    }

    /// Inserts keeping the transcript sorted by order.
    pub(crate) fn insert_into_transcript(&mut self, message: Message) {
        let pos = self.transcript.partition_point(|m| m.order < message.order);
        self.transcript.insert(pos, message);
    }

    fn message_not_found(&self, id: &MessageId) -> StoreError {
        StoreError::MessageNotFound {
            session_id: self.session_id.clone(),
            message_id: id.clone(),
        }
    }
}
