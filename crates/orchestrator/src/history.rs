//! Builds the message window for each provider call.
//!
//! One system message, the most recent persisted messages for the session
//! (oldest first), then the current user message. The window size is
//! configured, not unbounded; old context falls off the front.

use mentor_core::error::Result;
use mentor_core::message::{Message, SessionId};
use mentor_core::store::TranscriptStore;
use std::sync::Arc;
use uuid::Uuid;

use crate::prompts;

#[derive(Clone)]
pub struct HistoryAssembler {
    store: Arc<dyn TranscriptStore>,
    window: usize,
}

impl HistoryAssembler {
    pub fn new(store: Arc<dyn TranscriptStore>, window: usize) -> Self {
        Self { store, window }
    }

    /// Assemble the messages for one turn: system + recent history + the
    /// new user message. The user message is not yet persisted at this
    /// point; it is appended to the window directly.
    pub async fn assemble(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        user_message: &str,
    ) -> Result<Vec<Message>> {
        let mut messages = vec![Message::system(prompts::system_prompt())];

        let recent = self
            .store
            .recent_turns(user_id, session_id, self.window)
            .await?;
        messages.extend(recent);

        messages.push(Message::user(user_message));
        Ok(messages)
    }
}
