//! The session message log.
//!
//! Every write goes through [`ChatHistory::save_message`] so the side effects
//! of a new turn happen in one place: the session timestamp bump, the
//! auto-title on the first user turn and the rolling summary check.

use std::sync::Arc;

use carebridge_core::error::StoreError;
use carebridge_core::message::{Message, MessageType, NewMessage};
use carebridge_core::session::title_from_first_turn;
use carebridge_core::store::RecordStore;
use tracing::{debug, warn};

use crate::summary::SummaryEngine;

pub struct ChatHistory {
    store: Arc<dyn RecordStore>,
    summaries: Arc<SummaryEngine>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn RecordStore>, summaries: Arc<SummaryEngine>) -> Self {
        Self { store, summaries }
    }

    pub fn summaries(&self) -> &Arc<SummaryEngine> {
        &self.summaries
    }

    /// Append a message. The store assigns the next index.
    pub async fn save_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let saved = self.store.append_message(message).await?;
        self.store.touch_session(&saved.session_id).await?;

        if saved.message_type == MessageType::User {
            self.maybe_title(&saved).await?;
        }

        if let Err(e) = self.summaries.maybe_summarize(&saved.session_id).await {
            warn!(session_id = %saved.session_id, error = %e, "Summary check failed");
        }

        debug!(
            session_id = %saved.session_id,
            index = saved.index,
            message_type = %saved.message_type,
            "Message saved"
        );
        Ok(saved)
    }

    async fn maybe_title(&self, message: &Message) -> Result<(), StoreError> {
        let Some(session) = self.store.get_session(&message.session_id).await? else {
            return Ok(());
        };
        if !session.has_default_title() {
            return Ok(());
        }
        let title = title_from_first_turn(&message.content);
        if !title.is_empty() {
            self.store.set_session_title(&session.id, &title).await?;
        }
        Ok(())
    }

    /// The newest `limit` messages, oldest first.
    pub async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.store.recent_messages(session_id, limit).await?;
        messages.reverse();
        Ok(messages)
    }
}
