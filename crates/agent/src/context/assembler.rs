//! Context assembly: which stored messages a responder gets to see.
//!
//! # Selection
//!
//! 1. Fetch up to `2 × max` of the newest messages.
//! 2. Keep the meaningful ones: USER, AGENT and ERROR messages, plus
//!    ORCHESTRATOR messages that report an error or a context switch.
//! 3. If more than `max` remain and a destination is known, the newest
//!    `recent_window` are kept unconditionally and the rest of the budget
//!    goes to older messages relevant to that destination.
//! 4. Re-sort oldest → newest so prompts read as a transcript.
//!
//! The latest rolling summary is attached as background, never in place of
//! recent turns.
//!
//! # Determinism
//!
//! Selection only depends on message content and order, so the same log
//! always yields the same context.

use std::sync::Arc;

use carebridge_config::ContextConfig;
use carebridge_core::error::StoreError;
use carebridge_core::message::{Destination, Message, MessageType};
use carebridge_core::responder::AgentContext;
use carebridge_core::session::SummaryKind;
use carebridge_core::store::RecordStore;
use tracing::debug;

use crate::context::expansion::{ExpansionInput, build_expanded_query};
use crate::vocabulary::{Vocabulary, contains_any};

/// Words that make an ORCHESTRATOR message worth showing to a responder.
const ORCHESTRATOR_SIGNALS: &[&str] = &["error", "failed", "switching", "context"];

/// Messages fetched when building a search string.
const EXPANSION_LOOKBACK: usize = 20;

pub struct ContextAssembler {
    store: Arc<dyn RecordStore>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn RecordStore>, config: ContextConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the bounded context for one responder call.
    pub async fn get_context(
        &self,
        session_id: &str,
        destination: Option<Destination>,
        max_messages: usize,
    ) -> Result<AgentContext, StoreError> {
        let fetched = self
            .store
            .recent_messages(session_id, max_messages.saturating_mul(2))
            .await?;
        let total_available = fetched.len();

        let meaningful: Vec<Message> = fetched.into_iter().filter(is_meaningful).collect();
        let recent_window = self.config.recent_window.min(max_messages);
        let mut messages = select_messages(meaningful, destination, max_messages, recent_window);
        messages.sort_by_key(|m| m.index);

        let summary = self
            .store
            .latest_summary(session_id, SummaryKind::Conversation)
            .await?
            .map(|s| s.text)
            .filter(|t| !t.trim().is_empty());

        debug!(
            session_id = %session_id,
            total_available,
            selected = messages.len(),
            has_summary = summary.is_some(),
            "Context assembled"
        );

        Ok(AgentContext {
            summary,
            filtered: messages.len(),
            total_available,
            messages,
        })
    }

    /// Recent messages for the classifier, oldest first.
    pub async fn classification_history(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut messages = self
            .store
            .recent_messages(session_id, self.config.classification_history)
            .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Build the retrieval search string for `query`.
    ///
    /// Expects the current query to be the newest USER message already
    /// stored in the session; it is not repeated from history.
    pub async fn expand_query(
        &self,
        session_id: &str,
        destination: Destination,
        query: &str,
    ) -> Result<String, StoreError> {
        let recent = self
            .store
            .recent_messages(session_id, EXPANSION_LOOKBACK)
            .await?;

        let mut users = recent
            .iter()
            .filter(|m| m.message_type == MessageType::User)
            .map(|m| m.content.as_str())
            .peekable();
        if users.peek().is_some_and(|c| c.trim() == query.trim()) {
            users.next();
        }
        let recent_user_turns: Vec<&str> = users
            .take(self.config.expansion_recent_user_turns)
            .collect();

        let cross_agent_turns: Vec<&str> = match cross_agent_source(destination) {
            Some(source) => recent
                .iter()
                .filter(|m| m.message_type == MessageType::Agent && m.destination == Some(source))
                .take(self.config.expansion_cross_agent_turns)
                .map(|m| m.content.as_str())
                .collect(),
            None => Vec::new(),
        };

        let summary = self
            .store
            .latest_summary(session_id, SummaryKind::Conversation)
            .await?
            .map(|s| s.text);

        let expanded = build_expanded_query(&ExpansionInput {
            query,
            destination,
            recent_user_turns: &recent_user_turns,
            cross_agent_turns: &cross_agent_turns,
            summary: summary.as_deref(),
            config: &self.config,
        });
        debug!(session_id = %session_id, expanded = %expanded, "Query expanded");
        Ok(expanded)
    }
}

/// The other retrieval responder whose replies carry useful search terms.
fn cross_agent_source(destination: Destination) -> Option<Destination> {
    match destination {
        Destination::Document => Some(Destination::Product),
        Destination::Product => Some(Destination::Document),
        Destination::Report => None,
    }
}

/// Whether a message belongs in responder context at all.
pub fn is_meaningful(message: &Message) -> bool {
    match message.message_type {
        MessageType::User | MessageType::Agent | MessageType::Error => true,
        MessageType::Orchestrator => {
            let lower = message.content.to_lowercase();
            ORCHESTRATOR_SIGNALS.iter().any(|s| lower.contains(s))
        }
    }
}

/// Whether an older message is worth keeping for `destination`.
fn is_relevant(message: &Message, destination: Destination) -> bool {
    match message.message_type {
        MessageType::User => true,
        MessageType::Agent if message.destination != Some(destination) => true,
        _ => contains_any(
            &message.content,
            Vocabulary::relevance_keywords(destination),
        ),
    }
}

/// Choose at most `max` messages from `newest_first`.
///
/// The newest `recent_window` are always kept; older ones only when they are
/// relevant to `destination`. Without a destination the newest `max` win.
/// The result keeps the input order (newest first).
pub fn select_messages(
    newest_first: Vec<Message>,
    destination: Option<Destination>,
    max: usize,
    recent_window: usize,
) -> Vec<Message> {
    if newest_first.len() <= max {
        return newest_first;
    }
    let Some(destination) = destination else {
        return newest_first.into_iter().take(max).collect();
    };

    let recent_window = recent_window.min(max);
    let mut iter = newest_first.into_iter();
    let mut selected: Vec<Message> = iter.by_ref().take(recent_window).collect();
    selected.extend(
        iter.filter(|m| is_relevant(m, destination))
            .take(max - recent_window),
    );
    selected
}
