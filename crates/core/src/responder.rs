//! Responder trait: the specialized answer generators a turn is routed to.
//!
//! Responders are black boxes to the orchestrator: they receive the query,
//! the assembled context and an expanded search string, and return text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResponderError;
use crate::message::{Destination, Message};

/// Bounded context handed to a responder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Rolling background summary, if one exists
    pub summary: Option<String>,

    /// Selected messages, oldest first
    pub messages: Vec<Message>,

    /// How many messages were fetched before filtering
    pub total_available: usize,

    /// How many messages survived filtering
    pub filtered: usize,
}

impl AgentContext {
    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Everything a responder needs to answer one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderRequest {
    pub destination: Destination,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query: String,
    /// Retrieval-oriented search string built from the query and context
    pub expanded_query: String,
    pub context: AgentContext,
}

/// A responder's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponderReply {
    pub answer: String,

    /// Reports the answer drew on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports_referenced: Vec<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ResponderReply {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Responder: Send + Sync {
    /// Which destination this responder serves.
    fn destination(&self) -> Destination;

    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError>;
}
