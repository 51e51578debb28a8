//! Chat log domain types.
//!
//! A session's messages form an append-only log: every inbound and outbound
//! turn is stored with a per-session index that starts at 1 and never has
//! gaps. Messages are never edited after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of turn a message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Text the end user sent.
    User,
    /// A reply produced by one of the responders.
    Agent,
    /// A routing decision recorded by the orchestrator.
    Orchestrator,
    /// A failure surfaced to the user.
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Agent => "AGENT",
            Self::Orchestrator => "ORCHESTRATOR",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "AGENT" => Some(Self::Agent),
            "ORCHESTRATOR" => Some(Self::Orchestrator),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The specialized responder a turn is routed to.
///
/// This is the closed output set of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Questions about the user's own uploaded reports.
    Report,
    /// Products, supplements and symptom relief.
    Product,
    /// Educational answers from the document knowledge base.
    Document,
}

impl Destination {
    pub const ALL: [Destination; 3] = [Self::Report, Self::Product, Self::Document];

    /// The lowercase token the classifier emits.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Product => "product",
            Self::Document => "document",
        }
    }

    /// The responder tag stored on AGENT messages.
    pub fn agent_tag(&self) -> &'static str {
        match self {
            Self::Report => "REPORT_AGENT",
            Self::Product => "PRODUCT_AGENT",
            Self::Document => "DOCUMENT_AGENT",
        }
    }

    pub fn from_agent_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.agent_tag() == tag)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored turn in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Owning session
    pub session_id: String,

    /// Position in the session log, starting at 1
    pub index: i64,

    pub message_type: MessageType,

    /// Which responder produced this message (AGENT messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,

    pub content: String,

    /// Open metadata bag (file reference, routing stats, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// The routing message this reply answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// The report this message refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A message that has not been appended yet.
///
/// The store assigns `id`, `index` and `created_at` on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub message_type: MessageType,
    pub destination: Option<Destination>,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub parent_id: Option<String>,
    pub report_id: Option<String>,
}

impl NewMessage {
    fn with_type(session_id: &str, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_type,
            destination: None,
            content: content.into(),
            metadata: serde_json::Map::new(),
            parent_id: None,
            report_id: None,
        }
    }

    /// A turn written by the end user.
    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::with_type(session_id, MessageType::User, content)
    }

    /// A reply from the given responder.
    pub fn agent(session_id: &str, destination: Destination, content: impl Into<String>) -> Self {
        let mut msg = Self::with_type(session_id, MessageType::Agent, content);
        msg.destination = Some(destination);
        msg
    }

    /// A routing record.
    pub fn orchestrator(session_id: &str, content: impl Into<String>) -> Self {
        Self::with_type(session_id, MessageType::Orchestrator, content)
    }

    /// A user-visible failure.
    pub fn error(session_id: &str, content: impl Into<String>) -> Self {
        Self::with_type(session_id, MessageType::Error, content)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_report(mut self, report_id: Option<String>) -> Self {
        self.report_id = report_id;
        self
    }

    /// Materialize into a stored message at `index`.
    pub fn into_message(self, index: i64) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id,
            index,
            message_type: self.message_type,
            destination: self.destination,
            content: self.content,
            metadata: self.metadata,
            parent_id: self.parent_id,
            report_id: self.report_id,
            created_at: Utc::now(),
        }
    }
}

/// Build a metadata map from `key => value` pairs.
#[macro_export]
macro_rules! metadata {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::__serde_json::Map::new();
        $( map.insert(String::from($key), $crate::__serde_json::json!($value)); )*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_str() {
        for t in [
            MessageType::User,
            MessageType::Agent,
            MessageType::Orchestrator,
            MessageType::Error,
        ] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("assistant"), None);
    }

    #[test]
    fn destination_agent_tags() {
        assert_eq!(Destination::Report.agent_tag(), "REPORT_AGENT");
        assert_eq!(
            Destination::from_agent_tag("PRODUCT_AGENT"),
            Some(Destination::Product)
        );
        assert_eq!(Destination::from_agent_tag("UNKNOWN"), None);
    }

    #[test]
    fn new_agent_message_carries_destination() {
        let msg = NewMessage::agent("s1", Destination::Document, "Here is what I found")
            .with_parent("m-9")
            .into_message(4);
        assert_eq!(msg.index, 4);
        assert_eq!(msg.message_type, MessageType::Agent);
        assert_eq!(msg.destination, Some(Destination::Document));
        assert_eq!(msg.parent_id.as_deref(), Some("m-9"));
    }

    #[test]
    fn metadata_macro_builds_map() {
        let map = metadata! { "has_file" => true, "file_name" => "scan.pdf" };
        assert_eq!(map["has_file"], serde_json::json!(true));
        assert_eq!(map["file_name"], serde_json::json!("scan.pdf"));
    }

    #[test]
    fn message_serializes_type_in_upper_case() {
        let msg = NewMessage::user("s1", "hello").into_message(1);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"USER\""));
        assert!(!json.contains("parent_id"));
    }
}
