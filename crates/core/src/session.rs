//! Sessions and their rolling summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to sessions until the first user turn names them.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Longest title a user may set on a session.
pub const MAX_TITLE_CHARS: usize = 100;

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// Owning user; `None` for anonymous sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub title: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh untitled session.
    pub fn new(user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }
}

/// Derive a session title from the first user turn.
///
/// Titles longer than 50 characters are cut to 47 and suffixed with "...".
pub fn title_from_first_turn(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() > 50 {
        let head: String = trimmed.chars().take(47).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// What a summary row digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Rolling digest of the conversation itself.
    #[default]
    Conversation,
    /// Digest of the user's analysed reports.
    Medical,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Medical => "medical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "medical" => Some(Self::Medical),
            _ => None,
        }
    }
}

/// A background digest covering the inclusive index range `[from_index, to_index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub session_id: String,
    pub kind: SummaryKind,
    pub from_index: i64,
    pub to_index: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(
        session_id: impl Into<String>,
        kind: SummaryKind,
        from_index: i64,
        to_index: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            kind,
            from_index,
            to_index,
            text: text.into(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Read-only view of a session's summary state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryInfo {
    pub has_summary: bool,
    pub summary: Option<String>,
    pub last_summarized_index: i64,
    pub summary_id: Option<String>,
}
