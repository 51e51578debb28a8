//! RecordStore trait: keyed persistence for sessions, messages, summaries
//! and reports.
//!
//! The store owns two invariants that callers rely on:
//! - message indexes are assigned inside [`RecordStore::append_message`], so
//!   each session's log is gapless and starts at 1;
//! - report status changes are compare-and-swap, so a report can only move
//!   forward through its lifecycle and only one analysis run can claim it.
//!
//! Implementations: SQLite, in-memory (for testing).

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Message, NewMessage};
use crate::report::{Analysis, AnalysisStatus, Report, ReportQuery};
use crate::session::{Session, Summary, SummaryKind};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    // --- Sessions ---

    async fn create_session(&self, session: Session) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// A user's sessions, most recently updated first.
    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, StoreError>;

    async fn set_session_title(&self, id: &str, title: &str) -> Result<(), StoreError>;

    /// Bump `updated_at` to now.
    async fn touch_session(&self, id: &str) -> Result<(), StoreError>;

    /// Delete a session with its messages and summaries. Returns whether it existed.
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;

    // --- Messages ---

    /// Append a message at the next index of its session.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Up to `limit` messages, most recent first.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Messages with `from <= index <= to`, oldest first.
    async fn messages_in_range(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Message>, StoreError>;

    async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError>;

    /// Distinct report ids referenced by the session's messages.
    async fn referenced_report_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError>;

    // --- Summaries ---

    async fn insert_summary(&self, summary: Summary) -> Result<Summary, StoreError>;

    /// Replace the current summary of `summary.kind` for the session, or insert one.
    async fn upsert_summary(&self, summary: Summary) -> Result<Summary, StoreError>;

    /// The summary of `kind` with the highest `to_index`.
    async fn latest_summary(
        &self,
        session_id: &str,
        kind: SummaryKind,
    ) -> Result<Option<Summary>, StoreError>;

    // --- Reports ---

    async fn insert_report(&self, report: Report) -> Result<Report, StoreError>;

    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError>;

    /// A user's reports matching `query`, newest upload first.
    async fn list_reports(&self, user_id: &str, query: &ReportQuery) -> Result<Vec<Report>, StoreError>;

    async fn count_reports(
        &self,
        user_id: &str,
        status: Option<AnalysisStatus>,
    ) -> Result<usize, StoreError>;

    /// Reports still waiting for a worker, oldest first.
    async fn pending_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError>;

    /// Reports currently claimed by a worker, oldest first.
    async fn processing_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError>;

    /// Move PENDING → PROCESSING. Returns `false` if the report was not PENDING.
    async fn claim_report(&self, id: &str) -> Result<bool, StoreError>;

    /// Move PROCESSING → COMPLETED, storing the analysis and final file location.
    async fn complete_report(
        &self,
        id: &str,
        analysis: &Analysis,
        storage_ref: &str,
    ) -> Result<bool, StoreError>;

    /// Move PROCESSING → FAILED with a short reason as the summary.
    async fn fail_report(&self, id: &str, reason: &str) -> Result<bool, StoreError>;
}
