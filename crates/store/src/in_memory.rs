//! In-memory record store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use carebridge_core::error::StoreError;
use carebridge_core::message::{Message, NewMessage};
use carebridge_core::report::{Analysis, AnalysisStatus, Report, ReportQuery};
use carebridge_core::session::{Session, Summary, SummaryKind};
use carebridge_core::store::RecordStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    messages: Vec<Message>,
    summaries: Vec<Summary>,
    reports: Vec<Report>,
}

/// A record store that keeps everything in process memory.
///
/// Every operation takes the table lock for its whole duration, so index
/// assignment and status transitions are atomic.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn session_not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "session",
        id: id.to_string(),
    }
}

/// `limit == 0` means no limit.
fn page<T>(items: impl Iterator<Item = T>, offset: usize, limit: usize) -> Vec<T> {
    let items = items.skip(offset);
    if limit == 0 {
        items.collect()
    } else {
        items.take(limit).collect()
    }
}

impl Tables {
    fn report_mut(&mut self, id: &str) -> Option<&mut Report> {
        self.reports.iter_mut().find(|r| r.id == id)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.iter().any(|s| s.id == session.id) {
            return Err(StoreError::Conflict {
                entity: "session",
                id: session.id,
                reason: "already exists".into(),
            });
        }
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, StoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .iter()
            .rev()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(sessions.into_iter(), 0, limit))
    }

    async fn set_session_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| session_not_found(id))?;
        session.title = title.to_string();
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| session_not_found(id))?;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|s| s.id != id);
        if tables.sessions.len() == before {
            return Ok(false);
        }
        tables.messages.retain(|m| m.session_id != id);
        tables.summaries.retain(|s| s.session_id != id);
        Ok(true)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.iter().any(|s| s.id == message.session_id) {
            return Err(session_not_found(&message.session_id));
        }
        let next = tables
            .messages
            .iter()
            .filter(|m| m.session_id == message.session_id)
            .map(|m| m.index)
            .max()
            .unwrap_or(0)
            + 1;
        let stored = message.into_message(next);
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.index.cmp(&a.index));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn messages_in_range(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.index >= from && m.index <= to)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.index);
        Ok(messages)
    }

    async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as i64)
    }

    async fn referenced_report_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let mut ids: Vec<String> = Vec::new();
        for m in tables.messages.iter().filter(|m| m.session_id == session_id) {
            if let Some(id) = &m.report_id {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        Ok(ids)
    }

    async fn insert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.iter().any(|s| s.id == summary.session_id) {
            return Err(session_not_found(&summary.session_id));
        }
        tables.summaries.push(summary.clone());
        Ok(summary)
    }

    async fn upsert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.iter().any(|s| s.id == summary.session_id) {
            return Err(session_not_found(&summary.session_id));
        }
        tables
            .summaries
            .retain(|s| !(s.session_id == summary.session_id && s.kind == summary.kind));
        tables.summaries.push(summary.clone());
        Ok(summary)
    }

    async fn latest_summary(
        &self,
        session_id: &str,
        kind: SummaryKind,
    ) -> Result<Option<Summary>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .summaries
            .iter()
            .filter(|s| s.session_id == session_id && s.kind == kind)
            .max_by(|a, b| {
                a.to_index
                    .cmp(&b.to_index)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .cloned())
    }

    async fn insert_report(&self, report: Report) -> Result<Report, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.reports.iter().any(|r| r.id == report.id) {
            return Err(StoreError::Conflict {
                entity: "report",
                id: report.id,
                reason: "already exists".into(),
            });
        }
        tables.reports.push(report.clone());
        Ok(report)
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.reports.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reports(&self, user_id: &str, query: &ReportQuery) -> Result<Vec<Report>, StoreError> {
        let tables = self.tables.read().await;
        let mut reports: Vec<Report> = tables
            .reports
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id && query.matches(r))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(page(reports.into_iter(), query.offset, query.limit))
    }

    async fn count_reports(
        &self,
        user_id: &str,
        status: Option<AnalysisStatus>,
    ) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .reports
            .iter()
            .filter(|r| r.user_id == user_id && status.is_none_or(|s| r.status == s))
            .count())
    }

    async fn pending_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let tables = self.tables.read().await;
        let mut reports: Vec<Report> = tables
            .reports
            .iter()
            .filter(|r| r.status == AnalysisStatus::Pending)
            .cloned()
            .collect();
        reports.sort_by_key(|r| r.uploaded_at);
        Ok(page(reports.into_iter(), 0, limit))
    }

    async fn processing_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let tables = self.tables.read().await;
        let mut reports: Vec<Report> = tables
            .reports
            .iter()
            .filter(|r| r.status == AnalysisStatus::Processing)
            .cloned()
            .collect();
        reports.sort_by_key(|r| r.uploaded_at);
        Ok(page(reports.into_iter(), 0, limit))
    }

    async fn claim_report(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.report_mut(id) {
            Some(r) if r.status == AnalysisStatus::Pending => {
                r.status = AnalysisStatus::Processing;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_report(
        &self,
        id: &str,
        analysis: &Analysis,
        storage_ref: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.report_mut(id) {
            Some(r) if r.status == AnalysisStatus::Processing => {
                r.status = AnalysisStatus::Completed;
                r.category = analysis.category;
                r.summary = analysis.summary.clone();
                r.key_findings = analysis.key_findings.clone();
                r.recommendations = analysis.recommendations.clone();
                r.lab_values = analysis.lab_values.clone();
                r.abnormal_findings = analysis.abnormal_findings.clone();
                r.storage_ref = storage_ref.to_string();
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_report(&self, id: &str, reason: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.report_mut(id) {
            Some(r) if r.status == AnalysisStatus::Processing => {
                r.status = AnalysisStatus::Failed;
                r.summary = Some(reason.to_string());
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
