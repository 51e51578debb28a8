//! SQLite record store.
//!
//! Uses a single SQLite database file with four tables:
//! - `sessions`: chat sessions
//! - `messages`: the per-session log, unique on `(session_id, idx)`
//! - `summaries`: rolling and medical digests
//! - `reports`: uploaded documents and their analysis
//!
//! Message indexes are assigned by a single `INSERT ... SELECT MAX(idx) + 1`
//! statement and report transitions are conditional `UPDATE`s, so both stay
//! atomic under concurrent writers.

use async_trait::async_trait;
use carebridge_core::error::StoreError;
use carebridge_core::message::{Destination, Message, MessageType, NewMessage};
use carebridge_core::report::{Analysis, AnalysisStatus, Report, ReportCategory, ReportQuery};
use carebridge_core::session::{Session, Summary, SummaryKind};
use carebridge_core::store::RecordStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A production SQLite record store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // An in-memory database exists per connection, so pin the pool to one.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite record store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "sessions table",
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id          TEXT PRIMARY KEY NOT NULL,
                    user_id     TEXT,
                    title       TEXT NOT NULL,
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id            TEXT PRIMARY KEY NOT NULL,
                    session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    idx           INTEGER NOT NULL,
                    message_type  TEXT NOT NULL,
                    destination   TEXT,
                    content       TEXT NOT NULL,
                    metadata      TEXT NOT NULL DEFAULT '{}',
                    parent_id     TEXT,
                    report_id     TEXT,
                    created_at    TEXT NOT NULL,
                    UNIQUE (session_id, idx)
                )
                "#,
            ),
            (
                "summaries table",
                r#"
                CREATE TABLE IF NOT EXISTS summaries (
                    id          TEXT PRIMARY KEY NOT NULL,
                    session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    kind        TEXT NOT NULL,
                    from_idx    INTEGER NOT NULL,
                    to_idx      INTEGER NOT NULL,
                    text        TEXT NOT NULL,
                    metadata    TEXT NOT NULL DEFAULT '{}',
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "reports table",
                r#"
                CREATE TABLE IF NOT EXISTS reports (
                    id                 TEXT PRIMARY KEY NOT NULL,
                    user_id            TEXT NOT NULL,
                    session_id         TEXT,
                    original_name      TEXT NOT NULL,
                    storage_ref        TEXT NOT NULL,
                    file_size          INTEGER NOT NULL,
                    mime_type          TEXT NOT NULL,
                    category           TEXT NOT NULL,
                    status             TEXT NOT NULL,
                    summary            TEXT,
                    key_findings       TEXT NOT NULL DEFAULT '[]',
                    recommendations    TEXT NOT NULL DEFAULT '[]',
                    lab_values         TEXT NOT NULL DEFAULT '[]',
                    abnormal_findings  TEXT NOT NULL DEFAULT '[]',
                    uploaded_at        TEXT NOT NULL,
                    updated_at         TEXT NOT NULL
                )
                "#,
            ),
            (
                "sessions index",
                "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, updated_at DESC)",
            ),
            (
                "summaries index",
                "CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_id, kind, to_idx DESC)",
            ),
            (
                "reports index",
                "CREATE INDEX IF NOT EXISTS idx_reports_user ON reports(user_id, uploaded_at DESC)",
            ),
            (
                "reports status index",
                "CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status, uploaded_at)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
        Ok(Session {
            id: col(row, "id")?,
            user_id: col(row, "user_id")?,
            title: col(row, "title")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?),
            updated_at: parse_ts(&col::<String>(row, "updated_at")?),
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
        let type_str: String = col(row, "message_type")?;
        let message_type = MessageType::parse(&type_str)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown message type {type_str}")))?;
        let destination: Option<String> = col(row, "destination")?;
        Ok(Message {
            id: col(row, "id")?,
            session_id: col(row, "session_id")?,
            index: col(row, "idx")?,
            message_type,
            destination: destination.as_deref().and_then(parse_destination),
            content: col(row, "content")?,
            metadata: from_json(&col::<String>(row, "metadata")?),
            parent_id: col(row, "parent_id")?,
            report_id: col(row, "report_id")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?),
        })
    }

    fn row_to_summary(row: &SqliteRow) -> Result<Summary, StoreError> {
        let kind: String = col(row, "kind")?;
        Ok(Summary {
            id: col(row, "id")?,
            session_id: col(row, "session_id")?,
            kind: SummaryKind::parse(&kind).unwrap_or_default(),
            from_index: col(row, "from_idx")?,
            to_index: col(row, "to_idx")?,
            text: col(row, "text")?,
            metadata: from_json(&col::<String>(row, "metadata")?),
            created_at: parse_ts(&col::<String>(row, "created_at")?),
        })
    }

    fn row_to_report(row: &SqliteRow) -> Result<Report, StoreError> {
        let status: String = col(row, "status")?;
        let category: String = col(row, "category")?;
        let file_size: i64 = col(row, "file_size")?;
        Ok(Report {
            id: col(row, "id")?,
            user_id: col(row, "user_id")?,
            session_id: col(row, "session_id")?,
            original_name: col(row, "original_name")?,
            storage_ref: col(row, "storage_ref")?,
            file_size: file_size.max(0) as u64,
            mime_type: col(row, "mime_type")?,
            category: ReportCategory::parse_or_default(&category),
            status: AnalysisStatus::parse(&status)
                .ok_or_else(|| StoreError::QueryFailed(format!("unknown status {status}")))?,
            summary: col(row, "summary")?,
            key_findings: from_json(&col::<String>(row, "key_findings")?),
            recommendations: from_json(&col::<String>(row, "recommendations")?),
            lab_values: from_json(&col::<String>(row, "lab_values")?),
            abnormal_findings: from_json(&col::<String>(row, "abnormal_findings")?),
            uploaded_at: parse_ts(&col::<String>(row, "uploaded_at")?),
            updated_at: parse_ts(&col::<String>(row, "updated_at")?),
        })
    }
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_destination(s: &str) -> Option<Destination> {
    Destination::ALL.into_iter().find(|d| d.as_str() == s)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("serialization: {e}")))
}

fn from_json<T: DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 { -1 } else { limit as i64 }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn session_not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "session",
        id: id.to_string(),
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(ts(&session.created_at))
        .bind(ts(&session.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    entity: "session",
                    id: session.id.clone(),
                    reason: "already exists".into(),
                }
            } else {
                StoreError::Storage(format!("INSERT session failed: {e}"))
            }
        })?;

        debug!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get session: {e}")))?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ?1 ORDER BY updated_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list sessions: {e}")))?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn set_session_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(ts(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE title failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(session_not_found(id));
        }
        Ok(())
    }

    async fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(ts(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("touch session failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(session_not_found(id));
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;
        for sql in [
            "DELETE FROM messages WHERE session_id = ?1",
            "DELETE FROM summaries WHERE session_id = ?1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        }
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE session failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.get_session(&message.session_id).await?.is_none() {
            return Err(session_not_found(&message.session_id));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let metadata = to_json(&message.metadata)?;

        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, idx, message_type, destination, content,
                                  metadata, parent_id, report_id, created_at)
            SELECT ?1, ?2, COALESCE(MAX(idx), 0) + 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9
            FROM messages WHERE session_id = ?2
            RETURNING idx
            "#,
        )
        .bind(&id)
        .bind(&message.session_id)
        .bind(message.message_type.as_str())
        .bind(message.destination.map(|d| d.as_str()))
        .bind(&message.content)
        .bind(&metadata)
        .bind(&message.parent_id)
        .bind(&message.report_id)
        .bind(ts(&created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        let index: i64 = col(&row, "idx")?;
        debug!(session_id = %message.session_id, index, "Appended message");

        let mut stored = message.into_message(index);
        stored.id = id;
        stored.created_at = created_at;
        Ok(stored)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ?1 ORDER BY idx DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("recent messages: {e}")))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn messages_in_range(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ?1 AND idx BETWEEN ?2 AND ?3 ORDER BY idx ASC",
        )
        .bind(session_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("messages in range: {e}")))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("count messages: {e}")))?;
        col(&row, "n")
    }

    async fn referenced_report_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT report_id, MIN(idx) AS first_idx FROM messages
            WHERE session_id = ?1 AND report_id IS NOT NULL
            GROUP BY report_id ORDER BY first_idx
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("referenced reports: {e}")))?;
        rows.iter().map(|r| col(r, "report_id")).collect()
    }

    async fn insert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO summaries (id, session_id, kind, from_idx, to_idx, text, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.session_id)
        .bind(summary.kind.as_str())
        .bind(summary.from_index)
        .bind(summary.to_index)
        .bind(&summary.text)
        .bind(to_json(&summary.metadata)?)
        .bind(ts(&summary.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT summary failed: {e}")))?;
        Ok(summary)
    }

    async fn upsert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;
        sqlx::query("DELETE FROM summaries WHERE session_id = ?1 AND kind = ?2")
            .bind(&summary.session_id)
            .bind(summary.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE summary failed: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO summaries (id, session_id, kind, from_idx, to_idx, text, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.session_id)
        .bind(summary.kind.as_str())
        .bind(summary.from_index)
        .bind(summary.to_index)
        .bind(&summary.text)
        .bind(to_json(&summary.metadata)?)
        .bind(ts(&summary.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT summary failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok(summary)
    }

    async fn latest_summary(
        &self,
        session_id: &str,
        kind: SummaryKind,
    ) -> Result<Option<Summary>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM summaries WHERE session_id = ?1 AND kind = ?2
            ORDER BY to_idx DESC, created_at DESC LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("latest summary: {e}")))?;
        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn insert_report(&self, report: Report) -> Result<Report, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, user_id, session_id, original_name, storage_ref, file_size,
                                 mime_type, category, status, summary, key_findings,
                                 recommendations, lab_values, abnormal_findings,
                                 uploaded_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&report.id)
        .bind(&report.user_id)
        .bind(&report.session_id)
        .bind(&report.original_name)
        .bind(&report.storage_ref)
        .bind(report.file_size as i64)
        .bind(&report.mime_type)
        .bind(report.category.as_str())
        .bind(report.status.as_str())
        .bind(&report.summary)
        .bind(to_json(&report.key_findings)?)
        .bind(to_json(&report.recommendations)?)
        .bind(to_json(&report.lab_values)?)
        .bind(to_json(&report.abnormal_findings)?)
        .bind(ts(&report.uploaded_at))
        .bind(ts(&report.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    entity: "report",
                    id: report.id.clone(),
                    reason: "already exists".into(),
                }
            } else {
                StoreError::Storage(format!("INSERT report failed: {e}"))
            }
        })?;

        debug!(report_id = %report.id, user_id = %report.user_id, "Stored report");
        Ok(report)
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get report: {e}")))?;
        row.as_ref().map(Self::row_to_report).transpose()
    }

    async fn list_reports(&self, user_id: &str, query: &ReportQuery) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reports
            WHERE user_id = ?1
              AND (?2 IS NULL OR category = ?2)
              AND (?3 IS NULL OR status = ?3)
              AND (?4 IS NULL OR uploaded_at >= ?4)
            ORDER BY uploaded_at DESC, rowid DESC
            LIMIT ?5 OFFSET ?6
            "#,
        )
        .bind(user_id)
        .bind(query.category.map(|c| c.as_str()))
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.uploaded_after.as_ref().map(ts))
        .bind(sql_limit(query.limit))
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list reports: {e}")))?;
        rows.iter().map(Self::row_to_report).collect()
    }

    async fn count_reports(
        &self,
        user_id: &str,
        status: Option<AnalysisStatus>,
    ) -> Result<usize, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM reports WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("count reports: {e}")))?;
        let n: i64 = col(&row, "n")?;
        Ok(n.max(0) as usize)
    }

    async fn pending_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM reports WHERE status = 'PENDING' ORDER BY uploaded_at ASC, rowid ASC LIMIT ?1",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("pending reports: {e}")))?;
        rows.iter().map(Self::row_to_report).collect()
    }

    async fn processing_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM reports WHERE status = 'PROCESSING' ORDER BY uploaded_at ASC, rowid ASC LIMIT ?1",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("processing reports: {e}")))?;
        rows.iter().map(Self::row_to_report).collect()
    }

    async fn claim_report(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reports SET status = 'PROCESSING', updated_at = ?1 WHERE id = ?2 AND status = 'PENDING'",
        )
        .bind(ts(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("claim report failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_report(
        &self,
        id: &str,
        analysis: &Analysis,
        storage_ref: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET
                status = 'COMPLETED',
                category = ?1,
                summary = ?2,
                key_findings = ?3,
                recommendations = ?4,
                lab_values = ?5,
                abnormal_findings = ?6,
                storage_ref = ?7,
                updated_at = ?8
            WHERE id = ?9 AND status = 'PROCESSING'
            "#,
        )
        .bind(analysis.category.as_str())
        .bind(&analysis.summary)
        .bind(to_json(&analysis.key_findings)?)
        .bind(to_json(&analysis.recommendations)?)
        .bind(to_json(&analysis.lab_values)?)
        .bind(to_json(&analysis.abnormal_findings)?)
        .bind(storage_ref)
        .bind(ts(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("complete report failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_report(&self, id: &str, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reports SET status = 'FAILED', summary = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'PROCESSING'",
        )
        .bind(reason)
        .bind(ts(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("fail report failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::metadata;
    use carebridge_core::report::{LabValue, Upload};
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    async fn with_session(store: &SqliteStore) -> Session {
        store
            .create_session(Session::new(Some("user-1".into())))
            .await
            .unwrap()
    }

    fn pdf_upload(name: &str) -> Upload {
        Upload::new(name, "application/pdf", b"%PDF-1.4 test".to_vec())
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let store = test_store().await;
        let session = with_session(&store).await;
        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "New Chat");
        assert_eq!(fetched.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn duplicate_session_is_conflict() {
        let store = test_store().await;
        let session = with_session(&store).await;
        let err = store.create_session(session).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { entity: "session", .. }));
    }

    #[tokio::test]
    async fn message_round_trip_keeps_fields() {
        let store = test_store().await;
        let session = with_session(&store).await;
        let stored = store
            .append_message(
                NewMessage::agent(&session.id, Destination::Report, "Your iron is low")
                    .with_metadata(metadata! { "analysis_type" => "deficiency" })
                    .with_report(Some("r-1".into())),
            )
            .await
            .unwrap();
        assert_eq!(stored.index, 1);

        let fetched = store.recent_messages(&session.id, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        let m = &fetched[0];
        assert_eq!(m.message_type, MessageType::Agent);
        assert_eq!(m.destination, Some(Destination::Report));
        assert_eq!(m.metadata["analysis_type"], "deficiency");
        assert_eq!(m.report_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn indexes_are_per_session_and_gapless() {
        let store = test_store().await;
        let a = with_session(&store).await;
        let b = with_session(&store).await;
        for _ in 0..3 {
            store.append_message(NewMessage::user(&a.id, "a")).await.unwrap();
        }
        let first_b = store.append_message(NewMessage::user(&b.id, "b")).await.unwrap();
        assert_eq!(first_b.index, 1);
        assert_eq!(store.count_messages(&a.id).await.unwrap(), 3);

        let range = store.messages_in_range(&a.id, 1, 3).await.unwrap();
        assert_eq!(range.iter().map(|m| m.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_collide() {
        let store = Arc::new(test_store().await);
        let session = with_session(&store).await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let sid = session.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_message(NewMessage::user(&sid, format!("m{i}")))
                    .await
                    .unwrap()
                    .index
            }));
        }
        let mut indexes = Vec::new();
        for h in handles {
            indexes.push(h.await.unwrap());
        }
        indexes.sort();
        assert_eq!(indexes, (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = test_store().await;
        let err = store
            .append_message(NewMessage::user("missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn session_listing_and_rename() {
        let store = test_store().await;
        let first = with_session(&store).await;
        let second = with_session(&store).await;
        store.set_session_title(&first.id, "Iron levels").await.unwrap();

        let sessions = store.list_sessions("user-1", 10).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, first.id);
        assert_eq!(sessions[0].title, "Iron levels");
        assert_eq!(sessions[1].id, second.id);

        assert!(matches!(
            store.set_session_title("missing", "x").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_session_cascades() {
        let store = test_store().await;
        let session = with_session(&store).await;
        store.append_message(NewMessage::user(&session.id, "hi")).await.unwrap();
        store
            .insert_summary(Summary::new(&session.id, SummaryKind::Conversation, 1, 1, "s"))
            .await
            .unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert_eq!(store.count_messages(&session.id).await.unwrap(), 0);
        assert!(store
            .latest_summary(&session.id, SummaryKind::Conversation)
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn latest_summary_prefers_highest_index() {
        let store = test_store().await;
        let session = with_session(&store).await;
        for (to, text) in [(15, "first"), (30, "second")] {
            store
                .insert_summary(Summary::new(&session.id, SummaryKind::Conversation, 1, to, text))
                .await
                .unwrap();
        }
        let latest = store
            .latest_summary(&session.id, SummaryKind::Conversation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.text, "second");
        assert_eq!(latest.to_index, 30);
    }

    #[tokio::test]
    async fn report_round_trip_and_cas_transitions() {
        let store = test_store().await;
        let report = store
            .insert_report(Report::pending("user-1", None, &pdf_upload("cbc.pdf"), "pending/cbc.pdf"))
            .await
            .unwrap();

        assert_eq!(store.pending_reports(10).await.unwrap().len(), 1);
        assert!(!store.fail_report(&report.id, "too early").await.unwrap());
        assert!(store.claim_report(&report.id).await.unwrap());
        assert!(!store.claim_report(&report.id).await.unwrap());
        assert!(store.pending_reports(10).await.unwrap().is_empty());
        let claimed = store.processing_reports(0).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, report.id);

        let analysis = Analysis {
            category: ReportCategory::InvestigationsReports,
            summary: Some("Low ferritin".into()),
            key_findings: vec!["Ferritin 8 ng/mL".into()],
            lab_values: vec![LabValue {
                name: "Ferritin".into(),
                value: "8".into(),
                unit: "ng/mL".into(),
                normal: Some("15-150".into()),
                status: "low".into(),
            }],
            ..Analysis::default()
        };
        assert!(store
            .complete_report(&report.id, &analysis, "investigations_reports/cbc.pdf")
            .await
            .unwrap());

        let stored = store.get_report(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AnalysisStatus::Completed);
        assert_eq!(stored.category, ReportCategory::InvestigationsReports);
        assert_eq!(stored.lab_values[0].normal.as_deref(), Some("15-150"));
        assert_eq!(stored.storage_ref, "investigations_reports/cbc.pdf");
        assert!(store.pending_reports(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_reports_filters_by_status() {
        let store = test_store().await;
        let done = store
            .insert_report(Report::pending("user-1", None, &pdf_upload("a.pdf"), "pending/a.pdf"))
            .await
            .unwrap();
        store
            .insert_report(Report::pending("user-1", None, &pdf_upload("b.pdf"), "pending/b.pdf"))
            .await
            .unwrap();
        store
            .insert_report(Report::pending("user-2", None, &pdf_upload("c.pdf"), "pending/c.pdf"))
            .await
            .unwrap();
        store.claim_report(&done.id).await.unwrap();
        store
            .complete_report(&done.id, &Analysis::default(), "others/a.pdf")
            .await
            .unwrap();

        let all = store.list_reports("user-1", &ReportQuery::recent(10)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].original_name, "b.pdf");

        let completed = store
            .list_reports("user-1", &ReportQuery::completed(10))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);

        assert_eq!(store.count_reports("user-1", None).await.unwrap(), 2);
        assert_eq!(
            store
                .count_reports("user-1", Some(AnalysisStatus::Completed))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn referenced_reports_are_distinct() {
        let store = test_store().await;
        let session = with_session(&store).await;
        for rid in ["r-1", "r-2", "r-1"] {
            store
                .append_message(NewMessage::orchestrator(&session.id, "note").with_report(Some(rid.into())))
                .await
                .unwrap();
        }
        let ids = store.referenced_report_ids(&session.id).await.unwrap();
        assert_eq!(ids, vec!["r-1".to_string(), "r-2".to_string()]);
    }
}
