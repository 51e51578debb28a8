//! Shared test helpers for pipeline and worker tests.

use std::sync::Arc;
use std::sync::Mutex;

use carebridge_config::{AnalysisConfig, ModelsConfig};
use async_trait::async_trait;
use carebridge_core::error::{ProviderError, StoreError};
use carebridge_core::message::{Message, NewMessage};
use carebridge_core::provider::{Provider, ProviderRequest, ProviderResponse};
use carebridge_core::report::{Analysis, AnalysisStatus, Report, ReportQuery, Upload};
use carebridge_core::session::{Session, Summary, SummaryKind};
use carebridge_core::{FileStore, RecordStore};
use carebridge_store::{InMemoryFileStore, InMemoryStore};

use crate::pipeline::AnalysisPipeline;

/// A mock provider that replays scripted replies in order and records every
/// request it receives. Once the script runs out it answers with an API error.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn models(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.model).collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "no scripted reply left".into(),
            });
        }
        replies.remove(0).map(|text| ProviderResponse::text(text, model))
    }
}

pub fn rate_limited() -> Result<String, ProviderError> {
    Err(ProviderError::RateLimited { retry_after_secs: 5 })
}

pub fn analysis_json(category: &str, summary: &str) -> Result<String, ProviderError> {
    Ok(format!(
        r#"{{"category": "{category}", "summary": "{summary}", "keyFindings": ["{summary} finding"], "recommendations": ["Discuss with your doctor"], "labValues": [], "abnormalFindings": []}}"#
    ))
}

pub struct Fixture {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryStore>,
    pub files: Arc<InMemoryFileStore>,
    pub pipeline: Arc<AnalysisPipeline>,
}

/// A pipeline over in-memory stores with no delay between chunk calls.
pub fn fixture(replies: Vec<Result<String, ProviderError>>, config: AnalysisConfig) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    build_fixture(replies, config, store.clone(), store)
}

/// Like [`fixture`], but every `complete_report` call fails with a store error.
pub fn flaky_fixture(replies: Vec<Result<String, ProviderError>>) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let flaky = Arc::new(FailingCompletionStore {
        inner: store.clone(),
    });
    build_fixture(replies, fast_config(), store, flaky)
}

fn build_fixture(
    replies: Vec<Result<String, ProviderError>>,
    config: AnalysisConfig,
    store: Arc<InMemoryStore>,
    pipeline_store: Arc<dyn RecordStore>,
) -> Fixture {
    let provider = Arc::new(ScriptedProvider::new(replies));
    let files = Arc::new(InMemoryFileStore::new());
    let models = ModelsConfig {
        primary: "primary-model".into(),
        fallback: "fallback-model".into(),
        ..ModelsConfig::default()
    };
    let pipeline = Arc::new(AnalysisPipeline::new(
        provider.clone(),
        pipeline_store,
        files.clone(),
        &models,
        config,
    ));
    Fixture {
        provider,
        store,
        files,
        pipeline,
    }
}

pub fn fast_config() -> AnalysisConfig {
    AnalysisConfig {
        chunk_delay_ms: 0,
        ..AnalysisConfig::default()
    }
}

impl Fixture {
    /// Store an upload and insert its PENDING report, without enqueueing.
    pub async fn pending_report(&self, upload: Upload) -> Report {
        let storage_ref = self
            .files
            .save(&upload.original_name, &upload.bytes)
            .await
            .unwrap();
        let report = Report::pending("user-1", None, &upload, storage_ref);
        self.store.insert_report(report).await.unwrap()
    }
}

/// Delegates to an in-memory store but refuses to complete reports.
pub struct FailingCompletionStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl RecordStore for FailingCompletionStore {
    fn name(&self) -> &str {
        "failing_completion"
    }

    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, StoreError> {
        self.inner.list_sessions(user_id, limit).await
    }

    async fn set_session_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        self.inner.set_session_title(id, title).await
    }

    async fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        self.inner.touch_session(id).await
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_session(id).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.inner.append_message(message).await
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.inner.recent_messages(session_id, limit).await
    }

    async fn messages_in_range(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.messages_in_range(session_id, from, to).await
    }

    async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError> {
        self.inner.count_messages(session_id).await
    }

    async fn referenced_report_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        self.inner.referenced_report_ids(session_id).await
    }

    async fn insert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        self.inner.insert_summary(summary).await
    }

    async fn upsert_summary(&self, summary: Summary) -> Result<Summary, StoreError> {
        self.inner.upsert_summary(summary).await
    }

    async fn latest_summary(
        &self,
        session_id: &str,
        kind: SummaryKind,
    ) -> Result<Option<Summary>, StoreError> {
        self.inner.latest_summary(session_id, kind).await
    }

    async fn insert_report(&self, report: Report) -> Result<Report, StoreError> {
        self.inner.insert_report(report).await
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        self.inner.get_report(id).await
    }

    async fn list_reports(&self, user_id: &str, query: &ReportQuery) -> Result<Vec<Report>, StoreError> {
        self.inner.list_reports(user_id, query).await
    }

    async fn count_reports(
        &self,
        user_id: &str,
        status: Option<AnalysisStatus>,
    ) -> Result<usize, StoreError> {
        self.inner.count_reports(user_id, status).await
    }

    async fn pending_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        self.inner.pending_reports(limit).await
    }

    async fn processing_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        self.inner.processing_reports(limit).await
    }

    async fn claim_report(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.claim_report(id).await
    }

    async fn complete_report(
        &self,
        _id: &str,
        _analysis: &Analysis,
        _storage_ref: &str,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Storage("disk I/O error".into()))
    }

    async fn fail_report(&self, id: &str, reason: &str) -> Result<bool, StoreError> {
        self.inner.fail_report(id, reason).await
    }
}
