//! The per-turn glue.
//!
//! ```text
//! USER message ─► classify ─┬─ report ──► [ingest ─► bounded wait] ─► report responder
//!                           ├─ product ─► context + expanded query ─► product responder
//!                           └─ document ► context + expanded query ─► document responder
//! ```
//!
//! Every step is persisted through [`ChatHistory`]: the user's turn, an
//! ORCHESTRATOR routing record, then the AGENT (or ERROR) reply linked to
//! that record. Responder and analysis failures become reply turns; only
//! store failures surface as errors.

use std::collections::HashMap;
use std::sync::Arc;

use carebridge_analysis::AnalysisService;
use carebridge_config::{AppConfig, PollingConfig};
use carebridge_core::error::StoreError;
use carebridge_core::message::{Destination, Message, NewMessage};
use carebridge_core::metadata;
use carebridge_core::provider::Provider;
use carebridge_core::report::{AnalysisStatus, ReportQuery, ReportStatus, Upload};
use carebridge_core::responder::{AgentContext, Responder, ResponderRequest};
use carebridge_core::session::{MAX_TITLE_CHARS, Session};
use carebridge_core::store::RecordStore;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, user_has_completed_reports};
use crate::context::ContextAssembler;
use crate::error::AgentError;
use crate::history::ChatHistory;
use crate::responders::{CompletionResponder, ReportResponder};
use crate::summary::SummaryEngine;

/// How far back `notify_completed_reports` looks for finished analyses.
const NOTIFY_WINDOW_HOURS: i64 = 24;

const RESPONDER_ERROR_ANSWER: &str =
    "I'm sorry, I couldn't put an answer together right now. Please try again in a moment.";

const REPORT_ERROR_ANSWER: &str =
    "I encountered an error while analyzing your reports. Please try again or contact support.";

const SIGN_IN_ANSWER: &str =
    "Uploading medical reports needs a signed-in account. Please sign in and upload the file again.";

/// Retrieval statistics attached to every reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextStats {
    pub total_available: usize,
    pub filtered: usize,
    pub has_summary: bool,
}

impl From<&AgentContext> for ContextStats {
    fn from(context: &AgentContext) -> Self {
        Self {
            total_available: context.total_available,
            filtered: context.filtered,
            has_summary: context.has_summary(),
        }
    }
}

/// The result of one turn, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub answer: String,
    pub destination: Destination,
    /// The stored AGENT or ERROR message
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_status: Option<AnalysisStatus>,
    /// The upload is still being analyzed; ask again later
    pub analysis_timeout: bool,
    pub error: bool,
    pub context_stats: ContextStats,
}

impl TurnReply {
    fn new(message: &Message, destination: Destination, context: &AgentContext) -> Self {
        Self {
            answer: message.content.clone(),
            destination,
            message_id: message.id.clone(),
            report_id: None,
            report_status: None,
            analysis_timeout: false,
            error: false,
            context_stats: ContextStats::from(context),
        }
    }
}

/// How an interactive wait on an upload ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Completed(ReportStatus),
    Failed(ReportStatus),
    /// Every polling attempt saw the report still in flight
    TimedOut,
    /// The caller's token fired before the analysis finished
    Cancelled,
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    history: ChatHistory,
    classifier: Classifier,
    context: ContextAssembler,
    analysis: AnalysisService,
    responders: HashMap<Destination, Arc<dyn Responder>>,
    polling: PollingConfig,
}

impl Orchestrator {
    /// Wire the stock components from config. Every component shares `provider`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn Provider>,
        analysis: AnalysisService,
        config: &AppConfig,
    ) -> Self {
        let summaries = Arc::new(SummaryEngine::new(
            provider.clone(),
            store.clone(),
            &config.models.summary,
            config.summary.clone(),
        ));
        let responders: [Arc<dyn Responder>; 3] = [
            Arc::new(ReportResponder::new(
                provider.clone(),
                store.clone(),
                &config.models.responder,
            )),
            Arc::new(CompletionResponder::product(
                provider.clone(),
                &config.models.responder,
            )),
            Arc::new(CompletionResponder::document(
                provider.clone(),
                &config.models.responder,
            )),
        ];

        Self {
            history: ChatHistory::new(store.clone(), summaries),
            classifier: Classifier::new(provider, &config.models.router, config.router.clone()),
            context: ContextAssembler::new(store.clone(), config.context.clone()),
            store,
            analysis,
            responders: responders
                .into_iter()
                .map(|r| (r.destination(), r))
                .collect(),
            polling: config.polling.clone(),
        }
    }

    /// Replace the responder for its destination.
    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responders.insert(responder.destination(), responder);
        self
    }

    pub fn summaries(&self) -> &Arc<SummaryEngine> {
        self.history.summaries()
    }

    pub fn analysis(&self) -> &AnalysisService {
        &self.analysis
    }

    // ── Turns ─────────────────────────────────────────────────────────

    /// Handle one user turn end to end.
    ///
    /// `shutdown` only cuts the wait on an upload short; the analysis itself
    /// keeps running in the worker pool.
    pub async fn handle_query(
        &self,
        session_id: &str,
        query: &str,
        file: Option<Upload>,
        shutdown: &CancellationToken,
    ) -> Result<TurnReply, AgentError> {
        let session = self.session(session_id).await?;

        let mut user_message = NewMessage::user(session_id, query);
        if let Some(upload) = &file {
            user_message = user_message.with_metadata(metadata! {
                "has_file" => true,
                "file_name" => upload.original_name,
                "file_size" => upload.size(),
                "mime_type" => upload.mime_type,
            });
        }
        let saved = self.history.save_message(user_message).await?;

        let mut recent = self.context.classification_history(session_id).await?;
        recent.retain(|m| m.id != saved.id);
        let has_reports = user_has_completed_reports(self.store.as_ref(), &session).await?;
        let destination = self
            .classifier
            .classify(query, &recent, file.is_some(), has_reports)
            .await;
        info!(
            session_id = %session_id,
            destination = %destination,
            has_file = file.is_some(),
            has_reports,
            "Turn routed"
        );

        match destination {
            Destination::Report => self.report_turn(&session, query, file, shutdown).await,
            other => self.retrieval_turn(&session, other, query).await,
        }
    }

    async fn retrieval_turn(
        &self,
        session: &Session,
        destination: Destination,
        query: &str,
    ) -> Result<TurnReply, AgentError> {
        let context = self.context_for(&session.id, destination).await?;
        let routing = self.record_routing(&session.id, destination, &context, false).await?;
        let expanded = self
            .context
            .expand_query(&session.id, destination, query)
            .await?;

        let request = ResponderRequest {
            destination,
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            query: query.to_string(),
            expanded_query: expanded.clone(),
            context: context.clone(),
        };
        match self.responder(destination)?.respond(request).await {
            Ok(reply) => {
                let mut metadata = reply.metadata;
                metadata.insert("expanded_query".into(), serde_json::json!(expanded));
                let message = self
                    .history
                    .save_message(
                        NewMessage::agent(&session.id, destination, reply.answer)
                            .with_metadata(metadata)
                            .with_parent(&routing.id),
                    )
                    .await?;
                Ok(TurnReply::new(&message, destination, &context))
            }
            Err(e) => {
                warn!(session_id = %session.id, destination = %destination, error = %e, "Responder failed");
                let message = self
                    .history
                    .save_message(
                        NewMessage::error(&session.id, RESPONDER_ERROR_ANSWER)
                            .with_metadata(metadata! {
                                "destination" => destination.as_str(),
                                "error" => e.to_string(),
                            })
                            .with_parent(&routing.id),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, destination, &context);
                turn.error = true;
                Ok(turn)
            }
        }
    }

    async fn report_turn(
        &self,
        session: &Session,
        query: &str,
        file: Option<Upload>,
        shutdown: &CancellationToken,
    ) -> Result<TurnReply, AgentError> {
        let context = self.context_for(&session.id, Destination::Report).await?;
        let routing = self
            .record_routing(&session.id, Destination::Report, &context, file.is_some())
            .await?;

        let Some(upload) = file else {
            return self
                .answer_from_reports(session, query, context, &routing, None)
                .await;
        };

        let Some(user_id) = session.user_id.as_deref() else {
            let message = self
                .history
                .save_message(NewMessage::error(&session.id, SIGN_IN_ANSWER).with_parent(&routing.id))
                .await?;
            let mut turn = TurnReply::new(&message, Destination::Report, &context);
            turn.error = true;
            return Ok(turn);
        };

        let file_name = upload.original_name.clone();
        let report_id = match self
            .analysis
            .ingest(upload, user_id, Some(session.id.clone()))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(session_id = %session.id, file = %file_name, error = %e, "Ingest failed");
                let answer = format!(
                    "I encountered an issue processing your report: {e}. Please try again or contact support."
                );
                let message = self
                    .history
                    .save_message(
                        NewMessage::agent(&session.id, Destination::Report, answer)
                            .with_metadata(metadata! { "error" => true, "file_name" => file_name })
                            .with_parent(&routing.id),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, Destination::Report, &context);
                turn.error = true;
                return Ok(turn);
            }
        };

        match self.wait_for_analysis(&report_id, shutdown).await? {
            WaitOutcome::Completed(_) => {
                let question = format!(
                    "Please provide a comprehensive analysis of my medical report \"{file_name}\" \
                     that was just processed. Include key findings, lab values, abnormalities, \
                     and recommendations."
                );
                self.answer_from_reports(session, &question, context, &routing, Some(report_id))
                    .await
            }
            WaitOutcome::Failed(status) => {
                let reason = status.summary.unwrap_or_else(|| "Processing failed".into());
                let answer = format!(
                    "I couldn't analyze your report \"{file_name}\". {reason}. \
                     Please try uploading the file again."
                );
                let message = self
                    .history
                    .save_message(
                        NewMessage::error(&session.id, answer)
                            .with_metadata(metadata! { "file_name" => file_name, "report_id" => report_id })
                            .with_parent(&routing.id)
                            .with_report(Some(report_id.clone())),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, Destination::Report, &context);
                turn.report_id = Some(report_id);
                turn.report_status = Some(AnalysisStatus::Failed);
                turn.error = true;
                Ok(turn)
            }
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                let answer = format!(
                    "Your medical report \"{file_name}\" has been uploaded successfully and is being \
                     analyzed. The detailed analysis is taking longer than expected. I'll have the \
                     results for you shortly; ask me about it again in a little while. You can \
                     continue asking other questions in the meantime."
                );
                // no report_id here, so notify_completed_reports still announces the result
                let message = self
                    .history
                    .save_message(
                        NewMessage::agent(&session.id, Destination::Report, answer)
                            .with_metadata(metadata! {
                                "pending_report_id" => report_id,
                                "analysis_timeout" => true,
                                "file_name" => file_name,
                            })
                            .with_parent(&routing.id),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, Destination::Report, &context);
                turn.report_id = Some(report_id);
                turn.report_status = Some(AnalysisStatus::Processing);
                turn.analysis_timeout = true;
                Ok(turn)
            }
        }
    }

    /// Ask the report responder, linking the reply to `report_id` when the
    /// turn is about a fresh upload.
    async fn answer_from_reports(
        &self,
        session: &Session,
        query: &str,
        context: AgentContext,
        routing: &Message,
        report_id: Option<String>,
    ) -> Result<TurnReply, AgentError> {
        let request = ResponderRequest {
            destination: Destination::Report,
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            query: query.to_string(),
            expanded_query: query.to_string(),
            context: context.clone(),
        };

        match self.responder(Destination::Report)?.respond(request).await {
            Ok(reply) => {
                let linked = report_id
                    .clone()
                    .or_else(|| reply.reports_referenced.first().cloned());
                let mut metadata = reply.metadata;
                metadata.insert(
                    "reports_referenced".into(),
                    serde_json::json!(reply.reports_referenced),
                );
                let message = self
                    .history
                    .save_message(
                        NewMessage::agent(&session.id, Destination::Report, reply.answer)
                            .with_metadata(metadata)
                            .with_parent(&routing.id)
                            .with_report(linked.clone()),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, Destination::Report, &context);
                turn.report_status = report_id.is_some().then_some(AnalysisStatus::Completed);
                turn.report_id = linked;
                Ok(turn)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Report responder failed");
                let message = self
                    .history
                    .save_message(
                        NewMessage::agent(&session.id, Destination::Report, REPORT_ERROR_ANSWER)
                            .with_metadata(metadata! { "error" => true })
                            .with_parent(&routing.id)
                            .with_report(report_id.clone()),
                    )
                    .await?;
                let mut turn = TurnReply::new(&message, Destination::Report, &context);
                turn.report_status = report_id.is_some().then_some(AnalysisStatus::Completed);
                turn.report_id = report_id;
                turn.error = true;
                Ok(turn)
            }
        }
    }

    /// Poll the report's status every `polling.interval` until it is terminal,
    /// `polling.max_attempts` run out, or `shutdown` fires.
    pub async fn wait_for_analysis(
        &self,
        report_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<WaitOutcome, AgentError> {
        for attempt in 1..=self.polling.max_attempts {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(report_id = %report_id, attempt, "Analysis wait cancelled");
                    return Ok(WaitOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.polling.interval()) => {}
            }

            let Some(status) = self.analysis.status(report_id).await? else {
                return Err(StoreError::NotFound {
                    entity: "report",
                    id: report_id.to_string(),
                }
                .into());
            };
            debug!(report_id = %report_id, attempt, status = %status.status, "Polled analysis status");
            match status.status {
                AnalysisStatus::Completed => return Ok(WaitOutcome::Completed(status)),
                AnalysisStatus::Failed => return Ok(WaitOutcome::Failed(status)),
                AnalysisStatus::Pending | AnalysisStatus::Processing => {}
            }
        }
        info!(
            report_id = %report_id,
            attempts = self.polling.max_attempts,
            "Analysis still running, ending the wait"
        );
        Ok(WaitOutcome::TimedOut)
    }

    /// Post an "Analysis Complete" message for each of the user's reports
    /// that finished in the last day and that this session has not
    /// discussed yet. Returns the posted messages.
    pub async fn notify_completed_reports(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        let session = self.session(session_id).await?;
        let Some(user_id) = session.user_id.as_deref() else {
            return Ok(Vec::new());
        };

        let query = ReportQuery {
            status: Some(AnalysisStatus::Completed),
            uploaded_after: Some(Utc::now() - chrono::Duration::hours(NOTIFY_WINDOW_HOURS)),
            ..ReportQuery::default()
        };
        let reports = self.store.list_reports(user_id, &query).await?;
        if reports.is_empty() {
            return Ok(Vec::new());
        }
        let referenced = self.store.referenced_report_ids(session_id).await?;

        let mut posted = Vec::new();
        for report in reports.into_iter().filter(|r| !referenced.contains(&r.id)) {
            let context = self.context_for(session_id, Destination::Report).await?;
            let request = ResponderRequest {
                destination: Destination::Report,
                session_id: session_id.to_string(),
                user_id: session.user_id.clone(),
                query: format!(
                    "Analysis complete for {}. Please provide key insights and any recommendations.",
                    report.original_name
                ),
                expanded_query: report.original_name.clone(),
                context,
            };
            let reply = match self.responder(Destination::Report)?.respond(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(session_id = %session_id, report_id = %report.id, error = %e, "Could not announce completed report");
                    continue;
                }
            };

            let content = format!("Analysis Complete for {}\n\n{}", report.original_name, reply.answer);
            let message = self
                .history
                .save_message(
                    NewMessage::agent(session_id, Destination::Report, content)
                        .with_metadata(metadata! {
                            "auto_generated" => true,
                            "report_id" => report.id,
                            "reports_referenced" => reply.reports_referenced,
                        })
                        .with_report(Some(report.id.clone())),
                )
                .await?;
            info!(session_id = %session_id, report_id = %report.id, "Completed report announced");
            posted.push(message);
        }
        Ok(posted)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub async fn create_session(&self, user_id: Option<String>) -> Result<Session, AgentError> {
        let session = self.store.create_session(Session::new(user_id)).await?;
        info!(session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session, AgentError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AgentError::InvalidTitle("title cannot be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(AgentError::InvalidTitle(format!(
                "title is longer than {MAX_TITLE_CHARS} characters"
            )));
        }
        self.session(session_id).await?;
        self.store.set_session_title(session_id, title).await?;
        self.session(session_id).await
    }

    /// Delete a session with its messages and summaries.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), AgentError> {
        if !self.store.delete_session(session_id).await? {
            return Err(AgentError::SessionNotFound(session_id.to_string()));
        }
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// A user's sessions, most recently active first.
    pub async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, AgentError> {
        Ok(self.store.list_sessions(user_id, limit).await?)
    }

    /// The newest `limit` messages of a session, oldest first.
    pub async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, AgentError> {
        self.session(session_id).await?;
        Ok(self.history.recent(session_id, limit).await?)
    }

    // ── Helpers ───────────────────────────────────────────────────────

    async fn session(&self, session_id: &str) -> Result<Session, AgentError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    fn responder(&self, destination: Destination) -> Result<&Arc<dyn Responder>, AgentError> {
        self.responders
            .get(&destination)
            .ok_or(AgentError::MissingResponder(destination))
    }

    async fn context_for(
        &self,
        session_id: &str,
        destination: Destination,
    ) -> Result<AgentContext, StoreError> {
        self.context
            .get_context(session_id, Some(destination), self.context.config().max_messages)
            .await
    }

    async fn record_routing(
        &self,
        session_id: &str,
        destination: Destination,
        context: &AgentContext,
        has_file: bool,
    ) -> Result<Message, StoreError> {
        self.history
            .save_message(
                NewMessage::orchestrator(session_id, format!("Routing to {destination} agent"))
                    .with_metadata(metadata! {
                        "destination" => destination.as_str(),
                        "has_file" => has_file,
                        "context_messages" => context.filtered,
                        "total_available" => context.total_available,
                        "has_summary" => context.has_summary(),
                    }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FnProvider;
    use carebridge_analysis::AnalysisPipeline;
    use carebridge_config::ModelsConfig;
    use carebridge_core::error::ProviderError;
    use carebridge_core::message::MessageType;
    use carebridge_core::provider::ProviderRequest;
    use carebridge_store::{InMemoryFileStore, InMemoryStore};
    use std::time::Duration;

    const LAB_TEXT: &str = "Complete blood count. Hemoglobin 10.2 g/dL, below the reference range. \
        Ferritin 8 ng/mL, low. White cell count within normal limits. Platelets normal.";

    const ANALYSIS_JSON: &str = r#"{"category": "investigations_reports", "summary": "Mild anemia with low ferritin", "keyFindings": ["Low hemoglobin"], "recommendations": ["Iron studies"], "labValues": [], "abnormalFindings": ["Ferritin 8 ng/mL"]}"#;

    const RESPONDER_ANSWER: &str = "Your ferritin is low, which suggests iron deficiency.";

    struct Harness {
        orchestrator: Orchestrator,
        provider: Arc<FnProvider>,
        session: Session,
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.models = ModelsConfig {
            primary: "primary".into(),
            fallback: "fallback".into(),
            router: "router".into(),
            summary: "summary".into(),
            responder: "responder".into(),
            ..ModelsConfig::default()
        };
        config.polling = PollingConfig {
            interval_ms: 100,
            max_attempts: 50,
        };
        config.analysis.chunk_delay_ms = 0;
        config
    }

    fn standard_replies(request: &ProviderRequest) -> Result<String, ProviderError> {
        match request.model.as_str() {
            "router" => Ok("product".into()),
            "primary" => Ok(ANALYSIS_JSON.into()),
            "responder" => Ok(RESPONDER_ANSWER.into()),
            other => Err(ProviderError::NotConfigured(other.to_string())),
        }
    }

    async fn harness(
        config: AppConfig,
        replies: impl Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Harness {
        let provider = Arc::new(FnProvider::new(replies));
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Arc::new(AnalysisPipeline::new(
            provider.clone(),
            store.clone(),
            Arc::new(InMemoryFileStore::new()),
            &config.models,
            config.analysis.clone(),
        ));
        let (analysis, _workers) = AnalysisService::start(pipeline, CancellationToken::new());
        let orchestrator = Orchestrator::new(store, provider.clone(), analysis, &config);
        let session = orchestrator
            .create_session(Some("user-1".into()))
            .await
            .unwrap();
        Harness {
            orchestrator,
            provider,
            session,
        }
    }

    fn lab_upload() -> Upload {
        Upload::new("labs.txt", "text/plain", LAB_TEXT.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn product_turn_is_routed_and_persisted() {
        let h = harness(test_config(), standard_replies).await;
        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "What can I take for nausea?", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.destination, Destination::Product);
        assert_eq!(reply.answer, RESPONDER_ANSWER);
        assert!(!reply.error);

        let log = h.orchestrator.history(&h.session.id, 10).await.unwrap();
        let types: Vec<MessageType> = log.iter().map(|m| m.message_type).collect();
        assert_eq!(
            types,
            vec![MessageType::User, MessageType::Orchestrator, MessageType::Agent]
        );
        assert_eq!(log[1].content, "Routing to product agent");
        assert_eq!(log[2].parent_id.as_deref(), Some(log[1].id.as_str()));
        assert_eq!(log[2].destination, Some(Destination::Product));

        let sent = h.provider.requests_for("responder");
        assert!(sent[0].messages.last().unwrap().content.starts_with("What can I take for nausea?"));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_waits_for_analysis_and_answers_from_the_report() {
        let h = harness(test_config(), standard_replies).await;
        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "Here are my labs", Some(lab_upload()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.destination, Destination::Report);
        assert_eq!(reply.report_status, Some(AnalysisStatus::Completed));
        assert_eq!(reply.answer, RESPONDER_ANSWER);
        assert!(!reply.analysis_timeout);
        assert!(h.provider.requests_for("router").is_empty());

        let log = h.orchestrator.history(&h.session.id, 10).await.unwrap();
        assert_eq!(log[0].metadata["file_name"], serde_json::json!("labs.txt"));
        let agent = log.last().unwrap();
        assert_eq!(agent.report_id, reply.report_id);

        let prompt = &h.provider.requests_for("responder")[0].messages[1].content;
        assert!(prompt.contains("comprehensive analysis of my medical report \"labs.txt\""));
        assert!(prompt.contains("REPORT: labs.txt"));

        // later turns tell the classifier the user has reports
        h.orchestrator
            .handle_query(&h.session.id, "is my iron low?", None, &CancellationToken::new())
            .await
            .unwrap();
        let router = h.provider.requests_for("router");
        assert!(router[0].messages[0].content.contains("USER HAS UPLOADED REPORTS: YES"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_analysis_times_out_then_is_announced() {
        let mut config = test_config();
        config.analysis.max_tokens_per_request = 10;
        config.analysis.chunk_size = 60;
        config.analysis.chunk_delay_ms = 60_000;
        config.polling.max_attempts = 3;
        let h = harness(config, standard_replies).await;

        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "", Some(lab_upload()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.analysis_timeout);
        assert_eq!(reply.report_status, Some(AnalysisStatus::Processing));
        assert!(reply.answer.contains("taking longer than expected"));
        let report_id = reply.report_id.clone().unwrap();

        let log = h.orchestrator.history(&h.session.id, 10).await.unwrap();
        let pending = log.last().unwrap();
        assert_eq!(pending.report_id, None);
        assert_eq!(pending.metadata["pending_report_id"], serde_json::json!(report_id));

        // nothing to announce while the worker is still between chunks
        assert!(h.orchestrator.notify_completed_reports(&h.session.id).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(300)).await;
        let status = h.orchestrator.analysis().status(&report_id).await.unwrap().unwrap();
        assert_eq!(status.status, AnalysisStatus::Completed);

        let posted = h.orchestrator.notify_completed_reports(&h.session.id).await.unwrap();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].content.starts_with("Analysis Complete for labs.txt"));
        assert_eq!(posted[0].report_id.as_deref(), Some(report_id.as_str()));
        assert_eq!(posted[0].metadata["auto_generated"], serde_json::json!(true));

        assert!(h.orchestrator.notify_completed_reports(&h.session.id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_analysis_surfaces_an_error_turn() {
        let h = harness(test_config(), |request: &ProviderRequest| match request.model.as_str() {
            "primary" => Err(ProviderError::AuthenticationFailed("bad key".into())),
            other => Err(ProviderError::NotConfigured(other.to_string())),
        })
        .await;

        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "", Some(lab_upload()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.error);
        assert_eq!(reply.report_status, Some(AnalysisStatus::Failed));
        assert!(reply.answer.contains("Processing failed"));
        assert!(h.provider.requests_for("fallback").is_empty());

        let log = h.orchestrator.history(&h.session.id, 10).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.message_type, MessageType::Error);
        assert_eq!(last.report_id, reply.report_id);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_returns_still_processing() {
        let h = harness(test_config(), standard_replies).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "", Some(lab_upload()), &shutdown)
            .await
            .unwrap();
        assert!(reply.analysis_timeout);
        assert!(!reply.error);
        assert!(reply.report_id.is_some());
    }

    #[tokio::test]
    async fn anonymous_upload_is_refused() {
        let h = harness(test_config(), standard_replies).await;
        let anonymous = h.orchestrator.create_session(None).await.unwrap();
        let reply = h
            .orchestrator
            .handle_query(&anonymous.id, "", Some(lab_upload()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.error);
        assert!(reply.report_id.is_none());
        assert!(h.provider.requests_for("primary").is_empty());
    }

    #[tokio::test]
    async fn classification_failure_falls_back_to_document() {
        let h = harness(test_config(), |request: &ProviderRequest| match request.model.as_str() {
            "router" => Err(ProviderError::Timeout("router".into())),
            "responder" => Ok("Staging describes how far cancer has spread.".into()),
            other => Err(ProviderError::NotConfigured(other.to_string())),
        })
        .await;

        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "What is staging?", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.destination, Destination::Document);
        assert!(!reply.error);
    }

    #[tokio::test]
    async fn responder_failure_becomes_an_error_turn() {
        let h = harness(test_config(), |request: &ProviderRequest| match request.model.as_str() {
            "router" => Ok("document".into()),
            _ => Err(ProviderError::Network("connection reset".into())),
        })
        .await;

        let reply = h
            .orchestrator
            .handle_query(&h.session.id, "What is staging?", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.error);
        assert_eq!(reply.answer, RESPONDER_ERROR_ANSWER);

        let log = h.orchestrator.history(&h.session.id, 10).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.message_type, MessageType::Error);
        assert!(last.parent_id.is_some());
    }

    #[tokio::test]
    async fn session_management() {
        let h = harness(test_config(), standard_replies).await;
        let id = h.session.id.clone();

        assert!(matches!(
            h.orchestrator.rename_session(&id, "   ").await,
            Err(AgentError::InvalidTitle(_))
        ));
        assert!(matches!(
            h.orchestrator.rename_session(&id, &"x".repeat(101)).await,
            Err(AgentError::InvalidTitle(_))
        ));
        let renamed = h.orchestrator.rename_session(&id, "  Scans  ").await.unwrap();
        assert_eq!(renamed.title, "Scans");
        assert!(matches!(
            h.orchestrator.rename_session("missing", "Scans").await,
            Err(AgentError::SessionNotFound(_))
        ));

        assert_eq!(h.orchestrator.list_sessions("user-1", 10).await.unwrap().len(), 1);
        h.orchestrator.delete_session(&id).await.unwrap();
        assert!(matches!(
            h.orchestrator.delete_session(&id).await,
            Err(AgentError::SessionNotFound(_))
        ));
        assert!(matches!(
            h.orchestrator
                .handle_query(&id, "hello", None, &CancellationToken::new())
                .await,
            Err(AgentError::SessionNotFound(_))
        ));
    }
}
