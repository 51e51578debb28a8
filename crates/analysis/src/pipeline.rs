//! The two-tier document analysis pipeline.
//!
//! One run takes a claimed (PROCESSING) report to COMPLETED or FAILED:
//!
//! 1. read the stored bytes and extract text (or an inline image);
//! 2. analyze on the primary tier, chunking text that is too large for one
//!    request;
//! 3. on a resource-limit failure, retry the whole document once on the
//!    fallback tier with a small sample;
//! 4. relocate the file under its category folder and persist the findings.

use std::sync::Arc;

use carebridge_config::{AnalysisConfig, ModelsConfig};
use carebridge_core::provider::{PromptMessage, Provider, ProviderRequest};
use carebridge_core::report::{Analysis, Report, ReportCategory};
use carebridge_core::{FileStore, ProviderError, RecordStore};
use tracing::{debug, error, info, warn};

use crate::chunking::{chunk_text, estimate_tokens};
use crate::error::AnalysisError;
use crate::extract::{DocumentContent, ExtractLimits, MediaKind, extract};
use crate::parse::{combine, parse_analysis, simplified_analysis, truncate_chars};
use crate::prompts;

const FAILURE_REASON_CHARS: usize = 200;
const ANALYSIS_TEMPERATURE: f32 = 0.1;
pub const INTERRUPTED_REASON: &str = "Analysis was interrupted, please re-upload";

/// How one pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed {
        category: ReportCategory,
        used_fallback: bool,
    },
    Failed {
        reason: String,
    },
    /// The report was not in a state this run could act on.
    Skipped,
}

pub struct AnalysisPipeline {
    provider: Arc<dyn Provider>,
    store: Arc<dyn RecordStore>,
    files: Arc<dyn FileStore>,
    primary_model: String,
    fallback_model: String,
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn RecordStore>,
        files: Arc<dyn FileStore>,
        models: &ModelsConfig,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            store,
            files,
            primary_model: models.primary.clone(),
            fallback_model: models.fallback.clone(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Claim a PENDING report and analyze it.
    ///
    /// A report that is already claimed or finished is skipped, so at most
    /// one run ever works on a given report. If the run errors after the
    /// claim, the report is marked FAILED rather than left PROCESSING.
    pub async fn run(&self, report_id: &str) -> Result<AnalysisOutcome, AnalysisError> {
        if !self.store.claim_report(report_id).await? {
            debug!(report_id = %report_id, "Report not pending, skipping");
            return Ok(AnalysisOutcome::Skipped);
        }
        let result = match self.store.get_report(report_id).await {
            Ok(Some(report)) => self.analyze(&report).await,
            Ok(None) => return Ok(AnalysisOutcome::Skipped),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            self.abandon(report_id, e).await;
        }
        result
    }

    /// Fail a claimed report whose run errored. Best effort: the store may be
    /// the thing that is failing.
    async fn abandon(&self, report_id: &str, err: &AnalysisError) {
        let reason = format!(
            "Processing failed: {}",
            truncate_chars(&err.to_string(), FAILURE_REASON_CHARS)
        );
        match self.store.fail_report(report_id, &reason).await {
            Ok(true) => warn!(report_id = %report_id, error = %err, "Run aborted, report marked FAILED"),
            Ok(false) => {}
            Err(store_err) => {
                error!(report_id = %report_id, error = %store_err, "Could not mark aborted report FAILED")
            }
        }
    }

    /// Fail reports left PROCESSING by a run that never finished.
    ///
    /// Only safe before any worker of this process has claimed a job.
    pub async fn fail_interrupted(&self) -> Result<usize, AnalysisError> {
        let stale = self.store.processing_reports(0).await?;
        let mut failed = 0;
        for report in &stale {
            if self.store.fail_report(&report.id, INTERRUPTED_REASON).await? {
                warn!(report_id = %report.id, file = %report.original_name, "Interrupted analysis marked FAILED");
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Analyze a report that this run has already claimed.
    pub async fn analyze(&self, report: &Report) -> Result<AnalysisOutcome, AnalysisError> {
        info!(
            report_id = %report.id,
            file = %report.original_name,
            mime_type = %report.mime_type,
            size = report.file_size,
            "Analyzing report"
        );

        let content = match self.load_content(report).await {
            Ok(content) => content,
            Err(e) => return self.fail(report, &e).await,
        };

        let (analysis, used_fallback) = match self.primary(report, &content).await {
            Ok(analysis) => (analysis, false),
            Err(e) if e.is_resource_limit() => {
                warn!(report_id = %report.id, error = %e, "Resource limit on primary tier, retrying on fallback tier");
                match self.fallback(report, &content).await {
                    Ok(analysis) => (analysis, true),
                    Err(fallback_err) => {
                        warn!(report_id = %report.id, error = %fallback_err, "Fallback tier failed");
                        return self.fail(report, &e).await;
                    }
                }
            }
            Err(e) => return self.fail(report, &e).await,
        };

        self.finish(report, analysis, used_fallback).await
    }

    async fn load_content(&self, report: &Report) -> Result<DocumentContent, AnalysisError> {
        let bytes = self.files.read(&report.storage_ref).await?;
        let limits = ExtractLimits {
            min_chars: self.config.min_extracted_chars,
            crude_cap: self.config.crude_extract_cap,
        };
        extract(&bytes, &report.mime_type, limits).await
    }

    async fn primary(
        &self,
        report: &Report,
        content: &DocumentContent,
    ) -> Result<Analysis, AnalysisError> {
        match content {
            DocumentContent::Text(text) => self.analyze_text(report, text).await,
            DocumentContent::Image { data_url } => {
                let messages = vec![
                    PromptMessage::system(prompts::system()),
                    PromptMessage::user_with_image(prompts::image(), data_url.clone()),
                ];
                let reply = self
                    .complete(&self.primary_model, messages, self.config.max_output_tokens)
                    .await?;
                Ok(parse_analysis(&reply))
            }
        }
    }

    async fn analyze_text(&self, report: &Report, text: &str) -> Result<Analysis, AnalysisError> {
        let tokens = estimate_tokens(text);
        if tokens < self.config.max_tokens_per_request {
            let messages = vec![
                PromptMessage::system(prompts::system()),
                PromptMessage::user(prompts::document(text)),
            ];
            match self
                .complete(&self.primary_model, messages, self.config.max_output_tokens)
                .await
            {
                Ok(reply) => return Ok(parse_analysis(&reply)),
                Err(e) if e.is_resource_limit() => {
                    warn!(report_id = %report.id, tokens, error = %e, "Single request too large, switching to chunks");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.analyze_chunked(report, text).await
    }

    async fn analyze_chunked(&self, report: &Report, text: &str) -> Result<Analysis, AnalysisError> {
        let chunks = chunk_text(text, self.config.chunk_size);
        let selected = chunks.len().min(self.config.max_chunks);
        if chunks.len() > selected {
            info!(
                report_id = %report.id,
                total = chunks.len(),
                analyzed = selected,
                "Document exceeds chunk limit, analyzing leading chunks only"
            );
        }

        let mut analyses = Vec::with_capacity(selected);
        let mut limit_hit: Option<ProviderError> = None;
        for (index, chunk) in chunks.iter().take(selected).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.chunk_delay()).await;
            }
            let messages = vec![
                PromptMessage::system(prompts::system()),
                PromptMessage::user(prompts::chunk(chunk, index, selected)),
            ];
            match self
                .complete(&self.primary_model, messages, self.config.chunk_max_tokens)
                .await
            {
                Ok(reply) => {
                    debug!(report_id = %report.id, chunk = index + 1, "Chunk analyzed");
                    analyses.push(parse_analysis(&reply));
                }
                Err(e) if e.is_resource_limit() => {
                    warn!(report_id = %report.id, chunk = index + 1, error = %e, "Resource limit, stopping chunk analysis");
                    limit_hit = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(report_id = %report.id, chunk = index + 1, error = %e, "Chunk analysis failed, skipping");
                }
            }
        }

        if analyses.is_empty() {
            if let Some(e) = limit_hit {
                return Err(e.into());
            }
            return Ok(simplified_analysis(&report.original_name, media_label(report)));
        }
        Ok(combine(analyses))
    }

    /// The cheaper tier: a small text sample, or the same image.
    async fn fallback(
        &self,
        report: &Report,
        content: &DocumentContent,
    ) -> Result<Analysis, AnalysisError> {
        let prompt = match content {
            DocumentContent::Image { data_url } => PromptMessage::user_with_image(
                prompts::fallback_image(&report.original_name),
                data_url.clone(),
            ),
            DocumentContent::Text(text) => {
                let sample = truncate_chars(
                    &text.split_whitespace().collect::<Vec<_>>().join(" "),
                    self.config.fallback_sample_chars,
                );
                if sample.chars().count() < self.config.min_extracted_chars {
                    return Ok(simplified_analysis(&report.original_name, media_label(report)));
                }
                PromptMessage::user(prompts::fallback_text(&report.original_name, &sample))
            }
        };
        let messages = vec![PromptMessage::system(prompts::system()), prompt];
        let reply = self
            .complete(&self.fallback_model, messages, self.config.fallback_max_tokens)
            .await?;
        Ok(parse_analysis(&reply))
    }

    async fn finish(
        &self,
        report: &Report,
        analysis: Analysis,
        used_fallback: bool,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let category = analysis.category;
        let storage_ref = match self
            .files
            .relocate(&report.storage_ref, &category.folder())
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                warn!(report_id = %report.id, error = %e, "Could not relocate stored file");
                report.storage_ref.clone()
            }
        };

        if !self
            .store
            .complete_report(&report.id, &analysis, &storage_ref)
            .await?
        {
            warn!(report_id = %report.id, "Report left PROCESSING before completion, discarding analysis");
            return Ok(AnalysisOutcome::Skipped);
        }
        info!(report_id = %report.id, category = %category, used_fallback, "Report analysis completed");
        Ok(AnalysisOutcome::Completed {
            category,
            used_fallback,
        })
    }

    async fn fail(
        &self,
        report: &Report,
        err: &AnalysisError,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let reason = format!(
            "Processing failed: {}",
            truncate_chars(&err.to_string(), FAILURE_REASON_CHARS)
        );
        error!(report_id = %report.id, error = %err, "Report analysis failed");
        if !self.store.fail_report(&report.id, &reason).await? {
            warn!(report_id = %report.id, "Report left PROCESSING before it could be failed");
            return Ok(AnalysisOutcome::Skipped);
        }
        Ok(AnalysisOutcome::Failed { reason })
    }

    async fn complete(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = ProviderRequest::new(model, messages)
            .with_temperature(ANALYSIS_TEMPERATURE)
            .with_max_tokens(max_tokens);
        Ok(self.provider.complete(request).await?.content)
    }
}

fn media_label(report: &Report) -> &'static str {
    match MediaKind::from_mime(&report.mime_type) {
        Some(MediaKind::Pdf) => "PDF",
        Some(MediaKind::Image) => "image",
        _ => "document",
    }
}
