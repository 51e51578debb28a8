//! Rolling background summaries.
//!
//! Every `segment_size` new messages the conversation is digested into a
//! fresh summary row, seeded with the previous summary so the digest is
//! cumulative. Generation is best effort: a failed completion call keeps the
//! previous summary and the chat path carries on.
//!
//! A second kind of summary, the medical digest, condenses a user's
//! completed reports together with the latest turns of the session.

use std::collections::HashSet;
use std::sync::Arc;

use carebridge_config::SummaryConfig;
use carebridge_core::error::StoreError;
use carebridge_core::message::{Message, MessageType};
use carebridge_core::metadata;
use carebridge_core::provider::{PromptMessage, Provider, ProviderRequest};
use carebridge_core::report::{Report, ReportQuery};
use carebridge_core::session::{Summary, SummaryInfo, SummaryKind};
use carebridge_core::store::RecordStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::vocabulary::{Vocabulary, find_terms};

/// Completed reports folded into one medical digest.
const MEDICAL_REPORT_LIMIT: usize = 20;
/// Conversation turns folded into one medical digest.
const MEDICAL_TURN_LIMIT: usize = 10;

const CONVERSATION_SYSTEM: &str = "You maintain background notes for a health-support \
assistant. Write a concise digest of the conversation in present tense using these headings: \
Cancer context, Symptoms and concerns, Product interests, Information requested, \
Preferences and constraints, Recurring themes. Omit headings with nothing to report. \
These notes are background, not a turn-by-turn record.";

const MEDICAL_SYSTEM: &str = "You summarize a patient's analysed medical reports for a \
health-support assistant. Write a structured digest covering diagnoses and cancer context, \
key lab values and abnormal findings, treatments and prescriptions, recommendations, and the \
questions the user is currently asking. Be factual and do not speculate beyond the reports.";

pub struct SummaryEngine {
    provider: Arc<dyn Provider>,
    store: Arc<dyn RecordStore>,
    model: String,
    config: SummaryConfig,
    /// Serializes check-then-insert so concurrent triggers cannot both write a segment.
    gate: Mutex<()>,
}

impl SummaryEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn RecordStore>,
        model: impl Into<String>,
        config: SummaryConfig,
    ) -> Self {
        Self {
            provider,
            store,
            model: model.into(),
            config,
            gate: Mutex::new(()),
        }
    }

    /// Digest the newest segment if enough messages have accumulated.
    ///
    /// Returns the current conversational summary, new or not. Calling it
    /// again without new messages writes nothing.
    pub async fn maybe_summarize(&self, session_id: &str) -> Result<Option<Summary>, StoreError> {
        let _guard = self.gate.lock().await;

        let segment = self.config.segment_size;
        let total = self.store.count_messages(session_id).await?;
        let previous = self.latest_summary(session_id).await?;
        if total < segment {
            return Ok(previous);
        }

        let last_summarized = previous.as_ref().map_or(0, |s| s.to_index);
        let new_messages = total - last_summarized;
        if new_messages < segment {
            return Ok(previous);
        }

        info!(
            session_id = %session_id,
            from = last_summarized + 1,
            to = total,
            "Summarizing conversation segment"
        );
        match self
            .summarize_range(session_id, last_summarized + 1, total, previous.as_ref())
            .await?
        {
            Some(summary) => Ok(Some(summary)),
            None => Ok(previous),
        }
    }

    /// Force a digest of messages `from..=to`, seeded with the latest
    /// summary that ends before `from`. Returns `None` if generation failed.
    pub async fn regenerate(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Option<Summary>, StoreError> {
        let _guard = self.gate.lock().await;
        let from = from.max(1);
        let seed = self
            .latest_summary(session_id)
            .await?
            .filter(|s| s.to_index < from);
        self.summarize_range(session_id, from, to, seed.as_ref())
            .await
    }

    pub async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>, StoreError> {
        self.store
            .latest_summary(session_id, SummaryKind::Conversation)
            .await
    }

    pub async fn conversation_summary_info(&self, session_id: &str) -> Result<SummaryInfo, StoreError> {
        Ok(match self.latest_summary(session_id).await? {
            Some(summary) => SummaryInfo {
                has_summary: true,
                summary: Some(summary.text),
                last_summarized_index: summary.to_index,
                summary_id: Some(summary.id),
            },
            None => SummaryInfo::default(),
        })
    }

    async fn summarize_range(
        &self,
        session_id: &str,
        from: i64,
        to: i64,
        previous: Option<&Summary>,
    ) -> Result<Option<Summary>, StoreError> {
        let messages = self.store.messages_in_range(session_id, from, to).await?;
        let transcript = render_transcript(&messages);
        if transcript.is_empty() {
            debug!(session_id = %session_id, "Nothing to summarize in range");
            return Ok(None);
        }

        let mut prompt = String::new();
        if let Some(previous) = previous {
            prompt.push_str("Existing background notes (update and extend them):\n");
            prompt.push_str(&previous.text);
            prompt.push_str("\n\n");
        }
        prompt.push_str("New conversation:\n");
        prompt.push_str(&transcript);

        let Some(text) = self
            .generate(CONVERSATION_SYSTEM, prompt, self.config.max_tokens, session_id)
            .await
        else {
            return Ok(None);
        };

        let summary = Summary::new(session_id, SummaryKind::Conversation, from, to, text);
        let saved = self.store.insert_summary(summary).await?;
        info!(session_id = %session_id, to_index = saved.to_index, chars = saved.text.len(), "Summary stored");
        Ok(Some(saved))
    }

    /// Digest the session owner's completed reports and recent turns into
    /// the session's medical summary, replacing any previous one.
    ///
    /// `report_ids` restricts the digest to those reports. Returns `None`
    /// when there is nothing to digest or generation failed.
    pub async fn generate_medical_summary(
        &self,
        session_id: &str,
        report_ids: Option<&[String]>,
    ) -> Result<Option<Summary>, StoreError> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        };
        let Some(user_id) = session.user_id else {
            return Ok(None);
        };

        let mut reports = self
            .store
            .list_reports(&user_id, &ReportQuery::completed(MEDICAL_REPORT_LIMIT))
            .await?;
        if let Some(ids) = report_ids {
            reports.retain(|r| ids.contains(&r.id));
        }
        if reports.is_empty() {
            debug!(session_id = %session_id, "No completed reports for medical summary");
            return Ok(None);
        }

        let mut turns: Vec<Message> = self
            .store
            .recent_messages(session_id, MEDICAL_TURN_LIMIT * 2)
            .await?
            .into_iter()
            .filter(|m| matches!(m.message_type, MessageType::User | MessageType::Agent))
            .take(MEDICAL_TURN_LIMIT)
            .collect();
        turns.reverse();

        let transcript = render_transcript(&turns);
        let mut prompt = format!("Reports:\n{}", render_reports(&reports));
        if !transcript.is_empty() {
            prompt.push_str("\n\nRecent conversation:\n");
            prompt.push_str(&transcript);
            let mentioned = mentioned_terms(&transcript);
            if !mentioned.is_empty() {
                prompt.push_str("\n\nTerms the user mentioned: ");
                prompt.push_str(&mentioned.join(", "));
            }
        }

        let Some(text) = self
            .generate(MEDICAL_SYSTEM, prompt, self.config.medical_max_tokens, session_id)
            .await
        else {
            return Ok(None);
        };

        let categories = distinct_categories(&reports);
        let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
        let metadata = metadata! {
            "report_count" => reports.len(),
            "categories" => categories,
            "report_ids" => ids,
            "has_abnormal_findings" => reports.iter().any(|r| !r.abnormal_findings.is_empty()),
            "has_recommendations" => reports.iter().any(|r| !r.recommendations.is_empty()),
            "vocabulary_version" => Vocabulary::VERSION,
        };

        let from = turns.first().map_or(0, |m| m.index);
        let to = self.store.count_messages(session_id).await?;
        let summary =
            Summary::new(session_id, SummaryKind::Medical, from, to, text).with_metadata(metadata);
        let saved = self.store.upsert_summary(summary).await?;
        info!(session_id = %session_id, reports = reports.len(), "Medical summary stored");
        Ok(Some(saved))
    }

    async fn generate(
        &self,
        system: &str,
        prompt: String,
        max_tokens: u32,
        session_id: &str,
    ) -> Option<String> {
        let request = ProviderRequest::new(
            &self.model,
            vec![PromptMessage::system(system), PromptMessage::user(prompt)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(max_tokens);

        match self.provider.complete(request).await {
            Ok(response) => {
                let text = clamp_summary(&response.content, self.config.max_chars);
                if text.is_empty() {
                    warn!(session_id = %session_id, "Summary generation returned no text");
                    None
                } else {
                    Some(text)
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Summary generation failed, keeping previous summary");
                None
            }
        }
    }
}

/// Render messages for a summary prompt. ORCHESTRATOR rows are skipped.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let speaker = match m.message_type {
                MessageType::User => "User".to_string(),
                MessageType::Agent => match m.destination {
                    Some(d) => format!("Assistant({})", d.agent_tag()),
                    None => "Assistant".to_string(),
                },
                MessageType::Error => "System".to_string(),
                MessageType::Orchestrator => return None,
            };
            Some(format!("{speaker}: {}", m.content))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_reports(reports: &[Report]) -> String {
    reports
        .iter()
        .map(|r| {
            let mut block = format!(
                "- {} ({}, uploaded {})",
                r.original_name,
                r.category,
                r.uploaded_at.format("%Y-%m-%d")
            );
            if let Some(summary) = &r.summary {
                block.push_str(&format!("\n  Summary: {summary}"));
            }
            if !r.key_findings.is_empty() {
                block.push_str(&format!("\n  Key findings: {}", r.key_findings.join("; ")));
            }
            if !r.lab_values.is_empty() {
                let labs: Vec<String> = r
                    .lab_values
                    .iter()
                    .map(|l| format!("{} {} {} ({})", l.name, l.value, l.unit, l.status))
                    .collect();
                block.push_str(&format!("\n  Lab values: {}", labs.join("; ")));
            }
            if !r.abnormal_findings.is_empty() {
                block.push_str(&format!("\n  Abnormal: {}", r.abnormal_findings.join("; ")));
            }
            if !r.recommendations.is_empty() {
                block.push_str(&format!(
                    "\n  Recommendations: {}",
                    r.recommendations.join("; ")
                ));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mentioned_terms(text: &str) -> Vec<&'static str> {
    find_terms(
        text,
        Vocabulary::CANCER_TYPES
            .iter()
            .chain(Vocabulary::CONDITIONS)
            .chain(Vocabulary::TREATMENTS)
            .chain(Vocabulary::SYMPTOMS)
            .copied(),
    )
}

/// Trim and cap a generated summary at `max_chars`, cutting at the last
/// sentence end (or failing that, the last space) before the cap.
pub fn clamp_summary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let cut = head
        .rfind(['.', '!', '?'])
        .map(|i| i + 1)
        .filter(|&i| i >= max_chars / 2)
        .or_else(|| head.rfind(char::is_whitespace))
        .unwrap_or(head.len());
    head[..cut].trim_end().to_string()
}

/// Report categories in first-seen order, each once.
fn distinct_categories(reports: &[Report]) -> Vec<&'static str> {
    let mut seen = HashSet::new();
    reports
        .iter()
        .map(|r| r.category.as_str())
        .filter(|c| seen.insert(*c))
        .collect()
}
