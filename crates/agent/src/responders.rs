//! Completion-backed responders.
//!
//! The orchestrator only sees the [`Responder`] trait. These are the stock
//! implementations: a prompt-per-destination completion responder for the
//! product and document paths, and the report responder, which answers from
//! the user's analysed reports.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use carebridge_core::error::ResponderError;
use carebridge_core::message::{Destination, Message, MessageType};
use carebridge_core::metadata;
use carebridge_core::provider::{PromptMessage, Provider, ProviderRequest};
use carebridge_core::report::{Report, ReportQuery};
use carebridge_core::responder::{AgentContext, Responder, ResponderReply, ResponderRequest};
use carebridge_core::store::RecordStore;
use regex::Regex;
use tracing::{debug, warn};

use crate::vocabulary::{Vocabulary, contains_any, find_terms};

const PRODUCT_PROMPT: &str = "You are the product specialist of a health-support assistant \
for people affected by cancer. Suggest supportive products, supplements and remedies for the \
user's symptoms and side effects. Prefer what the recent conversation is about, use the \
background notes only to personalise, and remind the user to check with their care team \
before starting anything new.";

const DOCUMENT_PROMPT: &str = "You are the educational specialist of a health-support \
assistant for people affected by cancer. Explain diagnoses, treatments and care in clear, \
supportive language. Continue the thread of the recent conversation, use the background \
notes only to personalise, and never give a diagnosis.";

const REPORT_PROMPT: &str = "You are the medical report specialist of a health-support \
assistant. Answer the user's question about their own analysed reports. Reference specific \
findings and values, be specific about deficiencies or abnormal values, name treatable \
issues such as nutritional deficiencies clearly, and suggest when to follow up with their \
healthcare team. Use empathetic language and encourage medical consultation for treatment \
decisions.";

const NO_REPORTS_ANSWER: &str = "I don't see any completed medical reports in your account \
yet. Please upload your medical reports so I can analyze them and provide insights.";

/// Reports the report responder reads per answer.
const REPORT_LIMIT: usize = 5;
/// Context messages quoted in a report prompt, and their length cap.
const REPORT_CONTEXT_MESSAGES: usize = 4;
const REPORT_CONTEXT_CHARS: usize = 150;

const RESPONDER_MAX_TOKENS: u32 = 1200;
const RESPONDER_TEMPERATURE: f32 = 0.3;
const REPORT_TEMPERATURE: f32 = 0.1;

// ── Completion responder ──────────────────────────────────────────────

/// Answers with one completion call using a fixed system prompt.
pub struct CompletionResponder {
    destination: Destination,
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: String,
}

impl CompletionResponder {
    pub fn new(
        destination: Destination,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            provider,
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn product(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self::new(Destination::Product, provider, model, PRODUCT_PROMPT)
    }

    pub fn document(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self::new(Destination::Document, provider, model, DOCUMENT_PROMPT)
    }

    fn build_messages(&self, request: &ResponderRequest) -> Vec<PromptMessage> {
        let mut system = self.system_prompt.clone();
        if let Some(summary) = request.context.summary.as_deref().filter(|s| !s.is_empty()) {
            system.push_str("\n\nBackground notes about this user:\n");
            system.push_str(summary);
        }

        let mut messages = vec![PromptMessage::system(system)];
        messages.extend(transcript(&request.context, &request.query));

        let mut question = request.query.clone();
        if request.expanded_query.trim() != request.query.trim() {
            question.push_str("\n\nRelated search terms: ");
            question.push_str(&request.expanded_query);
        }
        messages.push(PromptMessage::user(question));
        messages
    }
}

/// Context turns as chat messages, without the trailing copy of `query`.
fn transcript(context: &AgentContext, query: &str) -> Vec<PromptMessage> {
    let mut turns: Vec<&Message> = context
        .messages
        .iter()
        .filter(|m| matches!(m.message_type, MessageType::User | MessageType::Agent))
        .collect();
    if turns
        .last()
        .is_some_and(|m| m.message_type == MessageType::User && m.content.trim() == query.trim())
    {
        turns.pop();
    }
    turns
        .into_iter()
        .map(|m| match m.message_type {
            MessageType::User => PromptMessage::user(&m.content),
            _ => PromptMessage::assistant(&m.content),
        })
        .collect()
}

#[async_trait]
impl Responder for CompletionResponder {
    fn destination(&self) -> Destination {
        self.destination
    }

    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError> {
        let provider_request = ProviderRequest::new(&self.model, self.build_messages(&request))
            .with_temperature(RESPONDER_TEMPERATURE)
            .with_max_tokens(RESPONDER_MAX_TOKENS);
        let response = self.provider.complete(provider_request).await?;
        debug!(
            destination = %self.destination,
            session_id = %request.session_id,
            context_messages = request.context.messages.len(),
            "Responder answered"
        );

        let mut reply = ResponderReply::text(response.content);
        reply.metadata = metadata! {
            "source" => self.destination.as_str(),
            "context_messages" => request.context.messages.len(),
            "has_summary" => request.context.has_summary(),
        };
        Ok(reply)
    }
}

// ── Report responder ──────────────────────────────────────────────────

/// Answers questions about the user's own completed reports.
pub struct ReportResponder {
    provider: Arc<dyn Provider>,
    store: Arc<dyn RecordStore>,
    model: String,
}

impl ReportResponder {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn RecordStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Responder for ReportResponder {
    fn destination(&self) -> Destination {
        Destination::Report
    }

    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError> {
        let reports = match &request.user_id {
            Some(user_id) => {
                self.store
                    .list_reports(user_id, &ReportQuery::completed(REPORT_LIMIT))
                    .await?
            }
            None => Vec::new(),
        };
        if reports.is_empty() {
            debug!(session_id = %request.session_id, "No completed reports to answer from");
            return Ok(ResponderReply::text(NO_REPORTS_ANSWER));
        }

        let prompt = format!(
            "{}USER'S MEDICAL REPORTS:\n{}\n\nUSER QUESTION: {}",
            conversation_block(&request.context),
            reports_block(&reports),
            request.query
        );
        let provider_request = ProviderRequest::new(
            &self.model,
            vec![PromptMessage::system(REPORT_PROMPT), PromptMessage::user(prompt)],
        )
        .with_temperature(REPORT_TEMPERATURE)
        .with_max_tokens(RESPONDER_MAX_TOKENS);
        let answer = self.provider.complete(provider_request).await?.content;

        let analysis_type = analysis_type(&answer);
        let mut metadata = metadata! {
            "source" => "report",
            "analysis_type" => analysis_type,
            "reports_count" => reports.len(),
        };
        if contains_any(&answer, Vocabulary::SUPPLEMENT_INDICATORS) {
            let terms = product_search_terms(&answer);
            if !terms.is_empty() {
                metadata.insert("product_search_terms".into(), serde_json::json!(terms));
            }
        }
        debug!(
            session_id = %request.session_id,
            reports = reports.len(),
            analysis_type,
            "Report responder answered"
        );

        Ok(ResponderReply {
            answer,
            reports_referenced: reports.into_iter().map(|r| r.id).collect(),
            metadata,
        })
    }
}

fn conversation_block(context: &AgentContext) -> String {
    let mut block = String::new();
    let skip = context.messages.len().saturating_sub(REPORT_CONTEXT_MESSAGES);
    let recent: Vec<String> = context.messages[skip..]
        .iter()
        .map(|m| {
            let role = if m.message_type == MessageType::User {
                "User"
            } else {
                "Assistant"
            };
            let content: String = m.content.chars().take(REPORT_CONTEXT_CHARS).collect();
            format!("{role}: {content}")
        })
        .collect();
    if !recent.is_empty() {
        block.push_str(&format!("Recent Conversation:\n{}\n\n", recent.join("\n")));
    }
    if let Some(summary) = context.summary.as_deref().filter(|s| !s.is_empty()) {
        block.push_str(&format!("Background (User's Journey):\n{summary}\n\n"));
    }
    block
}

fn reports_block(reports: &[Report]) -> String {
    reports
        .iter()
        .map(|r| {
            let labs: Vec<String> = r
                .lab_values
                .iter()
                .map(|v| format!("{}: {} {} ({})", v.name, v.value, v.unit, v.status))
                .collect();
            format!(
                "REPORT: {}\nSummary: {}\nKey Findings: {}\nLab Values: {}\nAbnormal Findings: {}\n---",
                r.original_name,
                r.summary.as_deref().unwrap_or("No summary available"),
                or_none(&r.key_findings.join(", "), "None specified"),
                or_none(&labs.join(", "), "None"),
                or_none(&r.abnormal_findings.join(", "), "None specified"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_none<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.is_empty() { fallback } else { text }
}

/// Tag an answer as deficiency, abnormal, symptom or general.
pub fn analysis_type(answer: &str) -> &'static str {
    if contains_any(answer, Vocabulary::DEFICIENCY_SIGNALS) {
        "deficiency"
    } else if contains_any(answer, Vocabulary::ABNORMAL_SIGNALS) {
        "abnormal"
    } else if contains_any(answer, Vocabulary::SYMPTOM_SIGNALS) {
        "symptom"
    } else {
        "general"
    }
}

static DEFICIENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"vitamin [a-z0-9]+ deficiency",
        r"[a-z]+ deficiency",
        r"low [a-z ]+? levels",
        r"(?:iron|calcium|protein|vitamin|mineral) shortage",
    ]
    .iter()
    .filter_map(|p| match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %p, error = %e, "Skipping invalid deficiency pattern");
            None
        }
    })
    .collect()
});

/// Product search terms mined from a report answer: deficiency phrases
/// first, then symptom words. Terms already covered by a longer one are
/// dropped.
pub fn product_search_terms(answer: &str) -> Vec<String> {
    let lower = answer.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: &str| {
        if !terms.iter().any(|t| t.contains(term)) {
            terms.push(term.to_string());
        }
    };
    for pattern in DEFICIENCY_PATTERNS.iter() {
        for m in pattern.find_iter(&lower) {
            push(m.as_str());
        }
    }
    for term in find_terms(&lower, Vocabulary::PRODUCT_SYMPTOMS.iter().copied()) {
        push(term);
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use carebridge_core::message::NewMessage;
    use carebridge_core::report::{Analysis, LabValue, Upload};
    use carebridge_core::session::Session;
    use carebridge_store::InMemoryStore;

    fn request(destination: Destination, query: &str, context: AgentContext) -> ResponderRequest {
        ResponderRequest {
            destination,
            session_id: "s".into(),
            user_id: Some("user-1".into()),
            query: query.into(),
            expanded_query: query.into(),
            context,
        }
    }

    #[test]
    fn analysis_type_checks_signals_in_order() {
        assert_eq!(analysis_type("You have an iron deficiency and elevated ALT"), "deficiency");
        assert_eq!(analysis_type("Your ALT is elevated"), "abnormal");
        assert_eq!(analysis_type("Nausea is common after chemo"), "symptom");
        assert_eq!(analysis_type("Your report looks fine"), "general");
    }

    #[test]
    fn every_deficiency_pattern_compiles() {
        assert_eq!(DEFICIENCY_PATTERNS.len(), 4);
    }

    #[test]
    fn product_terms_prefer_longer_phrases() {
        let terms = product_search_terms(
            "Your results show Vitamin D deficiency and low iron levels, which may explain fatigue.",
        );
        assert_eq!(terms, vec!["vitamin d deficiency", "low iron levels", "fatigue"]);
    }

    #[tokio::test]
    async fn completion_responder_sends_transcript_without_repeating_query() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("Try ginger tea.".into())]));
        let responder = CompletionResponder::product(provider.clone(), "responder-model");
        let context = AgentContext {
            summary: Some("User has lung cancer".into()),
            messages: vec![
                NewMessage::user("s", "I feel sick after chemo").into_message(1),
                NewMessage::agent("s", Destination::Document, "Chemo often causes nausea.")
                    .into_message(2),
                NewMessage::user("s", "what helps?").into_message(3),
            ],
            total_available: 3,
            filtered: 3,
        };
        let mut req = request(Destination::Product, "what helps?", context);
        req.expanded_query = "what helps? nausea".into();

        let reply = responder.respond(req).await.unwrap();
        assert_eq!(reply.answer, "Try ginger tea.");
        assert_eq!(reply.metadata["source"], serde_json::json!("product"));

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent.len(), 4);
        assert!(sent[0].content.contains("User has lung cancer"));
        assert_eq!(sent[1].content, "I feel sick after chemo");
        assert!(sent[3].content.starts_with("what helps?"));
        assert!(sent[3].content.ends_with("Related search terms: what helps? nausea"));
    }

    #[tokio::test]
    async fn report_responder_without_reports_is_canned() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let store = Arc::new(InMemoryStore::new());
        let responder = ReportResponder::new(provider.clone(), store, "responder-model");
        let reply = responder
            .respond(request(Destination::Report, "what does my report say?", AgentContext::default()))
            .await
            .unwrap();
        assert!(reply.answer.contains("Please upload your medical reports"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn report_responder_digests_completed_reports() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            "Your ferritin is low, suggesting iron deficiency. Consider nutrition support.".into(),
        )]));
        let store = Arc::new(InMemoryStore::new());
        store.create_session(Session::new(Some("user-1".into()))).await.unwrap();

        let upload = Upload::new("cbc.pdf", "application/pdf", vec![0; 8]);
        let report = store
            .insert_report(Report::pending("user-1", None, &upload, "pending/cbc.pdf"))
            .await
            .unwrap();
        store.claim_report(&report.id).await.unwrap();
        let analysis = Analysis {
            summary: Some("Low ferritin".into()),
            lab_values: vec![LabValue {
                name: "Ferritin".into(),
                value: "8".into(),
                unit: "ng/mL".into(),
                normal: None,
                status: "low".into(),
            }],
            ..Analysis::default()
        };
        store
            .complete_report(&report.id, &analysis, "others/cbc.pdf")
            .await
            .unwrap();

        let responder = ReportResponder::new(provider.clone(), store, "responder-model");
        let reply = responder
            .respond(request(Destination::Report, "Am I low on anything?", AgentContext::default()))
            .await
            .unwrap();

        assert_eq!(reply.reports_referenced, vec![report.id]);
        assert_eq!(reply.metadata["analysis_type"], serde_json::json!("deficiency"));
        assert_eq!(
            reply.metadata["product_search_terms"],
            serde_json::json!(["iron deficiency", "nutrition"])
        );
        let prompt = &provider.requests()[0].messages[1].content;
        assert!(prompt.contains("REPORT: cbc.pdf"));
        assert!(prompt.contains("Ferritin: 8 ng/mL (low)"));
        assert!(prompt.ends_with("USER QUESTION: Am I low on anything?"));
    }
}
