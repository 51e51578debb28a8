//! Turn classification: which responder answers this query.
//!
//! The decision is delegated to a small completion model, but the contract
//! stays a pure function onto the closed [`Destination`] set. The model's
//! output is normalized and must match one of the three tokens exactly;
//! anything else, or any failure, degrades to a safe default. A turn with a
//! file attached always goes to the report responder and never calls the
//! model at all.

use std::sync::Arc;

use carebridge_config::RouterConfig;
use carebridge_core::error::StoreError;
use carebridge_core::message::{Destination, Message, MessageType};
use carebridge_core::provider::{PromptMessage, Provider, ProviderRequest};
use carebridge_core::report::AnalysisStatus;
use carebridge_core::session::Session;
use carebridge_core::store::RecordStore;
use tracing::{debug, warn};

const DEFAULT_RULES: &str = "\
You are the routing layer of a health-support assistant for people affected by cancer. \
Decide which specialist should answer the user's CURRENT QUERY.

REPORT: questions about the user's own uploaded medical reports, lab results, scans, \
prescriptions or discharge summaries, and any turn that uploads a file.
PRODUCT: questions about products, supplements, remedies and relief for symptoms or \
treatment side effects.
DOCUMENT: general educational questions about cancer, diagnosis, treatments and care.

Apply these rules in order; the first one that matches wins:
1. If FILE ATTACHED is YES, answer report.
2. If the user refers to their own report, test or results (\"my report\", \"my test\", \
\"my results\", \"my blood work\"), answer report.
3. If USER HAS UPLOADED REPORTS is YES and the user asks about deficiencies, abnormal \
values or what their levels mean, answer report.
4. If the previous assistant turn was about products and the query is a short follow-up \
(for example \"side effects?\" or \"how much should I take?\"), answer product.
5. If the previous assistant turn was educational and the query asks to continue \
(for example \"tell me more\"), answer document.
6. Otherwise, or when unsure, answer document.

Respond with exactly one lowercase word: report, product or document. No punctuation, \
no explanation.";

/// The routing instructions. Kept as data so wording can change without
/// touching the classification contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierPrompt {
    pub rules: String,
}

impl Default for ClassifierPrompt {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_string(),
        }
    }
}

impl ClassifierPrompt {
    pub fn render(
        &self,
        history: &str,
        query: &str,
        has_file: bool,
        user_has_completed_reports: bool,
    ) -> String {
        let history = if history.is_empty() {
            "No prior conversation"
        } else {
            history
        };
        format!(
            "{}\n\nCONVERSATION CONTEXT:\n{history}\n\nCURRENT QUERY: \"{query}\"\n\
             FILE ATTACHED: {}\nUSER HAS UPLOADED REPORTS: {}",
            self.rules,
            yes_no(has_file),
            yes_no(user_has_completed_reports),
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "YES" } else { "NO" }
}

/// Normalize a raw model reply and match it against the destination tokens.
pub fn parse_destination(raw: &str) -> Option<Destination> {
    let normalized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    Destination::ALL
        .into_iter()
        .find(|d| d.as_str() == normalized)
}

/// The destination used when classification cannot decide.
pub fn safe_default(has_file: bool) -> Destination {
    if has_file {
        Destination::Report
    } else {
        Destination::Document
    }
}

pub struct Classifier {
    provider: Arc<dyn Provider>,
    model: String,
    config: RouterConfig,
    prompt: ClassifierPrompt,
}

impl Classifier {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: RouterConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            config,
            prompt: ClassifierPrompt::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: ClassifierPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Render the last USER/AGENT turns as `ROLE(tag): text`, oldest first.
    pub fn render_history(&self, history: &[Message]) -> String {
        let turns: Vec<&Message> = history
            .iter()
            .filter(|m| matches!(m.message_type, MessageType::User | MessageType::Agent))
            .collect();
        let skip = turns.len().saturating_sub(self.config.history_turns);
        turns[skip..]
            .iter()
            .map(|m| match m.destination {
                Some(d) if m.message_type == MessageType::Agent => {
                    format!("{}({}): {}", m.message_type, d.agent_tag(), m.content)
                }
                _ => format!("{}: {}", m.message_type, m.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Pick the destination for one turn. Never fails.
    ///
    /// `history` is oldest first and should not include the current query.
    pub async fn classify(
        &self,
        query: &str,
        history: &[Message],
        has_file: bool,
        user_has_completed_reports: bool,
    ) -> Destination {
        if has_file {
            debug!("File attached, routing to report");
            return Destination::Report;
        }

        let system = self.prompt.render(
            &self.render_history(history),
            query,
            has_file,
            user_has_completed_reports,
        );
        let request = ProviderRequest::new(
            &self.model,
            vec![PromptMessage::system(system), PromptMessage::user(query)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        match self.provider.complete(request).await {
            Ok(response) => match parse_destination(&response.content) {
                Some(destination) => {
                    debug!(destination = %destination, "Query classified");
                    destination
                }
                None => {
                    warn!(reply = %response.content, "Unrecognized classification, using default");
                    safe_default(has_file)
                }
            },
            Err(e) => {
                warn!(error = %e, "Classification failed, using default");
                safe_default(has_file)
            }
        }
    }
}

/// Whether the session's owner has at least one COMPLETED report.
/// Anonymous sessions never do.
pub async fn user_has_completed_reports(
    store: &dyn RecordStore,
    session: &Session,
) -> Result<bool, StoreError> {
    match &session.user_id {
        Some(user_id) => Ok(store
            .count_reports(user_id, Some(AnalysisStatus::Completed))
            .await?
            > 0),
        None => Ok(false),
    }
}
