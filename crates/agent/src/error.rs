use carebridge_analysis::AnalysisError;
use carebridge_core::error::StoreError;
use carebridge_core::message::Destination;
use thiserror::Error;

/// Failures the conversational path surfaces to its caller.
///
/// Classification, summarization and responder problems degrade inside the
/// turn and never show up here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session title: {0}")]
    InvalidTitle(String),

    #[error("No responder registered for {0}")]
    MissingResponder(Destination),
}
