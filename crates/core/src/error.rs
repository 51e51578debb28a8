//! Error types for the carebridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Token limit exceeded: {0}")]
    TokenLimitExceeded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this failure means the request exceeded a token or rate quota.
    ///
    /// Resource-limit failures are the only class the analysis pipeline
    /// retries on the cheaper model tier.
    pub fn is_resource_limit(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::TokenLimitExceeded(_) => true,
            Self::ApiError {
                status_code,
                message,
            } => {
                let lower = message.to_lowercase();
                *status_code == 429
                    || lower.contains("token")
                    || lower.contains("rate_limit_exceeded")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflicting update on {entity} {id}: {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum FileStoreError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Stored file not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum ResponderError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Responder failed: {0}")]
    Failed(String),
}
