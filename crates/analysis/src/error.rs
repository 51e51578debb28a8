//! Errors raised while analyzing a document.

use carebridge_core::error::{FileStoreError, ProviderError, StoreError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    File(#[from] FileStoreError),

    #[error("Analysis queue is closed")]
    QueueClosed,
}

impl AnalysisError {
    /// Whether the failure is a token or rate quota hit on the completion service.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_resource_limit())
    }
}
