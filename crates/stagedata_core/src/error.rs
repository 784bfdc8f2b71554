//! Provider error types for staging, fetching and relaying.
use thiserror::Error;

/// Top-level error type returned by the buffering provider and its sources.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A staging call would break the one-pending-edit-per-key rule.
    #[error("Edit conflict for key {key}: {reason}")]
    EditConflict { key: String, reason: String },

    #[error("Not found")]
    NotFound,

    /// The abort signal attached to a fetch fired.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Failure reported by the wrapped data source.
    #[error("Source error: {0}")]
    Source(String),

    #[error("No key generator configured for client-assigned keys")]
    MissingKeyGenerator,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal mutex state is poisoned.
    #[error("Provider state is poisoned")]
    Poisoned,
}

impl ProviderError {
    /// Build an [`ProviderError::EditConflict`] for `key`.
    pub fn conflict(key: &impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        Self::EditConflict {
            key: format!("{:?}", key),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error came from an abort signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
