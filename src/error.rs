//! Error types for the unread store.

use thiserror::Error;

/// Boxed error returned by external collaborators (sources and sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum UnreadError {
    /// The local mutation step failed; persist never ran.
    #[error("Optimistic apply failed: {0}")]
    OptimisticApply(String),

    /// The remote durable save failed. The optimistic state is retained.
    #[error("Persist failed: {0}")]
    Persist(String),

    /// The remote read failed. Local state is unchanged.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("No tokio runtime available to run persist tasks")]
    NoRuntime,

    #[error("Persist task aborted: {0}")]
    TaskAborted(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl UnreadError {
    /// Wrap a sink failure.
    pub fn persist(e: BoxError) -> Self {
        UnreadError::Persist(e.to_string())
    }

    /// Wrap a source failure.
    pub fn fetch(e: BoxError) -> Self {
        UnreadError::Fetch(e.to_string())
    }
}

impl From<serde_json::Error> for UnreadError {
    fn from(e: serde_json::Error) -> Self {
        UnreadError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for UnreadError {
    fn from(e: tokio::task::JoinError) -> Self {
        UnreadError::TaskAborted(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, UnreadError>;
