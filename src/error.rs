//! Error types shared across the crate.

use crate::IssueId;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for fallible operations across the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Debounce(#[from] DebounceError),

    #[error(transparent)]
    Summarize(#[from] SummarizeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the per-issue debounce machinery.
#[derive(Debug, thiserror::Error)]
pub enum DebounceError {
    /// The per-issue actor task is gone; its inbox or ack channel closed.
    #[error("debounce actor for issue {0} is not running")]
    ActorGone(IssueId),

    /// The durable window store rejected a read or write. Fatal to the
    /// current event delivery so the caller can retry it.
    #[error("failed to persist debounce state")]
    Persist(#[source] sqlx::Error),
}

/// Errors from the summarize downstream task.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    /// The tracker had no retrievable issue for this id.
    #[error("failed to fetch issue with id {0}")]
    IssueUnavailable(IssueId),

    /// The completion call failed or was rejected by the provider.
    #[error("summary completion failed: {0}")]
    Completion(String),

    /// The model answered with an empty summary.
    #[error("model returned an empty summary")]
    EmptySummary,
}
