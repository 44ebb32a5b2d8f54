//! Issue tracker domain: value objects and the repository seam.

pub mod rest;

pub use rest::RestIssueRepository;

use crate::IssueId;
use crate::cycle::CycleTrace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Category the tracker assigns to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Feature,
    Bug,
    Misc,
    Unknown,
}

impl IssueKind {
    /// Parse a tracker name, case-insensitively. Unrecognized or missing
    /// names map to `Unknown`.
    pub fn from_tracker_name(name: Option<&str>) -> Self {
        match name.map(str::to_ascii_lowercase).as_deref() {
            Some("feature") => Self::Feature,
            Some("bug") => Self::Bug,
            Some("misc") => Self::Misc,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "Feature",
            Self::Bug => "Bug",
            Self::Misc => "Misc",
            Self::Unknown => "Unknown",
        }
    }
}

/// One comment left on an issue. Journals without notes are dropped at the
/// mapping layer, so `notes` is always non-empty here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    pub id: u64,
    pub user_name: String,
    pub notes: String,
}

/// Snapshot of a tracked issue as fetched from the remote tracker.
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: IssueId,
    pub subject: String,
    pub description: String,
    pub kind: IssueKind,
    pub author_name: String,
    pub assignee_name: Option<String>,
    /// Canonical web link for the issue.
    pub link: String,
    pub journals: Vec<Journal>,
}

/// Read access to the remote tracker.
#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Fetch the current state of an issue. `None` when the issue cannot be
    /// retrieved (missing, tracker error, unreachable).
    async fn find_by_id(&self, id: IssueId) -> crate::Result<Option<Issue>>;
}

/// Decorator recording a `fetch-issue` span around every lookup.
///
/// Built fresh per settlement cycle so the span lands on that cycle's trace.
pub struct SpanTrackedRepository {
    inner: Arc<dyn IssueRepository>,
    trace: CycleTrace,
}

impl SpanTrackedRepository {
    pub fn new(inner: Arc<dyn IssueRepository>, trace: CycleTrace) -> Self {
        Self { inner, trace }
    }
}

#[async_trait]
impl IssueRepository for SpanTrackedRepository {
    async fn find_by_id(&self, id: IssueId) -> crate::Result<Option<Issue>> {
        let started = chrono::Utc::now();
        let result = self.inner.find_by_id(id).await;

        let output = match &result {
            Ok(Some(issue)) => serde_json::json!({ "found": true, "subject": issue.subject }),
            Ok(None) => serde_json::json!({ "found": false }),
            Err(error) => serde_json::json!({ "found": false, "error": error.to_string() }),
        };
        self.trace
            .record_span(
                "fetch-issue",
                started,
                serde_json::json!({ "issueId": id }),
                output,
            )
            .await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_names_map_case_insensitively() {
        assert_eq!(IssueKind::from_tracker_name(Some("Feature")), IssueKind::Feature);
        assert_eq!(IssueKind::from_tracker_name(Some("BUG")), IssueKind::Bug);
        assert_eq!(IssueKind::from_tracker_name(Some("misc")), IssueKind::Misc);
    }

    #[test]
    fn unknown_and_missing_trackers_map_to_unknown() {
        assert_eq!(IssueKind::from_tracker_name(Some("Support")), IssueKind::Unknown);
        assert_eq!(IssueKind::from_tracker_name(None), IssueKind::Unknown);
    }
}
