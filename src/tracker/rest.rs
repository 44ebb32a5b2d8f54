//! REST client for the public Ruby issue tracker.

use super::{Issue, IssueKind, IssueRepository, Journal};
use crate::IssueId;
use async_trait::async_trait;
use serde::Deserialize;

const TRACKER_BASE_URL: &str = "https://bugs.ruby-lang.org/issues";

/// Fetches issues from bugs.ruby-lang.org.
///
/// Every failure mode (tracker error status, network failure, malformed
/// payload) maps to `Ok(None)` after a warning; the summarize task turns the
/// missing issue into its own failure. The shared client carries the HTTP
/// timeout.
pub struct RestIssueRepository {
    client: reqwest::Client,
    base_url: String,
}

impl RestIssueRepository {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: TRACKER_BASE_URL.to_string(),
        }
    }

    fn issue_url(&self, id: IssueId) -> String {
        format!("{}/{}.json?include=journals", self.base_url, id)
    }
}

#[async_trait]
impl IssueRepository for RestIssueRepository {
    async fn find_by_id(&self, id: IssueId) -> crate::Result<Option<Issue>> {
        let url = self.issue_url(id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, issue_id = %id, "tracker request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                issue_id = %id,
                "tracker returned an error status"
            );
            return Ok(None);
        }

        let payload: IssuePayload = match response.json().await {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, issue_id = %id, "failed to decode tracker response");
                return Ok(None);
            }
        };
        let Some(body) = payload.issue else {
            tracing::warn!(issue_id = %id, "tracker response carries no issue object");
            return Ok(None);
        };

        Ok(Some(map_issue(id, body)))
    }
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    #[serde(default)]
    issue: Option<IssueBody>,
}

#[derive(Debug, Deserialize)]
struct IssueBody {
    #[serde(default)]
    tracker: Option<NamedRef>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: Option<NamedRef>,
    #[serde(default)]
    assigned_to: Option<NamedRef>,
    #[serde(default)]
    journals: Option<Vec<JournalBody>>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JournalBody {
    id: u64,
    #[serde(default)]
    user: Option<NamedRef>,
    #[serde(default)]
    notes: Option<String>,
}

fn map_issue(id: IssueId, body: IssueBody) -> Issue {
    let journals = body
        .journals
        .unwrap_or_default()
        .into_iter()
        .filter_map(map_journal)
        .collect();

    Issue {
        id,
        subject: body.subject,
        description: body.description,
        kind: IssueKind::from_tracker_name(
            body.tracker.as_ref().and_then(|tracker| tracker.name.as_deref()),
        ),
        author_name: body.author.and_then(|author| author.name).unwrap_or_default(),
        assignee_name: body.assigned_to.and_then(|assignee| assignee.name),
        link: format!("{TRACKER_BASE_URL}/{id}"),
        journals,
    }
}

/// Journals with empty or missing notes carry nothing worth summarizing.
fn map_journal(body: JournalBody) -> Option<Journal> {
    let notes = body.notes.unwrap_or_default();
    if notes.trim().is_empty() {
        return None;
    }
    Some(Journal {
        id: body.id,
        user_name: body.user.and_then(|user| user.name).unwrap_or_default(),
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> IssuePayload {
        serde_json::from_str(raw).expect("payload should decode")
    }

    #[test]
    fn full_payload_maps_every_field() {
        let payload = decode(
            r#"{
                "issue": {
                    "id": 12345,
                    "tracker": { "id": 2, "name": "Feature" },
                    "subject": "Add something useful",
                    "description": "It would help.",
                    "author": { "id": 1, "name": "matz" },
                    "assigned_to": { "id": 2, "name": "nobu" },
                    "journals": [
                        { "id": 1, "user": { "id": 3, "name": "ko1" }, "notes": "+1" },
                        { "id": 2, "user": { "id": 4, "name": "akr" }, "notes": "needs a test" }
                    ]
                }
            }"#,
        );
        let issue = map_issue(IssueId(12345), payload.issue.expect("issue present"));

        assert_eq!(issue.id, IssueId(12345));
        assert_eq!(issue.subject, "Add something useful");
        assert_eq!(issue.kind, IssueKind::Feature);
        assert_eq!(issue.author_name, "matz");
        assert_eq!(issue.assignee_name.as_deref(), Some("nobu"));
        assert_eq!(issue.link, "https://bugs.ruby-lang.org/issues/12345");
        assert_eq!(issue.journals.len(), 2);
        assert_eq!(issue.journals[1].user_name, "akr");
        assert_eq!(issue.journals[1].notes, "needs a test");
    }

    #[test]
    fn blank_journals_are_dropped() {
        let payload = decode(
            r#"{
                "issue": {
                    "id": 7,
                    "subject": "s",
                    "description": "d",
                    "journals": [
                        { "id": 1, "user": { "name": "a" }, "notes": "" },
                        { "id": 2, "user": { "name": "b" }, "notes": "   " },
                        { "id": 3, "user": { "name": "c" }, "notes": null },
                        { "id": 4, "user": { "name": "d" }, "notes": "kept" }
                    ]
                }
            }"#,
        );
        let issue = map_issue(IssueId(7), payload.issue.expect("issue present"));

        assert_eq!(issue.journals.len(), 1);
        assert_eq!(issue.journals[0].id, 4);
    }

    #[test]
    fn missing_journals_and_assignee_default_cleanly() {
        let payload = decode(
            r#"{ "issue": { "id": 9, "subject": "s", "description": "d" } }"#,
        );
        let issue = map_issue(IssueId(9), payload.issue.expect("issue present"));

        assert!(issue.journals.is_empty());
        assert!(issue.assignee_name.is_none());
        assert_eq!(issue.kind, IssueKind::Unknown);
        assert!(issue.author_name.is_empty());
    }

    #[test]
    fn payload_without_issue_object_maps_to_none() {
        let payload = decode(r#"{ "invalid": "response" }"#);
        assert!(payload.issue.is_none());
    }

    #[test]
    fn issue_url_includes_journals() {
        let repository = RestIssueRepository::new(reqwest::Client::new());
        assert_eq!(
            repository.issue_url(IssueId(99999)),
            "https://bugs.ruby-lang.org/issues/99999.json?include=journals"
        );
    }
}
