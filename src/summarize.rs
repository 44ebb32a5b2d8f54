//! LLM summarization of tracker issues and the task that drives it.

use crate::cycle::{CycleTrace, DownstreamTask};
use crate::discord::{SummaryCard, SummaryPresenter};
use crate::error::SummarizeError;
use crate::tracker::{Issue, IssueRepository, SpanTrackedRepository};
use crate::IssueId;
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use std::sync::Arc;

const PREAMBLE: &str = "You summarize Ruby language issue tracker threads for a Discord \
audience. Write the summary in Traditional Chinese. Cover what the issue proposes or \
reports, the key points raised in the discussion, and where things currently stand. Be \
concise and factual; never invent details that are not in the thread.";

/// Produces a prose summary of an issue.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, issue: &Issue, trace: &CycleTrace) -> crate::Result<String>;
}

/// Summarizer backed by an OpenAI-compatible completion endpoint.
pub struct LlmSummarizer {
    agent: rig::agent::Agent<openai::CompletionModel>,
    model: String,
}

impl LlmSummarizer {
    pub fn new(api_key: &str, base_url: Option<&str>, model: String) -> Self {
        let client = match base_url {
            Some(url) => openai::Client::from_url(api_key, url),
            None => openai::Client::new(api_key),
        };
        let agent = client
            .agent(&model)
            .preamble(PREAMBLE)
            .temperature(1.0)
            .build();
        Self { agent, model }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, issue: &Issue, trace: &CycleTrace) -> crate::Result<String> {
        let prompt = build_prompt(issue);
        let started = chrono::Utc::now();

        let summary = self
            .agent
            .prompt(prompt.as_str())
            .await
            .map_err(|error| SummarizeError::Completion(error.to_string()))?;

        if summary.trim().is_empty() {
            return Err(SummarizeError::EmptySummary.into());
        }

        trace
            .record_generation(&self.model, &prompt, &summary, started, issue.id)
            .await;

        Ok(summary)
    }
}

/// Flatten the issue and its discussion into the model prompt.
pub fn build_prompt(issue: &Issue) -> String {
    let mut prompt = format!(
        "Issue #{} ({})\nSubject: {}\nAuthor: {}\n",
        issue.id,
        issue.kind.as_str(),
        issue.subject,
        issue.author_name,
    );
    if let Some(assignee) = &issue.assignee_name {
        prompt.push_str(&format!("Assignee: {assignee}\n"));
    }
    prompt.push_str(&format!("\nDescription:\n{}\n", issue.description));

    if !issue.journals.is_empty() {
        prompt.push_str("\nDiscussion:\n");
        for journal in &issue.journals {
            prompt.push_str(&format!("- {}: {}\n", journal.user_name, journal.notes));
        }
    }

    prompt
}

/// Settlement task: fetch the issue, summarize it, present the card.
pub struct SummarizeTask {
    repository: Arc<dyn IssueRepository>,
    summarizer: Arc<dyn Summarizer>,
    presenter: Arc<dyn SummaryPresenter>,
}

impl SummarizeTask {
    pub fn new(
        repository: Arc<dyn IssueRepository>,
        summarizer: Arc<dyn Summarizer>,
        presenter: Arc<dyn SummaryPresenter>,
    ) -> Self {
        Self {
            repository,
            summarizer,
            presenter,
        }
    }
}

#[async_trait]
impl DownstreamTask for SummarizeTask {
    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn run(&self, issue_id: IssueId, trace: &CycleTrace) -> crate::Result<()> {
        let repository =
            SpanTrackedRepository::new(Arc::clone(&self.repository), trace.clone());
        let issue = repository
            .find_by_id(issue_id)
            .await?
            .ok_or(SummarizeError::IssueUnavailable(issue_id))?;

        let summary = self.summarizer.summarize(&issue, trace).await?;

        let card = SummaryCard {
            title: issue.subject.clone(),
            body: summary,
            link: issue.link.clone(),
            kind: issue.kind,
        };
        self.presenter.present(&card, trace).await?;

        tracing::info!(issue_id = %issue_id, "summary presented");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NoopSink;
    use crate::tracker::{IssueKind, Journal};
    use std::sync::Mutex;

    fn issue() -> Issue {
        Issue {
            id: IssueId(19572),
            subject: "Add Hash#except!".to_string(),
            description: "It would be convenient to mutate in place.".to_string(),
            kind: IssueKind::Feature,
            author_name: "matz".to_string(),
            assignee_name: Some("nobu".to_string()),
            link: "https://bugs.ruby-lang.org/issues/19572".to_string(),
            journals: vec![
                Journal {
                    id: 1,
                    user_name: "ko1".to_string(),
                    notes: "What about frozen hashes?".to_string(),
                },
                Journal {
                    id: 2,
                    user_name: "byroot".to_string(),
                    notes: "Raises FrozenError, same as delete.".to_string(),
                },
            ],
        }
    }

    #[test]
    fn prompt_carries_every_issue_field() {
        let prompt = build_prompt(&issue());

        assert!(prompt.contains("Issue #19572 (Feature)"));
        assert!(prompt.contains("Subject: Add Hash#except!"));
        assert!(prompt.contains("Author: matz"));
        assert!(prompt.contains("Assignee: nobu"));
        assert!(prompt.contains("It would be convenient to mutate in place."));
        assert!(prompt.contains("- ko1: What about frozen hashes?"));
        assert!(prompt.contains("- byroot: Raises FrozenError, same as delete."));
    }

    #[test]
    fn prompt_omits_missing_assignee_and_empty_discussion() {
        let mut bare = issue();
        bare.assignee_name = None;
        bare.journals.clear();

        let prompt = build_prompt(&bare);
        assert!(!prompt.contains("Assignee:"));
        assert!(!prompt.contains("Discussion:"));
    }

    struct StaticRepository {
        issue: Option<Issue>,
    }

    #[async_trait]
    impl IssueRepository for StaticRepository {
        async fn find_by_id(&self, _id: IssueId) -> crate::Result<Option<Issue>> {
            Ok(self.issue.clone())
        }
    }

    struct StaticSummarizer {
        called: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Summarizer for StaticSummarizer {
        async fn summarize(&self, _issue: &Issue, _trace: &CycleTrace) -> crate::Result<String> {
            *self.called.lock().unwrap() = true;
            Ok("摘要內容".to_string())
        }
    }

    struct RecordingPresenter {
        cards: Arc<Mutex<Vec<SummaryCard>>>,
    }

    #[async_trait]
    impl SummaryPresenter for RecordingPresenter {
        async fn present(&self, card: &SummaryCard, _trace: &CycleTrace) -> crate::Result<()> {
            self.cards.lock().unwrap().push(card.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn task_presents_a_card_for_a_found_issue() {
        let cards = Arc::new(Mutex::new(Vec::new()));
        let task = SummarizeTask::new(
            Arc::new(StaticRepository {
                issue: Some(issue()),
            }),
            Arc::new(StaticSummarizer {
                called: Arc::new(Mutex::new(false)),
            }),
            Arc::new(RecordingPresenter {
                cards: Arc::clone(&cards),
            }),
        );
        let trace = CycleTrace::new(Arc::new(NoopSink));

        task.run(IssueId(19572), &trace).await.unwrap();

        let cards = cards.lock().unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title, "Add Hash#except!");
        assert_eq!(cards[0].body, "摘要內容");
        assert_eq!(cards[0].link, "https://bugs.ruby-lang.org/issues/19572");
    }

    #[tokio::test]
    async fn task_fails_when_the_issue_cannot_be_fetched() {
        let called = Arc::new(Mutex::new(false));
        let task = SummarizeTask::new(
            Arc::new(StaticRepository { issue: None }),
            Arc::new(StaticSummarizer {
                called: Arc::clone(&called),
            }),
            Arc::new(RecordingPresenter {
                cards: Arc::new(Mutex::new(Vec::new())),
            }),
        );
        let trace = CycleTrace::new(Arc::new(NoopSink));

        let result = task.run(IssueId(404), &trace).await;

        assert!(result.is_err());
        assert!(!*called.lock().unwrap());
    }
}
