//! Fan-out notification of issue activity to configured webhooks.

use crate::cycle::{CycleTrace, DownstreamTask};
use crate::IssueId;
use async_trait::async_trait;
use std::sync::Arc;

/// Posts an issue id to every configured webhook URL concurrently.
#[derive(Clone)]
pub struct WebhookForwarder {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookForwarder {
    pub fn new(client: reqwest::Client, urls: Vec<String>) -> Self {
        Self { client, urls }
    }

    /// Notify every webhook; succeeds only when all of them accepted the post.
    pub async fn forward_all(&self, issue_id: IssueId, trace: &CycleTrace) -> crate::Result<()> {
        if self.urls.is_empty() {
            return Ok(());
        }

        let mut handles = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let client = self.client.clone();
            let url = url.clone();
            let trace = trace.clone();
            handles.push(tokio::spawn(async move {
                forward_one(client, url, issue_id, trace).await
            }));
        }

        let total = handles.len();
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(error) => {
                    tracing::error!(%error, "webhook forward task panicked");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(
                anyhow::anyhow!("{failed} of {total} forward webhooks failed").into(),
            );
        }
        Ok(())
    }
}

/// Post to a single webhook and record the attempt as a span.
async fn forward_one(
    client: reqwest::Client,
    url: String,
    issue_id: IssueId,
    trace: CycleTrace,
) -> bool {
    let started = chrono::Utc::now();
    let result = client
        .post(&url)
        .json(&serde_json::json!({ "issue_id": issue_id }))
        .send()
        .await;

    // Forward URLs may carry tokens in the path; spans only see the host.
    let input = serde_json::json!({ "host": safe_hostname(&url), "issueId": issue_id });
    let (output, success) = match result {
        Ok(response) if response.status().is_success() => (
            serde_json::json!({ "success": true, "status": response.status().as_u16() }),
            true,
        ),
        Ok(response) => {
            let status = response.status();
            tracing::warn!(host = %safe_hostname(&url), %status, "forward webhook rejected the notification");
            (
                serde_json::json!({ "success": false, "status": status.as_u16() }),
                false,
            )
        }
        Err(error) => {
            tracing::warn!(host = %safe_hostname(&url), %error, "forward webhook request failed");
            (
                serde_json::json!({ "success": false, "error": error.to_string() }),
                false,
            )
        }
    };
    trace.record_span("webhook-forward", started, input, output).await;

    success
}

/// Hostname of the URL, or a placeholder when it does not parse.
fn safe_hostname(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "[invalid-url]".to_string())
}

/// Downstream task wrapper so forwarding joins the settlement cycle.
pub struct ForwardTask {
    forwarder: Arc<WebhookForwarder>,
}

impl ForwardTask {
    pub fn new(forwarder: Arc<WebhookForwarder>) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl DownstreamTask for ForwardTask {
    fn name(&self) -> &'static str {
        "forward"
    }

    async fn run(&self, issue_id: IssueId, trace: &CycleTrace) -> crate::Result<()> {
        self.forwarder.forward_all(issue_id, trace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NoopSink;

    #[test]
    fn hostname_is_extracted_for_span_metadata() {
        assert_eq!(
            safe_hostname("https://hooks.example.com/secret-token/path"),
            "hooks.example.com"
        );
    }

    #[test]
    fn unparseable_urls_get_a_placeholder() {
        assert_eq!(safe_hostname("not a url"), "[invalid-url]");
    }

    #[tokio::test]
    async fn no_configured_urls_is_a_success() {
        let forwarder = WebhookForwarder::new(reqwest::Client::new(), Vec::new());
        let trace = CycleTrace::new(Arc::new(NoopSink));

        let result = forwarder.forward_all(IssueId(7), &trace).await;
        assert!(result.is_ok());
    }
}
