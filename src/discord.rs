//! Discord webhook presentation of issue summaries.

use crate::cycle::CycleTrace;
use crate::tracker::IssueKind;
use async_trait::async_trait;

/// Discord rejects messages over 2000 characters; leave headroom for the
/// title, link, and footer around the body.
const MAX_BODY_CHARS: usize = 1900;
const TRUNCATION_SUFFIX: &str = "...(內容過長，已截斷)";
const FOOTER: &str = "📝 由 AI 自動翻譯 | 原始內容可能有所不同";
const USER_AGENT: &str = concat!("issuebot/", env!("CARGO_PKG_VERSION"));

/// Rendered summary ready for presentation.
#[derive(Debug, Clone)]
pub struct SummaryCard {
    pub title: String,
    pub body: String,
    pub link: String,
    pub kind: IssueKind,
}

/// Destination for finished summary cards.
#[async_trait]
pub trait SummaryPresenter: Send + Sync {
    async fn present(&self, card: &SummaryCard, trace: &CycleTrace) -> crate::Result<()>;
}

/// Posts summary cards to a Discord webhook.
#[derive(Clone)]
pub struct DiscordPresenter {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordPresenter {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl SummaryPresenter for DiscordPresenter {
    async fn present(&self, card: &SummaryCard, trace: &CycleTrace) -> crate::Result<()> {
        let content = render_content(card);
        let started = chrono::Utc::now();
        let result = self
            .client
            .post(&self.webhook_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await;

        // The webhook URL is a credential; spans only ever see a placeholder.
        let input = serde_json::json!({ "webhookUrl": "[redacted]", "kind": card.kind });
        let (output, result) = match result {
            Ok(response) if response.status().is_success() => (
                serde_json::json!({ "success": true, "status": response.status().as_u16() }),
                Ok(()),
            ),
            Ok(response) => {
                let status = response.status();
                tracing::warn!(status = %status, "discord webhook rejected the summary");
                (
                    serde_json::json!({ "success": false, "status": status.as_u16() }),
                    Err(anyhow::anyhow!("discord webhook returned {status}").into()),
                )
            }
            Err(error) => {
                tracing::warn!(%error, "discord webhook request failed");
                (
                    serde_json::json!({ "success": false, "error": error.to_string() }),
                    Err(anyhow::anyhow!("discord webhook request failed: {error}").into()),
                )
            }
        };
        trace.record_span("discord-webhook", started, input, output).await;

        result
    }
}

/// Assemble the posted message: title heading, truncated body, link, footer.
pub fn render_content(card: &SummaryCard) -> String {
    let body = truncate_chars(&card.body, MAX_BODY_CHARS);
    format!(
        "## {}\n{}\n\n🔗 {}\n{FOOTER}",
        card.title, body, card.link
    )
}

/// Cut at a character boundary and mark the cut, or return the text as-is.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => {
            format!("{}{TRUNCATION_SUFFIX}", &text[..byte_index])
        }
        None => text.to_string(),
    }
}
