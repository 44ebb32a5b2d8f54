//! Best-effort cycle observability: traces, spans, and generation records.
//!
//! Sink failures are never allowed to affect the settlement cycle; every
//! caller logs and moves on.

use crate::IssueId;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};

const INGESTION_PATH: &str = "/api/public/ingestion";
const CYCLE_TRACE_NAME: &str = "email-summarize";
const GENERATION_NAME: &str = "llm-call";

/// Best-effort sink for settlement cycle traces.
///
/// Implementations must be safe to share across cycles; callers capture every
/// error locally and never let one propagate.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Open the cycle-level trace.
    async fn start_cycle(&self, trace_id: &str, issue_id: IssueId) -> crate::Result<()>;

    /// Finalize the cycle-level trace with its aggregate outcome.
    async fn end_cycle(&self, trace_id: &str, success: bool) -> crate::Result<()>;

    /// Record one timed sub-operation.
    async fn span(
        &self,
        trace_id: &str,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> crate::Result<()>;

    /// Record one model call with its prompt and completion.
    async fn generation(
        &self,
        trace_id: &str,
        model: &str,
        input: &str,
        output: &str,
        started: DateTime<Utc>,
        issue_id: IssueId,
    ) -> crate::Result<()>;
}

/// Sink wired when no tracing backend is configured.
pub struct NoopSink;

#[async_trait]
impl TraceSink for NoopSink {
    async fn start_cycle(&self, _trace_id: &str, _issue_id: IssueId) -> crate::Result<()> {
        Ok(())
    }

    async fn end_cycle(&self, _trace_id: &str, _success: bool) -> crate::Result<()> {
        Ok(())
    }

    async fn span(
        &self,
        _trace_id: &str,
        _name: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _input: serde_json::Value,
        _output: serde_json::Value,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn generation(
        &self,
        _trace_id: &str,
        _model: &str,
        _input: &str,
        _output: &str,
        _started: DateTime<Utc>,
        _issue_id: IssueId,
    ) -> crate::Result<()> {
        Ok(())
    }
}

/// Client for the Langfuse batch ingestion API.
pub struct LangfuseSink {
    client: reqwest::Client,
    ingestion_url: String,
    auth_header: String,
}

impl LangfuseSink {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        public_key: &str,
        secret_key: &str,
    ) -> Self {
        Self {
            client,
            ingestion_url: format!("{}{INGESTION_PATH}", base_url.trim_end_matches('/')),
            auth_header: basic_auth(public_key, secret_key),
        }
    }

    /// Ship a single-event batch. The API upserts bodies by id, which is how
    /// `end_cycle` folds its output into the trace created by `start_cycle`.
    async fn ingest(&self, event_type: &str, body: serde_json::Value) -> crate::Result<()> {
        let batch = serde_json::json!({
            "batch": [ingestion_event(event_type, body)],
        });
        let response = self
            .client
            .post(&self.ingestion_url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(&batch)
            .send()
            .await
            .map_err(|error| anyhow::anyhow!("trace ingestion request failed: {error}"))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "trace ingestion returned {}",
                response.status()
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TraceSink for LangfuseSink {
    async fn start_cycle(&self, trace_id: &str, issue_id: IssueId) -> crate::Result<()> {
        self.ingest(
            "trace-create",
            serde_json::json!({
                "id": trace_id,
                "name": CYCLE_TRACE_NAME,
                "tags": ["summarize"],
                "metadata": { "issueId": issue_id },
            }),
        )
        .await
    }

    async fn end_cycle(&self, trace_id: &str, success: bool) -> crate::Result<()> {
        self.ingest(
            "trace-create",
            serde_json::json!({
                "id": trace_id,
                "output": { "success": success },
            }),
        )
        .await
    }

    async fn span(
        &self,
        trace_id: &str,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> crate::Result<()> {
        self.ingest(
            "span-create",
            serde_json::json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "traceId": trace_id,
                "name": name,
                "startTime": start.to_rfc3339(),
                "endTime": end.to_rfc3339(),
                "input": input,
                "output": output,
            }),
        )
        .await
    }

    async fn generation(
        &self,
        trace_id: &str,
        model: &str,
        input: &str,
        output: &str,
        started: DateTime<Utc>,
        issue_id: IssueId,
    ) -> crate::Result<()> {
        self.ingest(
            "generation-create",
            serde_json::json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "traceId": trace_id,
                "name": GENERATION_NAME,
                "model": model,
                "input": input,
                "output": output,
                "startTime": started.to_rfc3339(),
                "endTime": Utc::now().to_rfc3339(),
                "metadata": { "issueId": issue_id },
            }),
        )
        .await
    }
}

fn basic_auth(public_key: &str, secret_key: &str) -> String {
    let credentials = BASE64.encode(format!("{public_key}:{secret_key}"));
    format!("Basic {credentials}")
}

fn ingestion_event(event_type: &str, body: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "timestamp": Utc::now().to_rfc3339(),
        "type": event_type,
        "body": body,
    })
}
