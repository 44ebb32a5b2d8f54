//! Settlement cycle: concurrent fan-out to downstream tasks.
//!
//! A cycle runs once per settled debounce window. Every task runs to a
//! terminal state even when siblings fail; the aggregate outcome feeds the
//! trace sink and nothing else. Whether the actor clears its window is
//! decided by the event race alone, never by task outcomes.

use crate::IssueId;
use crate::trace::TraceSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One independent unit of downstream work triggered by a settled window.
///
/// Tasks are side-effecting and independently retryable; they report failure
/// through their `Result`, never by panicking through the orchestrator.
#[async_trait]
pub trait DownstreamTask: Send + Sync {
    /// Stable name used in logs, task outcomes, and trace spans.
    fn name(&self) -> &'static str;

    /// Execute the task for one settled issue.
    async fn run(&self, issue_id: IssueId, trace: &CycleTrace) -> crate::Result<()>;
}

/// Correlation handle for one cycle's trace, shared by every task in it.
///
/// All sink calls are absorbed here: a failing sink is logged and forgotten,
/// so collaborators can record spans without carrying error plumbing.
#[derive(Clone)]
pub struct CycleTrace {
    trace_id: String,
    sink: Arc<dyn TraceSink>,
}

impl CycleTrace {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            sink,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Record a span ending now.
    pub async fn record_span(
        &self,
        name: &str,
        start: DateTime<Utc>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) {
        let end = Utc::now();
        if let Err(error) = self
            .sink
            .span(&self.trace_id, name, start, end, input, output)
            .await
        {
            tracing::warn!(%error, span = name, "failed to record trace span");
        }
    }

    /// Record a model call.
    pub async fn record_generation(
        &self,
        model: &str,
        input: &str,
        output: &str,
        started: DateTime<Utc>,
        issue_id: IssueId,
    ) {
        if let Err(error) = self
            .sink
            .generation(&self.trace_id, model, input, output, started, issue_id)
            .await
        {
            tracing::warn!(%error, issue_id = %issue_id, "failed to record generation");
        }
    }
}

/// Terminal state of one downstream task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub name: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

/// Result of one finished settlement cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub trace_id: String,
    /// True iff every downstream task succeeded.
    pub success: bool,
    pub tasks: Vec<TaskOutcome>,
}

/// Runs the settlement cycle for one issue.
pub struct CycleRunner {
    tasks: Vec<Arc<dyn DownstreamTask>>,
    sink: Arc<dyn TraceSink>,
}

impl CycleRunner {
    pub fn new(tasks: Vec<Arc<dyn DownstreamTask>>, sink: Arc<dyn TraceSink>) -> Self {
        Self { tasks, sink }
    }

    /// Execute every downstream task concurrently and wait for all of them.
    ///
    /// Settle-all, never race-to-first: a failing or panicking task is turned
    /// into a failed `TaskOutcome` while its siblings run to completion.
    pub async fn run(&self, issue_id: IssueId) -> CycleOutcome {
        let trace = CycleTrace::new(self.sink.clone());
        if let Err(error) = self.sink.start_cycle(trace.trace_id(), issue_id).await {
            tracing::warn!(%error, issue_id = %issue_id, "failed to open cycle trace");
        }

        let mut handles = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let task = Arc::clone(task);
            let name = task.name();
            let task_trace = trace.clone();
            let started = Utc::now();
            let handle =
                tokio::spawn(async move { task.run(issue_id, &task_trace).await });
            handles.push((name, started, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, started, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(())) => TaskOutcome {
                    name,
                    success: true,
                    error: None,
                },
                Ok(Err(error)) => {
                    tracing::warn!(
                        %error,
                        issue_id = %issue_id,
                        task = name,
                        "downstream task failed"
                    );
                    TaskOutcome {
                        name,
                        success: false,
                        error: Some(error.to_string()),
                    }
                }
                Err(error) => {
                    tracing::error!(
                        %error,
                        issue_id = %issue_id,
                        task = name,
                        "downstream task panicked"
                    );
                    TaskOutcome {
                        name,
                        success: false,
                        error: Some(error.to_string()),
                    }
                }
            };

            let output = match &outcome.error {
                None => serde_json::json!({ "success": true }),
                Some(reason) => serde_json::json!({ "success": false, "error": reason }),
            };
            trace
                .record_span(name, started, serde_json::json!({ "issueId": issue_id }), output)
                .await;

            outcomes.push(outcome);
        }

        let success = outcomes.iter().all(|outcome| outcome.success);
        if let Err(error) = self.sink.end_cycle(trace.trace_id(), success).await {
            tracing::warn!(%error, issue_id = %issue_id, "failed to finalize cycle trace");
        }
        tracing::info!(
            issue_id = %issue_id,
            trace_id = %trace.trace_id(),
            success,
            "settlement cycle finished"
        );

        CycleOutcome {
            trace_id: trace.trace_id().to_string(),
            success,
            tasks: outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NoopSink;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedTask {
        name: &'static str,
        fail: bool,
        delay: Duration,
        calls: Arc<Mutex<Vec<IssueId>>>,
    }

    #[async_trait]
    impl DownstreamTask for ScriptedTask {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, issue_id: IssueId, _trace: &CycleTrace) -> crate::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.lock().unwrap().push(issue_id);
            if self.fail {
                Err(anyhow::anyhow!("{} exploded", self.name).into())
            } else {
                Ok(())
            }
        }
    }

    fn scripted(
        name: &'static str,
        fail: bool,
        delay: Duration,
    ) -> (Arc<dyn DownstreamTask>, Arc<Mutex<Vec<IssueId>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let task = ScriptedTask {
            name,
            fail,
            delay,
            calls: calls.clone(),
        };
        (Arc::new(task), calls)
    }

    #[tokio::test]
    async fn all_tasks_succeeding_yields_success() {
        let (a, a_calls) = scripted("summarize", false, Duration::ZERO);
        let (b, b_calls) = scripted("forward", false, Duration::ZERO);
        let runner = CycleRunner::new(vec![a, b], Arc::new(NoopSink));

        let outcome = runner.run(IssueId(42)).await;

        assert!(outcome.success);
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(a_calls.lock().unwrap().as_slice(), &[IssueId(42)]);
        assert_eq!(b_calls.lock().unwrap().as_slice(), &[IssueId(42)]);
    }

    #[tokio::test]
    async fn one_failure_never_blocks_the_sibling() {
        let (failing, _) = scripted("forward", true, Duration::ZERO);
        let (slow, slow_calls) = scripted("summarize", false, Duration::from_millis(50));
        let runner = CycleRunner::new(vec![failing, slow], Arc::new(NoopSink));

        let outcome = runner.run(IssueId(7)).await;

        assert!(!outcome.success);
        // The slow sibling still ran to completion after the failure.
        assert_eq!(slow_calls.lock().unwrap().len(), 1);
        let forward = outcome
            .tasks
            .iter()
            .find(|task| task.name == "forward")
            .expect("forward outcome");
        assert!(!forward.success);
        assert!(forward.error.as_deref().is_some_and(|e| e.contains("exploded")));
        let summarize = outcome
            .tasks
            .iter()
            .find(|task| task.name == "summarize")
            .expect("summarize outcome");
        assert!(summarize.success);
    }

    #[tokio::test]
    async fn panicking_task_is_contained() {
        struct PanickingTask;

        #[async_trait]
        impl DownstreamTask for PanickingTask {
            fn name(&self) -> &'static str {
                "panicker"
            }

            async fn run(&self, _issue_id: IssueId, _trace: &CycleTrace) -> crate::Result<()> {
                panic!("boom");
            }
        }

        let (ok, ok_calls) = scripted("summarize", false, Duration::ZERO);
        let runner = CycleRunner::new(vec![Arc::new(PanickingTask), ok], Arc::new(NoopSink));

        let outcome = runner.run(IssueId(1)).await;

        assert!(!outcome.success);
        assert_eq!(ok_calls.lock().unwrap().len(), 1);
        assert!(!outcome.tasks[0].success);
        assert!(outcome.tasks[1].success);
    }

    #[tokio::test]
    async fn empty_task_set_is_a_successful_cycle() {
        let runner = CycleRunner::new(Vec::new(), Arc::new(NoopSink));
        let outcome = runner.run(IssueId(3)).await;

        assert!(outcome.success);
        assert!(outcome.tasks.is_empty());
    }
}
