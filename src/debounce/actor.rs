//! Per-issue debounce actor.
//!
//! Each tracked issue gets one actor owning its debounce window. The actor
//! serializes event arrivals, the wake-up timer, and cycle completion onto a
//! single loop, so the compare-and-clear decision never races with a new
//! event for the same issue.

use crate::cycle::CycleRunner;
use crate::debounce::store::{DebounceStore, WindowRow};
use crate::error::DebounceError;
use crate::IssueId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub enum ActorMessage {
    /// A new tracker event for this issue. The ack resolves once the window
    /// row is durable, or with the persistence error when it is not.
    Event {
        ack: oneshot::Sender<Result<(), DebounceError>>,
    },
    /// The spawned settlement cycle finished. `snapshot` is the pending
    /// count the cycle was started with.
    CycleFinished { snapshot: u64, success: bool },
}

pub struct DebounceActor {
    issue_id: IssueId,
    store: DebounceStore,
    runner: Arc<CycleRunner>,
    delay: Duration,
    /// Events waiting behind the current window, mirrored from the store.
    pending_count: Option<u64>,
    /// When the current window elapses. None while no window is open.
    deadline: Option<tokio::time::Instant>,
    /// Snapshot count of the in-flight settlement cycle, if any.
    settling: Option<u64>,
    message_rx: mpsc::Receiver<ActorMessage>,
    self_tx: mpsc::Sender<ActorMessage>,
}

impl DebounceActor {
    /// Create an actor, optionally resuming a window that survived a restart.
    pub fn new(
        issue_id: IssueId,
        store: DebounceStore,
        runner: Arc<CycleRunner>,
        delay: Duration,
        initial: Option<&WindowRow>,
    ) -> (Self, mpsc::Sender<ActorMessage>) {
        let (self_tx, message_rx) = mpsc::channel(64);

        // An already-overdue window gets a deadline of now and fires on the
        // first loop iteration.
        let deadline = initial.map(|row| {
            let remaining_ms = (row.fire_at_ms - now_ms()).max(0) as u64;
            tokio::time::Instant::now() + Duration::from_millis(remaining_ms)
        });

        let actor = Self {
            issue_id,
            store,
            runner,
            delay,
            pending_count: initial.map(|row| row.pending_count),
            deadline,
            settling: None,
            message_rx,
            self_tx: self_tx.clone(),
        };
        (actor, self_tx)
    }

    /// Run the actor event loop.
    pub async fn run(mut self) {
        tracing::debug!(issue_id = %self.issue_id, "debounce actor started");

        loop {
            // A wake-up during settlement waits for the cycle to finish;
            // CycleFinished re-evaluates the deadline.
            let wake_deadline = if self.settling.is_none() {
                self.deadline
            } else {
                None
            };
            let sleep_duration = wake_deadline
                .map(|deadline| {
                    let now = tokio::time::Instant::now();
                    if deadline > now {
                        deadline - now
                    } else {
                        Duration::from_millis(1)
                    }
                })
                .unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                Some(message) = self.message_rx.recv() => {
                    match message {
                        ActorMessage::Event { ack } => {
                            let result = self.handle_event().await;
                            if ack.send(result).is_err() {
                                tracing::warn!(
                                    issue_id = %self.issue_id,
                                    "event acknowledgement dropped"
                                );
                            }
                        }
                        ActorMessage::CycleFinished { snapshot, success } => {
                            self.handle_cycle_finished(snapshot, success).await;
                        }
                    }
                }
                _ = tokio::time::sleep(sleep_duration), if wake_deadline.is_some() => {
                    self.handle_wake_up();
                }
                else => break,
            }
        }

        tracing::debug!(issue_id = %self.issue_id, "debounce actor stopped");
    }

    /// Count the event and open or reset the window.
    ///
    /// The row is persisted before any in-memory state changes; a store
    /// failure leaves the actor exactly as it was so the caller can surface
    /// the error and the sender can retry delivery.
    async fn handle_event(&mut self) -> Result<(), DebounceError> {
        let next_count = self.pending_count.unwrap_or(0) + 1;
        let row = WindowRow {
            issue_id: self.issue_id,
            pending_count: next_count,
            fire_at_ms: now_ms() + self.delay.as_millis() as i64,
        };
        self.store.upsert(&row).await?;

        let reset = self.pending_count.is_some();
        self.pending_count = Some(next_count);
        self.deadline = Some(tokio::time::Instant::now() + self.delay);

        if reset {
            tracing::debug!(
                issue_id = %self.issue_id,
                pending_count = next_count,
                "debounce window reset by new event"
            );
        } else {
            tracing::info!(issue_id = %self.issue_id, "debounce window opened");
        }
        Ok(())
    }

    /// The window elapsed: snapshot the pending count and start a cycle.
    fn handle_wake_up(&mut self) {
        self.deadline = None;
        let Some(pending_count) = self.pending_count else {
            return;
        };

        tracing::info!(
            issue_id = %self.issue_id,
            pending_count,
            "debounce window elapsed, starting settlement cycle"
        );
        self.settling = Some(pending_count);

        let runner = Arc::clone(&self.runner);
        let issue_id = self.issue_id;
        let self_tx = self.self_tx.clone();
        let snapshot = pending_count;
        tokio::spawn(async move {
            let outcome = runner.run(issue_id).await;
            let finished = ActorMessage::CycleFinished {
                snapshot,
                success: outcome.success,
            };
            if self_tx.send(finished).await.is_err() {
                tracing::warn!(issue_id = %issue_id, "debounce actor gone before cycle completion");
            }
        });
    }

    /// Compare-and-clear: drop the window only if no events arrived while
    /// the cycle ran. Task failures never keep the window open; only a
    /// fresher pending count or a store error does.
    async fn handle_cycle_finished(&mut self, snapshot: u64, success: bool) {
        self.settling = None;

        let current = self.pending_count.unwrap_or(0);
        if current > snapshot {
            // The mid-cycle event already re-armed the deadline; if it has
            // passed by now the next loop iteration fires immediately.
            tracing::info!(
                issue_id = %self.issue_id,
                pending_count = current,
                "events arrived mid-cycle, keeping debounce window"
            );
            return;
        }

        match self.store.clear_if_count(self.issue_id, snapshot).await {
            Ok(removed) => {
                if !removed {
                    tracing::warn!(
                        issue_id = %self.issue_id,
                        "window row already gone at clear"
                    );
                }
                self.pending_count = None;
                self.deadline = None;
                tracing::info!(issue_id = %self.issue_id, success, "debounce window settled");
            }
            Err(error) => {
                // State survives and the whole cycle reruns one delay later.
                self.deadline = Some(tokio::time::Instant::now() + self.delay);
                tracing::error!(
                    issue_id = %self.issue_id,
                    %error,
                    "failed to clear debounce window, retrying later"
                );
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
