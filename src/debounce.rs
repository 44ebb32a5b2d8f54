//! Debounced settlement of tracker events.
//!
//! Events for an issue do not settle immediately. Each one opens or resets a
//! per-issue window; only after the window elapses with no further events
//! does the settlement cycle run. Windows are durable, so a restart resumes
//! them instead of dropping queued events.

pub mod actor;
pub mod store;

pub use store::{DebounceStore, WindowRow};

use crate::cycle::CycleRunner;
use crate::error::DebounceError;
use crate::IssueId;
use actor::{ActorMessage, DebounceActor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Owns one debounce actor per issue and routes events to them.
pub struct DebounceRegistry {
    store: DebounceStore,
    runner: Arc<CycleRunner>,
    delay: Duration,
    actors: RwLock<HashMap<IssueId, mpsc::Sender<ActorMessage>>>,
}

impl DebounceRegistry {
    pub fn new(store: DebounceStore, runner: Arc<CycleRunner>, delay: Duration) -> Self {
        Self {
            store,
            runner,
            delay,
            actors: RwLock::new(HashMap::new()),
        }
    }

    /// Respawn actors for windows that survived a restart. Returns how many
    /// windows were picked up.
    pub async fn replay(&self) -> crate::Result<usize> {
        let rows = self.store.load_all().await?;

        let mut actors = self.actors.write().await;
        let mut replayed = 0;
        for row in rows {
            if actors.contains_key(&row.issue_id) {
                continue;
            }
            let sender = self.spawn_actor(row.issue_id, Some(&row));
            actors.insert(row.issue_id, sender);
            replayed += 1;
            tracing::info!(
                issue_id = %row.issue_id,
                pending_count = row.pending_count,
                "replayed debounce window"
            );
        }
        Ok(replayed)
    }

    /// Record one tracker event for an issue. Resolves only once the updated
    /// window row is durable; an error here means nothing was persisted and
    /// the caller should let the sender retry delivery.
    pub async fn on_event(&self, issue_id: IssueId) -> crate::Result<()> {
        let sender = self.actor_for(issue_id).await;

        let (ack, ack_rx) = oneshot::channel();
        if sender.send(ActorMessage::Event { ack }).await.is_err() {
            return Err(DebounceError::ActorGone(issue_id).into());
        }
        match ack_rx.await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(DebounceError::ActorGone(issue_id).into()),
        }
    }

    /// Sender for the issue's actor, spawning it on first use.
    async fn actor_for(&self, issue_id: IssueId) -> mpsc::Sender<ActorMessage> {
        {
            let actors = self.actors.read().await;
            if let Some(sender) = actors.get(&issue_id) {
                return sender.clone();
            }
        }

        let mut actors = self.actors.write().await;
        if let Some(sender) = actors.get(&issue_id) {
            return sender.clone();
        }
        let sender = self.spawn_actor(issue_id, None);
        actors.insert(issue_id, sender.clone());
        sender
    }

    fn spawn_actor(
        &self,
        issue_id: IssueId,
        initial: Option<&WindowRow>,
    ) -> mpsc::Sender<ActorMessage> {
        let (actor, sender) = DebounceActor::new(
            issue_id,
            self.store.clone(),
            Arc::clone(&self.runner),
            self.delay,
            initial,
        );
        tokio::spawn(actor.run());
        sender
    }
}
