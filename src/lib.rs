//! issuebot: debounced issue summaries for a Ruby bug tracker.
//!
//! Inbound mailing-list traffic about an issue is coalesced per issue id by a
//! debounce actor; once an issue settles, a settlement cycle fans out to the
//! downstream tasks (LLM summary to Discord, webhook mirrors) concurrently.

pub mod config;
pub mod cycle;
pub mod db;
pub mod debounce;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod server;
pub mod summarize;
pub mod trace;
pub mod tracker;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Identifier of a tracked issue on the remote tracker.
///
/// Doubles as the routing key: every event carrying the same id lands on the
/// same debounce actor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IssueId(pub u64);

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for IssueId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
