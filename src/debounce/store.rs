//! Durable debounce window rows.

use crate::error::DebounceError;
use crate::IssueId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqlitePool};

/// One persisted debounce window: how many events are waiting and when
/// the window elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRow {
    pub issue_id: IssueId,
    pub pending_count: u64,
    pub fire_at_ms: i64,
}

/// Persistence for debounce windows, one row per issue.
#[derive(Clone)]
pub struct DebounceStore {
    pool: SqlitePool,
}

impl DebounceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the window row for an issue, or replace it wholesale.
    pub async fn upsert(&self, row: &WindowRow) -> Result<(), DebounceError> {
        sqlx::query(
            "INSERT INTO debounce_windows (issue_id, pending_count, fire_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(issue_id) DO UPDATE SET
                 pending_count = excluded.pending_count,
                 fire_at_ms = excluded.fire_at_ms,
                 updated_at_ms = excluded.updated_at_ms",
        )
        .bind(row.issue_id.0 as i64)
        .bind(row.pending_count as i64)
        .bind(row.fire_at_ms)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(DebounceError::Persist)?;

        Ok(())
    }

    pub async fn load(&self, issue_id: IssueId) -> Result<Option<WindowRow>, DebounceError> {
        let row = sqlx::query(
            "SELECT issue_id, pending_count, fire_at_ms FROM debounce_windows
             WHERE issue_id = ?",
        )
        .bind(issue_id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(DebounceError::Persist)?;

        row.map(|row| window_from_row(&row)).transpose()
    }

    /// Every persisted window, soonest deadline first. Used at startup to
    /// rebuild actors for windows that survived a restart.
    pub async fn load_all(&self) -> Result<Vec<WindowRow>, DebounceError> {
        let rows = sqlx::query(
            "SELECT issue_id, pending_count, fire_at_ms FROM debounce_windows
             ORDER BY fire_at_ms",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DebounceError::Persist)?;

        rows.iter().map(window_from_row).collect()
    }

    /// Delete the row only if its pending count still equals the snapshot
    /// taken when the settlement cycle started. Returns whether a row was
    /// removed; false means events arrived mid-cycle and the window stays.
    pub async fn clear_if_count(
        &self,
        issue_id: IssueId,
        snapshot: u64,
    ) -> Result<bool, DebounceError> {
        let result = sqlx::query(
            "DELETE FROM debounce_windows WHERE issue_id = ? AND pending_count = ?",
        )
        .bind(issue_id.0 as i64)
        .bind(snapshot as i64)
        .execute(&self.pool)
        .await
        .map_err(DebounceError::Persist)?;

        Ok(result.rows_affected() > 0)
    }
}

fn window_from_row(row: &SqliteRow) -> Result<WindowRow, DebounceError> {
    let issue_id: i64 = row.try_get("issue_id").map_err(DebounceError::Persist)?;
    let pending_count: i64 = row.try_get("pending_count").map_err(DebounceError::Persist)?;
    let fire_at_ms: i64 = row.try_get("fire_at_ms").map_err(DebounceError::Persist)?;

    Ok(WindowRow {
        issue_id: IssueId(issue_id as u64),
        pending_count: pending_count as u64,
        fire_at_ms,
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn store() -> DebounceStore {
        let db = Db::connect_in_memory().await.unwrap();
        DebounceStore::new(db.pool.clone())
    }

    fn row(issue_id: u64, pending_count: u64, fire_at_ms: i64) -> WindowRow {
        WindowRow {
            issue_id: IssueId(issue_id),
            pending_count,
            fire_at_ms,
        }
    }

    #[tokio::test]
    async fn upsert_then_load_round_trips() {
        let store = store().await;
        store.upsert(&row(42, 1, 1_000)).await.unwrap();

        let loaded = store.load(IssueId(42)).await.unwrap().unwrap();
        assert_eq!(loaded, row(42, 1, 1_000));
    }

    #[tokio::test]
    async fn upsert_replaces_the_existing_row() {
        let store = store().await;
        store.upsert(&row(42, 1, 1_000)).await.unwrap();
        store.upsert(&row(42, 2, 2_000)).await.unwrap();

        let loaded = store.load(IssueId(42)).await.unwrap().unwrap();
        assert_eq!(loaded.pending_count, 2);
        assert_eq!(loaded.fire_at_ms, 2_000);
    }

    #[tokio::test]
    async fn load_missing_issue_returns_none() {
        let store = store().await;
        assert!(store.load(IssueId(404)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_the_row_when_the_count_matches() {
        let store = store().await;
        store.upsert(&row(42, 3, 1_000)).await.unwrap();

        assert!(store.clear_if_count(IssueId(42), 3).await.unwrap());
        assert!(store.load(IssueId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_keeps_the_row_when_the_count_moved_on() {
        let store = store().await;
        store.upsert(&row(42, 5, 1_000)).await.unwrap();

        assert!(!store.clear_if_count(IssueId(42), 3).await.unwrap());
        let loaded = store.load(IssueId(42)).await.unwrap().unwrap();
        assert_eq!(loaded.pending_count, 5);
    }

    #[tokio::test]
    async fn load_all_orders_by_deadline() {
        let store = store().await;
        store.upsert(&row(2, 1, 3_000)).await.unwrap();
        store.upsert(&row(1, 1, 1_000)).await.unwrap();
        store.upsert(&row(3, 1, 2_000)).await.unwrap();

        let all = store.load_all().await.unwrap();
        let ids: Vec<u64> = all.iter().map(|window| window.issue_id.0).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }
}
