//! Database connection management and migrations.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// SQLite handle for the debounce window table.
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database file and run migrations.
    pub async fn connect(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("failed to open sqlite database at {database_path}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .with_context(|| "failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// In-memory database, used by tests. Pinned to a single connection so
    /// every query sees the same memory database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .with_context(|| "failed to open in-memory sqlite database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .with_context(|| "failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
