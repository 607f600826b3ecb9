//! SQLite bootstrap for the chain database.
//!
//! The database holds two tables: `buckets` (the chain segments) and
//! `conversation_heads` (the per-conversation append pointer). The schema is
//! created on open, so there is no separate migration step.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Schema for the chain database.
const SCHEMA: &str = r#"
-- Chain segments. message_ids is a JSON array of opaque message identifiers
-- in append order. next_bucket_id points at the next-older bucket, empty
-- string at the chain terminus. Buckets are never deleted.
CREATE TABLE IF NOT EXISTS buckets (
    bucket_id TEXT PRIMARY KEY NOT NULL,
    message_ids TEXT NOT NULL DEFAULT '[]',
    next_bucket_id TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Per-conversation pointer at the bucket currently accepting appends.
CREATE TABLE IF NOT EXISTS conversation_heads (
    conversation_id TEXT PRIMARY KEY NOT NULL,
    newest_bucket_id TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_heads_newest_bucket
    ON conversation_heads(newest_bucket_id);
"#;

/// Chain database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the chain database.
    ///
    /// Creates the database file and parent directories if they don't exist.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to chain database: {}", path.display()))?;

        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        let db = Self { pool, path: None };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Initialize the database schema.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing chain database schema")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the database file path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the database connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Check if the database is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_open() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("chain.db");

        let db = Database::open(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
        assert!(db_path.exists());
        assert_eq!(db.path(), Some(db_path.as_path()));

        db.close().await;
    }

    #[tokio::test]
    async fn test_in_memory_has_schema() {
        let db = Database::in_memory().await.unwrap();

        // Both tables should exist and be empty
        let buckets: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM buckets")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(buckets.0, 0);

        let heads: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversation_heads")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(heads.0, 0);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("chain.db");

        let db = Database::open(&db_path).await.unwrap();
        db.close().await;

        // Opening again re-runs the schema without error
        let db = Database::open(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
        db.close().await;
    }
}
