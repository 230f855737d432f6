//! Database connection management for per-generation chapter stores.
//!
//! Every `(book, generation)` pair lives in its own SQLite file. This module
//! provides the connection pool wrapper used by [`crate::store::ChapterStore`]:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Busy timeout so a reader never fails fast against the single writer
//!
//! # Example
//!
//! ```no_run
//! use bookfetch_core::{Database, DbOptions};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Path::new("chapter.raw.sqlite"), &DbOptions::default()).await?;
//! // Use db.pool() for queries...
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking and a store has one writer.
const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning `SQLITE_BUSY`.
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Connection tuning for a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    /// Maximum pooled connections (clamped to at least 1).
    pub max_connections: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the SQLite file at `db_path`.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Apply the configured busy timeout
    ///
    /// Schema creation is the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns the underlying `sqlx::Error` if the file cannot be opened or
    /// is not a valid SQLite database.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path, options: &DbOptions) -> Result<Self, sqlx::Error> {
        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// A single connection is used so every query sees the same memory
    /// database.
    ///
    /// # Errors
    ///
    /// Returns the underlying `sqlx::Error` if the connection fails.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns the underlying `sqlx::Error` if the query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, sqlx::Error> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// Closing an already closed pool is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Returns true once [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_open_in_memory_succeeds() {
        let db = Database::open_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_open_creates_file_with_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("chapter.raw.sqlite");

        let db = Database::open(&db_path, &DbOptions::default()).await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        assert!(db.is_wal_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_database_rejects_corrupt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("chapter.raw.sqlite");
        std::fs::write(&db_path, b"definitely not a sqlite database, just some bytes").unwrap();

        let result = match Database::open(&db_path, &DbOptions::default()).await {
            Ok(db) => sqlx::query("SELECT name FROM sqlite_master")
                .execute(db.pool())
                .await
                .map(|_| ()),
            Err(error) => Err(error),
        };
        assert!(result.is_err(), "corrupt file should not be usable");
    }

    #[tokio::test]
    async fn test_database_close_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.close().await;
        db.close().await;
        assert!(db.is_closed());
    }

    #[test]
    fn test_db_options_default() {
        let options = DbOptions::default();
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.busy_timeout_ms, 5000);
    }
}
