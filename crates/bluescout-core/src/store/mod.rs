//! Sqlite-backed persistence.
//!
//! One [`Store`] wraps a connection pool; each scan process opens its own
//! store so storage connections never cross a process boundary. Schema is
//! managed through checked-in sqlx migrations.
//!
//! Submodules group operations by table:
//!
//! - [`events`] - scan event rows (ownership claims, polling interval, mode)
//! - [`filters`] - filter rule rows, loaded into [`crate::filter::FilterSet`]
//! - [`results`] - device get-or-create and batched result inserts

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub mod events;
pub mod filters;
pub mod results;

/// Handle to the bluescout database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and apply pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a migration fails.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options, 5).await
    }

    /// Open a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn open_in_memory() -> Result<Self> {
        // A second connection would see a different empty database, so the
        // pool is pinned to exactly one.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, for callers that need raw queries.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
