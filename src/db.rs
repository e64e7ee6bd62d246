//! SQLite connectivity for the harvest catalog.
//!
//! One pooled connection set serves the whole crate: harvest jobs write
//! sources, job rows, and resources while search reads the same file.
//! WAL mode keeps those readers from blocking behind a running harvest,
//! and migrations bring the schema up to date on open.
//!
//! # Example
//!
//! ```no_run
//! use oerharvest_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("catalog.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Pool size. SQLite serializes writes, so a handful is enough.
const MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before giving up
/// with `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Errors from opening or migrating the catalog database.
#[derive(Error, Debug)]
pub enum DbError {
    /// Opening the database or executing a pragma failed.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// A schema migration failed.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Handle to the catalog database.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the catalog database at `db_path`,
    /// enables WAL mode, and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] when the file cannot be opened
    /// and [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&url)
            .await?;

        // WAL keeps search reads from blocking behind harvest writes.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Opens a private in-memory catalog with the schema applied.
    ///
    /// A single connection keeps the database alive for the handle's
    /// lifetime; WAL is pointless without a file and is not set.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] or [`DbError::Migration`] as
    /// [`Database::new`] does.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying connection pool, for executing queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reports whether the journal is in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Drains and closes every pooled connection.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
