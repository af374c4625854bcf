//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode
//! enabled, so the admin API can read status rows while worker callbacks
//! and triggers write them. The database file and its parent directories
//! are created automatically if they don't exist.
//!
//! Foreign keys are switched on for every connection; deregistering a
//! source relies on `ON DELETE CASCADE` to drop its status rows and
//! documents. A busy timeout lets concurrent claimers queue on the write
//! lock instead of failing with `SQLITE_BUSY`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
