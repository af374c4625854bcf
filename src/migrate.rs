//! Schema migrations.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so `vsync init` can be
//! run any number of times.
//!
//! | Table | Rows |
//! |-------|------|
//! | `sources` | One per registered repository or document collection |
//! | `content_sync_status` | One per (source, content type, embedding profile) |
//! | `document_sources` | Files inside a document collection |
//! | `ingest_queue` | Outbox of claimed jobs waiting for a worker |
//!
//! Timestamps are Unix seconds.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            owner TEXT,
            name TEXT NOT NULL,
            installation_id INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // At most one repository source per (team, owner, name)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_repository
        ON sources(team_id, owner, name)
        WHERE kind = 'repository'
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_sync_status (
            source_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'idle',
            last_synced_at INTEGER,
            error_code TEXT,
            retry_after INTEGER,
            failure_count INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source_id, content_type, profile_id),
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_sources (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            ingest_status TEXT NOT NULL DEFAULT 'idle',
            ingest_error_code TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            watermark_json TEXT,
            trigger TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_team ON sources(team_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_sources_source ON document_sources(source_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingest_queue_source ON ingest_queue(source_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
