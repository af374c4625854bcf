//! SQLite-backed [`SyncStore`] implementation.
//!
//! Every conditional transition is a single `UPDATE ... WHERE <guard>`
//! and the caller inspects `rows_affected()`:
//!
//! | Operation | Guard |
//! |-----------|-------|
//! | `try_claim` | enabled, and idle / completed / failed past `retry_after` |
//! | `mark_completed` | `status = 'running'` |
//! | `mark_failed` | `status = 'running' AND failure_count = ?` |
//! | `finish_document` | `ingest_status = 'running'` |
//!
//! SQLite serializes writers, so the guard and the write cannot be
//! interleaved by a concurrent claimer. Multi-row changes (claim plus
//! outbox insert, insert, delete, fan-out, rebind) run inside one
//! transaction.
//!
//! The `ingest_queue` table is the outbox: a winning claim inserts its
//! job in the same transaction, and [`take_jobs`](SyncStore::take_jobs)
//! deletes jobs as workers pick them up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use vector_sync_core::fanout::FanOutPlan;
use vector_sync_core::models::{
    ContentSyncStatus, DocumentSource, IngestJob, QueuedJob, Source, SourceKind, SourceTarget,
    StatusKey, SyncErrorCode, SyncStatus, Watermark,
};
use vector_sync_core::store::{InsertOutcome, SyncStore};

/// SQLite implementation of the [`SyncStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).with_context(|| format!("invalid timestamp {secs}"))
}

fn opt_ts(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(from_ts).transpose()
}

fn parse<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T> {
    s.parse().map_err(anyhow::Error::msg)
}

fn parse_code(s: Option<String>) -> Result<Option<SyncErrorCode>> {
    s.as_deref().map(parse).transpose()
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let kind: SourceKind = parse(row.get::<&str, _>("kind"))?;
    let name: String = row.get("name");
    let target = match kind {
        SourceKind::Repository => SourceTarget::Repository {
            owner: row
                .get::<Option<String>, _>("owner")
                .context("repository source without owner")?,
            name,
            installation_id: row
                .get::<Option<i64>, _>("installation_id")
                .context("repository source without installation")?,
        },
        SourceKind::DocumentCollection => SourceTarget::DocumentCollection { name },
    };
    Ok(Source {
        id: row.get("id"),
        team_id: row.get("team_id"),
        target,
        created_at: from_ts(row.get("created_at"))?,
    })
}

fn status_from_row(row: &SqliteRow) -> Result<ContentSyncStatus> {
    let metadata = row
        .get::<Option<String>, _>("metadata_json")
        .map(|json| serde_json::from_str::<Watermark>(&json))
        .transpose()
        .context("malformed status watermark")?;
    Ok(ContentSyncStatus {
        source_id: row.get("source_id"),
        content_type: parse(row.get::<&str, _>("content_type"))?,
        profile_id: row.get("profile_id"),
        enabled: row.get::<i64, _>("enabled") != 0,
        status: parse(row.get::<&str, _>("status"))?,
        last_synced_at: opt_ts(row.get("last_synced_at"))?,
        error_code: parse_code(row.get("error_code"))?,
        retry_after: opt_ts(row.get("retry_after"))?,
        failure_count: row.get::<i64, _>("failure_count").max(0) as u32,
        metadata,
        updated_at: from_ts(row.get("updated_at"))?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentSource> {
    Ok(DocumentSource {
        id: row.get("id"),
        source_id: row.get("source_id"),
        file_name: row.get("file_name"),
        ingest_status: parse(row.get::<&str, _>("ingest_status"))?,
        ingest_error_code: parse_code(row.get("ingest_error_code"))?,
        created_at: from_ts(row.get("created_at"))?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<QueuedJob> {
    let watermark = row
        .get::<Option<String>, _>("watermark_json")
        .map(|json| serde_json::from_str::<Watermark>(&json))
        .transpose()
        .context("malformed job watermark")?;
    Ok(QueuedJob {
        id: row.get("id"),
        job: IngestJob {
            source_id: row.get("source_id"),
            content_type: parse(row.get::<&str, _>("content_type"))?,
            profile_id: row.get("profile_id"),
            watermark,
            trigger: parse(row.get::<&str, _>("trigger"))?,
        },
        enqueued_at: from_ts(row.get("enqueued_at"))?,
    })
}

const JOB_COLUMNS: &str =
    "id, source_id, content_type, profile_id, watermark_json, trigger, enqueued_at";

const STATUS_COLUMNS: &str = "source_id, content_type, profile_id, enabled, status, \
     last_synced_at, error_code, retry_after, failure_count, metadata_json, updated_at";

const KEY_GUARD: &str = "source_id = ? AND content_type = ? AND profile_id = ?";

#[async_trait]
impl SyncStore for SqliteStore {
    async fn insert_source(
        &self,
        source: &Source,
        statuses: &[ContentSyncStatus],
    ) -> Result<InsertOutcome> {
        let (owner, name, installation_id) = match &source.target {
            SourceTarget::Repository {
                owner,
                name,
                installation_id,
            } => (Some(owner.as_str()), name.as_str(), Some(*installation_id)),
            SourceTarget::DocumentCollection { name } => (None, name.as_str(), None),
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sources (id, team_id, kind, owner, name, installation_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.team_id)
        .bind(source.kind().as_str())
        .bind(owner)
        .bind(name)
        .bind(installation_id)
        .bind(ts(source.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(InsertOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        for row in statuses {
            let metadata = row
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(&format!(
                "INSERT INTO content_sync_status ({STATUS_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&row.source_id)
            .bind(row.content_type.as_str())
            .bind(row.profile_id)
            .bind(row.enabled)
            .bind(row.status.as_str())
            .bind(row.last_synced_at.map(ts))
            .bind(row.error_code.map(|c| c.as_str()))
            .bind(row.retry_after.map(ts))
            .bind(row.failure_count as i64)
            .bind(metadata)
            .bind(ts(row.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self, team_id: &str) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE team_id = ? ORDER BY created_at, id")
            .bind(team_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ingest_queue WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM content_sync_status WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_sources WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn list_statuses(&self, source_id: &str) -> Result<Vec<ContentSyncStatus>> {
        let rows = sqlx::query(&format!(
            "SELECT {STATUS_COLUMNS} FROM content_sync_status WHERE source_id = ?"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        let mut statuses = rows
            .iter()
            .map(status_from_row)
            .collect::<Result<Vec<_>>>()?;
        statuses.sort_by_key(|r| r.key());
        Ok(statuses)
    }

    async fn get_status(&self, key: &StatusKey) -> Result<Option<ContentSyncStatus>> {
        let row = sqlx::query(&format!(
            "SELECT {STATUS_COLUMNS} FROM content_sync_status WHERE {KEY_GUARD}"
        ))
        .bind(&key.source_id)
        .bind(key.content_type.as_str())
        .bind(key.profile_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(status_from_row).transpose()
    }

    async fn apply_fan_out(
        &self,
        source_id: &str,
        plan: &FanOutPlan,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            anyhow::bail!("source {} does not exist", source_id);
        }

        for key in &plan.create {
            sqlx::query(
                r#"
                INSERT INTO content_sync_status
                    (source_id, content_type, profile_id, enabled, status, failure_count, updated_at)
                VALUES (?, ?, ?, 1, 'idle', 0, ?)
                ON CONFLICT(source_id, content_type, profile_id) DO NOTHING
                "#,
            )
            .bind(&key.source_id)
            .bind(key.content_type.as_str())
            .bind(key.profile_id)
            .bind(ts(now))
            .execute(&mut *tx)
            .await?;
        }

        for (keys, enabled) in [(&plan.enable, true), (&plan.disable, false)] {
            for key in keys {
                sqlx::query(&format!(
                    "UPDATE content_sync_status SET enabled = ?, updated_at = ? WHERE {KEY_GUARD}"
                ))
                .bind(enabled)
                .bind(ts(now))
                .bind(&key.source_id)
                .bind(key.content_type.as_str())
                .bind(key.profile_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn try_claim(&self, job: &IngestJob, now: DateTime<Utc>) -> Result<bool> {
        let key = job.key();
        let watermark = job
            .watermark
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(&format!(
            r#"
            UPDATE content_sync_status
            SET status = 'running', updated_at = ?
            WHERE {KEY_GUARD}
              AND enabled = 1
              AND (status IN ('idle', 'completed')
                   OR (status = 'failed' AND (retry_after IS NULL OR retry_after <= ?)))
            "#
        ))
        .bind(ts(now))
        .bind(&key.source_id)
        .bind(key.content_type.as_str())
        .bind(key.profile_id)
        .bind(ts(now))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO ingest_queue
                (source_id, content_type, profile_id, watermark_json, trigger, enqueued_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.source_id)
        .bind(job.content_type.as_str())
        .bind(job.profile_id)
        .bind(watermark)
        .bind(job.trigger.as_str())
        .bind(ts(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn take_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query(&format!(
            r#"
            DELETE FROM ingest_queue
            WHERE id IN (SELECT id FROM ingest_queue ORDER BY id LIMIT ?)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn pending_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingest_queue ORDER BY id LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn mark_completed(
        &self,
        key: &StatusKey,
        watermark: Option<&Watermark>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let watermark = watermark.map(serde_json::to_string).transpose()?;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE content_sync_status
            SET status = 'completed',
                last_synced_at = ?,
                error_code = NULL,
                retry_after = NULL,
                failure_count = 0,
                metadata_json = COALESCE(?, metadata_json),
                updated_at = ?
            WHERE {KEY_GUARD} AND status = 'running'
            "#
        ))
        .bind(ts(now))
        .bind(watermark)
        .bind(ts(now))
        .bind(&key.source_id)
        .bind(key.content_type.as_str())
        .bind(key.profile_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn mark_failed(
        &self,
        key: &StatusKey,
        error_code: SyncErrorCode,
        retry_after: DateTime<Utc>,
        expected_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(&format!(
            r#"
            UPDATE content_sync_status
            SET status = 'failed',
                error_code = ?,
                retry_after = ?,
                failure_count = failure_count + 1,
                updated_at = ?
            WHERE {KEY_GUARD} AND status = 'running' AND failure_count = ?
            "#
        ))
        .bind(error_code.as_str())
        .bind(ts(retry_after))
        .bind(ts(now))
        .bind(&key.source_id)
        .bind(key.content_type.as_str())
        .bind(key.profile_id)
        .bind(expected_failures as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn rebind_installation(
        &self,
        source_id: &str,
        installation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let rebound = sqlx::query(
            "UPDATE sources SET installation_id = ? WHERE id = ? AND kind = 'repository'",
        )
        .bind(installation_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if rebound == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE content_sync_status
            SET status = 'idle', error_code = NULL, retry_after = NULL,
                failure_count = 0, updated_at = ?
            WHERE source_id = ? AND status = 'failed'
            "#,
        )
        .bind(ts(now))
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_document(&self, doc: &DocumentSource) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
            .bind(&doc.source_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            anyhow::bail!("source {} does not exist", doc.source_id);
        }
        sqlx::query(
            r#"
            INSERT INTO document_sources
                (id, source_id, file_name, ingest_status, ingest_error_code, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.file_name)
        .bind(doc.ingest_status.as_str())
        .bind(doc.ingest_error_code.map(|c| c.as_str()))
        .bind(ts(doc.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentSource>> {
        let row = sqlx::query("SELECT * FROM document_sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, source_id: &str) -> Result<Vec<DocumentSource>> {
        let rows = sqlx::query(
            "SELECT * FROM document_sources WHERE source_id = ? ORDER BY created_at, id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM document_sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn start_documents(&self, source_id: &str) -> Result<u64> {
        let moved = sqlx::query(
            r#"
            UPDATE document_sources
            SET ingest_status = 'running', ingest_error_code = NULL
            WHERE source_id = ? AND ingest_status != 'running'
            "#,
        )
        .bind(source_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(moved)
    }

    async fn finish_document(
        &self,
        id: &str,
        status: SyncStatus,
        error_code: Option<SyncErrorCode>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE document_sources
            SET ingest_status = ?, ingest_error_code = ?
            WHERE id = ? AND ingest_status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(error_code.map(|c| c.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }
}

