//! Storage abstraction for Vector Sync.
//!
//! The [`SyncStore`] trait defines every persistence operation the
//! orchestration service needs, so the same service logic runs against
//! SQLite in production and an in-memory store in tests.
//!
//! Implementations must honour three atomicity rules:
//!
//! - [`try_claim`](SyncStore::try_claim) is a single compare-and-set: the
//!   gate predicate, the `→ running` write and the outbox append happen in
//!   one step, so two concurrent claimers of one key produce exactly one
//!   winner and a claimed row always has a queued job.
//! - [`mark_completed`](SyncStore::mark_completed) and
//!   [`mark_failed`](SyncStore::mark_failed) only touch rows that are still
//!   `running`; anything else is a stale callback and a no-op.
//! - [`rebind_installation`](SyncStore::rebind_installation),
//!   [`delete_source`](SyncStore::delete_source) and
//!   [`apply_fan_out`](SyncStore::apply_fan_out) update all affected rows
//!   in one transaction.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fanout::FanOutPlan;
use crate::models::{
    ContentSyncStatus, DocumentSource, IngestJob, QueuedJob, Source, StatusKey, SyncErrorCode,
    SyncStatus, Watermark,
};

/// Result of [`SyncStore::insert_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A repository source with the same `(team, owner, name)` exists.
    Duplicate,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_source`](SyncStore::insert_source) | Create a source and its initial status rows |
/// | [`delete_source`](SyncStore::delete_source) | Remove a source with all status rows and documents |
/// | [`try_claim`](SyncStore::try_claim) | Atomic `→ running` transition plus outbox append |
/// | [`take_jobs`](SyncStore::take_jobs) | Hand queued jobs to a worker |
/// | [`mark_completed`](SyncStore::mark_completed) / [`mark_failed`](SyncStore::mark_failed) | Finish a running row |
/// | [`rebind_installation`](SyncStore::rebind_installation) | Swap credentials and clear failure backoff |
/// | [`apply_fan_out`](SyncStore::apply_fan_out) | Create / enable / disable status rows |
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert a source together with its status rows.
    async fn insert_source(
        &self,
        source: &Source,
        statuses: &[ContentSyncStatus],
    ) -> Result<InsertOutcome>;

    async fn get_source(&self, id: &str) -> Result<Option<Source>>;

    /// All sources of a team, oldest first.
    async fn list_sources(&self, team_id: &str) -> Result<Vec<Source>>;

    /// Delete a source and everything it owns, queued jobs included.
    /// Returns `false` if it was already absent.
    async fn delete_source(&self, id: &str) -> Result<bool>;

    /// Status rows of a source (enabled and disabled), in key order.
    async fn list_statuses(&self, source_id: &str) -> Result<Vec<ContentSyncStatus>>;

    async fn get_status(&self, key: &StatusKey) -> Result<Option<ContentSyncStatus>>;

    /// Apply a fan-out plan atomically. Created rows start `idle`.
    async fn apply_fan_out(
        &self,
        source_id: &str,
        plan: &FanOutPlan,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Move the row `job.key()` to `running` if, and only if, it passes the
    /// ingestion gate at `now`, and queue `job` in the same step. Returns
    /// whether this caller won the claim.
    async fn try_claim(&self, job: &IngestJob, now: DateTime<Utc>) -> Result<bool>;

    /// Remove and return up to `limit` queued jobs, oldest first.
    async fn take_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>>;

    /// Queued jobs, oldest first, without removing them.
    async fn pending_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>>;

    /// `running → completed`: stamps `last_synced_at`, stores the
    /// watermark, clears error and backoff state.
    async fn mark_completed(
        &self,
        key: &StatusKey,
        watermark: Option<&Watermark>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// `running → failed`: records the error code and `retry_after`, and
    /// increments the failure counter. Only applies while the counter still
    /// equals `expected_failures`.
    async fn mark_failed(
        &self,
        key: &StatusKey,
        error_code: SyncErrorCode,
        retry_after: DateTime<Utc>,
        expected_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Point a repository source at a new installation and move all of its
    /// failed rows back to `idle` with error, backoff and failure count
    /// cleared.
    async fn rebind_installation(
        &self,
        source_id: &str,
        installation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_document(&self, doc: &DocumentSource) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentSource>>;

    async fn list_documents(&self, source_id: &str) -> Result<Vec<DocumentSource>>;

    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Mark every non-running document of a collection `running`; returns
    /// how many were moved.
    async fn start_documents(&self, source_id: &str) -> Result<u64>;

    /// Finish a running document. No-op (returns `false`) otherwise.
    async fn finish_document(
        &self,
        id: &str,
        status: SyncStatus,
        error_code: Option<SyncErrorCode>,
    ) -> Result<bool>;
}
