//! In-memory [`SyncStore`] implementation for tests and embedding.
//!
//! All tables live behind a single `std::sync::RwLock`, so every trait
//! method observes and mutates a consistent snapshot. That single lock is
//! what makes `try_claim` a compare-and-set here.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fanout::FanOutPlan;
use crate::gate;
use crate::models::{
    ContentSyncStatus, DocumentSource, IngestJob, QueuedJob, Source, SourceTarget, StatusKey,
    SyncErrorCode, SyncStatus, Watermark,
};

use super::{InsertOutcome, SyncStore};

#[derive(Default)]
struct Tables {
    sources: BTreeMap<String, Source>,
    statuses: BTreeMap<StatusKey, ContentSyncStatus>,
    documents: BTreeMap<String, DocumentSource>,
    outbox: Vec<QueuedJob>,
    last_job_id: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn same_repository(a: &Source, b: &Source) -> bool {
    match (&a.target, &b.target) {
        (
            SourceTarget::Repository {
                owner: o1, name: n1, ..
            },
            SourceTarget::Repository {
                owner: o2, name: n2, ..
            },
        ) => a.team_id == b.team_id && o1 == o2 && n1 == n2,
        _ => false,
    }
}

#[async_trait]
impl SyncStore for InMemoryStore {
    async fn insert_source(
        &self,
        source: &Source,
        statuses: &[ContentSyncStatus],
    ) -> Result<InsertOutcome> {
        let mut t = self.write();
        if t.sources.values().any(|s| same_repository(s, source)) {
            return Ok(InsertOutcome::Duplicate);
        }
        t.sources.insert(source.id.clone(), source.clone());
        for row in statuses {
            t.statuses.insert(row.key(), row.clone());
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.read().sources.get(id).cloned())
    }

    async fn list_sources(&self, team_id: &str) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self
            .read()
            .sources
            .values()
            .filter(|s| s.team_id == team_id)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sources)
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut t = self.write();
        let existed = t.sources.remove(id).is_some();
        t.statuses.retain(|key, _| key.source_id != id);
        t.documents.retain(|_, doc| doc.source_id != id);
        t.outbox.retain(|queued| queued.job.source_id != id);
        Ok(existed)
    }

    async fn list_statuses(&self, source_id: &str) -> Result<Vec<ContentSyncStatus>> {
        Ok(self
            .read()
            .statuses
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn get_status(&self, key: &StatusKey) -> Result<Option<ContentSyncStatus>> {
        Ok(self.read().statuses.get(key).cloned())
    }

    async fn apply_fan_out(
        &self,
        source_id: &str,
        plan: &FanOutPlan,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = self.write();
        if !t.sources.contains_key(source_id) {
            anyhow::bail!("source {} does not exist", source_id);
        }
        for key in &plan.create {
            t.statuses
                .entry(key.clone())
                .or_insert_with(|| ContentSyncStatus::new_idle(key, now));
        }
        for (keys, enabled) in [(&plan.enable, true), (&plan.disable, false)] {
            for key in keys {
                if let Some(row) = t.statuses.get_mut(key) {
                    row.enabled = enabled;
                    row.updated_at = now;
                }
            }
        }
        Ok(())
    }

    async fn try_claim(&self, job: &IngestJob, now: DateTime<Utc>) -> Result<bool> {
        let mut t = self.write();
        match t.statuses.get_mut(&job.key()) {
            Some(row) if gate::can_ingest(row, now) => {
                row.status = SyncStatus::Running;
                row.updated_at = now;
            }
            _ => return Ok(false),
        }
        t.last_job_id += 1;
        let id = t.last_job_id;
        t.outbox.push(QueuedJob {
            id,
            job: job.clone(),
            enqueued_at: now,
        });
        Ok(true)
    }

    async fn take_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        let mut t = self.write();
        let n = t.outbox.len().min(limit as usize);
        Ok(t.outbox.drain(..n).collect())
    }

    async fn pending_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        Ok(self
            .read()
            .outbox
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_completed(
        &self,
        key: &StatusKey,
        watermark: Option<&Watermark>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.write();
        match t.statuses.get_mut(key) {
            Some(row) if row.status == SyncStatus::Running => {
                row.status = SyncStatus::Completed;
                row.last_synced_at = Some(now);
                row.error_code = None;
                row.retry_after = None;
                row.failure_count = 0;
                if let Some(w) = watermark {
                    row.metadata = Some(w.clone());
                }
                row.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        key: &StatusKey,
        error_code: SyncErrorCode,
        retry_after: DateTime<Utc>,
        expected_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.write();
        match t.statuses.get_mut(key) {
            Some(row)
                if row.status == SyncStatus::Running
                    && row.failure_count == expected_failures =>
            {
                row.status = SyncStatus::Failed;
                row.error_code = Some(error_code);
                row.retry_after = Some(retry_after);
                row.failure_count += 1;
                row.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rebind_installation(
        &self,
        source_id: &str,
        installation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.write();
        match t.sources.get_mut(source_id).map(|s| &mut s.target) {
            Some(SourceTarget::Repository {
                installation_id: current,
                ..
            }) => *current = installation_id,
            _ => return Ok(false),
        }
        for row in t
            .statuses
            .values_mut()
            .filter(|r| r.source_id == source_id && r.status == SyncStatus::Failed)
        {
            row.status = SyncStatus::Idle;
            row.error_code = None;
            row.retry_after = None;
            row.failure_count = 0;
            row.updated_at = now;
        }
        Ok(true)
    }

    async fn insert_document(&self, doc: &DocumentSource) -> Result<()> {
        let mut t = self.write();
        if !t.sources.contains_key(&doc.source_id) {
            anyhow::bail!("source {} does not exist", doc.source_id);
        }
        t.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentSource>> {
        Ok(self.read().documents.get(id).cloned())
    }

    async fn list_documents(&self, source_id: &str) -> Result<Vec<DocumentSource>> {
        let mut docs: Vec<DocumentSource> = self
            .read()
            .documents
            .values()
            .filter(|d| d.source_id == source_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.write().documents.remove(id).is_some())
    }

    async fn start_documents(&self, source_id: &str) -> Result<u64> {
        let mut t = self.write();
        let mut moved = 0;
        for doc in t
            .documents
            .values_mut()
            .filter(|d| d.source_id == source_id && d.ingest_status != SyncStatus::Running)
        {
            doc.ingest_status = SyncStatus::Running;
            doc.ingest_error_code = None;
            moved += 1;
        }
        Ok(moved)
    }

    async fn finish_document(
        &self,
        id: &str,
        status: SyncStatus,
        error_code: Option<SyncErrorCode>,
    ) -> Result<bool> {
        let mut t = self.write();
        match t.documents.get_mut(id) {
            Some(doc) if doc.ingest_status == SyncStatus::Running => {
                doc.ingest_status = status;
                doc.ingest_error_code = error_code;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
