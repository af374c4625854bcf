//! Orchestration facade.
//!
//! [`SyncService`] is the single entry point used by the admin API, the
//! CLI, the scheduler, and the ingestion worker callbacks. Every
//! ingestion-affecting call loads fresh rows from the store, applies the
//! gate / fan-out / reconciler logic, and persists the result through the
//! store's atomic operations.
//!
//! ```text
//!  admin API / CLI / scheduler        ingestion worker
//!            │                               │
//!            ▼                               ▼
//!     ┌─────────────────────────────────────────────┐
//!     │                 SyncService                 │
//!     │  gate · fan-out · backoff · reconciler      │
//!     └──────┬───────────────┬───────────────┬──────┘
//!            ▼                               ▼
//!     SyncStore (+ outbox)          CredentialProvider
//!                                      ContentProbe
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{ContentProbe, CredentialProvider};
use crate::error::{Result, SyncError};
use crate::fanout::{self, ContentTypeToggle};
use crate::gate::{self, DeclineReason};
use crate::models::{
    ContentSyncStatus, CredentialScope, DocumentSource, IngestJob, IngestOutcome, QueuedJob,
    Source, SourceKind, SourceTarget, StatusKey, SyncStatus, TriggerSource,
};
use crate::profiles;
use crate::reconciler::{Diagnosis, Reconciler};
use crate::store::{InsertOutcome, SyncStore};

/// Request to bind a GitHub repository as a source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRepository {
    pub team_id: String,
    pub owner: String,
    pub name: String,
    pub installation_id: i64,
    #[serde(default)]
    pub content_types: Vec<ContentTypeToggle>,
    pub profile_ids: Vec<i64>,
}

/// Request to create an (initially empty) document collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDocumentCollection {
    pub team_id: String,
    pub name: String,
    pub profile_ids: Vec<i64>,
}

/// Read model: a source with its nested status rows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceView {
    #[serde(flatten)]
    pub source: Source,
    pub statuses: Vec<ContentSyncStatus>,
    pub can_manually_ingest: bool,
    /// Some enabled row failed with an access error; run a diagnosis.
    pub needs_diagnosis: bool,
}

/// Response of a manual or scheduled trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    pub started: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub claimed: Vec<StatusKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DeclineReason>,
}

impl TriggerOutcome {
    fn declined(reason: DeclineReason) -> Self {
        Self {
            started: false,
            claimed: Vec::new(),
            reason: Some(reason),
        }
    }
}

/// Acknowledgement for a worker callback. `applied = false` means the
/// result was a duplicate or arrived for a row that is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportAck {
    pub applied: bool,
}

/// The external systems a [`SyncService`] talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub probe: Arc<dyn ContentProbe>,
}

pub struct SyncService {
    store: Arc<dyn SyncStore>,
    collaborators: Collaborators,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncService {
    pub fn new(store: Arc<dyn SyncStore>, collaborators: Collaborators) -> Self {
        Self {
            store,
            collaborators,
            backoff: BackoffPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    // ── Source registry ────────────────────────────────────────────────

    /// Register a GitHub repository.
    ///
    /// Creates one enabled `idle` row per requested (content type ×
    /// profile). The installation must currently reach the repository.
    pub async fn register_repository(&self, req: RegisterRepository) -> Result<SourceView> {
        let owner = req.owner.trim();
        let name = req.name.trim();
        if owner.is_empty() || name.is_empty() {
            return Err(SyncError::InvalidInput(
                "repository owner and name must not be empty".into(),
            ));
        }
        let profile_ids = profiles::validate_selection(&req.profile_ids)?;
        let content_types =
            fanout::registration_content_types(SourceKind::Repository, &req.content_types)?;

        let reachable = self
            .collaborators
            .probe
            .can_reach(req.installation_id, owner, name)
            .await
            .map_err(SyncError::Upstream)?;
        if !reachable {
            return Err(SyncError::AccessDenied {
                installation_id: req.installation_id,
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        let now = self.clock.now();
        let source = Source::new(
            &req.team_id,
            SourceTarget::Repository {
                owner: owner.to_string(),
                name: name.to_string(),
                installation_id: req.installation_id,
            },
            now,
        );
        let rows: Vec<ContentSyncStatus> =
            fanout::registration_keys(&source.id, &content_types, &profile_ids)
                .iter()
                .map(|key| ContentSyncStatus::new_idle(key, now))
                .collect();

        match self.store.insert_source(&source, &rows).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Duplicate => {
                return Err(SyncError::DuplicateSource {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
        }
        info!(
            source_id = %source.id,
            team_id = %source.team_id,
            repository = %source.label(),
            rows = rows.len(),
            "Registered repository source"
        );
        Ok(self.view(source, rows, now))
    }

    /// Register an empty document collection with one `file` row per profile.
    pub async fn register_document_collection(
        &self,
        req: RegisterDocumentCollection,
    ) -> Result<SourceView> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput(
                "collection name must not be empty".into(),
            ));
        }
        let profile_ids = profiles::validate_selection(&req.profile_ids)?;
        let content_types = fanout::registration_content_types(SourceKind::DocumentCollection, &[])?;

        let now = self.clock.now();
        let source = Source::new(
            &req.team_id,
            SourceTarget::DocumentCollection {
                name: name.to_string(),
            },
            now,
        );
        let rows: Vec<ContentSyncStatus> =
            fanout::registration_keys(&source.id, &content_types, &profile_ids)
                .iter()
                .map(|key| ContentSyncStatus::new_idle(key, now))
                .collect();
        self.store.insert_source(&source, &rows).await?;
        info!(source_id = %source.id, team_id = %source.team_id, "Registered document collection");
        Ok(self.view(source, rows, now))
    }

    /// Delete a source and everything it owns. Deleting an absent source
    /// succeeds.
    pub async fn deregister_source(&self, source_id: &str) -> Result<()> {
        if self.store.delete_source(source_id).await? {
            info!(source_id, "Deregistered source");
        } else {
            debug!(source_id, "Deregister of absent source ignored");
        }
        Ok(())
    }

    // ── Fan-out ────────────────────────────────────────────────────────

    /// Replace the set of enabled embedding profiles.
    pub async fn configure_profiles(&self, source_id: &str, profile_ids: &[i64]) -> Result<SourceView> {
        let source = self.load_source(source_id).await?;
        let rows = self.store.list_statuses(source_id).await?;
        let plan = fanout::plan_profiles(source_id, source.kind(), &rows, profile_ids)?;
        if !plan.is_empty() {
            self.store
                .apply_fan_out(source_id, &plan, self.clock.now())
                .await?;
            info!(
                source_id,
                created = plan.create.len(),
                enabled = plan.enable.len(),
                disabled = plan.disable.len(),
                "Updated embedding profiles"
            );
        }
        self.source_view(source_id).await
    }

    /// Enable or disable content types.
    pub async fn configure_content_types(
        &self,
        source_id: &str,
        toggles: &[ContentTypeToggle],
    ) -> Result<SourceView> {
        let source = self.load_source(source_id).await?;
        let rows = self.store.list_statuses(source_id).await?;
        let plan = fanout::plan_content_types(source_id, source.kind(), &rows, toggles)?;
        if !plan.is_empty() {
            self.store
                .apply_fan_out(source_id, &plan, self.clock.now())
                .await?;
            info!(
                source_id,
                created = plan.create.len(),
                enabled = plan.enable.len(),
                disabled = plan.disable.len(),
                "Updated content types"
            );
        }
        self.source_view(source_id).await
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Optimistic check for the presentation layer. The claim performed by
    /// [`trigger_manual_ingest`](Self::trigger_manual_ingest) re-evaluates
    /// eligibility atomically.
    pub async fn can_manually_ingest(&self, source_id: &str) -> Result<bool> {
        self.load_source(source_id).await?;
        let rows = self.store.list_statuses(source_id).await?;
        Ok(gate::can_manually_ingest(&rows, self.clock.now()))
    }

    pub async fn trigger_manual_ingest(&self, source_id: &str) -> Result<TriggerOutcome> {
        self.trigger_ingest(source_id, TriggerSource::Manual).await
    }

    /// Same gate and claim path as a manual trigger; called by the
    /// external scheduler.
    pub async fn trigger_scheduled_ingest(&self, source_id: &str) -> Result<TriggerOutcome> {
        self.trigger_ingest(source_id, TriggerSource::Schedule).await
    }

    async fn trigger_ingest(&self, source_id: &str, trigger: TriggerSource) -> Result<TriggerOutcome> {
        let source = self.load_source(source_id).await?;
        let rows = self.store.list_statuses(source_id).await?;
        let now = self.clock.now();

        if let Some(reason) = gate::decline_reason(&rows, now) {
            debug!(source_id, trigger = trigger.as_str(), ?reason, "Ingest declined");
            return Ok(TriggerOutcome::declined(reason));
        }

        let mut claimed = Vec::new();
        for row in rows.iter().filter(|r| gate::can_ingest(r, now)) {
            let job = IngestJob {
                source_id: source.id.clone(),
                content_type: row.content_type,
                profile_id: row.profile_id,
                watermark: row.metadata.clone(),
                trigger,
            };
            let key = job.key();
            if !self.store.try_claim(&job, now).await? {
                debug!(key = %key, "Lost claim race");
                continue;
            }
            claimed.push(key);
        }

        if claimed.is_empty() {
            let rows = self.store.list_statuses(source_id).await?;
            let reason = gate::decline_reason(&rows, now).unwrap_or(DeclineReason::AlreadyRunning);
            return Ok(TriggerOutcome::declined(reason));
        }

        if source.kind() == SourceKind::DocumentCollection {
            let moved = self.store.start_documents(source_id).await?;
            debug!(source_id, documents = moved, "Marked documents running");
        }

        info!(
            source_id,
            trigger = trigger.as_str(),
            claimed = claimed.len(),
            "Ingestion started"
        );
        Ok(TriggerOutcome {
            started: true,
            claimed,
            reason: None,
        })
    }

    /// Apply a worker's result. Results for rows that are not running
    /// (duplicates, late callbacks, deleted sources) are accepted and
    /// ignored.
    pub async fn report_result(&self, key: &StatusKey, outcome: IngestOutcome) -> Result<ReportAck> {
        let Some(row) = self.store.get_status(key).await? else {
            debug!(key = %key, "Result for unknown row ignored");
            return Ok(ReportAck { applied: false });
        };
        if row.status != SyncStatus::Running {
            debug!(key = %key, status = %row.status, "Stale result ignored");
            return Ok(ReportAck { applied: false });
        }

        let now = self.clock.now();
        let label = match &outcome {
            IngestOutcome::Completed { .. } => "completed",
            IngestOutcome::Failed { .. } => "failed",
        };
        let applied = match outcome {
            IngestOutcome::Completed { watermark } => {
                let watermark = match watermark {
                    Some(w) if w.matches(key.content_type) => Some(w),
                    Some(w) => {
                        warn!(key = %key, ?w, "Watermark does not match content type; keeping previous");
                        None
                    }
                    None => None,
                };
                self.store
                    .mark_completed(key, watermark.as_ref(), now)
                    .await?
            }
            IngestOutcome::Failed { error_code } => {
                let retry_after = self.backoff.retry_after(now, row.failure_count + 1);
                self.store
                    .mark_failed(key, error_code, retry_after, row.failure_count, now)
                    .await?
            }
        };

        if applied {
            info!(key = %key, outcome = label, "Ingestion result applied");
        } else {
            debug!(key = %key, "Result raced with another callback; ignored");
        }
        Ok(ReportAck { applied })
    }

    /// Hand up to `limit` queued jobs to a worker. Each job is returned
    /// once; the worker reports back through
    /// [`report_result`](Self::report_result).
    pub async fn take_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        let jobs = self.store.take_jobs(limit).await?;
        if !jobs.is_empty() {
            info!(count = jobs.len(), "Handed jobs to worker");
        }
        Ok(jobs)
    }

    pub async fn pending_jobs(&self, limit: u32) -> Result<Vec<QueuedJob>> {
        Ok(self.store.pending_jobs(limit).await?)
    }

    // ── Access diagnosis ───────────────────────────────────────────────

    /// Look for an installation available to `identity` that restores
    /// access to a repository source. Read-only.
    pub async fn diagnose(&self, source_id: &str, identity: &str) -> Result<Diagnosis> {
        let source = self.load_source(source_id).await?;
        let (owner, name, installation_id) = source.repository().ok_or_else(|| {
            SyncError::UnsupportedSourceKind {
                operation: "diagnose".into(),
                kind: source.kind().to_string(),
            }
        })?;
        let reconciler = Reconciler::new(
            self.collaborators.credentials.as_ref(),
            self.collaborators.probe.as_ref(),
        );
        let diagnosis = reconciler.diagnose(identity, owner, name).await;
        info!(
            source_id,
            current_installation = installation_id,
            can_be_fixed = diagnosis.can_be_fixed(),
            "Diagnosed source access"
        );
        Ok(diagnosis)
    }

    /// Rebind a repository source to `scope` after the caller confirmed a
    /// [`Diagnosis::Fixable`]. Failed rows become eligible immediately.
    pub async fn apply_diagnostic_fix(
        &self,
        source_id: &str,
        scope: &CredentialScope,
    ) -> Result<SourceView> {
        let source = self.load_source(source_id).await?;
        let (owner, name, previous) = source.repository().ok_or_else(|| {
            SyncError::UnsupportedSourceKind {
                operation: "apply_diagnostic_fix".into(),
                kind: source.kind().to_string(),
            }
        })?;

        let reachable = self
            .collaborators
            .probe
            .can_reach(scope.installation_id, owner, name)
            .await
            .map_err(SyncError::Upstream)?;
        if !reachable {
            return Err(SyncError::AccessDenied {
                installation_id: scope.installation_id,
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        if !self
            .store
            .rebind_installation(source_id, scope.installation_id, self.clock.now())
            .await?
        {
            return Err(SyncError::NotFound(format!("source {source_id}")));
        }
        info!(
            source_id,
            previous_installation = previous,
            installation_id = scope.installation_id,
            "Rebound source to new installation"
        );
        self.source_view(source_id).await
    }

    // ── Documents ──────────────────────────────────────────────────────

    pub async fn add_document(&self, source_id: &str, file_name: &str) -> Result<DocumentSource> {
        let source = self.load_source(source_id).await?;
        if source.kind() != SourceKind::DocumentCollection {
            return Err(SyncError::UnsupportedSourceKind {
                operation: "add_document".into(),
                kind: source.kind().to_string(),
            });
        }
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(SyncError::InvalidInput("file name must not be empty".into()));
        }
        let doc = DocumentSource::new(source_id, file_name, self.clock.now());
        self.store.insert_document(&doc).await?;
        info!(source_id, document_id = %doc.id, file_name, "Added document");
        Ok(doc)
    }

    /// Remove one document. Removing an absent document succeeds.
    pub async fn remove_document(&self, document_id: &str) -> Result<()> {
        if self.store.delete_document(document_id).await? {
            info!(document_id, "Removed document");
        }
        Ok(())
    }

    pub async fn list_documents(&self, source_id: &str) -> Result<Vec<DocumentSource>> {
        self.load_source(source_id).await?;
        Ok(self.store.list_documents(source_id).await?)
    }

    /// Record the per-file outcome of a collection ingestion run.
    pub async fn report_document_result(
        &self,
        document_id: &str,
        outcome: IngestOutcome,
    ) -> Result<ReportAck> {
        let (status, code) = match outcome {
            IngestOutcome::Completed { .. } => (SyncStatus::Completed, None),
            IngestOutcome::Failed { error_code } => (SyncStatus::Failed, Some(error_code)),
        };
        let applied = self
            .store
            .finish_document(document_id, status, code)
            .await?;
        if !applied {
            debug!(document_id, "Stale document result ignored");
        }
        Ok(ReportAck { applied })
    }

    // ── Read model ─────────────────────────────────────────────────────

    pub async fn list_sources_with_statuses(&self, team_id: &str) -> Result<Vec<SourceView>> {
        let now = self.clock.now();
        let mut views = Vec::new();
        for source in self.store.list_sources(team_id).await? {
            let rows = self.store.list_statuses(&source.id).await?;
            views.push(self.view(source, rows, now));
        }
        Ok(views)
    }

    pub async fn source_view(&self, source_id: &str) -> Result<SourceView> {
        let source = self.load_source(source_id).await?;
        let rows = self.store.list_statuses(source_id).await?;
        Ok(self.view(source, rows, self.clock.now()))
    }

    async fn load_source(&self, source_id: &str) -> Result<Source> {
        self.store
            .get_source(source_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("source {source_id}")))
    }

    fn view(
        &self,
        source: Source,
        statuses: Vec<ContentSyncStatus>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SourceView {
        let can_manually_ingest = gate::can_manually_ingest(&statuses, now);
        let needs_diagnosis = source.kind() == SourceKind::Repository
            && statuses.iter().any(ContentSyncStatus::has_access_failure);
        SourceView {
            source,
            statuses,
            can_manually_ingest,
            needs_diagnosis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::collaborators::ProbeOutcome;
    use crate::models::SyncErrorCode;
    use crate::reconciler::NotFixableReason;
    use crate::store::memory::InMemoryStore;
    use crate::testing::Fakes;
    use chrono::Duration;

    struct Harness {
        service: Arc<SyncService>,
        fakes: Fakes,
        clock: Arc<MockClock>,
    }

    fn harness(installations: &[i64]) -> Harness {
        let fakes = Fakes::new(installations);
        let clock = Arc::new(MockClock::fixed());
        let service = SyncService::new(Arc::new(InMemoryStore::new()), fakes.collaborators())
            .with_clock(clock.clone());
        Harness {
            service: Arc::new(service),
            fakes,
            clock,
        }
    }

    fn widgets(content_types: Vec<ContentTypeToggle>, profile_ids: Vec<i64>) -> RegisterRepository {
        RegisterRepository {
            team_id: "team-1".into(),
            owner: "acme".into(),
            name: "widgets".into(),
            installation_id: 1,
            content_types,
            profile_ids,
        }
    }

    fn blob_only() -> Vec<ContentTypeToggle> {
        vec![
            ContentTypeToggle {
                content_type: crate::models::ContentType::Blob,
                enabled: true,
            },
            ContentTypeToggle {
                content_type: crate::models::ContentType::PullRequest,
                enabled: false,
            },
        ]
    }

    async fn register_widgets(h: &Harness) -> SourceView {
        h.fakes
            .probe
            .set(1, "acme/widgets", ProbeOutcome::Reachable);
        h.service
            .register_repository(widgets(blob_only(), vec![1]))
            .await
            .unwrap()
    }

    fn blob_key(view: &SourceView) -> StatusKey {
        StatusKey::new(&view.source.id, crate::models::ContentType::Blob, 1)
    }

    async fn queued(h: &Harness) -> Vec<QueuedJob> {
        h.service.pending_jobs(100).await.unwrap()
    }

    #[tokio::test]
    async fn register_trigger_fail_scenario() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        assert_eq!(view.statuses.len(), 1);
        assert_eq!(view.statuses[0].status, SyncStatus::Idle);
        assert!(view.can_manually_ingest);

        let outcome = h.service.trigger_manual_ingest(&view.source.id).await.unwrap();
        assert!(outcome.started);
        let key = blob_key(&view);
        let jobs = queued(&h).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.key(), key);

        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Running);

        let ack = h
            .service
            .report_result(
                &key,
                IngestOutcome::Failed {
                    error_code: SyncErrorCode::NotFound,
                },
            )
            .await
            .unwrap();
        assert!(ack.applied);

        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Failed);
        assert_eq!(row.error_code, Some(SyncErrorCode::NotFound));
        assert_eq!(
            row.retry_after,
            Some(h.clock.now() + BackoffPolicy::default().base())
        );
    }

    #[tokio::test]
    async fn duplicate_and_denied_registrations() {
        let h = harness(&[1]);
        register_widgets(&h).await;

        let err = h
            .service
            .register_repository(widgets(vec![], vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateSource { .. }));

        let mut other = widgets(vec![], vec![1]);
        other.name = "gadgets".into();
        let err = h.service.register_repository(other).await.unwrap_err();
        assert!(matches!(err, SyncError::AccessDenied { .. }));

        let err = h
            .service
            .register_repository(widgets(vec![], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoProfileSelected));
    }

    #[tokio::test]
    async fn second_trigger_declines_while_running() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        assert!(h.service.trigger_manual_ingest(&view.source.id).await.unwrap().started);

        let again = h.service.trigger_manual_ingest(&view.source.id).await.unwrap();
        assert!(!again.started);
        assert_eq!(again.reason, Some(DeclineReason::AlreadyRunning));
        assert!(!h.service.can_manually_ingest(&view.source.id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_triggers_produce_one_claim() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = h.service.clone();
            let id = view.source.id.clone();
            handles.push(tokio::spawn(async move {
                service.trigger_manual_ingest(&id).await.unwrap()
            }));
        }
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap().started {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(queued(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn backoff_grows_then_resets_on_completion() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        let key = blob_key(&view);
        let policy = BackoffPolicy::default();

        let mut previous = Duration::zero();
        for failures in 1..=4u32 {
            assert!(h.service.trigger_manual_ingest(&view.source.id).await.unwrap().started);
            h.service
                .report_result(
                    &key,
                    IngestOutcome::Failed {
                        error_code: SyncErrorCode::RateLimited,
                    },
                )
                .await
                .unwrap();
            let row = h.service.store().get_status(&key).await.unwrap().unwrap();
            let delay = row.retry_after.unwrap() - h.clock.now();
            assert_eq!(delay, policy.delay(failures));
            assert!(delay >= previous);
            previous = delay;

            let blocked = h.service.trigger_manual_ingest(&view.source.id).await.unwrap();
            assert_eq!(blocked.reason, Some(DeclineReason::BackingOff));
            h.clock.advance(delay);
        }

        assert!(h.service.trigger_manual_ingest(&view.source.id).await.unwrap().started);
        h.service
            .report_result(
                &key,
                IngestOutcome::Completed {
                    watermark: Some(crate::models::Watermark::Commit { sha: "abc123".into() }),
                },
            )
            .await
            .unwrap();
        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Completed);
        assert_eq!(row.failure_count, 0);
        assert_eq!(row.error_code, None);
        assert_eq!(row.last_synced_at, Some(h.clock.now()));

        assert!(h.service.trigger_manual_ingest(&view.source.id).await.unwrap().started);
        assert_eq!(
            queued(&h).await.last().unwrap().job.watermark,
            Some(crate::models::Watermark::Commit { sha: "abc123".into() })
        );
        h.service
            .report_result(
                &key,
                IngestOutcome::Failed {
                    error_code: SyncErrorCode::FetchError,
                },
            )
            .await
            .unwrap();
        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.retry_after.unwrap() - h.clock.now(), policy.base());
    }

    #[tokio::test]
    async fn duplicate_and_late_results_are_noops() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        let key = blob_key(&view);
        h.service.trigger_manual_ingest(&view.source.id).await.unwrap();

        let done = IngestOutcome::Completed { watermark: None };
        assert!(h.service.report_result(&key, done.clone()).await.unwrap().applied);
        assert!(!h.service.report_result(&key, done).await.unwrap().applied);
        let late = IngestOutcome::Failed {
            error_code: SyncErrorCode::TooLarge,
        };
        assert!(!h.service.report_result(&key, late.clone()).await.unwrap().applied);

        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Completed);

        h.service.deregister_source(&view.source.id).await.unwrap();
        assert!(!h.service.report_result(&key, late).await.unwrap().applied);
    }

    #[tokio::test]
    async fn jobs_are_handed_out_once() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        h.service
            .trigger_scheduled_ingest(&view.source.id)
            .await
            .unwrap();

        let taken = h.service.take_jobs(10).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].job.trigger, TriggerSource::Schedule);
        assert!(h.service.take_jobs(10).await.unwrap().is_empty());

        let row = h
            .service
            .store()
            .get_status(&blob_key(&view))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, SyncStatus::Running);
    }

    #[tokio::test]
    async fn oversized_backoff_still_records_failure() {
        let fakes = Fakes::new(&[1]);
        let service = SyncService::new(Arc::new(InMemoryStore::new()), fakes.collaborators())
            .with_backoff(BackoffPolicy::new(10_000_000_000_000, 2, 10_000_000_000_000));
        let h = Harness {
            service: Arc::new(service),
            fakes,
            clock: Arc::new(MockClock::fixed()),
        };
        let view = register_widgets(&h).await;
        let key = blob_key(&view);
        h.service.trigger_manual_ingest(&view.source.id).await.unwrap();

        let ack = h
            .service
            .report_result(
                &key,
                IngestOutcome::Failed {
                    error_code: SyncErrorCode::RateLimited,
                },
            )
            .await
            .unwrap();
        assert!(ack.applied);
        let row = h.service.store().get_status(&key).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Failed);
        assert_eq!(row.error_code, Some(SyncErrorCode::RateLimited));
        assert!(row.retry_after.is_some());
    }

    #[tokio::test]
    async fn diagnose_without_reachable_scope() {
        let h = harness(&[1, 2, 3]);
        let view = register_widgets(&h).await;
        h.fakes.probe.revoke_all();

        let d = h.service.diagnose(&view.source.id, "octocat").await.unwrap();
        assert_eq!(
            d,
            Diagnosis::NotFixable {
                reason: NotFixableReason::NoInstallation
            }
        );
    }

    #[tokio::test]
    async fn diagnose_and_fix_restores_eligibility() {
        let h = harness(&[1, 2, 3]);
        let view = register_widgets(&h).await;
        let key = blob_key(&view);

        h.service.trigger_manual_ingest(&view.source.id).await.unwrap();
        h.service
            .report_result(
                &key,
                IngestOutcome::Failed {
                    error_code: SyncErrorCode::NotFound,
                },
            )
            .await
            .unwrap();
        assert!(!h.service.can_manually_ingest(&view.source.id).await.unwrap());
        assert!(h.service.source_view(&view.source.id).await.unwrap().needs_diagnosis);

        h.fakes.probe.revoke_all();
        h.fakes.probe.set(2, "acme/widgets", ProbeOutcome::Reachable);

        let d = h.service.diagnose(&view.source.id, "octocat").await.unwrap();
        let scope = match d {
            Diagnosis::Fixable { new_scope } => new_scope,
            other => panic!("expected fixable, got {:?}", other),
        };
        assert_eq!(scope.installation_id, 2);

        let fixed = h
            .service
            .apply_diagnostic_fix(&view.source.id, &scope)
            .await
            .unwrap();
        assert_eq!(fixed.source.repository().unwrap().2, 2);
        let row = &fixed.statuses[0];
        assert_eq!(row.status, SyncStatus::Idle);
        assert_eq!(row.error_code, None);
        assert_eq!(row.retry_after, None);
        assert_eq!(row.failure_count, 0);
        assert!(gate::can_ingest(row, h.clock.now()));
        assert!(fixed.can_manually_ingest);
        assert!(!fixed.needs_diagnosis);
    }

    #[tokio::test]
    async fn fix_with_unreachable_scope_is_denied() {
        let h = harness(&[1, 2]);
        let view = register_widgets(&h).await;
        let scope = CredentialScope {
            installation_id: 9,
            account_login: "elsewhere".into(),
        };
        let err = h
            .service
            .apply_diagnostic_fix(&view.source.id, &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn profile_changes_keep_one_enabled() {
        let h = harness(&[1]);
        let view = register_widgets(&h).await;
        let id = view.source.id.clone();

        let err = h.service.configure_profiles(&id, &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::NoProfileSelected));
        let unchanged = h.service.source_view(&id).await.unwrap();
        assert_eq!(unchanged.statuses, view.statuses);

        let swapped = h.service.configure_profiles(&id, &[3]).await.unwrap();
        let enabled: Vec<i64> = swapped
            .statuses
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.profile_id)
            .collect();
        assert_eq!(enabled, vec![3]);
        assert_eq!(swapped.statuses.len(), 2);

        let err = h
            .service
            .configure_content_types(
                &id,
                &[ContentTypeToggle {
                    content_type: crate::models::ContentType::Blob,
                    enabled: false,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MandatoryContentType(_)));

        let with_prs = h
            .service
            .configure_content_types(
                &id,
                &[ContentTypeToggle {
                    content_type: crate::models::ContentType::PullRequest,
                    enabled: true,
                }],
            )
            .await
            .unwrap();
        assert!(with_prs.statuses.iter().any(|r| r.enabled
            && r.content_type == crate::models::ContentType::PullRequest
            && r.profile_id == 3));
    }

    #[tokio::test]
    async fn deregister_is_idempotent_and_cascades() {
        let h = harness(&[1]);
        let collection = h
            .service
            .register_document_collection(RegisterDocumentCollection {
                team_id: "team-1".into(),
                name: "handbook".into(),
                profile_ids: vec![1, 2],
            })
            .await
            .unwrap();
        let id = collection.source.id.clone();
        h.service.add_document(&id, "onboarding.pdf").await.unwrap();
        assert_eq!(collection.statuses.len(), 2);

        h.service.deregister_source(&id).await.unwrap();
        h.service.deregister_source(&id).await.unwrap();

        assert!(h.service.store().list_statuses(&id).await.unwrap().is_empty());
        assert!(h.service.store().list_documents(&id).await.unwrap().is_empty());
        assert!(matches!(
            h.service.source_view(&id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn collection_ingest_tracks_documents() {
        let h = harness(&[1]);
        let collection = h
            .service
            .register_document_collection(RegisterDocumentCollection {
                team_id: "team-1".into(),
                name: "handbook".into(),
                profile_ids: vec![1],
            })
            .await
            .unwrap();
        let id = collection.source.id.clone();
        let doc = h.service.add_document(&id, "policies.md").await.unwrap();

        assert!(h.service.trigger_manual_ingest(&id).await.unwrap().started);
        let docs = h.service.list_documents(&id).await.unwrap();
        assert_eq!(docs[0].ingest_status, SyncStatus::Running);

        let failed = IngestOutcome::Failed {
            error_code: SyncErrorCode::TooLarge,
        };
        assert!(h.service.report_document_result(&doc.id, failed.clone()).await.unwrap().applied);
        assert!(!h.service.report_document_result(&doc.id, failed).await.unwrap().applied);
        let docs = h.service.list_documents(&id).await.unwrap();
        assert_eq!(docs[0].ingest_status, SyncStatus::Failed);
        assert_eq!(docs[0].ingest_error_code, Some(SyncErrorCode::TooLarge));

        h.service.remove_document(&doc.id).await.unwrap();
        h.service.remove_document(&doc.id).await.unwrap();
        assert!(h.service.list_documents(&id).await.unwrap().is_empty());

        let err = h.service.diagnose(&id, "octocat").await.unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedSourceKind { .. }));
    }

    #[tokio::test]
    async fn read_model_lists_team_sources() {
        let h = harness(&[1]);
        register_widgets(&h).await;
        let views = h.service.list_sources_with_statuses("team-1").await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].source.label(), "acme/widgets");
        assert!(h
            .service
            .list_sources_with_statuses("team-2")
            .await
            .unwrap()
            .is_empty());
    }
}
