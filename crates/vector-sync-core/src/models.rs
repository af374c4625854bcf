//! Core data models for Vector Sync.
//!
//! These types describe the registered sources, the per-(content type,
//! embedding profile) sync status rows, and the uploaded documents that
//! back a document collection. All of them round-trip through the
//! [`SyncStore`](crate::store::SyncStore) and are serialized directly into
//! the admin API responses.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════

/// Discriminant of a [`SourceTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Repository,
    DocumentCollection,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Repository => "repository",
            SourceKind::DocumentCollection => "document-collection",
        }
    }

    /// Content types that may be ingested from this kind of source.
    pub fn content_types(&self) -> &'static [ContentType] {
        match self {
            SourceKind::Repository => &[ContentType::Blob, ContentType::PullRequest],
            SourceKind::DocumentCollection => &[ContentType::File],
        }
    }

    /// The content type that can never be disabled for this kind.
    pub fn primary_content_type(&self) -> ContentType {
        match self {
            SourceKind::Repository => ContentType::Blob,
            SourceKind::DocumentCollection => ContentType::File,
        }
    }

    pub fn supports(&self, content_type: ContentType) -> bool {
        self.content_types().contains(&content_type)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(SourceKind::Repository),
            "document-collection" => Ok(SourceKind::DocumentCollection),
            _ => Err(format!("unknown source kind: {s}")),
        }
    }
}

/// What a source points at, with the kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceTarget {
    /// A GitHub repository reached through an App installation.
    #[serde(rename_all = "camelCase")]
    Repository {
        owner: String,
        name: String,
        installation_id: i64,
    },
    /// A collection of uploaded files.
    DocumentCollection { name: String },
}

/// A registered external content origin owned by a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub team_id: String,
    #[serde(flatten)]
    pub target: SourceTarget,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(team_id: &str, target: SourceTarget, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team_id.to_string(),
            target,
            created_at: now,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self.target {
            SourceTarget::Repository { .. } => SourceKind::Repository,
            SourceTarget::DocumentCollection { .. } => SourceKind::DocumentCollection,
        }
    }

    /// `(owner, name, installation_id)` for repository sources.
    pub fn repository(&self) -> Option<(&str, &str, i64)> {
        match &self.target {
            SourceTarget::Repository {
                owner,
                name,
                installation_id,
            } => Some((owner, name, *installation_id)),
            SourceTarget::DocumentCollection { .. } => None,
        }
    }

    /// Human-readable label: `owner/name` or the collection name.
    pub fn label(&self) -> String {
        match &self.target {
            SourceTarget::Repository { owner, name, .. } => format!("{owner}/{name}"),
            SourceTarget::DocumentCollection { name } => name.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Content sync status
// ═══════════════════════════════════════════════════════════════════════

/// Category of material ingested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Blob,
    PullRequest,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Blob => "blob",
            ContentType::PullRequest => "pull_request",
            ContentType::File => "file",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(ContentType::Blob),
            "pull_request" => Ok(ContentType::PullRequest),
            "file" => Ok(ContentType::File),
            _ => Err(format!("unknown content type: {s}")),
        }
    }
}

/// Ingestion state of a single status row (or a single document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("unknown sync status: {s}")),
        }
    }
}

/// Classification of the last ingestion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorCode {
    NotFound,
    RateLimited,
    TooLarge,
    FetchError,
}

impl SyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::NotFound => "NOT_FOUND",
            SyncErrorCode::RateLimited => "RATE_LIMITED",
            SyncErrorCode::TooLarge => "TOO_LARGE",
            SyncErrorCode::FetchError => "FETCH_ERROR",
        }
    }

    /// Whether the failure means the source is unreachable under its
    /// current installation, making the row a diagnosis candidate.
    pub fn is_access_error(&self) -> bool {
        match self {
            SyncErrorCode::NotFound => true,
            SyncErrorCode::RateLimited | SyncErrorCode::TooLarge | SyncErrorCode::FetchError => {
                false
            }
        }
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_FOUND" => Ok(SyncErrorCode::NotFound),
            "RATE_LIMITED" => Ok(SyncErrorCode::RateLimited),
            "TOO_LARGE" => Ok(SyncErrorCode::TooLarge),
            "FETCH_ERROR" => Ok(SyncErrorCode::FetchError),
            _ => Err(format!("unknown sync error code: {s}")),
        }
    }
}

/// Last-ingested marker used to make re-ingestion incremental.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Watermark {
    /// Last ingested commit (for `blob`).
    Commit { sha: String },
    /// Last ingested pull request number (for `pull_request`).
    PullRequest { number: i64 },
}

impl Watermark {
    /// Whether this watermark belongs to the given content type.
    pub fn matches(&self, content_type: ContentType) -> bool {
        match (self, content_type) {
            (Watermark::Commit { .. }, ContentType::Blob) => true,
            (Watermark::PullRequest { .. }, ContentType::PullRequest) => true,
            (Watermark::Commit { .. }, _) | (Watermark::PullRequest { .. }, _) => false,
        }
    }
}

/// Identity of a status row: one per (source, content type, profile).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusKey {
    pub source_id: String,
    pub content_type: ContentType,
    pub profile_id: i64,
}

impl StatusKey {
    pub fn new(source_id: &str, content_type: ContentType, profile_id: i64) -> Self {
        Self {
            source_id: source_id.to_string(),
            content_type,
            profile_id,
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_id, self.content_type, self.profile_id
        )
    }
}

/// Ingestion state for one (source, content type, embedding profile).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSyncStatus {
    pub source_id: String,
    pub content_type: ContentType,
    pub profile_id: i64,
    pub enabled: bool,
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_code: Option<SyncErrorCode>,
    pub retry_after: Option<DateTime<Utc>>,
    /// Consecutive failures since the last completion or rebind.
    pub failure_count: u32,
    pub metadata: Option<Watermark>,
    pub updated_at: DateTime<Utc>,
}

impl ContentSyncStatus {
    /// A freshly enabled, never-ingested row.
    pub fn new_idle(key: &StatusKey, now: DateTime<Utc>) -> Self {
        Self {
            source_id: key.source_id.clone(),
            content_type: key.content_type,
            profile_id: key.profile_id,
            enabled: true,
            status: SyncStatus::Idle,
            last_synced_at: None,
            error_code: None,
            retry_after: None,
            failure_count: 0,
            metadata: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.source_id, self.content_type, self.profile_id)
    }

    /// Failed with an error that points at lost access.
    pub fn has_access_failure(&self) -> bool {
        self.enabled
            && self.status == SyncStatus::Failed
            && self.error_code.is_some_and(|c| c.is_access_error())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════════════════

/// One uploaded file inside a document collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub id: String,
    pub source_id: String,
    pub file_name: String,
    pub ingest_status: SyncStatus,
    pub ingest_error_code: Option<SyncErrorCode>,
    pub created_at: DateTime<Utc>,
}

impl DocumentSource {
    pub fn new(source_id: &str, file_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            file_name: file_name.to_string(),
            ingest_status: SyncStatus::Idle,
            ingest_error_code: None,
            created_at: now,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Worker-facing types
// ═══════════════════════════════════════════════════════════════════════

/// Result of a fetch+embed run, reported back by the ingestion worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Completed {
        #[serde(default)]
        watermark: Option<Watermark>,
    },
    #[serde(rename_all = "camelCase")]
    Failed { error_code: SyncErrorCode },
}

/// What started an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Schedule,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Schedule => "schedule",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "schedule" => Ok(TriggerSource::Schedule),
            _ => Err(format!("unknown trigger source: {s}")),
        }
    }
}

/// Work item handed to the ingestion worker after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub source_id: String,
    pub content_type: ContentType,
    pub profile_id: i64,
    pub watermark: Option<Watermark>,
    pub trigger: TriggerSource,
}

impl IngestJob {
    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.source_id, self.content_type, self.profile_id)
    }
}

/// A job waiting in the store's outbox for a worker to pick it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: i64,
    #[serde(flatten)]
    pub job: IngestJob,
    pub enqueued_at: DateTime<Utc>,
}

/// An authorization boundary (GitHub App installation) visible to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialScope {
    pub installation_id: i64,
    /// Account (user or organization) the installation belongs to.
    pub account_login: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            SyncStatus::Idle,
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<SyncStatus>().unwrap(), s);
        }
        assert!("paused".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn only_not_found_is_access_error() {
        assert!(SyncErrorCode::NotFound.is_access_error());
        assert!(!SyncErrorCode::RateLimited.is_access_error());
        assert!(!SyncErrorCode::TooLarge.is_access_error());
        assert!(!SyncErrorCode::FetchError.is_access_error());
    }

    #[test]
    fn repository_source_serializes_flat() {
        let source = Source::new(
            "team-1",
            SourceTarget::Repository {
                owner: "acme".into(),
                name: "widgets".into(),
                installation_id: 42,
            },
            Utc::now(),
        );
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "repository");
        assert_eq!(json["owner"], "acme");
        assert_eq!(json["installationId"], 42);
        assert_eq!(json["teamId"], "team-1");
    }

    #[test]
    fn watermark_matches_its_content_type() {
        let sha = Watermark::Commit { sha: "abc".into() };
        let pr = Watermark::PullRequest { number: 7 };
        assert!(sha.matches(ContentType::Blob));
        assert!(!sha.matches(ContentType::PullRequest));
        assert!(pr.matches(ContentType::PullRequest));
        assert!(!pr.matches(ContentType::File));
    }

    #[test]
    fn outcome_parses_worker_payload() {
        let failed: IngestOutcome =
            serde_json::from_str(r#"{"outcome":"failed","errorCode":"RATE_LIMITED"}"#).unwrap();
        assert_eq!(
            failed,
            IngestOutcome::Failed {
                error_code: SyncErrorCode::RateLimited
            }
        );
        let done: IngestOutcome = serde_json::from_str(
            r#"{"outcome":"completed","watermark":{"type":"commit","sha":"deadbeef"}}"#,
        )
        .unwrap();
        assert_eq!(
            done,
            IngestOutcome::Completed {
                watermark: Some(Watermark::Commit {
                    sha: "deadbeef".into()
                })
            }
        );
    }
}
