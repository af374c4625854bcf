//! Error type for registration, configuration, and repair operations.
//!
//! Ingestion failures are *not* represented here: they are recorded on
//! [`ContentSyncStatus`](crate::models::ContentSyncStatus) rows as a
//! [`SyncErrorCode`](crate::models::SyncErrorCode) and surfaced on the next
//! read. [`SyncError`] covers the synchronous failures a caller can fix
//! immediately (bad input, duplicate registration, missing access).

use thiserror::Error;

/// Errors returned by [`SyncService`](crate::service::SyncService) operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A repository source with the same `(team, owner, name)` already exists.
    #[error("source {owner}/{name} is already registered for this team")]
    DuplicateSource { owner: String, name: String },

    /// The credential scope cannot currently reach the target repository.
    #[error("installation {installation_id} cannot access {owner}/{name}")]
    AccessDenied {
        installation_id: i64,
        owner: String,
        name: String,
    },

    /// The operation would leave the source without an enabled embedding profile.
    #[error("at least one embedding profile must be selected")]
    NoProfileSelected,

    /// The caller tried to disable the primary content type of a source.
    #[error("content type '{0}' is mandatory and cannot be disabled")]
    MandatoryContentType(String),

    /// The referenced source or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The embedding profile id is not part of the catalog.
    #[error("unknown embedding profile: {0}")]
    UnknownProfile(i64),

    /// The content type is not valid for the source's kind.
    #[error("content type '{content_type}' is not supported by {kind} sources")]
    UnsupportedContentType { content_type: String, kind: String },

    /// The operation does not apply to this kind of source.
    #[error("operation '{operation}' is not supported by {kind} sources")]
    UnsupportedSourceKind { operation: String, kind: String },

    /// Malformed caller input (empty names and the like).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A collaborator (GitHub, worker queue) failed while handling the request.
    #[error("upstream error: {0}")]
    Upstream(anyhow::Error),

    /// The storage backend failed.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    /// Stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::DuplicateSource { .. } => "duplicate_source",
            SyncError::AccessDenied { .. } => "access_denied",
            SyncError::NoProfileSelected => "no_profile_selected",
            SyncError::MandatoryContentType(_) => "mandatory_content_type",
            SyncError::NotFound(_) => "not_found",
            SyncError::UnknownProfile(_) => "unknown_profile",
            SyncError::UnsupportedContentType { .. } => "unsupported_content_type",
            SyncError::UnsupportedSourceKind { .. } => "unsupported_source_kind",
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::Upstream(_) => "upstream_error",
            SyncError::Store(_) => "internal",
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SyncError::Upstream(_) | SyncError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
