//! Interfaces to the external systems this core drives.
//!
//! The core never fetches or embeds content itself. It talks to two
//! collaborators:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`CredentialProvider`] | Lists the installations an acting user can use |
//! | [`ContentProbe`] | Checks whether an installation reaches `owner/name` |
//!
//! Work for the ingestion worker is not pushed through a collaborator: a
//! claimed row's job is written to the store's outbox in the same atomic
//! step as the claim (see [`SyncStore::try_claim`](crate::store::SyncStore::try_claim)).
//!
//! The service crate provides GitHub-backed implementations; tests use
//! small in-process fakes.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CredentialScope;

/// Result of probing one installation for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The installation can read the repository.
    Reachable,
    /// The installation does not cover the repository's owner.
    Unreachable,
    /// The installation covers the owner, but the repository is gone or
    /// not shared with it.
    RepositoryNotFound,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// All credential scopes available to `identity`.
    async fn list_accessible_scopes(&self, identity: &str) -> Result<Vec<CredentialScope>>;
}

#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn probe(&self, installation_id: i64, owner: &str, name: &str) -> Result<ProbeOutcome>;

    async fn can_reach(&self, installation_id: i64, owner: &str, name: &str) -> Result<bool> {
        Ok(self.probe(installation_id, owner, name).await? == ProbeOutcome::Reachable)
    }
}
