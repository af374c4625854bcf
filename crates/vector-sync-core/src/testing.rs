//! In-process collaborator fakes for tests.
//!
//! Used by this crate's unit tests and by the service crate's integration
//! tests to drive [`SyncService`](crate::service::SyncService) without
//! GitHub. Compiled for this crate's tests and behind the `test-utils`
//! feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::collaborators::{ContentProbe, CredentialProvider, ProbeOutcome};
use crate::models::CredentialScope;
use crate::service::Collaborators;

/// Returns the same list of installations for every identity.
#[derive(Default)]
pub struct StaticCredentials {
    scopes: Vec<CredentialScope>,
}

impl StaticCredentials {
    pub fn new(installation_ids: &[i64]) -> Self {
        Self {
            scopes: installation_ids
                .iter()
                .map(|&id| CredentialScope {
                    installation_id: id,
                    account_login: format!("account-{id}"),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn list_accessible_scopes(&self, _identity: &str) -> Result<Vec<CredentialScope>> {
        Ok(self.scopes.clone())
    }
}

/// Answers probes from a mutable `(installation, owner/name) → outcome`
/// table. Unlisted pairs are [`ProbeOutcome::Unreachable`].
#[derive(Default)]
pub struct ScriptedProbe {
    answers: Mutex<HashMap<(i64, String), ProbeOutcome>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, installation_id: i64, repository: &str, outcome: ProbeOutcome) {
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((installation_id, repository.to_string()), outcome);
    }

    /// Forget every answer, making all repositories unreachable.
    pub fn revoke_all(&self) {
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

#[async_trait]
impl ContentProbe for ScriptedProbe {
    async fn probe(&self, installation_id: i64, owner: &str, name: &str) -> Result<ProbeOutcome> {
        let answers = self.answers.lock().unwrap_or_else(|p| p.into_inner());
        Ok(answers
            .get(&(installation_id, format!("{owner}/{name}")))
            .copied()
            .unwrap_or(ProbeOutcome::Unreachable))
    }
}

/// A full set of fakes plus handles to inspect and script them.
pub struct Fakes {
    pub credentials: Arc<StaticCredentials>,
    pub probe: Arc<ScriptedProbe>,
}

impl Fakes {
    pub fn new(installation_ids: &[i64]) -> Self {
        Self {
            credentials: Arc::new(StaticCredentials::new(installation_ids)),
            probe: Arc::new(ScriptedProbe::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            credentials: self.credentials.clone(),
            probe: self.probe.clone(),
        }
    }
}
