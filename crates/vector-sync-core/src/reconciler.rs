//! Access diagnostic reconciler.
//!
//! When a repository source starts failing with an access-classified error
//! (its installation was revoked, or the repository moved or was deleted),
//! the reconciler searches every installation the acting user can see for
//! one that still reaches the repository.
//!
//! Diagnosis is read-only: it never writes to the store, so it can be
//! re-run as often as the caller likes. The only mutation that follows
//! from it is an explicit rebind the caller confirms
//! ([`SyncService::apply_diagnostic_fix`](crate::service::SyncService::apply_diagnostic_fix)).
//!
//! # Outcome
//!
//! | Probe results | Diagnosis |
//! |---------------|-----------|
//! | some installation reaches the repo | `Fixable { new_scope }` (first hit wins) |
//! | scope listing or any probe errored, none reachable | `NotFixable(diagnosis-failed)` |
//! | an installation covers the owner but not the repo | `NotFixable(repository-not-found)` |
//! | nothing covers it (including no installations at all) | `NotFixable(no-installation)` |

use serde::Serialize;
use tracing::{debug, warn};

use crate::collaborators::{ContentProbe, CredentialProvider, ProbeOutcome};
use crate::models::CredentialScope;

/// Why a source could not be repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotFixableReason {
    /// No installation available to the user reaches the repository owner.
    NoInstallation,
    /// The owner is covered but the repository no longer exists there.
    RepositoryNotFound,
    /// The diagnosis itself failed (upstream API error); retry later.
    DiagnosisFailed,
}

impl NotFixableReason {
    /// Whether the caller should offer deletion rather than a retry.
    pub fn is_definitive(&self) -> bool {
        !matches!(self, NotFixableReason::DiagnosisFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "DiagnosisBody")]
pub enum Diagnosis {
    Fixable { new_scope: CredentialScope },
    NotFixable { reason: NotFixableReason },
}

impl Diagnosis {
    pub fn can_be_fixed(&self) -> bool {
        matches!(self, Diagnosis::Fixable { .. })
    }
}

/// Wire shape: `{canBeFixed, newScope?, reason?}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosisBody {
    can_be_fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_scope: Option<CredentialScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<NotFixableReason>,
}

impl From<Diagnosis> for DiagnosisBody {
    fn from(d: Diagnosis) -> Self {
        match d {
            Diagnosis::Fixable { new_scope } => DiagnosisBody {
                can_be_fixed: true,
                new_scope: Some(new_scope),
                reason: None,
            },
            Diagnosis::NotFixable { reason } => DiagnosisBody {
                can_be_fixed: false,
                new_scope: None,
                reason: Some(reason),
            },
        }
    }
}

pub struct Reconciler<'a> {
    credentials: &'a dyn CredentialProvider,
    probe: &'a dyn ContentProbe,
}

impl<'a> Reconciler<'a> {
    pub fn new(credentials: &'a dyn CredentialProvider, probe: &'a dyn ContentProbe) -> Self {
        Self { credentials, probe }
    }

    /// Search the scopes available to `identity` for one that reaches
    /// `owner/name`, stopping at the first success.
    pub async fn diagnose(&self, identity: &str, owner: &str, name: &str) -> Diagnosis {
        let scopes = match self.credentials.list_accessible_scopes(identity).await {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!(identity, error = %e, "Listing credential scopes failed");
                return Diagnosis::NotFixable {
                    reason: NotFixableReason::DiagnosisFailed,
                };
            }
        };

        let mut saw_missing_repo = false;
        let mut saw_error = false;

        for scope in scopes {
            match self.probe.probe(scope.installation_id, owner, name).await {
                Ok(ProbeOutcome::Reachable) => {
                    debug!(
                        installation_id = scope.installation_id,
                        owner, name, "Found installation that reaches repository"
                    );
                    return Diagnosis::Fixable { new_scope: scope };
                }
                Ok(ProbeOutcome::RepositoryNotFound) => saw_missing_repo = true,
                Ok(ProbeOutcome::Unreachable) => {}
                Err(e) => {
                    warn!(
                        installation_id = scope.installation_id,
                        owner, name, error = %e, "Probe failed"
                    );
                    saw_error = true;
                }
            }
        }

        let reason = if saw_error {
            NotFixableReason::DiagnosisFailed
        } else if saw_missing_repo {
            NotFixableReason::RepositoryNotFound
        } else {
            NotFixableReason::NoInstallation
        };
        Diagnosis::NotFixable { reason }
    }
}
