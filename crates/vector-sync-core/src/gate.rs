//! Ingestion gate.
//!
//! Pure decision logic: may a status row start an ingestion run *now*?
//!
//! | Row state | Decision |
//! |-----------|----------|
//! | disabled | never |
//! | `idle`, `completed` | yes |
//! | `failed`, no `retry_after` or `retry_after <= now` | yes |
//! | `failed` before `retry_after` | no |
//! | `running` | no |
//!
//! The source-level aggregate ([`can_manually_ingest`]) is only an
//! optimistic hint for the caller. The authoritative check happens again
//! inside the store's atomic claim, which evaluates the same predicate.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ContentSyncStatus, SyncStatus};

/// Whether `row` may transition to `running` at `now`.
pub fn can_ingest(row: &ContentSyncStatus, now: DateTime<Utc>) -> bool {
    if !row.enabled {
        return false;
    }
    match row.status {
        SyncStatus::Idle | SyncStatus::Completed => true,
        SyncStatus::Failed => row.retry_after.map_or(true, |at| at <= now),
        SyncStatus::Running => false,
    }
}

/// True if any enabled row of a source individually passes [`can_ingest`].
pub fn can_manually_ingest(rows: &[ContentSyncStatus], now: DateTime<Utc>) -> bool {
    rows.iter().any(|row| can_ingest(row, now))
}

/// Why a trigger started nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclineReason {
    /// No enabled status rows exist for the source.
    NoEnabledContent,
    /// Every enabled row is already being ingested.
    AlreadyRunning,
    /// At least one enabled row is failed and still inside its backoff window.
    BackingOff,
}

/// Explain why [`can_manually_ingest`] is false. Returns `None` when some
/// row is eligible.
pub fn decline_reason(rows: &[ContentSyncStatus], now: DateTime<Utc>) -> Option<DeclineReason> {
    if can_manually_ingest(rows, now) {
        return None;
    }
    let enabled: Vec<&ContentSyncStatus> = rows.iter().filter(|r| r.enabled).collect();
    if enabled.is_empty() {
        return Some(DeclineReason::NoEnabledContent);
    }
    if enabled.iter().any(|r| r.status == SyncStatus::Failed) {
        Some(DeclineReason::BackingOff)
    } else {
        Some(DeclineReason::AlreadyRunning)
    }
}
