//! Embedding profile and content type fan-out.
//!
//! A source is ingested once per (content type × embedding profile). When
//! the caller changes either axis, this module computes which status rows
//! must be created, re-enabled, or disabled. Disabled rows are kept for
//! history and are re-enabled (not recreated) if the pair comes back.
//!
//! Planning is pure; the resulting [`FanOutPlan`] is applied atomically by
//! [`SyncStore::apply_fan_out`](crate::store::SyncStore::apply_fan_out).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::models::{ContentSyncStatus, ContentType, SourceKind, StatusKey};
use crate::profiles;

/// Requested on/off state for one content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeToggle {
    pub content_type: ContentType,
    pub enabled: bool,
}

/// Row changes produced by a fan-out computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutPlan {
    /// Pairs with no row yet; inserted as `idle`, enabled.
    pub create: Vec<StatusKey>,
    /// Disabled historical rows to switch back on.
    pub enable: Vec<StatusKey>,
    /// Enabled rows to switch off.
    pub disable: Vec<StatusKey>,
}

impl FanOutPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.enable.is_empty() && self.disable.is_empty()
    }
}

/// Validate the content types requested at registration time.
///
/// The primary content type is always included; asking to disable it is a
/// [`SyncError::MandatoryContentType`] error.
pub fn registration_content_types(
    kind: SourceKind,
    toggles: &[ContentTypeToggle],
) -> Result<BTreeSet<ContentType>> {
    let mut wanted = BTreeMap::new();
    for toggle in toggles {
        check_supported(kind, toggle.content_type)?;
        wanted.insert(toggle.content_type, toggle.enabled);
    }
    let primary = kind.primary_content_type();
    if wanted.get(&primary) == Some(&false) {
        return Err(SyncError::MandatoryContentType(primary.to_string()));
    }
    wanted.insert(primary, true);
    Ok(wanted
        .into_iter()
        .filter_map(|(ct, on)| on.then_some(ct))
        .collect())
}

/// Rows to create for a new source: every content type × every profile.
pub fn registration_keys(
    source_id: &str,
    content_types: &BTreeSet<ContentType>,
    profile_ids: &BTreeSet<i64>,
) -> Vec<StatusKey> {
    content_types
        .iter()
        .flat_map(|&ct| {
            profile_ids
                .iter()
                .map(move |&profile| StatusKey::new(source_id, ct, profile))
        })
        .collect()
}

/// Plan a change of the enabled embedding profiles.
///
/// New profiles get a row for every currently active content type;
/// profiles no longer selected have their rows disabled. Fails with
/// [`SyncError::NoProfileSelected`] for an empty selection, leaving state
/// untouched.
pub fn plan_profiles(
    source_id: &str,
    kind: SourceKind,
    rows: &[ContentSyncStatus],
    profile_ids: &[i64],
) -> Result<FanOutPlan> {
    let selected = profiles::validate_selection(profile_ids)?;
    let mut active_types: BTreeSet<ContentType> = rows
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.content_type)
        .collect();
    active_types.insert(kind.primary_content_type());

    let mut plan = FanOutPlan::default();
    for &profile in &selected {
        for &ct in &active_types {
            let key = StatusKey::new(source_id, ct, profile);
            plan_enable(&mut plan, rows, key);
        }
    }
    for row in rows.iter().filter(|r| r.enabled) {
        if !selected.contains(&row.profile_id) {
            plan.disable.push(row.key());
        }
    }
    Ok(plan)
}

/// Plan a change of the enabled content types.
///
/// Enabling a type creates or re-enables a row for every active profile;
/// disabling a type switches its rows off. The primary type of the source
/// kind cannot be disabled.
pub fn plan_content_types(
    source_id: &str,
    kind: SourceKind,
    rows: &[ContentSyncStatus],
    toggles: &[ContentTypeToggle],
) -> Result<FanOutPlan> {
    let mut wanted = BTreeMap::new();
    for toggle in toggles {
        check_supported(kind, toggle.content_type)?;
        if !toggle.enabled && toggle.content_type == kind.primary_content_type() {
            return Err(SyncError::MandatoryContentType(
                toggle.content_type.to_string(),
            ));
        }
        wanted.insert(toggle.content_type, toggle.enabled);
    }

    let active_profiles: BTreeSet<i64> = rows
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.profile_id)
        .collect();
    if active_profiles.is_empty() {
        return Err(SyncError::NoProfileSelected);
    }

    let mut plan = FanOutPlan::default();
    for (ct, enabled) in wanted {
        if enabled {
            for &profile in &active_profiles {
                plan_enable(&mut plan, rows, StatusKey::new(source_id, ct, profile));
            }
        } else {
            plan.disable.extend(
                rows.iter()
                    .filter(|r| r.enabled && r.content_type == ct)
                    .map(|r| r.key()),
            );
        }
    }
    Ok(plan)
}

fn plan_enable(plan: &mut FanOutPlan, rows: &[ContentSyncStatus], key: StatusKey) {
    match rows.iter().find(|r| r.key() == key) {
        Some(existing) if existing.enabled => {}
        Some(_) => plan.enable.push(key),
        None => plan.create.push(key),
    }
}

fn check_supported(kind: SourceKind, content_type: ContentType) -> Result<()> {
    if kind.supports(content_type) {
        Ok(())
    } else {
        Err(SyncError::UnsupportedContentType {
            content_type: content_type.to_string(),
            kind: kind.to_string(),
        })
    }
}
