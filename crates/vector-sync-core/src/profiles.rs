//! Embedding profile catalog.
//!
//! An embedding profile is a named vectorization configuration (provider +
//! model + dimensionality). Each source is indexed independently under
//! every enabled profile, so status rows are keyed by profile id. The
//! catalog is fixed at build time; profile ids are stable and stored in
//! the database.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::{Result, SyncError};

/// Backend that produces the vectors for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    OpenAi,
    Ollama,
    Local,
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Ollama => "ollama",
            EmbeddingProvider::Local => "local",
        };
        f.pad(name)
    }
}

/// A single catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbeddingProfile {
    pub id: i64,
    pub provider: EmbeddingProvider,
    pub model: &'static str,
    pub dims: usize,
}

pub const CATALOG: &[EmbeddingProfile] = &[
    EmbeddingProfile {
        id: 1,
        provider: EmbeddingProvider::OpenAi,
        model: "text-embedding-3-small",
        dims: 1536,
    },
    EmbeddingProfile {
        id: 2,
        provider: EmbeddingProvider::OpenAi,
        model: "text-embedding-3-large",
        dims: 3072,
    },
    EmbeddingProfile {
        id: 3,
        provider: EmbeddingProvider::Ollama,
        model: "nomic-embed-text",
        dims: 768,
    },
    EmbeddingProfile {
        id: 4,
        provider: EmbeddingProvider::Local,
        model: "all-minilm-l6-v2",
        dims: 384,
    },
];

pub fn lookup(id: i64) -> Option<&'static EmbeddingProfile> {
    CATALOG.iter().find(|p| p.id == id)
}

/// Validate a caller-supplied profile selection.
///
/// Deduplicates the ids, rejects unknown ones, and fails with
/// [`SyncError::NoProfileSelected`] when the selection is empty.
pub fn validate_selection(ids: &[i64]) -> Result<BTreeSet<i64>> {
    let mut selected = BTreeSet::new();
    for &id in ids {
        if lookup(id).is_none() {
            return Err(SyncError::UnknownProfile(id));
        }
        selected.insert(id);
    }
    if selected.is_empty() {
        return Err(SyncError::NoProfileSelected);
    }
    Ok(selected)
}
