//! Wiring: builds a [`SyncService`] from configuration.
//!
//! Production wiring is the SQLite store (which also holds the job
//! outbox) and the GitHub client as both credential provider and probe.
//! The database must have been initialized with `vsync init`.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use vector_sync_core::service::Collaborators;
use vector_sync_core::SyncService;

use crate::config::Config;
use crate::db;
use crate::github::GithubClient;
use crate::sqlite_store::SqliteStore;

/// Build the service with production collaborators.
pub async fn build_service(config: &Config) -> Result<Arc<SyncService>> {
    let pool = db::connect(config).await?;
    let github = Arc::new(GithubClient::new(&config.github)?);
    let collaborators = Collaborators {
        credentials: github.clone(),
        probe: github,
    };
    Ok(assemble(config, pool, collaborators))
}

/// Build the service on the configured database with caller-supplied
/// collaborators.
pub async fn build_service_with(
    config: &Config,
    collaborators: Collaborators,
) -> Result<Arc<SyncService>> {
    let pool = db::connect(config).await?;
    Ok(assemble(config, pool, collaborators))
}

fn assemble(config: &Config, pool: SqlitePool, collaborators: Collaborators) -> Arc<SyncService> {
    let service = SyncService::new(Arc::new(SqliteStore::new(pool)), collaborators)
        .with_backoff(config.backoff.policy());
    Arc::new(service)
}
