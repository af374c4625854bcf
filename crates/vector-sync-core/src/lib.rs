//! # Vector Sync Core
//!
//! Portable logic for keeping vector-store sources in sync: data models,
//! the embedding profile catalog, the ingestion gate, backoff, the
//! profile / content type fan-out planner, the access diagnostic
//! reconciler, the store abstraction, and the [`service::SyncService`]
//! facade that composes them.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `vector-sync` service crate supplies the SQLite store, the GitHub
//! collaborator, and the admin API.
//!
//! The `test-utils` feature exposes the in-process fakes in [`testing`].

pub mod backoff;
pub mod clock;
pub mod collaborators;
pub mod error;
pub mod fanout;
pub mod gate;
pub mod models;
pub mod profiles;
pub mod reconciler;
pub mod response;
pub mod service;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::SyncError;
pub use service::SyncService;
