//! # Vector Sync
//!
//! Source registry and ingestion orchestration for team vector stores.
//!
//! A team binds GitHub repositories and document collections as
//! *sources*. Each source is indexed under one or more embedding profiles,
//! and every (source, content type, profile) combination has its own
//! status row. This crate is the service layer around
//! [`vector_sync_core`]: it persists the rows in SQLite, talks to GitHub
//! for access checks, hands claimed rows to the ingestion worker through
//! an outbox table written in the claim transaction, and exposes
//! everything through a CLI and a JSON admin API.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐   ┌──────────┐        ┌──────────────────┐
//!  │   CLI    │   │  Admin   │        │ ingestion worker │
//!  │ (vsync)  │   │   API    │        │   (external)     │
//!  └────┬─────┘   └────┬─────┘        └───┬──────────▲───┘
//!       │              │    POST /results │          │ POST /jobs/take
//!       ▼              ▼                  ▼          │
//!  ┌─────────────────────────────────────────────────┴───┐
//!  │              SyncService (vector-sync-core)         │
//!  └──────┬──────────────────────────────────┬───────────┘
//!         ▼                                  ▼
//!    SqliteStore (+ ingest_queue)       GithubClient
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vsync init                                  # create database
//! vsync profiles                              # list embedding profiles
//! vsync register team-1 acme/widgets --installation 42 --profile 1
//! vsync ingest <source-id>                    # manual trigger
//! vsync diagnose <source-id> --identity octocat
//! vsync serve                                 # start admin API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store trait |
//! | [`github`] | GitHub credential provider and reachability probe |
//! | [`queue`] | Job outbox listing |
//! | [`app`] | Service assembly |
//! | [`server`] | Admin HTTP API |
//! | [`sources`] | CLI listings |

pub mod app;
pub mod config;
pub mod db;
pub mod github;
pub mod migrate;
pub mod queue;
pub mod server;
pub mod sources;
pub mod sqlite_store;
