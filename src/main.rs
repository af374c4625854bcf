//! # Vector Sync CLI (`vsync`)
//!
//! ```bash
//! vsync --config ./config/vsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vsync init` | Create the SQLite database and run schema migrations |
//! | `vsync serve` | Start the admin HTTP API |
//! | `vsync profiles` | List the embedding profile catalog |
//! | `vsync sources <team>` | List a team's sources with their status rows |
//! | `vsync register <team> <owner/name>` | Register a GitHub repository |
//! | `vsync collection <team> <name>` | Register a document collection |
//! | `vsync ingest <source>` | Trigger ingestion for a source |
//! | `vsync diagnose <source> --identity <user>` | Look for an installation that restores access |
//! | `vsync deregister <source>` | Delete a source and its status rows |
//! | `vsync jobs` | List queued ingestion jobs without taking them |
//!
//! Log output goes to stderr and is controlled by `RUST_LOG`
//! (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vector_sync::{app, config, migrate, queue, server, sources};
use vector_sync_core::fanout::ContentTypeToggle;
use vector_sync_core::models::ContentType;
use vector_sync_core::reconciler::Diagnosis;
use vector_sync_core::service::{RegisterDocumentCollection, RegisterRepository};

/// Vector Sync: source registry and ingestion orchestration for team
/// vector stores.
#[derive(Parser)]
#[command(name = "vsync", version, about = "Source registry and ingestion orchestration for team vector stores")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the admin HTTP API on `[server].bind`.
    Serve,

    /// List the embedding profile catalog.
    Profiles,

    /// List a team's sources and their per-profile status.
    Sources {
        /// Team identifier.
        team: String,
    },

    /// Register a GitHub repository as a source.
    Register {
        /// Team identifier.
        team: String,

        /// Repository as `owner/name`.
        repository: String,

        /// GitHub App installation that grants access.
        #[arg(long)]
        installation: i64,

        /// Embedding profile id; repeat for several.
        #[arg(long = "profile", required = true)]
        profiles: Vec<i64>,

        /// Also ingest pull requests.
        #[arg(long)]
        pull_requests: bool,
    },

    /// Register an empty document collection.
    Collection {
        /// Team identifier.
        team: String,

        /// Collection name.
        name: String,

        /// Embedding profile id; repeat for several.
        #[arg(long = "profile", required = true)]
        profiles: Vec<i64>,
    },

    /// Trigger ingestion for a source.
    Ingest {
        /// Source id.
        source: String,

        /// Record the run as scheduler-initiated.
        #[arg(long)]
        scheduled: bool,
    },

    /// Diagnose lost repository access.
    Diagnose {
        /// Source id.
        source: String,

        /// GitHub login whose installations are searched.
        #[arg(long)]
        identity: String,

        /// Rebind the source if a working installation is found.
        #[arg(long)]
        fix: bool,
    },

    /// Delete a source with all its status rows and documents.
    Deregister {
        /// Source id.
        source: String,
    },

    /// List queued ingestion jobs.
    Jobs {
        /// Maximum number of jobs to show.
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Profiles = cli.command {
        sources::list_profiles();
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Profiles => unreachable!(),
        Commands::Sources { team } => {
            let service = app::build_service(&cfg).await?;
            sources::run_sources(&service, &team).await?;
        }
        Commands::Register {
            team,
            repository,
            installation,
            profiles,
            pull_requests,
        } => {
            let Some((owner, name)) = repository.split_once('/') else {
                bail!("repository must be given as owner/name, got '{}'", repository);
            };
            let service = app::build_service(&cfg).await?;
            let view = service
                .register_repository(RegisterRepository {
                    team_id: team,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    installation_id: installation,
                    content_types: vec![ContentTypeToggle {
                        content_type: ContentType::PullRequest,
                        enabled: pull_requests,
                    }],
                    profile_ids: profiles,
                })
                .await?;
            sources::print_source(&view);
        }
        Commands::Collection {
            team,
            name,
            profiles,
        } => {
            let service = app::build_service(&cfg).await?;
            let view = service
                .register_document_collection(RegisterDocumentCollection {
                    team_id: team,
                    name,
                    profile_ids: profiles,
                })
                .await?;
            sources::print_source(&view);
        }
        Commands::Ingest { source, scheduled } => {
            let service = app::build_service(&cfg).await?;
            let outcome = if scheduled {
                service.trigger_scheduled_ingest(&source).await?
            } else {
                service.trigger_manual_ingest(&source).await?
            };
            if outcome.started {
                println!("Ingestion started for {} row(s):", outcome.claimed.len());
                for key in &outcome.claimed {
                    println!("  {}", key);
                }
            } else if let Some(reason) = outcome.reason {
                println!("Ingestion not started: {:?}", reason);
            }
        }
        Commands::Diagnose {
            source,
            identity,
            fix,
        } => {
            let service = app::build_service(&cfg).await?;
            match service.diagnose(&source, &identity).await? {
                Diagnosis::Fixable { new_scope } => {
                    println!(
                        "Fixable: installation {} ({}) can access the repository.",
                        new_scope.installation_id, new_scope.account_login
                    );
                    if fix {
                        let view = service.apply_diagnostic_fix(&source, &new_scope).await?;
                        println!("Source rebound.");
                        sources::print_source(&view);
                    }
                }
                Diagnosis::NotFixable { reason } => {
                    println!("Not fixable: {:?}", reason);
                    if reason.is_definitive() {
                        println!("No installation can reach the repository; consider `vsync deregister {}`.", source);
                    } else {
                        println!("The diagnosis could not complete; retry later.");
                    }
                }
            }
        }
        Commands::Deregister { source } => {
            let service = app::build_service(&cfg).await?;
            service.deregister_source(&source).await?;
            println!("Source {} deregistered.", source);
        }
        Commands::Jobs { limit } => {
            let service = app::build_service(&cfg).await?;
            queue::run_jobs(&service, limit).await?;
        }
    }

    Ok(())
}
