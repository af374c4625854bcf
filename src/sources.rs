//! `vsync sources` and `vsync profiles` output.

use anyhow::Result;

use vector_sync_core::profiles::CATALOG;
use vector_sync_core::service::SourceView;
use vector_sync_core::SyncService;

/// Print every source of `team_id` with one line per status row.
pub async fn run_sources(service: &SyncService, team_id: &str) -> Result<()> {
    let views = service.list_sources_with_statuses(team_id).await?;
    if views.is_empty() {
        println!("No sources registered for team {}.", team_id);
        return Ok(());
    }
    for view in &views {
        print_source(view);
        println!();
    }
    Ok(())
}

pub fn print_source(view: &SourceView) {
    let source = &view.source;
    println!("{}  {} ({})", source.id, source.label(), source.kind());
    if let Some((_, _, installation_id)) = source.repository() {
        println!("  installation: {}", installation_id);
    }
    println!(
        "  manual ingest: {}",
        if view.can_manually_ingest {
            "available"
        } else {
            "unavailable"
        }
    );
    if view.needs_diagnosis {
        println!("  access lost: run `vsync diagnose {} --identity <user>`", source.id);
    }
    println!(
        "  {:<14} {:<8} {:<8} {:<10} {:<14} {:<20} LAST SYNCED",
        "CONTENT", "PROFILE", "ENABLED", "STATUS", "ERROR", "RETRY AFTER"
    );
    for row in &view.statuses {
        println!(
            "  {:<14} {:<8} {:<8} {:<10} {:<14} {:<20} {}",
            row.content_type,
            row.profile_id,
            row.enabled,
            row.status,
            row.error_code.map(|c| c.as_str()).unwrap_or("-"),
            row.retry_after
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        );
    }
}

/// Print the embedding profile catalog.
pub fn list_profiles() {
    println!("{:<4} {:<8} {:<24} DIMS", "ID", "PROVIDER", "MODEL");
    for p in CATALOG {
        println!("{:<4} {:<8} {:<24} {}", p.id, p.provider, p.model, p.dims);
    }
}
