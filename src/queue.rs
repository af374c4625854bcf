//! `vsync jobs` output.
//!
//! Lists the outbox without consuming it. Workers take jobs through
//! `POST /jobs/take` and report back via `POST /results`.

use anyhow::Result;

use vector_sync_core::SyncService;

/// Print queued jobs, oldest first.
pub async fn run_jobs(service: &SyncService, limit: u32) -> Result<()> {
    let jobs = service.pending_jobs(limit).await?;

    if jobs.is_empty() {
        println!("No queued jobs.");
        return Ok(());
    }

    println!(
        "{:<6} {:<38} {:<14} {:<8} {:<9} ENQUEUED",
        "ID", "SOURCE", "CONTENT", "PROFILE", "TRIGGER"
    );
    for queued in &jobs {
        let job = &queued.job;
        println!(
            "{:<6} {:<38} {:<14} {:<8} {:<9} {}",
            queued.id,
            job.source_id,
            job.content_type,
            job.profile_id,
            job.trigger.as_str(),
            queued.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
