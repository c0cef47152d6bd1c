//! Job progress reporting
//!
//! Renders live progress from the engine and rebuilds progress for persisted
//! jobs from the checkpoint store.

use crate::job::{JobProgress, RECENT_ERRORS};
use crate::state::JobStatus;
use crate::storage::{CheckpointStore, JobRecord, StorageResult};

/// Rebuilds a job's progress from the checkpoint store
///
/// Every clean item records one fingerprint, so Done items beyond the
/// fingerprint count are duplicates. The error tail is taken from the last
/// errors recorded on the items.
///
/// # Arguments
///
/// * `store` - The checkpoint store to query
/// * `job` - The persisted job
pub fn load_job_progress(store: &dyn CheckpointStore, job: &JobRecord) -> StorageResult<JobProgress> {
    let items = store.load_items(job.id)?;
    let fingerprints = store.load_fingerprints(job.id)?.len();

    let errors: Vec<_> = items.iter().filter_map(|item| item.last_error).collect();
    let recent_errors = errors[errors.len().saturating_sub(RECENT_ERRORS)..].to_vec();

    let mut progress = JobProgress::from_items(
        job.status,
        &items,
        0,
        job.resume_cursor,
        recent_errors,
        job.failure.clone(),
    );
    progress.duplicates = progress.done.saturating_sub(fingerprints);
    Ok(progress)
}

/// Formats one job's progress as a few human-readable lines
pub fn format_progress(name: &str, progress: &JobProgress) -> String {
    let mut out = format!("Job '{}': {}\n", name, progress.status);

    let finished = progress.done + progress.dead_lettered + progress.cancelled;
    let percentage = if progress.total > 0 {
        (finished as f64 / progress.total as f64) * 100.0
    } else {
        100.0
    };
    out.push_str(&format!(
        "  {} / {} items finished ({:.1}%), resume cursor at {}\n",
        finished, progress.total, percentage, progress.resume_cursor
    ));
    out.push_str(&format!(
        "  queued {}, leased {}, in flight {}\n",
        progress.queued, progress.leased, progress.in_flight
    ));
    out.push_str(&format!(
        "  done {} ({} duplicate), dead-lettered {}, cancelled {}\n",
        progress.done, progress.duplicates, progress.dead_lettered, progress.cancelled
    ));

    if !progress.recent_errors.is_empty() {
        let kinds: Vec<String> = progress.recent_errors.iter().map(|k| k.to_string()).collect();
        out.push_str(&format!("  recent errors: {}\n", kinds.join(", ")));
    }

    if progress.status == JobStatus::Failed {
        out.push_str(&format!(
            "  failed: {}\n",
            progress.failure.as_deref().unwrap_or("unknown failure")
        ));
    }

    out
}

/// Prints one job's progress to stdout
pub fn print_progress(name: &str, progress: &JobProgress) {
    print!("{}", format_progress(name, progress));
}
