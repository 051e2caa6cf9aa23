//! Periodic work started by the server alongside the HTTP listener.

use std::sync::Arc;

use lumen_worker::{CronJob, Enqueuer, JobCommand, JobRegistry, ScheduleError};
use serde_json::json;

/// Name of the schedule that enqueues work for images lacking derivatives.
pub const MISSING_SCAN_SCHEDULE: &str = "missing-scan";

/// Run the `missing` command on every worker that supports commands.
///
/// A failing worker is logged and skipped. Returns the number of jobs
/// enqueued across all workers.
pub async fn missing_scan(registry: &JobRegistry, enqueuer: &Enqueuer) -> usize {
    let payload = json!({});
    let mut total = 0;
    for worker in registry.workers() {
        let Some(source) = worker.source() else {
            continue;
        };
        match source.enqueue(JobCommand::Missing, &payload, enqueuer).await {
            Ok(ids) => {
                if !ids.is_empty() {
                    tracing::info!(worker = %worker.name(), count = ids.len(), "Missing scan enqueued jobs");
                }
                total += ids.len();
            }
            Err(e) => {
                tracing::error!(worker = %worker.name(), error = %e, "Missing scan failed");
            }
        }
    }
    total
}

/// Build the cron job that runs [`missing_scan`] on `expression`.
pub fn missing_scan_job(
    expression: &str,
    registry: Arc<JobRegistry>,
    enqueuer: Enqueuer,
) -> Result<CronJob, ScheduleError> {
    CronJob::builder(MISSING_SCAN_SCHEDULE)
        .expression(expression)
        .handler(move || {
            let registry = Arc::clone(&registry);
            let enqueuer = enqueuer.clone();
            async move {
                missing_scan(&registry, &enqueuer).await;
            }
        })
        .build()
}
