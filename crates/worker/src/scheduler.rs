//! Named cron schedules with singleton execution.
//!
//! Each schedule runs on its own task and awaits its handler inline, so a
//! schedule never overlaps itself. A firing that falls due while the
//! previous run is still going runs right after it; any further missed
//! firings collapse into that one.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type ScheduleHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule '{0}' has an empty cron expression")]
    Empty(String),

    #[error("schedule '{name}' has an invalid cron expression '{expression}': {reason}")]
    Invalid {
        name: String,
        expression: String,
        reason: String,
    },

    #[error("schedule '{0}' has no handler")]
    MissingHandler(String),

    #[error("schedule '{0}' already exists")]
    AlreadyExists(String),
}

/// A validated schedule ready to be added to a [`Scheduler`].
pub struct CronJob {
    name: String,
    expression: String,
    schedule: cron::Schedule,
    handler: ScheduleHandler,
}

impl CronJob {
    pub fn builder(name: impl Into<String>) -> CronJobBuilder {
        CronJobBuilder {
            name: name.into(),
            expression: String::new(),
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

impl std::fmt::Debug for CronJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronJob")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

pub struct CronJobBuilder {
    name: String,
    expression: String,
    handler: Option<ScheduleHandler>,
}

impl CronJobBuilder {
    /// Standard 5-field (`min hour dom mon dow`) or 6/7-field expression
    /// with leading seconds.
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler = Some(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(handler()) }));
        self
    }

    pub fn build(self) -> Result<CronJob, ScheduleError> {
        let expression = self.expression.trim().to_string();
        if expression.is_empty() {
            return Err(ScheduleError::Empty(self.name));
        }
        let handler = self
            .handler
            .ok_or_else(|| ScheduleError::MissingHandler(self.name.clone()))?;

        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.clone()
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
            name: self.name.clone(),
            expression: expression.clone(),
            reason: e.to_string(),
        })?;

        Ok(CronJob {
            name: self.name,
            expression,
            schedule,
            handler,
        })
    }
}

struct Entry {
    expression: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the running schedules.
pub struct Scheduler {
    entries: Mutex<HashMap<String, Entry>>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Schedules stop when `cancel` fires or on [`shutdown`](Self::shutdown).
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Start `job` on its own task.
    pub fn add(&self, job: CronJob) -> Result<(), ScheduleError> {
        let mut entries = self.lock();
        if entries.contains_key(&job.name) {
            return Err(ScheduleError::AlreadyExists(job.name));
        }

        let name = job.name.clone();
        let expression = job.expression.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_schedule(job, cancel.clone()));
        tracing::info!(schedule = %name, expression = %expression, "Schedule added");
        entries.insert(
            name,
            Entry {
                expression,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Stop a schedule. A run in progress is allowed to finish.
    pub fn remove(&self, name: &str) -> bool {
        match self.lock().remove(name) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(schedule = %name, "Schedule removed");
                true
            }
            None => false,
        }
    }

    /// `(name, expression)` pairs, sorted by name.
    pub fn schedules(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.expression.clone()))
            .collect();
        list.sort();
        list
    }

    pub fn names(&self) -> Vec<String> {
        self.schedules().into_iter().map(|(name, _)| name).collect()
    }

    /// Cancel every schedule and wait for their tasks to end.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Entry)> = self.lock().drain().collect();
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }
        for (name, entry) in entries {
            if let Err(e) = entry.handle.await {
                tracing::error!(schedule = %name, error = %e, "Schedule task aborted");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Where to resume after a run that was due at `due` and ended at `now`.
///
/// Returns the new cursor and whether a queued firing must run at once.
fn resume_after(job: &CronJob, due: DateTime<Utc>, now: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    match job.next_after(&due) {
        Some(missed) if missed <= now => (now, true),
        _ => (due, false),
    }
}

async fn run_schedule(job: CronJob, cancel: CancellationToken) {
    let mut cursor = Utc::now();

    loop {
        let Some(due) = job.next_after(&cursor) else {
            tracing::info!(schedule = %job.name, "No further firings");
            break;
        };

        let wait = (due - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        fire(&job).await;

        let (next_cursor, queued) = resume_after(&job, due, Utc::now());
        cursor = next_cursor;
        if queued {
            if cancel.is_cancelled() {
                break;
            }
            tracing::debug!(schedule = %job.name, "Firing was due during previous run");
            fire(&job).await;
            cursor = Utc::now();
        }
    }

    tracing::debug!(schedule = %job.name, "Schedule task finished");
}

async fn fire(job: &CronJob) {
    tracing::debug!(schedule = %job.name, "Schedule fired");
    (job.handler)().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn noop_job(name: &str, expression: &str) -> Result<CronJob, ScheduleError> {
        CronJob::builder(name).expression(expression).handler(|| async {}).build()
    }

    #[test]
    fn empty_expression_is_rejected() {
        assert_matches!(noop_job("scan", "  "), Err(ScheduleError::Empty(name)) if name == "scan");
    }

    #[test]
    fn missing_handler_is_rejected() {
        let result = CronJob::builder("scan").expression("*/5 * * * *").build();
        assert_matches!(result, Err(ScheduleError::MissingHandler(_)));
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert_matches!(noop_job("scan", "every tuesday"), Err(ScheduleError::Invalid { .. }));
    }

    #[test]
    fn five_field_expressions_fire_on_the_minute() {
        let job = noop_job("scan", "*/15 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 10, 7, 30).unwrap();

        let next = job.next_after(&start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn overrun_queues_exactly_one_firing() {
        let job = noop_job("scan", "* * * * *").unwrap();
        let due = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();

        // Finished before the next minute: nothing queued.
        let quick = due + chrono::Duration::seconds(20);
        assert_eq!(resume_after(&job, due, quick), (due, false));

        // Overran three minutes: one queued run, cursor jumps to now.
        let slow = due + chrono::Duration::seconds(200);
        assert_eq!(resume_after(&job, due, slow), (slow, true));
        assert_eq!(
            job.next_after(&slow).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 10, 4, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let scheduler = Scheduler::new(CancellationToken::new());
        scheduler.add(noop_job("scan", "0 0 * * *").unwrap()).unwrap();

        assert_matches!(
            scheduler.add(noop_job("scan", "0 1 * * *").unwrap()),
            Err(ScheduleError::AlreadyExists(_))
        );
        assert_eq!(scheduler.names(), vec!["scan".to_string()]);
        assert!(scheduler.remove("scan"));
        assert!(!scheduler.remove("scan"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn runs_never_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let job = {
            let (running, max_seen, runs) = (running.clone(), max_seen.clone(), runs.clone());
            CronJob::builder("slow")
                .expression("* * * * * *")
                .handler(move || {
                    let (running, max_seen, runs) = (running.clone(), max_seen.clone(), runs.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1500)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build()
                .unwrap()
        };

        let scheduler = Scheduler::new(CancellationToken::new());
        scheduler.add(job).unwrap();
        tokio::time::sleep(Duration::from_millis(4200)).await;
        scheduler.shutdown().await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
