//! Persistence seam for job runs.
//!
//! [`PgJobRunStore`] delegates to the `job_runs` repository.
//! [`MemoryJobRunStore`] applies the same transition rules in memory and
//! backs tests and database-less tooling.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use lumen_db::models::job_run::{JobRun, JobRunFilter, JobRunOutcome, NewJobRun};
use lumen_db::models::status::JobRunStatus;
use lumen_db::repositories::JobRunRepo;
use lumen_db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job run '{0}' already exists")]
    Duplicate(String),
}

#[async_trait]
pub trait JobRunStore: Send + Sync {
    /// Record a new `Pending` run.
    async fn insert(&self, run: NewJobRun) -> Result<JobRun, StoreError>;

    /// `Pending → Running`, stamping `started_at`. `None` when there is no
    /// pending run with this uid.
    async fn claim(&self, uid: &str) -> Result<Option<JobRun>, StoreError>;

    /// Write a terminal outcome and stamp `completed_at`. Returns `false`
    /// when the run is unknown or already terminal.
    async fn finish(&self, uid: &str, outcome: &JobRunOutcome) -> Result<bool, StoreError>;

    async fn find(&self, uid: &str) -> Result<Option<JobRun>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>, StoreError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgJobRunStore {
    pool: DbPool,
}

impl PgJobRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRunStore for PgJobRunStore {
    async fn insert(&self, run: NewJobRun) -> Result<JobRun, StoreError> {
        Ok(JobRunRepo::insert(&self.pool, &run).await?)
    }

    async fn claim(&self, uid: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(JobRunRepo::claim(&self.pool, uid).await?)
    }

    async fn finish(&self, uid: &str, outcome: &JobRunOutcome) -> Result<bool, StoreError> {
        Ok(JobRunRepo::finish(&self.pool, uid, outcome).await?)
    }

    async fn find(&self, uid: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(JobRunRepo::find_by_uid(&self.pool, uid).await?)
    }

    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>, StoreError> {
        Ok(JobRunRepo::list(&self.pool, filter).await?)
    }
}

/// In-memory store with the same transition rules as the database.
#[derive(Default)]
pub struct MemoryJobRunStore {
    runs: Mutex<Vec<JobRun>>,
}

impl MemoryJobRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JobRun>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobRunStore for MemoryJobRunStore {
    async fn insert(&self, run: NewJobRun) -> Result<JobRun, StoreError> {
        let mut runs = self.lock();
        if runs.iter().any(|r| r.uid == run.uid) {
            return Err(StoreError::Duplicate(run.uid));
        }
        let row = JobRun {
            id: runs.len() as i64 + 1,
            uid: run.uid,
            job_type: run.job_type,
            topic: run.topic,
            image_ref: run.image_ref,
            status_id: JobRunStatus::Pending.id(),
            payload: run.payload,
            enqueued_at: run.enqueued_at,
            started_at: None,
            completed_at: None,
            error_kind: None,
            error_message: None,
        };
        runs.push(row.clone());
        Ok(row)
    }

    async fn claim(&self, uid: &str) -> Result<Option<JobRun>, StoreError> {
        let mut runs = self.lock();
        let Some(run) = runs
            .iter_mut()
            .find(|r| r.uid == uid && r.status() == Some(JobRunStatus::Pending))
        else {
            return Ok(None);
        };
        run.status_id = JobRunStatus::Running.id();
        run.started_at = Some(Utc::now());
        Ok(Some(run.clone()))
    }

    async fn finish(&self, uid: &str, outcome: &JobRunOutcome) -> Result<bool, StoreError> {
        let mut runs = self.lock();
        let Some(run) = runs
            .iter_mut()
            .find(|r| r.uid == uid && !r.status().is_some_and(JobRunStatus::is_terminal))
        else {
            return Ok(false);
        };
        run.status_id = outcome.status().id();
        run.completed_at = Some(Utc::now());
        if let JobRunOutcome::Failed { kind, message } = outcome {
            run.error_kind = Some(kind.clone());
            run.error_message = Some(message.clone());
        }
        Ok(true)
    }

    async fn find(&self, uid: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(self.lock().iter().find(|r| r.uid == uid).cloned())
    }

    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>, StoreError> {
        let runs = self.lock();
        let mut matching: Vec<JobRun> = runs
            .iter()
            .filter(|r| filter.status.is_none_or(|s| r.status_id == s.id()))
            .filter(|r| filter.job_type.as_deref().is_none_or(|t| r.job_type == t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}
