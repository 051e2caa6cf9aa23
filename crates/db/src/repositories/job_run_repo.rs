//! Repository for the `job_runs` table.
//!
//! Uses the `JobRunStatus` enum from `models::status` for all status
//! transitions. Every update is keyed by `uid` and guarded by the current
//! status, so a run never leaves a terminal state.

use sqlx::PgPool;

use crate::models::job_run::{JobRun, JobRunFilter, JobRunOutcome, NewJobRun};
use crate::models::status::JobRunStatus;

/// Column list for `job_runs` queries.
const COLUMNS: &str = "\
    id, uid, job_type, topic, image_ref, status_id, payload, \
    enqueued_at, started_at, completed_at, error_kind, error_message";

/// Provides persistence operations for job runs.
pub struct JobRunRepo;

impl JobRunRepo {
    /// Insert a new run in `Pending` state.
    pub async fn insert(pool: &PgPool, input: &NewJobRun) -> Result<JobRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO job_runs (uid, job_type, topic, image_ref, status_id, payload, enqueued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRun>(&query)
            .bind(&input.uid)
            .bind(&input.job_type)
            .bind(&input.topic)
            .bind(&input.image_ref)
            .bind(JobRunStatus::Pending.id())
            .bind(&input.payload)
            .bind(input.enqueued_at)
            .fetch_one(pool)
            .await
    }

    /// Move a `Pending` run to `Running` and stamp `started_at`.
    ///
    /// Returns `None` when no pending run with that uid exists (unknown uid,
    /// or a duplicate delivery of a run that was already claimed).
    pub async fn claim(pool: &PgPool, uid: &str) -> Result<Option<JobRun>, sqlx::Error> {
        let query = format!(
            "UPDATE job_runs SET status_id = $2, started_at = NOW() \
             WHERE uid = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRun>(&query)
            .bind(uid)
            .bind(JobRunStatus::Running.id())
            .bind(JobRunStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Write a terminal outcome and stamp `completed_at`.
    ///
    /// Only non-terminal runs are updated. Returns `true` if a row changed.
    pub async fn finish(
        pool: &PgPool,
        uid: &str,
        outcome: &JobRunOutcome,
    ) -> Result<bool, sqlx::Error> {
        let (kind, message) = match outcome {
            JobRunOutcome::Success => (None, None),
            JobRunOutcome::Failed { kind, message } => (Some(kind.as_str()), Some(message.as_str())),
        };
        let result = sqlx::query(
            "UPDATE job_runs \
             SET status_id = $2, completed_at = NOW(), error_kind = $3, error_message = $4 \
             WHERE uid = $1 AND status_id IN ($5, $6)",
        )
        .bind(uid)
        .bind(outcome.status().id())
        .bind(kind)
        .bind(message)
        .bind(JobRunStatus::Pending.id())
        .bind(JobRunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a run by its uid.
    pub async fn find_by_uid(pool: &PgPool, uid: &str) -> Result<Option<JobRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_runs WHERE uid = $1");
        sqlx::query_as::<_, JobRun>(&query)
            .bind(uid)
            .fetch_optional(pool)
            .await
    }

    /// List runs, newest first, with optional status and type filters.
    pub async fn list(pool: &PgPool, filter: &JobRunFilter) -> Result<Vec<JobRun>, sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if filter.status.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }

        if filter.job_type.is_some() {
            conditions.push(format!("job_type = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM job_runs \
             {where_clause} \
             ORDER BY enqueued_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, JobRun>(&query);

        if let Some(status) = filter.status {
            q = q.bind(status.id());
        }
        if let Some(job_type) = &filter.job_type {
            q = q.bind(job_type);
        }

        q = q.bind(filter.limit).bind(filter.offset);

        q.fetch_all(pool).await
    }
}
