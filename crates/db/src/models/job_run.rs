//! Job run entity and DTOs. One row per enqueued job message.

use lumen_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{JobRunStatus, StatusId};

/// A row from the `job_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRun {
    #[serde(skip)]
    pub id: i64,
    pub uid: String,
    pub job_type: String,
    pub topic: String,
    pub image_ref: Option<String>,
    pub status_id: StatusId,
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl JobRun {
    /// Decoded status. `None` only if the row carries an unknown id.
    pub fn status(&self) -> Option<JobRunStatus> {
        JobRunStatus::from_id(self.status_id)
    }
}

/// DTO for creating a `Pending` job run at enqueue time.
#[derive(Debug, Clone)]
pub struct NewJobRun {
    pub uid: String,
    pub job_type: String,
    pub topic: String,
    pub image_ref: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: Timestamp,
}

/// Terminal outcome written when a worker finishes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Success,
    Failed {
        kind: String,
        /// Already truncated to the column limit by the caller.
        message: String,
    },
}

impl JobRunOutcome {
    pub fn status(&self) -> JobRunStatus {
        match self {
            JobRunOutcome::Success => JobRunStatus::Success,
            JobRunOutcome::Failed { .. } => JobRunStatus::Failed,
        }
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobRunListQuery {
    /// Filter by status name (`pending`, `running`, `success`, `failed`).
    pub status: Option<String>,
    /// Filter by job type.
    pub job_type: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for job run listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job run listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Validated, clamped listing filter shared by every job run store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunFilter {
    pub status: Option<JobRunStatus>,
    pub job_type: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobRunFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl JobRunListQuery {
    /// Resolve the status name and clamp pagination.
    ///
    /// Returns the offending value when `status` is not a known status name.
    pub fn into_filter(self) -> Result<JobRunFilter, String> {
        let status = match self.status.as_deref() {
            None | Some("") => None,
            Some(name) => Some(JobRunStatus::from_name(name).ok_or_else(|| name.to_string())?),
        };
        let limit = match self.limit {
            Some(l) if l > 0 => l.min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        };
        Ok(JobRunFilter {
            status,
            job_type: self.job_type.filter(|t| !t.is_empty()),
            limit,
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_uses_defaults() {
        let filter = JobRunListQuery::default().into_filter().unwrap();
        assert_eq!(filter, JobRunFilter::default());
    }

    #[test]
    fn limit_is_capped_at_100() {
        let query = JobRunListQuery {
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(query.into_filter().unwrap().limit, MAX_LIMIT);
    }

    #[test]
    fn non_positive_limit_falls_back_to_default() {
        let query = JobRunListQuery {
            limit: Some(0),
            offset: Some(-3),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.limit, DEFAULT_LIMIT);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let query = JobRunListQuery {
            status: Some("exploded".into()),
            ..Default::default()
        };
        assert_eq!(query.into_filter().unwrap_err(), "exploded");
    }

    #[test]
    fn known_status_is_resolved() {
        let query = JobRunListQuery {
            status: Some("running".into()),
            ..Default::default()
        };
        assert_eq!(
            query.into_filter().unwrap().status,
            Some(JobRunStatus::Running)
        );
    }
}
