//! Handlers for the `/jobs` resource: enqueue, run history, and per-type
//! administration of the registered workers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lumen_core::error::CoreError;
use lumen_core::types::{JobId, Timestamp};
use lumen_db::models::job_run::{JobRun, JobRunFilter, JobRunListQuery};
use lumen_worker::{JobCommand, JobSource, Worker};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::query::CountParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Number of runs included in the snapshot.
const SNAPSHOT_RECENT_RUNS: i64 = 20;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A job run with its status spelled out.
#[derive(Debug, Serialize)]
pub struct JobRunView {
    #[serde(flatten)]
    pub run: JobRun,
    pub status: &'static str,
}

impl From<JobRun> for JobRunView {
    fn from(run: JobRun) -> Self {
        let status = run.status().map_or("unknown", |s| s.name());
        Self { run, status }
    }
}

/// Live state of one registered worker.
#[derive(Debug, Serialize)]
pub struct WorkerInfo {
    pub name: String,
    pub display_name: String,
    pub topic: String,
    pub concurrency: usize,
    pub running: usize,
    pub canceled: bool,
    pub last_run: Option<Timestamp>,
    /// Messages waiting in the worker's topic.
    pub queued: usize,
    /// Whether the type supports `count` and `run` commands.
    pub commands: bool,
}

fn worker_info(state: &AppState, worker: &Worker) -> WorkerInfo {
    WorkerInfo {
        name: worker.name().to_string(),
        display_name: worker.display_name().to_string(),
        topic: worker.topic().to_string(),
        concurrency: worker.concurrency(),
        running: worker.running(),
        canceled: worker.is_canceled(),
        last_run: worker.last_run(),
        queued: state.channel.pending(worker.topic()),
        commands: worker.source().is_some(),
    }
}

#[derive(Debug, Serialize)]
pub struct JobsSnapshot {
    pub workers: Vec<WorkerInfo>,
    pub recent_runs: Vec<JobRunView>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn find_worker(state: &AppState, name: &str) -> AppResult<Arc<Worker>> {
    state
        .registry
        .get(name)
        .cloned()
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "JobType",
                id: name.to_string(),
            })
        })
}

fn require_source(worker: &Worker) -> AppResult<Arc<dyn JobSource>> {
    worker.source().cloned().ok_or_else(|| {
        AppError::Core(CoreError::Validation(format!(
            "job type '{}' does not support commands",
            worker.name()
        )))
    })
}

// ---------------------------------------------------------------------------
// Enqueue and query runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    pub topic: String,
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub id: JobId,
}

/// POST /api/v1/jobs
///
/// Record a pending run and publish it. Returns 202 with the job id; a
/// saturated topic answers 503.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    let payload = input.payload.unwrap_or_else(|| json!({}));
    let id = state.enqueuer.enqueue_json(&input.topic, &payload).await?;

    tracing::info!(job_id = %id, topic = %input.topic, "Job submitted");

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: SubmittedJob { id } })))
}

/// GET /api/v1/jobs?status=&job_type=&limit=&offset=
///
/// Newest first. Default page size 50, capped at 100.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobRunListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = params
        .into_filter()
        .map_err(|status| AppError::Core(CoreError::Validation(format!("unknown status '{status}'"))))?;
    let runs = state.store.list(&filter).await?;
    let data: Vec<JobRunView> = runs.into_iter().map(JobRunView::from).collect();
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/jobs/{uid}
pub async fn get_job(State(state): State<AppState>, Path(uid): Path<String>) -> AppResult<impl IntoResponse> {
    let run = state.store.find(&uid).await?.ok_or(AppError::Core(CoreError::NotFound {
        entity: "JobRun",
        id: uid,
    }))?;
    Ok(Json(DataResponse {
        data: JobRunView::from(run),
    }))
}

/// GET /api/v1/jobs/snapshot
pub async fn snapshot(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workers = state.registry.workers().map(|w| worker_info(&state, w)).collect();
    let filter = JobRunFilter {
        limit: SNAPSHOT_RECENT_RUNS,
        ..JobRunFilter::default()
    };
    let recent_runs = state
        .store
        .list(&filter)
        .await?
        .into_iter()
        .map(JobRunView::from)
        .collect();

    Ok(Json(DataResponse {
        data: JobsSnapshot { workers, recent_runs },
    }))
}

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/types
pub async fn list_types(State(state): State<AppState>) -> Json<DataResponse<Vec<WorkerInfo>>> {
    let data = state.registry.workers().map(|w| worker_info(&state, w)).collect();
    Json(DataResponse { data })
}

#[derive(Debug, Deserialize)]
pub struct SetConcurrency {
    pub concurrency: usize,
}

/// PUT /api/v1/jobs/types/{name}/concurrency
///
/// Takes effect immediately; lowering it never interrupts running jobs.
pub async fn set_concurrency(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<SetConcurrency>,
) -> AppResult<impl IntoResponse> {
    if input.concurrency == 0 {
        return Err(AppError::Core(CoreError::Validation(
            "concurrency must be at least 1".to_string(),
        )));
    }
    let worker = find_worker(&state, &name)?;
    worker.set_concurrency(input.concurrency);

    tracing::info!(worker = %name, concurrency = input.concurrency, "Worker concurrency changed");

    Ok(Json(DataResponse {
        data: worker_info(&state, &worker),
    }))
}

#[derive(Debug, Serialize)]
pub struct CommandCount {
    pub job_type: String,
    pub command: JobCommand,
    pub count: u64,
}

/// GET /api/v1/jobs/types/{name}/count?command=&image_uid=
///
/// How many jobs a `run` with the same command would enqueue. The
/// command defaults to `all`.
pub async fn count_jobs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<CountParams>,
) -> AppResult<impl IntoResponse> {
    let worker = find_worker(&state, &name)?;
    let source = require_source(&worker)?;
    let command: JobCommand = params.command.as_deref().unwrap_or("all").parse()?;
    let payload = match params.image_uid {
        Some(uid) => json!({ "image_uid": uid }),
        None => json!({}),
    };

    let count = source.count(command, &payload).await?;
    Ok(Json(DataResponse {
        data: CommandCount {
            job_type: name,
            command,
            count,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct RunCommand {
    pub command: String,
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CommandRun {
    pub job_type: String,
    pub command: JobCommand,
    pub count: usize,
    pub ids: Vec<JobId>,
}

/// POST /api/v1/jobs/types/{name}/run
///
/// Enqueue one job per subject the command selects. Returns 202.
pub async fn run_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<RunCommand>,
) -> AppResult<impl IntoResponse> {
    let worker = find_worker(&state, &name)?;
    let source = require_source(&worker)?;
    let command: JobCommand = input.command.parse()?;
    let payload = input.payload.unwrap_or_else(|| json!({}));

    let ids = source.enqueue(command, &payload, &state.enqueuer).await?;

    tracing::info!(worker = %name, command = %command, count = ids.len(), "Job command enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: CommandRun {
                job_type: name,
                command,
                count: ids.len(),
                ids,
            },
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub job_type: String,
    /// Running instances that were signalled.
    pub canceled: usize,
}

/// POST /api/v1/jobs/types/{name}/cancel
///
/// Signal every running instance of the type. Cancellation is cooperative:
/// handlers stop at their next check.
pub async fn cancel_type(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let worker = find_worker(&state, &name)?;
    let canceled = worker.cancel();

    tracing::info!(worker = %name, canceled, "Worker cancel requested");

    Ok(Json(DataResponse {
        data: CancelResult {
            job_type: name,
            canceled,
        },
    }))
}
