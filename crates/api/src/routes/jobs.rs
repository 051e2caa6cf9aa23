//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                          -> list_jobs
/// POST   /                          -> submit_job
/// GET    /snapshot                  -> snapshot
/// GET    /types                     -> list_types
/// PUT    /types/{name}/concurrency  -> set_concurrency
/// GET    /types/{name}/count        -> count_jobs
/// POST   /types/{name}/run          -> run_command
/// POST   /types/{name}/cancel       -> cancel_type
/// GET    /{uid}                     -> get_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/snapshot", get(jobs::snapshot))
        .route("/types", get(jobs::list_types))
        .route("/types/{name}/concurrency", put(jobs::set_concurrency))
        .route("/types/{name}/count", get(jobs::count_jobs))
        .route("/types/{name}/run", post(jobs::run_command))
        .route("/types/{name}/cancel", post(jobs::cancel_type))
        .route("/{uid}", get(jobs::get_job))
}
