pub mod events;
pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree for request/response endpoints.
///
/// Route hierarchy:
///
/// ```text
/// /events/stats                        connection statistics (GET)
/// /events/history                      recent broadcasts (GET ?limit), clear (DELETE)
/// /events/metrics                      counts per event name (GET)
/// /events/broadcast                    broadcast to all clients (POST)
/// /events/send/{clientId}              send to one client (POST)
///
/// /jobs                                list (?status, job_type, limit, offset), submit
/// /jobs/snapshot                       workers and recent runs (GET)
/// /jobs/types                          registered job types (GET)
/// /jobs/types/{name}/concurrency       change concurrency (PUT)
/// /jobs/types/{name}/count             count a command (GET ?command, image_uid)
/// /jobs/types/{name}/run               enqueue a command (POST)
/// /jobs/types/{name}/cancel            cancel running jobs (POST)
/// /jobs/{uid}                          one run (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/events", events::router())
        .nest("/jobs", jobs::router())
}

/// Long-lived streaming routes under `/api/v1`. Mounted without the
/// request timeout.
///
/// ```text
/// /events                              server-sent events stream (GET)
/// ```
pub fn streaming_routes() -> Router<AppState> {
    Router::new().route("/events", get(handlers::events::stream_events))
}
