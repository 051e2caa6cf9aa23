//! Route definitions for the `/events` monitoring endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::events;
use crate::state::AppState;

/// Routes mounted at `/events`. The stream itself lives in
/// [`super::streaming_routes`].
///
/// ```text
/// GET    /stats               -> stats
/// GET    /history             -> history
/// DELETE /history             -> clear_history
/// GET    /metrics             -> metrics
/// POST   /broadcast           -> broadcast
/// POST   /send/{clientId}     -> send_to_client
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(events::stats))
        .route("/history", get(events::history).delete(events::clear_history))
        .route("/metrics", get(events::metrics))
        .route("/broadcast", post(events::broadcast))
        .route("/send/{clientId}", post(events::send_to_client))
}
