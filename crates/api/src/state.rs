use std::sync::Arc;

use lumen_events::{EventBroker, StreamOptions};
use lumen_worker::{Enqueuer, JobRegistry, JobRunStore, MessageChannel};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; every field is an `Arc` or a handle.
#[derive(Clone)]
pub struct AppState {
    /// Database pool, when running against PostgreSQL. Only the health
    /// check reads it; job runs go through `store`.
    pub pool: Option<lumen_db::DbPool>,
    pub config: Arc<ServerConfig>,
    pub broker: EventBroker,
    pub registry: Arc<JobRegistry>,
    pub channel: MessageChannel,
    pub store: Arc<dyn JobRunStore>,
    pub enqueuer: Enqueuer,
    pub stream_options: StreamOptions,
    /// Root shutdown token. Event streams end when it fires.
    pub shutdown: CancellationToken,
}
