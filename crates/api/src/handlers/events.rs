//! Handlers for the `/events` resource: the live stream plus its
//! monitoring and test endpoints.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use lumen_core::error::CoreError;
use lumen_core::job_events::EVENT_MESSAGE;
use lumen_core::types::Timestamp;
use lumen_events::{validate_event_name, ClientStream, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::query::HistoryParams;
use crate::router::REQUEST_ID_HEADER;
use crate::state::AppState;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/events
///
/// Open a server-sent-events stream. The client id is the request id set
/// by middleware; a request without one gets a fresh UUID.
pub async fn stream_events(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let client_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let stream = ClientStream::connect(
        &state.broker,
        client_id,
        state.stream_options,
        state.shutdown.child_token(),
    )
    .await?;

    // Keep reverse proxies from buffering the stream.
    let headers = [(X_ACCEL_BUFFERING.clone(), HeaderValue::from_static("no"))];
    Ok((headers, stream.into_sse()).into_response())
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub connected_clients: usize,
    pub client_ids: Vec<String>,
    pub timestamp: Timestamp,
}

/// GET /api/v1/events/stats
pub async fn stats(State(state): State<AppState>) -> Json<StreamStats> {
    let client_ids = state.broker.client_ids();
    Json(StreamStats {
        connected_clients: client_ids.len(),
        client_ids,
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub events: Vec<EventRecord>,
    pub count: usize,
}

/// GET /api/v1/events/history?limit=
///
/// Most recent broadcasts, oldest first.
pub async fn history(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Json<HistoryPage> {
    let events = state.broker.history(params.limit());
    Json(HistoryPage {
        count: events.len(),
        events,
    })
}

/// DELETE /api/v1/events/history
pub async fn clear_history(State(state): State<AppState>) -> Json<Value> {
    state.broker.event_history().clear();
    tracing::info!("Event history cleared");
    Json(json!({
        "success": true,
        "message": "Event history cleared",
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetrics {
    pub connected_clients: usize,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub timestamp: Timestamp,
}

/// GET /api/v1/events/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<EventMetrics> {
    let history = state.broker.event_history();
    Json(EventMetrics {
        connected_clients: state.broker.client_count(),
        total_events: history.len(),
        events_by_type: history.counts_by_event(),
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Test publishing
// ---------------------------------------------------------------------------

/// Body for the broadcast and targeted-send endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    pub event: Option<String>,
    pub data: Option<Value>,
}

impl PublishRequest {
    /// Event name (default `message`) and payload (default `{}`). Names
    /// that would span several `event:` lines are rejected.
    fn into_parts(self) -> AppResult<(String, Value)> {
        let event = self
            .event
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| EVENT_MESSAGE.to_string());
        if validate_event_name(&event).is_err() {
            return Err(AppError::Core(CoreError::Validation(
                "event name must not contain line breaks".to_string(),
            )));
        }
        Ok((event, self.data.unwrap_or_else(|| json!({}))))
    }
}

/// POST /api/v1/events/broadcast
///
/// Fan an event out to every client and record it in history. A saturated
/// broker buffer answers 503.
pub async fn broadcast(
    State(state): State<AppState>,
    Json(input): Json<PublishRequest>,
) -> AppResult<impl IntoResponse> {
    let (event, data) = input.into_parts()?;
    state.broker.broadcast(event.clone(), data)?;

    tracing::debug!(event = %event, "Test broadcast queued");

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Message broadcasted successfully",
            "clients": state.broker.client_count(),
        })),
    ))
}

/// POST /api/v1/events/send/{clientId}
///
/// Targeted sends are not recorded in history. An unknown client id is
/// accepted and dropped at dispatch.
pub async fn send_to_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(input): Json<PublishRequest>,
) -> AppResult<impl IntoResponse> {
    let (event, data) = input.into_parts()?;
    state.broker.send_to_client(client_id.clone(), event, data)?;

    Ok(Json(json!({
        "success": true,
        "message": "Message sent successfully",
        "clientId": client_id,
    })))
}
