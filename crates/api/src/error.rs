use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lumen_core::error::CoreError;
use lumen_events::BrokerError;
use lumen_worker::source::UnknownCommand;
use lumen_worker::storage::StorageError;
use lumen_worker::{ChannelError, EnqueueError, SourceError, StoreError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and the job subsystem's own
/// errors. Implements [`IntoResponse`] to produce `{error, code}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::Store(err) => classify_store_error(err),
            AppError::Channel(err) => classify_channel_error(err),
            AppError::Broker(err) => classify_broker_error(err),
            AppError::Enqueue(err) => classify_enqueue_error(err),
            AppError::Source(err) => classify_source_error(err),
            AppError::UnknownCommand(err) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal(detail: &dyn std::fmt::Display) -> Classified {
    tracing::error!(error = %detail, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone()),
        CoreError::Internal(msg) => internal(msg),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> Classified {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            internal(db_err)
        }
        other => internal(other),
    }
}

fn classify_store_error(err: &StoreError) -> Classified {
    match err {
        StoreError::Database(db) => classify_sqlx_error(db),
        StoreError::Duplicate(_) => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
    }
}

fn classify_channel_error(err: &ChannelError) -> Classified {
    match err {
        ChannelError::Full(_) => (StatusCode::SERVICE_UNAVAILABLE, "CHANNEL_FULL", err.to_string()),
        ChannelError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", err.to_string()),
    }
}

fn classify_broker_error(err: &BrokerError) -> Classified {
    match err {
        BrokerError::ChannelFull => (StatusCode::SERVICE_UNAVAILABLE, "CHANNEL_FULL", err.to_string()),
        BrokerError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", err.to_string()),
        BrokerError::InvalidEventName(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
    }
}

fn classify_enqueue_error(err: &EnqueueError) -> Classified {
    match err {
        EnqueueError::UnknownTopic(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        EnqueueError::Payload(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
        EnqueueError::Channel(inner) => classify_channel_error(inner),
        EnqueueError::Store(inner) => classify_store_error(inner),
    }
}

fn classify_source_error(err: &SourceError) -> Classified {
    match err {
        SourceError::Payload(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        SourceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        SourceError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        SourceError::Storage(StorageError::InvalidPath(_)) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
        }
        SourceError::Storage(other) => internal(other),
        SourceError::Enqueue(inner) => classify_enqueue_error(inner),
    }
}
