use crate::storage::StorageError;
use crate::transform::TransformError;

/// Why a job handler did not complete.
///
/// The [`kind`](JobError::kind) tag is persisted next to the message on the
/// failed run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The payload could not be decoded into what the handler expects.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// The handler observed cancellation and gave up.
    #[error("job canceled")]
    Canceled,

    /// Handler-level failure, recorded verbatim.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The handler task panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Payload(_) => "payload",
            JobError::Canceled => "canceled",
            JobError::Failed(_) => "handler",
            JobError::Transform(_) => "transform",
            JobError::Storage(_) => "storage",
            JobError::Panicked(_) => "panic",
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Payload(e.to_string())
    }
}

impl From<tokio::task::JoinError> for JobError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            JobError::Panicked(panic_message(e.into_panic()))
        } else {
            JobError::Canceled
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_failures_keep_their_message() {
        let err = JobError::failed("decode failed");
        assert_eq!(err.to_string(), "decode failed");
        assert_eq!(err.kind(), "handler");
    }

    #[tokio::test]
    async fn panics_convert_to_panicked() {
        let join_err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        let err = JobError::from(join_err);
        assert_eq!(err.kind(), "panic");
        assert_eq!(err.to_string(), "handler panicked: boom");
    }
}
