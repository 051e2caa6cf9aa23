//! Event names pushed to streaming clients for background job lifecycle
//! transitions and connection housekeeping.
//!
//! Used by the worker harness and progress reporter when broadcasting
//! through the event broker, and by the SSE connection loop.

/// A worker instance picked up a job and is about to run its handler.
pub const EVENT_JOB_STARTED: &str = "job-started";

/// Intermediate progress reported by a running handler.
pub const EVENT_JOB_PROGRESS: &str = "job-progress";

/// Handler returned successfully.
pub const EVENT_JOB_COMPLETED: &str = "job-completed";

/// Handler returned an error (or panicked).
pub const EVENT_JOB_FAILED: &str = "job-failed";

/// Synthetic first event written on every new stream.
pub const EVENT_CONNECTED: &str = "connected";

/// Keep-alive frame, carries an empty JSON object.
pub const EVENT_PING: &str = "ping";

/// Default event name for ad-hoc broadcasts that do not specify one.
pub const EVENT_MESSAGE: &str = "message";

/// Maximum number of characters kept from a handler error message.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1024;
