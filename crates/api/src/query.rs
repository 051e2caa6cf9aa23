//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Default number of history entries returned.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest history page a caller may ask for.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// `?limit=` for the event history endpoint.
///
/// Kept as a raw string so a malformed value falls back to the default
/// instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<String>,
}

impl HistoryParams {
    /// Non-positive or unparsable values give the default; larger values
    /// are capped.
    pub fn limit(&self) -> usize {
        match self.limit.as_deref().map(str::trim).map(str::parse::<i64>) {
            Some(Ok(n)) if n > 0 => (n as usize).min(MAX_HISTORY_LIMIT),
            _ => DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// `?command=&image_uid=` for the per-type count endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CountParams {
    pub command: Option<String>,
    pub image_uid: Option<String>,
}
