//! Bulk job commands and the per-worker hooks that count and enqueue them.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use lumen_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::enqueue::{EnqueueError, Enqueuer};
use crate::storage::StorageError;

/// Which subjects a bulk run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCommand {
    /// Every known subject.
    All,
    /// Subjects lacking this worker's output.
    Missing,
    /// The one subject named in the payload.
    Single,
}

impl JobCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            JobCommand::All => "all",
            JobCommand::Missing => "missing",
            JobCommand::Single => "single",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job command '{0}' (expected all, missing or single)")]
pub struct UnknownCommand(pub String);

impl FromStr for JobCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(JobCommand::All),
            "missing" => Ok(JobCommand::Missing),
            "single" => Ok(JobCommand::Single),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

/// Optional admin hooks attached to a worker role.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// How many jobs `command` would enqueue.
    async fn count(&self, command: JobCommand, payload: &serde_json::Value) -> Result<u64, SourceError>;

    /// Enqueue one job per selected subject. Returns the new job ids.
    async fn enqueue(
        &self,
        command: JobCommand,
        payload: &serde_json::Value,
        enqueuer: &Enqueuer,
    ) -> Result<Vec<JobId>, SourceError>;
}
