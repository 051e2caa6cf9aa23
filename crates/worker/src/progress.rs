//! Job lifecycle and progress notifications.
//!
//! Every payload carries the same correlation fields (`jobId`, `type`,
//! `imageRef`, `filename`) captured once when the run starts.

use lumen_core::job_events::{
    EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_PROGRESS, EVENT_JOB_STARTED,
};
use lumen_core::types::JobId;
use lumen_events::{BrokerError, EventBroker};
use serde_json::{json, Map, Value};

use crate::message::JobSubject;

/// Correlation-keyed progress callback handed to job handlers.
#[derive(Clone)]
pub struct ProgressReporter {
    broker: EventBroker,
    job_id: JobId,
    job_type: String,
    subject: JobSubject,
}

impl ProgressReporter {
    pub fn new(broker: EventBroker, job_id: JobId, job_type: impl Into<String>, subject: JobSubject) -> Self {
        Self {
            broker,
            job_id,
            job_type: job_type.into(),
            subject,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Emit a `job-progress` event. Best-effort: dropped when the broker is
    /// saturated. `percent` is clamped to 100.
    pub fn report(&self, step: &str, percent: u8) {
        let mut data = self.fields();
        data.insert("step".into(), json!(step));
        data.insert("progress".into(), json!(percent.min(100)));
        self.emit(EVENT_JOB_PROGRESS, data);
    }

    pub(crate) fn started(&self) {
        self.emit(EVENT_JOB_STARTED, self.fields());
    }

    pub(crate) fn completed(&self) {
        self.emit(EVENT_JOB_COMPLETED, self.fields());
    }

    pub(crate) fn failed(&self, error: &str) {
        let mut data = self.fields();
        data.insert("error".into(), json!(error));
        self.emit(EVENT_JOB_FAILED, data);
    }

    fn fields(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("jobId".into(), json!(self.job_id));
        data.insert("type".into(), json!(self.job_type));
        data.insert("imageRef".into(), json!(self.subject.image_ref));
        data.insert("filename".into(), json!(self.subject.filename));
        data
    }

    fn emit(&self, event: &str, data: Map<String, Value>) {
        match self.broker.broadcast(event, Value::Object(data)) {
            Ok(()) => {}
            Err(BrokerError::ChannelFull) => {
                tracing::trace!(job_id = %self.job_id, event, "Broker saturated, event dropped");
            }
            Err(BrokerError::Closed) => {
                tracing::trace!(job_id = %self.job_id, event, "Broker closed, event dropped");
            }
            Err(e @ BrokerError::InvalidEventName(_)) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Event rejected by broker");
            }
        }
    }
}
