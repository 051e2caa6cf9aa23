//! Producer-side entry point: record a pending run, then publish.

use std::sync::Arc;

use lumen_core::text::truncate_chars;
use lumen_core::job_events::MAX_ERROR_MESSAGE_CHARS;
use lumen_core::types::JobId;
use lumen_db::models::job_run::{JobRunOutcome, NewJobRun};
use serde::Serialize;

use crate::channel::{ChannelError, MessageChannel};
use crate::message::JobMessage;
use crate::registry::JobRegistry;
use crate::store::{JobRunStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("no worker is bound to topic '{0}'")]
    UnknownTopic(String),

    #[error("payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates job runs and publishes their messages.
#[derive(Clone)]
pub struct Enqueuer {
    channel: MessageChannel,
    store: Arc<dyn JobRunStore>,
    registry: Arc<JobRegistry>,
}

impl Enqueuer {
    pub fn new(channel: MessageChannel, store: Arc<dyn JobRunStore>, registry: Arc<JobRegistry>) -> Self {
        Self {
            channel,
            store,
            registry,
        }
    }

    /// Enqueue raw `payload` on `topic` and return the job id.
    ///
    /// The run is stored as `Pending` before publishing. If the channel
    /// rejects the message the run is marked `Failed` (kind `capacity`) and
    /// the channel error is returned, so the caller can retry later.
    pub async fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<JobId, EnqueueError> {
        let worker = self
            .registry
            .for_topic(topic)
            .ok_or_else(|| EnqueueError::UnknownTopic(topic.to_string()))?;

        let message = JobMessage::new(topic, payload);
        let subject = message.subject();
        let id = message.id.clone();

        self.store
            .insert(NewJobRun {
                uid: id.clone(),
                job_type: worker.name().to_string(),
                topic: topic.to_string(),
                image_ref: subject.image_ref,
                payload: serde_json::from_slice(&message.payload).ok(),
                enqueued_at: message.enqueued_at,
            })
            .await?;

        if let Err(e) = self.channel.publish(message).await {
            let outcome = JobRunOutcome::Failed {
                kind: "capacity".to_string(),
                message: truncate_chars(&e.to_string(), MAX_ERROR_MESSAGE_CHARS).to_string(),
            };
            if let Err(store_err) = self.store.finish(&id, &outcome).await {
                tracing::error!(job_id = %id, error = %store_err, "Failed to record rejected publish");
            }
            return Err(e.into());
        }

        tracing::debug!(job_id = %id, topic, worker = %worker.name(), "Job enqueued");
        Ok(id)
    }

    /// Serialize `payload` as JSON and enqueue it.
    pub async fn enqueue_json<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<JobId, EnqueueError> {
        let bytes = serde_json::to_vec(payload)?;
        self.enqueue(topic, bytes).await
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }
}
