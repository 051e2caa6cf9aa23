//! Execution harness: one dispatch loop per worker role.
//!
//! Each loop takes a concurrency slot, then a message, and runs the
//! message through the worker state machine on its own task:
//!
//! `start` → claim run → `job-started` → handler → `job-completed` /
//! `job-failed` → persist terminal status → `stop`.
//!
//! Nothing a handler does (error, bad payload, panic) ends the loop.
//!
//! Closing the channel lets each loop drain its topic and stop. Cancelling
//! the harness token stops intake at once; anything still queued is then
//! recorded as `Failed` with kind `shutdown` so no run is left `Pending`.

use std::sync::Arc;

use lumen_core::job_events::MAX_ERROR_MESSAGE_CHARS;
use lumen_core::text::truncate_chars;
use lumen_db::models::job_run::JobRunOutcome;
use lumen_events::EventBroker;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channel::MessageChannel;
use crate::error::JobError;
use crate::message::JobMessage;
use crate::progress::ProgressReporter;
use crate::registry::JobRegistry;
use crate::store::JobRunStore;
use crate::worker::{JobContext, Worker};

/// Error kind recorded for messages still queued when the harness stops.
pub const SHUTDOWN_KIND: &str = "shutdown";

/// Wires the registry to the channel, the run store and the broker.
#[derive(Clone)]
pub struct WorkerHarness {
    registry: Arc<JobRegistry>,
    channel: MessageChannel,
    store: Arc<dyn JobRunStore>,
    broker: EventBroker,
}

/// What became of one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { kind: &'static str, message: String },
    /// Already claimed or finished by an earlier delivery.
    Duplicate,
}

impl WorkerHarness {
    pub fn new(
        registry: Arc<JobRegistry>,
        channel: MessageChannel,
        store: Arc<dyn JobRunStore>,
        broker: EventBroker,
    ) -> Self {
        Self {
            registry,
            channel,
            store,
            broker,
        }
    }

    /// Run every worker's dispatch loop until `cancel` fires or the channel
    /// is closed and drained, then wait for in-flight jobs to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let mut loops = JoinSet::new();
        for worker in self.registry.workers() {
            let harness = self.clone();
            let worker = Arc::clone(worker);
            let cancel = cancel.clone();
            loops.spawn(async move { harness.dispatch_loop(worker, cancel).await });
        }
        tracing::info!(workers = loops.len(), "Worker harness started");

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch loop aborted");
            }
        }
        tracing::info!("Worker harness stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn dispatch_loop(&self, worker: Arc<Worker>, cancel: CancellationToken) {
        let subscription = self.channel.subscribe(worker.topic());
        let mut in_flight = JoinSet::new();
        tracing::info!(worker = %worker.name(), topic = %worker.topic(), concurrency = worker.concurrency(), "Worker listening");

        loop {
            // Take a slot first so excess messages stay queued on the topic.
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                slot = worker.acquire_slot() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = subscription.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let harness = self.clone();
            let worker = Arc::clone(&worker);
            in_flight.spawn(async move {
                harness.process(&worker, message).await;
                drop(slot);
            });

            while let Some(result) = in_flight.try_join_next() {
                log_join(result);
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(worker = %worker.name(), in_flight = in_flight.len(), "Waiting for in-flight jobs");
        }
        while let Some(result) = in_flight.join_next().await {
            log_join(result);
        }

        let mut abandoned = 0usize;
        while let Some(message) = subscription.try_recv() {
            self.abandon(&worker, &message).await;
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!(worker = %worker.name(), abandoned, "Queued jobs abandoned at shutdown");
        }
        tracing::info!(worker = %worker.name(), "Worker stopped");
    }

    /// Record a message that will never run.
    async fn abandon(&self, worker: &Worker, message: &JobMessage) {
        let outcome = JobRunOutcome::Failed {
            kind: SHUTDOWN_KIND.to_string(),
            message: "Worker shut down before the job started".to_string(),
        };
        match self.store.finish(&message.id, &outcome).await {
            Ok(_) => {
                tracing::debug!(job_id = %message.id, worker = %worker.name(), "Job abandoned at shutdown");
            }
            Err(e) => {
                tracing::error!(job_id = %message.id, error = %e, "Failed to record abandoned job");
            }
        }
    }

    /// Run one message through the worker state machine.
    pub async fn process(&self, worker: &Arc<Worker>, message: JobMessage) -> RunOutcome {
        let (instance, run_cancel) = worker.start_instance();
        let job_id = message.id.clone();

        // Persist `Running` first so duplicate deliveries never announce.
        match self.store.claim(&job_id).await {
            Ok(Some(_)) => {}
            Ok(None) => match self.store.find(&job_id).await {
                Ok(Some(run)) => {
                    tracing::info!(job_id = %job_id, worker = %worker.name(), status_id = run.status_id, "Duplicate delivery skipped");
                    instance.stop();
                    return RunOutcome::Duplicate;
                }
                Ok(None) => {
                    tracing::debug!(job_id = %job_id, worker = %worker.name(), "No job run recorded, processing untracked");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Job run lookup failed, processing anyway");
                }
            },
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to mark job running, processing anyway");
            }
        }

        let subject = message.subject();
        let progress = ProgressReporter::new(self.broker.clone(), job_id.clone(), worker.name(), subject.clone());
        progress.started();
        tracing::info!(
            job_id = %job_id,
            worker = %worker.name(),
            instance = instance.index(),
            image_ref = subject.image_ref.as_deref().unwrap_or(""),
            "Job started",
        );

        let ctx = JobContext {
            message,
            subject,
            cancel: run_cancel,
            progress: progress.clone(),
            scratch: self.registry.scratch(worker.name()),
        };
        let handler = worker.handler();
        // A separate task so a panicking handler surfaces as a JoinError.
        let result = match tokio::spawn(async move { handler.handle(ctx).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(JobError::from(join_err)),
        };

        let outcome = match result {
            Ok(()) => {
                progress.completed();
                tracing::info!(job_id = %job_id, worker = %worker.name(), "Job completed");
                RunOutcome::Completed
            }
            Err(e) => {
                let message = truncate_chars(&e.to_string(), MAX_ERROR_MESSAGE_CHARS).to_string();
                progress.failed(&message);
                tracing::warn!(job_id = %job_id, worker = %worker.name(), kind = e.kind(), error = %message, "Job failed");
                RunOutcome::Failed {
                    kind: e.kind(),
                    message,
                }
            }
        };

        let record = match &outcome {
            RunOutcome::Failed { kind, message } => JobRunOutcome::Failed {
                kind: (*kind).to_string(),
                message: message.clone(),
            },
            _ => JobRunOutcome::Success,
        };
        if let Err(e) = self.store.finish(&job_id, &record).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist job outcome");
        }

        instance.stop();
        outcome
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Job task aborted");
    }
}
