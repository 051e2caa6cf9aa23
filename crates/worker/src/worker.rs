//! Worker roles and their per-instance lifecycle state.
//!
//! A [`Worker`] is a named, topic-bound role with a concurrency limit. It
//! owns one [`WorkerInstance`] per concurrency slot; each instance carries
//! the busy / canceled / last-run state of the job it is running, guarded
//! by a single mutex so the three fields always move together.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use lumen_core::types::Timestamp;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::message::{JobMessage, JobSubject};
use crate::progress::ProgressReporter;
use crate::registry::ScratchSpace;
use crate::source::JobSource;

/// Lifecycle protocol violations. Callers back off; nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("already running")]
    AlreadyRunning,

    /// A cancel was requested and the handler has not returned yet.
    #[error("still running")]
    StillRunning,
}

#[derive(Debug, Default)]
struct LifecycleState {
    busy: bool,
    canceled: bool,
    last_run: Option<Timestamp>,
    token: Option<CancellationToken>,
}

/// One execution slot of a worker role.
#[derive(Debug)]
pub struct WorkerInstance {
    index: usize,
    state: Mutex<LifecycleState>,
}

impl WorkerInstance {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: Mutex::new(LifecycleState::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Acquire the busy state and hand out a fresh cancellation token for
    /// the run.
    pub fn start(&self) -> Result<CancellationToken, LifecycleError> {
        let mut state = self.lock();
        if state.canceled {
            return Err(LifecycleError::StillRunning);
        }
        if state.busy {
            return Err(LifecycleError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        state.busy = true;
        state.canceled = false;
        state.token = Some(token.clone());
        Ok(token)
    }

    /// Clear busy and canceled, stamp `last_run`. Always succeeds.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.busy = false;
        state.canceled = false;
        state.token = None;
        state.last_run = Some(Utc::now());
    }

    /// Request cooperative cancellation of the current run.
    ///
    /// No-op (returns `false`) when the instance is idle.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if !state.busy {
            return false;
        }
        state.canceled = true;
        if let Some(token) = &state.token {
            token.cancel();
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().busy
    }

    pub fn is_canceled(&self) -> bool {
        self.lock().canceled
    }

    pub fn last_run(&self) -> Option<Timestamp> {
        self.lock().last_run
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a handler gets for one job.
pub struct JobContext {
    pub message: JobMessage,
    pub subject: JobSubject,
    /// Fired when the run is canceled. Handlers check it at safe points.
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
    pub scratch: ScratchSpace,
}

impl JobContext {
    /// Decode the payload, mapping failures to [`JobError::Payload`].
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(self.message.decode()?)
    }

    /// `Err(Canceled)` once cancellation has been requested.
    pub fn ensure_active(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            Err(JobError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Business logic run for each message on a worker's topic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        (self.0)(ctx).await
    }
}

#[derive(Debug, Default)]
struct Slots {
    concurrency: usize,
    /// Permits still to be retired after a shrink while they were in use.
    debt: usize,
}

/// A named, topic-bound consumer role.
pub struct Worker {
    name: String,
    topic: String,
    display_name: String,
    handler: Arc<dyn JobHandler>,
    source: Option<Arc<dyn JobSource>>,
    instances: RwLock<Vec<Arc<WorkerInstance>>>,
    permits: Arc<Semaphore>,
    slots: Mutex<Slots>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        display_name: impl Into<String>,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        source: Option<Arc<dyn JobSource>>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name: name.into(),
            topic: topic.into(),
            display_name: display_name.into(),
            handler,
            source,
            instances: RwLock::new((0..concurrency).map(|i| Arc::new(WorkerInstance::new(i))).collect()),
            permits: Arc::new(Semaphore::new(concurrency)),
            slots: Mutex::new(Slots {
                concurrency,
                debt: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    pub fn source(&self) -> Option<&Arc<dyn JobSource>> {
        self.source.as_ref()
    }

    pub fn concurrency(&self) -> usize {
        self.lock_slots().concurrency
    }

    /// Change the concurrency limit at runtime.
    ///
    /// Growing takes effect immediately. Shrinking retires idle slots now
    /// and busy ones as their handlers return; running jobs are never
    /// interrupted.
    pub fn set_concurrency(&self, concurrency: usize) {
        let concurrency = concurrency.max(1);
        let mut slots = self.lock_slots();
        let previous = slots.concurrency;

        if concurrency > previous {
            let mut grow = concurrency - previous;
            let repaid = grow.min(slots.debt);
            slots.debt -= repaid;
            grow -= repaid;
            self.permits.add_permits(grow);

            let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
            while instances.len() < concurrency {
                let index = instances.len();
                instances.push(Arc::new(WorkerInstance::new(index)));
            }
        } else if concurrency < previous {
            let shrink = previous - concurrency;
            let retired = self.permits.forget_permits(shrink);
            slots.debt += shrink - retired;
        }

        slots.concurrency = concurrency;
        tracing::info!(worker = %self.name, previous, concurrency, "Worker concurrency changed");
    }

    /// Wait for a free concurrency slot.
    pub async fn acquire_slot(self: &Arc<Self>) -> Result<SlotPermit, tokio::sync::AcquireError> {
        let permit = Arc::clone(&self.permits).acquire_owned().await?;
        Ok(SlotPermit {
            worker: Arc::clone(self),
            permit: Some(permit),
        })
    }

    /// Claim an idle instance and start it.
    pub fn start_instance(&self) -> (Arc<WorkerInstance>, CancellationToken) {
        {
            let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
            for instance in instances.iter() {
                if let Ok(token) = instance.start() {
                    return (Arc::clone(instance), token);
                }
            }
        }

        // Every instance is busy. Only reachable if a caller bypasses the
        // slot permits; grow the pool rather than fail the job.
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        let instance = Arc::new(WorkerInstance::new(instances.len()));
        instances.push(Arc::clone(&instance));
        tracing::warn!(worker = %self.name, instances = instances.len(), "Instance pool grown past concurrency");
        let token = match instance.start() {
            Ok(token) => token,
            Err(_) => CancellationToken::new(),
        };
        (instance, token)
    }

    /// Cancel every running instance. Returns how many were signalled.
    pub fn cancel(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|i| i.cancel())
            .count()
    }

    pub fn running(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|i| i.is_running())
            .count()
    }

    pub fn is_canceled(&self) -> bool {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|i| i.is_canceled())
    }

    /// Most recent `stop()` across all instances.
    pub fn last_run(&self) -> Option<Timestamp> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|i| i.last_run())
            .max()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Retire `permit` if a shrink is still owed one, otherwise release it.
    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut slots = self.lock_slots();
        if slots.debt > 0 {
            slots.debt -= 1;
            permit.forget();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("concurrency", &self.concurrency())
            .finish_non_exhaustive()
    }
}

/// A held concurrency slot. Dropping it frees (or retires) the slot.
pub struct SlotPermit {
    worker: Arc<Worker>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.worker.release(permit);
        }
    }
}
