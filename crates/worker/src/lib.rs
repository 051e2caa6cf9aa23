//! Background job processing: topic channel, worker roles and their
//! execution harness, run persistence, progress events, and cron triggers.

pub mod channel;
pub mod enqueue;
pub mod error;
pub mod harness;
pub mod message;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod store;
pub mod transform;
pub mod worker;
pub mod workers;

pub use channel::{ChannelConfig, ChannelError, MessageChannel, Subscription};
pub use enqueue::{EnqueueError, Enqueuer};
pub use error::JobError;
pub use harness::{RunOutcome, WorkerHarness, SHUTDOWN_KIND};
pub use message::{JobMessage, JobSubject};
pub use progress::ProgressReporter;
pub use registry::{JobRegistry, RegistryBuilder, RegistryError, ScratchSpace, WorkerSpec};
pub use scheduler::{CronJob, ScheduleError, Scheduler};
pub use source::{JobCommand, JobSource, SourceError};
pub use store::{JobRunStore, MemoryJobRunStore, PgJobRunStore, StoreError};
pub use worker::{handler_fn, JobContext, JobHandler, LifecycleError, Worker, WorkerInstance};
