//! Shared fixtures for worker integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lumen_db::models::job_run::JobRun;
use lumen_events::{BrokerConfig, ClientRegistration, EventBroker};
use lumen_worker::{
    ChannelConfig, Enqueuer, JobRegistry, JobRunStore, MemoryJobRunStore, MessageChannel, RegistryBuilder,
    WorkerHarness,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A running harness wired to an in-memory store and a live broker, plus
/// one registered observer client that records every event.
pub struct Fixture {
    pub broker: EventBroker,
    pub observer: ClientRegistration,
    pub channel: MessageChannel,
    pub store: Arc<MemoryJobRunStore>,
    pub registry: Arc<JobRegistry>,
    pub enqueuer: Enqueuer,
    pub harness: WorkerHarness,
    /// Harness token. Cancelling it stops intake immediately.
    pub cancel: CancellationToken,
    broker_cancel: CancellationToken,
    pub handle: tokio::task::JoinHandle<()>,
}

impl Fixture {
    pub async fn start(builder: RegistryBuilder) -> Self {
        let cancel = CancellationToken::new();
        let broker_cancel = CancellationToken::new();
        let (broker, _broker_handle) = EventBroker::spawn(
            BrokerConfig {
                client_capacity: 256,
                ..Default::default()
            },
            broker_cancel.clone(),
        );
        let observer = broker.register("observer").await.unwrap();

        let registry = Arc::new(builder.build().unwrap());
        let channel = MessageChannel::new(ChannelConfig::default());
        let store = Arc::new(MemoryJobRunStore::new());
        let enqueuer = Enqueuer::new(channel.clone(), store.clone(), Arc::clone(&registry));
        let harness = WorkerHarness::new(Arc::clone(&registry), channel.clone(), store.clone(), broker.clone());
        let handle = harness.clone().spawn(cancel.clone());

        Self {
            broker,
            observer,
            channel,
            store,
            registry,
            enqueuer,
            harness,
            cancel,
            broker_cancel,
            handle,
        }
    }

    /// Next event seen by the observer, as `(name, data)`.
    pub async fn next_event(&mut self) -> (String, Value) {
        let event = tokio::time::timeout(Duration::from_secs(10), self.observer.receiver.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("observer queue closed");
        (event.event, event.data)
    }

    /// Events for `job_id` up to and including its terminal event.
    pub async fn events_for(&mut self, job_id: &str) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        loop {
            let (name, data) = self.next_event().await;
            if data["jobId"] != job_id {
                continue;
            }
            let terminal = name == "job-completed" || name == "job-failed";
            events.push((name, data));
            if terminal {
                return events;
            }
        }
    }

    /// Poll until the run is terminal in the store.
    pub async fn finished_run(&self, job_id: &str) -> JobRun {
        for _ in 0..200 {
            if let Some(run) = self.store.find(job_id).await.unwrap() {
                if run.completed_at.is_some() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }

    /// Poll until every instance of `worker` has stopped.
    pub async fn wait_idle(&self, worker: &str) {
        let worker = self.registry.get(worker).expect("unknown worker");
        for _ in 0..200 {
            if worker.running() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker {} never went idle", worker.name());
    }

    /// Close the channel, let the harness drain it, then stop the broker.
    pub async fn shutdown(self) {
        self.channel.close();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("harness did not drain")
            .unwrap();
        self.cancel.cancel();
        self.broker_cancel.cancel();
    }
}
