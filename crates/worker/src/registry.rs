//! Process-wide catalogue of worker roles.
//!
//! Assembled once at startup through [`RegistryBuilder`] and immutable
//! afterwards. The only mutable parts are each worker's concurrency and
//! the per-worker scratch space.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::source::JobSource;
use crate::worker::{JobHandler, Worker};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("worker '{0}' is registered twice")]
    DuplicateName(String),

    #[error("topic '{topic}' is bound to both '{first}' and '{second}'")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },
}

/// Declarative description of a worker role.
pub struct WorkerSpec {
    name: String,
    topic: Option<String>,
    display_name: Option<String>,
    concurrency: usize,
    handler: Arc<dyn JobHandler>,
    source: Option<Arc<dyn JobSource>>,
}

impl WorkerSpec {
    /// A role named `name`, consuming the topic of the same name, one slot.
    pub fn new(name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        Self {
            name: name.into(),
            topic: None,
            display_name: None,
            concurrency: 1,
            handler: Arc::new(handler),
            source: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn source(mut self, source: Arc<dyn JobSource>) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    specs: Vec<WorkerSpec>,
}

impl RegistryBuilder {
    pub fn worker(mut self, spec: WorkerSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Validate names and topics and freeze the registry.
    pub fn build(self) -> Result<JobRegistry, RegistryError> {
        let mut workers = BTreeMap::new();
        let mut by_topic: HashMap<String, String> = HashMap::new();

        for spec in self.specs {
            if workers.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateName(spec.name));
            }
            let topic = spec.topic.unwrap_or_else(|| spec.name.clone());
            if let Some(first) = by_topic.get(&topic) {
                return Err(RegistryError::DuplicateTopic {
                    topic,
                    first: first.clone(),
                    second: spec.name,
                });
            }

            let display_name = spec.display_name.unwrap_or_else(|| spec.name.clone());
            let worker = Worker::new(
                spec.name.clone(),
                topic.clone(),
                display_name,
                spec.concurrency,
                spec.handler,
                spec.source,
            );
            tracing::debug!(worker = %spec.name, topic = %topic, concurrency = worker.concurrency(), "Worker registered");
            by_topic.insert(topic, spec.name.clone());
            workers.insert(spec.name, Arc::new(worker));
        }

        Ok(JobRegistry {
            workers,
            by_topic,
            scratch: Arc::default(),
        })
    }
}

type ScratchMap = HashMap<String, HashMap<String, Value>>;

/// Immutable name → worker lookup plus per-worker scratch space.
#[derive(Debug)]
pub struct JobRegistry {
    workers: BTreeMap<String, Arc<Worker>>,
    by_topic: HashMap<String, String>,
    scratch: Arc<Mutex<ScratchMap>>,
}

impl JobRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Worker>> {
        self.workers.get(name)
    }

    /// The worker role bound to `topic`.
    pub fn for_topic(&self, topic: &str) -> Option<&Arc<Worker>> {
        self.by_topic.get(topic).and_then(|name| self.workers.get(name))
    }

    /// Workers in name order.
    pub fn workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.workers.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Key/value scratch space for one worker, kept for the process lifetime.
    pub fn scratch(&self, worker: &str) -> ScratchSpace {
        ScratchSpace {
            worker: worker.to_string(),
            store: Arc::clone(&self.scratch),
        }
    }
}

/// Handle to one worker's scratch entries.
#[derive(Clone)]
pub struct ScratchSpace {
    worker: String,
    store: Arc<Mutex<ScratchMap>>,
}

impl ScratchSpace {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock()
            .get(&self.worker)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock()
            .entry(self.worker.clone())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock()
            .get_mut(&self.worker)
            .and_then(|entries| entries.remove(key))
    }

    /// Copy of every entry for this worker.
    pub fn entries(&self) -> HashMap<String, Value> {
        self.lock().get(&self.worker).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScratchMap> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::handler_fn;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn noop() -> impl JobHandler {
        handler_fn(|_ctx| async { Ok(()) })
    }

    #[test]
    fn build_resolves_names_and_topics() {
        let registry = JobRegistry::builder()
            .worker(WorkerSpec::new("image_process", noop()).display_name("Thumbnails").concurrency(2))
            .worker(WorkerSpec::new("exif", noop()).topic("exif_process"))
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["exif".to_string(), "image_process".to_string()]);
        assert_eq!(registry.get("image_process").unwrap().concurrency(), 2);
        assert_eq!(registry.get("image_process").unwrap().display_name(), "Thumbnails");
        assert_eq!(registry.for_topic("exif_process").unwrap().name(), "exif");
        assert!(registry.for_topic("exif").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = JobRegistry::builder()
            .worker(WorkerSpec::new("a", noop()))
            .worker(WorkerSpec::new("a", noop()).topic("other"))
            .build();
        assert_matches!(result, Err(RegistryError::DuplicateName(name)) if name == "a");
    }

    #[test]
    fn duplicate_topics_are_rejected() {
        let result = JobRegistry::builder()
            .worker(WorkerSpec::new("a", noop()).topic("t"))
            .worker(WorkerSpec::new("b", noop()).topic("t"))
            .build();
        assert_matches!(result, Err(RegistryError::DuplicateTopic { topic, .. }) if topic == "t");
    }

    #[test]
    fn scratch_space_is_isolated_per_worker() {
        let registry = JobRegistry::builder()
            .worker(WorkerSpec::new("a", noop()))
            .build()
            .unwrap();
        let a = registry.scratch("a");
        let b = registry.scratch("b");

        a.set("cursor", json!(42));
        assert_eq!(registry.scratch("a").get("cursor"), Some(json!(42)));
        assert_eq!(b.get("cursor"), None);
        assert_eq!(a.remove("cursor"), Some(json!(42)));
        assert!(a.entries().is_empty());
    }
}
