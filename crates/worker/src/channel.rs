//! In-process, topic-keyed message channel.
//!
//! Each topic is a bounded FIFO queue created on first use. Every
//! subscription to a topic shares the same receiver, so subscribers compete
//! for messages: one topic is one logical consumer group. Publishing never
//! waits longer than the configured publish timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::message::JobMessage;

/// Default number of messages buffered per topic.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Default upper bound on how long `publish` waits for buffer space.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub topic_capacity: usize,
    /// Zero means fail immediately when the topic is full.
    pub publish_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The topic buffer stayed saturated for the whole publish timeout.
    #[error("topic '{0}' is full")]
    Full(String),

    #[error("message channel is closed")]
    Closed,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<JobMessage>>>;

struct Topic {
    /// `None` once the channel is closed.
    sender: Option<mpsc::Sender<JobMessage>>,
    receiver: SharedReceiver,
    /// Messages accepted and not yet received. Survives `close`.
    queued: Arc<AtomicUsize>,
}

struct Inner {
    config: ChannelConfig,
    topics: Mutex<HashMap<String, Topic>>,
    closed: Mutex<bool>,
}

/// Cloneable handle to the channel.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<Inner>,
}

impl MessageChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: Mutex::new(HashMap::new()),
                closed: Mutex::new(false),
            }),
        }
    }

    pub fn config(&self) -> ChannelConfig {
        self.inner.config
    }

    /// Queue `message` on its topic.
    ///
    /// Waits at most `publish_timeout` for space, then fails with
    /// [`ChannelError::Full`]. Already queued messages are never affected.
    pub async fn publish(&self, message: JobMessage) -> Result<(), ChannelError> {
        let (sender, queued) = self.sender(&message.topic)?;
        let topic = message.topic.clone();
        let timeout = self.inner.config.publish_timeout;

        // Counted before sending so a fast receiver never sees it below zero.
        queued.fetch_add(1, Ordering::SeqCst);

        let result = if timeout.is_zero() {
            sender.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::Full(topic.clone()),
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })
        } else {
            sender.send_timeout(message, timeout).await.map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => ChannelError::Full(topic.clone()),
                mpsc::error::SendTimeoutError::Closed(_) => ChannelError::Closed,
            })
        };

        if let Err(e) = &result {
            queued.fetch_sub(1, Ordering::SeqCst);
            if let ChannelError::Full(_) = e {
                tracing::warn!(topic = %topic, "Topic buffer saturated, publish rejected");
            }
        }
        result
    }

    /// Subscribe to `topic`, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.lock_topics();
        let entry = self.entry(&mut topics, topic);
        Subscription {
            topic: topic.to_string(),
            receiver: Arc::clone(&entry.receiver),
            queued: Arc::clone(&entry.queued),
        }
    }

    /// Stop accepting publishes. Subscribers drain what is queued, then end.
    pub fn close(&self) {
        *self.inner.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        let mut topics = self.lock_topics();
        for topic in topics.values_mut() {
            topic.sender = None;
        }
        tracing::info!(topics = topics.len(), "Message channel closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sorted names of every topic created so far.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_topics().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of messages waiting on `topic`, including after `close`.
    pub fn pending(&self, topic: &str) -> usize {
        self.lock_topics()
            .get(topic)
            .map(|t| t.queued.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> Result<(mpsc::Sender<JobMessage>, Arc<AtomicUsize>), ChannelError> {
        let mut topics = self.lock_topics();
        let entry = self.entry(&mut topics, topic);
        let sender = entry.sender.clone().ok_or(ChannelError::Closed)?;
        Ok((sender, Arc::clone(&entry.queued)))
    }

    fn entry<'a>(&self, topics: &'a mut HashMap<String, Topic>, topic: &str) -> &'a Topic {
        let capacity = self.inner.config.topic_capacity.max(1);
        let closed = self.is_closed();
        topics.entry(topic.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(capacity);
            tracing::debug!(topic, capacity, "Topic created");
            Topic {
                sender: (!closed).then_some(sender),
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                queued: Arc::new(AtomicUsize::new(0)),
            }
        })
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        self.inner.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

/// Consumer side of one topic. Clones compete for the same messages.
#[derive(Clone)]
pub struct Subscription {
    topic: String,
    receiver: SharedReceiver,
    queued: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message in FIFO order, or `None` once the channel is closed
    /// and drained.
    pub async fn recv(&self) -> Option<JobMessage> {
        let message = self.receiver.lock().await.recv().await;
        self.taken(message)
    }

    /// A message that is already queued, without waiting. `None` when the
    /// topic is empty or another subscriber is mid-receive.
    pub fn try_recv(&self) -> Option<JobMessage> {
        let message = self.receiver.try_lock().ok()?.try_recv().ok();
        self.taken(message)
    }

    fn taken(&self, message: Option<JobMessage>) -> Option<JobMessage> {
        if message.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }
}
