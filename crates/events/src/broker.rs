//! Actor-style hub that pushes events to connected streaming clients.
//!
//! [`EventBroker`] is a cheap, cloneable handle. All mutation of the client
//! registry happens on the single task running [`BrokerRunner::run`]; the
//! handle only talks to it through three channels (register, unregister,
//! broadcast). A slow client can never stall delivery to the others: every
//! per-client push is a non-blocking `try_send`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientTicket, Delivery, OutboundEvent, SseClient, DEFAULT_CLIENT_CAPACITY};
use crate::history::{EventHistory, EventRecord, DEFAULT_HISTORY_CAPACITY};

/// Default capacity of the broker's inbound broadcast buffer.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 100;

/// Buffer sizes for the broker and its clients.
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Inbound broadcast / send-to-client buffer.
    pub broadcast_capacity: usize,
    /// Outbound queue per client.
    pub client_capacity: usize,
    /// Replay history size.
    pub history_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            client_capacity: DEFAULT_CLIENT_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Errors returned to broker callers. All are admission failures; nothing
/// already accepted is ever lost because of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The inbound buffer is saturated. Try again later.
    #[error("broadcast channel full")]
    ChannelFull,

    /// The dispatch task has stopped.
    #[error("event broker is closed")]
    Closed,

    /// The name would not fit on a single `event:` line.
    #[error("event name must not contain line breaks: {0:?}")]
    InvalidEventName(String),
}

/// Check that `name` can be written as one SSE `event:` field.
pub fn validate_event_name(name: &str) -> Result<(), BrokerError> {
    if name.contains(['\r', '\n']) {
        return Err(BrokerError::InvalidEventName(name.to_string()));
    }
    Ok(())
}

/// A message waiting to be dispatched.
#[derive(Debug)]
struct BrokerMessage {
    event: String,
    data: serde_json::Value,
    /// `None` fans out to every client.
    target: Option<String>,
}

struct Registration {
    client: SseClient,
    ack: oneshot::Sender<()>,
}

/// Receiving half of a freshly registered client.
#[derive(Debug)]
pub struct ClientRegistration {
    pub ticket: ClientTicket,
    pub receiver: mpsc::Receiver<OutboundEvent>,
}

/// Cloneable handle to the broker.
#[derive(Clone)]
pub struct EventBroker {
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ClientTicket>,
    broadcast_tx: mpsc::Sender<BrokerMessage>,
    clients: watch::Receiver<Vec<String>>,
    history: Arc<EventHistory>,
    next_key: Arc<AtomicU64>,
    client_capacity: usize,
}

/// The dispatch loop. Owns the registry; consumed by [`BrokerRunner::run`].
pub struct BrokerRunner {
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ClientTicket>,
    broadcast_rx: mpsc::Receiver<BrokerMessage>,
    clients: HashMap<String, SseClient>,
    snapshot: watch::Sender<Vec<String>>,
    history: Arc<EventHistory>,
}

impl EventBroker {
    /// Build a handle and its (not yet running) dispatch loop.
    pub fn new(config: BrokerConfig) -> (Self, BrokerRunner) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let (snapshot, clients) = watch::channel(Vec::new());
        let history = Arc::new(EventHistory::new(config.history_capacity));

        let broker = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            clients,
            history: Arc::clone(&history),
            next_key: Arc::new(AtomicU64::new(1)),
            client_capacity: config.client_capacity,
        };
        let runner = BrokerRunner {
            register_rx,
            unregister_rx,
            broadcast_rx,
            clients: HashMap::new(),
            snapshot,
            history,
        };
        (broker, runner)
    }

    /// Build a broker and spawn its dispatch loop on the current runtime.
    pub fn spawn(config: BrokerConfig, cancel: CancellationToken) -> (Self, tokio::task::JoinHandle<()>) {
        let (broker, runner) = Self::new(config);
        let handle = tokio::spawn(runner.run(cancel));
        (broker, handle)
    }

    /// Register a client and wait until the dispatch loop has recorded it.
    ///
    /// A duplicate id replaces the earlier registration; the earlier
    /// client's queue is closed.
    pub async fn register(&self, client_id: impl Into<String>) -> Result<ClientRegistration, BrokerError> {
        let ticket = ClientTicket {
            id: client_id.into(),
            key: self.next_key.fetch_add(1, Ordering::Relaxed),
        };
        let (client, receiver) = SseClient::new(ticket.clone(), self.client_capacity);
        let (ack, acked) = oneshot::channel();

        self.register_tx
            .send(Registration { client, ack })
            .map_err(|_| BrokerError::Closed)?;
        acked.await.map_err(|_| BrokerError::Closed)?;

        Ok(ClientRegistration { ticket, receiver })
    }

    /// Remove a client and close its queue. Never blocks; unknown or
    /// already-removed tickets are ignored by the dispatch loop.
    pub fn unregister(&self, ticket: &ClientTicket) {
        // A send error only means the loop is gone, which already dropped
        // every client.
        let _ = self.unregister_tx.send(ticket.clone());
    }

    /// Queue an event for every connected client and for the history.
    pub fn broadcast(&self, event: impl Into<String>, data: serde_json::Value) -> Result<(), BrokerError> {
        let event = event.into();
        validate_event_name(&event)?;
        self.enqueue(BrokerMessage {
            event,
            data,
            target: None,
        })
    }

    /// Queue an event for a single client.
    ///
    /// An unknown client id is not an error here; the dispatch loop drops the
    /// message if the client is absent when it gets there.
    pub fn send_to_client(
        &self,
        client_id: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let event = event.into();
        validate_event_name(&event)?;
        self.enqueue(BrokerMessage {
            event,
            data,
            target: Some(client_id.into()),
        })
    }

    fn enqueue(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        self.broadcast_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => BrokerError::Closed,
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.borrow().len()
    }

    /// Sorted ids of the currently registered clients.
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.borrow().clone()
    }

    /// Subscribe to registry snapshots, published after every change.
    pub fn watch_clients(&self) -> watch::Receiver<Vec<String>> {
        self.clients.clone()
    }

    /// The most recent `limit` broadcast events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<EventRecord> {
        self.history.recent(limit)
    }

    pub fn event_history(&self) -> &EventHistory {
        &self.history
    }
}

impl BrokerRunner {
    /// Dispatch until cancelled or until every handle has been dropped.
    ///
    /// On exit every client queue is closed, which ends their streams.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Event broker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Event broker cancelled");
                    break;
                }
                Some(registration) = self.register_rx.recv() => {
                    self.add(registration);
                }
                Some(ticket) = self.unregister_rx.recv() => {
                    self.remove(&ticket);
                }
                Some(message) = self.broadcast_rx.recv() => {
                    self.dispatch(message);
                }
                else => {
                    tracing::info!("Event broker handles dropped, shutting down");
                    break;
                }
            }
        }

        let count = self.clients.len();
        self.clients.clear();
        self.publish_snapshot();
        tracing::info!(count, "Event broker closed all client streams");
    }

    fn add(&mut self, registration: Registration) {
        let Registration { client, ack } = registration;
        let id = client.ticket.id.clone();

        if let Some(previous) = self.clients.insert(id.clone(), client) {
            tracing::warn!(
                client_id = %id,
                previous_connected_at = %previous.connected_at,
                "Duplicate client id, replacing previous registration"
            );
        } else {
            tracing::debug!(client_id = %id, "Client registered");
        }

        self.publish_snapshot();
        let _ = ack.send(());
    }

    fn remove(&mut self, ticket: &ClientTicket) {
        let matches = self
            .clients
            .get(&ticket.id)
            .is_some_and(|c| c.ticket.key == ticket.key);
        if !matches {
            return;
        }

        // Dropping the client drops its sender, closing the queue.
        if let Some(client) = self.clients.remove(&ticket.id) {
            let connected_secs = (chrono::Utc::now() - client.connected_at).num_seconds();
            tracing::debug!(client_id = %ticket.id, connected_secs, "Client unregistered");
        }
        self.publish_snapshot();
    }

    fn dispatch(&mut self, message: BrokerMessage) {
        let BrokerMessage { event, data, target } = message;

        match target {
            Some(client_id) => {
                let Some(client) = self.clients.get(&client_id) else {
                    tracing::debug!(client_id = %client_id, event = %event, "Target client not connected, dropping");
                    return;
                };
                let delivery = client.offer(OutboundEvent {
                    event: event.clone(),
                    data,
                });
                log_delivery(&client_id, &event, delivery);
            }
            None => {
                for (client_id, client) in &self.clients {
                    let delivery = client.offer(OutboundEvent {
                        event: event.clone(),
                        data: data.clone(),
                    });
                    log_delivery(client_id, &event, delivery);
                }
                self.history.push(EventRecord::new(event, data));
            }
        }
    }

    fn publish_snapshot(&self) {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        self.snapshot.send_replace(ids);
    }
}

fn log_delivery(client_id: &str, event: &str, delivery: Delivery) {
    match delivery {
        Delivery::Queued => {}
        Delivery::Dropped => {
            tracing::debug!(client_id, event, "Client queue full, dropping event");
        }
        Delivery::Disconnected => {
            tracing::trace!(client_id, event, "Client disconnected before dispatch");
        }
    }
}
