//! Per-connection event stream.
//!
//! [`ClientStream`] registers with the broker, yields the `connected` event
//! and the reconnection hint, then forwards broker events until the
//! connection ends. [`ClientStream::into_sse`] wraps it in an axum
//! [`Sse`] response with a `ping` keep-alive. Dropping the stream (or the
//! stream ending for any other reason) unregisters the client exactly once.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use lumen_core::job_events::{EVENT_CONNECTED, EVENT_PING};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, EventBroker};
use crate::client::{ClientTicket, OutboundEvent};

/// Default keep-alive period.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

/// Default client reconnection hint, in milliseconds.
pub const DEFAULT_RETRY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub heartbeat: Duration,
    pub retry_ms: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            retry_ms: DEFAULT_RETRY_MS,
        }
    }
}

/// Something to write to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(OutboundEvent),
    /// `retry:` directive.
    Retry(Duration),
}

impl StreamItem {
    /// Render as an SSE event. `None` if the payload cannot be serialized.
    pub fn into_sse_event(self) -> Option<Event> {
        match self {
            StreamItem::Event(OutboundEvent { event, data }) => {
                match Event::default().event(&event).json_data(&data) {
                    Ok(sse_event) => Some(sse_event),
                    Err(e) => {
                        tracing::warn!(event = %event, error = %e, "Failed to serialize event");
                        None
                    }
                }
            }
            StreamItem::Retry(delay) => Some(Event::default().retry(delay)),
        }
    }
}

/// Unregisters its ticket on drop unless already released.
struct UnregisterGuard {
    broker: EventBroker,
    ticket: Option<ClientTicket>,
}

impl UnregisterGuard {
    fn release(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            tracing::debug!(client_id = %ticket.id, "Event stream closed");
            self.broker.unregister(&ticket);
        }
    }
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A registered client connection.
pub struct ClientStream {
    client_id: String,
    receiver: mpsc::Receiver<OutboundEvent>,
    pending: VecDeque<StreamItem>,
    heartbeat: Duration,
    cancel: CancellationToken,
    guard: UnregisterGuard,
    finished: bool,
}

impl ClientStream {
    /// Register `client_id` with the broker and queue the opening items.
    pub async fn connect(
        broker: &EventBroker,
        client_id: impl Into<String>,
        options: StreamOptions,
        cancel: CancellationToken,
    ) -> Result<Self, BrokerError> {
        let client_id = client_id.into();
        let registration = broker.register(client_id.clone()).await?;

        let connected = OutboundEvent {
            event: EVENT_CONNECTED.to_string(),
            data: serde_json::json!({
                "clientId": client_id,
                "message": "Connected to event stream",
            }),
        };
        let pending = VecDeque::from([
            StreamItem::Event(connected),
            StreamItem::Retry(Duration::from_millis(options.retry_ms)),
        ]);

        tracing::debug!(client_id = %client_id, "Event stream opened");

        Ok(Self {
            client_id,
            receiver: registration.receiver,
            pending,
            heartbeat: options.heartbeat.max(Duration::from_millis(1)),
            cancel,
            guard: UnregisterGuard {
                broker: broker.clone(),
                ticket: Some(registration.ticket),
            },
            finished: false,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Next item to write, or `None` once the connection should close.
    ///
    /// Ends on cancellation or when the broker closes the client queue
    /// (unregistered, replaced by a duplicate id, or broker shutdown).
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }
        if self.finished {
            return None;
        }

        let event = tokio::select! {
            _ = self.cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        };

        if event.is_none() {
            self.finished = true;
            self.guard.release();
        }
        event.map(StreamItem::Event)
    }

    /// Adapt into an SSE response body. Idle connections get a `ping`
    /// event (`{}`) once per heartbeat period. The guard travels with the
    /// stream, so dropping the response unregisters the client.
    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let keep_alive = KeepAlive::new()
            .interval(self.heartbeat)
            .event(Event::default().event(EVENT_PING).data("{}"));

        let events = futures::stream::unfold(self, |mut stream| async move {
            stream.next_item().await.map(|item| (item, stream))
        })
        .filter_map(|item| async move { item.into_sse_event().map(Ok) });

        Sse::new(events).keep_alive(keep_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;

    #[tokio::test]
    async fn opening_items_precede_everything_else() {
        let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
        let mut stream = ClientStream::connect(&broker, "c1", StreamOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        let Some(StreamItem::Event(connected)) = stream.next_item().await else {
            panic!("expected the connected event first");
        };
        assert_eq!(connected.event, "connected");
        assert_eq!(connected.data["clientId"], "c1");

        assert_eq!(
            stream.next_item().await,
            Some(StreamItem::Retry(Duration::from_millis(10_000)))
        );
    }

    #[tokio::test]
    async fn cancellation_ends_stream_and_unregisters() {
        let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
        let cancel = CancellationToken::new();
        let mut stream = ClientStream::connect(&broker, "c1", StreamOptions::default(), cancel.clone())
            .await
            .unwrap();
        assert_eq!(broker.client_count(), 1);

        stream.next_item().await;
        stream.next_item().await;
        cancel.cancel();
        assert!(stream.next_item().await.is_none());
        assert!(stream.next_item().await.is_none());

        let mut clients = broker.watch_clients();
        clients.wait_for(|ids| ids.is_empty()).await.unwrap();
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn retry_item_renders_as_sse_event() {
        assert!(StreamItem::Retry(Duration::from_secs(10)).into_sse_event().is_some());
        let item = StreamItem::Event(OutboundEvent {
            event: "job-started".into(),
            data: serde_json::json!({"jobId": "j1"}),
        });
        assert!(item.into_sse_event().is_some());
    }
}
