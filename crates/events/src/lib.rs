//! Live event delivery: the broker actor, its replay history, and the
//! server-sent-events stream each connected client reads from.

pub mod broker;
pub mod client;
pub mod history;
pub mod stream;

pub use broker::{validate_event_name, BrokerConfig, BrokerError, BrokerRunner, ClientRegistration, EventBroker};
pub use client::{ClientTicket, OutboundEvent};
pub use history::{EventHistory, EventRecord};
pub use stream::{ClientStream, StreamItem, StreamOptions};
