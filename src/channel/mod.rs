//! Event channel.
//!
//! Delivers generated `GeofenceEvent`s to live subscribers. The producer side
//! (`EventPublisher`) never blocks; subscribers reconnect on their own after
//! abnormal closure and only see events generated while they are connected.

/// Transport seam and close codes.
pub mod connection;
/// In-process dispatcher.
pub mod hub;
/// Reconnecting subscriber.
pub mod subscriber;

pub use connection::{CloseCode, Connection, ConnectionId, HubTransport, Transport};
pub use hub::{EventHub, EventPublisher, HubConfig, HubStats};
pub use subscriber::{ConnectionState, Subscriber, SubscriberConfig};
