//! Event hub dispatcher.
//!
//! The hub owns the set of open connections and fans every published event
//! out to them from a dedicated worker thread. Publishing uses a bounded
//! queue and `try_send`, so the geofence pipeline never waits on delivery:
//! when a queue is full the newest event is dropped and counted.
//!
//! Every published event gets a sequence number. A connection only receives
//! events sequenced at or after the moment it connected, so nothing generated
//! during an outage is replayed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::event::GeofenceEvent;

use super::connection::{CloseCode, ConnectionId, Frame, HubTransport};

/// Hub queue sizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Max queued published events before new ones are dropped.
    pub publish_queue_capacity: usize,
    /// Max queued control messages (connect/disconnect).
    pub control_queue_capacity: usize,
    /// Per-connection frame buffer.
    pub connection_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            publish_queue_capacity: 4096,
            control_queue_capacity: 1024,
            connection_buffer: 1024,
        }
    }
}

/// Non-blocking sink for generated events.
pub trait EventPublisher: Send + Sync {
    /// Hands an event to the delivery layer. Never blocks and never fails;
    /// undeliverable events are dropped.
    fn publish(&self, event: GeofenceEvent);
}

/// Delivery counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub published: u64,
    pub dropped_at_publish: u64,
    pub dropped_at_connection: u64,
    pub open_connections: usize,
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Register {
        id: ConnectionId,
        start_seq: u64,
        tx: Sender<Frame>,
        reply: Sender<()>,
    },
    Unregister {
        id: ConnectionId,
    },
    CloseAll {
        code: CloseCode,
    },
}

#[derive(Debug)]
struct PublishMsg {
    seq: u64,
    event: GeofenceEvent,
}

#[derive(Debug)]
struct ConnectionEntry {
    start_seq: u64,
    tx: Sender<Frame>,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped_at_publish: AtomicU64,
    dropped_at_connection: AtomicU64,
    open_connections: AtomicUsize,
}

/// In-process event hub with a dedicated dispatch thread.
#[derive(Debug)]
pub struct EventHub {
    cfg: HubConfig,
    control_tx: Sender<ControlMsg>,
    publish_tx: Sender<PublishMsg>,
    next_seq: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    counters: Arc<Counters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl EventHub {
    /// Starts the hub and its dispatch thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the dispatch thread.
    #[must_use]
    pub fn new(cfg: HubConfig) -> Self {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));
        let (publish_tx, publish_rx) = bounded::<PublishMsg>(cfg.publish_queue_capacity.max(1));

        let counters = Arc::new(Counters::default());
        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("fencewatch-hub".to_string())
            .spawn(move || worker_loop(&thread_counters, &control_rx, &publish_rx))
            .expect("failed to spawn fencewatch hub worker");

        Self {
            cfg,
            control_tx,
            publish_tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            counters,
            join: Mutex::new(Some(join)),
        }
    }

    /// Transport that opens connections to this hub.
    #[must_use]
    pub fn transport(&self) -> HubTransport {
        HubTransport {
            control_tx: self.control_tx.clone(),
            next_seq: Arc::clone(&self.next_seq),
            closed: Arc::clone(&self.closed),
            buffer: self.cfg.connection_buffer,
        }
    }

    /// Closes every open connection with `code`.
    ///
    /// Subscribers reconnect unless `code` is `CloseCode::NORMAL`.
    pub fn close_all(&self, code: CloseCode) {
        if self.control_tx.try_send(ControlMsg::CloseAll { code }).is_err() {
            warn!(%code, "hub control queue unavailable, close_all dropped");
        }
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped_at_publish: self.counters.dropped_at_publish.load(Ordering::Relaxed),
            dropped_at_connection: self.counters.dropped_at_connection.load(Ordering::Relaxed),
            open_connections: self.counters.open_connections.load(Ordering::Relaxed),
        }
    }
}

impl EventPublisher for EventHub {
    fn publish(&self, event: GeofenceEvent) {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        match self.publish_tx.try_send(PublishMsg { seq, event }) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(msg) | TrySendError::Disconnected(msg)) => {
                self.counters.dropped_at_publish.fetch_add(1, Ordering::Relaxed);
                warn!(
                    device_id = %msg.event.device_id,
                    geofence_id = %msg.event.geofence_id,
                    "event dropped: hub publish queue unavailable"
                );
            }
        }
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        // Set before the final CloseAll so no transport can register past it.
        self.closed.store(true, Ordering::Release);
        let _ = self.control_tx.try_send(ControlMsg::CloseAll {
            code: CloseCode::GOING_AWAY,
        });

        // Close our senders so the worker can terminate once transports are gone.
        let (dummy_control_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_control_tx));
        let (dummy_publish_tx, _) = bounded::<PublishMsg>(1);
        drop(std::mem::replace(&mut self.publish_tx, dummy_publish_tx));

        if let Ok(mut guard) = self.join.lock() {
            // Detach: live transports and connections hold control senders,
            // joining here could deadlock. The worker exits once they drop.
            drop(guard.take());
        }
    }
}

fn worker_loop(counters: &Counters, control_rx: &Receiver<ControlMsg>, publish_rx: &Receiver<PublishMsg>) {
    let mut connections: HashMap<ConnectionId, ConnectionEntry> = HashMap::new();

    let mut control_closed = false;
    let mut publish_closed = false;

    let sync_count = |connections: &HashMap<ConnectionId, ConnectionEntry>| {
        counters.open_connections.store(connections.len(), Ordering::Relaxed);
    };

    while !(control_closed && publish_closed) {
        select! {
            recv(if control_closed { crossbeam_channel::never() } else { control_rx.clone() }) -> msg => {
                match msg {
                    Ok(ControlMsg::Register { id, start_seq, tx, reply }) => {
                        connections.insert(id, ConnectionEntry { start_seq, tx });
                        sync_count(&connections);
                        debug!(connections = connections.len(), "connection opened");
                        let _ = reply.send(());
                    }
                    Ok(ControlMsg::Unregister { id }) => {
                        connections.remove(&id);
                        sync_count(&connections);
                        debug!(connections = connections.len(), "connection closed");
                    }
                    Ok(ControlMsg::CloseAll { code }) => {
                        info!(%code, connections = connections.len(), "closing all connections");
                        for (_, conn) in connections.drain() {
                            // Dropping the sender also signals the close if the buffer is full.
                            let _ = conn.tx.try_send(Frame::Close(code));
                        }
                        sync_count(&connections);
                    }
                    Err(_) => control_closed = true,
                }
            }
            recv(if publish_closed { crossbeam_channel::never() } else { publish_rx.clone() }) -> msg => {
                match msg {
                    Ok(PublishMsg { seq, event }) => {
                        let mut gone = Vec::new();
                        for (id, conn) in &connections {
                            if seq < conn.start_seq {
                                continue;
                            }
                            match conn.tx.try_send(Frame::Event(event.clone())) {
                                Ok(()) => {}
                                // Never block the hub on a slow subscriber.
                                Err(TrySendError::Full(_)) => {
                                    counters.dropped_at_connection.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(TrySendError::Disconnected(_)) => gone.push(*id),
                            }
                        }
                        if !gone.is_empty() {
                            for id in gone {
                                connections.remove(&id);
                            }
                            sync_count(&connections);
                        }
                    }
                    Err(_) => publish_closed = true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::Utc;

    use crate::channel::connection::Transport;
    use crate::error::TransportError;
    use crate::event::EventType;
    use crate::geometry::LatLng;

    fn event(device: &str) -> GeofenceEvent {
        GeofenceEvent::new(
            "g".into(),
            device.into(),
            EventType::Entry,
            LatLng::new(0.0, 0.0),
            Utc::now(),
        )
    }

    #[test]
    fn connection_receives_events_after_connect_only() {
        let hub = EventHub::default();
        hub.publish(event("before"));

        let mut conn = hub.transport().connect().unwrap();
        hub.publish(event("after"));

        let ev = conn.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(ev.device_id.as_str(), "after");
        assert!(conn.recv_timeout(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn close_all_reports_code_to_connections() {
        let hub = EventHub::default();
        let mut conn = hub.transport().connect().unwrap();
        hub.close_all(CloseCode::ABNORMAL);
        assert_eq!(
            conn.recv_timeout(Duration::from_secs(1)).unwrap_err(),
            TransportError::Closed { code: 1006 }
        );
    }

    #[test]
    fn slow_connection_drops_newest_without_blocking() {
        let hub = EventHub::new(HubConfig {
            connection_buffer: 2,
            ..HubConfig::default()
        });
        let mut conn = hub.transport().connect().unwrap();
        for i in 0..5 {
            hub.publish(event(&format!("d{i}")));
        }

        // Dispatch is asynchronous; wait for the drops before draining.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while hub.stats().dropped_at_connection < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hub.stats().dropped_at_connection, 3);
        assert_eq!(hub.stats().published, 5);

        let first = conn.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        let second = conn.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(first.device_id.as_str(), "d0");
        assert_eq!(second.device_id.as_str(), "d1");
        assert!(conn.recv_timeout(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn transports_outliving_the_hub_cannot_connect() {
        let hub = EventHub::default();
        let transport = hub.transport();
        let mut conn = transport.connect().unwrap();
        drop(hub);

        assert_eq!(
            conn.recv_timeout(Duration::from_secs(1)).unwrap_err(),
            TransportError::Closed { code: 1001 }
        );
        assert!(matches!(
            transport.connect(),
            Err(TransportError::ConnectionFailed { .. })
        ));
    }

    #[test]
    fn closed_connection_is_unregistered() {
        let hub = EventHub::default();
        let mut conn = hub.transport().connect().unwrap();
        assert_eq!(hub.stats().open_connections, 1);
        conn.close(CloseCode::NORMAL);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while hub.stats().open_connections > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hub.stats().open_connections, 0);
    }
}
