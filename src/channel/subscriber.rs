//! Reconnecting subscriber.
//!
//! A `Subscriber` keeps one connection open on a background thread and runs
//! the connection state machine:
//!
//! ```text
//! CONNECTING -> OPEN -> (CLOSING) -> CLOSED
//!      ^                               |
//!      +------ after reconnect_delay --+   (unless the close was NORMAL)
//! ```
//!
//! Events received while OPEN are forwarded to the subscriber's own bounded
//! buffer. Nothing generated while CLOSED or CONNECTING is replayed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, FenceError, FenceResult, TransportError};
use crate::event::GeofenceEvent;

use super::connection::{CloseCode, Transport};

/// How often the connection loop wakes up to check for unsubscribe.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Subscriber settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Fixed delay between an abnormal close and the next connect attempt.
    pub reconnect_delay_ms: u64,
    /// Local event buffer; when full the newest event is dropped.
    pub buffer: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            buffer: 1024,
        }
    }
}

impl SubscriberConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Connection lifecycle state.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    changed: Condvar,
    connects: AtomicU64,
    dropped_events: AtomicU64,
}

impl Shared {
    fn set(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                debug!(from = ?*state, to = ?next, "subscriber state change");
                *state = next;
                self.changed.notify_all();
            }
        }
    }
}

/// A live event subscription with automatic reconnection.
#[derive(Debug)]
pub struct Subscriber {
    shared: Arc<Shared>,
    events_rx: Receiver<GeofenceEvent>,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Starts the background connection loop.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the connection thread.
    #[must_use]
    pub fn connect(transport: Arc<dyn Transport>, cfg: SubscriberConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connecting),
            changed: Condvar::new(),
            connects: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        });
        let (events_tx, events_rx) = bounded::<GeofenceEvent>(cfg.buffer.max(1));
        // Never written to; dropping the sender is the stop signal.
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("fencewatch-subscriber".to_string())
            .spawn(move || connection_loop(&*transport, &cfg, &thread_shared, &events_tx, &stop_rx))
            .expect("failed to spawn fencewatch subscriber");

        Self {
            shared,
            events_rx,
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared
            .state
            .lock()
            .map_or(ConnectionState::Closed, |s| *s)
    }

    /// Blocks until the connection reaches `target` or `timeout` elapses.
    /// Returns whether the state was reached.
    #[must_use]
    pub fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut state) = self.shared.state.lock() else {
            return false;
        };
        while *state != target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => state = guard,
                Err(_) => return false,
            }
        }
        true
    }

    /// Number of successful connects, including the first one.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::Relaxed)
    }

    /// Events dropped because the local buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> FenceResult<GeofenceEvent> {
        self.events_rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => FenceError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => FenceError::Execution(ExecutionError::Disconnected {
                path: "subscriber".to_string(),
            }),
        })
    }

    /// Receive a buffered event without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<GeofenceEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Deliberately closes the subscription with a normal close. The
    /// connection is not re-established. Idempotent.
    pub fn unsubscribe(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected))
}

/// Sleeps for `delay` unless unsubscribe arrives first. Returns true on stop.
fn wait_or_stop(stop_rx: &Receiver<()>, delay: Duration) -> bool {
    matches!(stop_rx.recv_timeout(delay), Err(RecvTimeoutError::Disconnected))
}

fn connection_loop(
    transport: &dyn Transport,
    cfg: &SubscriberConfig,
    shared: &Shared,
    events_tx: &Sender<GeofenceEvent>,
    stop_rx: &Receiver<()>,
) {
    let delay = cfg.reconnect_delay();

    loop {
        if stop_requested(stop_rx) {
            break;
        }
        shared.set(ConnectionState::Connecting);

        let mut conn = match transport.connect() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, delay_ms = cfg.reconnect_delay_ms, "connect failed, retrying");
                shared.set(ConnectionState::Closed);
                if wait_or_stop(stop_rx, delay) {
                    break;
                }
                continue;
            }
        };

        shared.connects.fetch_add(1, Ordering::Relaxed);
        shared.set(ConnectionState::Open);
        info!(connects = shared.connects.load(Ordering::Relaxed), "subscriber connected");

        let close_code = loop {
            if stop_requested(stop_rx) {
                shared.set(ConnectionState::Closing);
                conn.close(CloseCode::NORMAL);
                break CloseCode::NORMAL;
            }
            match conn.recv_timeout(POLL_INTERVAL) {
                Ok(Some(event)) => match events_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        shared.dropped_events.fetch_add(1, Ordering::Relaxed);
                    }
                    // Every receiver is gone; nobody is listening anymore.
                    Err(TrySendError::Disconnected(_)) => {
                        shared.set(ConnectionState::Closing);
                        conn.close(CloseCode::NORMAL);
                        break CloseCode::NORMAL;
                    }
                },
                Ok(None) => {}
                Err(TransportError::Closed { code }) => break CloseCode(code),
                Err(err) => {
                    warn!(error = %err, "connection error");
                    break CloseCode::ABNORMAL;
                }
            }
        };

        shared.set(ConnectionState::Closed);
        if close_code.is_normal() {
            info!("subscription closed normally");
            return;
        }

        warn!(code = %close_code, delay_ms = cfg.reconnect_delay_ms, "connection lost, reconnecting");
        if wait_or_stop(stop_rx, delay) {
            break;
        }
    }

    shared.set(ConnectionState::Closed);
}
