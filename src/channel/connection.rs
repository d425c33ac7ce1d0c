//! Transport seam between the hub and its subscribers.
//!
//! A `Transport` opens `Connection`s. The in-process `HubTransport` connects
//! straight to an `EventHub`; a network transport would implement the same
//! traits on top of its socket.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use uuid::Uuid;

use crate::error::TransportError;
use crate::event::GeofenceEvent;

use super::hub::ControlMsg;

/// Close status codes, mirroring the WebSocket registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Deliberate close; the subscriber must not reconnect.
    pub const NORMAL: Self = Self(1000);
    /// The server is shutting down.
    pub const GOING_AWAY: Self = Self(1001);
    /// The connection dropped without a close handshake.
    pub const ABNORMAL: Self = Self(1006);

    /// Whether this close was deliberate (no reconnect).
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 == Self::NORMAL.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CloseCode> for TransportError {
    fn from(code: CloseCode) -> Self {
        Self::Closed { code: code.0 }
    }
}

/// Identifier of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames pushed from the hub to a connection.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Event(GeofenceEvent),
    Close(CloseCode),
}

/// Opens connections to an event source.
pub trait Transport: Send + Sync {
    /// Opens a connection. Once this returns, every event published from
    /// that moment on is delivered on the connection.
    fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open connection delivering events.
pub trait Connection: Send {
    /// Waits for the next event. `Ok(None)` means the timeout elapsed;
    /// `Err(Closed { code })` means the connection is gone.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<GeofenceEvent>, TransportError>;

    /// Closes the connection with `code`. Idempotent.
    fn close(&mut self, code: CloseCode);
}

/// In-process transport bound to an `EventHub`.
///
/// Connecting fails once the hub has been dropped, even though the hub's
/// worker may still be running for connections that are winding down.
#[derive(Debug, Clone)]
pub struct HubTransport {
    pub(crate) control_tx: Sender<ControlMsg>,
    pub(crate) next_seq: Arc<AtomicU64>,
    pub(crate) closed: Arc<AtomicBool>,
    pub(crate) buffer: usize,
}

impl Transport for HubTransport {
    fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let disconnected = || TransportError::ConnectionFailed {
            message: "event hub is not running".to_string(),
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(disconnected());
        }

        let id = ConnectionId::new();
        let (tx, rx) = bounded::<Frame>(self.buffer.max(1));
        let (reply_tx, reply_rx) = bounded::<()>(1);

        // Events already sequenced before this point belong to the past.
        let start_seq = self.next_seq.load(Ordering::Acquire);

        self.control_tx
            .send(ControlMsg::Register {
                id,
                start_seq,
                tx,
                reply: reply_tx,
            })
            .map_err(|_| disconnected())?;
        reply_rx.recv().map_err(|_| disconnected())?;

        // Registered after the hub's final CloseAll: nothing will ever close it.
        if self.closed.load(Ordering::Acquire) {
            let _ = self.control_tx.try_send(ControlMsg::Unregister { id });
            return Err(disconnected());
        }

        Ok(Box::new(HubConnection {
            id,
            rx,
            control_tx: self.control_tx.clone(),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct HubConnection {
    id: ConnectionId,
    rx: Receiver<Frame>,
    control_tx: Sender<ControlMsg>,
    closed: bool,
}

impl Connection for HubConnection {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<GeofenceEvent>, TransportError> {
        if self.closed {
            return Err(CloseCode::NORMAL.into());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(Frame::Event(event)) => Ok(Some(event)),
            Ok(Frame::Close(code)) => {
                self.closed = true;
                Err(code.into())
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Err(CloseCode::ABNORMAL.into())
            }
        }
    }

    fn close(&mut self, _code: CloseCode) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Best-effort: never block the caller on a busy hub.
        let _ = self.control_tx.try_send(ControlMsg::Unregister { id: self.id });
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.close(CloseCode::NORMAL);
    }
}
