//! The status and error event bus.
//!
//! Every endpoint owns one bus; connectivity changes and recoverable
//! errors are broadcast to all subscribed status queues. Events are not
//! persisted: each subscriber sees the bus as a ring buffer and loses
//! the oldest events if it falls behind.

use std::fmt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::trace;
use weft_data::EndpointId;

/// Default per-subscriber ring capacity.
pub const DEFAULT_STATUS_CAPACITY: usize = 512;

/// Connectivity status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// A peering handshake completed.
    PeerAdded,
    /// A peering was removed on purpose.
    PeerRemoved,
    /// An established peering dropped.
    PeerLost,
    /// A new endpoint identity became reachable.
    EndpointDiscovered,
    /// A previously reachable endpoint went away.
    EndpointUnreachable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::PeerAdded => "peer_added",
            StatusCode::PeerRemoved => "peer_removed",
            StatusCode::PeerLost => "peer_lost",
            StatusCode::EndpointDiscovered => "endpoint_discovered",
            StatusCode::EndpointUnreachable => "endpoint_unreachable",
        };
        write!(f, "{name}")
    }
}

/// Error codes surfaced on the bus and from user-facing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unknown peer address, self-peering, or duplicate unpeer.
    PeerInvalid,
    /// A connection attempt failed.
    PeerUnavailable,
    /// Version or protocol mismatch.
    PeerIncompatible,
    /// Keepalive timeout expired.
    PeerTimeout,
    /// Decode or framing failure.
    InvalidData,
    /// Operation on mismatched value types.
    TypeClash,
    /// A store backend failed (forwarded for collaborator subsystems).
    BackendFailure,
    /// A store lookup missed (forwarded for collaborator subsystems).
    NoSuchKey,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::PeerInvalid => "peer_invalid",
            ErrorCode::PeerUnavailable => "peer_unavailable",
            ErrorCode::PeerIncompatible => "peer_incompatible",
            ErrorCode::PeerTimeout => "peer_timeout",
            ErrorCode::InvalidData => "invalid_data",
            ErrorCode::TypeClash => "type_clash",
            ErrorCode::BackendFailure => "backend_failure",
            ErrorCode::NoSuchKey => "no_such_key",
        };
        write!(f, "{name}")
    }
}

/// Network address of a peer, as dialed or as observed on accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkInfo {
    pub host: String,
    pub port: u16,
}

impl NetworkInfo {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A connectivity status event.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub code: StatusCode,
    /// Remote endpoint identity, when known.
    pub peer: Option<EndpointId>,
    /// Remote network address, when known.
    pub network: Option<NetworkInfo>,
    pub message: String,
}

impl Status {
    #[must_use]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            peer: None,
            network: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: EndpointId) -> Self {
        self.peer = Some(peer);
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: NetworkInfo) -> Self {
        self.network = Some(network);
        self
    }
}

/// A recoverable error event.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
}

/// Anything the bus carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(Status),
    Error(ErrorEvent),
}

impl Event {
    /// The status payload, if this is a status event.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Event::Status(s) => Some(s),
            Event::Error(_) => None,
        }
    }

    /// The error payload, if this is an error event.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorEvent> {
        match self {
            Event::Error(e) => Some(e),
            Event::Status(_) => None,
        }
    }
}

/// Broadcast bus for status and error events.
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<Event>,
}

impl StatusBus {
    /// Create a bus whose subscribers each buffer up to `capacity`
    /// events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit a status event. A bus with no subscribers drops it.
    pub fn emit_status(&self, status: Status) {
        trace!(code = %status.code, "status event");
        let _ = self.tx.send(Event::Status(status));
    }

    /// Emit an error event.
    pub fn emit_error(&self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        trace!(code = %code, message = %message, "error event");
        let _ = self.tx.send(Event::Error(ErrorEvent { code, message }));
    }

    /// Subscribe to the bus. With `include_errors` unset, error events
    /// are filtered out.
    #[must_use]
    pub fn subscribe(&self, include_errors: bool) -> StatusSubscriber {
        StatusSubscriber {
            rx: self.tx.subscribe(),
            include_errors,
        }
    }
}

/// A subscription to the status bus.
pub struct StatusSubscriber {
    rx: broadcast::Receiver<Event>,
    include_errors: bool,
}

impl StatusSubscriber {
    fn admits(&self, event: &Event) -> bool {
        self.include_errors || matches!(event, Event::Status(_))
    }

    /// Receive the next event, skipping filtered ones. Returns `None`
    /// once the bus is gone and all buffered events are drained; lagged
    /// subscribers silently lose the oldest events.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.admits(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive with a deadline. `None` on deadline or closed bus.
    pub async fn recv_deadline(&mut self, deadline: Instant) -> Option<Event> {
        tokio::time::timeout_at(deadline, self.recv()).await.ok()?
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.admits(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
