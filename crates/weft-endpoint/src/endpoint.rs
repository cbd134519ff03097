//! The endpoint: public API surface and serializer task.
//!
//! All routing and peer state is owned by a single actor task. Public
//! methods post commands onto a bounded channel and, where a result is
//! needed, await a oneshot reply. That gives every endpoint a serial
//! order over state mutations without user-visible locks: a filter
//! change enqueued before a publish is applied before that publish is
//! dispatched.

use crate::config::EndpointConfig;
use crate::session::{self, DownCause, SessionContext, SessionCtl, CTL_CHANNEL_DEPTH};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weft_core::{
    queue, ErrorCode, Forward, Message, NetworkInfo, RoutingTable, Status, StatusBus, StatusCode,
    StatusSubscriber, SubscriberQueue, SubscriptionId, WakeHandle,
};
use weft_data::{EndpointId, Filter, Topic, Value};
use weft_protocol::Reason;

/// Depth of the endpoint's command channel.
const COMMAND_CHANNEL_DEPTH: usize = 512;

/// Errors returned from endpoint operations.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Unknown peer address, self-peering, or duplicate unpeer.
    #[error("invalid peer: {0}")]
    PeerInvalid(String),

    /// The peer could not be reached.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    /// Protocol or version mismatch.
    #[error("incompatible peer: {0}")]
    PeerIncompatible(String),

    /// The peer stopped answering keepalives.
    #[error("peer timed out")]
    PeerTimeout,

    /// Malformed frames or payloads.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The endpoint has shut down.
    #[error("endpoint is shut down")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lifecycle of a peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Initialized,
    Connecting,
    Reconnecting,
    Peered,
    Disconnected,
    /// Inbound session whose HELLO has not arrived yet.
    Unknown,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerStatus::Initialized => "initialized",
            PeerStatus::Connecting => "connecting",
            PeerStatus::Reconnecting => "reconnecting",
            PeerStatus::Peered => "peered",
            PeerStatus::Disconnected => "disconnected",
            PeerStatus::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A peer as reported by [`Endpoint::peers`].
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote endpoint identity, once the handshake revealed it.
    pub id: Option<EndpointId>,
    /// Network address, as dialed or as observed on accept.
    pub addr: NetworkInfo,
    /// The filter last received from this peer.
    pub filter: Filter,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SessionReject {
    /// A live session with this endpoint id already exists.
    DuplicatePeer,
    /// The endpoint is going away.
    ShuttingDown,
}

pub(crate) enum Command {
    Subscribe {
        filter: Filter,
        capacity: usize,
        reply: oneshot::Sender<std::io::Result<(SubscriptionId, SubscriberQueue)>>,
    },
    AdjustSubscription {
        id: SubscriptionId,
        add: Vec<Topic>,
        remove: Vec<Topic>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Publish {
        message: Message,
    },
    Peer {
        host: String,
        port: u16,
        retry: Option<Duration>,
        reply: Option<oneshot::Sender<Result<PeerInfo, EndpointError>>>,
    },
    Unpeer {
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<(), EndpointError>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    PeerSubscriptions {
        reply: oneshot::Sender<Filter>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    SessionConnecting {
        token: u64,
    },
    SessionRetrying {
        token: u64,
    },
    SessionUp {
        token: u64,
        remote: EndpointId,
        filter: Filter,
        data_tx: mpsc::UnboundedSender<Forward>,
        reply: oneshot::Sender<Result<(), SessionReject>>,
    },
    SessionDown {
        token: u64,
        cause: DownCause,
        will_retry: bool,
    },
    SessionError {
        token: u64,
        code: ErrorCode,
        message: String,
    },
    PeerFilter {
        token: u64,
        filter: Filter,
    },
    Dispatch {
        token: u64,
        forward: Forward,
    },
}

struct PeerRecord {
    addr: NetworkInfo,
    dialed: bool,
    status: PeerStatus,
    remote: Option<EndpointId>,
    ctl: mpsc::Sender<SessionCtl>,
    /// Reply for a blocking `peer()` call, resolved on the first
    /// successful handshake or terminal failure.
    pending: Option<oneshot::Sender<Result<PeerInfo, EndpointError>>>,
}

struct Actor {
    id: EndpointId,
    config: Arc<EndpointConfig>,
    status: StatusBus,
    routing: RoutingTable,
    records: HashMap<u64, PeerRecord>,
    by_addr: HashMap<(String, u16), u64>,
    by_id: HashMap<EndpointId, u64>,
    /// Endpoint ids seen before, for endpoint_discovered.
    known: HashSet<EndpointId>,
    filter_tx: watch::Sender<Filter>,
    filter_rx: watch::Receiver<Filter>,
    commands: mpsc::Sender<Command>,
    next_token: u64,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command).await {
                break;
            }
        }
        debug!(endpoint = %self.id, "endpoint actor stopped");
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            local_id: self.id,
            commands: self.commands.clone(),
            filter: self.filter_rx.clone(),
            config: Arc::clone(&self.config),
        }
    }

    fn alloc_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Publish the aggregate local filter to the sessions' watch
    /// channel when it changed.
    fn push_filter(&self) {
        let aggregate = self.routing.local_filter().clone();
        self.filter_tx.send_if_modified(|current| {
            if *current == aggregate {
                false
            } else {
                *current = aggregate;
                true
            }
        });
    }

    fn peer_info(&self, record: &PeerRecord) -> PeerInfo {
        let filter = record
            .remote
            .and_then(|remote| self.routing.peer_filter_of(&remote).cloned())
            .unwrap_or_default();
        PeerInfo {
            id: record.remote,
            addr: record.addr.clone(),
            filter,
            status: record.status,
        }
    }

    /// Handle one command; returns true on shutdown.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe {
                filter,
                capacity,
                reply,
            } => {
                let result = queue(capacity).map(|(producer, consumer)| {
                    let id = self.routing.add_local(filter, producer);
                    (id, consumer)
                });
                self.push_filter();
                let _ = reply.send(result);
            }

            Command::AdjustSubscription { id, add, remove } => {
                if let Some(current) = self.routing.local(id) {
                    let mut filter = current.clone();
                    for topic in &remove {
                        filter.remove(topic);
                    }
                    for topic in add {
                        filter.insert(topic);
                    }
                    self.routing.update_local(id, filter);
                    self.push_filter();
                }
            }

            Command::Unsubscribe { id } => {
                self.routing.remove_local(id);
                self.push_filter();
            }

            Command::Publish { message } => {
                let hops = if self.config.enable_hop_ttl {
                    self.config.max_hops
                } else {
                    0
                };
                let outcome = self
                    .routing
                    .dispatch(Forward { message, hops }, None)
                    .await;
                if outcome.filter_changed {
                    self.push_filter();
                }
            }

            Command::Peer {
                host,
                port,
                retry,
                reply,
            } => {
                let key = (host.clone(), port);
                if let Some(token) = self.by_addr.get(&key) {
                    // Peering twice with the same address is a no-op.
                    if let (Some(reply), Some(record)) = (reply, self.records.get(token)) {
                        let _ = reply.send(Ok(self.peer_info(record)));
                    }
                    return false;
                }
                // A zero interval means "retry at the configured default".
                let retry = retry.map(|r| {
                    if r.is_zero() {
                        self.config.retry_interval_default
                    } else {
                        r
                    }
                });
                let token = self.alloc_token();
                let (ctl_tx, ctl_rx) = mpsc::channel(CTL_CHANNEL_DEPTH);
                self.records.insert(
                    token,
                    PeerRecord {
                        addr: NetworkInfo::new(host.clone(), port),
                        dialed: true,
                        status: PeerStatus::Initialized,
                        remote: None,
                        ctl: ctl_tx,
                        pending: reply,
                    },
                );
                self.by_addr.insert(key, token);
                tokio::spawn(session::run_dialer(
                    token,
                    host,
                    port,
                    retry,
                    self.session_context(),
                    ctl_rx,
                ));
            }

            Command::Unpeer { host, port, reply } => {
                let key = (host.clone(), port);
                match self.by_addr.remove(&key) {
                    Some(token) => {
                        if let Some(record) = self.records.remove(&token) {
                            if let Some(remote) = record.remote {
                                self.by_id.remove(&remote);
                                self.routing.remove_peer(&remote);
                            }
                            let _ = record.ctl.try_send(SessionCtl::Shutdown(Reason::Unpeer));
                            if let Some(pending) = record.pending {
                                let _ = pending.send(Err(EndpointError::PeerInvalid(
                                    "unpeered before the handshake finished".into(),
                                )));
                            }
                            let mut status = Status::new(
                                StatusCode::PeerRemoved,
                                format!("unpeered {}", record.addr),
                            )
                            .with_network(record.addr.clone());
                            if let Some(remote) = record.remote {
                                status = status.with_peer(remote);
                            }
                            self.status.emit_status(status);
                        }
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        let message = format!("no peering with {host}:{port}");
                        self.status.emit_error(ErrorCode::PeerInvalid, &message);
                        let _ = reply.send(Err(EndpointError::PeerInvalid(message)));
                    }
                }
            }

            Command::Peers { reply } => {
                let peers = self
                    .records
                    .values()
                    .map(|record| self.peer_info(record))
                    .collect();
                let _ = reply.send(peers);
            }

            Command::PeerSubscriptions { reply } => {
                let _ = reply.send(self.routing.peer_filter());
            }

            Command::Shutdown { reply } => {
                for record in self.records.values_mut() {
                    let _ = record.ctl.try_send(SessionCtl::Shutdown(Reason::Shutdown));
                    if let Some(pending) = record.pending.take() {
                        let _ = pending.send(Err(EndpointError::Closed));
                    }
                }
                let _ = reply.send(());
                return true;
            }

            Command::Accepted { stream, addr } => {
                let token = self.alloc_token();
                let (ctl_tx, ctl_rx) = mpsc::channel(CTL_CHANNEL_DEPTH);
                let info = NetworkInfo::new(addr.ip().to_string(), addr.port());
                debug!(peer = %info, "accepted connection");
                self.records.insert(
                    token,
                    PeerRecord {
                        addr: info.clone(),
                        dialed: false,
                        status: PeerStatus::Unknown,
                        remote: None,
                        ctl: ctl_tx,
                        pending: None,
                    },
                );
                self.by_addr.insert((info.host, info.port), token);
                tokio::spawn(session::run_acceptor(
                    token,
                    stream,
                    self.session_context(),
                    ctl_rx,
                ));
            }

            Command::SessionConnecting { token } => {
                if let Some(record) = self.records.get_mut(&token) {
                    record.status = PeerStatus::Connecting;
                }
            }

            Command::SessionRetrying { token } => {
                if let Some(record) = self.records.get_mut(&token) {
                    record.status = PeerStatus::Reconnecting;
                }
            }

            Command::SessionUp {
                token,
                remote,
                filter,
                data_tx,
                reply,
            } => {
                if !self.records.contains_key(&token) {
                    let _ = reply.send(Err(SessionReject::ShuttingDown));
                    return false;
                }
                if self.by_id.contains_key(&remote) {
                    self.status.emit_error(
                        ErrorCode::PeerInvalid,
                        format!("duplicate peering with {remote}"),
                    );
                    let _ = reply.send(Err(SessionReject::DuplicatePeer));
                    return false;
                }

                self.by_id.insert(remote, token);
                self.routing.add_peer(remote, data_tx);
                self.routing.set_peer_filter(&remote, filter);

                let mut addr = None;
                if let Some(record) = self.records.get_mut(&token) {
                    record.remote = Some(remote);
                    record.status = PeerStatus::Peered;
                    addr = Some(record.addr.clone());
                }
                let Some(addr) = addr else {
                    let _ = reply.send(Err(SessionReject::ShuttingDown));
                    return false;
                };
                let info = self
                    .records
                    .get(&token)
                    .map(|record| self.peer_info(record));

                if self.known.insert(remote) {
                    self.status.emit_status(
                        Status::new(StatusCode::EndpointDiscovered, format!("discovered {remote}"))
                            .with_peer(remote)
                            .with_network(addr.clone()),
                    );
                }
                info!(peer = %remote, addr = %addr, "peered");
                self.status.emit_status(
                    Status::new(StatusCode::PeerAdded, format!("peered with {remote}"))
                        .with_peer(remote)
                        .with_network(addr),
                );
                if let Some(record) = self.records.get_mut(&token) {
                    if let (Some(pending), Some(info)) = (record.pending.take(), info) {
                        let _ = pending.send(Ok(info));
                    }
                }
                let _ = reply.send(Ok(()));
            }

            Command::SessionDown {
                token,
                cause,
                will_retry,
            } => {
                let Some(record) = self.records.get_mut(&token) else {
                    // Already unpeered; nothing left to report.
                    return false;
                };
                let was_peered = record.status == PeerStatus::Peered;
                let dialed = record.dialed;
                let addr = record.addr.clone();
                let remote = record.remote.take();
                record.status = PeerStatus::Disconnected;
                if let Some(remote) = remote {
                    self.by_id.remove(&remote);
                    self.routing.remove_peer(&remote);
                }

                match &cause {
                    DownCause::ConnectFailed(error) => {
                        self.status.emit_error(
                            ErrorCode::PeerUnavailable,
                            format!("cannot connect to {addr}: {error}"),
                        );
                    }
                    DownCause::Io(error) => {
                        if was_peered {
                            self.emit_lost(remote, &addr, format!("connection lost: {error}"));
                        } else if dialed {
                            self.status.emit_error(
                                ErrorCode::PeerUnavailable,
                                format!("handshake with {addr} failed: {error}"),
                            );
                        }
                    }
                    DownCause::Timeout => {
                        self.status.emit_error(
                            ErrorCode::PeerTimeout,
                            format!("{addr} stopped answering"),
                        );
                        if was_peered {
                            self.emit_lost(remote, &addr, "keepalive timeout".to_owned());
                        }
                    }
                    DownCause::Protocol { code, message } => {
                        self.status.emit_error(*code, message.clone());
                        if was_peered {
                            self.emit_lost(remote, &addr, format!("protocol error: {message}"));
                        }
                    }
                    DownCause::Goodbye(reason) => {
                        if was_peered {
                            self.emit_lost(remote, &addr, format!("peer said goodbye ({reason:?})"));
                        }
                    }
                    DownCause::Requested | DownCause::Rejected => {}
                }

                if !will_retry {
                    if let Some(record) = self.records.remove(&token) {
                        if let Some(pending) = record.pending {
                            let _ = pending.send(Err(error_for_cause(&cause, &addr)));
                        }
                    }
                    self.by_addr.retain(|_, t| *t != token);
                }
            }

            Command::SessionError {
                token: _,
                code,
                message,
            } => {
                self.status.emit_error(code, message);
            }

            Command::PeerFilter { token, filter } => {
                if let Some(remote) = self.records.get(&token).and_then(|r| r.remote) {
                    self.routing.set_peer_filter(&remote, filter);
                }
            }

            Command::Dispatch { token, forward } => {
                let Some(source) = self.records.get(&token).and_then(|r| r.remote) else {
                    return false;
                };
                let outcome = self.routing.dispatch(forward, Some(&source)).await;
                if outcome.filter_changed {
                    self.push_filter();
                }
            }
        }
        false
    }

    fn emit_lost(&self, remote: Option<EndpointId>, addr: &NetworkInfo, message: String) {
        let mut status = Status::new(StatusCode::PeerLost, message).with_network(addr.clone());
        if let Some(remote) = remote {
            status = status.with_peer(remote);
        }
        self.status.emit_status(status);
        if let Some(remote) = remote {
            self.status.emit_status(
                Status::new(
                    StatusCode::EndpointUnreachable,
                    format!("{remote} is unreachable"),
                )
                .with_peer(remote)
                .with_network(addr.clone()),
            );
        }
    }
}

fn error_for_cause(cause: &DownCause, addr: &NetworkInfo) -> EndpointError {
    match cause {
        DownCause::ConnectFailed(e) | DownCause::Io(e) => {
            EndpointError::PeerUnavailable(format!("{addr}: {e}"))
        }
        DownCause::Timeout => EndpointError::PeerTimeout,
        DownCause::Protocol { code, message } => match code {
            ErrorCode::PeerInvalid => EndpointError::PeerInvalid(message.clone()),
            ErrorCode::InvalidData => EndpointError::InvalidData(message.clone()),
            _ => EndpointError::PeerIncompatible(message.clone()),
        },
        DownCause::Goodbye(reason) => {
            EndpointError::PeerUnavailable(format!("{addr} said goodbye ({reason:?})"))
        }
        DownCause::Requested => EndpointError::Closed,
        DownCause::Rejected => EndpointError::PeerInvalid("peering rejected".into()),
    }
}

/// A process-local participant in the mesh.
///
/// Owns the routing table, all peer sessions, and the listener. Cheap
/// handles to the same endpoint can be made with [`clone`](Clone): all
/// clones talk to the same serializer task.
#[derive(Clone)]
pub struct Endpoint {
    id: EndpointId,
    config: Arc<EndpointConfig>,
    commands: mpsc::Sender<Command>,
    status: StatusBus,
    actor: Arc<ActorHandle>,
}

struct ActorHandle(JoinHandle<()>);

impl Drop for ActorHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Endpoint {
    /// Create an endpoint and spawn its serializer task.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        let id = config
            .endpoint_id
            .unwrap_or_else(|| EndpointId::from_bytes(Uuid::new_v4().into_bytes()));
        let config = Arc::new(config);
        let status = StatusBus::new(config.status_queue_capacity);
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
        let (filter_tx, filter_rx) = watch::channel(Filter::new());

        let actor = Actor {
            id,
            config: Arc::clone(&config),
            status: status.clone(),
            routing: RoutingTable::new(),
            records: HashMap::new(),
            by_addr: HashMap::new(),
            by_id: HashMap::new(),
            known: HashSet::new(),
            filter_tx,
            filter_rx,
            commands: commands.clone(),
            next_token: 0,
        };
        let handle = tokio::spawn(actor.run(command_rx));
        info!(endpoint = %id, "endpoint created");

        Self {
            id,
            config,
            commands,
            status,
            actor: Arc::new(ActorHandle(handle)),
        }
    }

    /// This endpoint's identity.
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The configuration the endpoint was built with.
    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn send(&self, command: Command) -> Result<(), EndpointError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EndpointError::Closed)
    }

    /// Install a local subscriber for `filter` with the default queue
    /// capacity.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is shut down or the queue's wake
    /// descriptor cannot be created.
    pub async fn subscribe(&self, filter: Filter) -> Result<Subscriber, EndpointError> {
        self.subscribe_with_capacity(filter, self.config.default_queue_capacity)
            .await
    }

    /// Install a local subscriber with an explicit queue capacity.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is shut down or the queue's wake
    /// descriptor cannot be created.
    pub async fn subscribe_with_capacity(
        &self,
        filter: Filter,
        capacity: usize,
    ) -> Result<Subscriber, EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            filter,
            capacity,
            reply,
        })
        .await?;
        let (id, queue) = rx.await.map_err(|_| EndpointError::Closed)??;
        Ok(Subscriber {
            id,
            queue,
            commands: self.commands.clone(),
        })
    }

    /// Publish a message. Applies backpressure through the command
    /// channel when subscribers are slow.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn publish(
        &self,
        topic: Topic,
        value: impl Into<Value>,
    ) -> Result<(), EndpointError> {
        self.send(Command::Publish {
            message: Message::new(topic, value),
        })
        .await
    }

    /// Start accepting peerings on `host:port`. Returns the bound port
    /// (useful with port 0).
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot bind.
    pub async fn listen(&self, host: &str, port: u16) -> Result<u16, EndpointError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local = listener.local_addr()?;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if commands.send(Command::Accepted { stream, addr }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        info!(host, port = local.port(), "listening for peerings");
        Ok(local.port())
    }

    /// Peer with a remote endpoint and wait for the handshake.
    ///
    /// With `retry` set, connection failures keep retrying at that
    /// interval and the call resolves on the first successful
    /// handshake. Without it, the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the peering attempt
    /// (`PeerUnavailable`, `PeerIncompatible`, `PeerInvalid`, ...).
    pub async fn peer(
        &self,
        host: impl Into<String>,
        port: u16,
        retry: Option<Duration>,
    ) -> Result<PeerInfo, EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Peer {
            host: host.into(),
            port,
            retry,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| EndpointError::Closed)?
    }

    /// Initiate a peering without waiting for the handshake. Watch the
    /// status bus for the outcome.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn peer_nosync(
        &self,
        host: impl Into<String>,
        port: u16,
        retry: Option<Duration>,
    ) -> Result<(), EndpointError> {
        self.send(Command::Peer {
            host: host.into(),
            port,
            retry,
            reply: None,
        })
        .await
    }

    /// Remove a peering. Sends GOODBYE, closes the session, and emits
    /// `peer_removed`.
    ///
    /// # Errors
    ///
    /// [`EndpointError::PeerInvalid`] when no such peering exists (also
    /// emitted on the status bus).
    pub async fn unpeer(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unpeer {
            host: host.into(),
            port,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EndpointError::Closed)?
    }

    /// Current peer records.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Peers { reply }).await?;
        rx.await.map_err(|_| EndpointError::Closed)
    }

    /// Union of the filters announced by all peers.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn peer_subscriptions(&self) -> Result<Filter, EndpointError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PeerSubscriptions { reply }).await?;
        rx.await.map_err(|_| EndpointError::Closed)
    }

    /// Subscribe to connectivity (and optionally error) events.
    #[must_use]
    pub fn status_subscriber(&self, include_errors: bool) -> StatusSubscriber {
        self.status.subscribe(include_errors)
    }

    /// Shut the endpoint down: GOODBYE to every session, then stop the
    /// serializer. Idempotent.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Handle to a local subscription.
///
/// Consuming messages is a plain-thread affair (`try_pop`, `wait`, the
/// wake descriptor); changing the subscribed topics goes through the
/// endpoint. Dropping the handle closes the queue and removes the
/// subscription.
pub struct Subscriber {
    id: SubscriptionId,
    queue: SubscriberQueue,
    commands: mpsc::Sender<Command>,
}

impl Subscriber {
    /// Pop the next message, if any.
    #[must_use]
    pub fn try_pop(&self) -> Option<Message> {
        self.queue.try_pop()
    }

    /// Pop up to `max` queued messages.
    #[must_use]
    pub fn pop_batch(&self, max: usize) -> Vec<Message> {
        self.queue.pop_batch(max)
    }

    /// Pop, blocking until a message arrives, the queue closes, or the
    /// deadline (if any) passes.
    #[must_use]
    pub fn pop(&self, deadline: Option<std::time::Instant>) -> Option<Message> {
        self.queue.pop(deadline)
    }

    /// Block until a message is available or the queue closes.
    #[must_use]
    pub fn wait(&self) -> bool {
        self.queue.wait()
    }

    /// Like [`wait`](Self::wait) with a deadline.
    #[must_use]
    pub fn wait_deadline(&self, deadline: std::time::Instant) -> bool {
        self.queue.wait_deadline(deadline)
    }

    /// Number of undelivered messages.
    #[must_use]
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// The queue's OS-pollable wake descriptor.
    #[must_use]
    pub fn wake_handle(&self) -> &WakeHandle {
        self.queue.wake_handle()
    }

    /// Closed and drained: nothing more will arrive.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.queue.is_terminated()
    }

    /// Extend this subscription with another topic prefix.
    ///
    /// Takes effect on the endpoint before any later publish.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn add_topic(&self, topic: Topic) -> Result<(), EndpointError> {
        self.adjust(vec![topic], Vec::new()).await
    }

    /// Remove an exact topic prefix from this subscription.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint is shut down.
    pub async fn remove_topic(&self, topic: Topic) -> Result<(), EndpointError> {
        self.adjust(Vec::new(), vec![topic]).await
    }

    async fn adjust(&self, add: Vec<Topic>, remove: Vec<Topic>) -> Result<(), EndpointError> {
        self.commands
            .send(Command::AdjustSubscription {
                id: self.id,
                add,
                remove,
            })
            .await
            .map_err(|_| EndpointError::Closed)
    }

    /// Stop receiving. Idempotent; also done on drop.
    pub fn close(&self) {
        self.queue.close();
        let _ = self.commands.try_send(Command::Unsubscribe { id: self.id });
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}
