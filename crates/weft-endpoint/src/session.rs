//! Per-connection peering sessions.
//!
//! Each session is one tokio task owning one TCP connection. The task
//! drives the handshake, then a `select!` loop over the outbound data
//! channel, the aggregate-filter watch, socket reads, and the heartbeat
//! timer. Sessions never touch routing state themselves: everything
//! state-changing is posted to the endpoint's serializer task, and the
//! reason a session ended is classified in its final `SessionDown`.

use crate::config::EndpointConfig;
use crate::endpoint::{Command, SessionReject};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use weft_core::{ErrorCode, Forward, Message};
use weft_data::{EndpointId, Filter, Topic};
use weft_protocol::{codec, compatible, Frame, ProtocolError, Reason, PROTOCOL_VERSION};

/// Depth of the control channel from the endpoint to a session.
pub(crate) const CTL_CHANNEL_DEPTH: usize = 4;

/// Control messages from the endpoint to a session.
#[derive(Debug)]
pub(crate) enum SessionCtl {
    /// Send GOODBYE with this reason and stop.
    Shutdown(Reason),
}

/// Everything a session task needs from its endpoint.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) local_id: EndpointId,
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) filter: watch::Receiver<Filter>,
    pub(crate) config: Arc<EndpointConfig>,
}

/// Why a session ended. The serializer turns this into status and
/// error events.
#[derive(Debug)]
pub(crate) enum DownCause {
    /// TCP connect failed (dialers only).
    ConnectFailed(String),
    /// The transport dropped at steady state.
    Io(String),
    /// Nothing received within the keepalive timeout.
    Timeout,
    /// Protocol violation; `code` classifies it. Always terminal.
    Protocol { code: ErrorCode, message: String },
    /// The remote said GOODBYE.
    Goodbye(Reason),
    /// We initiated the teardown (unpeer, shutdown, endpoint gone).
    Requested,
    /// The serializer refused the handshake (duplicate or self peer).
    Rejected,
}

impl DownCause {
    /// Whether a dialer with a retry interval should try again.
    pub(crate) fn retryable(&self) -> bool {
        matches!(
            self,
            DownCause::ConnectFailed(_) | DownCause::Io(_) | DownCause::Timeout
        )
    }
}

/// Run an outbound (dialing) session, retrying per `retry`.
pub(crate) async fn run_dialer(
    token: u64,
    host: String,
    port: u16,
    retry: Option<Duration>,
    mut ctx: SessionContext,
    mut ctl: mpsc::Receiver<SessionCtl>,
) {
    loop {
        if ctx
            .commands
            .send(Command::SessionConnecting { token })
            .await
            .is_err()
        {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = ctl.recv() => {
                let _ = ctx
                    .commands
                    .send(Command::SessionDown { token, cause: DownCause::Requested, will_retry: false })
                    .await;
                return;
            }
            result = TcpStream::connect((host.as_str(), port)) => result,
        };

        let cause = match connected {
            Ok(stream) => {
                debug!(peer = %format!("{host}:{port}"), "connected, starting handshake");
                run_connection(token, stream, true, &mut ctx, &mut ctl).await
            }
            Err(e) => DownCause::ConnectFailed(e.to_string()),
        };

        let will_retry = retry.is_some() && cause.retryable();
        if ctx
            .commands
            .send(Command::SessionDown { token, cause, will_retry })
            .await
            .is_err()
            || !will_retry
        {
            return;
        }

        let delay = retry.unwrap_or_default();
        if ctx
            .commands
            .send(Command::SessionRetrying { token })
            .await
            .is_err()
        {
            return;
        }
        tokio::select! {
            biased;
            _ = ctl.recv() => {
                let _ = ctx
                    .commands
                    .send(Command::SessionDown { token, cause: DownCause::Requested, will_retry: false })
                    .await;
                return;
            }
            _ = sleep(delay) => {}
        }
    }
}

/// Run an accepted (inbound) session.
pub(crate) async fn run_acceptor(
    token: u64,
    stream: TcpStream,
    mut ctx: SessionContext,
    mut ctl: mpsc::Receiver<SessionCtl>,
) {
    let cause = run_connection(token, stream, false, &mut ctx, &mut ctl).await;
    let _ = ctx
        .commands
        .send(Command::SessionDown { token, cause, will_retry: false })
        .await;
}

enum WriteError {
    TooLarge(String),
    Io(String),
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &Frame,
    max_frame_bytes: usize,
) -> Result<(), WriteError> {
    match codec::encode(frame, max_frame_bytes) {
        Ok(bytes) => writer
            .write_all(&bytes)
            .await
            .map_err(|e| WriteError::Io(e.to_string())),
        Err(e) => Err(WriteError::TooLarge(e.to_string())),
    }
}

fn protocol_cause(error: &ProtocolError) -> DownCause {
    let code = match error {
        // Version problems surface separately; everything arriving
        // malformed is an invalid_data close.
        ProtocolError::FrameTooLarge { .. }
        | ProtocolError::Incomplete(_)
        | ProtocolError::UnknownFrameType(_)
        | ProtocolError::InvalidValue(_)
        | ProtocolError::Malformed(_) => ErrorCode::InvalidData,
    };
    DownCause::Protocol {
        code,
        message: error.to_string(),
    }
}

fn filter_topics(filter: &Filter) -> Vec<String> {
    filter.iter().map(|t| t.as_str().to_owned()).collect()
}

fn parse_filter(topics: Vec<String>) -> Result<Filter, DownCause> {
    topics
        .into_iter()
        .map(Topic::new)
        .collect::<Result<Filter, _>>()
        .map_err(|e| DownCause::Protocol {
            code: ErrorCode::InvalidData,
            message: format!("bad filter topic: {e}"),
        })
}

/// Drive one TCP connection from handshake to teardown. Returns why it
/// ended; the caller reports that to the serializer.
async fn run_connection(
    token: u64,
    stream: TcpStream,
    dialer: bool,
    ctx: &mut SessionContext,
    ctl: &mut mpsc::Receiver<SessionCtl>,
) -> DownCause {
    let max = ctx.config.max_frame_bytes;
    if let Err(e) = stream.set_nodelay(true) {
        trace!(error = %e, "could not set TCP_NODELAY");
    }
    let (mut reader, mut writer) = stream.into_split();
    let mut read_buf = BytesMut::with_capacity(4096);

    let hello = Frame::hello(
        PROTOCOL_VERSION,
        *ctx.local_id.as_bytes(),
        filter_topics(&ctx.filter.borrow_and_update()),
    );

    // The dialer speaks first; the acceptor answers after validating.
    if dialer {
        if let Err(e) = write_frame(&mut writer, &hello, max).await {
            return write_cause(e);
        }
    }

    // Wait for the remote HELLO.
    let deadline = Instant::now() + ctx.config.keepalive_timeout;
    let remote_hello = loop {
        match codec::decode_from(&mut read_buf, max) {
            Ok(Some(frame)) => break frame,
            Ok(None) => {}
            Err(e) => return protocol_cause(&e),
        }
        tokio::select! {
            biased;
            _ = ctl.recv() => return DownCause::Requested,
            _ = sleep_until(deadline) => return DownCause::Timeout,
            read = reader.read_buf(&mut read_buf) => match read {
                Ok(0) => return DownCause::Io("connection closed during handshake".into()),
                Ok(_) => {}
                Err(e) => return DownCause::Io(e.to_string()),
            },
        }
    };

    let Frame::Hello {
        version,
        endpoint_id,
        filter,
    } = remote_hello
    else {
        return DownCause::Protocol {
            code: ErrorCode::PeerIncompatible,
            message: "expected HELLO".into(),
        };
    };
    if !compatible(PROTOCOL_VERSION, version) {
        return DownCause::Protocol {
            code: ErrorCode::PeerIncompatible,
            message: format!("protocol version {version} (ours is {PROTOCOL_VERSION})"),
        };
    }
    let remote = EndpointId::from_bytes(endpoint_id);
    let peer_filter = match parse_filter(filter) {
        Ok(f) => f,
        Err(cause) => return cause,
    };

    // Answer a version-compatible HELLO before the identity checks so
    // that on a self-connect both ends of the loop see the evidence.
    if !dialer {
        if let Err(e) = write_frame(&mut writer, &hello, max).await {
            return write_cause(e);
        }
    }
    if remote == ctx.local_id {
        return DownCause::Protocol {
            code: ErrorCode::PeerInvalid,
            message: "connected to self".into(),
        };
    }

    // Hand the session to the serializer; it may refuse duplicates.
    let (data_tx, mut data_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    let up = Command::SessionUp {
        token,
        remote,
        filter: peer_filter,
        data_tx,
        reply: reply_tx,
    };
    if ctx.commands.send(up).await.is_err() {
        return DownCause::Requested;
    }
    match reply_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(reject)) => {
            debug!(peer = %remote, ?reject, "handshake refused");
            let _ = write_frame(&mut writer, &Frame::goodbye(Reason::Protocol), max).await;
            return DownCause::Rejected;
        }
        Err(_) => return DownCause::Requested,
    }

    // Peered. Announce the current aggregate filter; this also repairs
    // any update the remote may have missed across a reconnect.
    let current = filter_topics(&ctx.filter.borrow_and_update());
    if let Err(e) = write_frame(&mut writer, &Frame::FilterUpdate { filter: current }, max).await {
        return write_cause(e);
    }

    let keepalive = ctx.config.keepalive_interval;
    let timeout = ctx.config.keepalive_timeout;
    let mut last_rx = Instant::now();
    let mut last_tx = Instant::now();
    let mut ping_counter: u64 = 0;
    let mut ticker = interval((keepalive / 2).max(Duration::from_millis(25)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Drain every complete frame before sleeping again.
        loop {
            let frame = match codec::decode_from(&mut read_buf, max) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return protocol_cause(&e),
            };
            match frame {
                Frame::Data { topic, hops, value } => {
                    let topic = match Topic::new(topic) {
                        Ok(t) => t,
                        Err(e) => {
                            return DownCause::Protocol {
                                code: ErrorCode::InvalidData,
                                message: format!("bad topic: {e}"),
                            }
                        }
                    };
                    let forward = Forward {
                        message: Message::new(topic, value),
                        hops,
                    };
                    if ctx
                        .commands
                        .send(Command::Dispatch { token, forward })
                        .await
                        .is_err()
                    {
                        return DownCause::Requested;
                    }
                }
                Frame::FilterUpdate { filter } => {
                    let filter = match parse_filter(filter) {
                        Ok(f) => f,
                        Err(cause) => return cause,
                    };
                    if ctx
                        .commands
                        .send(Command::PeerFilter { token, filter })
                        .await
                        .is_err()
                    {
                        return DownCause::Requested;
                    }
                }
                Frame::Ping { counter } => {
                    match write_frame(&mut writer, &Frame::Pong { counter }, max).await {
                        Ok(()) => last_tx = Instant::now(),
                        Err(e) => return write_cause(e),
                    }
                }
                Frame::Pong { .. } => {}
                Frame::Goodbye { reason } => {
                    debug!(peer = %remote, ?reason, "received GOODBYE");
                    return DownCause::Goodbye(reason);
                }
                Frame::Hello { .. } => {
                    return DownCause::Protocol {
                        code: ErrorCode::PeerIncompatible,
                        message: "unexpected HELLO at steady state".into(),
                    }
                }
            }
        }

        tokio::select! {
            biased;
            msg = ctl.recv() => {
                let reason = match msg {
                    Some(SessionCtl::Shutdown(reason)) => reason,
                    None => Reason::Shutdown,
                };
                let _ = write_frame(&mut writer, &Frame::goodbye(reason), max).await;
                return DownCause::Requested;
            }
            changed = ctx.filter.changed() => {
                if changed.is_err() {
                    // Endpoint gone; the ctl branch will wrap up shortly,
                    // but there is nothing useful left to do either way.
                    return DownCause::Requested;
                }
                let topics = filter_topics(&ctx.filter.borrow_and_update());
                match write_frame(&mut writer, &Frame::FilterUpdate { filter: topics }, max).await {
                    Ok(()) => last_tx = Instant::now(),
                    Err(e) => return write_cause(e),
                }
            }
            item = data_rx.recv() => match item {
                Some(Forward { message, hops }) => {
                    let frame = Frame::Data {
                        topic: message.topic.as_str().to_owned(),
                        hops,
                        value: message.value,
                    };
                    match write_frame(&mut writer, &frame, max).await {
                        Ok(()) => last_tx = Instant::now(),
                        Err(WriteError::TooLarge(message)) => {
                            // Refuse the frame, keep the session.
                            warn!(peer = %remote, %message, "dropping oversized DATA frame");
                            let _ = ctx.commands.send(Command::SessionError {
                                token,
                                code: ErrorCode::InvalidData,
                                message,
                            }).await;
                        }
                        Err(WriteError::Io(e)) => return DownCause::Io(e),
                    }
                }
                None => return DownCause::Requested,
            },
            read = reader.read_buf(&mut read_buf) => match read {
                Ok(0) => return DownCause::Io("connection closed".into()),
                Ok(_) => last_rx = Instant::now(),
                Err(e) => return DownCause::Io(e.to_string()),
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                if now.duration_since(last_rx) >= timeout {
                    return DownCause::Timeout;
                }
                if now.duration_since(last_tx) >= keepalive {
                    ping_counter += 1;
                    match write_frame(&mut writer, &Frame::Ping { counter: ping_counter }, max).await {
                        Ok(()) => last_tx = now,
                        Err(e) => return write_cause(e),
                    }
                }
            }
        }
    }
}

fn write_cause(error: WriteError) -> DownCause {
    match error {
        WriteError::TooLarge(message) => DownCause::Protocol {
            code: ErrorCode::InvalidData,
            message,
        },
        WriteError::Io(message) => DownCause::Io(message),
    }
}
