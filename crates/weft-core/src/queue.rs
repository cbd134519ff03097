//! Bounded subscriber queues with an OS-pollable wake descriptor.
//!
//! A queue is a single-producer/single-consumer ring: the producer side
//! lives inside the endpoint's dispatch path (async), the consumer side
//! is designed for plain threads, language bindings and external event
//! loops included. The wake descriptor is a connected loopback UDP
//! socket pair: it becomes readable ("armed") on the empty→non-empty
//! transition and is drained ("extinguished") by the consumer once the
//! queue runs empty again. Arming happens under the queue mutex so it is
//! idempotent; extinguishing re-checks emptiness under the same lock to
//! close the lost-wake race.

use crate::message::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::trace;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Rejected push on a full queue (SPSC, so the producer retries after a
/// space wakeup) or a closed one. Carries the message back to the
/// caller.
#[derive(Debug, Error)]
pub enum TryPushError {
    #[error("queue is full")]
    Full(Message),

    #[error("queue is closed")]
    Closed(Message),
}

/// Rejected push on a closed queue.
#[derive(Debug, Error)]
#[error("queue is closed")]
pub struct PushError(pub Message);

/// The OS-visible wake handle of a queue.
///
/// The underlying socket is readable exactly while the queue holds
/// undelivered messages (or after close). Hand it to `poll`/`select`
/// style loops; consume messages with the queue API, never by reading
/// the socket directly.
#[derive(Debug)]
pub struct WakeHandle {
    tx: UdpSocket,
    rx: UdpSocket,
}

impl WakeHandle {
    fn new() -> io::Result<Self> {
        let rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        tx.connect(rx.local_addr()?)?;
        rx.connect(tx.local_addr()?)?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;
        Ok(Self { tx, rx })
    }

    /// Signal the descriptor. Idempotent from the queue's point of
    /// view: the caller only arms on the empty→non-empty edge.
    fn arm(&self) {
        // A full socket buffer means the peer is already plenty signaled.
        let _ = self.tx.send(&[1]);
    }

    /// Drain all pending wake datagrams.
    fn extinguish(&self) {
        let mut buf = [0u8; 16];
        while self.rx.recv(&mut buf).is_ok() {}
    }

    /// Whether the descriptor is currently signaled.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.rx.peek(&mut [0u8; 1]).is_ok()
    }

    /// The readable end, for registration with an external poller.
    #[must_use]
    pub fn socket(&self) -> &UdpSocket {
        &self.rx
    }
}

#[cfg(unix)]
impl AsFd for WakeHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.rx.as_fd()
    }
}

struct State {
    items: VecDeque<Message>,
    closed: bool,
    armed: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    /// Consumer-side wakeup: message arrived or queue closed.
    not_empty: Condvar,
    /// Producer-side wakeup: space freed or queue closed.
    space: Notify,
    wake: WakeHandle,
}

impl Shared {
    /// Arm or extinguish the descriptor to match queue state. Must be
    /// called with the lock held.
    fn sync_wake(&self, state: &mut State) {
        let want_armed = !state.items.is_empty() || state.closed;
        if want_armed && !state.armed {
            self.wake.arm();
            state.armed = true;
        } else if !want_armed && state.armed {
            self.wake.extinguish();
            state.armed = false;
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.sync_wake(&mut state);
        drop(state);
        self.not_empty.notify_all();
        self.space.notify_waiters();
    }
}

/// Create a bounded SPSC queue with the given capacity.
///
/// # Errors
///
/// Fails only if the wake descriptor's socket pair cannot be created.
pub fn queue(capacity: usize) -> io::Result<(QueueProducer, SubscriberQueue)> {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::with_capacity(capacity),
            closed: false,
            armed: false,
        }),
        capacity: capacity.max(1),
        not_empty: Condvar::new(),
        space: Notify::new(),
        wake: WakeHandle::new()?,
    });
    Ok((
        QueueProducer {
            shared: Arc::clone(&shared),
        },
        SubscriberQueue { shared },
    ))
}

/// Producer half of a subscriber queue.
pub struct QueueProducer {
    shared: Arc<Shared>,
}

impl QueueProducer {
    /// Push without blocking.
    ///
    /// # Errors
    ///
    /// Returns the message back inside [`TryPushError::Full`] or
    /// [`TryPushError::Closed`].
    pub fn try_push(&self, message: Message) -> Result<(), TryPushError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TryPushError::Closed(message));
        }
        if state.items.len() >= self.shared.capacity {
            return Err(TryPushError::Full(message));
        }
        state.items.push_back(message);
        self.shared.sync_wake(&mut state);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Push, waiting for space when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the message back if the queue closed.
    pub async fn push(&self, message: Message) -> Result<(), PushError> {
        let mut message = message;
        loop {
            match self.try_push(message) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed(m)) => return Err(PushError(m)),
                Err(TryPushError::Full(m)) => {
                    trace!("subscriber queue full, waiting for space");
                    message = m;
                    self.shared.space.notified().await;
                }
            }
        }
    }

    /// Whether the queue has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Close the queue. Idempotent; already-queued messages stay
    /// deliverable to the consumer.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for QueueProducer {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Consumer half of a subscriber queue.
pub struct SubscriberQueue {
    shared: Arc<Shared>,
}

impl SubscriberQueue {
    /// Pop the next message, if one is queued.
    ///
    /// Returns `None` both for "currently empty" and "closed and
    /// drained"; distinguish with [`is_terminated`](Self::is_terminated).
    #[must_use]
    pub fn try_pop(&self) -> Option<Message> {
        let mut state = self.shared.state.lock();
        let item = state.items.pop_front();
        self.shared.sync_wake(&mut state);
        drop(state);
        if item.is_some() {
            self.shared.space.notify_one();
        }
        item
    }

    /// Pop up to `max` messages.
    #[must_use]
    pub fn pop_batch(&self, max: usize) -> Vec<Message> {
        let mut state = self.shared.state.lock();
        let n = state.items.len().min(max);
        let batch: Vec<_> = state.items.drain(..n).collect();
        self.shared.sync_wake(&mut state);
        drop(state);
        if !batch.is_empty() {
            self.shared.space.notify_one();
        }
        batch
    }

    /// Number of messages currently queued.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Block the calling thread until a message is available or the
    /// queue closes. Returns whether a message is available.
    #[must_use]
    pub fn wait(&self) -> bool {
        let mut state = self.shared.state.lock();
        while state.items.is_empty() && !state.closed {
            self.shared.not_empty.wait(&mut state);
        }
        !state.items.is_empty()
    }

    /// Like [`wait`](Self::wait), giving up at `deadline`. Returns
    /// whether a message is available.
    #[must_use]
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut state = self.shared.state.lock();
        while state.items.is_empty() && !state.closed {
            if self
                .shared
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        !state.items.is_empty()
    }

    /// Pop, blocking until a message arrives, the queue closes, or the
    /// deadline (if any) passes.
    #[must_use]
    pub fn pop(&self, deadline: Option<Instant>) -> Option<Message> {
        match deadline {
            Some(deadline) => {
                if !self.wait_deadline(deadline) {
                    return None;
                }
            }
            None => {
                if !self.wait() {
                    return None;
                }
            }
        }
        self.try_pop()
    }

    /// Whether the queue has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Closed and fully drained: no further messages will ever arrive.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed && state.items.is_empty()
    }

    /// The queue's wake descriptor.
    #[must_use]
    pub fn wake_handle(&self) -> &WakeHandle {
        &self.shared.wake
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for SubscriberQueue {
    fn drop(&mut self) {
        self.shared.close();
    }
}
