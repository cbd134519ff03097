//! Per-endpoint routing state and dispatch.
//!
//! The routing table is owned and mutated by a single task (the
//! endpoint's serializer), so it needs no interior locking. It maps
//! local subscribers and peer sessions to their filters and fans
//! published messages out to every destination whose filter covers the
//! topic. A message is never echoed back to the peer it arrived from.

use crate::message::Message;
use crate::queue::QueueProducer;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use weft_data::{EndpointId, Filter};

/// Handle to a registered local subscriber.
pub type SubscriptionId = u64;

/// A message bound for a peer session, with its remaining hop budget
/// (0 = hop limiting disabled).
#[derive(Debug, Clone)]
pub struct Forward {
    pub message: Message,
    pub hops: u8,
}

struct LocalEntry {
    id: SubscriptionId,
    filter: Filter,
    queue: QueueProducer,
}

struct PeerEntry {
    filter: Filter,
    // Unbounded on purpose: dispatch runs on the endpoint's serializer
    // task, and an await here could deadlock against a session that is
    // itself blocked handing a received message to the serializer.
    tx: mpsc::UnboundedSender<Forward>,
}

/// What a call to [`RoutingTable::dispatch`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Messages enqueued to local subscribers.
    pub local: usize,
    /// Messages forwarded to peer sessions.
    pub forwarded: usize,
    /// Whether pruning closed queues changed the aggregate local filter.
    pub filter_changed: bool,
}

/// Routing state for one endpoint.
#[derive(Default)]
pub struct RoutingTable {
    locals: Vec<LocalEntry>,
    peers: HashMap<EndpointId, PeerEntry>,
    next_subscription: SubscriptionId,
    aggregate: Filter,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local subscriber. Returns its subscription id.
    pub fn add_local(&mut self, filter: Filter, queue: QueueProducer) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.locals.push(LocalEntry { id, filter, queue });
        self.rebuild_aggregate();
        debug!(subscription = id, "local subscriber added");
        id
    }

    /// Replace a local subscriber's filter. Returns whether the
    /// aggregate local filter changed.
    pub fn update_local(&mut self, id: SubscriptionId, filter: Filter) -> bool {
        let Some(entry) = self.locals.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        entry.filter = filter;
        self.rebuild_aggregate()
    }

    /// The current filter of a local subscriber.
    #[must_use]
    pub fn local(&self, id: SubscriptionId) -> Option<&Filter> {
        self.locals.iter().find(|e| e.id == id).map(|e| &e.filter)
    }

    /// Drop a local subscriber, closing its queue. Returns whether the
    /// aggregate local filter changed.
    pub fn remove_local(&mut self, id: SubscriptionId) -> bool {
        let before = self.locals.len();
        self.locals.retain(|e| {
            if e.id == id {
                e.queue.close();
                false
            } else {
                true
            }
        });
        if self.locals.len() == before {
            return false;
        }
        debug!(subscription = id, "local subscriber removed");
        self.rebuild_aggregate()
    }

    /// Register a peer session's outbound channel, with an empty
    /// inbound filter until the peer announces one.
    pub fn add_peer(&mut self, peer: EndpointId, tx: mpsc::UnboundedSender<Forward>) {
        self.peers.insert(
            peer,
            PeerEntry {
                filter: Filter::new(),
                tx,
            },
        );
        debug!(peer = %peer, "peer registered for routing");
    }

    /// Store the filter most recently received from a peer.
    pub fn set_peer_filter(&mut self, peer: &EndpointId, filter: Filter) -> bool {
        match self.peers.get_mut(peer) {
            Some(entry) => {
                trace!(peer = %peer, filter = %filter, "peer filter updated");
                entry.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Drop a peer session.
    pub fn remove_peer(&mut self, peer: &EndpointId) -> bool {
        self.peers.remove(peer).is_some()
    }

    #[must_use]
    pub fn has_peer(&self, peer: &EndpointId) -> bool {
        self.peers.contains_key(peer)
    }

    /// The canonical union of all local subscriber filters.
    #[must_use]
    pub fn local_filter(&self) -> &Filter {
        &self.aggregate
    }

    /// The inbound filter of one peer, if registered.
    #[must_use]
    pub fn peer_filter_of(&self, peer: &EndpointId) -> Option<&Filter> {
        self.peers.get(peer).map(|entry| &entry.filter)
    }

    /// The union of all inbound peer filters.
    #[must_use]
    pub fn peer_filter(&self) -> Filter {
        let mut union = Filter::new();
        for entry in self.peers.values() {
            union.merge(&entry.filter);
        }
        union
    }

    fn rebuild_aggregate(&mut self) -> bool {
        let mut union = Filter::new();
        for entry in &self.locals {
            union.merge(&entry.filter);
        }
        if union == self.aggregate {
            false
        } else {
            self.aggregate = union;
            true
        }
    }

    /// Fan a message out to every covering local queue and peer
    /// session. `source` names the peer the message arrived from, if
    /// any; it never gets the message echoed back. Local enqueue blocks
    /// on full queues, which is what propagates backpressure to
    /// publishers through the endpoint's command channel.
    pub async fn dispatch(&mut self, forward: Forward, source: Option<&EndpointId>) -> Dispatched {
        let Forward { message, hops } = forward;
        let mut outcome = Dispatched::default();
        let mut stale = Vec::new();

        for i in 0..self.locals.len() {
            if !self.locals[i].filter.covers(message.topic.as_str()) {
                continue;
            }
            match self.locals[i].queue.push(message.clone()).await {
                Ok(()) => outcome.local += 1,
                Err(_) => stale.push(self.locals[i].id),
            }
        }
        for id in stale {
            outcome.filter_changed |= self.remove_local(id);
        }

        // A budget of 1 is spent: decrementing would drop it at zero on
        // arrival anyway. 0 disables hop limiting.
        let next_hops = match hops {
            0 => Some(0),
            1 => None,
            n => Some(n - 1),
        };
        if let Some(next_hops) = next_hops {
            for (id, entry) in &self.peers {
                if Some(id) == source || !entry.filter.covers(message.topic.as_str()) {
                    continue;
                }
                let item = Forward {
                    message: message.clone(),
                    hops: next_hops,
                };
                if entry.tx.send(item).is_ok() {
                    outcome.forwarded += 1;
                }
            }
        }

        trace!(
            topic = %message.topic,
            local = outcome.local,
            forwarded = outcome.forwarded,
            "dispatched"
        );
        outcome
    }

    /// Basic counters for introspection.
    #[must_use]
    pub fn stats(&self) -> RoutingStats {
        RoutingStats {
            local_subscribers: self.locals.len(),
            peers: self.peers.len(),
        }
    }
}

/// Routing table counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingStats {
    pub local_subscribers: usize,
    pub peers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::queue;
    use weft_data::{Topic, Value};

    fn filter(topics: &[&str]) -> Filter {
        topics
            .iter()
            .map(|t| t.parse::<Topic>().unwrap())
            .collect()
    }

    fn msg(topic: &str) -> Forward {
        Forward {
            message: Message::new(topic.parse().unwrap(), Value::Count(1)),
            hops: 0,
        }
    }

    #[tokio::test]
    async fn test_local_prefix_dispatch() {
        let mut table = RoutingTable::new();
        let (tx_a, rx_a) = queue(8).unwrap();
        let (tx_b, rx_b) = queue(8).unwrap();
        table.add_local(filter(&["zeek/events"]), tx_a);
        table.add_local(filter(&["zeek/events/errors"]), tx_b);

        let outcome = table.dispatch(msg("zeek/events/errors"), None).await;
        assert_eq!(outcome.local, 2);
        let outcome = table.dispatch(msg("zeek/events/data"), None).await;
        assert_eq!(outcome.local, 1);
        let outcome = table.dispatch(msg("zeek/other"), None).await;
        assert_eq!(outcome.local, 0);

        assert_eq!(rx_a.available(), 2);
        assert_eq!(rx_b.available(), 1);
    }

    #[tokio::test]
    async fn test_no_echo_to_source() {
        let mut table = RoutingTable::new();
        let origin = EndpointId::from_bytes([1; 16]);
        let other = EndpointId::from_bytes([2; 16]);
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        table.add_peer(origin, peer_tx);
        table.add_peer(other, other_tx);
        table.set_peer_filter(&origin, filter(&["zeek"]));
        table.set_peer_filter(&other, filter(&["zeek"]));

        let outcome = table.dispatch(msg("zeek/events"), Some(&origin)).await;
        assert_eq!(outcome.forwarded, 1);
        assert!(other_rx.try_recv().is_ok());
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_filter_gates_forwarding() {
        let mut table = RoutingTable::new();
        let peer = EndpointId::from_bytes([3; 16]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.add_peer(peer, tx);

        // No filter announced yet: nothing forwarded.
        let outcome = table.dispatch(msg("zeek/events"), None).await;
        assert_eq!(outcome.forwarded, 0);

        table.set_peer_filter(&peer, filter(&["zeek/events"]));
        let outcome = table.dispatch(msg("zeek/events/errors"), None).await;
        assert_eq!(outcome.forwarded, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_hop_budget() {
        let mut table = RoutingTable::new();
        let peer = EndpointId::from_bytes([4; 16]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.add_peer(peer, tx);
        table.set_peer_filter(&peer, filter(&["t"]));

        // Budget 1 is spent here.
        let mut spent = msg("t");
        spent.hops = 1;
        assert_eq!(table.dispatch(spent, None).await.forwarded, 0);

        // Budget 2 forwards with 1 remaining.
        let mut live = msg("t");
        live.hops = 2;
        assert_eq!(table.dispatch(live, None).await.forwarded, 1);
        assert_eq!(rx.try_recv().unwrap().hops, 1);

        // Budget 0 forwards unlimited.
        assert_eq!(table.dispatch(msg("t"), None).await.forwarded, 1);
        assert_eq!(rx.try_recv().unwrap().hops, 0);
    }

    #[tokio::test]
    async fn test_aggregate_filter_tracks_locals() {
        let mut table = RoutingTable::new();
        let (tx_a, _rx_a) = queue(8).unwrap();
        let (tx_b, _rx_b) = queue(8).unwrap();
        let a = table.add_local(filter(&["zeek/events"]), tx_a);
        table.add_local(filter(&["zeek/events/errors"]), tx_b);

        // The second filter is subsumed by the first.
        assert_eq!(table.local_filter(), &filter(&["zeek/events"]));

        assert!(table.remove_local(a));
        assert_eq!(table.local_filter(), &filter(&["zeek/events/errors"]));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned_on_dispatch() {
        let mut table = RoutingTable::new();
        let (tx, rx) = queue(8).unwrap();
        table.add_local(filter(&["t"]), tx);
        drop(rx); // consumer went away

        let outcome = table.dispatch(msg("t"), None).await;
        assert_eq!(outcome.local, 0);
        assert!(outcome.filter_changed);
        assert_eq!(table.stats().local_subscribers, 0);
        assert!(table.local_filter().is_empty());
    }

    #[tokio::test]
    async fn test_peer_subscriptions_union() {
        let mut table = RoutingTable::new();
        let a = EndpointId::from_bytes([5; 16]);
        let b = EndpointId::from_bytes([6; 16]);
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        table.add_peer(a, tx_a);
        table.add_peer(b, tx_b);
        table.set_peer_filter(&a, filter(&["x/y"]));
        table.set_peer_filter(&b, filter(&["x"]));

        assert_eq!(table.peer_filter(), filter(&["x"]));
    }
}
