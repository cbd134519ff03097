//! Endpoint configuration.

use std::time::Duration;
use weft_core::{DEFAULT_QUEUE_CAPACITY, DEFAULT_STATUS_CAPACITY};
use weft_data::EndpointId;
use weft_protocol::DEFAULT_MAX_FRAME_BYTES;

/// Tuning knobs for an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Fixed endpoint identity; generated at construction when unset.
    pub endpoint_id: Option<EndpointId>,

    /// Send a PING when nothing was transmitted for this long.
    pub keepalive_interval: Duration,

    /// Tear a session down when nothing was received for this long.
    pub keepalive_timeout: Duration,

    /// Largest frame accepted or produced on a peering connection.
    pub max_frame_bytes: usize,

    /// Capacity of subscriber queues created by `subscribe`.
    pub default_queue_capacity: usize,

    /// Ring capacity of status bus subscriptions.
    pub status_queue_capacity: usize,

    /// Retry interval used when `peer` asks for retries with a zero
    /// interval.
    pub retry_interval_default: Duration,

    /// Stamp published messages with a hop budget of `max_hops`.
    /// Off by default: loop prevention is by topology plus never
    /// echoing to the source peer.
    pub enable_hop_ttl: bool,

    /// Hop budget for published messages when hop TTL is enabled.
    pub max_hops: u8,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_id: None,
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(30),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            status_queue_capacity: DEFAULT_STATUS_CAPACITY,
            retry_interval_default: Duration::from_secs(10),
            enable_hop_ttl: false,
            max_hops: 16,
        }
    }
}
