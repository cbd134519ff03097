//! # weft-core
//!
//! Core routing machinery for the Weft messaging fabric.
//!
//! This crate provides the building blocks the endpoint layer composes:
//!
//! - **Message** - a `(topic, value)` pair moved through the fabric
//! - **Queue** - bounded SPSC subscriber queues with wake descriptors
//! - **Routing** - the per-endpoint routing table and dispatch fan-out
//! - **Status** - the broadcast bus for connectivity and error events
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌───────────────┐     ┌──────────────────┐
//! │ Publisher │────▶│ RoutingTable  │────▶│ SubscriberQueue  │
//! └───────────┘     └───────────────┘     └──────────────────┘
//!                           │
//!                           ▼
//!                   ┌───────────────┐
//!                   │ Peer sessions │
//!                   └───────────────┘
//! ```

pub mod message;
pub mod queue;
pub mod routing;
pub mod status;

pub use message::Message;
pub use queue::{
    queue, PushError, QueueProducer, SubscriberQueue, TryPushError, WakeHandle,
    DEFAULT_QUEUE_CAPACITY,
};
pub use routing::{Dispatched, Forward, RoutingTable, SubscriptionId};
pub use status::{
    ErrorCode, ErrorEvent, Event, NetworkInfo, Status, StatusBus, StatusCode, StatusSubscriber,
    DEFAULT_STATUS_CAPACITY,
};
