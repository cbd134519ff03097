//! # weft-endpoint
//!
//! The endpoint layer of the Weft messaging fabric: peering over TCP,
//! the per-endpoint serializer, and the public publish/subscribe API.
//!
//! ## Example
//!
//! ```rust,no_run
//! use weft_data::{Filter, Topic, Value};
//! use weft_endpoint::{Endpoint, EndpointConfig};
//!
//! # async fn demo() -> Result<(), weft_endpoint::EndpointError> {
//! let server = Endpoint::new(EndpointConfig::default());
//! let port = server.listen("127.0.0.1", 0).await?;
//!
//! let client = Endpoint::new(EndpointConfig::default());
//! let sub = client.subscribe(Filter::from("zeek/events".parse::<Topic>().unwrap())).await?;
//! client.peer("127.0.0.1", port, None).await?;
//!
//! server
//!     .publish("zeek/events/errors".parse().unwrap(), Value::from("oops"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
mod session;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, EndpointError, PeerInfo, PeerStatus, Subscriber};

// The event vocabulary of the status bus is part of this crate's API.
pub use weft_core::{
    ErrorCode, ErrorEvent, Event, Message, NetworkInfo, Status, StatusCode, StatusSubscriber,
};
