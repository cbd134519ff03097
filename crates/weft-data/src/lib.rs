//! # weft-data
//!
//! Data model for the Weft messaging fabric: the dynamically typed
//! [`Value`] carried as message payloads, its binary wire format, the
//! arena-backed zero-copy [`ValueView`] over received frames, and the
//! [`Topic`]/[`Filter`] pair used to route messages by prefix.
//!
//! ## Example
//!
//! ```rust
//! use weft_data::{wire, Value, ValueArena};
//!
//! let value = Value::table([
//!     (Value::from("pending"), Value::Count(3)),
//! ]);
//!
//! // Deep round-trip through the wire format.
//! let bytes = wire::encode(&value);
//! assert_eq!(wire::decode(&bytes).unwrap(), value);
//!
//! // Zero-copy inspection of the same bytes.
//! let mut arena = ValueArena::new();
//! let view = arena.decode(&bytes).unwrap();
//! assert_eq!(view, value);
//! ```

pub mod id;
pub mod topic;
pub mod value;
pub mod view;
pub mod wire;

pub use id::EndpointId;
pub use topic::{Filter, Topic, TopicError};
pub use value::{Port, Protocol, Set, Subnet, Table, Tag, Timespan, Timestamp, Value, Vector};
pub use view::{ValueArena, ValueView};
pub use wire::WireError;
