//! # weft-protocol
//!
//! Wire protocol for peering between Weft endpoints.
//!
//! This crate defines the frames exchanged over a peering TCP
//! connection, the length-prefixed framing codec, and version
//! negotiation.
//!
//! ## Frame Types
//!
//! - `Hello` - handshake with version, endpoint identity, initial filter
//! - `FilterUpdate` - replace the sender's subscription filter
//! - `Data` - a published message (topic + value payload)
//! - `Ping` / `Pong` - keepalive probes
//! - `Goodbye` - orderly teardown with a reason code
//!
//! ## Example
//!
//! ```rust
//! use weft_protocol::{codec, Frame, DEFAULT_MAX_FRAME_BYTES};
//! use weft_data::Value;
//!
//! let frame = Frame::data("zeek/events", Value::from("oops"));
//! let encoded = codec::encode(&frame, DEFAULT_MAX_FRAME_BYTES).unwrap();
//! let decoded = codec::decode(&encoded, DEFAULT_MAX_FRAME_BYTES).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{ProtocolError, DEFAULT_MAX_FRAME_BYTES};
pub use frames::{Frame, FrameType, Reason};
pub use version::{compatible, PROTOCOL_VERSION};
