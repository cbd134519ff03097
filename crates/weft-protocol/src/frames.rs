//! Frame types for the Weft peering protocol.
//!
//! Frames are the unit of communication between peered endpoints. All
//! integer fields are big-endian; filters ride the value wire format as
//! a `vector` of `string`s so that both sides reuse the same codec.

use crate::codec::ProtocolError;
use bytes::{BufMut, BytesMut};
use weft_data::{wire, Tag, Value, ValueArena};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Hello = 0x01,
    FilterUpdate = 0x02,
    Data = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    Goodbye = 0x06,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(FrameType::Hello),
            0x02 => Ok(FrameType::FilterUpdate),
            0x03 => Ok(FrameType::Data),
            0x04 => Ok(FrameType::Ping),
            0x05 => Ok(FrameType::Pong),
            0x06 => Ok(FrameType::Goodbye),
            other => Err(other),
        }
    }
}

/// GOODBYE reason codes. Unknown codes decode as [`Reason::Unspecified`]
/// so newer peers can say goodbye in ways we do not understand yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum Reason {
    #[default]
    Unspecified = 0,
    /// The peering was removed deliberately.
    Unpeer = 1,
    /// The remote endpoint is shutting down.
    Shutdown = 2,
    /// The remote endpoint gave up on us after a protocol violation.
    Protocol = 3,
}

impl From<u16> for Reason {
    fn from(value: u16) -> Self {
        match value {
            1 => Reason::Unpeer,
            2 => Reason::Shutdown,
            3 => Reason::Protocol,
            _ => Reason::Unspecified,
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake opener; both sides send one.
    Hello {
        /// Protocol version of the sender.
        version: u16,
        /// 128-bit endpoint identity, for loop and duplicate detection.
        endpoint_id: [u8; 16],
        /// The sender's aggregate subscription filter.
        filter: Vec<String>,
    },

    /// Replaces the sender's subscription filter.
    FilterUpdate { filter: Vec<String> },

    /// A published message.
    Data {
        /// Target topic.
        topic: String,
        /// Remaining hop budget; 0 disables hop limiting.
        hops: u8,
        /// Message payload.
        value: Value,
    },

    /// Keepalive probe with a monotonic counter.
    Ping { counter: u64 },

    /// Echo of a PING counter.
    Pong { counter: u64 },

    /// Orderly teardown notice.
    Goodbye { reason: Reason },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Hello { .. } => FrameType::Hello,
            Frame::FilterUpdate { .. } => FrameType::FilterUpdate,
            Frame::Data { .. } => FrameType::Data,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Goodbye { .. } => FrameType::Goodbye,
        }
    }

    /// Create a HELLO frame.
    #[must_use]
    pub fn hello(version: u16, endpoint_id: [u8; 16], filter: Vec<String>) -> Self {
        Frame::Hello {
            version,
            endpoint_id,
            filter,
        }
    }

    /// Create a DATA frame without a hop limit.
    #[must_use]
    pub fn data(topic: impl Into<String>, value: Value) -> Self {
        Frame::Data {
            topic: topic.into(),
            hops: 0,
            value,
        }
    }

    /// Create a GOODBYE frame.
    #[must_use]
    pub fn goodbye(reason: Reason) -> Self {
        Frame::Goodbye { reason }
    }

    /// Append this frame's payload (everything after the type byte).
    pub(crate) fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Frame::Hello {
                version,
                endpoint_id,
                filter,
            } => {
                buf.put_u16(*version);
                buf.put_slice(endpoint_id);
                encode_filter(filter, buf);
            }
            Frame::FilterUpdate { filter } => encode_filter(filter, buf),
            Frame::Data { topic, hops, value } => {
                wire::put_varint(buf, topic.len() as u64);
                buf.put_slice(topic.as_bytes());
                buf.put_u8(*hops);
                wire::encode_into(value, buf);
            }
            Frame::Ping { counter } | Frame::Pong { counter } => buf.put_u64(*counter),
            Frame::Goodbye { reason } => buf.put_u16(*reason as u16),
        }
    }

    /// Decode a frame payload of the given type.
    pub(crate) fn decode_payload(
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<Frame, ProtocolError> {
        match frame_type {
            FrameType::Hello => {
                if payload.len() < 18 {
                    return Err(ProtocolError::Malformed("short HELLO"));
                }
                let version = u16::from_be_bytes([payload[0], payload[1]]);
                let mut endpoint_id = [0u8; 16];
                endpoint_id.copy_from_slice(&payload[2..18]);
                let filter = decode_filter(&payload[18..])?;
                Ok(Frame::Hello {
                    version,
                    endpoint_id,
                    filter,
                })
            }
            FrameType::FilterUpdate => Ok(Frame::FilterUpdate {
                filter: decode_filter(payload)?,
            }),
            FrameType::Data => {
                let (len, consumed) = wire::get_varint(payload)?;
                let rest = &payload[consumed..];
                let len = usize::try_from(len).map_err(|_| ProtocolError::Malformed("topic length"))?;
                // Topic bytes plus at least the hop byte must be present.
                if rest.len() <= len {
                    return Err(ProtocolError::Malformed("short DATA"));
                }
                let topic = std::str::from_utf8(&rest[..len])
                    .map_err(|_| ProtocolError::Malformed("topic is not UTF-8"))?
                    .to_owned();
                let hops = rest[len];
                let value = wire::decode(&rest[len + 1..])?;
                Ok(Frame::Data { topic, hops, value })
            }
            FrameType::Ping | FrameType::Pong => {
                let bytes: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| ProtocolError::Malformed("bad PING/PONG length"))?;
                let counter = u64::from_be_bytes(bytes);
                Ok(match frame_type {
                    FrameType::Ping => Frame::Ping { counter },
                    _ => Frame::Pong { counter },
                })
            }
            FrameType::Goodbye => {
                let bytes: [u8; 2] = payload
                    .try_into()
                    .map_err(|_| ProtocolError::Malformed("bad GOODBYE length"))?;
                Ok(Frame::Goodbye {
                    reason: Reason::from(u16::from_be_bytes(bytes)),
                })
            }
        }
    }
}

fn encode_filter(topics: &[String], buf: &mut BytesMut) {
    let value = Value::vector(topics.iter().map(|t| Value::from(t.as_str())));
    wire::encode_into(&value, buf);
}

/// Decode a filter payload. Filters ride the value wire format, so this
/// is a zero-copy walk through a shallow-decoded vector of strings.
fn decode_filter(payload: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let mut arena = ValueArena::new();
    let view = arena.decode(payload)?;
    if view.tag() != Tag::Vector {
        return Err(ProtocolError::Malformed("filter is not a vector"));
    }
    view.items()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or(ProtocolError::Malformed("filter entry is not a string"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let hello = Frame::hello(1, [0; 16], vec![]);
        assert_eq!(hello.frame_type(), FrameType::Hello);

        let data = Frame::data("zeek/events", Value::from("oops"));
        assert_eq!(data.frame_type(), FrameType::Data);
    }

    #[test]
    fn test_frame_type_conversion() {
        for ft in [
            FrameType::Hello,
            FrameType::FilterUpdate,
            FrameType::Data,
            FrameType::Ping,
            FrameType::Pong,
            FrameType::Goodbye,
        ] {
            assert_eq!(FrameType::try_from(u8::from(ft)), Ok(ft));
        }
        assert!(FrameType::try_from(0x00).is_err());
        assert!(FrameType::try_from(0x07).is_err());
    }

    #[test]
    fn test_unknown_goodbye_reason() {
        assert_eq!(Reason::from(999), Reason::Unspecified);
        assert_eq!(Reason::from(1), Reason::Unpeer);
    }
}
