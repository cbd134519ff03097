//! Codec for encoding and decoding peering frames.
//!
//! Each frame on the wire is a 4-byte big-endian length, a 1-byte frame
//! type, and the type-specific payload. The length counts everything
//! after itself, so the smallest legal frame is five bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use weft_data::WireError;

use crate::frames::{Frame, FrameType};

/// Default maximum frame size (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the maximum size.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Not enough data to decode a frame.
    #[error("incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// Unknown frame type byte.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// Value payload failed to decode.
    #[error("invalid value payload: {0}")]
    InvalidValue(#[from] WireError),

    /// Structurally invalid frame payload.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the encoded frame would
/// exceed `max_frame_bytes`.
pub fn encode(frame: &Frame, max_frame_bytes: usize) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf, max_frame_bytes)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the encoded frame would
/// exceed `max_frame_bytes`.
pub fn encode_into(
    frame: &Frame,
    buf: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<(), ProtocolError> {
    let start = buf.len();
    buf.put_u32(0); // patched below
    buf.put_u8(frame.frame_type().into());
    frame.encode_payload(buf);

    let length = buf.len() - start - LENGTH_PREFIX_SIZE;
    if length > max_frame_bytes {
        buf.truncate(start);
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: max_frame_bytes,
        });
    }
    buf[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&(length as u32).to_be_bytes());
    Ok(())
}

/// Decode a single frame from a complete buffer.
///
/// # Errors
///
/// Returns an error if the data is incomplete, oversized, or invalid.
pub fn decode(data: &[u8], max_frame_bytes: usize) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    check_length(length, max_frame_bytes)?;

    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(ProtocolError::Incomplete(total - data.len()));
    }

    let frame_type = FrameType::try_from(data[LENGTH_PREFIX_SIZE])
        .map_err(ProtocolError::UnknownFrameType)?;
    Frame::decode_payload(frame_type, &data[LENGTH_PREFIX_SIZE + 1..total])
}

/// Try to decode a frame from a streaming buffer, consuming it on
/// success.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is oversized or invalid.
pub fn decode_from(
    buf: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    check_length(length, max_frame_bytes)?;

    let total = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame_type =
        FrameType::try_from(payload[0]).map_err(ProtocolError::UnknownFrameType)?;
    Frame::decode_payload(frame_type, &payload[1..]).map(Some)
}

fn check_length(length: usize, max_frame_bytes: usize) -> Result<(), ProtocolError> {
    if length == 0 {
        return Err(ProtocolError::Malformed("zero-length frame"));
    }
    if length > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: max_frame_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Reason;
    use crate::version::PROTOCOL_VERSION;
    use weft_data::Value;

    const MAX: usize = DEFAULT_MAX_FRAME_BYTES;

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            Frame::hello(
                PROTOCOL_VERSION,
                *b"0123456789abcdef",
                vec!["zeek/events".into(), "weft/control".into()],
            ),
            Frame::FilterUpdate { filter: vec![] },
            Frame::FilterUpdate {
                filter: vec!["a/b".into()],
            },
            Frame::data("zeek/events/errors", Value::from("oops")),
            Frame::Data {
                topic: "t".into(),
                hops: 7,
                value: Value::set([Value::Count(1), Value::Count(2)]),
            },
            Frame::Ping { counter: 42 },
            Frame::Pong { counter: 42 },
            Frame::goodbye(Reason::Unpeer),
        ];

        for frame in frames {
            let encoded = encode(&frame, MAX).unwrap();
            let decoded = decode(&encoded, MAX).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_wire_layout() {
        let encoded = encode(&Frame::Ping { counter: 1 }, MAX).unwrap();
        // length(4) + type(1) + counter(8)
        assert_eq!(encoded.len(), 13);
        assert_eq!(&encoded[..4], &[0, 0, 0, 9]);
        assert_eq!(encoded[4], 0x04);
        assert_eq!(&encoded[5..], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::Ping { counter: 9 }, MAX).unwrap();
        match decode(&encoded[..5], MAX) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::data("t", Value::string(vec![0u8; 1024]));
        match encode(&frame, 64) {
            Err(ProtocolError::FrameTooLarge { .. }) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }

        // Oversized length prefix rejected before buffering the payload.
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        assert!(matches!(
            decode_from(&mut buf, MAX),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_frame_type() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0x7f);
        assert!(matches!(
            decode_from(&mut buf, MAX),
            Err(ProtocolError::UnknownFrameType(0x7f))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::Ping { counter: 1 };
        let frame2 = Frame::data("zeek/events", Value::Count(2));

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf, MAX).unwrap();
        encode_into(&frame2, &mut buf, MAX).unwrap();

        // Feed the buffer one byte at a time.
        let full = buf.clone();
        let mut partial = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in full.iter() {
            partial.put_u8(*byte);
            while let Some(frame) = decode_from(&mut partial, MAX).unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(decoded, vec![frame1, frame2]);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_data_value_error_is_invalid_data() {
        // A DATA frame whose value payload is truncated.
        let good = encode(&Frame::data("t", Value::Count(7)), MAX).unwrap();
        let mut bad = BytesMut::from(&good[..good.len() - 1]);
        // Fix up the length prefix for the shortened payload.
        let len = (bad.len() - LENGTH_PREFIX_SIZE) as u32;
        bad[..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(
            decode_from(&mut bad, MAX),
            Err(ProtocolError::InvalidValue(_))
        ));
    }
}
