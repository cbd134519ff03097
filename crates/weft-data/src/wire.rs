//! Binary wire format (v1) for values.
//!
//! Every encoded value starts with a one-byte tag followed by its
//! payload: scalars in big-endian, strings length-prefixed with an
//! unsigned LEB128 varint, containers count-prefixed the same way.
//! Decoding is strict: truncated input, unknown tags, out-of-order or
//! duplicate set/table members, and runaway varints all fail with a
//! specific [`WireError`].

use crate::value::{Port, Protocol, Subnet, Tag, Timespan, Timestamp, Value};
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;

/// Longest accepted varint, in bytes.
pub const MAX_VARINT_LEN: usize = 10;

/// Deepest accepted container nesting.
pub const MAX_DEPTH: usize = 128;

/// Decode failures. All of them map to the `invalid_data` error code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the value did.
    #[error("truncated input")]
    Truncated,

    /// Unknown value tag byte.
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),

    /// Boolean payload other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    BadBoolean(u8),

    /// Unknown address family byte.
    #[error("unknown address family {0:#04x}")]
    UnknownFamily(u8),

    /// Address with the IPv4 family byte but no IPv4-mapped form.
    #[error("malformed IPv4-mapped address")]
    BadAddress,

    /// Subnet prefix longer than the address family allows.
    #[error("subnet prefix {0} too long")]
    BadPrefix(u8),

    /// Unknown port protocol byte.
    #[error("unknown port protocol {0:#04x}")]
    UnknownProtocol(u8),

    /// Set elements not in strictly ascending value order.
    #[error("set elements out of order")]
    UnorderedElements,

    /// Set element repeated.
    #[error("duplicate set element")]
    DuplicateElement,

    /// Table keys not in strictly ascending value order.
    #[error("table keys out of order")]
    UnorderedKeys,

    /// Table key repeated.
    #[error("duplicate table key")]
    DuplicateKey,

    /// Varint did not terminate within [`MAX_VARINT_LEN`] bytes.
    #[error("varint exceeds {MAX_VARINT_LEN} bytes")]
    VarintOverflow,

    /// Containers nested deeper than [`MAX_DEPTH`] levels.
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    /// Bytes left over after the value ended.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Encode a value to a fresh buffer.
#[must_use]
pub fn encode(value: &Value) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.freeze()
}

/// Append the encoding of `value` to `buf`.
pub fn encode_into(value: &Value, buf: &mut BytesMut) {
    buf.put_u8(value.tag() as u8);
    match value {
        Value::None => {}
        Value::Boolean(b) => buf.put_u8(u8::from(*b)),
        Value::Count(n) => buf.put_u64(*n),
        Value::Integer(n) => buf.put_i64(*n),
        Value::Real(r) => buf.put_f64(*r),
        Value::String(s) | Value::EnumValue(s) => {
            put_varint(buf, s.len() as u64);
            buf.put_slice(s);
        }
        Value::Address(a) => put_address(buf, *a),
        Value::Subnet(s) => {
            put_address(buf, s.address());
            buf.put_u8(s.prefix());
        }
        Value::Port(p) => {
            buf.put_u16(p.number());
            buf.put_u8(p.protocol() as u8);
        }
        Value::Timestamp(t) => buf.put_i64(t.0),
        Value::Timespan(t) => buf.put_i64(t.0),
        Value::Set(xs) => {
            put_varint(buf, xs.len() as u64);
            for x in xs.iter() {
                encode_into(x, buf);
            }
        }
        Value::Table(t) => {
            put_varint(buf, t.len() as u64);
            for (k, v) in t.iter() {
                encode_into(k, buf);
                encode_into(v, buf);
            }
        }
        Value::Vector(v) => {
            put_varint(buf, v.len() as u64);
            for x in v.iter() {
                encode_into(x, buf);
            }
        }
    }
}

/// Decode a single value, requiring the input to be fully consumed.
pub fn decode(bytes: &[u8]) -> Result<Value, WireError> {
    let mut reader = Reader::new(bytes);
    let value = decode_value(&mut reader, 0)?;
    reader.finish()?;
    Ok(value)
}

/// Read an unsigned LEB128 varint from the front of `bytes`, returning
/// the value and the number of bytes consumed. Frame codecs use this
/// for their own length fields.
pub fn get_varint(bytes: &[u8]) -> Result<(u64, usize), WireError> {
    let mut reader = Reader::new(bytes);
    let value = reader.varint()?;
    Ok((value, reader.pos()))
}

/// Write an unsigned LEB128 varint.
pub fn put_varint(buf: &mut BytesMut, mut n: u64) {
    loop {
        let low = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.put_u8(low);
            return;
        }
        buf.put_u8(low | 0x80);
    }
}

fn put_address(buf: &mut BytesMut, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            buf.put_u8(0);
            buf.put_slice(&v4.to_ipv6_mapped().octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(1);
            buf.put_slice(&v6.octets());
        }
    }
}

/// Bounds-checked cursor over an input buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// The full input buffer this reader walks.
    pub(crate) fn source(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail with [`WireError::TrailingBytes`] unless everything was read.
    pub(crate) fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, WireError> {
        let b: [u8; 8] = self.take(8)?.try_into().expect("slice length checked");
        Ok(u64::from_be_bytes(b))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, WireError> {
        Ok(self.u64()? as i64)
    }

    pub(crate) fn f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.u64()?))
    }

    /// Read an unsigned LEB128 varint of at most [`MAX_VARINT_LEN`] bytes.
    pub(crate) fn varint(&mut self) -> Result<u64, WireError> {
        let mut result = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8()?;
            // The tenth byte may only contribute the final bit.
            if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
                return Err(WireError::VarintOverflow);
            }
            result |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(WireError::VarintOverflow)
    }

    /// Varint to be used as an element count. Rejects counts that cannot
    /// possibly fit the remaining input (every element is at least one
    /// tag byte), bounding allocations on malformed input.
    pub(crate) fn count(&mut self) -> Result<usize, WireError> {
        let n = self.varint()?;
        if n > self.remaining() as u64 {
            return Err(WireError::Truncated);
        }
        Ok(n as usize)
    }

    pub(crate) fn address(&mut self) -> Result<IpAddr, WireError> {
        let family = self.u8()?;
        let octets: [u8; 16] = self.take(16)?.try_into().expect("slice length checked");
        let v6 = Ipv6Addr::from(octets);
        match family {
            0 => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .ok_or(WireError::BadAddress),
            1 => Ok(IpAddr::V6(v6)),
            other => Err(WireError::UnknownFamily(other)),
        }
    }

    pub(crate) fn subnet(&mut self) -> Result<Subnet, WireError> {
        let addr = self.address()?;
        let prefix = self.u8()?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(WireError::BadPrefix(prefix));
        }
        Ok(Subnet::new(addr, prefix))
    }
}

fn decode_value(r: &mut Reader<'_>, depth: usize) -> Result<Value, WireError> {
    let tag_byte = r.u8()?;
    let tag = Tag::try_from(tag_byte).map_err(WireError::UnknownTag)?;
    match tag {
        Tag::None => Ok(Value::None),
        Tag::Boolean => match r.u8()? {
            0 => Ok(Value::Boolean(false)),
            1 => Ok(Value::Boolean(true)),
            other => Err(WireError::BadBoolean(other)),
        },
        Tag::Count => Ok(Value::Count(r.u64()?)),
        Tag::Integer => Ok(Value::Integer(r.i64()?)),
        Tag::Real => Ok(Value::Real(r.f64()?)),
        Tag::String => {
            let len = r.count()?;
            Ok(Value::String(Bytes::copy_from_slice(r.take(len)?)))
        }
        Tag::Address => Ok(Value::Address(r.address()?)),
        Tag::Subnet => Ok(Value::Subnet(r.subnet()?)),
        Tag::Port => {
            let number = r.u16()?;
            let proto = Protocol::try_from(r.u8()?).map_err(WireError::UnknownProtocol)?;
            Ok(Value::Port(Port::new(number, proto)))
        }
        Tag::Timestamp => Ok(Value::Timestamp(Timestamp(r.i64()?))),
        Tag::Timespan => Ok(Value::Timespan(Timespan(r.i64()?))),
        Tag::EnumValue => {
            let len = r.count()?;
            Ok(Value::EnumValue(Bytes::copy_from_slice(r.take(len)?)))
        }
        Tag::Set => {
            let n = guard_depth(r.count()?, depth)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                let item = decode_value(r, depth + 1)?;
                match items.last().map(|prev: &Value| prev.cmp(&item)) {
                    Some(Ordering::Greater) => return Err(WireError::UnorderedElements),
                    Some(Ordering::Equal) => return Err(WireError::DuplicateElement),
                    _ => items.push(item),
                }
            }
            Ok(Value::set(items))
        }
        Tag::Table => {
            let n = guard_depth(r.count()?, depth)?;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let key = decode_value(r, depth + 1)?;
                let value = decode_value(r, depth + 1)?;
                match entries.last().map(|(prev, _): &(Value, Value)| prev.cmp(&key)) {
                    Some(Ordering::Greater) => return Err(WireError::UnorderedKeys),
                    Some(Ordering::Equal) => return Err(WireError::DuplicateKey),
                    _ => entries.push((key, value)),
                }
            }
            Ok(Value::table(entries))
        }
        Tag::Vector => {
            let n = guard_depth(r.count()?, depth)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(decode_value(r, depth + 1)?);
            }
            Ok(Value::vector(items))
        }
    }
}

pub(crate) fn guard_depth(count: usize, depth: usize) -> Result<usize, WireError> {
    if depth >= MAX_DEPTH {
        Err(WireError::TooDeep)
    } else {
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn round_trip(v: &Value) -> Value {
        let bytes = encode(v);
        let decoded = decode(&bytes).unwrap();
        // Canonical re-encode is byte-identical.
        assert_eq!(encode(&decoded), bytes);
        decoded
    }

    #[test]
    fn test_scalar_round_trips() {
        for v in [
            Value::None,
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Count(u64::MAX),
            Value::Integer(-1),
            Value::Integer(i64::MIN),
            Value::Real(std::f64::consts::PI),
            Value::Real(f64::NAN),
            Value::from(""),
            Value::from("hello"),
            Value::string(&b"\x00\xff"[..]),
            Value::Address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
            Value::Address("2001:db8::1".parse().unwrap()),
            Value::Subnet(Subnet::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8)),
            Value::Port(Port::new(53, Protocol::Udp)),
            Value::Timestamp(Timestamp(-42)),
            Value::Timespan(Timespan(1_000_000_000)),
            Value::enum_value("Notice::LOG"),
        ] {
            assert_eq!(round_trip(&v), v);
        }
    }

    #[test]
    fn test_nested_round_trip() {
        // table{"a": set{1, 2, 3}, "b": vector{port(53, udp), timestamp(0)}}
        let v = Value::table([
            (
                Value::from("a"),
                Value::set([Value::Count(1), Value::Count(2), Value::Count(3)]),
            ),
            (
                Value::from("b"),
                Value::vector([
                    Value::Port(Port::new(53, Protocol::Udp)),
                    Value::Timestamp(Timestamp(0)),
                ]),
            ),
        ]);
        assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn test_equal_values_encode_identically() {
        let a = Value::set([Value::Count(3), Value::Count(1), Value::Count(2)]);
        let b = Value::set([Value::Count(1), Value::Count(2), Value::Count(3)]);
        assert_eq!(a, b);
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn test_wire_layout() {
        let bytes = encode(&Value::Count(1));
        assert_eq!(bytes.as_ref(), &[2, 0, 0, 0, 0, 0, 0, 0, 1]);

        let bytes = encode(&Value::from("hi"));
        assert_eq!(bytes.as_ref(), &[5, 2, b'h', b'i']);

        let bytes = encode(&Value::Port(Port::new(53, Protocol::Udp)));
        assert_eq!(bytes.as_ref(), &[8, 0, 53, 2]);
    }

    #[test]
    fn test_ipv4_mapped_form() {
        let v = Value::Address(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        let bytes = encode(&v);
        assert_eq!(bytes.len(), 1 + 1 + 16);
        assert_eq!(bytes[1], 0); // family byte
        assert_eq!(&bytes[12..], &[0xff, 0xff, 1, 2, 3, 4]);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn test_varint_boundaries() {
        for n in [0u64, 127, 128, 16_383, 16_384, u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, n);
            let mut r = Reader::new(&buf);
            assert_eq!(r.varint().unwrap(), n);
            r.finish().unwrap();
        }
    }

    #[test]
    fn test_varint_overflow() {
        let mut r = Reader::new(&[0x80; 11]);
        assert_eq!(r.varint(), Err(WireError::VarintOverflow));
        // Ten bytes whose last contributes more than one bit.
        let mut bytes = [0x80u8; 10];
        bytes[9] = 0x02;
        let mut r = Reader::new(&bytes);
        assert_eq!(r.varint(), Err(WireError::VarintOverflow));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&Value::table([(Value::from("k"), Value::Count(7))]));
        for len in 0..bytes.len() {
            assert!(decode(&bytes[..len]).is_err(), "accepted prefix of {len}");
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(decode(&[0x1f]), Err(WireError::UnknownTag(0x1f)));
    }

    #[test]
    fn test_duplicate_set_element() {
        // set{count(1), count(1)} encoded by hand
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Set as u8);
        put_varint(&mut buf, 2);
        encode_into(&Value::Count(1), &mut buf);
        encode_into(&Value::Count(1), &mut buf);
        assert_eq!(decode(&buf), Err(WireError::DuplicateElement));
    }

    #[test]
    fn test_unordered_set_elements() {
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Set as u8);
        put_varint(&mut buf, 2);
        encode_into(&Value::Count(2), &mut buf);
        encode_into(&Value::Count(1), &mut buf);
        assert_eq!(decode(&buf), Err(WireError::UnorderedElements));
    }

    #[test]
    fn test_duplicate_table_key() {
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Table as u8);
        put_varint(&mut buf, 2);
        encode_into(&Value::from("k"), &mut buf);
        encode_into(&Value::Count(1), &mut buf);
        encode_into(&Value::from("k"), &mut buf);
        encode_into(&Value::Count(2), &mut buf);
        assert_eq!(decode(&buf), Err(WireError::DuplicateKey));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Value::None).to_vec();
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_absurd_count_rejected_early() {
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Vector as u8);
        put_varint(&mut buf, u64::from(u32::MAX));
        assert_eq!(decode(&buf), Err(WireError::Truncated));
    }

    #[test]
    fn test_nesting_limit() {
        let mut v = Value::vector([]);
        for _ in 0..MAX_DEPTH + 1 {
            v = Value::vector([v]);
        }
        let bytes = encode(&v);
        assert_eq!(decode(&bytes), Err(WireError::TooDeep));
    }

    #[test]
    fn test_bad_boolean() {
        assert_eq!(decode(&[1, 2]), Err(WireError::BadBoolean(2)));
    }

    #[test]
    fn test_bad_subnet_prefix() {
        let mut bytes = encode(&Value::Subnet(Subnet::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)),
            8,
        )))
        .to_vec();
        *bytes.last_mut().unwrap() = 33; // one past the IPv4 maximum
        assert_eq!(decode(&bytes), Err(WireError::BadPrefix(33)));
    }
}
