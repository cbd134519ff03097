//! Arena-backed, non-owning views over encoded values.
//!
//! [`ValueArena::decode`] performs a shallow decode: one linear pass
//! that never copies payload bytes. Container nodes reference contiguous
//! runs of arena slots (element counts precede elements on the wire, so
//! a container's children can be reserved up front), and string payloads
//! are spans into the source buffer. The resulting [`ValueView`] tree is
//! comparable against owning [`Value`]s and other views; conversion to
//! an owning value is explicit via [`ValueView::to_value`].
//!
//! The borrow checker enforces the memory contract: views cannot outlive
//! the arena or the source buffer, and the arena cannot be reused while
//! views into it are alive.

use crate::value::{Port, Protocol, Subnet, Tag, Timespan, Timestamp, Value};
use crate::wire::{guard_depth, Reader, WireError};
use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy)]
struct Node {
    tag: Tag,
    payload: Payload,
}

#[derive(Debug, Clone, Copy)]
enum Payload {
    Empty,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    /// Span into the source buffer (string and enum payloads).
    Span { start: u32, len: u32 },
    Address(IpAddr),
    Subnet(Subnet),
    Port(Port),
    /// Timestamp or timespan nanoseconds; the tag disambiguates.
    Nanos(i64),
    /// Contiguous run of child slots. Tables interleave keys and values,
    /// so `count` is twice the entry count there.
    Items { start: u32, count: u32 },
}

const PLACEHOLDER: Node = Node {
    tag: Tag::None,
    payload: Payload::Empty,
};

/// Node storage for shallow-decoded values. Reusable: each call to
/// [`decode`](ValueArena::decode) starts from an empty arena.
#[derive(Debug, Default)]
pub struct ValueArena {
    nodes: Vec<Node>,
}

impl ValueArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-decode `bytes`, requiring full consumption.
    ///
    /// The returned view borrows both the arena and the buffer; neither
    /// may be touched until it is dropped.
    ///
    /// # Errors
    ///
    /// Fails with the same [`WireError`]s as the deep decoder.
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> Result<ValueView<'a>, WireError> {
        self.nodes.clear();
        self.nodes.push(PLACEHOLDER);
        let mut reader = Reader::new(bytes);
        decode_node(&mut self.nodes, &mut reader, 0, 0)?;
        reader.finish()?;
        Ok(ValueView {
            arena: self,
            bytes,
            index: 0,
        })
    }
}

fn decode_node(
    nodes: &mut Vec<Node>,
    r: &mut Reader<'_>,
    slot: usize,
    depth: usize,
) -> Result<(), WireError> {
    let tag = Tag::try_from(r.u8()?).map_err(WireError::UnknownTag)?;
    let payload = match tag {
        Tag::None => Payload::Empty,
        Tag::Boolean => match r.u8()? {
            0 => Payload::Boolean(false),
            1 => Payload::Boolean(true),
            other => return Err(WireError::BadBoolean(other)),
        },
        Tag::Count => Payload::Count(r.u64()?),
        Tag::Integer => Payload::Integer(r.i64()?),
        Tag::Real => Payload::Real(r.f64()?),
        Tag::String | Tag::EnumValue => {
            let len = r.count()?;
            let start = r.pos();
            r.take(len)?;
            Payload::Span {
                start: start as u32,
                len: len as u32,
            }
        }
        Tag::Address => Payload::Address(r.address()?),
        Tag::Subnet => Payload::Subnet(r.subnet()?),
        Tag::Port => {
            let number = r.u16()?;
            let proto = Protocol::try_from(r.u8()?).map_err(WireError::UnknownProtocol)?;
            Payload::Port(Port::new(number, proto))
        }
        Tag::Timestamp | Tag::Timespan => Payload::Nanos(r.i64()?),
        Tag::Set | Tag::Vector => {
            let n = guard_depth(r.count()?, depth)?;
            let start = nodes.len();
            nodes.resize(start + n, PLACEHOLDER);
            for i in 0..n {
                decode_node(nodes, r, start + i, depth + 1)?;
                if tag == Tag::Set && i > 0 {
                    match cmp_between(
                        nodes,
                        r.source(),
                        (start + i - 1) as u32,
                        nodes,
                        r.source(),
                        (start + i) as u32,
                    ) {
                        Ordering::Less => {}
                        Ordering::Equal => return Err(WireError::DuplicateElement),
                        Ordering::Greater => return Err(WireError::UnorderedElements),
                    }
                }
            }
            Payload::Items {
                start: start as u32,
                count: n as u32,
            }
        }
        Tag::Table => {
            let n = guard_depth(r.count()?, depth)?;
            let start = nodes.len();
            nodes.resize(start + 2 * n, PLACEHOLDER);
            for i in 0..n {
                decode_node(nodes, r, start + 2 * i, depth + 1)?;
                decode_node(nodes, r, start + 2 * i + 1, depth + 1)?;
                if i > 0 {
                    match cmp_between(
                        nodes,
                        r.source(),
                        (start + 2 * (i - 1)) as u32,
                        nodes,
                        r.source(),
                        (start + 2 * i) as u32,
                    ) {
                        Ordering::Less => {}
                        Ordering::Equal => return Err(WireError::DuplicateKey),
                        Ordering::Greater => return Err(WireError::UnorderedKeys),
                    }
                }
            }
            Payload::Items {
                start: start as u32,
                count: (2 * n) as u32,
            }
        }
    };
    nodes[slot] = Node { tag, payload };
    Ok(())
}

fn span<'a>(bytes: &'a [u8], start: u32, len: u32) -> &'a [u8] {
    &bytes[start as usize..(start + len) as usize]
}

/// Compare two nodes that may live in different arenas.
fn cmp_between(
    an: &[Node],
    ab: &[u8],
    ai: u32,
    bn: &[Node],
    bb: &[u8],
    bi: u32,
) -> Ordering {
    let a = an[ai as usize];
    let b = bn[bi as usize];
    a.tag.cmp(&b.tag).then_with(|| match (a.payload, b.payload) {
        (Payload::Empty, Payload::Empty) => Ordering::Equal,
        (Payload::Boolean(x), Payload::Boolean(y)) => x.cmp(&y),
        (Payload::Count(x), Payload::Count(y)) => x.cmp(&y),
        (Payload::Integer(x), Payload::Integer(y)) => x.cmp(&y),
        (Payload::Real(x), Payload::Real(y)) => x.total_cmp(&y),
        (Payload::Span { start: s1, len: l1 }, Payload::Span { start: s2, len: l2 }) => {
            span(ab, s1, l1).cmp(span(bb, s2, l2))
        }
        (Payload::Address(x), Payload::Address(y)) => x.cmp(&y),
        (Payload::Subnet(x), Payload::Subnet(y)) => x.cmp(&y),
        (Payload::Port(x), Payload::Port(y)) => x.cmp(&y),
        (Payload::Nanos(x), Payload::Nanos(y)) => x.cmp(&y),
        (
            Payload::Items { start: s1, count: c1 },
            Payload::Items { start: s2, count: c2 },
        ) => {
            for i in 0..c1.min(c2) {
                let ord = cmp_between(an, ab, s1 + i, bn, bb, s2 + i);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            c1.cmp(&c2)
        }
        // Equal tags imply the same payload shape.
        _ => Ordering::Equal,
    })
}

fn view_eq_value(nodes: &[Node], bytes: &[u8], index: u32, value: &Value) -> bool {
    let node = nodes[index as usize];
    if node.tag != value.tag() {
        return false;
    }
    match (node.payload, value) {
        (Payload::Empty, Value::None) => true,
        (Payload::Boolean(x), Value::Boolean(y)) => x == *y,
        (Payload::Count(x), Value::Count(y)) => x == *y,
        (Payload::Integer(x), Value::Integer(y)) => x == *y,
        (Payload::Real(x), Value::Real(y)) => x.to_bits() == y.to_bits(),
        (Payload::Span { start, len }, Value::String(s) | Value::EnumValue(s)) => {
            span(bytes, start, len) == s.as_ref()
        }
        (Payload::Address(x), Value::Address(y)) => x == *y,
        (Payload::Subnet(x), Value::Subnet(y)) => x == *y,
        (Payload::Port(x), Value::Port(y)) => x == *y,
        (Payload::Nanos(x), Value::Timestamp(Timestamp(y))) => x == *y,
        (Payload::Nanos(x), Value::Timespan(Timespan(y))) => x == *y,
        (Payload::Items { start, count }, Value::Set(xs)) => {
            count as usize == xs.len()
                && xs
                    .iter()
                    .enumerate()
                    .all(|(i, x)| view_eq_value(nodes, bytes, start + i as u32, x))
        }
        (Payload::Items { start, count }, Value::Vector(xs)) => {
            count as usize == xs.len()
                && xs
                    .iter()
                    .enumerate()
                    .all(|(i, x)| view_eq_value(nodes, bytes, start + i as u32, x))
        }
        (Payload::Items { start, count }, Value::Table(t)) => {
            count as usize == 2 * t.len()
                && t.iter().enumerate().all(|(i, (k, v))| {
                    view_eq_value(nodes, bytes, start + 2 * i as u32, k)
                        && view_eq_value(nodes, bytes, start + 2 * i as u32 + 1, v)
                })
        }
        _ => false,
    }
}

/// A non-owning view of a decoded value.
#[derive(Clone, Copy)]
pub struct ValueView<'a> {
    arena: &'a ValueArena,
    bytes: &'a [u8],
    index: u32,
}

impl<'a> ValueView<'a> {
    fn node(&self) -> Node {
        self.arena.nodes[self.index as usize]
    }

    fn at(&self, index: u32) -> ValueView<'a> {
        ValueView { index, ..*self }
    }

    /// The type tag of the viewed value.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.node().tag
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.tag() == Tag::None
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.node().payload {
            Payload::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self.node().payload {
            Payload::Count(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self.node().payload {
            Payload::Integer(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_real(&self) -> Option<f64> {
        match self.node().payload {
            Payload::Real(r) => Some(r),
            _ => None,
        }
    }

    /// String payload bytes, borrowed from the source buffer.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match (self.tag(), self.node().payload) {
            (Tag::String, Payload::Span { start, len }) => Some(span(self.bytes, start, len)),
            _ => None,
        }
    }

    /// String payload as UTF-8, if valid.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    /// Enum name bytes, borrowed from the source buffer.
    #[must_use]
    pub fn as_enum_bytes(&self) -> Option<&'a [u8]> {
        match (self.tag(), self.node().payload) {
            (Tag::EnumValue, Payload::Span { start, len }) => Some(span(self.bytes, start, len)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_address(&self) -> Option<IpAddr> {
        match self.node().payload {
            Payload::Address(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_subnet(&self) -> Option<Subnet> {
        match self.node().payload {
            Payload::Subnet(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_port(&self) -> Option<Port> {
        match self.node().payload {
            Payload::Port(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match (self.tag(), self.node().payload) {
            (Tag::Timestamp, Payload::Nanos(n)) => Some(Timestamp(n)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timespan(&self) -> Option<Timespan> {
        match (self.tag(), self.node().payload) {
            (Tag::Timespan, Payload::Nanos(n)) => Some(Timespan(n)),
            _ => None,
        }
    }

    /// Number of elements in a container (entries for tables); 0 for
    /// scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        match (self.tag(), self.node().payload) {
            (Tag::Table, Payload::Items { count, .. }) => count as usize / 2,
            (_, Payload::Items { count, .. }) => count as usize,
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the elements of a set or vector. Empty for other tags.
    #[must_use]
    pub fn items(&self) -> Items<'a> {
        match (self.tag(), self.node().payload) {
            (Tag::Set | Tag::Vector, Payload::Items { start, count }) => Items {
                view: *self,
                next: start,
                end: start + count,
            },
            _ => Items {
                view: *self,
                next: 0,
                end: 0,
            },
        }
    }

    /// Iterate the key/value entries of a table. Empty for other tags.
    #[must_use]
    pub fn entries(&self) -> Entries<'a> {
        match (self.tag(), self.node().payload) {
            (Tag::Table, Payload::Items { start, count }) => Entries {
                view: *self,
                next: start,
                end: start + count,
            },
            _ => Entries {
                view: *self,
                next: 0,
                end: 0,
            },
        }
    }

    /// Convert to an owning [`Value`], copying payload bytes.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match (self.tag(), self.node().payload) {
            (Tag::None, _) => Value::None,
            (_, Payload::Boolean(b)) => Value::Boolean(b),
            (_, Payload::Count(n)) => Value::Count(n),
            (_, Payload::Integer(n)) => Value::Integer(n),
            (_, Payload::Real(r)) => Value::Real(r),
            (Tag::String, Payload::Span { start, len }) => {
                Value::String(Bytes::copy_from_slice(span(self.bytes, start, len)))
            }
            (Tag::EnumValue, Payload::Span { start, len }) => {
                Value::EnumValue(Bytes::copy_from_slice(span(self.bytes, start, len)))
            }
            (_, Payload::Address(a)) => Value::Address(a),
            (_, Payload::Subnet(s)) => Value::Subnet(s),
            (_, Payload::Port(p)) => Value::Port(p),
            (Tag::Timestamp, Payload::Nanos(n)) => Value::Timestamp(Timestamp(n)),
            (Tag::Timespan, Payload::Nanos(n)) => Value::Timespan(Timespan(n)),
            (Tag::Set, _) => Value::set(self.items().map(|v| v.to_value())),
            (Tag::Vector, _) => Value::vector(self.items().map(|v| v.to_value())),
            (Tag::Table, _) => {
                Value::table(self.entries().map(|(k, v)| (k.to_value(), v.to_value())))
            }
            _ => Value::None,
        }
    }
}

impl PartialEq for ValueView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ValueView<'_> {}

impl Ord for ValueView<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_between(
            &self.arena.nodes,
            self.bytes,
            self.index,
            &other.arena.nodes,
            other.bytes,
            other.index,
        )
    }
}

impl PartialOrd for ValueView<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq<Value> for ValueView<'_> {
    fn eq(&self, other: &Value) -> bool {
        view_eq_value(&self.arena.nodes, self.bytes, self.index, other)
    }
}

impl PartialEq<ValueView<'_>> for Value {
    fn eq(&self, other: &ValueView<'_>) -> bool {
        other == self
    }
}

impl fmt::Debug for ValueView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_value().fmt(f)
    }
}

/// Iterator over set/vector elements.
pub struct Items<'a> {
    view: ValueView<'a>,
    next: u32,
    end: u32,
}

impl<'a> Iterator for Items<'a> {
    type Item = ValueView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let item = self.view.at(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.end - self.next) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Items<'_> {}

/// Iterator over table entries.
pub struct Entries<'a> {
    view: ValueView<'a>,
    next: u32,
    end: u32,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (ValueView<'a>, ValueView<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let entry = (self.view.at(self.next), self.view.at(self.next + 1));
        self.next += 2;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = ((self.end - self.next) / 2) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Entries<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode};

    fn sample() -> Value {
        Value::table([
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
        ])
    }

    #[test]
    fn test_view_matches_deep_decode() {
        let bytes = encode(&sample());
        let deep = decode(&bytes).unwrap();
        let mut arena = ValueArena::new();
        let view = arena.decode(&bytes).unwrap();
        assert_eq!(view, deep);
        assert_eq!(deep, view);
        assert_eq!(view.to_value(), deep);
    }

    #[test]
    fn test_view_zero_copy_strings() {
        let bytes = encode(&Value::from("zeek"));
        let mut arena = ValueArena::new();
        let view = arena.decode(&bytes).unwrap();
        let payload = view.as_bytes().unwrap();
        assert_eq!(payload, b"zeek");
        // The payload slice points into the encoded buffer itself.
        let range = bytes.as_ptr() as usize..bytes.as_ptr() as usize + bytes.len();
        assert!(range.contains(&(payload.as_ptr() as usize)));
    }

    #[test]
    fn test_view_container_access() {
        let bytes = encode(&sample());
        let mut arena = ValueArena::new();
        let view = arena.decode(&bytes).unwrap();
        assert_eq!(view.tag(), Tag::Table);
        assert_eq!(view.len(), 2);

        let (key, set) = view.entries().next().unwrap();
        assert_eq!(key.as_str(), Some("a"));
        assert_eq!(set.len(), 3);
        let counts: Vec<_> = set.items().map(|v| v.as_count().unwrap()).collect();
        assert_eq!(counts, [1, 2, 3]);

        let (_, vector) = view.entries().nth(1).unwrap();
        assert_eq!(
            vector.items().next().unwrap().as_port(),
            Some(Port::new(53, Protocol::Udp))
        );
    }

    #[test]
    fn test_view_rejects_what_deep_rejects() {
        let good = encode(&sample());
        let mut arena = ValueArena::new();
        for len in 0..good.len() {
            assert!(arena.decode(&good[..len]).is_err());
        }
        assert!(arena.decode(&[0x1f]).is_err());
    }

    #[test]
    fn test_view_ordering_across_arenas() {
        let a_bytes = encode(&Value::Count(1));
        let b_bytes = encode(&Value::Count(2));
        let mut a_arena = ValueArena::new();
        let mut b_arena = ValueArena::new();
        let a = a_arena.decode(&a_bytes).unwrap();
        let b = b_arena.decode(&b_bytes).unwrap();
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_arena_reuse() {
        let mut arena = ValueArena::new();
        let first = encode(&sample());
        {
            let view = arena.decode(&first).unwrap();
            assert_eq!(view.len(), 2);
        }
        let second = encode(&Value::Count(9));
        let view = arena.decode(&second).unwrap();
        assert_eq!(view.as_count(), Some(9));
    }

    #[test]
    fn test_view_detects_duplicate_set_element() {
        use bytes::{BufMut, BytesMut};
        let mut buf = BytesMut::new();
        buf.put_u8(Tag::Set as u8);
        crate::wire::put_varint(&mut buf, 2);
        crate::wire::encode_into(&Value::Count(5), &mut buf);
        crate::wire::encode_into(&Value::Count(5), &mut buf);
        let mut arena = ValueArena::new();
        assert_eq!(
            arena.decode(&buf).err(),
            Some(WireError::DuplicateElement)
        );
    }

    #[test]
    fn test_non_utf8_string_views() {
        let bytes = encode(&Value::string(&b"\xff"[..]));
        let mut arena = ValueArena::new();
        let view = arena.decode(&bytes).unwrap();
        assert_eq!(view.as_str(), None);
        assert_eq!(view.as_bytes(), Some(&b"\xff"[..]));
        assert_eq!(view.to_value(), Value::string(&b"\xff"[..]));
    }
}
