//! The typed value model carried as message payloads.
//!
//! A [`Value`] is a self-describing tagged union designed for
//! cross-language interchange: scalars, network primitives, and nested
//! containers. Values have a total order (tag index first, then payload)
//! so that sets and table keys are well-defined even for reals.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An ordered set of values.
pub type Set = BTreeSet<Value>;

/// An ordered map from values to values.
pub type Table = BTreeMap<Value, Value>;

/// An ordered sequence of values.
pub type Vector = Vec<Value>;

/// Type tag of a value. The discriminants double as wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tag {
    None = 0,
    Boolean = 1,
    Count = 2,
    Integer = 3,
    Real = 4,
    String = 5,
    Address = 6,
    Subnet = 7,
    Port = 8,
    Timestamp = 9,
    Timespan = 10,
    EnumValue = 11,
    Set = 12,
    Table = 13,
    Vector = 14,
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Tag::None),
            1 => Ok(Tag::Boolean),
            2 => Ok(Tag::Count),
            3 => Ok(Tag::Integer),
            4 => Ok(Tag::Real),
            5 => Ok(Tag::String),
            6 => Ok(Tag::Address),
            7 => Ok(Tag::Subnet),
            8 => Ok(Tag::Port),
            9 => Ok(Tag::Timestamp),
            10 => Ok(Tag::Timespan),
            11 => Ok(Tag::EnumValue),
            12 => Ok(Tag::Set),
            13 => Ok(Tag::Table),
            14 => Ok(Tag::Vector),
            other => Err(other),
        }
    }
}

/// Transport protocol associated with a [`Port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Protocol {
    #[default]
    Unknown = 0,
    Tcp = 1,
    Udp = 2,
    Icmp = 3,
}

impl TryFrom<u8> for Protocol {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Protocol::Unknown),
            1 => Ok(Protocol::Tcp),
            2 => Ok(Protocol::Udp),
            3 => Ok(Protocol::Icmp),
            other => Err(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Unknown => write!(f, "?"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
        }
    }
}

/// A transport-layer port. Ordered by number, then protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Port {
    number: u16,
    protocol: Protocol,
}

impl Port {
    /// Create a new port.
    #[must_use]
    pub const fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }

    /// The port number.
    #[must_use]
    pub const fn number(&self) -> u16 {
        self.number
    }

    /// The transport protocol.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

impl FromStr for Port {
    type Err = &'static str;

    /// Parse `"53/udp"` notation. A bare number defaults to TCP.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, proto) = match s.split_once('/') {
            Some((num, proto)) => {
                let proto = match proto {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    "icmp" => Protocol::Icmp,
                    "?" => Protocol::Unknown,
                    _ => return Err("unknown protocol"),
                };
                (num, proto)
            }
            None => (s, Protocol::Tcp),
        };
        let number = num.parse().map_err(|_| "invalid port number")?;
        Ok(Port::new(number, proto))
    }
}

/// An IP subnet: base address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    address: IpAddr,
    prefix: u8,
}

impl Subnet {
    /// Create a subnet. The prefix length is clamped to the address
    /// family maximum (32 for IPv4, 128 for IPv6).
    #[must_use]
    pub fn new(address: IpAddr, prefix: u8) -> Self {
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self {
            address,
            prefix: prefix.min(max),
        }
    }

    /// The base address.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// The prefix length in bits.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The current wall-clock time.
    ///
    /// Saturates in the (distant) future where nanoseconds no longer fit
    /// a signed 64-bit integer.
    #[must_use]
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Nanoseconds since the epoch.
    #[must_use]
    pub const fn nanos(&self) -> i64 {
        self.0
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            Err(e) => Timestamp(
                i64::try_from(e.duration().as_nanos())
                    .map(|n| -n)
                    .unwrap_or(i64::MIN),
            ),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A signed duration in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespan(pub i64);

impl Timespan {
    /// Nanoseconds.
    #[must_use]
    pub const fn nanos(&self) -> i64 {
        self.0
    }
}

impl From<Duration> for Timespan {
    fn from(d: Duration) -> Self {
        Timespan(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A dynamically typed value.
///
/// String and enum payloads are raw byte sequences ([`Bytes`]): the wire
/// format does not require valid UTF-8 and payloads must round-trip
/// exactly. Containers are reference-counted; cloning a value never
/// deep-copies container contents, and mutation through the `*_mut`
/// accessors copies on write when the container is shared.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The null sentinel.
    #[default]
    None,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    String(Bytes),
    Address(IpAddr),
    Subnet(Subnet),
    Port(Port),
    Timestamp(Timestamp),
    Timespan(Timespan),
    EnumValue(Bytes),
    Set(Arc<Set>),
    Table(Arc<Table>),
    Vector(Arc<Vector>),
}

impl Value {
    /// The type tag of this value.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Value::None => Tag::None,
            Value::Boolean(_) => Tag::Boolean,
            Value::Count(_) => Tag::Count,
            Value::Integer(_) => Tag::Integer,
            Value::Real(_) => Tag::Real,
            Value::String(_) => Tag::String,
            Value::Address(_) => Tag::Address,
            Value::Subnet(_) => Tag::Subnet,
            Value::Port(_) => Tag::Port,
            Value::Timestamp(_) => Tag::Timestamp,
            Value::Timespan(_) => Tag::Timespan,
            Value::EnumValue(_) => Tag::EnumValue,
            Value::Set(_) => Tag::Set,
            Value::Table(_) => Tag::Table,
            Value::Vector(_) => Tag::Vector,
        }
    }

    /// Build a string value from raw bytes.
    #[must_use]
    pub fn string(bytes: impl Into<Bytes>) -> Self {
        Value::String(bytes.into())
    }

    /// Build an enum value from its name.
    #[must_use]
    pub fn enum_value(name: impl Into<Bytes>) -> Self {
        Value::EnumValue(name.into())
    }

    /// Build a set, dropping duplicates.
    #[must_use]
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(Arc::new(items.into_iter().collect()))
    }

    /// Build a table; later entries win on key collision.
    #[must_use]
    pub fn table(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Table(Arc::new(entries.into_iter().collect()))
    }

    /// Build a vector.
    #[must_use]
    pub fn vector(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Vector(Arc::new(items.into_iter().collect()))
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Value::Count(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// The raw bytes of a string value.
    #[must_use]
    pub fn as_string_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The string payload as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_address(&self) -> Option<IpAddr> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_subnet(&self) -> Option<Subnet> {
        match self {
            Value::Subnet(s) => Some(*s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_port(&self) -> Option<Port> {
        match self {
            Value::Port(p) => Some(*p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timespan(&self) -> Option<Timespan> {
        match self {
            Value::Timespan(t) => Some(*t),
            _ => None,
        }
    }

    /// The name of an enum value as UTF-8, if valid.
    #[must_use]
    pub fn as_enum_name(&self) -> Option<&str> {
        match self {
            Value::EnumValue(n) => std::str::from_utf8(n).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable access to a set, copying on write when shared.
    pub fn as_set_mut(&mut self) -> Option<&mut Set> {
        match self {
            Value::Set(s) => Some(Arc::make_mut(s)),
            _ => None,
        }
    }

    /// Mutable access to a table, copying on write when shared.
    pub fn as_table_mut(&mut self) -> Option<&mut Table> {
        match self {
            Value::Table(t) => Some(Arc::make_mut(t)),
            _ => None,
        }
    }

    /// Mutable access to a vector, copying on write when shared.
    pub fn as_vector_mut(&mut self) -> Option<&mut Vector> {
        match self {
            Value::Vector(v) => Some(Arc::make_mut(v)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Count(a), Count(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            // Reals compare by bit pattern so NaN equals itself and
            // containers of reals stay coherent.
            (Real(a), Real(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Address(a), Address(b)) => a == b,
            (Subnet(a), Subnet(b)) => a == b,
            (Port(a), Port(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Timespan(a), Timespan(b)) => a == b,
            (EnumValue(a), EnumValue(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (Table(a), Table(b)) => a == b,
            (Vector(a), Vector(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Ord for Value {
    /// Total order: tag index first, then payload natural order.
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Port(a), Port(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Timespan(a), Timespan(b)) => a.cmp(b),
            (EnumValue(a), EnumValue(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Table(a), Table(b)) => a.cmp(b),
            (Vector(a), Vector(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Count(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Bytes::from(s.into_bytes()))
    }
}

impl From<IpAddr> for Value {
    fn from(a: IpAddr) -> Self {
        Value::Address(a)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(a: Ipv4Addr) -> Self {
        Value::Address(IpAddr::V4(a))
    }
}

impl From<Ipv6Addr> for Value {
    fn from(a: Ipv6Addr) -> Self {
        Value::Address(IpAddr::V6(a))
    }
}

impl From<Subnet> for Value {
    fn from(s: Subnet) -> Self {
        Value::Subnet(s)
    }
}

impl From<Port> for Value {
    fn from(p: Port) -> Self {
        Value::Port(p)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Timespan> for Value {
    fn from(t: Timespan) -> Self {
        Value::Timespan(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Vector(Arc::new(v))
    }
}

impl From<Set> for Value {
    fn from(s: Set) -> Self {
        Value::Set(Arc::new(s))
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(Arc::new(t))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::vector(iter)
    }
}

fn write_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    match std::str::from_utf8(bytes) {
        Ok(s) => write!(f, "{s}"),
        Err(_) => {
            for b in bytes {
                write!(f, "\\x{b:02x}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "nil"),
            Value::Boolean(true) => write!(f, "T"),
            Value::Boolean(false) => write!(f, "F"),
            Value::Count(n) => write!(f, "{n}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::String(s) => write_bytes(f, s),
            Value::Address(a) => write!(f, "{a}"),
            Value::Subnet(s) => write!(f, "{s}"),
            Value::Port(p) => write!(f, "{p}"),
            Value::Timestamp(t) => write!(f, "{t}"),
            Value::Timespan(t) => write!(f, "{t}"),
            Value::EnumValue(n) => write_bytes(f, n),
            Value::Set(xs) => {
                write!(f, "{{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "}}")
            }
            Value::Table(t) => {
                write!(f, "{{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                write!(f, "}}")
            }
            Value::Vector(v) => {
                write!(f, "(")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
        }
    }
}
