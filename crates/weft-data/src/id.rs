//! Endpoint identity.

use std::fmt;
use std::str::FromStr;

/// A 128-bit opaque endpoint identity.
///
/// Generated once at endpoint construction and stable for the
/// endpoint's lifetime. Carried in the peering handshake so peers can
/// deduplicate connections and detect self-loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EndpointId([u8; 16]);

impl EndpointId {
    /// Wrap raw identity bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw identity bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this is the all-zero placeholder identity.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl From<[u8; 16]> for EndpointId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            // UUID-style grouping for log readability.
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for EndpointId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err("endpoint id must be 32 hex digits");
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let digits = std::str::from_utf8(chunk).map_err(|_| "invalid hex")?;
            bytes[i] = u8::from_str_radix(digits, 16).map_err(|_| "invalid hex")?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let id = EndpointId::from_bytes([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ]);
        let text = id.to_string();
        assert_eq!(text, "01020304-0506-0708-090a-0b0c0d0e0f10");
        assert_eq!(text.parse::<EndpointId>().unwrap(), id);
    }

    #[test]
    fn test_nil() {
        assert!(EndpointId::default().is_nil());
        assert!(!EndpointId::from_bytes([1; 16]).is_nil());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("xyz".parse::<EndpointId>().is_err());
        assert!("0102".parse::<EndpointId>().is_err());
    }
}
