//! The message type moved through the fabric.

use std::fmt;
use weft_data::{Topic, Value};

/// A published message: a topic plus a typed payload.
///
/// Cloning is cheap (value containers are reference-counted), which is
/// what fan-out dispatch relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The topic this message was published on.
    pub topic: Topic,
    /// The payload.
    pub value: Value,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(topic: Topic, value: impl Into<Value>) -> Self {
        Self {
            topic,
            value: value.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.topic, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_display() {
        let msg = Message::new("zeek/events".parse().unwrap(), Value::from("oops"));
        assert_eq!(msg.to_string(), "zeek/events: oops");
    }
}
