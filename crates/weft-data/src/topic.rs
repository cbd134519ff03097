//! Hierarchical topics and prefix filters.
//!
//! A topic is a `/`-separated string naming a logical stream. A filter
//! is a canonical set of topic prefixes: sorted, with no entry being a
//! prefix of another. Matching is on `/` boundaries only, so the filter
//! entry `a/b` covers `a/b` and `a/b/c` but never `a/bx`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Topic segment separator.
pub const SEP: char = '/';

/// Longest accepted topic, in bytes.
pub const MAX_TOPIC_LEN: usize = 512;

/// Topic validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,

    #[error("topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,

    #[error("topic contains control characters")]
    InvalidCharacters,
}

/// A `/`-separated topic string. Trailing separators are trimmed on
/// construction so `zeek/events/` and `zeek/events` name the same
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(String);

impl Topic {
    /// Validate and normalize a topic string.
    ///
    /// # Errors
    ///
    /// Rejects empty topics (after trimming trailing separators),
    /// topics longer than [`MAX_TOPIC_LEN`] bytes, and topics with
    /// control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, TopicError> {
        let mut name = name.into();
        name.truncate(name.trim_end_matches(SEP).len());
        if name.is_empty() {
            return Err(TopicError::Empty);
        }
        if name.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong);
        }
        if name.chars().any(char::is_control) {
            return Err(TopicError::InvalidCharacters);
        }
        Ok(Topic(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this topic is a prefix of `other` on `/` boundaries:
    /// `other == self` or `other` starts with `self` followed by `/`.
    #[must_use]
    pub fn prefix_of(&self, other: &str) -> bool {
        match other.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(SEP),
            None => false,
        }
    }

    /// The `/`-separated segments of the topic.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEP).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::new(s)
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Topic::new(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Topic::new(s)
    }
}

/// A canonical set of topic prefixes.
///
/// Invariant: entries are sorted and no entry is a prefix of another.
/// Inserting a topic already covered by the filter is a no-op; inserting
/// a topic that covers existing entries replaces them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    entries: Vec<Topic>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a topic prefix. Returns `false` if the filter already
    /// covered it (the filter is unchanged in that case).
    pub fn insert(&mut self, topic: Topic) -> bool {
        if self.covers(topic.as_str()) {
            return false;
        }
        self.entries.retain(|existing| !topic.prefix_of(existing.as_str()));
        // Not present: covers() above already matches exact entries.
        let pos = match self.entries.binary_search(&topic) {
            Ok(pos) | Err(pos) => pos,
        };
        self.entries.insert(pos, topic);
        true
    }

    /// Remove an exact entry. Topics merely covered by an entry are not
    /// removed.
    pub fn remove(&mut self, topic: &Topic) -> bool {
        match self.entries.binary_search(topic) {
            Ok(pos) => {
                self.entries.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Whether some entry is a prefix of `topic` on `/` boundaries.
    #[must_use]
    pub fn covers(&self, topic: &str) -> bool {
        self.entries.iter().any(|p| p.prefix_of(topic))
    }

    /// Union with another filter, re-canonicalizing.
    pub fn merge(&mut self, other: &Filter) {
        for topic in &other.entries {
            self.insert(topic.clone());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The canonical entries, sorted.
    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.entries.iter()
    }
}

impl FromIterator<Topic> for Filter {
    fn from_iter<I: IntoIterator<Item = Topic>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for topic in iter {
            filter.insert(topic);
        }
        filter
    }
}

impl From<Topic> for Filter {
    fn from(topic: Topic) -> Self {
        Filter::from_iter([topic])
    }
}

impl IntoIterator for Filter {
    type Item = Topic;
    type IntoIter = std::vec::IntoIter<Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, topic) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{topic}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::new(s).unwrap()
    }

    #[test]
    fn test_topic_validation() {
        assert!(Topic::new("zeek/events").is_ok());
        assert!(Topic::new("").is_err());
        assert!(Topic::new("///").is_err());
        assert!(Topic::new("a\nb").is_err());
        assert!(Topic::new("x".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }

    #[test]
    fn test_topic_normalization() {
        assert_eq!(topic("zeek/events/"), topic("zeek/events"));
        assert_eq!(topic("zeek/events//").as_str(), "zeek/events");
    }

    #[test]
    fn test_prefix_boundaries() {
        let t = topic("zeek/events");
        assert!(t.prefix_of("zeek/events"));
        assert!(t.prefix_of("zeek/events/errors"));
        assert!(t.prefix_of("zeek/events/errors/deep"));
        assert!(!t.prefix_of("zeek/eventsx"));
        assert!(!t.prefix_of("zeek"));
        assert!(!t.prefix_of("other/zeek/events"));
    }

    #[test]
    fn test_prefix_matrix() {
        // zeek covers everything below it, siblings do not cross.
        let zeek = topic("zeek");
        let events = topic("zeek/events");
        let debug = topic("zeek/events/debugging");
        let stores = topic("zeek/stores");
        for t in ["zeek", "zeek/events", "zeek/events/debugging", "zeek/stores"] {
            assert!(zeek.prefix_of(t));
        }
        assert!(events.prefix_of("zeek/events/debugging"));
        assert!(!events.prefix_of("zeek"));
        assert!(!events.prefix_of("zeek/stores"));
        assert!(debug.prefix_of("zeek/events/debugging"));
        assert!(!debug.prefix_of("zeek/events"));
        assert!(!stores.prefix_of("zeek/events"));
    }

    #[test]
    fn test_filter_canonicalization() {
        // {a/b, a/b/c} canonicalizes to {a/b}
        let filter: Filter = [topic("a/b"), topic("a/b/c")].into_iter().collect();
        assert_eq!(filter.topics(), &[topic("a/b")]);

        // Insertion order does not matter.
        let filter: Filter = [topic("a/b/c"), topic("a/b")].into_iter().collect();
        assert_eq!(filter.topics(), &[topic("a/b")]);
    }

    #[test]
    fn test_filter_covers() {
        let filter: Filter = [topic("a/b"), topic("a/b/c")].into_iter().collect();
        assert!(filter.covers("a/b"));
        assert!(filter.covers("a/b/c/d"));
        assert!(!filter.covers("a/bx"));
        assert!(!filter.covers("a"));
    }

    #[test]
    fn test_filter_insert_reports_coverage() {
        let mut filter = Filter::new();
        assert!(filter.insert(topic("a/b")));
        assert!(!filter.insert(topic("a/b/c")));
        assert!(!filter.insert(topic("a/b")));
        assert!(filter.insert(topic("a/c")));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_filter_insert_subsumes() {
        let mut filter: Filter = [topic("a/b/c"), topic("a/b/d"), topic("x")]
            .into_iter()
            .collect();
        assert!(filter.insert(topic("a/b")));
        assert_eq!(filter.topics(), &[topic("a/b"), topic("x")]);
    }

    #[test]
    fn test_filter_remove_exact_only() {
        let mut filter: Filter = [topic("a/b")].into_iter().collect();
        assert!(!filter.remove(&topic("a/b/c")));
        assert!(filter.remove(&topic("a/b")));
        assert!(!filter.remove(&topic("a/b")));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_filter_merge() {
        let mut a: Filter = [topic("a/b"), topic("c")].into_iter().collect();
        let b: Filter = [topic("a"), topic("d")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.topics(), &[topic("a"), topic("c"), topic("d")]);
    }

    #[test]
    fn test_canonicalization_idempotent() {
        let once: Filter = [topic("a/b"), topic("a"), topic("b")].into_iter().collect();
        let twice: Filter = once.clone().into_iter().collect();
        assert_eq!(once, twice);
    }
}
