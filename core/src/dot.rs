use serde::{Deserialize, Serialize};
use std::fmt;

/// A writer identifier. Writers are opaque strings assigned by the caller
/// (commonly a peer's public key or a stable node name).
pub type WriterId = String;

/// A single CRDT operation identifier: one writer's monotonic counter.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub writer: WriterId,
    pub counter: u64,
}

impl Dot {
    pub fn new(writer: impl Into<WriterId>, counter: u64) -> Self {
        Self {
            writer: writer.into(),
            counter,
        }
    }

    pub fn inc(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            counter: self.counter + 1,
        }
    }

    /// Parses the `writer@counter` encoding used inside tombstone sets.
    pub fn parse(s: &str) -> Option<Self> {
        let (writer, counter) = s.rsplit_once('@')?;
        Some(Self {
            writer: writer.to_string(),
            counter: counter.parse().ok()?,
        })
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.writer, self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_bumps_counter_only() {
        let d = Dot::new("alice", 4).inc();
        assert_eq!(d, Dot::new("alice", 5));
    }

    #[test]
    fn display_matches_writer_at_counter() {
        assert_eq!(Dot::new("bob", 3).to_string(), "bob@3");
    }

    #[test]
    fn parse_round_trips_display() {
        let d = Dot::new("alice", 42);
        assert_eq!(Dot::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Dot::parse("no-at-sign").is_none());
        assert!(Dot::parse("alice@notanumber").is_none());
    }
}
