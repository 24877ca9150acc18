use crate::dot::WriterId;
use serde::{Deserialize, Serialize};

/// Total order over every operation in the system: lamport, writer,
/// patch-hash, op-index, compared lexicographically in that order. Equal
/// identifiers imply the same operation.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub lamport: u64,
    pub writer: WriterId,
    pub patch_hash: String,
    pub op_index: u32,
}

impl EventId {
    pub fn new(lamport: u64, writer: impl Into<WriterId>, patch_hash: impl Into<String>, op_index: u32) -> Self {
        Self {
            lamport,
            writer: writer.into(),
            patch_hash: patch_hash.into(),
            op_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_prefers_lamport_first() {
        let a = EventId::new(5, "zeta", "h1", 0);
        let b = EventId::new(3, "alpha", "h2", 9);
        assert!(b < a);
    }

    #[test]
    fn ordering_breaks_ties_by_writer_then_hash_then_index() {
        let a = EventId::new(1, "alice", "aaa", 0);
        let b = EventId::new(1, "bob", "aaa", 0);
        assert!(a < b);

        let c = EventId::new(1, "alice", "aaa", 0);
        let d = EventId::new(1, "alice", "bbb", 0);
        assert!(c < d);

        let e = EventId::new(1, "alice", "aaa", 0);
        let f = EventId::new(1, "alice", "aaa", 1);
        assert!(e < f);
    }
}
