use crate::dot::{Dot, WriterId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A mapping writer-id -> highest observed counter. A join-semilattice
/// under pointwise maximum: commutative, associative, idempotent.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<WriterId, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, writer: &str) -> u64 {
        self.0.get(writer).copied().unwrap_or_default()
    }

    pub fn set(&mut self, writer: impl Into<WriterId>, counter: u64) {
        let writer = writer.into();
        let entry = self.0.entry(writer).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    /// `contains(dot)` iff `vv[dot.writer] >= dot.counter`.
    pub fn contains(&self, dot: &Dot) -> bool {
        self.get(&dot.writer) >= dot.counter
    }

    /// Pointwise maximum join, in place.
    pub fn merge(&mut self, other: &VersionVector) {
        for (writer, counter) in &other.0 {
            self.set(writer.clone(), *counter);
        }
    }

    pub fn merged(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(w, c)| (w.as_str(), *c))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Partial order induced by pointwise comparison: `Some(Less)` if self
    /// is dominated everywhere, `Some(Greater)` if self dominates
    /// everywhere, `Some(Equal)` if identical, `None` if concurrent.
    pub fn partial_cmp_pointwise(&self, other: &VersionVector) -> Option<Ordering> {
        let mut writers: Vec<&str> = self.0.keys().map(String::as_str).collect();
        for w in other.0.keys() {
            if !self.0.contains_key(w) {
                writers.push(w);
            }
        }
        let mut less = false;
        let mut greater = false;
        for w in writers {
            match self.get(w).cmp(&other.get(w)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl From<BTreeMap<WriterId, u64>> for VersionVector {
    fn from(map: BTreeMap<WriterId, u64>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn contains_reflects_counter() {
        let mut vv = VersionVector::new();
        vv.set("alice", 5);
        assert!(vv.contains(&Dot::new("alice", 5)));
        assert!(vv.contains(&Dot::new("alice", 3)));
        assert!(!vv.contains(&Dot::new("alice", 6)));
        assert!(!vv.contains(&Dot::new("bob", 1)));
    }

    #[test]
    fn merge_is_pointwise_max() {
        let mut a = VersionVector::new();
        a.set("alice", 5);
        a.set("bob", 1);
        let mut b = VersionVector::new();
        b.set("alice", 2);
        b.set("bob", 9);
        a.merge(&b);
        assert_eq!(a.get("alice"), 5);
        assert_eq!(a.get("bob"), 9);
    }

    fn arb_vv() -> impl Strategy<Value = VersionVector> {
        prop::collection::btree_map("[a-c]", 0u64..10, 0..4).prop_map(VersionVector::from)
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_vv(), b in arb_vv()) {
            prop_assert_eq!(a.merged(&b), b.merged(&a));
        }

        #[test]
        fn merge_is_idempotent(a in arb_vv()) {
            prop_assert_eq!(a.merged(&a), a.clone());
        }

        #[test]
        fn merge_is_associative(a in arb_vv(), b in arb_vv(), c in arb_vv()) {
            let lhs = a.merged(&b).merged(&c);
            let rhs = a.merged(&b.merged(&c));
            prop_assert_eq!(lhs, rhs);
        }
    }
}
