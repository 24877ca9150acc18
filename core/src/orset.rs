use crate::dot::Dot;
use crate::vv::VersionVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Observed-remove set. An element is alive iff it has at least one dot
/// not present in `tombstones`. Add attaches a dot; remove consumes a set
/// of dots the caller claims to have observed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrSet<T: Ord + Clone> {
    entries: BTreeMap<T, BTreeSet<Dot>>,
    tombstones: BTreeSet<Dot>,
}

impl<T: Ord + Clone> OrSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `applied` (true) if the dot was new, `redundant` (false) if
    /// it was already present for this element.
    pub fn add(&mut self, elem: T, dot: Dot) -> bool {
        self.entries.entry(elem).or_default().insert(dot)
    }

    /// Tombstones `observed_dots`. Returns `applied` (true) if any dot was
    /// not already tombstoned.
    pub fn remove(&mut self, observed_dots: impl IntoIterator<Item = Dot>) -> bool {
        let mut applied = false;
        for dot in observed_dots {
            if self.tombstones.insert(dot) {
                applied = true;
            }
        }
        applied
    }

    pub fn is_alive(&self, elem: &T) -> bool {
        self.entries
            .get(elem)
            .map(|dots| dots.iter().any(|d| !self.tombstones.contains(d)))
            .unwrap_or(false)
    }

    pub fn alive_dots(&self, elem: &T) -> impl Iterator<Item = &Dot> {
        self.entries
            .get(elem)
            .into_iter()
            .flat_map(|dots| dots.iter())
            .filter(move |d| !self.tombstones.contains(d))
    }

    /// All currently-alive elements, in ascending order.
    pub fn iter_alive(&self) -> impl Iterator<Item = &T> {
        self.entries.keys().filter(move |e| self.is_alive(e))
    }

    pub fn len_alive(&self) -> usize {
        self.iter_alive().count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn live_dot_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|dots| dots.iter())
            .filter(|d| !self.tombstones.contains(d))
            .count()
    }

    /// Removes any tombstoned dot `<= vv`, then drops entries whose dot
    /// set becomes empty. Live dots are never removed regardless of `vv`.
    pub fn compact(&mut self, vv: &VersionVector) {
        let covered: BTreeSet<Dot> = self
            .tombstones
            .iter()
            .filter(|d| vv.contains(d))
            .cloned()
            .collect();
        self.tombstones.retain(|d| !covered.contains(d));
        self.entries.retain(|_, dots| {
            dots.retain(|d| !covered.contains(d));
            !dots.is_empty()
        });
    }

    pub fn all_dots(&self) -> impl Iterator<Item = &Dot> {
        self.entries
            .values()
            .flat_map(|dots| dots.iter())
            .chain(self.tombstones.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_alive() {
        let mut s = OrSet::new();
        s.add("a", Dot::new("w1", 1));
        assert!(s.is_alive(&"a"));
        assert_eq!(s.iter_alive().collect::<Vec<_>>(), vec![&"a"]);
    }

    #[test]
    fn remove_only_observed_dots_kills_element() {
        let mut s = OrSet::new();
        s.add("a", Dot::new("w1", 1));
        assert!(s.remove([Dot::new("w1", 1)]));
        assert!(!s.is_alive(&"a"));
    }

    #[test]
    fn concurrent_add_survives_partial_remove() {
        let mut s = OrSet::new();
        s.add("a", Dot::new("w1", 1));
        s.add("a", Dot::new("w2", 1));
        s.remove([Dot::new("w1", 1)]);
        assert!(s.is_alive(&"a"));
    }

    #[test]
    fn compact_drops_covered_tombstones_but_keeps_live_dots() {
        let mut s = OrSet::new();
        s.add("a", Dot::new("w1", 1));
        s.add("a", Dot::new("w1", 2));
        s.remove([Dot::new("w1", 1)]);
        let mut vv = VersionVector::new();
        vv.set("w1", 2);
        s.compact(&vv);
        assert_eq!(s.tombstone_count(), 0);
        assert!(s.is_alive(&"a"));
        assert_eq!(s.live_dot_count(), 1);
    }

    #[test]
    fn redundant_add_reports_false() {
        let mut s = OrSet::new();
        assert!(s.add("a", Dot::new("w1", 1)));
        assert!(!s.add("a", Dot::new("w1", 1)));
    }
}
