use crate::patch::Patch;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Multimap entity-id -> sorted set of patch-hashes that touched it
/// (`reads ∪ writes`, §4.5). Built fresh at full materialization, cloned
/// from a loaded checkpoint when present, and incrementally updated on
/// eager commit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProvenanceIndex {
    by_entity: BTreeMap<String, BTreeSet<String>>,
}

impl ProvenanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one already-reduced patch: every id in `reads ∪ writes`
    /// gets `hash` appended.
    pub fn record(&mut self, patch: &Patch, hash: &str) {
        for entity in patch.touched_entities() {
            self.by_entity
                .entry(entity.to_string())
                .or_default()
                .insert(hash.to_string());
        }
    }

    pub fn patches_for(&self, entity: &str) -> Vec<String> {
        self.by_entity
            .get(entity)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

/// Computes the backward causal cone of `v`: BFS over the provenance
/// index, seeding with `v`, loading every patch that touched each
/// dequeued entity, and enqueueing that patch's `reads` if not yet
/// visited. Patches are cached by hash so a patch touching multiple
/// already-visited entities is only counted once. Returns the patches in
/// the cone paired with their hash, unsorted (the caller sorts by causal
/// key before folding, per §4.5).
pub fn backward_cone<'a>(
    index: &ProvenanceIndex,
    patches_by_hash: &'a BTreeMap<String, Patch>,
    seed: &str,
) -> Vec<(&'a Patch, String)> {
    let mut visited_entities: BTreeSet<String> = BTreeSet::new();
    let mut visited_hashes: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut cone: Vec<(&Patch, String)> = Vec::new();

    queue.push_back(seed.to_string());
    visited_entities.insert(seed.to_string());

    while let Some(entity) = queue.pop_front() {
        for hash in index.patches_for(&entity) {
            if !visited_hashes.insert(hash.clone()) {
                continue;
            }
            let Some(patch) = patches_by_hash.get(&hash) else {
                continue;
            };
            cone.push((patch, hash));
            if let Some(reads) = &patch.reads {
                for r in reads {
                    if visited_entities.insert(r.clone()) {
                        queue.push_back(r.clone());
                    }
                }
            }
        }
    }
    cone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeleteWithDataPolicy;
    use crate::patch::PatchBuilder;
    use crate::state::GraphState;
    use crate::vv::VersionVector;

    fn patch_touching(writes: &[&str], reads: &[&str]) -> Patch {
        let state = GraphState::new();
        let mut b = PatchBuilder::new("w1", 0, &state, DeleteWithDataPolicy::Reject);
        for w in writes {
            b.node_add(*w).unwrap();
        }
        for r in reads {
            b.declare_read(*r);
        }
        b.build(VersionVector::new())
    }

    #[test]
    fn cone_follows_reads_transitively() {
        let p_root = patch_touching(&["v"], &[]);
        let p_dep = patch_touching(&["v"], &["u"]);
        let p_dep_dep = patch_touching(&["u"], &["t"]);

        let mut index = ProvenanceIndex::new();
        index.record(&p_root, "h1");
        index.record(&p_dep, "h2");
        index.record(&p_dep_dep, "h3");

        let mut by_hash = BTreeMap::new();
        by_hash.insert("h1".to_string(), p_root);
        by_hash.insert("h2".to_string(), p_dep);
        by_hash.insert("h3".to_string(), p_dep_dep);

        let cone = backward_cone(&index, &by_hash, "v");
        let hashes: BTreeSet<String> = cone.into_iter().map(|(_, h)| h).collect();
        assert!(hashes.contains("h1"));
        assert!(hashes.contains("h2"));
        assert!(hashes.contains("h3"));
    }

    #[test]
    fn unrelated_patches_excluded() {
        let p_v = patch_touching(&["v"], &[]);
        let p_other = patch_touching(&["other"], &[]);
        let mut index = ProvenanceIndex::new();
        index.record(&p_v, "h1");
        index.record(&p_other, "h2");
        let mut by_hash = BTreeMap::new();
        by_hash.insert("h1".to_string(), p_v);
        by_hash.insert("h2".to_string(), p_other);
        let cone = backward_cone(&index, &by_hash, "v");
        assert_eq!(cone.len(), 1);
    }
}
