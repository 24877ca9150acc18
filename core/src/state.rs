use crate::event::EventId;
use crate::lww::LwwRegister;
use crate::orset::OrSet;
use crate::vv::VersionVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved prefix for edge-property keys, kept disjoint from the node
/// property namespace. Disallowed as a node-id by the patch builder (see
/// the "edge-property key reserved prefix" open question in DESIGN.md).
pub const EDGE_PROP_PREFIX: &str = "__edge_prop__";

/// A scalar property value. Deep equality is plain structural equality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub fn edge_key(from: &str, to: &str, label: &str) -> String {
    format!("{}\0{}\0{}", from, to, label)
}

pub fn split_edge_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut it = key.splitn(3, '\0');
    let from = it.next()?;
    let to = it.next()?;
    let label = it.next()?;
    Some((from, to, label))
}

/// The `target` an `Op::PropSet` carries for a node: just the node-id.
/// `prop_key(target, key)` below builds the full `state.prop` map key
/// uniformly for both node and edge targets.
pub fn edge_prop_target(from: &str, to: &str, label: &str) -> String {
    format!("{}\0{}", EDGE_PROP_PREFIX, edge_key(from, to, label))
}

/// The full `state.prop` map key for a given `Op::PropSet` target (either
/// a node-id or an `edge_prop_target` string) and property key.
pub fn prop_key(target: &str, key: &str) -> String {
    format!("{}\0{}", target, key)
}

pub fn node_prop_key(node_id: &str, key: &str) -> String {
    prop_key(node_id, key)
}

pub fn edge_prop_key(edge_key: &str, key: &str) -> String {
    prop_key(&edge_prop_target_from_key(edge_key), key)
}

fn edge_prop_target_from_key(edge_key: &str) -> String {
    format!("{}\0{}", EDGE_PROP_PREFIX, edge_key)
}

pub fn is_edge_prop_key(prop_key: &str) -> bool {
    prop_key.starts_with(EDGE_PROP_PREFIX)
}

/// The canonical in-memory graph state (§3 "Graph state").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphState {
    pub node_alive: OrSet<String>,
    pub edge_alive: OrSet<String>,
    pub prop: BTreeMap<String, LwwRegister<PropValue>>,
    pub observed_frontier: VersionVector,
    pub edge_birth_event: BTreeMap<String, EventId>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node_alive.is_alive(&id.to_string())
    }

    pub fn has_edge(&self, from: &str, to: &str, label: &str) -> bool {
        self.edge_alive.is_alive(&edge_key(from, to, label))
    }

    /// Live edges whose own key is alive AND whose endpoints are
    /// currently alive (dangling edges are masked, not deleted; invariant
    /// 3).
    pub fn alive_edges(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.edge_alive.iter_alive().filter_map(|key| {
            let (from, to, label) = split_edge_key(key)?;
            if self.has_node(from) && self.has_node(to) {
                Some((from, to, label))
            } else {
                None
            }
        })
    }

    pub fn nodes(&self) -> Vec<String> {
        self.node_alive.iter_alive().cloned().collect()
    }

    /// Properties visible for a node: registers at `node_id\0*` whose
    /// event-id is not hidden by clean-slate filtering. Node properties
    /// are never clean-slate filtered (only edge properties are, against
    /// `edge_birth_event`); this method exists for symmetry and simply
    /// returns every register under the node's key prefix.
    pub fn node_props(&self, node_id: &str) -> BTreeMap<&str, &PropValue> {
        let prefix = format!("{}\0", node_id);
        self.prop
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix) && !is_edge_prop_key(k))
            .map(|(k, reg)| (k[prefix.len()..].as_ref(), &reg.value))
            .collect()
    }

    /// Properties visible for an edge: registers under its edge-prop
    /// namespace whose event-id is `>=` the edge's current birth event
    /// (invariant 4); older registers are hidden by clean-slate filtering
    /// after a delete-then-re-add.
    pub fn edge_props(&self, from: &str, to: &str, label: &str) -> BTreeMap<&str, &PropValue> {
        let ek = edge_key(from, to, label);
        let birth = self.edge_birth_event.get(&ek);
        let prefix = format!("{}\0{}\0", EDGE_PROP_PREFIX, ek);
        self.prop
            .iter()
            .filter(|(k, reg)| {
                k.starts_with(&prefix) && birth.map(|b| &reg.event_id >= b).unwrap_or(true)
            })
            .map(|(k, reg)| (k[prefix.len()..].as_ref(), &reg.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;

    #[test]
    fn edge_key_round_trips() {
        let k = edge_key("a", "b", "follows");
        assert_eq!(split_edge_key(&k), Some(("a", "b", "follows")));
    }

    #[test]
    fn dangling_edge_is_masked_not_deleted() {
        let mut s = GraphState::new();
        s.node_alive.add("a".to_string(), Dot::new("w1", 1));
        s.edge_alive
            .add(edge_key("a", "b", "follows"), Dot::new("w1", 2));
        assert_eq!(s.alive_edges().count(), 0);
        assert!(s.edge_alive.is_alive(&edge_key("a", "b", "follows")));
    }

    #[test]
    fn node_and_edge_prop_namespaces_do_not_collide() {
        let node_key = node_prop_key("a", "name");
        let edge_key_ = edge_prop_key(&edge_key("a", "b", "follows"), "name");
        assert_ne!(node_key, edge_key_);
        assert!(is_edge_prop_key(&edge_key_));
        assert!(!is_edge_prop_key(&node_key));
    }
}
