use crate::state::{edge_prop_key, is_edge_prop_key, node_prop_key, split_edge_key, GraphState, PropValue};
use std::collections::BTreeMap;

/// A deterministic state-to-state diff (§4.8). Edges are gated on both
/// endpoints being alive in *their respective* states, so an endpoint
/// deletion produces a node-removed entry rather than spurious edge churn.
/// Edge-property keys are excluded from `props` (callers handle them
/// separately via [`edge_prop_diff`]).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeEdgeDiff {
    pub nodes_added: Vec<String>,
    pub nodes_removed: Vec<String>,
    pub edges_added: Vec<(String, String, String)>,
    pub edges_removed: Vec<(String, String, String)>,
    pub props_set: Vec<(String, PropValue)>,
    pub props_removed: Vec<String>,
}

impl NodeEdgeDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes_added.is_empty()
            && self.nodes_removed.is_empty()
            && self.edges_added.is_empty()
            && self.edges_removed.is_empty()
            && self.props_set.is_empty()
            && self.props_removed.is_empty()
    }
}

pub fn diff(before: &GraphState, after: &GraphState) -> NodeEdgeDiff {
    let before_nodes: Vec<String> = before.nodes();
    let after_nodes: Vec<String> = after.nodes();
    let (nodes_added, nodes_removed) = symmetric_sorted_diff(&before_nodes, &after_nodes);

    let before_edges: Vec<(String, String, String)> = before
        .alive_edges()
        .map(|(f, t, l)| (f.to_string(), t.to_string(), l.to_string()))
        .collect();
    let after_edges: Vec<(String, String, String)> = after
        .alive_edges()
        .map(|(f, t, l)| (f.to_string(), t.to_string(), l.to_string()))
        .collect();
    let (edges_added, edges_removed) = symmetric_sorted_diff(&before_edges, &after_edges);

    let mut props_set = Vec::new();
    let mut props_removed = Vec::new();
    let mut keys: Vec<&String> = before.prop.keys().chain(after.prop.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        if is_edge_prop_key(key) {
            continue;
        }
        match (before.prop.get(key), after.prop.get(key)) {
            (None, Some(reg)) => props_set.push((key.clone(), reg.value.clone())),
            (Some(_), None) => props_removed.push(key.clone()),
            (Some(a), Some(b)) if a.value != b.value => {
                props_set.push((key.clone(), b.value.clone()))
            }
            _ => {}
        }
    }

    NodeEdgeDiff {
        nodes_added,
        nodes_removed,
        edges_added,
        edges_removed,
        props_set,
        props_removed,
    }
}

/// Edge-property changes, excluded from [`diff`]'s `props` and handled
/// separately by callers that care about edge metadata.
pub fn edge_prop_diff(
    before: &GraphState,
    after: &GraphState,
) -> BTreeMap<(String, String, String), Vec<(String, Option<PropValue>)>> {
    let mut out: BTreeMap<(String, String, String), Vec<(String, Option<PropValue>)>> =
        BTreeMap::new();
    let mut keys: Vec<&String> = before
        .prop
        .keys()
        .chain(after.prop.keys())
        .filter(|k| is_edge_prop_key(k))
        .collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let a = before.prop.get(key).map(|r| r.value.clone());
        let b = after.prop.get(key).map(|r| r.value.clone());
        if a == b {
            continue;
        }
        if let Some((edge, prop)) = parse_edge_prop_key(key) {
            out.entry(edge).or_default().push((prop, b));
        }
    }
    out
}

fn parse_edge_prop_key(key: &str) -> Option<((String, String, String), String)> {
    let rest = key.strip_prefix(crate::state::EDGE_PROP_PREFIX)?.strip_prefix('\0')?;
    let (edge_part, prop) = rest.rsplit_once('\0')?;
    let (from, to, label) = split_edge_key(edge_part)?;
    Some(((from.to_string(), to.to_string(), label.to_string()), prop.to_string()))
}

fn symmetric_sorted_diff<T: Ord + Clone>(before: &[T], after: &[T]) -> (Vec<T>, Vec<T>) {
    let mut before_sorted = before.to_vec();
    before_sorted.sort();
    let mut after_sorted = after.to_vec();
    after_sorted.sort();
    let added = after_sorted
        .iter()
        .filter(|x| before_sorted.binary_search(x).is_err())
        .cloned()
        .collect();
    let removed = before_sorted
        .iter()
        .filter(|x| after_sorted.binary_search(x).is_err())
        .cloned()
        .collect();
    (added, removed)
}

/// Sanity helper used by property tests: applies `d`'s removes/adds to
/// `before`'s raw node/edge id sets and checks the result matches `after`'s
/// (§8 property 12, "diff inverse").
pub fn apply_diff_to_id_sets(
    before_nodes: &[String],
    d: &NodeEdgeDiff,
) -> Vec<String> {
    let mut set: std::collections::BTreeSet<String> = before_nodes.iter().cloned().collect();
    for n in &d.nodes_removed {
        set.remove(n);
    }
    for n in &d.nodes_added {
        set.insert(n.clone());
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;

    #[test]
    fn node_added_detected() {
        let before = GraphState::new();
        let mut after = GraphState::new();
        after.node_alive.add("a".to_string(), Dot::new("w1", 1));
        let d = diff(&before, &after);
        assert_eq!(d.nodes_added, vec!["a".to_string()]);
        assert!(d.nodes_removed.is_empty());
    }

    #[test]
    fn edge_gated_on_both_endpoints_alive() {
        let mut after = GraphState::new();
        after.node_alive.add("a".to_string(), Dot::new("w1", 1));
        after
            .edge_alive
            .add(crate::state::edge_key("a", "b", "follows"), Dot::new("w1", 2));
        let before = GraphState::new();
        let d = diff(&before, &after);
        assert!(d.edges_added.is_empty());
    }

    #[test]
    fn prop_change_detected_and_edge_props_excluded() {
        let mut before = GraphState::new();
        before.node_alive.add("a".to_string(), Dot::new("w1", 1));
        let mut after = before.clone();
        use crate::event::EventId;
        use crate::lww::LwwRegister;
        after.prop.insert(
            node_prop_key("a", "name"),
            LwwRegister::new(EventId::new(1, "w1", "h", 0), PropValue::Str("x".into())),
        );
        after.prop.insert(
            edge_prop_key(&crate::state::edge_key("a", "b", "f"), "color"),
            LwwRegister::new(EventId::new(1, "w1", "h", 1), PropValue::Str("red".into())),
        );
        let d = diff(&before, &after);
        assert_eq!(d.props_set.len(), 1);
        assert_eq!(d.props_set[0].0, node_prop_key("a", "name"));
    }

    #[test]
    fn diff_inverse_reproduces_after_node_ids() {
        let before = GraphState::new();
        let mut after = GraphState::new();
        after.node_alive.add("a".to_string(), Dot::new("w1", 1));
        let d = diff(&before, &after);
        let reproduced = apply_diff_to_id_sets(&before.nodes(), &d);
        assert_eq!(reproduced, after.nodes());
    }
}
