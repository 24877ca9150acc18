use crate::event::EventId;
use crate::lww::{LwwOutcome, LwwRegister};
use crate::patch::{Op, Patch};
use crate::receipt::{OpOutcome, OpReceipt, TickReceipt};
use crate::state::{edge_key, prop_key, GraphState};

/// Applies one patch's ops, in order, to `state`, mutating it in place.
/// When `collect_receipts` is set, returns a full tick receipt; otherwise
/// the ops vector in the returned receipt is empty and the caller should
/// ignore it (kept non-`Option` to match the teacher's style of a single
/// monomorphic return type rather than two overloads).
pub fn join(state: &mut GraphState, patch: &Patch, patch_hash: &str, collect_receipts: bool) -> TickReceipt {
    let mut receipts = Vec::new();

    for (op_index, op) in patch.ops.iter().enumerate() {
        let receipt = apply_op(state, patch, patch_hash, op_index as u32, op);
        if collect_receipts {
            if let Some(r) = receipt {
                receipts.push(r);
            }
        }
    }

    state.observed_frontier.merge(&patch.context);
    if let Some(max_counter) = patch
        .ops
        .iter()
        .filter_map(|op| dot_counter_for_writer(op, &patch.writer))
        .max()
    {
        state.observed_frontier.set(patch.writer.clone(), max_counter);
    }

    TickReceipt {
        patch_hash: patch_hash.to_string(),
        writer: patch.writer.clone(),
        lamport: patch.lamport,
        ops: receipts,
    }
}

fn dot_counter_for_writer(op: &Op, writer: &str) -> Option<u64> {
    match op {
        Op::NodeAdd { dot, .. } | Op::EdgeAdd { dot, .. } if dot.writer == writer => {
            Some(dot.counter)
        }
        _ => None,
    }
}

fn apply_op(
    state: &mut GraphState,
    patch: &Patch,
    patch_hash: &str,
    op_index: u32,
    op: &Op,
) -> Option<OpReceipt> {
    match op {
        Op::NodeAdd { id, dot } => {
            let applied = state.node_alive.add(id.clone(), dot.clone());
            Some(OpReceipt {
                op: "NodeAdd",
                target: id.clone(),
                result: if applied {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Redundant
                },
                reason: None,
            })
        }
        Op::NodeRemove { id, observed_dots } => {
            let applied = state.node_alive.remove(observed_dots.iter().cloned());
            Some(OpReceipt {
                op: "NodeRemove",
                target: id.clone(),
                result: if applied {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Redundant
                },
                reason: None,
            })
        }
        Op::EdgeAdd {
            from,
            to,
            label,
            dot,
        } => {
            let key = edge_key(from, to, label);
            let applied = state.edge_alive.add(key.clone(), dot.clone());
            if applied {
                let event_id = EventId::new(patch.lamport, patch.writer.clone(), patch_hash, op_index);
                let newer = state
                    .edge_birth_event
                    .get(&key)
                    .map(|existing| event_id > *existing)
                    .unwrap_or(true);
                if newer {
                    state.edge_birth_event.insert(key.clone(), event_id);
                }
            }
            Some(OpReceipt {
                op: "EdgeAdd",
                target: key,
                result: if applied {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Redundant
                },
                reason: None,
            })
        }
        Op::EdgeRemove {
            from,
            to,
            label,
            observed_dots,
        } => {
            let key = edge_key(from, to, label);
            let applied = state.edge_alive.remove(observed_dots.iter().cloned());
            Some(OpReceipt {
                op: "EdgeRemove",
                target: key,
                result: if applied {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Redundant
                },
                reason: None,
            })
        }
        Op::PropSet { target, key, value } => {
            let event_id = EventId::new(patch.lamport, patch.writer.clone(), patch_hash, op_index);
            let full_key = prop_key(target, key);
            let incoming = LwwRegister::new(event_id, value.clone());
            let (result, reason) = match state.prop.get_mut(&full_key) {
                None => {
                    state.prop.insert(full_key.clone(), incoming);
                    (OpOutcome::Applied, None)
                }
                Some(existing) => {
                    let outcome = existing.join(&incoming);
                    let reason = match outcome {
                        LwwOutcome::Superseded => Some(format!(
                            "{}@{}",
                            existing.event_id.writer, existing.event_id.lamport
                        )),
                        _ => None,
                    };
                    let mapped = match outcome {
                        LwwOutcome::Applied => OpOutcome::Applied,
                        LwwOutcome::Superseded => OpOutcome::Superseded,
                        LwwOutcome::Redundant => OpOutcome::Redundant,
                    };
                    (mapped, reason)
                }
            };
            Some(OpReceipt {
                op: "PropSet",
                target: full_key,
                result,
                reason,
            })
        }
        Op::Unknown => None,
    }
}

/// Folds `patches` in the caller's supplied order. Callers must sort
/// causally (lamport, writer, patch-hash) beforehand when determinism is
/// required across replicas.
pub fn reduce(
    patches: &[(Patch, String)],
    initial: Option<GraphState>,
    collect_receipts: bool,
) -> (GraphState, Vec<TickReceipt>) {
    let mut state = initial.unwrap_or_default();
    let mut receipts = Vec::new();
    for (patch, hash) in patches {
        let receipt = join(&mut state, patch, hash, collect_receipts);
        if collect_receipts {
            receipts.push(receipt);
        }
    }
    (state, receipts)
}

/// Ascending causal sort key: `(lamport, writer-id, patch-hash)`.
pub fn causal_sort_key(patch: &Patch, hash: &str) -> (u64, String, String) {
    (patch.lamport, patch.writer.clone(), hash.to_string())
}

pub fn sort_causally(patches: &mut [(Patch, String)]) {
    patches.sort_by(|(a, ah), (b, bh)| causal_sort_key(a, ah).cmp(&causal_sort_key(b, bh)));
}
