use crate::config::DeleteWithDataPolicy;
use crate::dot::{Dot, WriterId};
use crate::error::{Result, WarpError};
use crate::state::{edge_key, is_edge_prop_key, GraphState, PropValue, EDGE_PROP_PREFIX};
use crate::vv::VersionVector;
use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA: u32 = 2;

/// One operation inside a patch. `Unknown` absorbs any op type this
/// version doesn't recognize so that forward-compatible patches never
/// fail to decode; unknown ops contribute nothing to state or receipts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Op {
    NodeAdd {
        id: String,
        dot: Dot,
    },
    NodeRemove {
        id: String,
        #[serde(rename = "observedDots")]
        observed_dots: Vec<Dot>,
    },
    EdgeAdd {
        from: String,
        to: String,
        label: String,
        dot: Dot,
    },
    EdgeRemove {
        from: String,
        to: String,
        label: String,
        #[serde(rename = "observedDots")]
        observed_dots: Vec<Dot>,
    },
    PropSet {
        target: String,
        key: String,
        value: PropValue,
    },
    #[serde(other)]
    Unknown,
}

/// One writer's atomic batch of ops, the unit committed as a patch commit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patch {
    pub schema: u32,
    pub writer: WriterId,
    pub lamport: u64,
    pub context: VersionVector,
    pub ops: Vec<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<Vec<String>>,
}

impl Patch {
    /// `reads ∪ writes`, or empty if both are absent ("unknown" per §3,
    /// recorded as an empty contribution by the provenance index).
    pub fn touched_entities(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(reads) = &self.reads {
            out.extend(reads.iter().map(String::as_str));
        }
        if let Some(writes) = &self.writes {
            out.extend(writes.iter().map(String::as_str));
        }
        out
    }
}

/// Accumulates ops for one writer, enforcing the delete-with-data policy
/// against a snapshot of cached state at `commit()` time.
pub struct PatchBuilder<'a> {
    writer: WriterId,
    lamport: u64,
    local_vv: VersionVector,
    ops: Vec<Op>,
    reads: Vec<String>,
    writes: Vec<String>,
    policy: DeleteWithDataPolicy,
    state: &'a GraphState,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(
        writer: impl Into<WriterId>,
        writer_tip_lamport: u64,
        state: &'a GraphState,
        policy: DeleteWithDataPolicy,
    ) -> Self {
        Self {
            writer: writer.into(),
            lamport: writer_tip_lamport + 1,
            local_vv: VersionVector::new(),
            ops: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            policy,
            state,
        }
    }

    fn next_dot(&mut self) -> Dot {
        let counter = self.local_vv.get(&self.writer) + 1;
        self.local_vv.set(self.writer.clone(), counter);
        Dot::new(self.writer.clone(), counter)
    }

    pub fn node_add(&mut self, id: impl Into<String>) -> Result<&mut Self> {
        let id = id.into();
        if id.starts_with(EDGE_PROP_PREFIX) {
            return Err(WarpError::InvalidPatchMessage {
                reason: format!("node id {id} uses the reserved edge-property prefix"),
            });
        }
        let dot = self.next_dot();
        self.writes.push(id.clone());
        self.ops.push(Op::NodeAdd { id, dot });
        Ok(self)
    }

    pub fn node_remove(&mut self, id: impl Into<String>) -> Result<&mut Self> {
        let id = id.into();
        if self.policy != DeleteWithDataPolicy::Cascade {
            let has_incident_edge = self
                .state
                .alive_edges()
                .any(|(from, to, _)| from == id || to == id);
            let has_props = !self.state.node_props(&id).is_empty();
            if has_incident_edge || has_props {
                match self.policy {
                    DeleteWithDataPolicy::Reject => {
                        return Err(WarpError::InvalidPatchMessage {
                            reason: format!(
                                "node {id} has attached data; delete-with-data policy is reject"
                            ),
                        })
                    }
                    DeleteWithDataPolicy::Warn => {
                        tracing::warn!(node = %id, "removing node with attached data");
                    }
                    DeleteWithDataPolicy::Cascade => unreachable!(),
                }
            }
        }
        let observed_dots: Vec<Dot> = self.state.node_alive.alive_dots(&id).cloned().collect();
        self.writes.push(id.clone());
        self.ops.push(Op::NodeRemove { id, observed_dots });
        Ok(self)
    }

    pub fn edge_add(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> &mut Self {
        let (from, to, label) = (from.into(), to.into(), label.into());
        let dot = self.next_dot();
        self.writes.push(edge_key(&from, &to, &label));
        self.ops.push(Op::EdgeAdd {
            from,
            to,
            label,
            dot,
        });
        self
    }

    pub fn edge_remove(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> &mut Self {
        let (from, to, label) = (from.into(), to.into(), label.into());
        let key = edge_key(&from, &to, &label);
        let observed_dots: Vec<Dot> = self.state.edge_alive.alive_dots(&key).cloned().collect();
        self.writes.push(key);
        self.ops.push(Op::EdgeRemove {
            from,
            to,
            label,
            observed_dots,
        });
        self
    }

    /// Sets a property on an edge. `target` is encoded with the reserved
    /// edge-property prefix so it cannot collide with a node-id target.
    pub fn edge_prop_set(
        &mut self,
        from: &str,
        to: &str,
        label: &str,
        key: impl Into<String>,
        value: PropValue,
    ) -> &mut Self {
        self.prop_set(crate::state::edge_prop_target(from, to, label), key, value)
    }

    pub fn prop_set(&mut self, target: impl Into<String>, key: impl Into<String>, value: PropValue) -> &mut Self {
        let target = target.into();
        let key = key.into();
        self.writes.push(target.clone());
        self.ops.push(Op::PropSet { target, key, value });
        self
    }

    pub fn declare_read(&mut self, id: impl Into<String>) -> &mut Self {
        self.reads.push(id.into());
        self
    }

    /// Finalizes the accumulated ops into a `Patch` against `context`
    /// (normally the writer's locally-cached observed frontier).
    pub fn build(self, context: VersionVector) -> Patch {
        let reads = if self.reads.is_empty() {
            None
        } else {
            Some(self.reads)
        };
        let writes = if self.writes.is_empty() {
            None
        } else {
            Some(self.writes)
        };
        Patch {
            schema: CURRENT_SCHEMA,
            writer: self.writer,
            lamport: self.lamport,
            context,
            ops: self.ops,
            reads,
            writes,
        }
    }
}

pub fn is_edge_prop_target(target: &str) -> bool {
    is_edge_prop_key(target)
}
