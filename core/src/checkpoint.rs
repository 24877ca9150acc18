use crate::codec;
use crate::dot::WriterId;
use crate::error::{Result, WarpError};
use crate::event::EventId;
use crate::gc;
use crate::lww::LwwRegister;
use crate::message::{self, CommitKind};
use crate::patch::CURRENT_SCHEMA;
use crate::provenance::ProvenanceIndex;
use crate::refs;
use crate::state::{GraphState, PropValue};
use crate::storage::{StorageAdapter, TreeEntry};
use crate::vv::VersionVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cheap, non-authoritative projection of a state used to serve reads
/// without deserializing the full CRDT bookkeeping. Never used to resume
/// materialization for schema >= 2 (§4.4 "Load").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisibleSnapshot {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String, String)>,
    pub props: BTreeMap<String, PropValue>,
}

impl VisibleSnapshot {
    pub fn from_state(state: &GraphState) -> Self {
        Self {
            nodes: state.nodes(),
            edges: state
                .alive_edges()
                .map(|(f, t, l)| (f.to_string(), t.to_string(), l.to_string()))
                .collect(),
            props: state
                .prop
                .iter()
                .map(|(k, reg)| (k.clone(), reg.value.clone()))
                .collect(),
        }
    }
}

/// The contents of a checkpoint's tree (§4.4).
pub struct Checkpoint {
    pub state: GraphState,
    pub frontier: BTreeMap<WriterId, String>,
    pub applied_vv: VersionVector,
    pub provenance: Option<ProvenanceIndex>,
}

/// Discovers writers, takes a snapshot of `state`, compacts its tombstones
/// bounded by the applied VV, and commits a checkpoint whose tree holds the
/// five entries of §4.4/§6, sorted by name. Returns the checkpoint commit
/// hash. Never called recursively: callers guard re-entrancy themselves
/// (§4.3 "guarded against recursion").
pub async fn create(
    storage: &dyn StorageAdapter,
    graph: &str,
    mut state: GraphState,
    provenance: Option<&ProvenanceIndex>,
) -> Result<String> {
    let writer_refs = storage.list_refs(&refs::writers_prefix(graph)).await?;
    let mut frontier = BTreeMap::new();
    let mut parents = Vec::new();
    for name in &writer_refs {
        let Some(writer) = refs::writer_id_from_ref(graph, name) else {
            continue;
        };
        if let Some(hash) = storage.read_ref(name).await? {
            parents.push(hash.clone());
            frontier.insert(writer, hash);
        }
    }

    let applied_vv = gc::compute_applied_vv(&state);
    gc::compact(&mut state, &applied_vv);

    let state_hash = codec::hash_of(&state)?;
    let visible = VisibleSnapshot::from_state(&state);

    let state_oid = storage.write_blob(&codec::encode(&state)?).await?;
    let visible_oid = storage.write_blob(&codec::encode(&visible)?).await?;
    let frontier_oid = storage.write_blob(&codec::encode(&frontier)?).await?;
    let applied_vv_oid = storage.write_blob(&codec::encode(&applied_vv)?).await?;

    let mut entries = vec![
        TreeEntry {
            name: "appliedVV.cbor".to_string(),
            hash: applied_vv_oid,
        },
        TreeEntry {
            name: "frontier.cbor".to_string(),
            hash: frontier_oid.clone(),
        },
    ];
    let mut index_oid = String::new();
    if let Some(index) = provenance {
        let oid = storage.write_blob(&codec::encode(index)?).await?;
        index_oid = oid.clone();
        entries.push(TreeEntry {
            name: "provenance.cbor".to_string(),
            hash: oid,
        });
    }
    entries.push(TreeEntry {
        name: "state.cbor".to_string(),
        hash: state_oid,
    });
    entries.push(TreeEntry {
        name: "visible.cbor".to_string(),
        hash: visible_oid,
    });
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let tree = storage.write_tree(&entries).await?;

    let mut trailers = BTreeMap::new();
    trailers.insert("graph".to_string(), graph.to_string());
    trailers.insert("state-hash".to_string(), state_hash);
    trailers.insert("frontier-oid".to_string(), frontier_oid);
    trailers.insert("index-oid".to_string(), index_oid);
    trailers.insert("schema".to_string(), CURRENT_SCHEMA.to_string());
    let message_text = message::format_message(CommitKind::Checkpoint, &trailers);

    let hash = storage
        .commit_node_with_tree(&tree, &parents, &message_text)
        .await?;
    storage.update_ref(&refs::checkpoint_ref(graph), &hash).await?;
    tracing::debug!(graph, hash = %hash, "checkpoint created");
    Ok(hash)
}

/// Loads the most recent checkpoint for `graph`, if any. Deserializes
/// `state.cbor` directly for schema >= 2 (authoritative per §4.4); older
/// schemas rehydrate a compatibility state from `visible.cbor` with
/// synthetic event-ids (lamport 0, writer `__checkpoint__`) — a
/// compatibility gate only, never produced by this crate's own writer.
pub async fn load(storage: &dyn StorageAdapter, graph: &str) -> Result<Option<Checkpoint>> {
    let Some(hash) = storage.read_ref(&refs::checkpoint_ref(graph)).await? else {
        return Ok(None);
    };
    let message_text = storage.show_node(&hash).await?;
    let (_, trailers) = message::parse_message(&message_text)?;
    let schema: u32 = trailers
        .get("schema")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WarpError::InvalidPatchMessage {
            reason: "checkpoint commit missing schema trailer".into(),
        })?;

    let info = storage.get_node_info(&hash).await?;
    let tree_hash = info.tree.ok_or_else(|| WarpError::InvalidPatchMessage {
        reason: "checkpoint commit has no tree".into(),
    })?;
    let oids = storage.read_tree_oids(&tree_hash).await?;

    let frontier: BTreeMap<WriterId, String> = match oids.get("frontier.cbor") {
        Some(oid) => codec::decode(&storage.read_blob(oid).await?)?,
        None => BTreeMap::new(),
    };
    let applied_vv: VersionVector = match oids.get("appliedVV.cbor") {
        Some(oid) => codec::decode(&storage.read_blob(oid).await?)?,
        None => VersionVector::new(),
    };
    let provenance: Option<ProvenanceIndex> = match oids.get("provenance.cbor") {
        Some(oid) => Some(codec::decode(&storage.read_blob(oid).await?)?),
        None => None,
    };

    let state = if schema >= 2 {
        let oid = oids.get("state.cbor").ok_or_else(|| WarpError::InvalidPatchMessage {
            reason: "checkpoint tree missing state.cbor for schema >= 2".into(),
        })?;
        codec::decode(&storage.read_blob(oid).await?)?
    } else {
        let oid = oids
            .get("visible.cbor")
            .ok_or_else(|| WarpError::MigrationRequired)?;
        let visible: VisibleSnapshot = codec::decode(&storage.read_blob(oid).await?)?;
        rehydrate_from_visible(&visible)
    };

    Ok(Some(Checkpoint {
        state,
        frontier,
        applied_vv,
        provenance,
    }))
}

const COMPAT_WRITER: &str = "__checkpoint__";

fn rehydrate_from_visible(visible: &VisibleSnapshot) -> GraphState {
    let mut state = GraphState::new();
    for (i, node) in visible.nodes.iter().enumerate() {
        state
            .node_alive
            .add(node.clone(), crate::dot::Dot::new(COMPAT_WRITER, i as u64 + 1));
    }
    let mut counter = visible.nodes.len() as u64;
    for (from, to, label) in &visible.edges {
        counter += 1;
        state
            .edge_alive
            .add(crate::state::edge_key(from, to, label), crate::dot::Dot::new(COMPAT_WRITER, counter));
    }
    for (key, value) in &visible.props {
        state.prop.insert(
            key.clone(),
            LwwRegister::new(EventId::new(0, COMPAT_WRITER, "compat", 0), value.clone()),
        );
    }
    state
}
