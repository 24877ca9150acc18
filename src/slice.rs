use warp_core::{
    codec_decode, parse_message, reduce, sort_causally, CommitKind, GraphState, Patch,
    ProvenanceIndex, Result, StorageAdapter, WarpError,
};

/// Materializes the backward causal cone of `seed` (§4.5): BFS the
/// provenance index from `seed`, loading each touching patch from
/// storage on demand (unlike [`warp_core::backward_cone`], which
/// assumes every reachable patch is already loaded into memory), then
/// folds the cone in causal order. Gives "what could have produced this
/// value" without a full materialize pass.
pub async fn materialize_slice(
    storage: &dyn StorageAdapter,
    index: &ProvenanceIndex,
    seed: &str,
) -> Result<GraphState> {
    use std::collections::{BTreeSet, VecDeque};

    let mut visited_entities: BTreeSet<String> = BTreeSet::new();
    let mut visited_hashes: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut cone: Vec<(Patch, String)> = Vec::new();

    queue.push_back(seed.to_string());
    visited_entities.insert(seed.to_string());

    while let Some(entity) = queue.pop_front() {
        for hash in index.patches_for(&entity) {
            if !visited_hashes.insert(hash.clone()) {
                continue;
            }
            let patch = load_patch(storage, &hash).await?;
            if let Some(reads) = &patch.reads {
                for r in reads {
                    if visited_entities.insert(r.clone()) {
                        queue.push_back(r.clone());
                    }
                }
            }
            cone.push((patch, hash));
        }
    }

    sort_causally(&mut cone);
    let (state, _receipts) = reduce(&cone, None, false);
    Ok(state)
}

async fn load_patch(storage: &dyn StorageAdapter, hash: &str) -> Result<Patch> {
    let message_text = storage.show_node(hash).await?;
    let (kind, trailers) = parse_message(&message_text)?;
    if kind != CommitKind::Patch {
        return Err(WarpError::InvalidPatchMessage {
            reason: format!("commit {hash} referenced by provenance index is not a patch commit"),
        });
    }
    let oid = trailers
        .get("patch-oid")
        .ok_or_else(|| WarpError::InvalidPatchMessage {
            reason: format!("commit {hash} missing patch-oid trailer"),
        })?;
    let bytes = storage.read_blob(oid).await?;
    codec_decode(&bytes)
}
