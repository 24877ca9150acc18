use std::sync::Arc;
use warp_core::{
    format_message, parse_message, writer_ref, CheckpointPolicy, CommitKind, DeleteWithDataPolicy,
    Engine, ForkArgs, GcMetrics, GcPolicy, MaterializeArgs, NodeEdgeDiff, Patch, PatchBuilder,
    ProvenanceIndex, PropValue, Result, StorageAdapter, SubscriptionHandle, SyncRequest,
    SyncResponse, TickReceipt, TreeEntry, WarpError, Wormhole, WriterId, CURRENT_SCHEMA,
};

/// One writer's handle onto a graph: the materialization [`Engine`] plus
/// this writer's own chain bookkeeping (its tip commit and last lamport),
/// grounded on `cloudpeers-tlfs/src/lib.rs`'s `Sdk`/`Doc` facade naming —
/// generalized from one peer-owned document to one writer-owned graph.
pub struct Graph {
    storage: Arc<dyn StorageAdapter>,
    graph: String,
    writer: WriterId,
    own_tip: Option<String>,
    own_lamport: u64,
    engine: Engine,
    auto_materialize: bool,
}

impl Graph {
    /// Opens `graph` for `writer`: loads the latest checkpoint (if any)
    /// through [`Engine::load`] and reads this writer's own ref tip to
    /// resume its lamport sequence (§4.2 "the patch's lamport is resolved
    /// against the writer's tip commit").
    pub async fn open(
        storage: Arc<dyn StorageAdapter>,
        graph: impl Into<String>,
        writer: impl Into<WriterId>,
        checkpoint_policy: CheckpointPolicy,
        gc_policy: GcPolicy,
    ) -> Result<Self> {
        let graph = graph.into();
        let writer = writer.into();
        let engine = Engine::load(storage.clone(), graph.clone(), checkpoint_policy, gc_policy).await?;

        let own_ref = writer_ref(&graph, &writer);
        let (own_tip, own_lamport) = match storage.read_ref(&own_ref).await? {
            Some(tip) => {
                let message = storage.show_node(&tip).await?;
                let (_, trailers) = parse_message(&message)?;
                let lamport: u64 = trailers
                    .get("lamport")
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| WarpError::InvalidPatchMessage {
                        reason: format!("commit {tip} missing lamport trailer"),
                    })?;
                (Some(tip), lamport)
            }
            None => (None, 0),
        };

        Ok(Self {
            storage,
            graph,
            writer,
            own_tip,
            own_lamport,
            engine,
            auto_materialize: true,
        })
    }

    pub fn graph_name(&self) -> &str {
        &self.graph
    }

    pub fn writer_id(&self) -> &str {
        &self.writer
    }

    /// Runs a full materialize pass (§4.3): discovers every writer ref,
    /// folds new patches, checkpoints/GCs as thresholds dictate, and
    /// dispatches diffs to subscribers.
    pub async fn materialize(&mut self) -> Result<Vec<TickReceipt>> {
        self.engine.materialize(MaterializeArgs::default()).await
    }

    /// Like [`materialize`](Self::materialize) but also returns the
    /// per-op tick receipts for every patch folded this pass.
    pub async fn materialize_with_receipts(&mut self) -> Result<Vec<TickReceipt>> {
        self.engine
            .materialize(MaterializeArgs { collect_receipts: true })
            .await
    }

    /// Time-travel read (§4.3b): the graph state as of Lamport `ceiling`,
    /// without touching this handle's cached tip state.
    pub async fn materialize_at(&mut self, ceiling: u64) -> Result<warp_core::GraphState> {
        self.engine.materialize_at(ceiling).await
    }

    pub fn check_provenance_fresh(&self) -> Result<()> {
        self.engine.check_provenance_fresh()
    }

    /// Toggles whether queries may answer from whatever the engine
    /// happens to have cached (default `true`). Disabling it makes every
    /// query method below check [`Engine::has_state`]/[`Engine::is_dirty`]
    /// first, surfacing `NoState`/`StaleState` (§7) instead of silently
    /// answering from a cache that was never confirmed by a materialize
    /// pass, or one a local commit has folded into without re-confirming
    /// the rest of the frontier.
    pub fn set_auto_materialize(&mut self, enabled: bool) {
        self.auto_materialize = enabled;
    }

    pub fn auto_materialize(&self) -> bool {
        self.auto_materialize
    }

    fn ensure_queryable(&self) -> Result<()> {
        if self.auto_materialize {
            return Ok(());
        }
        if !self.engine.has_state() {
            return Err(WarpError::NoState);
        }
        if self.engine.is_dirty() {
            return Err(WarpError::StaleState);
        }
        Ok(())
    }

    pub fn state(&self) -> Result<&warp_core::GraphState> {
        self.ensure_queryable()?;
        Ok(self.engine.state())
    }

    pub fn nodes(&self) -> Result<Vec<String>> {
        self.ensure_queryable()?;
        Ok(self.engine.state().nodes())
    }

    pub fn has_node(&self, id: &str) -> Result<bool> {
        self.ensure_queryable()?;
        Ok(self.engine.state().has_node(id))
    }

    pub fn has_edge(&self, from: &str, to: &str, label: &str) -> Result<bool> {
        self.ensure_queryable()?;
        Ok(self.engine.state().has_edge(from, to, label))
    }

    pub fn node_props(&self, id: &str) -> Result<std::collections::BTreeMap<&str, &PropValue>> {
        self.ensure_queryable()?;
        Ok(self.engine.state().node_props(id))
    }

    pub fn edge_props(&self, from: &str, to: &str, label: &str) -> Result<std::collections::BTreeMap<&str, &PropValue>> {
        self.ensure_queryable()?;
        Ok(self.engine.state().edge_props(from, to, label))
    }

    /// Sorted `(neighbor, label)` pairs for every live edge touching
    /// `node_id`, via the engine's state-hash-keyed adjacency cache.
    pub fn adjacent(&mut self, node_id: &str) -> Result<Vec<(String, String)>> {
        self.ensure_queryable()?;
        self.engine.adjacent(node_id)
    }

    pub fn pending_diff(&self) -> Result<NodeEdgeDiff> {
        self.ensure_queryable()?;
        Ok(self.engine.pending_diff())
    }

    pub fn provenance(&self) -> Result<&ProvenanceIndex> {
        self.ensure_queryable()?;
        Ok(self.engine.provenance())
    }

    pub fn gc_metrics(&self) -> GcMetrics {
        self.engine.gc_metrics()
    }

    pub fn frontier(&self) -> &std::collections::BTreeMap<WriterId, String> {
        self.engine.frontier()
    }

    pub fn subscribe(
        &mut self,
        on_change: Box<dyn FnMut(&NodeEdgeDiff) + Send>,
        on_error: Option<Box<dyn FnMut(&str) + Send>>,
        replay: bool,
    ) -> SubscriptionHandle {
        self.engine.subscribers_mut().subscribe(on_change, on_error, replay)
    }

    pub fn watch(
        &mut self,
        pattern: &str,
        on_change: Box<dyn FnMut(&NodeEdgeDiff) + Send>,
        on_error: Option<Box<dyn FnMut(&str) + Send>>,
        replay: bool,
    ) -> SubscriptionHandle {
        self.engine.subscribers_mut().watch(pattern, on_change, on_error, replay)
    }

    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        self.engine.subscribers_mut().unsubscribe(handle)
    }

    /// Writes `bytes` as a content blob up front (§4.2 "content
    /// attachment") and returns its content address. Pass the returned
    /// hash into a `PropSet` (conventionally under a `_content` key)
    /// inside the closure given to [`patch`](Self::patch), and remember
    /// to thread it to [`PatchHandle::with_content`] so the patch's tree
    /// references the blob and the storage layer doesn't GC it.
    pub async fn attach_content(&self, bytes: &[u8]) -> Result<String> {
        self.storage.write_blob(bytes).await
    }

    /// Builds a patch against this handle's currently materialized state
    /// (§4.2). `f` accumulates ops via the returned [`PatchBuilder`]; the
    /// result is a [`PatchHandle`] the caller commits (or discards)
    /// separately via [`commit`](Self::commit).
    pub fn patch<F>(&mut self, policy: DeleteWithDataPolicy, f: F) -> PatchHandle
    where
        F: FnOnce(&mut PatchBuilder),
    {
        let mut builder = PatchBuilder::new(self.writer.clone(), self.own_lamport, self.engine.state(), policy);
        f(&mut builder);
        let patch = builder.build(self.engine.state().observed_frontier.clone());
        PatchHandle {
            patch,
            content_refs: Vec::new(),
        }
    }

    /// Commits `handle`'s patch (§4.2 commit sequence): write the patch
    /// blob, write a tree of the patch plus any attached content blobs
    /// sorted by name, commit with this writer's prior tip as parent,
    /// then CAS-update the writer ref. On success, eagerly folds the
    /// patch into this handle's cached state (§4.3 "eager application")
    /// and advances the local tip/lamport bookkeeping.
    pub async fn commit(&mut self, handle: PatchHandle) -> Result<String> {
        let PatchHandle { patch, content_refs } = handle;

        let patch_bytes = warp_core::codec_encode(&patch)?;
        let patch_oid = self.storage.write_blob(&patch_bytes).await?;

        let mut entries = vec![TreeEntry {
            name: "patch.cbor".to_string(),
            hash: patch_oid.clone(),
        }];
        for hash in content_refs {
            entries.push(TreeEntry {
                name: hash.clone(),
                hash,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let tree = self.storage.write_tree(&entries).await?;

        let mut trailers = std::collections::BTreeMap::new();
        trailers.insert("graph".to_string(), self.graph.clone());
        trailers.insert("writer".to_string(), self.writer.clone());
        trailers.insert("lamport".to_string(), patch.lamport.to_string());
        trailers.insert("patch-oid".to_string(), patch_oid);
        trailers.insert("schema".to_string(), CURRENT_SCHEMA.to_string());
        let message = format_message(CommitKind::Patch, &trailers);

        let parents: Vec<String> = self.own_tip.clone().into_iter().collect();
        let hash = self.storage.commit_node_with_tree(&tree, &parents, &message).await?;

        let own_ref = writer_ref(&self.graph, &self.writer);
        let cas_ok = self
            .storage
            .compare_and_swap_ref(&own_ref, &hash, self.own_tip.as_deref())
            .await?;
        if !cas_ok {
            return Err(WarpError::Storage(
                format!("writer ref {own_ref} moved concurrently; refetch and retry").into(),
            ));
        }

        self.own_tip = Some(hash.clone());
        self.own_lamport = patch.lamport;
        self.engine.apply_local(&patch, &hash);
        Ok(hash)
    }

    /// Creates a checkpoint from this handle's currently cached state
    /// (§4.4). Does not require a prior `materialize` call beyond what
    /// this handle has already folded.
    pub async fn checkpoint(&mut self) -> Result<String> {
        warp_core::create_checkpoint(
            self.storage.as_ref(),
            &self.graph,
            self.engine.state().clone(),
            Some(self.engine.provenance()),
        )
        .await
    }

    /// Builds this handle's current sync request (§4.7), carrying its
    /// locally-known frontier for the other side to diff against.
    pub fn sync_request(&self) -> SyncRequest {
        SyncRequest::new(self.engine.frontier().clone())
    }

    /// Server side of a sync exchange: answers `request` against this
    /// handle's own storage.
    pub async fn answer_sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        warp_core::handle_request(self.storage.as_ref(), &self.graph, request).await
    }

    /// Client side of a sync exchange: folds `response`'s patches into
    /// this handle's cached state and adopts its frontier (§4.7).
    pub fn apply_sync(&mut self, response: &SyncResponse) -> Result<usize> {
        self.engine.apply_sync_response(response)
    }

    /// Does this handle have any patch the frontier in `remote` doesn't?
    pub async fn sync_needed(&self, remote_frontier: &std::collections::BTreeMap<WriterId, String>) -> Result<bool> {
        warp_core::sync_needed(self.storage.as_ref(), &self.graph, remote_frontier).await
    }

    /// Forks this writer's chain at `at` into a brand new graph name
    /// (§4.9). The new graph shares history up to `at` without copying.
    pub async fn fork_writer(&self, at: &str, new_graph: &str) -> Result<()> {
        warp_core::fork(
            self.storage.as_ref(),
            &self.graph,
            ForkArgs {
                from_writer: &self.writer,
                at,
                new_graph,
            },
        )
        .await
    }

    /// Captures a replayable, composable patch range on this writer's
    /// chain (§4.9).
    pub async fn create_wormhole(&self, from: &str, to: &str) -> Result<Wormhole> {
        warp_core::create_wormhole(self.storage.as_ref(), &self.graph, &self.writer, from, to).await
    }
}

/// A built-but-not-yet-committed patch (§4.2), returned by [`Graph::patch`]
/// and consumed by [`Graph::commit`].
pub struct PatchHandle {
    patch: Patch,
    content_refs: Vec<String>,
}

impl PatchHandle {
    /// Records that `content_hash` (as returned by
    /// [`Graph::attach_content`]) must be referenced from this patch's
    /// tree so the storage layer doesn't garbage-collect it.
    pub fn with_content(mut self, content_hash: impl Into<String>) -> Self {
        self.content_refs.push(content_hash.into());
        self
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::InMemoryStorage;

    #[async_std::test]
    async fn query_on_never_materialized_handle_is_no_state() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut graph = Graph::open(
            storage,
            "g",
            "alice",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        graph.set_auto_materialize(false);

        let err = graph.nodes().unwrap_err();
        assert!(matches!(err, WarpError::NoState));
    }

    #[async_std::test]
    async fn query_after_local_commit_with_auto_materialize_disabled_succeeds() {
        // A local commit is eagerly folded (§4.3 "eager application"), so
        // the handle that made it always has real, non-dirty state for
        // itself even with auto-materialize off.
        let storage = Arc::new(InMemoryStorage::new());
        let mut graph = Graph::open(
            storage,
            "g",
            "alice",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        graph.set_auto_materialize(false);

        let p = graph.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("a").unwrap();
        });
        graph.commit(p).await.unwrap();

        assert!(graph.has_node("a").unwrap());
    }

    #[async_std::test]
    async fn query_on_checkpoint_rehydrated_handle_is_stale_until_materialized() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut writer = Graph::open(
            storage.clone(),
            "g",
            "alice",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        let p1 = writer.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("a").unwrap();
        });
        writer.commit(p1).await.unwrap();
        writer.checkpoint().await.unwrap();

        // alice keeps writing after the checkpoint was taken, so the
        // checkpoint's embedded frontier is older than alice's real tip.
        let p2 = writer.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("b").unwrap();
        });
        writer.commit(p2).await.unwrap();

        let mut reader = Graph::open(
            storage,
            "g",
            "bob",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        reader.set_auto_materialize(false);

        let err = reader.nodes().unwrap_err();
        assert!(matches!(err, WarpError::StaleState));

        // alice is `Ahead` of the frontier captured in the checkpoint (not
        // `Same`), so this pass folds the suffix and confirms the state.
        reader.materialize().await.unwrap();
        assert!(reader.has_node("a").unwrap());
        assert!(reader.has_node("b").unwrap());
    }
}
