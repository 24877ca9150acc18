use crate::checkpoint::{self, Checkpoint};
use crate::codec;
use crate::config::{CheckpointPolicy, GcPolicy};
use crate::diff::{diff, NodeEdgeDiff};
use crate::dot::WriterId;
use crate::error::{Result, WarpError};
use crate::gc;
use crate::message;
use crate::patch::Patch;
use crate::provenance::ProvenanceIndex;
use crate::receipt::TickReceipt;
use crate::refs;
use crate::reducer;
use crate::state::GraphState;
use crate::storage::StorageAdapter;
use crate::subscribe::Subscribers;
use crate::sync::SyncResponse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// How a writer's on-disk tip compares to what this engine last folded in,
/// named the way §4.3's ancestry validation names the four relations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterStatus {
    /// Tip unchanged since the last materialize. §4.3 classifies `same`
    /// alongside `behind` as a rejected backfill, not a no-op: resubmitting
    /// a commit already folded is indistinguishable from replaying a stale
    /// ref, so it is rejected the same way (Scenario 4, §8).
    Same,
    /// The on-disk tip is an ancestor of what we already folded: the ref
    /// moved backward relative to applied history. Rejected as a backfill
    /// attempt rather than silently ignored.
    Behind,
    /// Tip is a descendant of what we last saw: fold the new suffix.
    Ahead,
    /// Neither tip is an ancestor of the other: the ref was force-moved,
    /// or the writer forked without going through [`crate::fork::fork`].
    Diverged,
}

/// Small LRU keyed on an arbitrary ordered key, used by both the ceiling
/// seek cache and the adjacency cache (§4.3b). Linear scan is fine at the
/// sizes these caches are bounded to.
struct LruCache<K: Eq + Clone, V> {
    capacity: usize,
    entries: VecDeque<(K, V)>,
}

impl<K: Eq + Clone, V> LruCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos).unwrap();
        self.entries.push_front(entry);
        self.entries.front().map(|(_, v)| v)
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.retain(|(k, _)| k != &key);
        self.entries.push_front((key, value));
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }
}

const SEEK_CACHE_CAPACITY: usize = 8;
const ADJACENCY_CACHE_CAPACITY: usize = 8;

/// The live materialization engine for one graph (§4.3). Owns the folded
/// `GraphState`, the per-writer frontier it was folded up to, the
/// provenance index, and the GC/checkpoint bookkeeping across repeated
/// `materialize` calls against a storage adapter.
pub struct Engine {
    storage: Arc<dyn StorageAdapter>,
    graph: String,
    checkpoint_policy: CheckpointPolicy,
    gc_policy: GcPolicy,

    state: GraphState,
    frontier: BTreeMap<WriterId, String>,
    provenance: ProvenanceIndex,
    subscribers: Subscribers,
    last_notified: Option<GraphState>,

    patches_since_checkpoint: u64,
    patches_since_gc: u64,
    last_gc: Instant,
    in_checkpoint: bool,
    provenance_degraded: bool,

    /// Whether any cached state exists at all, including one rehydrated
    /// from a checkpoint (§7 `NoState`).
    has_state: bool,
    /// Whether the cached state is known to possibly lag the writer refs
    /// it should reflect — set whenever state is loaded from a checkpoint
    /// without a confirming pass, cleared by a successful `materialize`
    /// (§7 `StaleState`, §4.3 "eager application").
    dirty: bool,

    seek_cache: LruCache<String, (GraphState, ProvenanceIndex)>,
    adjacency_cache: LruCache<String, BTreeMap<String, Vec<(String, String)>>>,
}

impl Engine {
    /// Loads the latest checkpoint (if any) as the engine's starting
    /// point; an empty graph starts from a default, empty state.
    pub async fn load(
        storage: Arc<dyn StorageAdapter>,
        graph: impl Into<String>,
        checkpoint_policy: CheckpointPolicy,
        gc_policy: GcPolicy,
    ) -> Result<Self> {
        let graph = graph.into();
        let checkpoint = checkpoint::load(storage.as_ref(), &graph).await?;
        let (state, frontier, provenance, has_state, dirty) = match checkpoint {
            Some(Checkpoint {
                state,
                frontier,
                provenance,
                ..
            }) => (state, frontier, provenance.unwrap_or_default(), true, true),
            None => (GraphState::new(), BTreeMap::new(), ProvenanceIndex::new(), false, false),
        };
        Ok(Self {
            storage,
            graph,
            checkpoint_policy,
            gc_policy,
            state,
            frontier,
            provenance,
            subscribers: Subscribers::new(),
            last_notified: None,
            patches_since_checkpoint: 0,
            patches_since_gc: 0,
            last_gc: Instant::now(),
            in_checkpoint: false,
            provenance_degraded: false,
            has_state,
            dirty,
            seek_cache: LruCache::new(SEEK_CACHE_CAPACITY),
            adjacency_cache: LruCache::new(ADJACENCY_CACHE_CAPACITY),
        })
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn frontier(&self) -> &BTreeMap<WriterId, String> {
        &self.frontier
    }

    /// Whether any cached state exists, including one rehydrated from a
    /// checkpoint without a confirming `materialize` pass (§7 `NoState`).
    pub fn has_state(&self) -> bool {
        self.has_state
    }

    /// Whether the cached state might lag the writer refs it should
    /// reflect (§7 `StaleState`). Cleared by a successful `materialize`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn subscribers_mut(&mut self) -> &mut Subscribers {
        &mut self.subscribers
    }

    /// Full path of §4.3: discovers every writer ref, classifies its tip
    /// against the frontier this engine last folded, rejects divergence,
    /// folds new patches in causal order, runs the GC check, triggers an
    /// auto-checkpoint past the patch threshold, and dispatches the diff
    /// to subscribers. Returns the tick receipts folded this pass (empty
    /// unless `args.collect_receipts`). Callers with a Lamport ceiling in
    /// effect should call [`Engine::materialize_at`] instead: that path
    /// skips auto-checkpoint and GC entirely and never touches this
    /// engine's cached tip state (§4.3b).
    pub async fn materialize(&mut self, args: MaterializeArgs) -> Result<Vec<TickReceipt>> {
        let writer_refs = self.storage.list_refs(&refs::writers_prefix(&self.graph)).await?;
        let mut pending: Vec<(Patch, String)> = Vec::new();
        let mut new_tips: BTreeMap<WriterId, String> = BTreeMap::new();

        for name in &writer_refs {
            let Some(writer) = refs::writer_id_from_ref(&self.graph, name) else {
                continue;
            };
            let Some(tip) = self.storage.read_ref(name).await? else {
                continue;
            };
            let known = self.frontier.get(&writer).cloned();
            let status = self.classify(known.as_deref(), &tip).await?;
            match status {
                WriterStatus::Same => {
                    return Err(WarpError::BackfillRejected { writer });
                }
                WriterStatus::Behind => {
                    return Err(WarpError::BackfillRejected { writer });
                }
                WriterStatus::Diverged => {
                    return Err(WarpError::WriterForked { writer });
                }
                WriterStatus::Ahead => {}
            }

            let chain = crate::storage::walk_chain(self.storage.as_ref(), &tip, known.as_deref()).await?;
            for hash in chain {
                let patch = self.load_patch(&hash).await?;
                pending.push((patch, hash));
            }
            new_tips.insert(writer, tip);
        }

        reducer::sort_causally(&mut pending);
        let mut receipts = Vec::with_capacity(pending.len());
        for (patch, hash) in &pending {
            let receipt = reducer::join(&mut self.state, patch, hash, args.collect_receipts);
            self.provenance.record(patch, hash);
            if args.collect_receipts {
                receipts.push(receipt);
            }
        }
        self.frontier = new_tips;

        let folded = pending.len() as u64;
        self.patches_since_checkpoint += folded;
        self.patches_since_gc += folded;

        if folded > 0 {
            match gc::run(&mut self.state, &self.gc_policy, self.patches_since_gc, self.last_gc) {
                gc::GcOutcome::Compacted { .. } => {
                    self.patches_since_gc = 0;
                    self.last_gc = Instant::now();
                }
                gc::GcOutcome::SkippedBelowThreshold
                | gc::GcOutcome::SkippedDisabledButExceeded { .. } => {}
            }

            if self.checkpoint_policy.enabled
                && !self.in_checkpoint
                && self.patches_since_checkpoint >= self.checkpoint_policy.patch_threshold
            {
                self.in_checkpoint = true;
                let snapshot = self.state.clone();
                let result = checkpoint::create(self.storage.as_ref(), &self.graph, snapshot, Some(&self.provenance)).await;
                self.in_checkpoint = false;
                result?;
                self.patches_since_checkpoint = 0;
            }

            self.subscribers.dispatch(self.last_notified.as_ref(), &self.state);
            self.last_notified = Some(self.state.clone());
        }

        self.has_state = true;
        self.dirty = false;

        tracing::debug!(graph = %self.graph, folded, "materialize pass complete");
        Ok(receipts)
    }

    /// Eager application after a local commit (§4.3 "eager application"):
    /// folds one already-committed patch straight into the cached state
    /// instead of waiting for the next full `materialize` pass, and
    /// records its writer as the new frontier tip for that writer so the
    /// next pass doesn't refold it. The caller is responsible for having
    /// already written the commit to storage under its own ref.
    ///
    /// This always yields a real cached state (`has_state` becomes
    /// `true`), but it only folds the one patch the caller just committed
    /// — it says nothing about whether other writers' tips have moved, so
    /// an engine that was already `dirty` stays dirty; one that was clean
    /// stays clean, since nothing else was missed.
    pub fn apply_local(&mut self, patch: &Patch, hash: &str) -> TickReceipt {
        let receipt = reducer::join(&mut self.state, patch, hash, true);
        self.provenance.record(patch, hash);
        self.frontier.insert(patch.writer.clone(), hash.to_string());
        self.patches_since_checkpoint += 1;
        self.patches_since_gc += 1;
        self.has_state = true;
        self.subscribers.dispatch(self.last_notified.as_ref(), &self.state);
        self.last_notified = Some(self.state.clone());
        receipt
    }

    /// Client side of §4.7, routed through this engine's own cached state:
    /// decodes and causally sorts the response's patches, folds them via
    /// the reducer, records their provenance, and replaces the frontier
    /// snapshot with the response's per-writer tips. Deliberately does not
    /// create a checkpoint or run GC itself — those stay tied to
    /// [`Engine::materialize`]'s own discovery pass — but does advance
    /// `patches_since_checkpoint`/`patches_since_gc` so a later
    /// `materialize` call accounts for the synced patches. Returns the
    /// number of patches applied.
    pub fn apply_sync_response(&mut self, response: &SyncResponse) -> Result<usize> {
        let mut decoded: Vec<(Patch, String)> = Vec::with_capacity(response.patches.len());
        for wp in &response.patches {
            let bytes = hex::decode(&wp.patch_bytes).map_err(|e| WarpError::SyncProtocol(e.to_string()))?;
            let patch: Patch = codec::decode(&bytes)?;
            decoded.push((patch, wp.sha.clone()));
        }
        reducer::sort_causally(&mut decoded);
        for (patch, hash) in &decoded {
            reducer::join(&mut self.state, patch, hash, false);
            self.provenance.record(patch, hash);
        }
        for (writer, hash) in &response.frontier {
            self.frontier.insert(writer.clone(), hash.clone());
        }
        self.patches_since_gc += decoded.len() as u64;
        self.patches_since_checkpoint += decoded.len() as u64;
        self.has_state = true;

        if !decoded.is_empty() {
            self.subscribers.dispatch(self.last_notified.as_ref(), &self.state);
            self.last_notified = Some(self.state.clone());
        }
        Ok(decoded.len())
    }

    /// The GC metrics (§4.6) this engine would check on its next
    /// `materialize` pass, independent of whether thresholds are crossed.
    pub fn gc_metrics(&self) -> gc::GcMetrics {
        gc::metrics(&self.state, self.patches_since_gc, self.last_gc)
    }

    async fn classify(&self, known: Option<&str>, tip: &str) -> Result<WriterStatus> {
        match known {
            // A writer this engine has never folded before: its entire
            // chain is new, equivalent to "ahead" of an empty frontier.
            None => Ok(WriterStatus::Ahead),
            Some(known) if known == tip => Ok(WriterStatus::Same),
            Some(known) => {
                if crate::storage::is_ancestor(self.storage.as_ref(), known, tip).await? {
                    Ok(WriterStatus::Ahead)
                } else if crate::storage::is_ancestor(self.storage.as_ref(), tip, known).await? {
                    Ok(WriterStatus::Behind)
                } else {
                    Ok(WriterStatus::Diverged)
                }
            }
        }
    }

    async fn load_patch(&self, hash: &str) -> Result<Patch> {
        let message_text = self.storage.show_node(hash).await?;
        let (_, trailers) = message::parse_message(&message_text)?;
        let oid = trailers
            .get("patch-oid")
            .ok_or_else(|| WarpError::InvalidPatchMessage {
                reason: format!("commit {hash} missing patch-oid trailer"),
            })?;
        let bytes = self.storage.read_blob(oid).await?;
        codec::decode(&bytes)
    }

    /// Time-travel path (§4.3b): materializes the graph as of a Lamport
    /// `ceiling`, replaying every writer's full chain (no checkpoint, no
    /// GC) but dropping any patch whose `lamport > ceiling`. Keyed on
    /// `(ceiling, frontier-fingerprint)` — the current writer tips — so a
    /// repeat seek at the same ceiling against an unchanged frontier hits
    /// the cache; a cache hit is cheap but does not re-derive provenance,
    /// so it marks the engine's provenance index degraded until the next
    /// full [`Engine::materialize`] pass rebuilds it.
    pub async fn materialize_at(&mut self, ceiling: u64) -> Result<GraphState> {
        let writer_refs = self.storage.list_refs(&refs::writers_prefix(&self.graph)).await?;
        let mut tips: BTreeMap<WriterId, String> = BTreeMap::new();
        for name in &writer_refs {
            let Some(writer) = refs::writer_id_from_ref(&self.graph, name) else {
                continue;
            };
            if let Some(tip) = self.storage.read_ref(name).await? {
                tips.insert(writer, tip);
            }
        }

        let key = format!("{}/{}", ceiling, ceiling_fingerprint(&tips));
        if let Some((state, _)) = self.seek_cache.get(&key) {
            self.provenance_degraded = true;
            tracing::debug!(graph = %self.graph, ceiling, "ceiling seek cache hit, provenance degraded");
            return Ok(state.clone());
        }

        let mut pending: Vec<(Patch, String)> = Vec::new();
        for tip in tips.values() {
            let chain = crate::storage::walk_chain(self.storage.as_ref(), tip, None).await?;
            for hash in chain {
                let patch = self.load_patch(&hash).await?;
                if patch.lamport <= ceiling {
                    pending.push((patch, hash));
                }
            }
        }
        reducer::sort_causally(&mut pending);
        let (state, _) = reducer::reduce(&pending, None, false);

        let mut provenance = ProvenanceIndex::new();
        for (patch, hash) in &pending {
            provenance.record(patch, hash);
        }

        self.seek_cache.put(key, (state.clone(), provenance));
        Ok(state)
    }

    /// Returns `Err(ProvenanceDegraded)` if the last time-travel read was
    /// served from the seek cache rather than a live fold; clears the flag
    /// once a subsequent full materialize pass has run (§4.3b).
    pub fn check_provenance_fresh(&self) -> Result<()> {
        if self.provenance_degraded {
            Err(WarpError::ProvenanceDegraded)
        } else {
            Ok(())
        }
    }

    pub fn provenance(&self) -> &ProvenanceIndex {
        &self.provenance
    }

    /// Sorted `(neighbor_id, label)` pairs for every live edge touching
    /// `node_id`, regardless of direction. Cached per state-hash so
    /// repeated adjacency queries against an unchanged materialized state
    /// don't rescan every edge (§4.3b "adjacency cache").
    pub fn adjacent(&mut self, node_id: &str) -> Result<Vec<(String, String)>> {
        let key = codec::hash_of(&self.state)?;
        if let Some(map) = self.adjacency_cache.get(&key) {
            return Ok(map.get(node_id).cloned().unwrap_or_default());
        }
        let mut map: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (from, to, label) in self.state.alive_edges() {
            map.entry(from.to_string())
                .or_default()
                .push((to.to_string(), label.to_string()));
            map.entry(to.to_string())
                .or_default()
                .push((from.to_string(), label.to_string()));
        }
        for neighbors in map.values_mut() {
            neighbors.sort();
        }
        let result = map.get(node_id).cloned().unwrap_or_default();
        self.adjacency_cache.put(key, map);
        Ok(result)
    }

    /// Snapshots a diff against the previous notification state without
    /// dispatching, for callers that want to inspect what would be sent.
    pub fn pending_diff(&self) -> NodeEdgeDiff {
        let empty = GraphState::new();
        diff(self.last_notified.as_ref().unwrap_or(&empty), &self.state)
    }
}

#[derive(Default)]
pub struct MaterializeArgs {
    pub collect_receipts: bool,
}

fn ceiling_fingerprint(ceiling: &BTreeMap<WriterId, String>) -> String {
    let mut buf = String::new();
    for (writer, hash) in ceiling {
        buf.push_str(writer);
        buf.push('=');
        buf.push_str(hash);
        buf.push(';');
    }
    crate::codec::hash_bytes(buf.as_bytes())
}
