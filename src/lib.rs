//! # warp
//!
//! Thin facade over [`warp_core`]: a handle for one writer's view of one
//! graph, wiring the engine's reducer/materialization/checkpoint/GC
//! pipeline to a concrete [`StorageAdapter`] and adding the bits a caller
//! actually drives a handle with — committing a patch under this writer's
//! own ref, the time-travel and provenance-slice reads, fork/wormhole, and
//! subscriptions. Transport for the sync HTTP endpoint, the CLI shell, and
//! a durable receipt chain are external collaborators (§1) this crate does
//! not implement; [`warp_core::handle_request`]/[`warp_core::apply_response`]
//! expose the wire-level request/response so a caller can carry them over
//! whatever transport it likes.
mod anchor;
mod graph;
mod slice;

pub use anchor::create_anchor;
pub use graph::{Graph, PatchHandle};
pub use slice::materialize_slice;

pub use warp_core::{
    apply_response, audit_ref, backward_cone, checkpoint_ref, classify_http_status,
    compute_applied_vv, coverage_ref, create_checkpoint, create_wormhole, diff, edge_prop_diff,
    fork, format_message, handle_request, load_checkpoint, next_backoff_delay, parse_message,
    sync_needed, validate_remote_url, with_retry, writer_id_from_ref, writer_ref, writers_prefix,
    AbortSignal, Checkpoint, CheckpointPolicy,
    CommitKind, DeleteWithDataPolicy, Dot, EventId, ForkArgs, GcMetrics, GcOutcome, GcPolicy,
    GraphState, InMemoryStorage, LwwOutcome, LwwRegister, MaterializeArgs, NodeEdgeDiff, NodeInfo,
    Op, OpOutcome, OpReceipt, Patch, PatchBuilder, PingInfo, ProvenanceIndex, PropValue,
    ReceiptSink, Result, StorageAdapter, SubscriptionHandle, SyncEvent, SyncRequest, SyncResponse,
    SyncRetryPolicy, TickReceipt, TreeEntry, VersionVector, VisibleSnapshot, WarpError, Wormhole,
    WriterId, WriterStatus, CURRENT_SCHEMA, EDGE_PROP_PREFIX,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[async_std::test]
    async fn two_writers_converge_after_materialize() {
        // Scenario 1 (§8): alice and bob each commit independently against
        // the same in-memory store, then a third handle materializes both.
        let storage = Arc::new(InMemoryStorage::new());
        let mut alice = Graph::open(
            storage.clone(),
            "social",
            "alice",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        let alice_patch = alice.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("user:alice").unwrap();
        });
        alice.commit(alice_patch).await.unwrap();

        let mut bob = Graph::open(
            storage.clone(),
            "social",
            "bob",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        let bob_patch = bob.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("user:bob").unwrap();
        });
        bob.commit(bob_patch).await.unwrap();
        // bob's own commit was already folded eagerly (§4.3 "eager
        // application"); the edge below doesn't require bob to have
        // observed alice's node first (dangling edges are masked, not
        // rejected, per invariant 3).
        let bob_edge_patch = bob.patch(DeleteWithDataPolicy::Reject, |b| {
            b.edge_add("user:alice", "user:bob", "follows");
        });
        bob.commit(bob_edge_patch).await.unwrap();

        let mut observer = Graph::open(
            storage,
            "social",
            "observer",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        observer.materialize().await.unwrap();
        let mut nodes = observer.nodes().unwrap();
        nodes.sort();
        assert_eq!(nodes, vec!["user:alice".to_string(), "user:bob".to_string()]);
        assert!(observer.has_edge("user:alice", "user:bob", "follows").unwrap());
    }
}
