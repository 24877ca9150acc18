//! # warp-core
//!
//! The reducer, CRDT primitives, and materialization engine behind a
//! multi-writer, causally-consistent property graph replicated over a
//! content-addressed commit store (refs, blobs, trees, commits — the same
//! shape as a git object database, consumed through [`storage::StorageAdapter`]
//! rather than owned by this crate).
//!
//! ## Model
//! Node and edge presence is tracked with an observed-remove set
//! ([`orset::OrSet`]), keyed by per-writer [`dot::Dot`]s so concurrent
//! add/remove pairs resolve deterministically without coordination.
//! Properties are last-writer-wins registers ([`lww::LwwRegister`]) broken
//! by total-ordered [`event::EventId`]. A writer's causal knowledge is a
//! [`vv::VersionVector`]: a join-semilattice under pointwise max.
//!
//! ## Pipeline
//! A writer builds a [`patch::Patch`] against its locally materialized
//! [`state::GraphState`] with a [`patch::PatchBuilder`], commits it to its
//! own ref, and the [`reducer`] folds patches — its own and every other
//! writer's — into the shared state in a fixed causal order
//! ([`reducer::sort_causally`]). [`materialize::Engine`] drives that fold
//! across repeated calls: discovering writer refs, validating each tip's
//! ancestry against what was last folded, triggering
//! [`checkpoint`]/[`gc`] as thresholds are crossed, and dispatching
//! [`diff`]s to [`subscribe::Subscribers`]. [`sync`] carries patches between
//! two stores that don't share a transport of their own. [`fork`] and its
//! [`fork::Wormhole`] let a writer's content-addressed history be shared or
//! replayed independent of the graph it was first committed under.
//!
//! ## Provenance
//! Every patch's `reads ∪ writes` is recorded in a [`provenance::ProvenanceIndex`],
//! letting [`provenance::backward_cone`] answer "what could have produced
//! this value" without a full replay.
mod checkpoint;
mod codec;
mod config;
mod diff;
mod dot;
mod error;
mod event;
mod fork;
mod gc;
mod lww;
mod materialize;
mod message;
mod orset;
mod patch;
mod provenance;
mod receipt;
mod reducer;
mod refs;
mod state;
mod storage;
mod subscribe;
mod sync;
mod vv;

pub use crate::checkpoint::{create as create_checkpoint, load as load_checkpoint, Checkpoint, VisibleSnapshot};
pub use crate::codec::{decode as codec_decode, encode as codec_encode, hash_bytes, hash_of};
pub use crate::config::{CheckpointPolicy, DeleteWithDataPolicy, GcPolicy, SyncRetryPolicy};
pub use crate::diff::{diff, edge_prop_diff, NodeEdgeDiff};
pub use crate::dot::{Dot, WriterId};
pub use crate::error::{Result, WarpError};
pub use crate::event::EventId;
pub use crate::fork::{fork, create_wormhole, ForkArgs, Wormhole};
pub use crate::gc::{compute_applied_vv, GcMetrics, GcOutcome};
pub use crate::lww::{LwwOutcome, LwwRegister};
pub use crate::materialize::{Engine, MaterializeArgs, WriterStatus};
pub use crate::message::{format_message, parse_message, CommitKind};
pub use crate::orset::OrSet;
pub use crate::patch::{Op, Patch, PatchBuilder, CURRENT_SCHEMA};
pub use crate::provenance::{backward_cone, ProvenanceIndex};
pub use crate::receipt::{OpOutcome, OpReceipt, ReceiptSink, TickReceipt};
pub use crate::reducer::{join, reduce, sort_causally};
pub use crate::refs::{audit_ref, checkpoint_ref, coverage_ref, writer_id_from_ref, writer_ref, writers_prefix};
pub use crate::state::{GraphState, PropValue, EDGE_PROP_PREFIX};
pub use crate::storage::{InMemoryStorage, NodeInfo, PingInfo, StorageAdapter, TreeEntry};
pub use crate::subscribe::{SubscriptionHandle, Subscribers};
pub use crate::sync::{
    apply_response, classify_http_status, handle_request, next_backoff_delay, sync_needed,
    validate_remote_url, with_retry, AbortSignal, SyncEvent, SyncRequest, SyncResponse, WirePatch,
};
pub use crate::vv::VersionVector;
