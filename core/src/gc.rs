use crate::config::GcPolicy;
use crate::state::GraphState;
use crate::vv::VersionVector;
use std::time::{Duration, Instant};

/// Metrics the reducer can always report, regardless of whether GC is
/// enabled (§4.6).
#[derive(Clone, Debug)]
pub struct GcMetrics {
    pub tombstone_count: usize,
    pub tombstone_ratio: f64,
    pub live_dot_count: usize,
    pub patches_since_last_compaction: u64,
    pub time_since_last_compaction: Duration,
}

pub fn metrics(state: &GraphState, patches_since: u64, last_compaction: Instant) -> GcMetrics {
    let tombstones = state.node_alive.tombstone_count() + state.edge_alive.tombstone_count();
    let live = state.node_alive.live_dot_count() + state.edge_alive.live_dot_count();
    let total = tombstones + live;
    GcMetrics {
        tombstone_count: tombstones,
        tombstone_ratio: if total == 0 {
            0.0
        } else {
            tombstones as f64 / total as f64
        },
        live_dot_count: live,
        patches_since_last_compaction: patches_since,
        time_since_last_compaction: last_compaction.elapsed(),
    }
}

fn exceeds_threshold(metrics: &GcMetrics, policy: &GcPolicy) -> bool {
    metrics.tombstone_count as u64 >= policy.min_tombstones
        && (metrics.tombstone_ratio >= policy.tombstone_ratio_threshold
            || metrics.patches_since_last_compaction >= policy.patches_since_compaction_threshold)
}

/// `appliedVV`: pointwise max of counters across all live and tombstoned
/// dots, per writer (§4.6).
pub fn compute_applied_vv(state: &GraphState) -> VersionVector {
    let mut vv = VersionVector::new();
    for dot in state.node_alive.all_dots().chain(state.edge_alive.all_dots()) {
        vv.set(dot.writer.clone(), dot.counter);
    }
    vv
}

/// Result of a GC pass: either compacted (with the applied-VV used) or
/// skipped, with the reason recorded for the caller to log.
pub enum GcOutcome {
    Compacted { applied_vv: VersionVector },
    SkippedBelowThreshold,
    SkippedDisabledButExceeded { metrics: GcMetrics },
}

/// Runs the GC check (§4.6): if thresholds are exceeded and the policy is
/// enabled, compacts tombstoned dots bounded by `computeAppliedVV(state)`.
/// If exceeded but disabled, the caller should emit a warning (never
/// abort). GC failures must never propagate out of `materialize`; this
/// function itself is infallible, matching that contract.
pub fn run(
    state: &mut GraphState,
    policy: &GcPolicy,
    patches_since: u64,
    last_compaction: Instant,
) -> GcOutcome {
    let m = metrics(state, patches_since, last_compaction);
    if !exceeds_threshold(&m, policy) {
        return GcOutcome::SkippedBelowThreshold;
    }
    if !policy.enabled {
        tracing::warn!(
            tombstones = m.tombstone_count,
            ratio = m.tombstone_ratio,
            "gc thresholds exceeded but gc policy disabled"
        );
        return GcOutcome::SkippedDisabledButExceeded { metrics: m };
    }
    let applied_vv = compute_applied_vv(state);
    compact(state, &applied_vv);
    tracing::debug!(writers = applied_vv_writer_count(&applied_vv), "gc compacted tombstones");
    GcOutcome::Compacted { applied_vv }
}

fn applied_vv_writer_count(vv: &VersionVector) -> usize {
    vv.iter().count()
}

/// Compacts `state`'s OR-Sets against `applied_vv`: preserves every alive
/// element and removes zero live dots (§8 property 8).
pub fn compact(state: &mut GraphState, applied_vv: &VersionVector) {
    state.node_alive.compact(applied_vv);
    state.edge_alive.compact(applied_vv);
}
