use std::time::Duration;

/// Controls automatic checkpoint creation during materialization (§4.3/§4.4).
#[derive(Clone, Copy, Debug)]
pub struct CheckpointPolicy {
    pub patch_threshold: u64,
    pub enabled: bool,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            patch_threshold: 256,
            enabled: true,
        }
    }
}

/// Controls tombstone compaction during materialization (§4.6).
#[derive(Clone, Copy, Debug)]
pub struct GcPolicy {
    pub tombstone_ratio_threshold: f64,
    pub min_tombstones: u64,
    pub patches_since_compaction_threshold: u64,
    pub enabled: bool,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            tombstone_ratio_threshold: 0.5,
            min_tombstones: 64,
            patches_since_compaction_threshold: 512,
            enabled: true,
        }
    }
}

/// Decorrelated-jitter exponential backoff caps for the sync retry wrapper
/// (§4.7/§5).
#[derive(Clone, Copy, Debug)]
pub struct SyncRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SyncRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// How `NodeRemove`/`EdgeRemove` handle an element that still has
/// attached data (incident edges, properties) at builder `commit()` time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteWithDataPolicy {
    Reject,
    Cascade,
    Warn,
}

impl Default for DeleteWithDataPolicy {
    fn default() -> Self {
        Self::Reject
    }
}
