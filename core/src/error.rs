use thiserror::Error;

/// Every error kind a `warp-core` operation can surface. Named by kind,
/// not by call site, so downstream tooling can classify on the variant.
#[derive(Debug, Error)]
pub enum WarpError {
    #[error("no materialized state available and auto-materialize is disabled")]
    NoState,
    #[error("cached state is stale and auto-materialize is disabled")]
    StaleState,
    #[error("provenance index is degraded after a ceiling seek-cache hit")]
    ProvenanceDegraded,
    #[error("patch for writer {writer} rejected: commit is behind or equal to the checkpoint frontier")]
    BackfillRejected { writer: String },
    #[error("writer {writer} has forked: commit diverges from the checkpoint frontier")]
    WriterForked { writer: String },
    #[error("malformed commit trailer on writer ref: {reason}")]
    InvalidPatchMessage { reason: String },
    #[error("legacy schema present with no migration checkpoint")]
    MigrationRequired,

    #[error("fork arguments invalid: {reason}")]
    ForkInvalidArgs { reason: String },
    #[error("fork source writer {writer} not found")]
    ForkWriterNotFound { writer: String },
    #[error("fork source patch {hash} not found")]
    ForkPatchNotFound { hash: String },
    #[error("fork source patch {hash} is not in writer {writer}'s chain")]
    ForkPatchNotInChain { writer: String, hash: String },
    #[error("fork name {name} is invalid")]
    ForkNameInvalid { name: String },
    #[error("fork name {name} already exists")]
    ForkAlreadyExists { name: String },
    #[error("fork writer id {writer} is invalid")]
    ForkWriterIdInvalid { writer: String },

    #[error("sync remote url invalid: {0}")]
    SyncRemoteUrl(String),
    #[error("sync remote error: {0}")]
    SyncRemote(String),
    #[error("sync protocol error: {0}")]
    SyncProtocol(String),
    #[error("sync timed out")]
    SyncTimeout,
    #[error("sync network error: {0}")]
    SyncNetwork(String),

    #[error("operation aborted")]
    OperationAborted,

    #[error("wormhole: commit {0} not found")]
    WormholeShaNotFound(String),
    #[error("wormhole: invalid range ({from} is not an ancestor of {to})")]
    WormholeInvalidRange { from: String, to: String },
    #[error("wormhole: range spans more than one writer")]
    WormholeMultiWriter,
    #[error("wormhole: commit {0} is not a patch commit")]
    WormholeNotPatch(String),

    #[error("storage adapter error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("codec error: {0}")]
    Codec(String),
}

impl WarpError {
    /// Sync-kind classification from the error-handling design: only
    /// `SyncRemote`, `SyncTimeout`, `SyncNetwork` are retryable.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            WarpError::SyncRemote(_) | WarpError::SyncTimeout | WarpError::SyncNetwork(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WarpError>;
