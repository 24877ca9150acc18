use crate::codec;
use crate::dot::WriterId;
use crate::error::{Result, WarpError};
use crate::patch::Patch;
use crate::refs;
use crate::reducer;
use crate::storage::{self, StorageAdapter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// `{type: "sync-request", frontier: writer -> hash}` (§4.7/§6). `frontier`
/// is a JSON object, never a list, and keys are serialized in sorted
/// order by virtue of the `BTreeMap` backing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub frontier: BTreeMap<WriterId, String>,
}

impl SyncRequest {
    pub fn new(frontier: BTreeMap<WriterId, String>) -> Self {
        Self {
            kind: "sync-request".to_string(),
            frontier,
        }
    }
}

/// One patch carried on the wire: hex-encoded bytes per §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WirePatch {
    #[serde(rename = "writerId")]
    pub writer_id: WriterId,
    pub sha: String,
    #[serde(rename = "patchBytes")]
    pub patch_bytes: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub frontier: BTreeMap<WriterId, String>,
    pub patches: Vec<WirePatch>,
}

impl SyncResponse {
    pub fn new(frontier: BTreeMap<WriterId, String>, patches: Vec<WirePatch>) -> Self {
        Self {
            kind: "sync-response".to_string(),
            frontier,
            patches,
        }
    }
}

/// Rejects a sync remote URL lacking an `http://`/`https://` scheme before
/// a caller's transport glue dials it. This crate doesn't own the HTTP
/// client (§1), but owns the error taxonomy a transport failure classifies
/// into, so URL shape is validated here rather than left unchecked.
pub fn validate_remote_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(WarpError::SyncRemoteUrl(url.to_string()))
    }
}

/// Classifies an HTTP response status into the sync error taxonomy (§4.7
/// "Transport (semantics only)"): 4xx is a non-retryable protocol error,
/// 5xx is a retryable remote error. Network/timeout failures don't carry a
/// status at all and are the caller's `SyncNetwork`/`SyncTimeout` to raise.
pub fn classify_http_status(status: u16, body: impl Into<String>) -> WarpError {
    let body = body.into();
    if (500..600).contains(&status) {
        WarpError::SyncRemote(body)
    } else {
        WarpError::SyncProtocol(format!("HTTP {status}: {body}"))
    }
}

/// Serializes a request/response to the canonical JSON wire format
/// (recursively sorted keys, guaranteed by `BTreeMap` fields + serde_json's
/// own stable struct-field order).
pub fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| WarpError::SyncProtocol(e.to_string()))
}

pub fn decode_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| WarpError::SyncProtocol(e.to_string()))
}

/// Server side of §4.7: for each locally-known writer, if the requester's
/// frontier is absent or strictly behind (by ancestry), walk back to the
/// requester's hash (exclusive) and include every intervening patch;
/// writers unknown to the requester are included in full. Returns the
/// server's own frontier so the client learns about new writers.
pub async fn handle_request(
    storage: &dyn StorageAdapter,
    graph: &str,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    let writer_refs = storage.list_refs(&refs::writers_prefix(graph)).await?;
    let mut local_frontier = BTreeMap::new();
    let mut patches = Vec::new();

    for name in &writer_refs {
        let Some(writer) = refs::writer_id_from_ref(graph, name) else {
            continue;
        };
        let Some(tip) = storage.read_ref(name).await? else {
            continue;
        };
        local_frontier.insert(writer.clone(), tip.clone());

        let requester_hash = request.frontier.get(&writer);
        let stop_at = match requester_hash {
            None => None,
            Some(h) if h == &tip => continue,
            Some(h) => {
                if storage::is_ancestor(storage, h, &tip).await? {
                    Some(h.as_str())
                } else {
                    // diverged or ahead of us: send everything we have so
                    // the client's own materialize can classify it.
                    None
                }
            }
        };

        let chain = storage::walk_chain(storage, &tip, stop_at).await?;
        for hash in chain {
            let message_text = storage.show_node(&hash).await?;
            let (_, trailers) = crate::message::parse_message(&message_text)?;
            let oid = trailers
                .get("patch-oid")
                .ok_or_else(|| WarpError::InvalidPatchMessage {
                    reason: format!("commit {hash} missing patch-oid trailer"),
                })?;
            let bytes = storage.read_blob(oid).await?;
            patches.push(WirePatch {
                writer_id: writer.clone(),
                sha: hash,
                patch_bytes: hex::encode(bytes),
            });
        }
    }

    Ok(SyncResponse::new(local_frontier, patches))
}

/// Client side of §4.7: decodes and causally sorts the response's patches,
/// folds them into `state` via the reducer, and returns the updated
/// frontier snapshot plus the count of patches applied (the caller
/// increments its own patches-since-GC counter by this amount).
pub fn apply_response(
    state: &mut crate::state::GraphState,
    response: &SyncResponse,
) -> Result<(BTreeMap<WriterId, String>, usize)> {
    let mut decoded: Vec<(Patch, String)> = Vec::with_capacity(response.patches.len());
    for wp in &response.patches {
        let bytes = hex::decode(&wp.patch_bytes).map_err(|e| WarpError::SyncProtocol(e.to_string()))?;
        let patch: Patch = codec::decode(&bytes)?;
        decoded.push((patch, wp.sha.clone()));
    }
    reducer::sort_causally(&mut decoded);
    for (patch, hash) in &decoded {
        reducer::join(state, patch, hash, false);
    }
    Ok((response.frontier.clone(), decoded.len()))
}

/// Does any locally-known writer have a tip beyond `remote_frontier`'s
/// recorded hash for that writer?
pub async fn sync_needed(
    storage: &dyn StorageAdapter,
    graph: &str,
    remote_frontier: &BTreeMap<WriterId, String>,
) -> Result<bool> {
    let writer_refs = storage.list_refs(&refs::writers_prefix(graph)).await?;
    for name in &writer_refs {
        let Some(writer) = refs::writer_id_from_ref(graph, name) else {
            continue;
        };
        let Some(tip) = storage.read_ref(name).await? else {
            continue;
        };
        match remote_frontier.get(&writer) {
            None => return Ok(true),
            Some(h) if h == &tip => continue,
            Some(h) => {
                if storage::is_ancestor(storage, h, &tip).await? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Lifecycle events the retry wrapper emits around one sync attempt (§5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncEvent {
    Connecting,
    RequestBuilt,
    RequestSent,
    ResponseReceived,
    Applied,
    Retrying,
    Failed,
    Complete,
}

/// A single round of abort-signal polling: implementations back this with
/// whatever cancellation primitive the caller's executor provides. The
/// default `()` implementation never aborts.
pub trait AbortSignal {
    fn is_aborted(&self) -> bool;
}

impl AbortSignal for () {
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Decorrelated-jitter exponential backoff delay for attempt `prev_delay`,
/// bounded by `policy` (§4.7/§5). `rng` is injected so the delay sequence
/// is deterministic in tests.
pub fn next_backoff_delay(
    prev_delay: Duration,
    policy: &crate::config::SyncRetryPolicy,
    rng: impl FnOnce(u64, u64) -> u64,
) -> Duration {
    let base = policy.base_delay.as_millis().max(1) as u64;
    let cap = policy.max_delay.as_millis() as u64;
    let prev = prev_delay.as_millis() as u64;
    let upper = (prev.max(base)).saturating_mul(3).min(cap.max(base));
    let jittered = rng(base, upper.max(base));
    Duration::from_millis(jittered.min(cap.max(base)))
}

/// Runs `attempt` up to `policy.max_attempts` times with decorrelated-
/// jitter backoff between tries, honoring `abort` before each attempt and
/// between retries. Only errors classified `retryable()` trigger a retry;
/// any other error (or an aborted signal) returns immediately. `sleep` is
/// injected rather than hard-coded to one executor's timer, since the
/// actual transport and runtime are the caller's concern (§1).
pub async fn with_retry<T, F, Fut, S, SleepFut>(
    policy: &crate::config::SyncRetryPolicy,
    abort: &impl AbortSignal,
    mut on_event: impl FnMut(SyncEvent),
    mut sleep: S,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    S: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let mut delay = policy.base_delay;
    let mut last_err = None;
    for attempt_no in 0..policy.max_attempts {
        if abort.is_aborted() {
            on_event(SyncEvent::Failed);
            return Err(WarpError::OperationAborted);
        }
        on_event(SyncEvent::Connecting);
        match attempt().await {
            Ok(value) => {
                on_event(SyncEvent::Complete);
                return Ok(value);
            }
            Err(e) if e.retryable() && attempt_no + 1 < policy.max_attempts => {
                on_event(SyncEvent::Retrying);
                delay = next_backoff_delay(delay, policy, |lo, hi| lo + (hi - lo) / 2);
                sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => {
                on_event(SyncEvent::Failed);
                return Err(e);
            }
        }
    }
    Err(last_err.unwrap_or(WarpError::SyncTimeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint;
    use crate::config::DeleteWithDataPolicy;
    use crate::message::{format_message, CommitKind};
    use crate::patch::{PatchBuilder, CURRENT_SCHEMA};
    use crate::state::GraphState;
    use crate::storage::InMemoryStorage;
    use crate::vv::VersionVector;

    async fn commit_patch(storage: &InMemoryStorage, graph: &str, writer: &str, lamport: u64, parent: Option<&str>, node: &str) -> String {
        let state = GraphState::new();
        let mut b = PatchBuilder::new(writer, lamport - 1, &state, DeleteWithDataPolicy::Reject);
        b.node_add(node).unwrap();
        let patch = b.build(VersionVector::new());
        let bytes = codec::encode(&patch).unwrap();
        let oid = storage.write_blob(&bytes).await.unwrap();
        let mut trailers = BTreeMap::new();
        trailers.insert("graph".to_string(), graph.to_string());
        trailers.insert("writer".to_string(), writer.to_string());
        trailers.insert("lamport".to_string(), lamport.to_string());
        trailers.insert("patch-oid".to_string(), oid);
        trailers.insert("schema".to_string(), CURRENT_SCHEMA.to_string());
        let message = format_message(CommitKind::Patch, &trailers);
        let parents: Vec<String> = parent.map(|p| vec![p.to_string()]).unwrap_or_default();
        let hash = storage.commit_node(&message, &parents).await.unwrap();
        storage.update_ref(&refs::writer_ref(graph, writer), &hash).await.unwrap();
        hash
    }

    #[async_std::test]
    async fn two_replicas_converge_after_mutual_sync() {
        let _ = checkpoint::create; // keep checkpoint import path exercised elsewhere
        let server = InMemoryStorage::new();
        commit_patch(&server, "g1", "alice", 1, None, "user:alice").await;
        let h2 = commit_patch(&server, "g1", "alice", 1, None, "user:bob").await;
        let _ = h2;

        let client_request = SyncRequest::new(BTreeMap::new());
        let response = handle_request(&server, "g1", &client_request).await.unwrap();
        let mut client_state = GraphState::new();
        apply_response(&mut client_state, &response).unwrap();

        let mut server_state = GraphState::new();
        for name in server.list_refs(&refs::writers_prefix("g1")).await.unwrap() {
            let writer = refs::writer_id_from_ref("g1", &name).unwrap();
            let tip = server.read_ref(&name).await.unwrap().unwrap();
            let chain = storage::walk_chain(&server, &tip, None).await.unwrap();
            for hash in chain {
                let msg = server.show_node(&hash).await.unwrap();
                let (_, trailers) = crate::message::parse_message(&msg).unwrap();
                let oid = trailers.get("patch-oid").unwrap();
                let bytes = server.read_blob(oid).await.unwrap();
                let patch: Patch = codec::decode(&bytes).unwrap();
                reducer::join(&mut server_state, &patch, &hash, false);
            }
            let _ = writer;
        }

        assert_eq!(
            codec::hash_of(&client_state).unwrap(),
            codec::hash_of(&server_state).unwrap()
        );
    }

    #[async_std::test]
    async fn sync_needed_false_when_frontiers_match() {
        let storage = InMemoryStorage::new();
        let h1 = commit_patch(&storage, "g1", "alice", 1, None, "a").await;
        let mut remote = BTreeMap::new();
        remote.insert("alice".to_string(), h1);
        assert!(!sync_needed(&storage, "g1", &remote).await.unwrap());
    }

    #[async_std::test]
    async fn sync_needed_true_when_local_ahead() {
        let storage = InMemoryStorage::new();
        let h1 = commit_patch(&storage, "g1", "alice", 1, None, "a").await;
        let _h2 = commit_patch(&storage, "g1", "alice", 2, Some(&h1), "b").await;
        let mut remote = BTreeMap::new();
        remote.insert("alice".to_string(), h1);
        assert!(sync_needed(&storage, "g1", &remote).await.unwrap());
    }

    #[test]
    fn validate_remote_url_rejects_non_http_scheme() {
        assert!(validate_remote_url("https://peer.example/sync").is_ok());
        let err = validate_remote_url("ftp://peer.example/sync").unwrap_err();
        assert!(matches!(err, WarpError::SyncRemoteUrl(_)));
    }

    #[test]
    fn classify_http_status_splits_4xx_and_5xx() {
        assert!(matches!(
            classify_http_status(503, "unavailable"),
            WarpError::SyncRemote(_)
        ));
        assert!(matches!(
            classify_http_status(404, "not found"),
            WarpError::SyncProtocol(_)
        ));
    }

    #[async_std::test]
    async fn retry_stops_on_non_retryable_error() {
        let policy = crate::config::SyncRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, &(), |_| {}, |_| async {}, || {
            calls += 1;
            async { Err(WarpError::SyncProtocol("bad request".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[async_std::test]
    async fn retry_exhausts_attempts_on_retryable_error() {
        let policy = crate::config::SyncRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, &(), |_| {}, |_| async {}, || {
            calls += 1;
            async { Err(WarpError::SyncNetwork("timeout".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
