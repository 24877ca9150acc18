use crate::codec;
use crate::error::{Result, WarpError};
use crate::patch::Patch;
use crate::refs;
use crate::storage::{self, StorageAdapter};

/// Arguments to [`fork`] (§4.9).
pub struct ForkArgs<'a> {
    pub from_writer: &'a str,
    pub at: &'a str,
    pub new_graph: &'a str,
}

/// Forks `args.new_graph`'s `args.from_writer` writer ref to point at
/// `args.at`. Because commits are content-addressed, everything up to
/// `at` is shared without copying; only a new ref is created. Validates
/// the writer exists, `at` is on its chain, and the new graph name isn't
/// already in use by that writer.
pub async fn fork(storage: &dyn StorageAdapter, source_graph: &str, args: ForkArgs<'_>) -> Result<()> {
    if args.at.is_empty() {
        return Err(WarpError::ForkInvalidArgs {
            reason: "`at` commit hash must not be empty".to_string(),
        });
    }
    if args.new_graph.is_empty() || args.new_graph == source_graph {
        return Err(WarpError::ForkNameInvalid {
            name: args.new_graph.to_string(),
        });
    }
    if args.from_writer.is_empty() {
        return Err(WarpError::ForkWriterIdInvalid {
            writer: args.from_writer.to_string(),
        });
    }
    let source_ref = refs::writer_ref(source_graph, args.from_writer);
    let tip = storage
        .read_ref(&source_ref)
        .await?
        .ok_or_else(|| WarpError::ForkWriterNotFound {
            writer: args.from_writer.to_string(),
        })?;

    if !storage.node_exists(args.at).await? {
        return Err(WarpError::ForkPatchNotFound {
            hash: args.at.to_string(),
        });
    }
    if !storage::is_ancestor(storage, args.at, &tip).await? {
        return Err(WarpError::ForkPatchNotInChain {
            writer: args.from_writer.to_string(),
            hash: args.at.to_string(),
        });
    }

    let target_ref = refs::writer_ref(args.new_graph, args.from_writer);
    let created = storage
        .compare_and_swap_ref(&target_ref, args.at, None)
        .await?;
    if !created {
        return Err(WarpError::ForkAlreadyExists {
            name: args.new_graph.to_string(),
        });
    }
    tracing::debug!(source_graph, new_graph = args.new_graph, writer = args.from_writer, at = args.at, "forked");
    Ok(())
}

/// A contiguous, replayable capture of one writer's patch range (§4.9).
/// Replaying the wormhole then applying the writer's remaining patches
/// must yield the same state as the full replay; two adjacent wormholes
/// compose by concatenation (`a.patches ++ b.patches`, provided `a.to ==
/// b.from`).
#[derive(Clone, Debug)]
pub struct Wormhole {
    pub writer: String,
    pub from: String,
    pub to: String,
    pub patches: Vec<(Patch, String)>,
}

impl Wormhole {
    /// Composes `self` followed by `other`. Both must share a writer and
    /// `self.to == other.from`.
    pub fn compose(mut self, other: Wormhole) -> Result<Wormhole> {
        if self.writer != other.writer {
            return Err(WarpError::WormholeMultiWriter);
        }
        if self.to != other.from {
            return Err(WarpError::WormholeInvalidRange {
                from: self.to.clone(),
                to: other.from.clone(),
            });
        }
        self.patches.extend(other.patches);
        self.to = other.to;
        Ok(self)
    }
}

/// Captures the contiguous patch sequence from `from_hash` (exclusive) to
/// `to_hash` (inclusive) on a single writer's chain.
pub async fn create_wormhole(
    storage: &dyn StorageAdapter,
    graph: &str,
    writer: &str,
    from_hash: &str,
    to_hash: &str,
) -> Result<Wormhole> {
    if !storage.node_exists(from_hash).await? {
        return Err(WarpError::WormholeShaNotFound(from_hash.to_string()));
    }
    if !storage.node_exists(to_hash).await? {
        return Err(WarpError::WormholeShaNotFound(to_hash.to_string()));
    }
    if !storage::is_ancestor(storage, from_hash, to_hash).await? {
        return Err(WarpError::WormholeInvalidRange {
            from: from_hash.to_string(),
            to: to_hash.to_string(),
        });
    }

    let tip = storage
        .read_ref(&refs::writer_ref(graph, writer))
        .await?
        .ok_or_else(|| WarpError::ForkWriterNotFound {
            writer: writer.to_string(),
        })?;
    if !storage::is_ancestor(storage, to_hash, &tip).await? {
        return Err(WarpError::WormholeMultiWriter);
    }

    let chain = storage::walk_chain(storage, to_hash, Some(from_hash)).await?;
    let mut patches = Vec::with_capacity(chain.len());
    for hash in chain {
        let patch = load_patch_for_commit(storage, &hash).await?;
        patches.push((patch, hash));
    }

    Ok(Wormhole {
        writer: writer.to_string(),
        from: from_hash.to_string(),
        to: to_hash.to_string(),
        patches,
    })
}

async fn load_patch_for_commit(storage: &dyn StorageAdapter, hash: &str) -> Result<Patch> {
    let message_text = storage.show_node(hash).await?;
    let (kind, trailers) = crate::message::parse_message(&message_text)?;
    if kind != crate::message::CommitKind::Patch {
        return Err(WarpError::WormholeNotPatch(hash.to_string()));
    }
    let oid = trailers
        .get("patch-oid")
        .ok_or_else(|| WarpError::InvalidPatchMessage {
            reason: format!("commit {hash} missing patch-oid trailer"),
        })?;
    let bytes = storage.read_blob(oid).await?;
    codec::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeleteWithDataPolicy;
    use crate::message::{format_message, CommitKind};
    use crate::patch::{PatchBuilder, CURRENT_SCHEMA};
    use crate::state::GraphState;
    use crate::storage::InMemoryStorage;
    use crate::vv::VersionVector;
    use std::collections::BTreeMap;

    async fn commit_patch(storage: &InMemoryStorage, graph: &str, writer: &str, lamport: u64, parent: Option<&str>) -> String {
        let state = GraphState::new();
        let mut b = PatchBuilder::new(writer, lamport - 1, &state, DeleteWithDataPolicy::Reject);
        b.node_add(format!("n{lamport}")).unwrap();
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
        storage
            .update_ref(&refs::writer_ref(graph, writer), &hash)
            .await
            .unwrap();
        hash
    }

    #[async_std::test]
    async fn fork_creates_new_ref_sharing_history() {
        let storage = InMemoryStorage::new();
        let h1 = commit_patch(&storage, "g1", "alice", 1, None).await;
        let _h2 = commit_patch(&storage, "g1", "alice", 2, Some(&h1)).await;
        fork(
            &storage,
            "g1",
            ForkArgs {
                from_writer: "alice",
                at: &h1,
                new_graph: "g2",
            },
        )
        .await
        .unwrap();
        let forked_tip = storage
            .read_ref(&refs::writer_ref("g2", "alice"))
            .await
            .unwrap();
        assert_eq!(forked_tip.as_deref(), Some(h1.as_str()));
    }

    #[async_std::test]
    async fn fork_rejects_empty_at_hash() {
        let storage = InMemoryStorage::new();
        let _h1 = commit_patch(&storage, "g1", "alice", 1, None).await;
        let err = fork(
            &storage,
            "g1",
            ForkArgs {
                from_writer: "alice",
                at: "",
                new_graph: "g2",
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WarpError::ForkInvalidArgs { .. }));
    }

    #[async_std::test]
    async fn fork_rejects_hash_not_in_chain() {
        let storage = InMemoryStorage::new();
        let _h1 = commit_patch(&storage, "g1", "alice", 1, None).await;
        let err = fork(
            &storage,
            "g1",
            ForkArgs {
                from_writer: "alice",
                at: "bogus",
                new_graph: "g2",
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WarpError::ForkPatchNotFound { .. }));
    }

    #[async_std::test]
    async fn wormhole_captures_contiguous_range() {
        let storage = InMemoryStorage::new();
        let h1 = commit_patch(&storage, "g1", "alice", 1, None).await;
        let h2 = commit_patch(&storage, "g1", "alice", 2, Some(&h1)).await;
        let h3 = commit_patch(&storage, "g1", "alice", 3, Some(&h2)).await;
        let wh = create_wormhole(&storage, "g1", "alice", &h1, &h3).await.unwrap();
        assert_eq!(wh.patches.len(), 2);
    }
}
