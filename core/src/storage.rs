use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Info about one commit node, as exposed by the storage adapter.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub message: String,
    pub parents: Vec<String>,
    /// The tree this commit points at, if it was created with
    /// `commit_node_with_tree` rather than the empty-content `commit_node`
    /// (anchor commits have no tree).
    pub tree: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct PingInfo {
    pub ok: bool,
    pub latency_ms: u64,
}

/// One entry of a tree: a name paired with the hash it points at. Trees are
/// always written with entries pre-sorted by name by the caller (§6
/// "Checkpoint tree layout", §4.2 "sorted by name"), so the adapter never
/// needs to sort on write.
#[derive(Clone, Debug)]
pub struct TreeEntry {
    pub name: String,
    pub hash: String,
}

/// The content-addressed commit store the core consumes (§6 "Storage
/// adapter contract"). A production adapter over an actual store (git,
/// or a purpose-built content-addressed backend) is an external
/// collaborator; this crate only ships the in-memory test double below to
/// exercise the engine in its own test suite.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;
    async fn read_ref(&self, name: &str) -> Result<Option<String>>;
    async fn update_ref(&self, name: &str, hash: &str) -> Result<()>;
    /// Atomically sets `name` to `new` iff its current value equals
    /// `expected_old` (`None` means "must not exist yet"). Returns `true`
    /// on success.
    async fn compare_and_swap_ref(
        &self,
        name: &str,
        new: &str,
        expected_old: Option<&str>,
    ) -> Result<bool>;
    async fn delete_ref(&self, name: &str) -> Result<()>;

    async fn write_blob(&self, bytes: &[u8]) -> Result<String>;
    async fn read_blob(&self, hash: &str) -> Result<Vec<u8>>;
    async fn write_tree(&self, entries: &[TreeEntry]) -> Result<String>;
    async fn read_tree_oids(&self, hash: &str) -> Result<BTreeMap<String, String>>;
    async fn commit_node_with_tree(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String>;
    async fn commit_node(&self, message: &str, parents: &[String]) -> Result<String>;
    async fn get_node_info(&self, hash: &str) -> Result<NodeInfo>;
    async fn show_node(&self, hash: &str) -> Result<String>;
    async fn node_exists(&self, hash: &str) -> Result<bool>;

    async fn config_get(&self, key: &str) -> Result<Option<String>>;
    async fn config_set(&self, key: &str, value: &str) -> Result<()>;
    async fn ping(&self) -> Result<PingInfo>;
}

#[derive(Default)]
struct Inner {
    refs: BTreeMap<String, String>,
    blobs: BTreeMap<String, Vec<u8>>,
    trees: BTreeMap<String, BTreeMap<String, String>>,
    nodes: BTreeMap<String, NodeInfo>,
    config: BTreeMap<String, String>,
}

/// In-memory storage adapter, content-addressed by blake3, refs held in an
/// in-process map guarded by a mutex for compare-and-swap. Exists purely to
/// exercise `warp-core`'s own test suite (§6).
#[derive(Clone, Default)]
pub struct InMemoryStorage(Arc<Mutex<Inner>>);

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.0.lock();
        Ok(inner
            .refs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn read_ref(&self, name: &str) -> Result<Option<String>> {
        Ok(self.0.lock().refs.get(name).cloned())
    }

    async fn update_ref(&self, name: &str, hash: &str) -> Result<()> {
        self.0.lock().refs.insert(name.to_string(), hash.to_string());
        Ok(())
    }

    async fn compare_and_swap_ref(
        &self,
        name: &str,
        new: &str,
        expected_old: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.0.lock();
        let current = inner.refs.get(name).map(String::as_str);
        if current != expected_old {
            return Ok(false);
        }
        inner.refs.insert(name.to_string(), new.to_string());
        Ok(true)
    }

    async fn delete_ref(&self, name: &str) -> Result<()> {
        self.0.lock().refs.remove(name);
        Ok(())
    }

    async fn write_blob(&self, bytes: &[u8]) -> Result<String> {
        let hash = crate::codec::hash_bytes(bytes);
        self.0.lock().blobs.insert(hash.clone(), bytes.to_vec());
        Ok(hash)
    }

    async fn read_blob(&self, hash: &str) -> Result<Vec<u8>> {
        self.0
            .lock()
            .blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| crate::error::WarpError::Storage(format!("unknown blob {hash}").into()))
    }

    async fn write_tree(&self, entries: &[TreeEntry]) -> Result<String> {
        let map: BTreeMap<String, String> = entries
            .iter()
            .map(|e| (e.name.clone(), e.hash.clone()))
            .collect();
        let hash = crate::codec::hash_of(&map)?;
        self.0.lock().trees.insert(hash.clone(), map);
        Ok(hash)
    }

    async fn read_tree_oids(&self, hash: &str) -> Result<BTreeMap<String, String>> {
        self.0
            .lock()
            .trees
            .get(hash)
            .cloned()
            .ok_or_else(|| crate::error::WarpError::Storage(format!("unknown tree {hash}").into()))
    }

    async fn commit_node_with_tree(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String> {
        #[derive(serde::Serialize)]
        struct CommitKey<'a> {
            tree: &'a str,
            parents: &'a [String],
            message: &'a str,
        }
        let hash = crate::codec::hash_of(&CommitKey {
            tree,
            parents,
            message,
        })?;
        self.0.lock().nodes.insert(
            hash.clone(),
            NodeInfo {
                message: message.to_string(),
                parents: parents.to_vec(),
                tree: if tree.is_empty() {
                    None
                } else {
                    Some(tree.to_string())
                },
            },
        );
        Ok(hash)
    }

    async fn commit_node(&self, message: &str, parents: &[String]) -> Result<String> {
        self.commit_node_with_tree("", parents, message).await
    }

    async fn get_node_info(&self, hash: &str) -> Result<NodeInfo> {
        self.0
            .lock()
            .nodes
            .get(hash)
            .cloned()
            .ok_or_else(|| crate::error::WarpError::Storage(format!("unknown commit {hash}").into()))
    }

    async fn show_node(&self, hash: &str) -> Result<String> {
        Ok(self.get_node_info(hash).await?.message)
    }

    async fn node_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.0.lock().nodes.contains_key(hash))
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.0.lock().config.get(key).cloned())
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.0.lock().config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<PingInfo> {
        Ok(PingInfo {
            ok: true,
            latency_ms: 0,
        })
    }
}

/// Walks the ancestry of `from_hash`, stopping at (not including) `stop_at`
/// if given, or at a root commit (no parents). Used by materialize's
/// writer-chain walk, fork's ancestor check, and wormhole validation.
/// Returns hashes oldest-first.
pub async fn walk_chain(
    storage: &dyn StorageAdapter,
    from_hash: &str,
    stop_at_exclusive: Option<&str>,
) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut cursor = Some(from_hash.to_string());
    while let Some(hash) = cursor {
        if Some(hash.as_str()) == stop_at_exclusive {
            break;
        }
        let info = storage.get_node_info(&hash).await?;
        chain.push(hash);
        cursor = info.parents.first().cloned();
    }
    chain.reverse();
    Ok(chain)
}

/// Is `ancestor` reachable by walking parents from `descendant`?
pub async fn is_ancestor(
    storage: &dyn StorageAdapter,
    ancestor: &str,
    descendant: &str,
) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut cursor = Some(descendant.to_string());
    while let Some(hash) = cursor {
        let info = storage.get_node_info(&hash).await?;
        if info.parents.iter().any(|p| p == ancestor) {
            return Ok(true);
        }
        cursor = info.parents.first().cloned();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn cas_ref_rejects_stale_expectation() {
        let s = InMemoryStorage::new();
        assert!(s.compare_and_swap_ref("r", "h1", None).await.unwrap());
        assert!(!s.compare_and_swap_ref("r", "h2", None).await.unwrap());
        assert!(s
            .compare_and_swap_ref("r", "h2", Some("h1"))
            .await
            .unwrap());
        assert_eq!(s.read_ref("r").await.unwrap().as_deref(), Some("h2"));
    }

    #[async_std::test]
    async fn walk_chain_stops_at_exclusive_bound() {
        let s = InMemoryStorage::new();
        let root = s.commit_node("root", &[]).await.unwrap();
        let mid = s.commit_node("mid", &[root.clone()]).await.unwrap();
        let tip = s.commit_node("tip", &[mid.clone()]).await.unwrap();
        let chain = walk_chain(&s, &tip, Some(&root)).await.unwrap();
        assert_eq!(chain, vec![mid, tip]);
    }

    #[async_std::test]
    async fn is_ancestor_true_for_self_and_transitively() {
        let s = InMemoryStorage::new();
        let root = s.commit_node("root", &[]).await.unwrap();
        let tip = s.commit_node("tip", &[root.clone()]).await.unwrap();
        assert!(is_ancestor(&s, &root, &tip).await.unwrap());
        assert!(is_ancestor(&s, &tip, &tip).await.unwrap());
        assert!(!is_ancestor(&s, &tip, &root).await.unwrap());
    }
}
