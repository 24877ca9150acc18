use std::collections::BTreeMap;
use warp_core::{coverage_ref, format_message, writer_id_from_ref, writers_prefix, CommitKind, Result, StorageAdapter};

/// Snapshots every writer's current tip into a parentless-content anchor
/// commit and advances `graph`'s coverage ref to it. An anchor answers
/// "what did every writer know as of this moment" (the open question on
/// coverage/anchor semantics is resolved as exactly this and nothing
/// more) without the cost of a full checkpoint.
pub async fn create_anchor(storage: &dyn StorageAdapter, graph: &str) -> Result<String> {
    let refs = storage.list_refs(&writers_prefix(graph)).await?;
    let mut tips: BTreeMap<String, String> = BTreeMap::new();
    for name in &refs {
        let Some(writer) = writer_id_from_ref(graph, name) else {
            continue;
        };
        if let Some(tip) = storage.read_ref(name).await? {
            tips.insert(writer, tip);
        }
    }

    let mut trailers = BTreeMap::new();
    trailers.insert("graph".to_string(), graph.to_string());
    for (writer, tip) in &tips {
        trailers.insert(format!("tip-{writer}"), tip.clone());
    }
    let message = format_message(CommitKind::Anchor, &trailers);
    let parents: Vec<String> = tips.into_values().collect();
    let hash = storage.commit_node(&message, &parents).await?;
    storage.update_ref(&coverage_ref(graph), &hash).await?;
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::{CheckpointPolicy, DeleteWithDataPolicy, GcPolicy, InMemoryStorage};

    #[async_std::test]
    async fn anchor_records_every_writer_tip() {
        let shared = std::sync::Arc::new(InMemoryStorage::new());
        let mut writer = crate::Graph::open(
            shared.clone(),
            "g",
            "alice",
            CheckpointPolicy::default(),
            GcPolicy::default(),
        )
        .await
        .unwrap();
        let patch = writer.patch(DeleteWithDataPolicy::Reject, |b| {
            b.node_add("a").unwrap();
        });
        writer.commit(patch).await.unwrap();

        let anchor_hash = create_anchor(shared.as_ref(), "g").await.unwrap();
        assert!(!anchor_hash.is_empty());
        let refreshed = shared.read_ref(&coverage_ref("g")).await.unwrap();
        assert_eq!(refreshed, Some(anchor_hash));
    }
}
