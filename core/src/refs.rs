/// Reference layout (§6). All names are relative to a single graph.
pub fn writer_ref(graph: &str, writer: &str) -> String {
    format!("refs/warp/{}/writers/{}", graph, writer)
}

pub fn writers_prefix(graph: &str) -> String {
    format!("refs/warp/{}/writers/", graph)
}

pub fn checkpoint_ref(graph: &str) -> String {
    format!("refs/warp/{}/checkpoint", graph)
}

pub fn coverage_ref(graph: &str) -> String {
    format!("refs/warp/{}/coverage", graph)
}

pub fn audit_ref(graph: &str, writer: &str) -> String {
    format!("refs/warp/{}/audit/{}", graph, writer)
}

/// Extracts the writer-id suffix from a ref listed under
/// `writers_prefix(graph)`.
pub fn writer_id_from_ref(graph: &str, name: &str) -> Option<String> {
    name.strip_prefix(&writers_prefix(graph)).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_ref_round_trips_through_prefix() {
        let r = writer_ref("g1", "alice");
        assert_eq!(writer_id_from_ref("g1", &r).as_deref(), Some("alice"));
    }
}
