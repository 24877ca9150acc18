use crate::error::{Result, WarpError};
use std::collections::BTreeMap;

/// The recognized first-line "kind" marker of a commit message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitKind {
    Patch,
    Checkpoint,
    Anchor,
    Audit,
}

impl CommitKind {
    fn as_str(self) -> &'static str {
        match self {
            CommitKind::Patch => "patch",
            CommitKind::Checkpoint => "checkpoint",
            CommitKind::Anchor => "anchor",
            CommitKind::Audit => "audit",
        }
    }

    fn required_trailers(self) -> &'static [&'static str] {
        match self {
            CommitKind::Patch => &["graph", "writer", "lamport", "patch-oid", "schema"],
            CommitKind::Checkpoint => &["graph", "state-hash", "frontier-oid", "index-oid", "schema"],
            CommitKind::Anchor => &["graph"],
            CommitKind::Audit => &["graph", "writer", "data-commit", "ops-digest"],
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "patch" => Some(CommitKind::Patch),
            "checkpoint" => Some(CommitKind::Checkpoint),
            "anchor" => Some(CommitKind::Anchor),
            "audit" => Some(CommitKind::Audit),
            _ => None,
        }
    }
}

/// Builds a commit message: first-line kind marker, then `key: value`
/// trailer lines, each newline-terminated.
pub fn format_message(kind: CommitKind, trailers: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str(kind.as_str());
    out.push('\n');
    for (k, v) in trailers {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Parses a commit message, validating that every trailer the kind
/// requires is present.
pub fn parse_message(text: &str) -> Result<(CommitKind, BTreeMap<String, String>)> {
    let mut lines = text.lines();
    let kind_line = lines.next().ok_or_else(|| WarpError::InvalidPatchMessage {
        reason: "empty commit message".into(),
    })?;
    let kind = CommitKind::parse(kind_line.trim()).ok_or_else(|| WarpError::InvalidPatchMessage {
        reason: format!("unrecognized commit kind {kind_line:?}"),
    })?;
    let mut trailers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (k, v) = line.split_once(':').ok_or_else(|| WarpError::InvalidPatchMessage {
            reason: format!("malformed trailer line {line:?}"),
        })?;
        trailers.insert(k.trim().to_string(), v.trim().to_string());
    }
    for required in kind.required_trailers() {
        if !trailers.contains_key(*required) {
            return Err(WarpError::InvalidPatchMessage {
                reason: format!("missing required trailer {required:?} for kind {:?}", kind),
            });
        }
    }
    Ok((kind, trailers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_patch_message() {
        let mut trailers = BTreeMap::new();
        trailers.insert("graph".to_string(), "g1".to_string());
        trailers.insert("writer".to_string(), "alice".to_string());
        trailers.insert("lamport".to_string(), "1".to_string());
        trailers.insert("patch-oid".to_string(), "abc".to_string());
        trailers.insert("schema".to_string(), "2".to_string());
        let msg = format_message(CommitKind::Patch, &trailers);
        let (kind, parsed) = parse_message(&msg).unwrap();
        assert_eq!(kind, CommitKind::Patch);
        assert_eq!(parsed, trailers);
    }

    #[test]
    fn missing_trailer_is_invalid() {
        let mut trailers = BTreeMap::new();
        trailers.insert("graph".to_string(), "g1".to_string());
        let msg = format_message(CommitKind::Patch, &trailers);
        assert!(parse_message(&msg).is_err());
    }

    #[test]
    fn unrecognized_kind_is_invalid() {
        assert!(parse_message("bogus\ngraph: g1\n").is_err());
    }
}
