use crate::dot::WriterId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of applying a single op during a reduce.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpOutcome {
    Applied,
    Redundant,
    Superseded,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpReceipt {
    pub op: &'static str,
    pub target: String,
    pub result: OpOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Receipt for one reduced patch ("tick"), frozen against mutation once
/// emitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickReceipt {
    pub patch_hash: String,
    pub writer: WriterId,
    pub lamport: u64,
    pub ops: Vec<OpReceipt>,
}

/// External collaborator that durably chains tick receipts (the "audit
/// receipts" open question in DESIGN.md). The core only produces
/// receipts; persisting a hash-chained log of them is adjacent.
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    type Error;

    async fn record(&self, receipt: &TickReceipt) -> Result<(), Self::Error>;
}
