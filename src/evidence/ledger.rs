use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::evidence::ContentHandle;

/// Confirmation of a notarized record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerReceipt {
    /// Transaction hash, or the entry hash for the local ledger.
    pub tx_handle: String,
    /// Per-identity sequence number (nonce) used for the submission.
    pub sequence: u64,
    /// Block number or local row id the record landed in.
    pub block: Option<u64>,
}

/// "Durably record a fact, return a transaction handle."
///
/// `notarize` returns only after the record is confirmed. Implementations are
/// called from several finalization threads at once and must hand out a fresh
/// sequence number to each submission.
pub trait Ledger: Send + Sync {
    fn name(&self) -> &'static str;

    fn notarize(&self, content: &ContentHandle, label: &str) -> Result<LedgerReceipt>;
}
