//! ICON JSON-RPC v3 surface used by the ICON adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;

/// Event log from a transaction result. Values are hex strings or text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconEventLog {
    /// Emitting SCORE
    pub score_address: String,
    /// Signature followed by indexed values
    pub indexed: Vec<String>,
    /// Non-indexed values
    pub data: Vec<String>,
}

/// Failure block of a transaction result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconFailure {
    /// Error code (`0x20 + n` for SCORE reverts)
    pub code: i64,
    /// Revert message
    pub message: String,
}

/// `icx_getTransactionResult`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconTxResult {
    /// Transaction hash
    pub tx_hash: String,
    /// Block height
    pub block_height: u64,
    /// 1 on success
    pub status: u64,
    /// Set when `status` is 0
    pub failure: Option<IconFailure>,
    /// Emitted event logs
    pub event_logs: Vec<IconEventLog>,
}

/// SCORE call transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct IconCall {
    /// Target SCORE
    pub to: String,
    /// Method name
    pub method: String,
    /// Parameters (hex-encoded ints and bytes)
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// ICON node access.
#[async_trait]
pub trait IconLedger: Send + Sync {
    /// `icx_getLastBlock` height.
    async fn last_height(&self) -> Result<u64>;

    /// Submit a call transaction and return its hash.
    async fn send_call(&self, signer: &SignerKey, call: IconCall) -> Result<String>;

    /// Result, or `None` while pending.
    async fn transaction_result(&self, tx_hash: &str) -> Result<Option<IconTxResult>>;

    /// Results of every transaction in the block at `height`.
    async fn block_results(&self, height: u64) -> Result<Vec<IconTxResult>>;
}
