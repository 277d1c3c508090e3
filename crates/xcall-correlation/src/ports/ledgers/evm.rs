//! EVM JSON-RPC surface used by the EVM adapter.

use crate::domain::{Result, SignerKey};
use alloy_primitives::B256;
use async_trait::async_trait;

/// Contract call to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmCall {
    /// Target contract
    pub to: String,
    /// ABI-encoded calldata
    pub input: Vec<u8>,
}

/// One log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmLog {
    /// Emitting contract
    pub address: String,
    /// Topic words; topic 0 is the event signature hash
    pub topics: Vec<B256>,
    /// Non-indexed ABI data
    pub data: Vec<u8>,
    /// Block number
    pub block_number: u64,
    /// Transaction hash
    pub tx_hash: String,
}

/// Transaction receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvmReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Inclusion block
    pub block_number: u64,
    /// 1 on success, 0 on revert
    pub status: u64,
    /// Emitted logs
    pub logs: Vec<EvmLog>,
    /// Decoded revert reason, when the node provides one
    pub revert_reason: Option<String>,
}

/// `eth_getLogs` filter. `None` topic positions are wildcards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contract
    pub address: String,
    /// Positional topic filters
    pub topics: Vec<Option<B256>>,
    /// Inclusive lower block
    pub from_block: u64,
    /// Inclusive upper block
    pub to_block: u64,
}

impl LogFilter {
    /// True when `log` satisfies the address and topic positions.
    pub fn matches(&self, log: &EvmLog) -> bool {
        log.address.eq_ignore_ascii_case(&self.address)
            && log.block_number >= self.from_block
            && log.block_number <= self.to_block
            && self.topics.iter().enumerate().all(|(i, want)| match want {
                Some(want) => log.topics.get(i) == Some(want),
                None => true,
            })
    }
}

/// EVM node access.
#[async_trait]
pub trait EvmLedger: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64>;

    /// Submit a transaction and return its hash.
    async fn send_transaction(&self, signer: &SignerKey, call: EvmCall) -> Result<String>;

    /// Receipt, or `None` while pending.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>>;

    /// `eth_getLogs`.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>>;
}
