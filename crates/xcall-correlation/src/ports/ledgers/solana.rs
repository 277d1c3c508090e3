//! Solana JSON-RPC surface used by the Solana adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;

/// Program instruction to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolanaInstruction {
    /// Program id
    pub program_id: String,
    /// Account keys (resolved by the signer)
    pub accounts: Vec<String>,
    /// Anchor discriminator followed by Borsh arguments
    pub data: Vec<u8>,
}

/// Confirmed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolanaTransaction {
    /// Transaction signature
    pub signature: String,
    /// Slot
    pub slot: u64,
    /// Error description when the transaction failed
    pub err: Option<String>,
    /// Program log lines
    pub log_messages: Vec<String>,
}

/// `getSignaturesForAddress` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureInfo {
    /// Transaction signature
    pub signature: String,
    /// Slot
    pub slot: u64,
    /// Error description when the transaction failed
    pub err: Option<String>,
}

/// Solana node access.
#[async_trait]
pub trait SolanaLedger: Send + Sync {
    /// `getSlot` at confirmed commitment.
    async fn slot(&self) -> Result<u64>;

    /// Submit one instruction and return the transaction signature.
    async fn send_instruction(&self, signer: &SignerKey, ix: SolanaInstruction) -> Result<String>;

    /// Confirmed transaction, or `None` while pending.
    async fn transaction(&self, signature: &str) -> Result<Option<SolanaTransaction>>;

    /// Signatures touching `address`, newest first. With `before`, the page
    /// starts at the signature just older than it.
    async fn signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;
}
