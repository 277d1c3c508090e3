//! Soroban JSON-RPC surface used by the Stellar adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;
use stellar_xdr::curr::ScVal;

/// Contract invocation to submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SorobanInvocation {
    /// Contract id (`C...`)
    pub contract_id: String,
    /// Function name
    pub function: String,
    /// Arguments
    pub args: Vec<ScVal>,
}

/// Contract event as returned by `getEvents`: topic and value are
/// base64 XDR `ScVal`s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SorobanEvent {
    /// Paging token, ordered by ledger then position
    pub id: String,
    /// Ledger sequence
    pub ledger: u64,
    /// Transaction hash
    pub tx_hash: String,
    /// Emitting contract
    pub contract_id: String,
    /// Topic `ScVal`s (base64 XDR)
    pub topic: Vec<String>,
    /// Value `ScVal` (base64 XDR)
    pub value: String,
}

/// Where a `getEvents` page starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsStart {
    /// First event at or above this ledger
    Ledger(u64),
    /// First event after this paging token
    After(String),
}

/// `getTransaction`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SorobanTransaction {
    /// Transaction hash
    pub hash: String,
    /// Ledger sequence
    pub ledger: u64,
    /// `SUCCESS` or `FAILED`
    pub status: String,
    /// Diagnostic error when failed
    pub error: Option<String>,
    /// Contract events emitted
    pub events: Vec<SorobanEvent>,
}

/// Soroban RPC access.
#[async_trait]
pub trait StellarLedger: Send + Sync {
    /// `getLatestLedger` sequence.
    async fn latest_ledger(&self) -> Result<u64>;

    /// Submit an invocation and return the transaction hash.
    async fn invoke(&self, signer: &SignerKey, call: SorobanInvocation) -> Result<String>;

    /// Transaction, or `None` while `NOT_FOUND`.
    async fn transaction(&self, hash: &str) -> Result<Option<SorobanTransaction>>;

    /// One `getEvents` page for one contract, ascending.
    async fn get_events(
        &self,
        contract_id: &str,
        start: EventsStart,
        limit: usize,
    ) -> Result<Vec<SorobanEvent>>;
}
