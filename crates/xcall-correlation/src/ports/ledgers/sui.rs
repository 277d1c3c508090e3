//! Sui JSON-RPC surface used by the Sui adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;
use serde_json::Value;

/// Move call to submit.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveCall {
    /// Package id
    pub package: String,
    /// Module name
    pub module: String,
    /// Function name
    pub function: String,
    /// Pure JSON arguments
    pub arguments: Vec<Value>,
}

/// Move event.
#[derive(Clone, Debug, PartialEq)]
pub struct SuiEvent {
    /// Fully qualified type `<pkg>::<module>::<Name>`
    pub event_type: String,
    /// Emitting transaction
    pub tx_digest: String,
    /// Position within the transaction
    pub event_seq: u64,
    /// Checkpoint, once certified
    pub checkpoint: Option<u64>,
    /// `parsedJson`
    pub parsed_json: Value,
}

/// Event position, used as the `suix_queryEvents` cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiEventId {
    /// Emitting transaction
    pub tx_digest: String,
    /// Position within the transaction
    pub event_seq: u64,
}

impl SuiEvent {
    /// Cursor pointing at this event.
    pub fn id(&self) -> SuiEventId {
        SuiEventId {
            tx_digest: self.tx_digest.clone(),
            event_seq: self.event_seq,
        }
    }
}

/// `sui_getTransactionBlock` with effects and events.
#[derive(Clone, Debug, PartialEq)]
pub struct SuiTransactionBlock {
    /// Digest
    pub digest: String,
    /// Checkpoint, once certified
    pub checkpoint: Option<u64>,
    /// `success` or `failure`
    pub status: String,
    /// Failure description
    pub error: Option<String>,
    /// Emitted events
    pub events: Vec<SuiEvent>,
}

/// Sui node access.
#[async_trait]
pub trait SuiLedger: Send + Sync {
    /// Latest checkpoint sequence number.
    async fn latest_checkpoint(&self) -> Result<u64>;

    /// Execute a Move call and return the digest.
    async fn execute_move_call(&self, signer: &SignerKey, call: MoveCall) -> Result<String>;

    /// Transaction block, or `None` until checkpointed.
    async fn transaction_block(&self, digest: &str) -> Result<Option<SuiTransactionBlock>>;

    /// `suix_queryEvents` by Move event type, newest first, starting after
    /// `cursor` when given.
    async fn query_events(
        &self,
        event_type: &str,
        cursor: Option<SuiEventId>,
        limit: usize,
    ) -> Result<Vec<SuiEvent>>;
}
