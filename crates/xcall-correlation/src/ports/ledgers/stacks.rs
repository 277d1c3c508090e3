//! Stacks node / API surface used by the Stacks adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;

/// Contract call to submit. Arguments are Clarity literals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClarityCall {
    /// `<principal>.<contract-name>`
    pub contract_id: String,
    /// Public function
    pub function: String,
    /// Clarity literal arguments, e.g. `u5`, `0x68`, `"to"`, `none`
    pub args: Vec<String>,
}

/// Transaction status from the API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StacksTransaction {
    /// Transaction id
    pub tx_id: String,
    /// Anchor block height once mined
    pub block_height: Option<u64>,
    /// `pending`, `success`, `abort_by_response`, `abort_by_post_condition`
    pub tx_status: String,
    /// Result repr, e.g. `(ok true)` or `(err u105)`
    pub tx_result_repr: String,
}

/// `smart_contract_log` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StacksContractEvent {
    /// Transaction id
    pub tx_id: String,
    /// Block height
    pub block_height: u64,
    /// Clarity value repr
    pub repr: String,
}

/// One page of the contract event endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StacksEventPage {
    /// Contract logs on the page, newest first
    pub events: Vec<StacksContractEvent>,
    /// Raw entries the API returned, including ones that are not logs
    pub fetched: usize,
}

/// Stacks API access.
#[async_trait]
pub trait StacksLedger: Send + Sync {
    /// Chain tip height.
    async fn tip_height(&self) -> Result<u64>;

    /// Submit a contract call and return the transaction id.
    async fn call_contract(&self, signer: &SignerKey, call: ClarityCall) -> Result<String>;

    /// Transaction, or `None` when unknown.
    async fn transaction(&self, tx_id: &str) -> Result<Option<StacksTransaction>>;

    /// Contract events, newest first, paged by `offset`.
    async fn contract_events(
        &self,
        contract_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<StacksEventPage>;
}
