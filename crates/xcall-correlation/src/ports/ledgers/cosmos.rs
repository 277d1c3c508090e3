//! Tendermint / CosmWasm surface used by the Cosmos adapter.

use crate::domain::{Result, SignerKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// ABCI event attribute. Older nodes base64-wrap keys and values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciAttribute {
    /// Attribute key
    pub key: String,
    /// Attribute value
    #[serde(default)]
    pub value: String,
}

/// ABCI event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    /// Event type, e.g. `wasm-CallMessage`
    #[serde(rename = "type")]
    pub kind: String,
    /// Attributes
    #[serde(default)]
    pub attributes: Vec<AbciAttribute>,
}

/// Result of a delivered transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CosmosTxResult {
    /// Transaction hash
    pub tx_hash: String,
    /// Block height
    pub height: u64,
    /// ABCI code, 0 on success
    pub code: u32,
    /// Raw log
    pub raw_log: String,
    /// Emitted events
    pub events: Vec<AbciEvent>,
}

/// `MsgExecuteContract` payload.
#[derive(Clone, Debug, PartialEq)]
pub struct CosmosExecute {
    /// Target contract
    pub contract: String,
    /// JSON execute message
    pub msg: serde_json::Value,
}

/// Structured event query rendered to Tendermint query syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CosmosEventQuery {
    /// Event type, e.g. `wasm-CallMessage`
    pub event_type: String,
    /// Emitting contract
    pub contract: String,
    /// Attribute constraint, e.g. `("sn", "12")`
    pub attribute: Option<(String, String)>,
    /// Inclusive lower height
    pub min_height: u64,
    /// Inclusive upper height
    pub max_height: Option<u64>,
}

impl CosmosEventQuery {
    /// Query for `/subscribe`.
    pub fn subscription(&self) -> String {
        let mut q = format!(
            "tm.event='Tx' AND {}._contract_address='{}'",
            self.event_type, self.contract
        );
        if let Some((key, value)) = &self.attribute {
            q.push_str(&format!(" AND {}.{} CONTAINS '{}'", self.event_type, key, value));
        }
        q
    }

    /// Query for `/tx_search`.
    pub fn search(&self) -> String {
        let mut q = format!(
            "{}._contract_address='{}' AND tx.height>={}",
            self.event_type, self.contract, self.min_height
        );
        if let Some(max) = self.max_height {
            q.push_str(&format!(" AND tx.height<={}", max));
        }
        if let Some((key, value)) = &self.attribute {
            q.push_str(&format!(" AND {}.{}='{}'", self.event_type, key, value));
        }
        q
    }
}

/// Cosmos node access.
#[async_trait]
pub trait CosmosLedger: Send + Sync {
    /// Latest block height.
    async fn latest_height(&self) -> Result<u64>;

    /// Broadcast `MsgExecuteContract` and return the transaction hash.
    async fn execute(&self, signer: &SignerKey, msg: CosmosExecute) -> Result<String>;

    /// Delivered transaction, or `None` until indexed.
    async fn tx(&self, hash: &str) -> Result<Option<CosmosTxResult>>;

    /// `/tx_search`, ascending by height.
    async fn tx_search(&self, query: &CosmosEventQuery) -> Result<Vec<CosmosTxResult>>;

    /// `/subscribe` over WebSocket.
    async fn subscribe(&self, query: &CosmosEventQuery) -> Result<mpsc::Receiver<CosmosTxResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_query_syntax() {
        let q = CosmosEventQuery {
            event_type: "wasm-CallMessage".into(),
            contract: "archway1xcall".into(),
            attribute: Some(("sn".into(), "12".into())),
            min_height: 40,
            max_height: None,
        };
        assert_eq!(
            q.subscription(),
            "tm.event='Tx' AND wasm-CallMessage._contract_address='archway1xcall' AND wasm-CallMessage.sn CONTAINS '12'"
        );
        assert_eq!(
            q.search(),
            "wasm-CallMessage._contract_address='archway1xcall' AND tx.height>=40 AND wasm-CallMessage.sn='12'"
        );
    }
}
