//! Ethereum JSON-RPC client.

use super::json_rpc::{parse_hex_u64, JsonRpcClient};
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey, XCallError};
use crate::ports::ledgers::{EvmCall, EvmLedger, EvmLog, EvmReceipt, LogFilter};
use crate::ports::NativeCall;
use alloy_primitives::B256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    topics: Vec<B256>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
    #[serde(default)]
    revert_reason: Option<String>,
}

impl RawLog {
    fn into_log(self) -> Result<EvmLog> {
        Ok(EvmLog {
            address: self.address,
            topics: self.topics,
            data: hex::decode(self.data.trim_start_matches("0x"))
                .map_err(|e| XCallError::InvalidValue(format!("log data: {}", e)))?,
            block_number: self.block_number.as_deref().map(parse_hex_u64).transpose()?.unwrap_or(0),
            tx_hash: self.transaction_hash.unwrap_or_default(),
        })
    }
}

/// `eth_*` client. Without an external submitter, transactions go through
/// `eth_sendTransaction` from the node-managed `signer` account.
pub struct EvmRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    submitter: Submitter,
}

impl EvmRpcClient {
    /// Client for `url`.
    pub fn new(nid: Nid, url: &str, submitter: Submitter) -> Self {
        Self {
            rpc: JsonRpcClient::new(nid.as_str(), url),
            nid,
            submitter,
        }
    }
}

#[async_trait]
impl EvmLedger for EvmRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let result: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
    }

    async fn send_transaction(&self, signer: &SignerKey, call: EvmCall) -> Result<String> {
        if self.submitter.is_some() {
            return submit_external(&self.submitter, &self.nid, signer, NativeCall::Evm(call)).await;
        }
        let tx = json!({
            "from": signer.as_str(),
            "to": call.to,
            "data": format!("0x{}", hex::encode(&call.input)),
        });
        self.rpc.call("eth_sendTransaction", json!([tx])).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>> {
        let raw: Option<RawReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let Some(block) = raw.block_number.as_deref() else {
            return Ok(None);
        };
        Ok(Some(EvmReceipt {
            tx_hash: raw.transaction_hash,
            block_number: parse_hex_u64(block)?,
            status: raw.status.as_deref().map(parse_hex_u64).transpose()?.unwrap_or(0),
            logs: raw.logs.into_iter().map(RawLog::into_log).collect::<Result<_>>()?,
            revert_reason: raw.revert_reason,
        }))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>> {
        let topics: Vec<Value> = filter
            .topics
            .iter()
            .map(|t| t.map(|t| json!(t)).unwrap_or(Value::Null))
            .collect();
        let params = json!([{
            "address": filter.address,
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "topics": topics,
        }]);
        let raw: Vec<RawLog> = self.rpc.call("eth_getLogs", params).await?;
        raw.into_iter().map(RawLog::into_log).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_receipt_conversion() {
        let raw: RawReceipt = serde_json::from_value(json!({
            "transactionHash": "0xaa",
            "blockNumber": "0x10",
            "status": "0x1",
            "logs": [{
                "address": "0xbb",
                "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                "data": "0x0102",
                "blockNumber": "0x10",
                "transactionHash": "0xaa"
            }]
        }))
        .unwrap();
        let log = raw.logs.into_iter().next().unwrap().into_log().unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.data, vec![1, 2]);
        assert_eq!(log.topics[0], B256::with_last_byte(1));
    }
}
