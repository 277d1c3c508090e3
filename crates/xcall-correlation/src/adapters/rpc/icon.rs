//! ICON JSON-RPC v3 client.

use super::json_rpc::{parse_hex_u64, JsonRpcClient, RpcReply};
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey, XCallError};
use crate::ports::ledgers::{IconCall, IconEventLog, IconFailure, IconLedger, IconTxResult};
use crate::ports::NativeCall;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// `icx_getTransactionResult` codes for transactions that are known but not
/// final yet, or not known yet.
const NOT_READY_CODES: &[i64] = &[-31002, -31003, -31004];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventLog {
    score_address: String,
    #[serde(default)]
    indexed: Vec<Value>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawFailure {
    code: Value,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTxResult {
    tx_hash: String,
    block_height: String,
    status: String,
    #[serde(default)]
    failure: Option<RawFailure>,
    #[serde(default)]
    event_logs: Vec<RawEventLog>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    height: u64,
    #[serde(default)]
    confirmed_transaction_list: Vec<Value>,
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl RawTxResult {
    fn into_result(self) -> Result<IconTxResult> {
        let failure = self.failure.map(|f| IconFailure {
            code: match &f.code {
                Value::String(s) => parse_hex_u64(s).map(|c| c as i64).unwrap_or(0),
                Value::Number(n) => n.as_i64().unwrap_or(0),
                _ => 0,
            },
            message: f.message,
        });
        Ok(IconTxResult {
            tx_hash: self.tx_hash,
            block_height: parse_hex_u64(&self.block_height)?,
            status: parse_hex_u64(&self.status)?,
            failure,
            event_logs: self
                .event_logs
                .into_iter()
                .map(|log| IconEventLog {
                    score_address: log.score_address,
                    indexed: log.indexed.into_iter().map(text).collect(),
                    data: log.data.into_iter().map(text).collect(),
                })
                .collect(),
        })
    }
}

/// `icx_*` client. Signing needs an external submitter.
pub struct IconRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    submitter: Submitter,
}

impl IconRpcClient {
    /// Client for the `/api/v3` endpoint at `url`.
    pub fn new(nid: Nid, url: &str, submitter: Submitter) -> Self {
        Self {
            rpc: JsonRpcClient::new(nid.as_str(), url),
            nid,
            submitter,
        }
    }
}

#[async_trait]
impl IconLedger for IconRpcClient {
    async fn last_height(&self) -> Result<u64> {
        let block: RawBlock = self.rpc.call("icx_getLastBlock", json!({})).await?;
        Ok(block.height)
    }

    async fn send_call(&self, signer: &SignerKey, call: IconCall) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Icon(call)).await
    }

    async fn transaction_result(&self, tx_hash: &str) -> Result<Option<IconTxResult>> {
        let params = json!({ "txHash": tx_hash });
        match self
            .rpc
            .try_call::<_, RawTxResult>("icx_getTransactionResult", params)
            .await?
        {
            RpcReply::Ok(raw) => raw.into_result().map(Some),
            RpcReply::Err(e) if NOT_READY_CODES.contains(&e.code) => Ok(None),
            RpcReply::Err(e) => Err(XCallError::rpc(
                self.rpc.chain(),
                format!("icx_getTransactionResult error {}: {}", e.code, e.message),
            )),
        }
    }

    async fn block_results(&self, height: u64) -> Result<Vec<IconTxResult>> {
        let params = json!({ "height": format!("0x{:x}", height) });
        let block: RawBlock = self.rpc.call("icx_getBlockByHeight", params).await?;
        let mut results = Vec::with_capacity(block.confirmed_transaction_list.len());
        for tx in &block.confirmed_transaction_list {
            let Some(hash) = tx.get("txHash").and_then(Value::as_str) else {
                continue;
            };
            let hash = if hash.starts_with("0x") {
                hash.to_string()
            } else {
                format!("0x{}", hash)
            };
            if let Some(result) = self.transaction_result(&hash).await? {
                results.push(result);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_result_conversion() {
        let raw: RawTxResult = serde_json::from_value(json!({
            "txHash": "0xabc",
            "blockHeight": "0x20",
            "status": "0x0",
            "failure": { "code": "0x21", "message": "MaxDataSizeExceeded" },
            "eventLogs": [{
                "scoreAddress": "cx1",
                "indexed": ["RollbackMessage(int)", "0x5"],
                "data": [null]
            }]
        }))
        .unwrap();
        let result = raw.into_result().unwrap();
        assert_eq!(result.block_height, 32);
        assert_eq!(result.status, 0);
        assert_eq!(result.failure.unwrap().code, 0x21);
        assert_eq!(result.event_logs[0].indexed[1], "0x5");
        assert_eq!(result.event_logs[0].data[0], "");
    }
}
