//! Tendermint / CometBFT RPC client with a WebSocket event subscription.

use super::json_rpc::{parse_quantity, JsonRpcClient, RpcReply};
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey, XCallError};
use crate::ports::ledgers::{AbciEvent, CosmosEventQuery, CosmosExecute, CosmosLedger, CosmosTxResult};
use crate::ports::NativeCall;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// `tx_search` page size.
const SEARCH_PAGE: usize = 100;

/// Buffered pushed transactions per subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
struct RawExecResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default)]
    events: Vec<AbciEvent>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    height: Value,
    tx_result: RawExecResult,
}

#[derive(Debug, Deserialize)]
struct RawSearch {
    #[serde(default)]
    txs: Vec<RawTx>,
    #[serde(default)]
    total_count: Value,
}

impl RawTx {
    fn into_result(self) -> Result<CosmosTxResult> {
        Ok(CosmosTxResult {
            tx_hash: self.hash,
            height: parse_quantity(&self.height)?,
            code: self.tx_result.code,
            raw_log: self.tx_result.log,
            events: self.tx_result.events,
        })
    }
}

/// Push notification body for `tm.event='Tx'`.
#[derive(Debug, Deserialize)]
struct PushedTx {
    height: Value,
    #[serde(default)]
    tx: String,
    result: RawExecResult,
}

fn pushed_result(message: &Value) -> Option<CosmosTxResult> {
    let result = message.get("result")?;
    let pushed: PushedTx =
        serde_json::from_value(result.pointer("/data/value/TxResult")?.clone()).ok()?;
    let tx_hash = result
        .pointer("/events/tx.hash/0")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            let raw = general_purpose::STANDARD.decode(&pushed.tx).ok()?;
            Some(hex::encode_upper(Sha256::digest(raw)))
        })?;
    Some(CosmosTxResult {
        tx_hash,
        height: parse_quantity(&pushed.height).ok()?,
        code: pushed.result.code,
        raw_log: pushed.result.log,
        events: pushed.result.events,
    })
}

/// `not found` errors from `/tx` mean "not indexed yet".
fn is_not_found(message: &str, data: Option<&Value>) -> bool {
    let data = data.and_then(Value::as_str).unwrap_or_default();
    message.contains("not found") || data.contains("not found")
}

/// CometBFT RPC client. Broadcasting needs an external submitter; `ws_url`
/// enables push subscriptions.
pub struct CosmosRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    ws_url: Option<String>,
    submitter: Submitter,
}

impl CosmosRpcClient {
    /// Client for `url`, subscribing over `ws_url` when given.
    pub fn new(nid: Nid, url: &str, ws_url: Option<String>, submitter: Submitter) -> Self {
        Self {
            rpc: JsonRpcClient::new(nid.as_str(), url),
            nid,
            ws_url,
            submitter,
        }
    }

    async fn run_subscription(
        chain: String,
        ws_url: String,
        query: String,
        out: mpsc::Sender<CosmosTxResult>,
    ) -> std::result::Result<(), String> {
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| format!("connect {}: {}", ws_url, e))?;
        let (mut write, mut read) = stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "id": 1,
            "params": { "query": query },
        });
        write
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| format!("subscribe: {}", e))?;
        debug!(chain = %chain, query = %query, "Subscribed");

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if let Some(error) = value.get("error") {
                        return Err(format!("subscription error: {}", error));
                    }
                    if let Some(result) = pushed_result(&value) {
                        if out.send(result).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => break,
                Err(e) => return Err(e.to_string()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CosmosLedger for CosmosRpcClient {
    async fn latest_height(&self) -> Result<u64> {
        let status: Value = self.rpc.call("status", json!({})).await?;
        let height = status
            .pointer("/sync_info/latest_block_height")
            .ok_or_else(|| XCallError::rpc(self.rpc.chain(), "status without latest_block_height"))?;
        parse_quantity(height)
    }

    async fn execute(&self, signer: &SignerKey, msg: CosmosExecute) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Cosmos(msg)).await
    }

    async fn tx(&self, hash: &str) -> Result<Option<CosmosTxResult>> {
        let raw_hash = hex::decode(hash.trim_start_matches("0x"))
            .map_err(|e| XCallError::InvalidValue(format!("tx hash {:?}: {}", hash, e)))?;
        let params = json!({ "hash": general_purpose::STANDARD.encode(raw_hash), "prove": false });
        match self.rpc.try_call::<_, RawTx>("tx", params).await? {
            RpcReply::Ok(raw) => raw.into_result().map(Some),
            RpcReply::Err(e) if is_not_found(&e.message, e.data.as_ref()) => Ok(None),
            RpcReply::Err(e) => Err(XCallError::rpc(
                self.rpc.chain(),
                format!("tx error {}: {}", e.code, e.message),
            )),
        }
    }

    async fn tx_search(&self, query: &CosmosEventQuery) -> Result<Vec<CosmosTxResult>> {
        let mut results = Vec::new();
        let mut page = 1usize;
        loop {
            let params = json!({
                "query": query.search(),
                "prove": false,
                "page": page.to_string(),
                "per_page": SEARCH_PAGE.to_string(),
                "order_by": "asc",
            });
            let search: RawSearch = self.rpc.call("tx_search", params).await?;
            let fetched = search.txs.len();
            for raw in search.txs {
                results.push(raw.into_result()?);
            }
            let total = parse_quantity(&search.total_count).ok();
            if fetched < SEARCH_PAGE || total.is_some_and(|t| results.len() as u64 >= t) {
                return Ok(results);
            }
            page += 1;
        }
    }

    async fn subscribe(&self, query: &CosmosEventQuery) -> Result<mpsc::Receiver<CosmosTxResult>> {
        let Some(ws_url) = self.ws_url.clone() else {
            return Err(XCallError::Unsupported {
                chain: self.nid.to_string(),
                operation: "subscribe without ws_url".into(),
            });
        };
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let chain = self.nid.to_string();
        let subscription = query.subscription();
        tokio::spawn(async move {
            if let Err(e) = Self::run_subscription(chain.clone(), ws_url, subscription, tx).await {
                warn!(chain = %chain, error = %e, "Subscription ended");
            }
        });
        Ok(rx)
    }
}
