//! Stacks node and API client.

use super::json_rpc::JsonRpcClient;
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey};
use crate::ports::ledgers::{
    ClarityCall, StacksContractEvent, StacksEventPage, StacksLedger, StacksTransaction,
};
use crate::ports::NativeCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;

/// Transaction heights remembered before the cache is reset.
const HEIGHT_CACHE_LIMIT: usize = 4096;

#[derive(Debug, Deserialize)]
struct RawInfo {
    stacks_tip_height: u64,
}

#[derive(Debug, Deserialize)]
struct RawRepr {
    #[serde(default)]
    repr: String,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    tx_id: String,
    tx_status: String,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    tx_result: Option<RawRepr>,
}

#[derive(Debug, Deserialize)]
struct RawContractLog {
    value: RawRepr,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    tx_id: String,
    #[serde(default)]
    contract_log: Option<RawContractLog>,
}

#[derive(Debug, Deserialize)]
struct RawEventPage {
    #[serde(default)]
    results: Vec<RawEvent>,
}

/// Hiro-style API client. Signing needs an external submitter. Contract log
/// entries carry no height, so the client resolves and caches it per
/// transaction.
pub struct StacksRpcClient {
    nid: Nid,
    api: JsonRpcClient,
    submitter: Submitter,
    heights: Mutex<HashMap<String, u64>>,
}

impl StacksRpcClient {
    /// Client for the API base `url`.
    pub fn new(nid: Nid, url: &str, submitter: Submitter) -> Self {
        Self {
            api: JsonRpcClient::new(nid.as_str(), url),
            nid,
            submitter,
            heights: Mutex::new(HashMap::new()),
        }
    }

    async fn height_of(&self, tx_id: &str) -> Result<Option<u64>> {
        if let Some(height) = self.heights.lock().get(tx_id) {
            return Ok(Some(*height));
        }
        let height = self.transaction(tx_id).await?.and_then(|tx| tx.block_height);
        if let Some(height) = height {
            remember(&mut self.heights.lock(), tx_id, height);
        }
        Ok(height)
    }
}

fn remember(heights: &mut HashMap<String, u64>, tx_id: &str, height: u64) {
    if heights.len() >= HEIGHT_CACHE_LIMIT && !heights.contains_key(tx_id) {
        heights.clear();
    }
    heights.insert(tx_id.to_string(), height);
}

#[async_trait]
impl StacksLedger for StacksRpcClient {
    async fn tip_height(&self) -> Result<u64> {
        let info: Option<RawInfo> = self.api.get("/v2/info").await?;
        Ok(info.map(|i| i.stacks_tip_height).unwrap_or(0))
    }

    async fn call_contract(&self, signer: &SignerKey, call: ClarityCall) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Stacks(call)).await
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<StacksTransaction>> {
        let raw: Option<RawTx> = self.api.get(&format!("/extended/v1/tx/{}", tx_id)).await?;
        Ok(raw.map(|raw| StacksTransaction {
            tx_id: raw.tx_id,
            block_height: raw.block_height,
            tx_status: raw.tx_status,
            tx_result_repr: raw.tx_result.map(|r| r.repr).unwrap_or_default(),
        }))
    }

    async fn contract_events(
        &self,
        contract_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<StacksEventPage> {
        let path = format!(
            "/extended/v1/contract/{}/events?offset={}&limit={}",
            contract_id, offset, limit
        );
        let page: Option<RawEventPage> = self.api.get(&path).await?;
        let results = page.map(|p| p.results).unwrap_or_default();
        let fetched = results.len();
        let mut events = Vec::new();
        for raw in results {
            let Some(log) = raw.contract_log else {
                continue;
            };
            let Some(block_height) = self.height_of(&raw.tx_id).await? else {
                continue;
            };
            events.push(StacksContractEvent {
                tx_id: raw.tx_id,
                block_height,
                repr: log.value.repr,
            });
        }
        Ok(StacksEventPage { events, fetched })
    }
}
