//! Soroban JSON-RPC client.

use super::json_rpc::{parse_quantity, JsonRpcClient};
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey};
use crate::ports::ledgers::{
    EventsStart, SorobanEvent, SorobanInvocation, SorobanTransaction, StellarLedger,
};
use crate::ports::NativeCall;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Events per page when collecting a transaction's own events.
const TX_EVENT_PAGE: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    paging_token: Option<String>,
    ledger: Value,
    tx_hash: String,
    contract_id: String,
    #[serde(default)]
    topic: Vec<String>,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RawEvents {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    status: String,
    #[serde(default)]
    ledger: Value,
    #[serde(default)]
    result_xdr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLatestLedger {
    sequence: u64,
}

impl RawEvent {
    fn into_event(self) -> Result<SorobanEvent> {
        // Older RPC versions wrap the value as `{ "xdr": ... }`.
        let value = match self.value {
            Value::String(s) => s,
            Value::Object(obj) => obj
                .get("xdr")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        Ok(SorobanEvent {
            id: self.paging_token.unwrap_or(self.id),
            ledger: parse_quantity(&self.ledger)?,
            tx_hash: self.tx_hash,
            contract_id: self.contract_id,
            topic: self.topic,
            value,
        })
    }
}

/// Soroban RPC client. Signing needs an external submitter.
pub struct StellarRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    submitter: Submitter,
}

impl StellarRpcClient {
    /// Client for `url`.
    pub fn new(nid: Nid, url: &str, submitter: Submitter) -> Self {
        Self {
            rpc: JsonRpcClient::new(nid.as_str(), url),
            nid,
            submitter,
        }
    }

    async fn events(&self, filter: Value, start: EventsStart, limit: usize) -> Result<Vec<SorobanEvent>> {
        let params = match start {
            EventsStart::Ledger(ledger) => json!({
                "startLedger": ledger,
                "filters": [filter],
                "pagination": { "limit": limit },
            }),
            EventsStart::After(cursor) => json!({
                "filters": [filter],
                "pagination": { "cursor": cursor, "limit": limit },
            }),
        };
        let raw: RawEvents = self.rpc.call("getEvents", params).await?;
        raw.events.into_iter().map(RawEvent::into_event).collect()
    }
}

#[async_trait]
impl StellarLedger for StellarRpcClient {
    async fn latest_ledger(&self) -> Result<u64> {
        let latest: RawLatestLedger = self.rpc.call("getLatestLedger", json!({})).await?;
        Ok(latest.sequence)
    }

    async fn invoke(&self, signer: &SignerKey, call: SorobanInvocation) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Stellar(call)).await
    }

    async fn transaction(&self, hash: &str) -> Result<Option<SorobanTransaction>> {
        let raw: RawTransaction = self
            .rpc
            .call("getTransaction", json!({ "hash": hash }))
            .await?;
        if raw.status == "NOT_FOUND" {
            return Ok(None);
        }
        let ledger = parse_quantity(&raw.ledger)?;
        let mut events = Vec::new();
        let mut start = EventsStart::Ledger(ledger);
        loop {
            let page = self
                .events(json!({ "type": "contract" }), start, TX_EVENT_PAGE)
                .await?;
            let next = match page.last() {
                Some(last) if page.len() == TX_EVENT_PAGE && last.ledger <= ledger => Some(last.id.clone()),
                _ => None,
            };
            events.extend(page.into_iter().filter(|e| e.ledger == ledger && e.tx_hash == hash));
            match next {
                Some(id) => start = EventsStart::After(id),
                None => break,
            }
        }
        let error = (raw.status != "SUCCESS").then(|| raw.result_xdr.unwrap_or_default());
        Ok(Some(SorobanTransaction {
            hash: hash.to_string(),
            ledger,
            status: raw.status,
            error,
            events,
        }))
    }

    async fn get_events(
        &self,
        contract_id: &str,
        start: EventsStart,
        limit: usize,
    ) -> Result<Vec<SorobanEvent>> {
        let filter = json!({ "type": "contract", "contractIds": [contract_id] });
        self.events(filter, start, limit).await
    }
}
