//! Sui JSON-RPC client.

use super::json_rpc::{parse_quantity, JsonRpcClient, RpcReply};
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey, XCallError};
use crate::ports::ledgers::{MoveCall, SuiEvent, SuiEventId, SuiLedger, SuiTransactionBlock};
use crate::ports::NativeCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct RawEventId {
    #[serde(rename = "txDigest")]
    tx_digest: String,
    #[serde(rename = "eventSeq", default)]
    event_seq: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    id: RawEventId,
    #[serde(default)]
    parsed_json: Value,
}

#[derive(Debug, Deserialize)]
struct RawEventPage {
    #[serde(default)]
    data: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    digest: String,
    #[serde(default)]
    checkpoint: Option<Value>,
    #[serde(default)]
    effects: Option<Value>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

impl RawEvent {
    fn into_event(self, checkpoint: Option<u64>) -> SuiEvent {
        SuiEvent {
            event_type: self.event_type,
            tx_digest: self.id.tx_digest,
            event_seq: parse_quantity(&self.id.event_seq).unwrap_or(0),
            checkpoint,
            parsed_json: self.parsed_json,
        }
    }
}

/// Sui RPC client. Signing needs an external submitter. Event pages do not
/// carry checkpoints, so the client resolves and caches them per digest.
pub struct SuiRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    submitter: Submitter,
    checkpoints: Mutex<HashMap<String, u64>>,
}

impl SuiRpcClient {
    /// Client for `url`.
    pub fn new(nid: Nid, url: &str, submitter: Submitter) -> Self {
        Self {
            rpc: JsonRpcClient::new(nid.as_str(), url),
            nid,
            submitter,
            checkpoints: Mutex::new(HashMap::new()),
        }
    }

    async fn raw_block(&self, digest: &str, with_events: bool) -> Result<Option<RawBlock>> {
        let options = json!({ "showEffects": with_events, "showEvents": with_events });
        match self
            .rpc
            .try_call::<_, RawBlock>("sui_getTransactionBlock", json!([digest, options]))
            .await?
        {
            RpcReply::Ok(block) => Ok(Some(block)),
            RpcReply::Err(e) if e.message.contains("Could not find") => Ok(None),
            RpcReply::Err(e) => Err(XCallError::rpc(
                self.rpc.chain(),
                format!("sui_getTransactionBlock error {}: {}", e.code, e.message),
            )),
        }
    }

    async fn checkpoint_of(&self, digest: &str) -> Result<Option<u64>> {
        if let Some(cp) = self.checkpoints.lock().get(digest) {
            return Ok(Some(*cp));
        }
        let checkpoint = match self.raw_block(digest, false).await? {
            Some(RawBlock {
                checkpoint: Some(cp),
                ..
            }) => Some(parse_quantity(&cp)?),
            _ => None,
        };
        if let Some(cp) = checkpoint {
            self.checkpoints.lock().insert(digest.to_string(), cp);
        }
        Ok(checkpoint)
    }
}

#[async_trait]
impl SuiLedger for SuiRpcClient {
    async fn latest_checkpoint(&self) -> Result<u64> {
        let seq: Value = self
            .rpc
            .call("sui_getLatestCheckpointSequenceNumber", json!([]))
            .await?;
        parse_quantity(&seq)
    }

    async fn execute_move_call(&self, signer: &SignerKey, call: MoveCall) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Sui(call)).await
    }

    async fn transaction_block(&self, digest: &str) -> Result<Option<SuiTransactionBlock>> {
        let Some(raw) = self.raw_block(digest, true).await? else {
            return Ok(None);
        };
        let checkpoint = raw.checkpoint.as_ref().map(parse_quantity).transpose()?;
        let status = raw
            .effects
            .as_ref()
            .and_then(|e| e.pointer("/status/status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let error = raw
            .effects
            .as_ref()
            .and_then(|e| e.pointer("/status/error"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Some(SuiTransactionBlock {
            digest: raw.digest,
            checkpoint,
            status,
            error,
            events: raw
                .events
                .into_iter()
                .map(|e| e.into_event(checkpoint))
                .collect(),
        }))
    }

    async fn query_events(
        &self,
        event_type: &str,
        cursor: Option<SuiEventId>,
        limit: usize,
    ) -> Result<Vec<SuiEvent>> {
        let cursor = match cursor {
            Some(id) => json!({ "txDigest": id.tx_digest, "eventSeq": id.event_seq.to_string() }),
            None => Value::Null,
        };
        let params = json!([{ "MoveEventType": event_type }, cursor, limit, true]);
        let page: RawEventPage = self.rpc.call("suix_queryEvents", params).await?;
        let mut events = Vec::with_capacity(page.data.len());
        for raw in page.data {
            let checkpoint = self.checkpoint_of(&raw.id.tx_digest).await?;
            events.push(raw.into_event(checkpoint));
        }
        Ok(events)
    }
}
