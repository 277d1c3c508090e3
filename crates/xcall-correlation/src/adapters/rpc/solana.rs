//! Solana JSON-RPC client.

use super::json_rpc::JsonRpcClient;
use super::{submit_external, Submitter};
use crate::domain::{Nid, Result, SignerKey};
use crate::ports::ledgers::{SignatureInfo, SolanaInstruction, SolanaLedger, SolanaTransaction};
use crate::ports::NativeCall;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const COMMITMENT: &str = "confirmed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    err: Value,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    slot: u64,
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Value,
}

/// `null` is success; anything else is rendered as the error description.
fn error_text(err: &Value) -> Option<String> {
    match err {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Solana RPC client. Signing needs an external submitter.
pub struct SolanaRpcClient {
    nid: Nid,
    rpc: JsonRpcClient,
    submitter: Submitter,
}

impl SolanaRpcClient {
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
impl SolanaLedger for SolanaRpcClient {
    async fn slot(&self) -> Result<u64> {
        self.rpc
            .call("getSlot", json!([{ "commitment": COMMITMENT }]))
            .await
    }

    async fn send_instruction(&self, signer: &SignerKey, ix: SolanaInstruction) -> Result<String> {
        submit_external(&self.submitter, &self.nid, signer, NativeCall::Solana(ix)).await
    }

    async fn transaction(&self, signature: &str) -> Result<Option<SolanaTransaction>> {
        let params = json!([signature, {
            "encoding": "json",
            "commitment": COMMITMENT,
            "maxSupportedTransactionVersion": 0,
        }]);
        let raw: Option<RawTransaction> = self.rpc.call("getTransaction", params).await?;
        Ok(raw.map(|raw| {
            let meta = raw.meta.unwrap_or(RawMeta {
                err: Value::Null,
                log_messages: None,
            });
            SolanaTransaction {
                signature: signature.to_string(),
                slot: raw.slot,
                err: error_text(&meta.err),
                log_messages: meta.log_messages.unwrap_or_default(),
            }
        }))
    }

    async fn signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let mut config = json!({ "limit": limit, "commitment": COMMITMENT });
        if let Some(before) = before {
            config["before"] = json!(before);
        }
        let params = json!([address, config]);
        let raw: Vec<RawSignature> = self.rpc.call("getSignaturesForAddress", params).await?;
        Ok(raw
            .into_iter()
            .map(|s| SignatureInfo {
                err: error_text(&s.err),
                signature: s.signature,
                slot: s.slot,
            })
            .collect())
    }
}
