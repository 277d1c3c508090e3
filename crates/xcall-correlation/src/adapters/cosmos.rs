//! # Cosmos Adapter
//!
//! CosmWasm xCall over a [`CosmosLedger`]. Events are ABCI `wasm-<Name>`
//! events whose attributes may be base64-wrapped on older nodes. The waiter
//! is either subscription-based (Tendermint `/subscribe` plus `tx_search`
//! backfill) or poll-based over `tx_search`.

use super::{extract_sn, Decoded};
use crate::algorithms::{
    fetch_with_retry, CorrelationContext, DecodeFailure, DecodedEvent, EventWaiter, PollSource,
    PollingWaiter, SubscriptionSource, SubscriptionWaiter, TX_FETCH_ATTEMPTS, TX_FETCH_DELAY,
};
use crate::config::CorrelationSettings;
use crate::domain::{
    ChainInfo, EventKind, EventQuery, NetworkAddress, ObservedEvent, Payload, RequestId,
    ResponseCode, Result, SendReceipt, SerialNo, SignerKey, TxOutcome, XCallError, XCallEvent,
    DAPP, XCALL,
};
use crate::ports::ledgers::{AbciAttribute, AbciEvent, CosmosEventQuery, CosmosExecute, CosmosLedger, CosmosTxResult};
use crate::ports::XCallChain;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Prefix CosmWasm adds to contract event types.
pub const WASM_PREFIX: &str = "wasm-";

const CONTRACT_ADDRESS: &str = "_contract_address";

const KNOWN_KEYS: &[&str] = &[CONTRACT_ADDRESS, "from", "to", "sn", "reqId", "data", "code", "msg"];

/// ABCI event type of a logical event.
pub fn event_type(kind: EventKind) -> String {
    format!("{}{}", WASM_PREFIX, kind.signature())
}

/// Attribute that carries the correlation key of `kind`.
pub fn key_attribute(kind: EventKind) -> &'static str {
    if kind.keyed_by_request_id() {
        "reqId"
    } else {
        "sn"
    }
}

fn unwrap_base64(text: &str) -> Option<String> {
    general_purpose::STANDARD
        .decode(text)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Plain attribute map; base64-wrapped pairs are unwrapped when the decoded
/// key is a known xCall attribute.
fn attributes(event: &AbciEvent) -> HashMap<String, String> {
    event
        .attributes
        .iter()
        .map(|attr| {
            if KNOWN_KEYS.contains(&attr.key.as_str()) {
                return (attr.key.clone(), attr.value.clone());
            }
            match unwrap_base64(&attr.key) {
                Some(key) if KNOWN_KEYS.contains(&key.as_str()) => {
                    let value = unwrap_base64(&attr.value).unwrap_or_else(|| attr.value.clone());
                    (key, value)
                }
                _ => (attr.key.clone(), attr.value.clone()),
            }
        })
        .collect()
}

/// Contract that emitted `event`, if the node reported it.
pub fn emitter(event: &AbciEvent) -> Option<String> {
    attributes(event).remove(CONTRACT_ADDRESS)
}

fn bytes_attr(value: &str) -> std::result::Result<Vec<u8>, String> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(trimmed).map_err(|e| format!("data {:?}: {}", value, e))
    } else {
        hex::decode(trimmed.trim_start_matches("0x")).map_err(|e| format!("data {:?}: {}", value, e))
    }
}

struct Attributes<'a> {
    event_type: &'a str,
    map: HashMap<String, String>,
}

impl Attributes<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    fn require(&self, key: &str) -> std::result::Result<&str, String> {
        self.map
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| format!("{} missing attribute {}", self.event_type, key))
    }

    fn sn(&self) -> std::result::Result<SerialNo, String> {
        SerialNo::from_dec_str(self.require("sn")?).map_err(|e| e.to_string())
    }

    fn req_id(&self) -> std::result::Result<RequestId, String> {
        RequestId::from_dec_str(self.require("reqId")?).map_err(|e| e.to_string())
    }

    fn code(&self) -> std::result::Result<ResponseCode, String> {
        let raw = self.require("code")?;
        raw.trim()
            .parse::<i64>()
            .map(ResponseCode)
            .map_err(|e| format!("code {:?}: {}", raw, e))
    }
}

fn decode_attributes(kind: EventKind, attrs: &Attributes<'_>) -> Decoded {
    Ok(match kind {
        EventKind::CallMessageSent => XCallEvent::CallMessageSent {
            from: attrs.optional("from"),
            to: attrs.optional("to"),
            sn: attrs.sn()?,
        },
        EventKind::CallMessage => XCallEvent::CallMessage {
            from: attrs.optional("from"),
            to: attrs.optional("to"),
            sn: attrs.sn()?,
            req_id: attrs.req_id()?,
            data: Payload(bytes_attr(attrs.require("data")?)?),
        },
        EventKind::ResponseMessage => XCallEvent::ResponseMessage {
            sn: attrs.sn()?,
            code: attrs.code()?,
        },
        EventKind::RollbackMessage => XCallEvent::RollbackMessage { sn: attrs.sn()? },
        EventKind::RollbackExecuted => XCallEvent::RollbackExecuted { sn: attrs.sn()? },
        EventKind::CallExecuted => XCallEvent::CallExecuted {
            req_id: attrs.req_id()?,
            code: attrs.code()?,
            msg: attrs.optional("msg").unwrap_or_default(),
        },
    })
}

/// Decode one ABCI event. `None` for events that are not xCall events.
pub fn decode_event(event: &AbciEvent) -> Option<Decoded> {
    let kind = EventKind::from_signature(event.kind.strip_prefix(WASM_PREFIX)?)?;
    let attrs = Attributes {
        event_type: &event.kind,
        map: attributes(event),
    };
    Some(decode_attributes(kind, &attrs))
}

/// Render a logical event as the CosmWasm xCall contract emits it.
pub fn encode_event(event: &XCallEvent, contract: &str, base64_wrapped: bool) -> AbciEvent {
    let mut attrs: Vec<(&str, String)> = vec![(CONTRACT_ADDRESS, contract.to_string())];
    match event {
        XCallEvent::CallMessageSent { from, to, sn } => {
            attrs.push(("from", from.clone().unwrap_or_default()));
            attrs.push(("to", to.clone().unwrap_or_default()));
            attrs.push(("sn", sn.to_string()));
        }
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => {
            attrs.push(("from", from.clone().unwrap_or_default()));
            attrs.push(("to", to.clone().unwrap_or_default()));
            attrs.push(("sn", sn.to_string()));
            attrs.push(("reqId", req_id.to_string()));
            attrs.push(("data", serde_json::to_string(&data.0).unwrap_or_default()));
        }
        XCallEvent::ResponseMessage { sn, code } => {
            attrs.push(("sn", sn.to_string()));
            attrs.push(("code", code.to_string()));
        }
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            attrs.push(("sn", sn.to_string()));
        }
        XCallEvent::CallExecuted { req_id, code, msg } => {
            attrs.push(("reqId", req_id.to_string()));
            attrs.push(("code", code.to_string()));
            attrs.push(("msg", msg.clone()));
        }
    }

    let wrap = |s: &str| {
        if base64_wrapped {
            general_purpose::STANDARD.encode(s)
        } else {
            s.to_string()
        }
    };
    AbciEvent {
        kind: event_type(event.kind()),
        attributes: attrs
            .into_iter()
            .map(|(key, value)| AbciAttribute {
                key: wrap(key),
                value: wrap(&value),
            })
            .collect(),
    }
}

/// Execute message for the dapp's `send_call_message`.
pub fn send_call_message_msg(
    to: &NetworkAddress,
    data: &Payload,
    rollback: Option<&Payload>,
) -> serde_json::Value {
    json!({
        "send_call_message": {
            "to": to.to_string(),
            "data": data.0,
            "rollback": rollback.map(|r| r.0.clone()),
        }
    })
}

/// Execute message for xCall `execute_call`.
pub fn execute_call_msg(req_id: RequestId, data: &Payload) -> serde_json::Value {
    json!({
        "execute_call": {
            "request_id": req_id.to_string(),
            "data": data.0,
        }
    })
}

/// Execute message for xCall `execute_rollback`.
pub fn execute_rollback_msg(sn: SerialNo) -> serde_json::Value {
    json!({ "execute_rollback": { "sequence_no": sn.to_string() } })
}

/// xCall events of `tx` emitted by `contract`.
fn decode_tx(tx: &CosmosTxResult, kind: EventKind, contract: &str) -> Vec<DecodedEvent> {
    let wanted = event_type(kind);
    tx.events
        .iter()
        .filter(|e| e.kind == wanted)
        .filter(|e| emitter(e).as_deref() == Some(contract))
        .filter_map(decode_event)
        .map(|decoded| match decoded {
            Ok(event) => Ok(ObservedEvent {
                height: tx.height,
                tx_id: tx.tx_hash.clone(),
                event,
            }),
            Err(reason) => Err(DecodeFailure {
                height: tx.height,
                tx_id: tx.tx_hash.clone(),
                reason,
            }),
        })
        .collect()
}

fn native_query(query: &EventQuery, from: u64, to: Option<u64>) -> CosmosEventQuery {
    let key = if query.kind.keyed_by_request_id() {
        query.matcher.req_id.map(|id| id.to_string())
    } else {
        query.matcher.sn.map(|sn| sn.to_string())
    };
    CosmosEventQuery {
        event_type: event_type(query.kind),
        contract: query.contract.clone(),
        attribute: key.map(|k| (key_attribute(query.kind).to_string(), k)),
        min_height: from,
        max_height: to,
    }
}

/// Event source over `tx_search` and `/subscribe`.
pub struct CosmosEventSource<L> {
    chain: String,
    ledger: Arc<L>,
}

impl<L: CosmosLedger> CosmosEventSource<L> {
    async fn search(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        let txs = self.ledger.tx_search(&native_query(query, from, Some(to))).await?;
        Ok(txs
            .iter()
            .flat_map(|tx| decode_tx(tx, query.kind, &query.contract))
            .collect())
    }
}

#[async_trait]
impl<L: CosmosLedger> PollSource for CosmosEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.latest_height().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        self.search(query, from, to).await
    }
}

#[async_trait]
impl<L: CosmosLedger + 'static> SubscriptionSource for CosmosEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.latest_height().await
    }

    async fn subscribe(&self, query: &EventQuery) -> Result<mpsc::Receiver<DecodedEvent>> {
        let mut txs = self
            .ledger
            .subscribe(&native_query(query, query.start_height, None))
            .await?;
        let (tx, rx) = mpsc::channel(64);
        let kind = query.kind;
        let contract = query.contract.clone();
        tokio::spawn(async move {
            while let Some(result) = txs.recv().await {
                for decoded in decode_tx(&result, kind, &contract) {
                    if tx.send(decoded).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn backfill(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        self.search(query, from, to).await
    }
}

/// How a Cosmos adapter correlates events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CosmosStrategy {
    /// `/subscribe` with `tx_search` backfill
    Subscribe,
    /// `tx_search` windows
    Poll,
}

/// Cosmos chain adapter.
pub struct CosmosChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: Box<dyn EventWaiter>,
}

impl<L: CosmosLedger + 'static> CosmosChain<L> {
    /// Adapter over `ledger` correlating with `strategy`.
    pub fn new(
        info: ChainInfo,
        settings: CorrelationSettings,
        ledger: Arc<L>,
        strategy: CosmosStrategy,
    ) -> Self {
        let source = CosmosEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::clone(&ledger),
        };
        let waiter: Box<dyn EventWaiter> = match strategy {
            CosmosStrategy::Subscribe => Box::new(SubscriptionWaiter::new(source)),
            CosmosStrategy::Poll => Box::new(PollingWaiter::new(
                source,
                settings.poll_interval,
                settings.max_window,
            )),
        };
        Self {
            info,
            settings,
            ledger,
            waiter,
        }
    }

    async fn submit(&self, signer: &SignerKey, msg: CosmosExecute) -> Result<CosmosTxResult> {
        let chain = self.info.nid.as_str();
        let hash = self.ledger.execute(signer, msg).await?;
        debug!(chain, tx = %hash, "Broadcast execute");
        let result = fetch_with_retry(chain, &hash, TX_FETCH_ATTEMPTS, TX_FETCH_DELAY, || {
            self.ledger.tx(&hash)
        })
        .await?;
        if result.code != 0 {
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: i64::from(result.code),
                log: result.raw_log,
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl<L: CosmosLedger + 'static> XCallChain for CosmosChain<L> {
    fn info(&self) -> &ChainInfo {
        &self.info
    }

    fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    fn event_waiter(&self) -> &dyn EventWaiter {
        self.waiter.as_ref()
    }

    async fn height(&self) -> Result<u64> {
        self.ledger.latest_height().await
    }

    async fn send_packet_xcall(
        &self,
        _ctx: &CorrelationContext,
        signer: &SignerKey,
        destination: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<SendReceipt> {
        let msg = CosmosExecute {
            contract: self.get_contract_address(DAPP)?,
            msg: send_call_message_msg(destination, data, rollback),
        };
        let result = self.submit(signer, msg).await?;
        let xcall = self.get_contract_address(XCALL)?;
        let wanted = event_type(EventKind::CallMessageSent);
        let sn = extract_sn(
            self.info.nid.as_str(),
            &result.tx_hash,
            result
                .events
                .iter()
                .filter(|e| e.kind == wanted && emitter(e).as_deref() == Some(xcall.as_str()))
                .filter_map(decode_event),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: result.tx_hash,
            height: result.height,
            source: self.info.nid.clone(),
        })
    }

    async fn execute_call(
        &self,
        _ctx: &CorrelationContext,
        signer: &SignerKey,
        req_id: RequestId,
        data: &Payload,
    ) -> Result<TxOutcome> {
        let msg = CosmosExecute {
            contract: self.get_contract_address(XCALL)?,
            msg: execute_call_msg(req_id, data),
        };
        let result = self.submit(signer, msg).await?;
        Ok(TxOutcome {
            tx_id: result.tx_hash,
            height: result.height,
        })
    }

    async fn execute_rollback(
        &self,
        _ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let msg = CosmosExecute {
            contract: self.get_contract_address(XCALL)?,
            msg: execute_rollback_msg(sn),
        };
        let result = self.submit(signer, msg).await?;
        Ok(TxOutcome {
            tx_id: result.tx_hash,
            height: result.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_message() -> XCallEvent {
        XCallEvent::CallMessage {
            from: Some("0x2.evm/0xdapp".into()),
            to: Some("archway1dapp".into()),
            sn: SerialNo::from_u64(12),
            req_id: RequestId::from_u64(4),
            data: Payload::from("hello"),
        }
    }

    #[test]
    fn test_plain_attributes() {
        let event = encode_event(&call_message(), "archway1xcall", false);
        assert_eq!(event.kind, "wasm-CallMessage");
        assert_eq!(emitter(&event).as_deref(), Some("archway1xcall"));
        assert_eq!(decode_event(&event).unwrap().unwrap(), call_message());
    }

    #[test]
    fn test_base64_wrapped_attributes() {
        let event = encode_event(&call_message(), "archway1xcall", true);
        assert_ne!(event.attributes[1].key, "from");
        assert_eq!(emitter(&event).as_deref(), Some("archway1xcall"));
        assert_eq!(decode_event(&event).unwrap().unwrap(), call_message());
    }

    #[test]
    fn test_hex_data_attribute() {
        let event = AbciEvent {
            kind: "wasm-CallMessage".into(),
            attributes: vec![
                AbciAttribute { key: "sn".into(), value: "1".into() },
                AbciAttribute { key: "reqId".into(), value: "2".into() },
                AbciAttribute { key: "data".into(), value: "0x6869".into() },
            ],
        };
        match decode_event(&event).unwrap().unwrap() {
            XCallEvent::CallMessage { data, from, .. } => {
                assert_eq!(data, Payload::from("hi"));
                assert_eq!(from, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_sn_is_decode_failure() {
        let event = AbciEvent {
            kind: "wasm-RollbackMessage".into(),
            attributes: vec![],
        };
        let reason = decode_event(&event).unwrap().unwrap_err();
        assert!(reason.contains("sn"));
    }

    #[test]
    fn test_non_xcall_event_is_ignored() {
        let event = AbciEvent {
            kind: "transfer".into(),
            attributes: vec![],
        };
        assert!(decode_event(&event).is_none());
    }

    #[test]
    fn test_execute_messages() {
        let to = NetworkAddress::parse("0x2.evm/0xdapp").unwrap();
        let msg = send_call_message_msg(&to, &Payload::from("hi"), None);
        assert_eq!(msg["send_call_message"]["to"], "0x2.evm/0xdapp");
        assert_eq!(msg["send_call_message"]["data"], json!([104, 105]));
        assert!(msg["send_call_message"]["rollback"].is_null());

        let msg = execute_rollback_msg(SerialNo::from_u64(7));
        assert_eq!(msg["execute_rollback"]["sequence_no"], "7");
    }

    #[test]
    fn test_native_query_uses_request_id_for_call_executed() {
        let query = EventQuery::new(
            EventKind::CallExecuted,
            "archway1xcall",
            5,
            crate::domain::EventMatcher::by_req_id(RequestId::from_u64(8)),
        );
        let native = native_query(&query, 5, Some(9));
        assert_eq!(native.attribute, Some(("reqId".to_string(), "8".to_string())));
        assert_eq!(native.event_type, "wasm-CallExecuted");
    }
}
