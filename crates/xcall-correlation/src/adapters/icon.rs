//! # ICON Adapter
//!
//! Java SCORE xCall over an [`IconLedger`]. Event logs carry the Java-style
//! signature as the first indexed value; integers and bytes are `0x` hex
//! strings. Correlation polls block results.

use super::{extract_sn, Decoded};
use crate::algorithms::{
    await_inclusion, CorrelationContext, DecodeFailure, DecodedEvent, EventWaiter, PollSource,
    PollingWaiter,
};
use crate::config::CorrelationSettings;
use crate::domain::{
    ChainInfo, EventKind, EventQuery, NetworkAddress, ObservedEvent, Payload, RequestId,
    ResponseCode, Result, SendReceipt, SerialNo, SignerKey, TxOutcome, XCallError, XCallEvent,
    DAPP, XCALL,
};
use crate::ports::ledgers::{IconCall, IconEventLog, IconLedger, IconTxResult};
use crate::ports::XCallChain;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Event log signature of each logical event.
pub fn signature(kind: EventKind) -> &'static str {
    match kind {
        EventKind::CallMessageSent => "CallMessageSent(Address,str,int)",
        EventKind::CallMessage => "CallMessage(str,str,int,int,bytes)",
        EventKind::ResponseMessage => "ResponseMessage(int,int)",
        EventKind::RollbackMessage => "RollbackMessage(int)",
        EventKind::RollbackExecuted => "RollbackExecuted(int)",
        EventKind::CallExecuted => "CallExecuted(int,int,str)",
    }
}

fn kind_of(sig: &str) -> Option<EventKind> {
    EventKind::ALL.into_iter().find(|k| signature(*k) == sig)
}

/// Parse an ICON integer (`0x1f`, `-0x1`).
pub fn parse_int(value: &str) -> std::result::Result<i64, String> {
    let v = value.trim();
    let (negative, digits) = match v.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, v),
    };
    let digits = digits
        .strip_prefix("0x")
        .ok_or_else(|| format!("integer {:?} is not 0x hex", value))?;
    let magnitude = i64::from_str_radix(digits, 16).map_err(|e| format!("integer {:?}: {}", value, e))?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Render an ICON integer.
pub fn format_int(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{:x}", value)
    }
}

struct Fields<'a> {
    log: &'a IconEventLog,
}

impl Fields<'_> {
    fn indexed(&self, i: usize) -> std::result::Result<&str, String> {
        self.log
            .indexed
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| format!("{} missing indexed[{}]", self.log.indexed[0], i))
    }

    fn data(&self, i: usize) -> std::result::Result<&str, String> {
        self.log
            .data
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| format!("{} missing data[{}]", self.log.indexed[0], i))
    }
}

fn sn(v: &str) -> std::result::Result<SerialNo, String> {
    SerialNo::from_hex_str(v).map_err(|e| e.to_string())
}

fn req_id(v: &str) -> std::result::Result<RequestId, String> {
    RequestId::from_hex_str(v).map_err(|e| e.to_string())
}

fn code(v: &str) -> std::result::Result<ResponseCode, String> {
    parse_int(v).map(ResponseCode)
}

fn decode_fields(kind: EventKind, f: &Fields<'_>) -> Decoded {
    Ok(match kind {
        EventKind::CallMessageSent => XCallEvent::CallMessageSent {
            from: Some(f.indexed(1)?.to_string()),
            to: Some(f.indexed(2)?.to_string()),
            sn: sn(f.indexed(3)?)?,
        },
        EventKind::CallMessage => XCallEvent::CallMessage {
            from: Some(f.indexed(1)?.to_string()),
            to: Some(f.indexed(2)?.to_string()),
            sn: sn(f.indexed(3)?)?,
            req_id: req_id(f.data(0)?)?,
            data: Payload::from_hex(f.data(1)?).map_err(|e| e.to_string())?,
        },
        EventKind::ResponseMessage => XCallEvent::ResponseMessage {
            sn: sn(f.indexed(1)?)?,
            code: code(f.data(0)?)?,
        },
        EventKind::RollbackMessage => XCallEvent::RollbackMessage {
            sn: sn(f.indexed(1)?)?,
        },
        EventKind::RollbackExecuted => XCallEvent::RollbackExecuted {
            sn: sn(f.indexed(1)?)?,
        },
        EventKind::CallExecuted => XCallEvent::CallExecuted {
            req_id: req_id(f.indexed(1)?)?,
            code: code(f.data(0)?)?,
            msg: f.data(1).unwrap_or_default().to_string(),
        },
    })
}

/// Decode one event log. `None` for logs that are not xCall events.
pub fn decode_log(log: &IconEventLog) -> Option<Decoded> {
    let kind = kind_of(log.indexed.first()?)?;
    Some(decode_fields(kind, &Fields { log }))
}

/// Render a logical event as the xCall SCORE logs it.
pub fn encode_event(event: &XCallEvent, score: &str) -> IconEventLog {
    let sig = signature(event.kind()).to_string();
    let text = |s: &Option<String>| s.clone().unwrap_or_default();
    let (indexed, data) = match event {
        XCallEvent::CallMessageSent { from, to, sn } => {
            (vec![sig, text(from), text(to), sn.to_hex()], vec![])
        }
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => (
            vec![sig, text(from), text(to), sn.to_hex()],
            vec![req_id.to_hex(), data.to_hex()],
        ),
        XCallEvent::ResponseMessage { sn, code } => (vec![sig, sn.to_hex()], vec![format_int(code.0)]),
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            (vec![sig, sn.to_hex()], vec![])
        }
        XCallEvent::CallExecuted { req_id, code, msg } => (
            vec![sig, req_id.to_hex()],
            vec![format_int(code.0), msg.clone()],
        ),
    };
    IconEventLog {
        score_address: score.to_string(),
        indexed,
        data,
    }
}

fn params(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Dapp `sendMessage` call.
pub fn send_message_call(
    dapp: &str,
    to: &NetworkAddress,
    data: &Payload,
    rollback: Option<&Payload>,
) -> IconCall {
    let mut pairs = vec![
        ("_to", Value::String(to.to_string())),
        ("_data", Value::String(data.to_hex())),
    ];
    if let Some(rollback) = rollback {
        pairs.push(("_rollback", Value::String(rollback.to_hex())));
    }
    IconCall {
        to: dapp.to_string(),
        method: "sendMessage".into(),
        params: params(pairs),
    }
}

/// xCall `executeCall` call.
pub fn execute_call_call(xcall: &str, req_id: RequestId, data: &Payload) -> IconCall {
    IconCall {
        to: xcall.to_string(),
        method: "executeCall".into(),
        params: params(vec![
            ("_reqId", Value::String(req_id.to_hex())),
            ("_data", Value::String(data.to_hex())),
        ]),
    }
}

/// xCall `executeRollback` call.
pub fn execute_rollback_call(xcall: &str, sn: SerialNo) -> IconCall {
    IconCall {
        to: xcall.to_string(),
        method: "executeRollback".into(),
        params: params(vec![("_sn", Value::String(sn.to_hex()))]),
    }
}

fn observe(result: &IconTxResult, kind: EventKind, score: &str) -> Vec<DecodedEvent> {
    result
        .event_logs
        .iter()
        .filter(|log| log.score_address == score)
        .filter(|log| log.indexed.first().map(String::as_str) == Some(signature(kind)))
        .filter_map(decode_log)
        .map(|decoded| match decoded {
            Ok(event) => Ok(ObservedEvent {
                height: result.block_height,
                tx_id: result.tx_hash.clone(),
                event,
            }),
            Err(reason) => Err(DecodeFailure {
                height: result.block_height,
                tx_id: result.tx_hash.clone(),
                reason,
            }),
        })
        .collect()
}

/// [`PollSource`] reading block results height by height.
pub struct IconEventSource<L> {
    chain: String,
    ledger: Arc<L>,
}

#[async_trait]
impl<L: IconLedger> PollSource for IconEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.last_height().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        let mut events = Vec::new();
        for height in from..=to {
            for result in self.ledger.block_results(height).await? {
                events.extend(observe(&result, query.kind, &query.contract));
            }
        }
        Ok(events)
    }
}

/// ICON chain adapter.
pub struct IconChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<IconEventSource<L>>,
}

impl<L: IconLedger> IconChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = IconEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::clone(&ledger),
        };
        let waiter = PollingWaiter::new(source, settings.poll_interval, settings.max_window);
        Self {
            info,
            settings,
            ledger,
            waiter,
        }
    }

    async fn submit(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        call: IconCall,
    ) -> Result<IconTxResult> {
        let chain = self.info.nid.as_str();
        let hash = self.ledger.send_call(signer, call).await?;
        debug!(chain, tx = %hash, "Submitted call");
        let result = await_inclusion(ctx, chain, &hash, self.settings.poll_interval, || {
            self.ledger.transaction_result(&hash)
        })
        .await?;
        if result.status != 1 {
            let (code, log) = result
                .failure
                .as_ref()
                .map(|f| (f.code, f.message.clone()))
                .unwrap_or((0, "transaction failed".to_string()));
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code,
                log,
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl<L: IconLedger + 'static> XCallChain for IconChain<L> {
    fn info(&self) -> &ChainInfo {
        &self.info
    }

    fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    fn event_waiter(&self) -> &dyn EventWaiter {
        &self.waiter
    }

    async fn height(&self) -> Result<u64> {
        self.ledger.last_height().await
    }

    async fn send_packet_xcall(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        destination: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<SendReceipt> {
        let dapp = self.get_contract_address(DAPP)?;
        let result = self
            .submit(ctx, signer, send_message_call(&dapp, destination, data, rollback))
            .await?;
        let xcall = self.get_contract_address(XCALL)?;
        let sn = extract_sn(
            self.info.nid.as_str(),
            &result.tx_hash,
            result
                .event_logs
                .iter()
                .filter(|log| log.score_address == xcall)
                .filter_map(decode_log),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: result.tx_hash,
            height: result.block_height,
            source: self.info.nid.clone(),
        })
    }

    async fn execute_call(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        req_id: RequestId,
        data: &Payload,
    ) -> Result<TxOutcome> {
        let xcall = self.get_contract_address(XCALL)?;
        let result = self
            .submit(ctx, signer, execute_call_call(&xcall, req_id, data))
            .await?;
        Ok(TxOutcome {
            tx_id: result.tx_hash,
            height: result.block_height,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let xcall = self.get_contract_address(XCALL)?;
        let result = self
            .submit(ctx, signer, execute_rollback_call(&xcall, sn))
            .await?;
        Ok(TxOutcome {
            tx_id: result.tx_hash,
            height: result.block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_call_message_layout() {
        let event = XCallEvent::CallMessage {
            from: Some("0x2.evm/0xdapp".into()),
            to: Some("cxdapp".into()),
            sn: SerialNo::from_u64(31),
            req_id: RequestId::from_u64(2),
            data: Payload::from("hi"),
        };
        let log = encode_event(&event, "cxcall");
        assert_eq!(log.indexed[0], "CallMessage(str,str,int,int,bytes)");
        assert_eq!(log.indexed[3], "0x1f");
        assert_eq!(log.data, vec!["0x2".to_string(), "0x6869".to_string()]);
        assert_eq!(decode_log(&log).unwrap().unwrap(), event);
    }

    #[test]
    fn test_negative_code() {
        let log = IconEventLog {
            score_address: "cxcall".into(),
            indexed: vec!["ResponseMessage(int,int)".into(), "0x5".into()],
            data: vec!["-0x1".into()],
        };
        assert_eq!(
            decode_log(&log).unwrap().unwrap(),
            XCallEvent::ResponseMessage {
                sn: SerialNo::from_u64(5),
                code: ResponseCode(-1),
            }
        );
    }

    #[test]
    fn test_short_log_is_decode_failure() {
        let log = IconEventLog {
            score_address: "cxcall".into(),
            indexed: vec!["CallMessage(str,str,int,int,bytes)".into()],
            data: vec![],
        };
        assert!(decode_log(&log).unwrap().is_err());
    }

    #[test]
    fn test_send_message_params() {
        let to = NetworkAddress::parse("0x2.evm/0xdapp").unwrap();
        let call = send_message_call("cxdapp", &to, &Payload::from("hi"), Some(&Payload::from("rb")));
        assert_eq!(call.method, "sendMessage");
        assert_eq!(call.params["_data"], "0x6869");
        assert_eq!(call.params["_rollback"], "0x7262");

        let call = send_message_call("cxdapp", &to, &Payload::from("hi"), None);
        assert!(!call.params.contains_key("_rollback"));
    }

    proptest! {
        #[test]
        fn prop_int_format_parses_back(v in any::<i64>().prop_filter("min has no magnitude", |v| *v != i64::MIN)) {
            prop_assert_eq!(parse_int(&format_int(v)).unwrap(), v);
        }
    }
}
