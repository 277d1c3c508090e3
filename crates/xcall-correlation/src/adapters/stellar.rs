//! # Stellar Adapter
//!
//! Soroban xCall over a [`StellarLedger`]. Events carry a single
//! `Symbol(<Name>)` topic and an `ScVal::Map` value, both as base64 XDR.

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
use crate::ports::ledgers::{EventsStart, SorobanEvent, SorobanInvocation, SorobanTransaction, StellarLedger};
use crate::ports::XCallChain;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use stellar_xdr::curr::{
    BytesM, Limits, ReadXdr, ScBytes, ScMap, ScMapEntry, ScString, ScSymbol, ScVal, StringM,
    UInt128Parts, VecM, WriteXdr,
};
use std::sync::Arc;
use tracing::debug;

/// Events requested per `getEvents` call.
const EVENT_PAGE: usize = 1000;

/// Transaction status reported for successful transactions.
pub const SUCCESS: &str = "SUCCESS";

type Conv<T> = std::result::Result<T, String>;

fn xdr_err(e: stellar_xdr::curr::Error) -> String {
    e.to_string()
}

/// `ScVal::Symbol`.
pub fn symbol(name: &str) -> Conv<ScVal> {
    Ok(ScVal::Symbol(ScSymbol(StringM::try_from(name).map_err(xdr_err)?)))
}

/// `ScVal::String`.
pub fn string(text: &str) -> Conv<ScVal> {
    Ok(ScVal::String(ScString(StringM::try_from(text).map_err(xdr_err)?)))
}

/// `ScVal::Bytes`.
pub fn bytes(data: &[u8]) -> Conv<ScVal> {
    Ok(ScVal::Bytes(ScBytes(BytesM::try_from(data.to_vec()).map_err(xdr_err)?)))
}

/// `ScVal::U128` from a counter, failing above `u128`.
pub fn u128_val(value: primitive_types::U256) -> Conv<ScVal> {
    if value.bits() > 128 {
        return Err(format!("{} exceeds u128", value));
    }
    let n = value.low_u128();
    Ok(ScVal::U128(UInt128Parts {
        hi: (n >> 64) as u64,
        lo: n as u64,
    }))
}

fn as_u128(val: &ScVal) -> Option<u128> {
    match val {
        ScVal::U128(parts) => Some((u128::from(parts.hi) << 64) | u128::from(parts.lo)),
        ScVal::U64(v) => Some(u128::from(*v)),
        ScVal::U32(v) => Some(u128::from(*v)),
        _ => None,
    }
}

fn as_i64(val: &ScVal) -> Option<i64> {
    match val {
        ScVal::I32(v) => Some(i64::from(*v)),
        ScVal::U32(v) => Some(i64::from(*v)),
        ScVal::I64(v) => Some(*v),
        ScVal::U64(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn as_text(val: &ScVal) -> Option<String> {
    let raw: &[u8] = match val {
        ScVal::String(s) => s.0.as_ref(),
        ScVal::Symbol(s) => s.0.as_ref(),
        _ => return None,
    };
    String::from_utf8(raw.to_vec()).ok()
}

fn as_bytes(val: &ScVal) -> Option<Vec<u8>> {
    match val {
        ScVal::Bytes(b) => {
            let raw: &[u8] = b.0.as_ref();
            Some(raw.to_vec())
        }
        _ => None,
    }
}

/// Base64 XDR of an `ScVal`.
pub fn to_base64(val: &ScVal) -> Conv<String> {
    let raw = val.to_xdr(Limits::none()).map_err(xdr_err)?;
    Ok(general_purpose::STANDARD.encode(raw))
}

/// `ScVal` from base64 XDR.
pub fn from_base64(text: &str) -> Conv<ScVal> {
    let raw = general_purpose::STANDARD
        .decode(text)
        .map_err(|e| format!("base64: {}", e))?;
    ScVal::from_xdr(raw, Limits::none()).map_err(xdr_err)
}

struct Fields {
    name: &'static str,
    entries: Vec<(String, ScVal)>,
}

impl Fields {
    fn get(&self, key: &str) -> Conv<&ScVal> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| format!("{} missing field {}", self.name, key))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).ok().and_then(as_text)
    }

    fn u128(&self, key: &str) -> Conv<u128> {
        as_u128(self.get(key)?).ok_or_else(|| format!("{} field {} is not an unsigned int", self.name, key))
    }

    fn code(&self, key: &str) -> Conv<ResponseCode> {
        as_i64(self.get(key)?)
            .map(ResponseCode)
            .ok_or_else(|| format!("{} field {} is not an int", self.name, key))
    }
}

fn decode_fields(kind: EventKind, f: &Fields) -> Decoded {
    Ok(match kind {
        EventKind::CallMessageSent => XCallEvent::CallMessageSent {
            from: f.text("from"),
            to: f.text("to"),
            sn: SerialNo::from_u128(f.u128("sn")?),
        },
        EventKind::CallMessage => XCallEvent::CallMessage {
            from: f.text("from"),
            to: f.text("to"),
            sn: SerialNo::from_u128(f.u128("sn")?),
            req_id: RequestId::from_u128(f.u128("reqId")?),
            data: Payload(
                as_bytes(f.get("data")?).ok_or_else(|| "CallMessage data is not bytes".to_string())?,
            ),
        },
        EventKind::ResponseMessage => XCallEvent::ResponseMessage {
            sn: SerialNo::from_u128(f.u128("sn")?),
            code: f.code("code")?,
        },
        EventKind::RollbackMessage => XCallEvent::RollbackMessage {
            sn: SerialNo::from_u128(f.u128("sn")?),
        },
        EventKind::RollbackExecuted => XCallEvent::RollbackExecuted {
            sn: SerialNo::from_u128(f.u128("sn")?),
        },
        EventKind::CallExecuted => XCallEvent::CallExecuted {
            req_id: RequestId::from_u128(f.u128("reqId")?),
            code: f.code("code")?,
            msg: f.text("msg").unwrap_or_default(),
        },
    })
}

/// Decode one contract event. `None` for events that are not xCall events.
pub fn decode_event(event: &SorobanEvent) -> Option<Decoded> {
    let topic = from_base64(event.topic.first()?).ok()?;
    let kind = EventKind::from_signature(&as_text(&topic)?)?;

    let value = match from_base64(&event.value) {
        Ok(value) => value,
        Err(reason) => return Some(Err(reason)),
    };
    let entries = match value {
        ScVal::Map(Some(map)) => map
            .0
            .iter()
            .filter_map(|entry| as_text(&entry.key).map(|k| (k, entry.val.clone())))
            .collect(),
        other => return Some(Err(format!("{} value is not a map: {:?}", kind, other))),
    };
    Some(decode_fields(
        kind,
        &Fields {
            name: kind.signature(),
            entries,
        },
    ))
}

/// Render a logical event as the Soroban xCall contract publishes it.
pub fn encode_event(
    event: &XCallEvent,
    contract: &str,
    ledger: u64,
    tx_hash: &str,
) -> Conv<SorobanEvent> {
    let opt_text = |s: &Option<String>| string(s.as_deref().unwrap_or_default());
    let fields: Vec<(&str, ScVal)> = match event {
        XCallEvent::CallMessageSent { from, to, sn } => vec![
            ("from", opt_text(from)?),
            ("sn", u128_val(sn.0)?),
            ("to", opt_text(to)?),
        ],
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => vec![
            ("data", bytes(data.as_bytes())?),
            ("from", opt_text(from)?),
            ("reqId", u128_val(req_id.0)?),
            ("sn", u128_val(sn.0)?),
            ("to", opt_text(to)?),
        ],
        XCallEvent::ResponseMessage { sn, code } => {
            vec![("code", ScVal::I64(code.0)), ("sn", u128_val(sn.0)?)]
        }
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            vec![("sn", u128_val(sn.0)?)]
        }
        XCallEvent::CallExecuted { req_id, code, msg } => vec![
            ("code", ScVal::I64(code.0)),
            ("msg", string(msg)?),
            ("reqId", u128_val(req_id.0)?),
        ],
    };

    let mut entries = Vec::with_capacity(fields.len());
    for (key, val) in fields {
        entries.push(ScMapEntry {
            key: symbol(key)?,
            val,
        });
    }
    let map = ScVal::Map(Some(ScMap(VecM::try_from(entries).map_err(xdr_err)?)));

    Ok(SorobanEvent {
        id: String::new(),
        ledger,
        tx_hash: tx_hash.to_string(),
        contract_id: contract.to_string(),
        topic: vec![to_base64(&symbol(event.kind().signature())?)?],
        value: to_base64(&map)?,
    })
}

/// Dapp `send_call_message(to, data, rollback)` invocation.
pub fn send_call_message_invocation(
    dapp: &str,
    to: &NetworkAddress,
    data: &Payload,
    rollback: Option<&Payload>,
) -> Result<SorobanInvocation> {
    let rollback = match rollback {
        Some(r) => bytes(r.as_bytes()),
        None => Ok(ScVal::Void),
    };
    let args = vec![string(&to.to_string()), bytes(data.as_bytes()), rollback]
        .into_iter()
        .collect::<Conv<Vec<_>>>()
        .map_err(XCallError::InvalidValue)?;
    Ok(SorobanInvocation {
        contract_id: dapp.to_string(),
        function: "send_call_message".into(),
        args,
    })
}

/// xCall `execute_call(req_id, data)` invocation.
pub fn execute_call_invocation(
    xcall: &str,
    req_id: RequestId,
    data: &Payload,
) -> Result<SorobanInvocation> {
    let args = vec![u128_val(req_id.0), bytes(data.as_bytes())]
        .into_iter()
        .collect::<Conv<Vec<_>>>()
        .map_err(XCallError::InvalidValue)?;
    Ok(SorobanInvocation {
        contract_id: xcall.to_string(),
        function: "execute_call".into(),
        args,
    })
}

/// xCall `execute_rollback(sn)` invocation.
pub fn execute_rollback_invocation(xcall: &str, sn: SerialNo) -> Result<SorobanInvocation> {
    Ok(SorobanInvocation {
        contract_id: xcall.to_string(),
        function: "execute_rollback".into(),
        args: vec![u128_val(sn.0).map_err(XCallError::InvalidValue)?],
    })
}

/// Unsigned argument of an invocation, if it is an integer.
pub fn arg_u128(val: &ScVal) -> Option<u128> {
    as_u128(val)
}

/// Text argument of an invocation.
pub fn arg_text(val: &ScVal) -> Option<String> {
    as_text(val)
}

/// Bytes argument of an invocation; `Void` reads as `None`.
pub fn arg_bytes(val: &ScVal) -> Option<Vec<u8>> {
    as_bytes(val)
}

/// Contract error number in `Error(Contract, #N)`.
fn contract_error_code(error: &str) -> i64 {
    error
        .split("Error(Contract, #")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

fn observe(event: &SorobanEvent) -> Option<DecodedEvent> {
    decode_event(event).map(|decoded| match decoded {
        Ok(decoded) => Ok(ObservedEvent {
            height: event.ledger,
            tx_id: event.tx_hash.clone(),
            event: decoded,
        }),
        Err(reason) => Err(DecodeFailure {
            height: event.ledger,
            tx_id: event.tx_hash.clone(),
            reason,
        }),
    })
}

/// [`PollSource`] over `getEvents`.
pub struct StellarEventSource<L> {
    chain: String,
    ledger: Arc<L>,
    page: usize,
}

#[async_trait]
impl<L: StellarLedger> PollSource for StellarEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.latest_ledger().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        let wanted = symbol(query.kind.signature())
            .and_then(|s| to_base64(&s))
            .map_err(|e| XCallError::decode(&self.chain, query.kind.signature(), e))?;

        let mut decoded = Vec::new();
        let mut start = EventsStart::Ledger(from);
        loop {
            let page = self
                .ledger
                .get_events(&query.contract, start, self.page)
                .await?;
            let last = match page.last() {
                Some(last) if page.len() == self.page && last.ledger <= to => Some(last.id.clone()),
                _ => None,
            };
            decoded.extend(
                page.iter()
                    .filter(|e| e.contract_id == query.contract && e.ledger >= from && e.ledger <= to)
                    .filter(|e| e.topic.first() == Some(&wanted))
                    .filter_map(observe),
            );
            match last {
                Some(id) => start = EventsStart::After(id),
                None => return Ok(decoded),
            }
        }
    }
}

/// Stellar chain adapter.
pub struct StellarChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<StellarEventSource<L>>,
}

impl<L: StellarLedger> StellarChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = StellarEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::clone(&ledger),
            page: EVENT_PAGE,
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
        call: SorobanInvocation,
    ) -> Result<SorobanTransaction> {
        let chain = self.info.nid.as_str();
        let hash = self.ledger.invoke(signer, call).await?;
        debug!(chain, tx = %hash, "Submitted invocation");
        let tx = await_inclusion(ctx, chain, &hash, self.settings.poll_interval, || {
            self.ledger.transaction(&hash)
        })
        .await?;
        if tx.status != SUCCESS {
            let log = tx.error.clone().unwrap_or_else(|| tx.status.clone());
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: contract_error_code(&log),
                log,
            });
        }
        Ok(tx)
    }
}

#[async_trait]
impl<L: StellarLedger + 'static> XCallChain for StellarChain<L> {
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
        self.ledger.latest_ledger().await
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
        let call = send_call_message_invocation(&dapp, destination, data, rollback)?;
        let tx = self.submit(ctx, signer, call).await?;
        let xcall = self.get_contract_address(XCALL)?;
        let sn = extract_sn(
            self.info.nid.as_str(),
            &tx.hash,
            tx.events
                .iter()
                .filter(|e| e.contract_id == xcall)
                .filter_map(decode_event),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: tx.hash,
            height: tx.ledger,
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
        let tx = self
            .submit(ctx, signer, execute_call_invocation(&xcall, req_id, data)?)
            .await?;
        Ok(TxOutcome {
            tx_id: tx.hash,
            height: tx.ledger,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let xcall = self.get_contract_address(XCALL)?;
        let tx = self
            .submit(ctx, signer, execute_rollback_invocation(&xcall, sn)?)
            .await?;
        Ok(TxOutcome {
            tx_id: tx.hash,
            height: tx.ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_message_event_xdr() {
        let event = XCallEvent::CallMessage {
            from: Some("0x2.icon/cxdapp".into()),
            to: Some("CDAPP".into()),
            sn: SerialNo::from_u64(3),
            req_id: RequestId::from_u128(u128::from(u64::MAX) + 1),
            data: Payload::from("hello"),
        };
        let native = encode_event(&event, "CXCALL", 50, "ab12").unwrap();
        assert_eq!(from_base64(&native.topic[0]).unwrap(), symbol("CallMessage").unwrap());
        assert_eq!(decode_event(&native).unwrap().unwrap(), event);
    }

    #[test]
    fn test_non_map_value_is_decode_failure() {
        let event = SorobanEvent {
            id: String::new(),
            ledger: 1,
            tx_hash: "ab".into(),
            contract_id: "CXCALL".into(),
            topic: vec![to_base64(&symbol("RollbackMessage").unwrap()).unwrap()],
            value: to_base64(&ScVal::U32(5)).unwrap(),
        };
        assert!(decode_event(&event).unwrap().is_err());
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let event = SorobanEvent {
            id: String::new(),
            ledger: 1,
            tx_hash: "ab".into(),
            contract_id: "CXCALL".into(),
            topic: vec![to_base64(&symbol("transfer").unwrap()).unwrap()],
            value: to_base64(&ScVal::Void).unwrap(),
        };
        assert!(decode_event(&event).is_none());
    }

    #[test]
    fn test_send_invocation_args() {
        let to = NetworkAddress::parse("0x2.icon/cxdapp").unwrap();
        let call = send_call_message_invocation("CDAPP", &to, &Payload::from("hi"), None).unwrap();
        assert_eq!(call.function, "send_call_message");
        assert_eq!(arg_text(&call.args[0]).as_deref(), Some("0x2.icon/cxdapp"));
        assert_eq!(arg_bytes(&call.args[1]), Some(b"hi".to_vec()));
        assert_eq!(call.args[2], ScVal::Void);
    }

    #[test]
    fn test_contract_error_code() {
        assert_eq!(contract_error_code("HostError: Error(Contract, #11)"), 11);
        assert_eq!(contract_error_code("txBadSeq"), 0);
    }

    #[test]
    fn test_u128_overflow_is_rejected() {
        let big = primitive_types::U256::from(u128::MAX) + 1;
        assert!(u128_val(big).is_err());
    }

    #[tokio::test]
    async fn test_fetch_follows_cursor_across_pages() {
        use crate::domain::{ChainKind, EventMatcher};
        use crate::testkit::{SimNetwork, SimStellar};

        let net = SimNetwork::new();
        let info = net.add_chain(ChainKind::Stellar, "stellar");
        let mut heights = Vec::new();
        for sn in 1..=5 {
            let sn = SerialNo::from_u64(sn);
            heights.push(
                net.inject_event(&info.nid, XCallEvent::RollbackExecuted { sn })
                    .unwrap()
                    .height,
            );
            net.inject_event(&info.nid, XCallEvent::RollbackMessage { sn }).unwrap();
        }
        let source = StellarEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::new(SimStellar::new(net.clone(), &info.nid).unwrap()),
            page: 2,
        };
        let query = EventQuery::new(
            EventKind::RollbackExecuted,
            info.contracts.get(XCALL).unwrap(),
            heights[0],
            EventMatcher::by_sn(SerialNo::from_u64(4)),
        );

        let found: Vec<_> = source
            .fetch(&query, heights[1], heights[3])
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap().event.sn().unwrap())
            .collect();
        assert_eq!(found, (2..=4).map(SerialNo::from_u64).collect::<Vec<_>>());
    }
}
