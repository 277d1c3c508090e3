//! # Sui Adapter
//!
//! Move xCall packages over a [`SuiLedger`]. Heights are checkpoint
//! sequence numbers; events are `<package>::main::<Name>` with a
//! `parsedJson` body.

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
use crate::ports::ledgers::{MoveCall, SuiEvent, SuiLedger, SuiTransactionBlock};
use crate::ports::XCallChain;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Module of the xCall package that emits events and takes executions.
pub const XCALL_MODULE: &str = "main";

/// Module of the test dapp package.
pub const DAPP_MODULE: &str = "mock_dapp";

/// Shared xCall storage object, passed first to xCall entry functions.
pub const XCALL_STORAGE: &str = "xcall-storage";

/// Shared dapp state object, passed first to the dapp's send entry.
pub const DAPP_STATE: &str = "dapp-state";

/// Events requested per `suix_queryEvents` call.
const EVENT_PAGE: usize = 1000;

/// Status reported for executed transactions.
pub const SUCCESS: &str = "success";

/// Fully qualified event type for `kind` in `package`.
pub fn event_type(package: &str, kind: EventKind) -> String {
    format!("{}::{}::{}", package, XCALL_MODULE, kind.signature())
}

fn kind_of(event_type: &str) -> Option<EventKind> {
    let mut parts = event_type.rsplitn(3, "::");
    let name = parts.next()?;
    let module = parts.next()?;
    if module != XCALL_MODULE {
        return None;
    }
    EventKind::from_signature(name)
}

struct Fields<'a> {
    name: &'static str,
    body: &'a Value,
}

impl Fields<'_> {
    fn any(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.body.get(*k)).filter(|v| !v.is_null())
    }

    fn require(&self, keys: &[&str]) -> std::result::Result<&Value, String> {
        self.any(keys)
            .ok_or_else(|| format!("{} missing field {}", self.name, keys[0]))
    }

    fn counter(&self, keys: &[&str]) -> std::result::Result<primitive_types::U256, String> {
        match self.require(keys)? {
            Value::String(s) => SerialNo::from_dec_str(s).map(|v| v.0).map_err(|e| e.to_string()),
            Value::Number(n) => n
                .as_u64()
                .map(primitive_types::U256::from)
                .ok_or_else(|| format!("{} field {} is not unsigned", self.name, keys[0])),
            other => Err(format!("{} field {} has type {}", self.name, keys[0], other)),
        }
    }

    fn sn(&self) -> std::result::Result<SerialNo, String> {
        self.counter(&["sn"]).map(SerialNo)
    }

    fn req_id(&self) -> std::result::Result<RequestId, String> {
        self.counter(&["req_id", "reqId"]).map(RequestId)
    }

    fn code(&self, keys: &[&str]) -> std::result::Result<ResponseCode, String> {
        let parsed = match self.require(keys)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        };
        parsed
            .map(ResponseCode)
            .ok_or_else(|| format!("{} field {} is not an int", self.name, keys[0]))
    }

    fn address(&self, key: &str) -> Option<String> {
        match self.any(&[key])? {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => {
                let nid = obj.get("net_id")?.as_str()?;
                let addr = obj.get("addr")?.as_str()?;
                Some(format!("{}/{}", nid, addr))
            }
            _ => None,
        }
    }

    fn data(&self) -> std::result::Result<Payload, String> {
        match self.require(&["data"])? {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| format!("{} data holds non-byte {}", self.name, v))
                })
                .collect::<std::result::Result<Vec<u8>, String>>()
                .map(Payload),
            Value::String(s) => Payload::from_hex(s).map_err(|e| e.to_string()),
            other => Err(format!("{} data has type {}", self.name, other)),
        }
    }
}

fn decode_fields(kind: EventKind, f: &Fields<'_>) -> Decoded {
    Ok(match kind {
        EventKind::CallMessageSent => XCallEvent::CallMessageSent {
            from: f.address("from"),
            to: f.address("to"),
            sn: f.sn()?,
        },
        EventKind::CallMessage => XCallEvent::CallMessage {
            from: f.address("from"),
            to: f.address("to"),
            sn: f.sn()?,
            req_id: f.req_id()?,
            data: f.data()?,
        },
        EventKind::ResponseMessage => XCallEvent::ResponseMessage {
            sn: f.sn()?,
            code: f.code(&["response_code", "code"])?,
        },
        EventKind::RollbackMessage => XCallEvent::RollbackMessage { sn: f.sn()? },
        EventKind::RollbackExecuted => XCallEvent::RollbackExecuted { sn: f.sn()? },
        EventKind::CallExecuted => XCallEvent::CallExecuted {
            req_id: f.req_id()?,
            code: f.code(&["code", "response_code"])?,
            msg: f
                .any(&["err_msg", "msg"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
    })
}

/// Decode one Move event. `None` for events outside the xCall module.
pub fn decode_event(event: &SuiEvent) -> Option<Decoded> {
    let kind = kind_of(&event.event_type)?;
    Some(decode_fields(
        kind,
        &Fields {
            name: kind.signature(),
            body: &event.parsed_json,
        },
    ))
}

fn address_json(address: &Option<String>) -> Value {
    match address.as_deref().and_then(|a| a.split_once('/')) {
        Some((nid, addr)) => json!({ "net_id": nid, "addr": addr }),
        None => json!(address.clone().unwrap_or_default()),
    }
}

/// Render a logical event as the Move package emits it.
pub fn encode_event(
    event: &XCallEvent,
    package: &str,
    tx_digest: &str,
    checkpoint: u64,
) -> SuiEvent {
    let parsed_json = match event {
        XCallEvent::CallMessageSent { from, to, sn } => json!({
            "from": address_json(from),
            "to": to.clone().unwrap_or_default(),
            "sn": sn.to_string(),
        }),
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => json!({
            "from": address_json(from),
            "to": to.clone().unwrap_or_default(),
            "sn": sn.to_string(),
            "req_id": req_id.to_string(),
            "data": data.as_bytes(),
        }),
        XCallEvent::ResponseMessage { sn, code } => json!({
            "sn": sn.to_string(),
            "response_code": code.0,
        }),
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            json!({ "sn": sn.to_string() })
        }
        XCallEvent::CallExecuted { req_id, code, msg } => json!({
            "req_id": req_id.to_string(),
            "code": code.0,
            "err_msg": msg,
        }),
    };
    SuiEvent {
        event_type: event_type(package, event.kind()),
        tx_digest: tx_digest.to_string(),
        event_seq: 0,
        checkpoint: Some(checkpoint),
        parsed_json,
    }
}

fn with_object(object: Option<String>, mut args: Vec<Value>) -> Vec<Value> {
    if let Some(id) = object {
        args.insert(0, json!(id));
    }
    args
}

/// Dapp `send_message(to, data, rollback)`; an empty rollback vector means
/// none.
pub fn send_message_call(
    package: &str,
    state: Option<String>,
    to: &NetworkAddress,
    data: &Payload,
    rollback: Option<&Payload>,
) -> MoveCall {
    let rollback = rollback.map(|r| r.as_bytes().to_vec()).unwrap_or_default();
    MoveCall {
        package: package.to_string(),
        module: DAPP_MODULE.into(),
        function: "send_message".into(),
        arguments: with_object(
            state,
            vec![json!(to.to_string()), json!(data.as_bytes()), json!(rollback)],
        ),
    }
}

/// xCall `execute_call(req_id, data)`.
pub fn execute_call_call(
    package: &str,
    storage: Option<String>,
    req_id: RequestId,
    data: &Payload,
) -> MoveCall {
    MoveCall {
        package: package.to_string(),
        module: XCALL_MODULE.into(),
        function: "execute_call".into(),
        arguments: with_object(storage, vec![json!(req_id.to_string()), json!(data.as_bytes())]),
    }
}

/// xCall `execute_rollback(sn)`.
pub fn execute_rollback_call(package: &str, storage: Option<String>, sn: SerialNo) -> MoveCall {
    MoveCall {
        package: package.to_string(),
        module: XCALL_MODULE.into(),
        function: "execute_rollback".into(),
        arguments: with_object(storage, vec![json!(sn.to_string())]),
    }
}

/// Abort code from a `MoveAbort(<location>, <code>)` failure.
fn move_abort_code(error: &str) -> i64 {
    error
        .find("MoveAbort")
        .map(|i| &error[i..])
        .and_then(|rest| rest.rsplit_once("}, "))
        .and_then(|(_, tail)| {
            let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .unwrap_or(0)
}

fn observe(event: &SuiEvent, height: u64) -> Option<DecodedEvent> {
    decode_event(event).map(|decoded| match decoded {
        Ok(decoded) => Ok(ObservedEvent {
            height,
            tx_id: event.tx_digest.clone(),
            event: decoded,
        }),
        Err(reason) => Err(DecodeFailure {
            height,
            tx_id: event.tx_digest.clone(),
            reason,
        }),
    })
}

/// [`PollSource`] over `suix_queryEvents`.
pub struct SuiEventSource<L> {
    chain: String,
    ledger: Arc<L>,
    page: usize,
}

#[async_trait]
impl<L: SuiLedger> PollSource for SuiEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.latest_checkpoint().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        // Newest first; stop at the first page reaching below the window.
        let wanted = event_type(&query.contract, query.kind);
        let mut events = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .ledger
                .query_events(&wanted, cursor, self.page)
                .await?;
            let below = page.iter().any(|e| e.checkpoint.is_some_and(|h| h < from));
            cursor = page.last().map(SuiEvent::id);
            let full = page.len() == self.page;
            events.extend(
                page.into_iter()
                    .filter(|e| e.checkpoint.is_some_and(|h| h >= from && h <= to)),
            );
            if below || !full {
                break;
            }
        }
        events.reverse();
        events.sort_by_key(|e| e.checkpoint);
        Ok(events
            .iter()
            .filter_map(|e| observe(e, e.checkpoint?))
            .collect())
    }
}

/// Sui chain adapter.
pub struct SuiChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<SuiEventSource<L>>,
}

impl<L: SuiLedger> SuiChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = SuiEventSource {
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

    fn optional_contract(&self, name: &str) -> Option<String> {
        self.info.contracts.get(name).ok().map(str::to_string)
    }

    async fn submit(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        call: MoveCall,
    ) -> Result<(SuiTransactionBlock, u64)> {
        let chain = self.info.nid.as_str();
        let digest = self.ledger.execute_move_call(signer, call).await?;
        debug!(chain, tx = %digest, "Submitted Move call");
        let block = await_inclusion(ctx, chain, &digest, self.settings.poll_interval, || async {
            let block = self.ledger.transaction_block(&digest).await?;
            Ok::<_, XCallError>(block.and_then(|b| b.checkpoint.map(|cp| (b, cp))))
        })
        .await?;
        if block.0.status != SUCCESS {
            let log = block.0.error.clone().unwrap_or_else(|| block.0.status.clone());
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: move_abort_code(&log),
                log,
            });
        }
        Ok(block)
    }
}

#[async_trait]
impl<L: SuiLedger + 'static> XCallChain for SuiChain<L> {
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
        self.ledger.latest_checkpoint().await
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
        let call = send_message_call(
            &dapp,
            self.optional_contract(DAPP_STATE),
            destination,
            data,
            rollback,
        );
        let (block, checkpoint) = self.submit(ctx, signer, call).await?;
        let xcall = self.get_contract_address(XCALL)?;
        let prefix = format!("{}::", xcall);
        let sn = extract_sn(
            self.info.nid.as_str(),
            &block.digest,
            block
                .events
                .iter()
                .filter(|e| e.event_type.starts_with(&prefix))
                .filter_map(decode_event),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: block.digest,
            height: checkpoint,
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
        let call = execute_call_call(&xcall, self.optional_contract(XCALL_STORAGE), req_id, data);
        let (block, checkpoint) = self.submit(ctx, signer, call).await?;
        Ok(TxOutcome {
            tx_id: block.digest,
            height: checkpoint,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let xcall = self.get_contract_address(XCALL)?;
        let call = execute_rollback_call(&xcall, self.optional_contract(XCALL_STORAGE), sn);
        let (block, checkpoint) = self.submit(ctx, signer, call).await?;
        Ok(TxOutcome {
            tx_id: block.digest,
            height: checkpoint,
        })
    }
}
