//! # Stacks Adapter
//!
//! Clarity xCall contracts over a [`StacksLedger`]. Events are `print`ed
//! tuples carrying an `event` name; arguments and results travel as
//! Clarity value reprs (see [`ClarityValue`]).

use super::clarity::ClarityValue;
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
use crate::ports::ledgers::{ClarityCall, StacksContractEvent, StacksLedger, StacksTransaction};
use crate::ports::XCallChain;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Contract log events requested per page.
const EVENT_PAGE: usize = 50;

/// Status of a transaction that has not been mined.
pub const PENDING: &str = "pending";

/// Status of a successful transaction.
pub const SUCCESS: &str = "success";

fn narrow(value: primitive_types::U256, what: &str) -> Result<u128> {
    if value.bits() > 128 {
        return Err(XCallError::InvalidValue(format!("{} {} exceeds u128", what, value)));
    }
    Ok(value.low_u128())
}

fn decode_tuple(kind: EventKind, tuple: &ClarityValue) -> Decoded {
    let name = kind.signature();
    let text = |key: &str| tuple.field(key).and_then(ClarityValue::as_str).map(str::to_string);
    let uint = |key: &str| {
        tuple
            .field(key)
            .and_then(ClarityValue::as_u128)
            .ok_or_else(|| format!("{} missing unsigned field {}", name, key))
    };
    let code = || {
        tuple
            .field("code")
            .and_then(ClarityValue::as_i64)
            .map(ResponseCode)
            .ok_or_else(|| format!("{} missing int field code", name))
    };

    Ok(match kind {
        EventKind::CallMessageSent => XCallEvent::CallMessageSent {
            from: text("from"),
            to: text("to"),
            sn: SerialNo::from_u128(uint("sn")?),
        },
        EventKind::CallMessage => XCallEvent::CallMessage {
            from: text("from"),
            to: text("to"),
            sn: SerialNo::from_u128(uint("sn")?),
            req_id: RequestId::from_u128(uint("req-id")?),
            data: tuple
                .field("data")
                .and_then(ClarityValue::as_buff)
                .map(|b| Payload(b.to_vec()))
                .ok_or_else(|| format!("{} missing buff field data", name))?,
        },
        EventKind::ResponseMessage => XCallEvent::ResponseMessage {
            sn: SerialNo::from_u128(uint("sn")?),
            code: code()?,
        },
        EventKind::RollbackMessage => XCallEvent::RollbackMessage {
            sn: SerialNo::from_u128(uint("sn")?),
        },
        EventKind::RollbackExecuted => XCallEvent::RollbackExecuted {
            sn: SerialNo::from_u128(uint("sn")?),
        },
        EventKind::CallExecuted => XCallEvent::CallExecuted {
            req_id: RequestId::from_u128(uint("req-id")?),
            code: code()?,
            msg: text("msg").unwrap_or_default(),
        },
    })
}

/// Decode one contract log. `None` for logs that are not xCall events.
///
/// Reprs that do not parse at all are skipped; a tuple naming an xCall
/// event with bad fields is a decode failure.
pub fn decode_event(repr: &str) -> Option<Decoded> {
    let (kind, tuple) = named_tuple(repr)?;
    Some(decode_tuple(kind, &tuple))
}

fn named_tuple(repr: &str) -> Option<(EventKind, ClarityValue)> {
    let tuple = ClarityValue::parse(repr).ok()?;
    let kind = EventKind::from_signature(tuple.field("event")?.as_str()?)?;
    Some((kind, tuple))
}

/// Logical kind named by a contract log, without decoding its fields.
pub fn event_kind(repr: &str) -> Option<EventKind> {
    named_tuple(repr).map(|(kind, _)| kind)
}

/// Render a logical event as the contract `print`s it.
pub fn encode_event(event: &XCallEvent) -> String {
    let text = |s: &Option<String>| ClarityValue::Str(s.clone().unwrap_or_default());
    let uint = |v: primitive_types::U256| ClarityValue::UInt(v.low_u128());
    let mut fields = vec![("event", ClarityValue::Str(event.kind().signature().into()))];
    match event {
        XCallEvent::CallMessageSent { from, to, sn } => {
            fields.push(("from", text(from)));
            fields.push(("to", text(to)));
            fields.push(("sn", uint(sn.0)));
        }
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => {
            fields.push(("from", text(from)));
            fields.push(("to", text(to)));
            fields.push(("sn", uint(sn.0)));
            fields.push(("req-id", uint(req_id.0)));
            fields.push(("data", ClarityValue::Buff(data.0.clone())));
        }
        XCallEvent::ResponseMessage { sn, code } => {
            fields.push(("sn", uint(sn.0)));
            fields.push(("code", ClarityValue::Int(i128::from(code.0))));
        }
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            fields.push(("sn", uint(sn.0)));
        }
        XCallEvent::CallExecuted { req_id, code, msg } => {
            fields.push(("req-id", uint(req_id.0)));
            fields.push(("code", ClarityValue::Int(i128::from(code.0))));
            fields.push(("msg", ClarityValue::Str(msg.clone())));
        }
    }
    ClarityValue::tuple(fields).to_string()
}

/// Dapp `send-message(to, data, rollback)`.
pub fn send_message_call(
    dapp: &str,
    to: &NetworkAddress,
    data: &Payload,
    rollback: Option<&Payload>,
) -> ClarityCall {
    let rollback = match rollback {
        Some(r) => ClarityValue::Some(Box::new(ClarityValue::Buff(r.0.clone()))),
        None => ClarityValue::None,
    };
    ClarityCall {
        contract_id: dapp.to_string(),
        function: "send-message".into(),
        args: vec![
            ClarityValue::Str(to.to_string()).to_string(),
            ClarityValue::Buff(data.0.clone()).to_string(),
            rollback.to_string(),
        ],
    }
}

/// xCall `execute-call(req-id, data)`.
pub fn execute_call_call(xcall: &str, req_id: RequestId, data: &Payload) -> Result<ClarityCall> {
    Ok(ClarityCall {
        contract_id: xcall.to_string(),
        function: "execute-call".into(),
        args: vec![
            ClarityValue::UInt(narrow(req_id.0, "request id")?).to_string(),
            ClarityValue::Buff(data.0.clone()).to_string(),
        ],
    })
}

/// xCall `execute-rollback(sn)`.
pub fn execute_rollback_call(xcall: &str, sn: SerialNo) -> Result<ClarityCall> {
    Ok(ClarityCall {
        contract_id: xcall.to_string(),
        function: "execute-rollback".into(),
        args: vec![ClarityValue::UInt(narrow(sn.0, "serial number")?).to_string()],
    })
}

/// Error code of an `(err uN)` result; 0 for anything else.
fn result_error_code(repr: &str) -> i64 {
    match ClarityValue::parse(repr) {
        Ok(ClarityValue::Err(inner)) => inner.as_i64().unwrap_or(0),
        _ => 0,
    }
}

/// Logs of `contract` with heights in `[from, to]`, oldest first.
///
/// Pages arrive newest first, so scanning stops at the first page that
/// reaches below `from`.
async fn scan_events<L: StacksLedger + ?Sized>(
    ledger: &L,
    contract: &str,
    from: u64,
    to: u64,
    page_size: usize,
) -> Result<Vec<StacksContractEvent>> {
    let mut events = Vec::new();
    let mut offset = 0;
    loop {
        let page = ledger.contract_events(contract, offset, page_size).await?;
        let below = page.events.iter().any(|e| e.block_height < from);
        events.extend(
            page.events
                .into_iter()
                .filter(|e| e.block_height >= from && e.block_height <= to),
        );
        if below || page.fetched < page_size || page.fetched == 0 {
            break;
        }
        offset += page.fetched;
    }
    events.reverse();
    events.sort_by_key(|e| e.block_height);
    Ok(events)
}

fn observe(event: &StacksContractEvent) -> Option<DecodedEvent> {
    decode_event(&event.repr).map(|decoded| match decoded {
        Ok(decoded) => Ok(ObservedEvent {
            height: event.block_height,
            tx_id: event.tx_id.clone(),
            event: decoded,
        }),
        Err(reason) => Err(DecodeFailure {
            height: event.block_height,
            tx_id: event.tx_id.clone(),
            reason,
        }),
    })
}

/// [`PollSource`] over the contract log endpoint.
pub struct StacksEventSource<L> {
    chain: String,
    ledger: Arc<L>,
    page: usize,
}

#[async_trait]
impl<L: StacksLedger> PollSource for StacksEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.tip_height().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        let events = scan_events(self.ledger.as_ref(), &query.contract, from, to, self.page).await?;
        Ok(events
            .iter()
            .filter(|e| event_kind(&e.repr) == Some(query.kind))
            .filter_map(observe)
            .collect())
    }
}

/// Stacks chain adapter.
pub struct StacksChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<StacksEventSource<L>>,
}

impl<L: StacksLedger> StacksChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = StacksEventSource {
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
        call: ClarityCall,
    ) -> Result<(StacksTransaction, u64)> {
        let chain = self.info.nid.as_str();
        let tx_id = self.ledger.call_contract(signer, call).await?;
        debug!(chain, tx = %tx_id, "Submitted contract call");
        let (tx, height) = await_inclusion(ctx, chain, &tx_id, self.settings.poll_interval, || async {
            let tx = self.ledger.transaction(&tx_id).await?;
            Ok::<_, XCallError>(
                tx.filter(|t| t.tx_status != PENDING)
                    .and_then(|t| t.block_height.map(|h| (t, h))),
            )
        })
        .await?;
        if tx.tx_status != SUCCESS {
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: result_error_code(&tx.tx_result_repr),
                log: format!("{}: {}", tx.tx_status, tx.tx_result_repr),
            });
        }
        Ok((tx, height))
    }

    /// `sn` of the `CallMessageSent` logged by `tx_id`. The API indexes
    /// contract logs after the transaction itself, so this polls until the
    /// log shows up or `ctx` ends.
    async fn sent_serial(
        &self,
        ctx: &CorrelationContext,
        xcall: &str,
        tx_id: &str,
        height: u64,
    ) -> Result<SerialNo> {
        let chain = self.info.nid.as_str();
        let page = self.waiter.source().page;
        let found = await_inclusion(ctx, chain, tx_id, self.settings.poll_interval, || async {
            let logs = scan_events(self.ledger.as_ref(), xcall, height, height, page).await?;
            let sent: Vec<_> = logs
                .iter()
                .filter(|e| e.tx_id == tx_id && event_kind(&e.repr) == Some(EventKind::CallMessageSent))
                .filter_map(|e| decode_event(&e.repr))
                .collect();
            if sent.is_empty() {
                return Ok(None);
            }
            extract_sn(chain, tx_id, sent).map(Some)
        })
        .await;
        match found {
            Err(XCallError::Rpc { .. }) if ctx.is_expired() || ctx.is_cancelled() => Err(XCallError::decode(
                chain,
                EventKind::CallMessageSent.signature(),
                format!("no CallMessageSent indexed for transaction {}", tx_id),
            )),
            other => other,
        }
    }
}

#[async_trait]
impl<L: StacksLedger + 'static> XCallChain for StacksChain<L> {
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
        self.ledger.tip_height().await
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
        let (tx, height) = self
            .submit(ctx, signer, send_message_call(&dapp, destination, data, rollback))
            .await?;
        let xcall = self.get_contract_address(XCALL)?;
        let sn = self.sent_serial(ctx, &xcall, &tx.tx_id, height).await?;
        Ok(SendReceipt {
            sn,
            tx_id: tx.tx_id,
            height,
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
        let (tx, height) = self
            .submit(ctx, signer, execute_call_call(&xcall, req_id, data)?)
            .await?;
        Ok(TxOutcome {
            tx_id: tx.tx_id,
            height,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let xcall = self.get_contract_address(XCALL)?;
        let (tx, height) = self
            .submit(ctx, signer, execute_rollback_call(&xcall, sn)?)
            .await?;
        Ok(TxOutcome {
            tx_id: tx.tx_id,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_message_repr() {
        let event = XCallEvent::CallMessage {
            from: Some("0x2.evm/0xabc".into()),
            to: Some("ST1PQ.dapp".into()),
            sn: SerialNo::from_u64(5),
            req_id: RequestId::from_u64(3),
            data: Payload::from("hi"),
        };
        let repr = encode_event(&event);
        assert!(repr.contains("(req-id u3)"));
        assert!(repr.contains("(data 0x6869)"));
        assert_eq!(decode_event(&repr).unwrap().unwrap(), event);
    }

    #[test]
    fn test_non_xcall_prints_are_ignored() {
        assert!(decode_event(r#"(tuple (event "Transfer") (amount u5))"#).is_none());
        assert!(decode_event("u42").is_none());
        assert!(decode_event("not clarity (").is_none());
    }

    #[test]
    fn test_bad_fields_are_decode_failure() {
        let err = decode_event(r#"(tuple (event "RollbackMessage") (sn "five"))"#)
            .unwrap()
            .unwrap_err();
        assert!(err.contains("sn"));
    }

    #[test]
    fn test_call_literals() {
        let to = NetworkAddress::parse("0x2.icon/cxdapp").unwrap();
        let call = send_message_call("ST1.dapp", &to, &Payload::from("a"), Some(&Payload::from("r")));
        assert_eq!(call.args, vec!["\"0x2.icon/cxdapp\"", "0x61", "(some 0x72)"]);

        let call = execute_rollback_call("ST1.xcall", SerialNo::from_u64(9)).unwrap();
        assert_eq!(call.args, vec!["u9"]);
    }

    #[test]
    fn test_result_error_code() {
        assert_eq!(result_error_code("(err u105)"), 105);
        assert_eq!(result_error_code("(ok true)"), 0);
    }

    mod indexer {
        use super::*;
        use crate::domain::{ChainKind, Nid};
        use crate::ports::ledgers::StacksEventPage;
        use crate::testkit::{SimNetwork, SimStacks};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        /// Serves empty pages `hidden` times, then drops logs of `dropped`
        /// transactions while still reporting the raw page size.
        struct Indexer {
            inner: SimStacks,
            hidden: AtomicUsize,
            dropped: Vec<String>,
            calls: AtomicUsize,
        }

        impl Indexer {
            fn new(net: &SimNetwork, nid: &Nid) -> Self {
                Self {
                    inner: SimStacks::new(net.clone(), nid).unwrap(),
                    hidden: AtomicUsize::new(0),
                    dropped: Vec::new(),
                    calls: AtomicUsize::new(0),
                }
            }
        }

        #[async_trait]
        impl StacksLedger for Indexer {
            async fn tip_height(&self) -> Result<u64> {
                self.inner.tip_height().await
            }

            async fn call_contract(&self, signer: &SignerKey, call: ClarityCall) -> Result<String> {
                self.inner.call_contract(signer, call).await
            }

            async fn transaction(&self, tx_id: &str) -> Result<Option<StacksTransaction>> {
                self.inner.transaction(tx_id).await
            }

            async fn contract_events(
                &self,
                contract_id: &str,
                offset: usize,
                limit: usize,
            ) -> Result<StacksEventPage> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let hidden = self
                    .hidden
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                if hidden.is_ok() {
                    return Ok(StacksEventPage::default());
                }
                let mut page = self.inner.contract_events(contract_id, offset, limit).await?;
                page.events.retain(|e| !self.dropped.contains(&e.tx_id));
                Ok(page)
            }
        }

        fn serials(events: &[StacksContractEvent]) -> Vec<SerialNo> {
            events
                .iter()
                .map(|e| decode_event(&e.repr).unwrap().unwrap().sn().unwrap())
                .collect()
        }

        #[tokio::test]
        async fn test_scan_pages_past_filtered_short_pages() {
            let net = SimNetwork::new();
            let info = net.add_chain(ChainKind::Stacks, "stacks");
            let txs: Vec<_> = (1..=6)
                .map(|sn| {
                    let sn = SerialNo::from_u64(sn);
                    net.inject_event(&info.nid, XCallEvent::RollbackExecuted { sn }).unwrap()
                })
                .collect();
            let mut ledger = Indexer::new(&net, &info.nid);
            ledger.dropped = vec![txs[2].hash.clone(), txs[4].hash.clone()];
            let xcall = info.contracts.get(XCALL).unwrap();

            let all = scan_events(&ledger, xcall, txs[0].height, txs[5].height, 2).await.unwrap();
            let kept: Vec<_> = [1, 2, 4, 6].into_iter().map(SerialNo::from_u64).collect();
            assert_eq!(serials(&all), kept);

            let window = scan_events(&ledger, xcall, txs[1].height, txs[3].height, 2).await.unwrap();
            let kept: Vec<_> = [2, 4].into_iter().map(SerialNo::from_u64).collect();
            assert_eq!(serials(&window), kept);
        }

        #[tokio::test]
        async fn test_scan_stops_below_window() {
            let net = SimNetwork::new();
            let info = net.add_chain(ChainKind::Stacks, "stacks");
            let heights: Vec<_> = (1..=8)
                .map(|sn| {
                    let sn = SerialNo::from_u64(sn);
                    net.inject_event(&info.nid, XCallEvent::RollbackExecuted { sn })
                        .unwrap()
                        .height
                })
                .collect();
            let ledger = Indexer::new(&net, &info.nid);
            let xcall = info.contracts.get(XCALL).unwrap();

            let found = scan_events(&ledger, xcall, heights[5], heights[6], 2).await.unwrap();
            assert_eq!(found.iter().map(|e| e.block_height).collect::<Vec<_>>(), heights[5..=6].to_vec());
            assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_send_waits_for_lagging_indexer() {
            let net = SimNetwork::new();
            let info = net.add_chain(ChainKind::Stacks, "stacks");
            let evm = net.add_chain(ChainKind::Evm, "evm");
            let ledger = Arc::new(Indexer::new(&net, &info.nid));
            ledger.hidden.store(3, Ordering::SeqCst);
            let chain = StacksChain::new(
                info.clone(),
                CorrelationSettings::for_kind(ChainKind::Stacks),
                Arc::clone(&ledger),
            );
            let ctx = CorrelationContext::with_timeout(Duration::from_secs(600));

            let receipt = chain
                .send_packet_xcall(
                    &ctx,
                    &SignerKey::new("k"),
                    &NetworkAddress::new(evm.nid.clone(), "0xdapp"),
                    &Payload::from("hi"),
                    None,
                )
                .await
                .unwrap();
            let sent = net.transaction(&info.nid, &receipt.tx_id).unwrap().unwrap();
            assert_eq!(sent.events().find_map(XCallEvent::sn), Some(receipt.sn));
            assert!(ledger.calls.load(Ordering::SeqCst) > 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_send_fails_when_log_never_indexed() {
            let net = SimNetwork::new();
            let info = net.add_chain(ChainKind::Stacks, "stacks");
            let evm = net.add_chain(ChainKind::Evm, "evm");
            let ledger = Arc::new(Indexer::new(&net, &info.nid));
            ledger.hidden.store(usize::MAX, Ordering::SeqCst);
            let chain = StacksChain::new(
                info,
                CorrelationSettings::for_kind(ChainKind::Stacks),
                ledger,
            );
            let ctx = CorrelationContext::with_timeout(Duration::from_secs(60));

            let err = chain
                .send_packet_xcall(
                    &ctx,
                    &SignerKey::new("k"),
                    &NetworkAddress::new(evm.nid.clone(), "0xdapp"),
                    &Payload::from("hi"),
                    None,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, XCallError::Decode { .. }));
        }
    }
}
