//! # EVM Adapter
//!
//! ABI codec for the xCall contract and [`XCallChain`] over an [`EvmLedger`].
//!
//! Correlation polls `eth_getLogs` with positional topic filters. Indexed
//! strings are only available as keccak hashes, so decoded `CallMessage`
//! events carry no clear-text `from`/`to`; the filter matches them exactly
//! instead.

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
use crate::ports::ledgers::{EvmCall, EvmLedger, EvmLog, EvmReceipt, LogFilter};
use crate::ports::XCallChain;
use alloy_primitives::{keccak256, Address, Bytes, B256, I256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

sol! {
    interface ICallService {
        event CallMessageSent(address indexed _from, string indexed _to, uint256 indexed _sn);
        event CallMessage(string indexed _from, string indexed _to, uint256 indexed _sn, uint256 _reqId, bytes _data);
        event ResponseMessage(uint256 indexed _sn, int _code);
        event RollbackMessage(uint256 indexed _sn);
        event RollbackExecuted(uint256 indexed _sn);
        event CallExecuted(uint256 indexed _reqId, int _code, string _msg);

        function sendMessage(string _to, bytes _data, bytes _rollback) external payable;
        function executeCall(uint256 _reqId, bytes _data) external;
        function executeRollback(uint256 _sn) external;
    }
}

use ICallService::{
    executeCallCall, executeRollbackCall, sendMessageCall, CallExecuted as AbiCallExecuted,
    CallMessage as AbiCallMessage, CallMessageSent as AbiCallMessageSent,
    ResponseMessage as AbiResponseMessage, RollbackExecuted as AbiRollbackExecuted,
    RollbackMessage as AbiRollbackMessage,
};

/// Topic 0 of each logical event.
pub fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::CallMessageSent => AbiCallMessageSent::SIGNATURE_HASH,
        EventKind::CallMessage => AbiCallMessage::SIGNATURE_HASH,
        EventKind::ResponseMessage => AbiResponseMessage::SIGNATURE_HASH,
        EventKind::RollbackMessage => AbiRollbackMessage::SIGNATURE_HASH,
        EventKind::RollbackExecuted => AbiRollbackExecuted::SIGNATURE_HASH,
        EventKind::CallExecuted => AbiCallExecuted::SIGNATURE_HASH,
    }
}

fn kind_of(topic0: &B256) -> Option<EventKind> {
    EventKind::ALL
        .into_iter()
        .find(|kind| &signature_hash(*kind) == topic0)
}

/// `uint256` word for a serial number or request id.
pub fn word(bytes: [u8; 32]) -> U256 {
    U256::from_be_bytes(bytes)
}

fn serial(v: U256) -> SerialNo {
    SerialNo::from_be_slice(&v.to_be_bytes::<32>())
}

fn request(v: U256) -> RequestId {
    RequestId::from_be_slice(&v.to_be_bytes::<32>())
}

fn code(v: I256) -> std::result::Result<ResponseCode, String> {
    i64::try_from(v)
        .map(ResponseCode)
        .map_err(|_| format!("response code {} out of range", v))
}

/// Decode one log. `None` for logs that are not xCall events.
pub fn decode_log(log: &EvmLog) -> Option<Decoded> {
    let kind = kind_of(log.topics.first()?)?;
    let topics = log.topics.iter().copied();
    let data = log.data.as_slice();
    let decoded = match kind {
        EventKind::CallMessageSent => AbiCallMessageSent::decode_raw_log(topics, data, true)
            .map(|e| XCallEvent::CallMessageSent {
                from: Some(e._from.to_string()),
                to: None,
                sn: serial(e._sn),
            })
            .map_err(|e| e.to_string()),
        EventKind::CallMessage => AbiCallMessage::decode_raw_log(topics, data, true)
            .map(|e| XCallEvent::CallMessage {
                from: None,
                to: None,
                sn: serial(e._sn),
                req_id: request(e._reqId),
                data: Payload(e._data.to_vec()),
            })
            .map_err(|e| e.to_string()),
        EventKind::ResponseMessage => AbiResponseMessage::decode_raw_log(topics, data, true)
            .map_err(|e| e.to_string())
            .and_then(|e| {
                Ok(XCallEvent::ResponseMessage {
                    sn: serial(e._sn),
                    code: code(e._code)?,
                })
            }),
        EventKind::RollbackMessage => AbiRollbackMessage::decode_raw_log(topics, data, true)
            .map(|e| XCallEvent::RollbackMessage { sn: serial(e._sn) })
            .map_err(|e| e.to_string()),
        EventKind::RollbackExecuted => AbiRollbackExecuted::decode_raw_log(topics, data, true)
            .map(|e| XCallEvent::RollbackExecuted { sn: serial(e._sn) })
            .map_err(|e| e.to_string()),
        EventKind::CallExecuted => AbiCallExecuted::decode_raw_log(topics, data, true)
            .map_err(|e| e.to_string())
            .and_then(|e| {
                Ok(XCallEvent::CallExecuted {
                    req_id: request(e._reqId),
                    code: code(e._code)?,
                    msg: e._msg,
                })
            }),
    };
    Some(decoded)
}

/// ABI-encode a logical event as `(topics, data)`. Clear-text `from`/`to`
/// are hashed into their indexed topics.
pub fn encode_event(event: &XCallEvent) -> (Vec<B256>, Vec<u8>) {
    let text_topic = |s: &Option<String>| keccak256(s.as_deref().unwrap_or_default().as_bytes());
    let log = match event {
        XCallEvent::CallMessageSent { from, to, sn } => AbiCallMessageSent {
            _from: from
                .as_deref()
                .and_then(|f| f.parse::<Address>().ok())
                .unwrap_or_default(),
            _to: text_topic(to),
            _sn: word(sn.to_be_bytes()),
        }
        .encode_log_data(),
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => AbiCallMessage {
            _from: text_topic(from),
            _to: text_topic(to),
            _sn: word(sn.to_be_bytes()),
            _reqId: word(req_id.to_be_bytes()),
            _data: Bytes::from(data.0.clone()),
        }
        .encode_log_data(),
        XCallEvent::ResponseMessage { sn, code } => AbiResponseMessage {
            _sn: word(sn.to_be_bytes()),
            _code: I256::try_from(code.0).unwrap_or(I256::ZERO),
        }
        .encode_log_data(),
        XCallEvent::RollbackMessage { sn } => AbiRollbackMessage {
            _sn: word(sn.to_be_bytes()),
        }
        .encode_log_data(),
        XCallEvent::RollbackExecuted { sn } => AbiRollbackExecuted {
            _sn: word(sn.to_be_bytes()),
        }
        .encode_log_data(),
        XCallEvent::CallExecuted { req_id, code, msg } => AbiCallExecuted {
            _reqId: word(req_id.to_be_bytes()),
            _code: I256::try_from(code.0).unwrap_or(I256::ZERO),
            _msg: msg.clone(),
        }
        .encode_log_data(),
    };
    (log.topics().to_vec(), log.data.to_vec())
}

/// `eth_getLogs` filter for a query over `[from, to]`.
pub fn log_filter(query: &EventQuery, from: u64, to: u64) -> LogFilter {
    let sn = query.matcher.sn.map(|sn| B256::from(sn.to_be_bytes()));
    let req_id = query.matcher.req_id.map(|id| B256::from(id.to_be_bytes()));
    let hashed = |s: &Option<String>| s.as_deref().map(|s| keccak256(s.as_bytes()));

    let mut topics = vec![Some(signature_hash(query.kind))];
    match query.kind {
        EventKind::CallMessage => {
            topics.push(hashed(&query.matcher.from));
            topics.push(hashed(&query.matcher.to));
            topics.push(sn);
        }
        EventKind::CallMessageSent => topics.extend([None, None, sn]),
        EventKind::CallExecuted => topics.push(req_id),
        _ => topics.push(sn),
    }
    while topics.len() > 1 && topics.last() == Some(&None) {
        topics.pop();
    }

    LogFilter {
        address: query.contract.clone(),
        topics,
        from_block: from,
        to_block: to,
    }
}

/// Calldata for the dapp's `sendMessage`.
pub fn send_message_call(to: &NetworkAddress, data: &Payload, rollback: Option<&Payload>) -> Vec<u8> {
    sendMessageCall {
        _to: to.to_string(),
        _data: Bytes::from(data.0.clone()),
        _rollback: Bytes::from(rollback.map(|r| r.0.clone()).unwrap_or_default()),
    }
    .abi_encode()
}

/// Calldata for xCall `executeCall`.
pub fn execute_call_call(req_id: RequestId, data: &Payload) -> Vec<u8> {
    executeCallCall {
        _reqId: word(req_id.to_be_bytes()),
        _data: Bytes::from(data.0.clone()),
    }
    .abi_encode()
}

/// Calldata for xCall `executeRollback`.
pub fn execute_rollback_call(sn: SerialNo) -> Vec<u8> {
    executeRollbackCall {
        _sn: word(sn.to_be_bytes()),
    }
    .abi_encode()
}

/// Calldata recognised by [`decode_call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XCallCalldata {
    /// `sendMessage(to, data, rollback)`
    SendMessage {
        /// Destination network address
        to: String,
        /// Payload
        data: Vec<u8>,
        /// Rollback payload, empty when none
        rollback: Vec<u8>,
    },
    /// `executeCall(reqId, data)`
    ExecuteCall {
        /// Request id
        req_id: RequestId,
        /// Payload
        data: Vec<u8>,
    },
    /// `executeRollback(sn)`
    ExecuteRollback {
        /// Serial number
        sn: SerialNo,
    },
}

/// Decode calldata by selector.
pub fn decode_call(input: &[u8]) -> std::result::Result<XCallCalldata, String> {
    let selector: [u8; 4] = input
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| "calldata shorter than a selector".to_string())?;
    if selector == sendMessageCall::SELECTOR {
        sendMessageCall::abi_decode(input, true)
            .map(|c| XCallCalldata::SendMessage {
                to: c._to,
                data: c._data.to_vec(),
                rollback: c._rollback.to_vec(),
            })
            .map_err(|e| e.to_string())
    } else if selector == executeCallCall::SELECTOR {
        executeCallCall::abi_decode(input, true)
            .map(|c| XCallCalldata::ExecuteCall {
                req_id: request(c._reqId),
                data: c._data.to_vec(),
            })
            .map_err(|e| e.to_string())
    } else if selector == executeRollbackCall::SELECTOR {
        executeRollbackCall::abi_decode(input, true)
            .map(|c| XCallCalldata::ExecuteRollback { sn: serial(c._sn) })
            .map_err(|e| e.to_string())
    } else {
        Err(format!("unknown selector 0x{}", hex::encode(selector)))
    }
}

/// [`PollSource`] over `eth_getLogs`.
pub struct EvmEventSource<L> {
    chain: String,
    ledger: Arc<L>,
}

#[async_trait]
impl<L: EvmLedger> PollSource for EvmEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.block_number().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        let logs = self.ledger.get_logs(&log_filter(query, from, to)).await?;
        Ok(logs
            .iter()
            .filter_map(|log| {
                decode_log(log).map(|decoded| match decoded {
                    Ok(event) => Ok(ObservedEvent {
                        height: log.block_number,
                        tx_id: log.tx_hash.clone(),
                        event,
                    }),
                    Err(reason) => Err(DecodeFailure {
                        height: log.block_number,
                        tx_id: log.tx_hash.clone(),
                        reason,
                    }),
                })
            })
            .collect())
    }
}

/// EVM chain adapter.
pub struct EvmChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<EvmEventSource<L>>,
}

impl<L: EvmLedger> EvmChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = EvmEventSource {
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
        call: EvmCall,
    ) -> Result<EvmReceipt> {
        let chain = self.info.nid.as_str();
        let tx_hash = self.ledger.send_transaction(signer, call).await?;
        debug!(chain, tx = %tx_hash, "Submitted transaction");
        let receipt = await_inclusion(ctx, chain, &tx_hash, self.settings.poll_interval, || {
            self.ledger.transaction_receipt(&tx_hash)
        })
        .await?;
        if receipt.status != 1 {
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: receipt.status as i64,
                log: receipt
                    .revert_reason
                    .clone()
                    .unwrap_or_else(|| "execution reverted".to_string()),
            });
        }
        Ok(receipt)
    }
}

#[async_trait]
impl<L: EvmLedger + 'static> XCallChain for EvmChain<L> {
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
        self.ledger.block_number().await
    }

    async fn send_packet_xcall(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        destination: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<SendReceipt> {
        let call = EvmCall {
            to: self.get_contract_address(DAPP)?,
            input: send_message_call(destination, data, rollback),
        };
        let receipt = self.submit(ctx, signer, call).await?;
        let xcall = self.get_contract_address(XCALL)?;
        let sn = extract_sn(
            self.info.nid.as_str(),
            &receipt.tx_hash,
            receipt
                .logs
                .iter()
                .filter(|log| log.address.eq_ignore_ascii_case(&xcall))
                .filter_map(decode_log),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: receipt.tx_hash,
            height: receipt.block_number,
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
        let call = EvmCall {
            to: self.get_contract_address(XCALL)?,
            input: execute_call_call(req_id, data),
        };
        let receipt = self.submit(ctx, signer, call).await?;
        Ok(TxOutcome {
            tx_id: receipt.tx_hash,
            height: receipt.block_number,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let call = EvmCall {
            to: self.get_contract_address(XCALL)?,
            input: execute_rollback_call(sn),
        };
        let receipt = self.submit(ctx, signer, call).await?;
        Ok(TxOutcome {
            tx_id: receipt.tx_hash,
            height: receipt.block_number,
        })
    }
}
