//! Simulated ledger ports.
//!
//! Each ledger decodes the family-native calls its adapter builds into a
//! [`SimCall`] and renders [`SimTx`] records back in the family's native
//! event encoding, so the production codecs run end to end.

use super::network::{SimCall, SimFailure, SimNetwork, SimRecord, SimTx};
use crate::adapters::clarity::ClarityValue;
use crate::adapters::cosmos::{self as cosmos_codec, WASM_PREFIX};
use crate::adapters::evm::{self as evm_codec, XCallCalldata};
use crate::adapters::icon as icon_codec;
use crate::adapters::solana::{
    self as solana_codec, ExecuteCallArgs, ExecuteRollbackArgs, SendCallMessageArgs, PROGRAM_DATA,
};
use crate::adapters::stacks as stacks_codec;
use crate::adapters::stellar as stellar_codec;
use crate::adapters::sui::{self as sui_codec, DAPP_MODULE, DAPP_STATE, XCALL_MODULE, XCALL_STORAGE};
use crate::domain::{
    ChainInfo, EventKind, NetworkAddress, Nid, Payload, RequestId, Result, SerialNo, SignerKey,
    XCallError, XCallEvent, DAPP, XCALL,
};
use crate::ports::ledgers::{
    AbciAttribute, AbciEvent, ClarityCall, CosmosEventQuery, CosmosExecute, CosmosLedger,
    CosmosTxResult, EventsStart, EvmCall, EvmLedger, EvmLog, EvmReceipt, IconCall, IconEventLog,
    IconFailure, IconLedger, IconTxResult, LogFilter, MoveCall, SignatureInfo, SolanaInstruction,
    SolanaLedger, SolanaTransaction, SorobanEvent, SorobanInvocation, SorobanTransaction,
    StacksContractEvent, StacksEventPage, StacksLedger, StacksTransaction, StellarLedger,
    SuiEvent, SuiEventId, SuiLedger, SuiTransactionBlock,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use borsh::BorshDeserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use stellar_xdr::curr::ScVal;
use tokio::sync::{broadcast, mpsc};

fn invalid(what: impl std::fmt::Display) -> XCallError {
    XCallError::InvalidValue(what.to_string())
}

/// Shared plumbing: one chain of a [`SimNetwork`].
#[derive(Clone)]
struct SimChain {
    net: SimNetwork,
    info: ChainInfo,
}

impl SimChain {
    fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        let info = net.chain_info(nid)?;
        Ok(Self { net, info })
    }

    fn nid(&self) -> &Nid {
        &self.info.nid
    }

    fn contract(&self, name: &str) -> String {
        self.info
            .contracts
            .get(name)
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn height(&self) -> Result<u64> {
        self.net.height(self.nid())
    }

    /// Submit `call`, which must have been addressed to contract `expected`.
    fn submit(&self, addressed: &str, expected: &str, call: SimCall) -> Result<String> {
        if !addressed.eq_ignore_ascii_case(&self.contract(expected)) {
            return Err(XCallError::rpc(
                self.nid().as_str(),
                format!("no {} contract at {}", expected, addressed),
            ));
        }
        self.net.submit(self.nid(), call)
    }

    fn tx(&self, hash: &str) -> Result<Option<SimTx>> {
        self.net.transaction(self.nid(), hash)
    }

    fn txs(&self, from: u64, to: u64) -> Result<Vec<SimTx>> {
        self.net.transactions(self.nid(), from, to)
    }
}

fn send_call(to: &str, data: Vec<u8>, rollback: Option<Vec<u8>>) -> Result<SimCall> {
    Ok(SimCall::Send {
        to: NetworkAddress::parse(to)?,
        data: Payload(data),
        rollback: rollback.map(Payload),
    })
}

// ---------------------------------------------------------------------------
// EVM
// ---------------------------------------------------------------------------

/// Simulated EVM node.
pub struct SimEvm {
    chain: SimChain,
}

impl SimEvm {
    /// Node for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn logs(&self, tx: &SimTx) -> Vec<EvmLog> {
        let address = self.chain.contract(XCALL);
        tx.records
            .iter()
            .map(|record| {
                let (topics, data) = match record {
                    SimRecord::Event(event) => evm_codec::encode_event(event),
                    SimRecord::Malformed(kind) => (vec![evm_codec::signature_hash(*kind)], vec![0xde, 0xad]),
                };
                EvmLog {
                    address: address.clone(),
                    topics,
                    data,
                    block_number: tx.height,
                    tx_hash: tx.hash.clone(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl EvmLedger for SimEvm {
    async fn block_number(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn send_transaction(&self, _signer: &SignerKey, call: EvmCall) -> Result<String> {
        let (target, sim) = match evm_codec::decode_call(&call.input).map_err(invalid)? {
            XCallCalldata::SendMessage { to, data, rollback } => {
                let rollback = (!rollback.is_empty()).then_some(rollback);
                (DAPP, send_call(&to, data, rollback)?)
            }
            XCallCalldata::ExecuteCall { req_id, data } => (
                XCALL,
                SimCall::ExecuteCall {
                    req_id,
                    data: Payload(data),
                },
            ),
            XCallCalldata::ExecuteRollback { sn } => (XCALL, SimCall::ExecuteRollback { sn }),
        };
        self.chain.submit(&call.to, target, sim)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>> {
        Ok(self.chain.tx(tx_hash)?.map(|tx| EvmReceipt {
            tx_hash: tx.hash.clone(),
            block_number: tx.height,
            status: u64::from(tx.failure.is_none()),
            logs: self.logs(&tx),
            revert_reason: tx
                .failure
                .map(|f| format!("execution reverted: {}", f.name())),
        }))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>> {
        Ok(self
            .chain
            .txs(filter.from_block, filter.to_block)?
            .iter()
            .flat_map(|tx| self.logs(tx))
            .filter(|log| filter.matches(log))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Cosmos
// ---------------------------------------------------------------------------

/// ABCI code CosmWasm reports for a failed execute.
const WASM_EXECUTE_FAILED: u32 = 5;

/// Simulated CosmWasm node with `/subscribe`.
pub struct SimCosmos {
    chain: SimChain,
    base64_attributes: bool,
}

impl SimCosmos {
    /// Node for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
            base64_attributes: false,
        })
    }

    /// Emit base64-wrapped attributes, as older Tendermint nodes do.
    pub fn with_base64_attributes(mut self) -> Self {
        self.base64_attributes = true;
        self
    }
}

fn json_field<T: DeserializeOwned>(msg: &Value, key: &str) -> Result<T> {
    serde_json::from_value(msg.get(key).cloned().unwrap_or(Value::Null))
        .map_err(|e| invalid(format!("{}: {}", key, e)))
}

fn cosmos_result(tx: &SimTx, contract: &str, base64_wrapped: bool) -> CosmosTxResult {
    let events = tx
        .records
        .iter()
        .map(|record| match record {
            SimRecord::Event(event) => cosmos_codec::encode_event(event, contract, base64_wrapped),
            SimRecord::Malformed(kind) => AbciEvent {
                kind: cosmos_codec::event_type(*kind),
                attributes: vec![
                    AbciAttribute {
                        key: "_contract_address".into(),
                        value: contract.to_string(),
                    },
                    AbciAttribute {
                        key: cosmos_codec::key_attribute(*kind).into(),
                        value: "not-a-number".into(),
                    },
                ],
            },
        })
        .collect();
    let (code, raw_log) = match tx.failure {
        Some(failure) => (
            WASM_EXECUTE_FAILED,
            format!(
                "failed to execute message; message index: 0: Generic error: {}: execute wasm contract failed",
                failure.name()
            ),
        ),
        None => (0, String::new()),
    };
    CosmosTxResult {
        tx_hash: tx.hash.clone(),
        height: tx.height,
        code,
        raw_log,
        events,
    }
}

/// Attribute value a logical event carries under `key`.
fn cosmos_attribute(event: &XCallEvent, key: &str) -> Option<String> {
    match key {
        "sn" => event.sn().map(|sn| sn.to_string()),
        "reqId" => event.req_id().map(|id| id.to_string()),
        _ => None,
    }
}

fn cosmos_matches(tx: &SimTx, query: &CosmosEventQuery, contract: &str) -> bool {
    let Some(kind) = query
        .event_type
        .strip_prefix(WASM_PREFIX)
        .and_then(EventKind::from_signature)
    else {
        return false;
    };
    query.contract == contract
        && tx.records.iter().any(|record| match record {
            SimRecord::Event(event) => {
                event.kind() == kind
                    && query
                        .attribute
                        .as_ref()
                        .map_or(true, |(k, v)| cosmos_attribute(event, k).as_deref() == Some(v.as_str()))
            }
            SimRecord::Malformed(k) => *k == kind && query.attribute.is_none(),
        })
}

#[async_trait]
impl CosmosLedger for SimCosmos {
    async fn latest_height(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn execute(&self, _signer: &SignerKey, exec: CosmosExecute) -> Result<String> {
        let msg = &exec.msg;
        let (target, call) = if let Some(m) = msg.get("send_call_message") {
            let to: String = json_field(m, "to")?;
            (DAPP, send_call(&to, json_field(m, "data")?, json_field(m, "rollback")?)?)
        } else if let Some(m) = msg.get("execute_call") {
            let req_id: String = json_field(m, "request_id")?;
            (
                XCALL,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_dec_str(&req_id)?,
                    data: Payload(json_field(m, "data")?),
                },
            )
        } else if let Some(m) = msg.get("execute_rollback") {
            let sn: String = json_field(m, "sequence_no")?;
            (
                XCALL,
                SimCall::ExecuteRollback {
                    sn: SerialNo::from_dec_str(&sn)?,
                },
            )
        } else {
            return Err(invalid(format!("unknown execute message {}", msg)));
        };
        self.chain.submit(&exec.contract, target, call)
    }

    async fn tx(&self, hash: &str) -> Result<Option<CosmosTxResult>> {
        let xcall = self.chain.contract(XCALL);
        Ok(self
            .chain
            .tx(hash)?
            .map(|tx| cosmos_result(&tx, &xcall, self.base64_attributes)))
    }

    async fn tx_search(&self, query: &CosmosEventQuery) -> Result<Vec<CosmosTxResult>> {
        let xcall = self.chain.contract(XCALL);
        let max = match query.max_height {
            Some(max) => max,
            None => self.chain.height()?,
        };
        Ok(self
            .chain
            .txs(query.min_height, max)?
            .iter()
            .filter(|tx| cosmos_matches(tx, query, &xcall))
            .map(|tx| cosmos_result(tx, &xcall, self.base64_attributes))
            .collect())
    }

    async fn subscribe(&self, query: &CosmosEventQuery) -> Result<mpsc::Receiver<CosmosTxResult>> {
        let mut applied = self.chain.net.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let watched = self.chain.nid().clone();
        let xcall = self.chain.contract(XCALL);
        let base64_wrapped = self.base64_attributes;
        let query = query.clone();
        tokio::spawn(async move {
            loop {
                match applied.recv().await {
                    Ok((nid, sim)) if nid == watched => {
                        if sim.height >= query.min_height
                            && cosmos_matches(&sim, &query, &xcall)
                            && tx.send(cosmos_result(&sim, &xcall, base64_wrapped)).await.is_err()
                        {
                            return;
                        }
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// ICON
// ---------------------------------------------------------------------------

/// ICON failure codes start at `0x20` for SCORE reverts.
const SCORE_REVERT_BASE: i64 = 0x20;

/// Simulated ICON node.
pub struct SimIcon {
    chain: SimChain,
}

impl SimIcon {
    /// Node for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn result(&self, tx: &SimTx) -> IconTxResult {
        let score = self.chain.contract(XCALL);
        IconTxResult {
            tx_hash: tx.hash.clone(),
            block_height: tx.height,
            status: u64::from(tx.failure.is_none()),
            failure: tx.failure.map(|f| IconFailure {
                code: SCORE_REVERT_BASE + i64::from(f.code()),
                message: f.name().to_string(),
            }),
            event_logs: tx
                .records
                .iter()
                .map(|record| match record {
                    SimRecord::Event(event) => icon_codec::encode_event(event, &score),
                    SimRecord::Malformed(kind) => IconEventLog {
                        score_address: score.clone(),
                        indexed: vec![icon_codec::signature(*kind).to_string()],
                        data: vec![],
                    },
                })
                .collect(),
        }
    }
}

fn icon_param<'a>(call: &'a IconCall, key: &str) -> Result<&'a str> {
    call.params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{} missing param {}", call.method, key)))
}

#[async_trait]
impl IconLedger for SimIcon {
    async fn last_height(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn send_call(&self, _signer: &SignerKey, call: IconCall) -> Result<String> {
        let (target, sim) = match call.method.as_str() {
            "sendMessage" => {
                let rollback = match call.params.get("_rollback").and_then(Value::as_str) {
                    Some(hex) => Some(Payload::from_hex(hex)?.0),
                    None => None,
                };
                let data = Payload::from_hex(icon_param(&call, "_data")?)?.0;
                (DAPP, send_call(icon_param(&call, "_to")?, data, rollback)?)
            }
            "executeCall" => (
                XCALL,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_hex_str(icon_param(&call, "_reqId")?)?,
                    data: Payload::from_hex(icon_param(&call, "_data")?)?,
                },
            ),
            "executeRollback" => (
                XCALL,
                SimCall::ExecuteRollback {
                    sn: SerialNo::from_hex_str(icon_param(&call, "_sn")?)?,
                },
            ),
            other => return Err(invalid(format!("unknown method {}", other))),
        };
        self.chain.submit(&call.to, target, sim)
    }

    async fn transaction_result(&self, tx_hash: &str) -> Result<Option<IconTxResult>> {
        Ok(self.chain.tx(tx_hash)?.map(|tx| self.result(&tx)))
    }

    async fn block_results(&self, height: u64) -> Result<Vec<IconTxResult>> {
        Ok(self
            .chain
            .txs(height, height)?
            .iter()
            .map(|tx| self.result(tx))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Solana
// ---------------------------------------------------------------------------

/// Anchor numbers custom errors from 6000.
const ANCHOR_ERROR_BASE: u32 = 6000;

/// Simulated Solana validator.
pub struct SimSolana {
    chain: SimChain,
}

impl SimSolana {
    /// Validator for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn transaction_of(&self, tx: &SimTx) -> SolanaTransaction {
        let program = self.chain.contract(XCALL);
        let mut log_messages = vec![format!("Program {} invoke [1]", program)];
        for record in &tx.records {
            log_messages.push(match record {
                SimRecord::Event(event) => solana_codec::encode_log_line(event),
                SimRecord::Malformed(kind) => {
                    let mut bytes = solana_codec::discriminator("event", kind.signature()).to_vec();
                    bytes.extend([1, 2, 3]);
                    format!("{}{}", PROGRAM_DATA, general_purpose::STANDARD.encode(bytes))
                }
            });
        }
        let err = tx.failure.map(|f| {
            let number = ANCHOR_ERROR_BASE + f.code();
            log_messages.push(format!(
                "Program log: AnchorError occurred. Error Code: {}. Error Number: {}.",
                f.name(),
                number
            ));
            format!("Error processing Instruction 0: custom program error: 0x{:x}", number)
        });
        log_messages.push(match err {
            Some(_) => format!("Program {} failed", program),
            None => format!("Program {} success", program),
        });
        SolanaTransaction {
            signature: tx.hash.clone(),
            slot: tx.height,
            err,
            log_messages,
        }
    }
}

fn borsh_args<T: BorshDeserialize>(body: &[u8]) -> Result<T> {
    T::try_from_slice(body).map_err(invalid)
}

#[async_trait]
impl SolanaLedger for SimSolana {
    async fn slot(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn send_instruction(&self, _signer: &SignerKey, ix: SolanaInstruction) -> Result<String> {
        if ix.data.len() < 8 {
            return Err(invalid("instruction data shorter than a discriminator"));
        }
        let (disc, body) = ix.data.split_at(8);
        let is = |name: &str| solana_codec::discriminator("global", name) == disc;
        let (target, call) = if is("send_call_message") {
            let args: SendCallMessageArgs = borsh_args(body)?;
            (DAPP, send_call(&args.to, args.data, args.rollback)?)
        } else if is("execute_call") {
            let args: ExecuteCallArgs = borsh_args(body)?;
            (
                XCALL,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_u128(args.req_id),
                    data: Payload(args.data),
                },
            )
        } else if is("execute_rollback") {
            let args: ExecuteRollbackArgs = borsh_args(body)?;
            (
                XCALL,
                SimCall::ExecuteRollback {
                    sn: SerialNo::from_u128(args.sn),
                },
            )
        } else {
            return Err(invalid(format!("unknown instruction 0x{}", hex::encode(disc))));
        };
        self.chain.submit(&ix.program_id, target, call)
    }

    async fn transaction(&self, signature: &str) -> Result<Option<SolanaTransaction>> {
        Ok(self.chain.tx(signature)?.map(|tx| self.transaction_of(&tx)))
    }

    async fn signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        if address != self.chain.contract(XCALL) {
            return Ok(Vec::new());
        }
        let head = self.chain.height()?;
        let txs = self.chain.txs(0, head)?;
        let skip = match before {
            Some(before) => match txs.iter().rev().position(|tx| tx.hash == before) {
                Some(index) => index + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(txs
            .iter()
            .rev()
            .skip(skip)
            .take(limit)
            .map(|tx| SignatureInfo {
                signature: tx.hash.clone(),
                slot: tx.height,
                err: tx.failure.map(|f| f.name().to_string()),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Stellar
// ---------------------------------------------------------------------------

/// Simulated Soroban RPC.
pub struct SimStellar {
    chain: SimChain,
}

impl SimStellar {
    /// RPC for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn events(&self, tx: &SimTx) -> Result<Vec<SorobanEvent>> {
        let contract = self.chain.contract(XCALL);
        tx.records
            .iter()
            .enumerate()
            .map(|(index, record)| match record {
                SimRecord::Event(event) => {
                    stellar_codec::encode_event(event, &contract, tx.height, &tx.hash).map(|mut e| {
                        e.id = paging_token(tx.height, index);
                        e
                    })
                }
                SimRecord::Malformed(kind) => Ok(SorobanEvent {
                    id: paging_token(tx.height, index),
                    ledger: tx.height,
                    tx_hash: tx.hash.clone(),
                    contract_id: contract.clone(),
                    topic: vec![stellar_codec::to_base64(&stellar_codec::symbol(kind.signature())?)?],
                    value: stellar_codec::to_base64(&ScVal::U32(7))?,
                }),
            })
            .collect::<std::result::Result<_, String>>()
            .map_err(invalid)
    }
}

/// Zero-padded so tokens compare in ledger order.
fn paging_token(ledger: u64, index: usize) -> String {
    format!("{:019}-{:010}", ledger, index)
}

fn soroban_arg<T>(call: &SorobanInvocation, index: usize, read: impl Fn(&ScVal) -> Option<T>) -> Result<T> {
    call.args
        .get(index)
        .and_then(read)
        .ok_or_else(|| invalid(format!("{} argument {} has the wrong type", call.function, index)))
}

#[async_trait]
impl StellarLedger for SimStellar {
    async fn latest_ledger(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn invoke(&self, _signer: &SignerKey, call: SorobanInvocation) -> Result<String> {
        let (target, sim) = match call.function.as_str() {
            "send_call_message" => {
                let to = soroban_arg(&call, 0, stellar_codec::arg_text)?;
                let data = soroban_arg(&call, 1, stellar_codec::arg_bytes)?;
                let rollback = call.args.get(2).and_then(stellar_codec::arg_bytes);
                (DAPP, send_call(&to, data, rollback)?)
            }
            "execute_call" => (
                XCALL,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_u128(soroban_arg(&call, 0, stellar_codec::arg_u128)?),
                    data: Payload(soroban_arg(&call, 1, stellar_codec::arg_bytes)?),
                },
            ),
            "execute_rollback" => (
                XCALL,
                SimCall::ExecuteRollback {
                    sn: SerialNo::from_u128(soroban_arg(&call, 0, stellar_codec::arg_u128)?),
                },
            ),
            other => return Err(invalid(format!("unknown function {}", other))),
        };
        self.chain.submit(&call.contract_id, target, sim)
    }

    async fn transaction(&self, hash: &str) -> Result<Option<SorobanTransaction>> {
        let Some(tx) = self.chain.tx(hash)? else {
            return Ok(None);
        };
        Ok(Some(SorobanTransaction {
            hash: tx.hash.clone(),
            ledger: tx.height,
            status: if tx.failure.is_some() { "FAILED" } else { stellar_codec::SUCCESS }.to_string(),
            error: tx
                .failure
                .map(|f| format!("HostError: Error(Contract, #{})\n{}", f.code(), f.name())),
            events: self.events(&tx)?,
        }))
    }

    async fn get_events(
        &self,
        contract_id: &str,
        start: EventsStart,
        limit: usize,
    ) -> Result<Vec<SorobanEvent>> {
        if contract_id != self.chain.contract(XCALL) {
            return Ok(Vec::new());
        }
        let start_ledger = match &start {
            EventsStart::Ledger(ledger) => *ledger,
            EventsStart::After(_) => 0,
        };
        let mut events = Vec::new();
        for tx in self.chain.txs(start_ledger, u64::MAX)? {
            events.extend(self.events(&tx)?);
        }
        if let EventsStart::After(cursor) = &start {
            events.retain(|e| e.id.as_str() > cursor.as_str());
        }
        events.truncate(limit);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Sui
// ---------------------------------------------------------------------------

/// Simulated Sui full node.
pub struct SimSui {
    chain: SimChain,
}

impl SimSui {
    /// Node for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn events(&self, tx: &SimTx) -> Vec<SuiEvent> {
        let package = self.chain.contract(XCALL);
        tx.records
            .iter()
            .enumerate()
            .map(|(seq, record)| match record {
                SimRecord::Event(event) => SuiEvent {
                    event_seq: seq as u64,
                    ..sui_codec::encode_event(event, &package, &tx.hash, tx.height)
                },
                SimRecord::Malformed(kind) => SuiEvent {
                    event_type: sui_codec::event_type(&package, *kind),
                    tx_digest: tx.hash.clone(),
                    event_seq: seq as u64,
                    checkpoint: Some(tx.height),
                    parsed_json: json!({ "sn": { "malformed": true } }),
                },
            })
            .collect()
    }

    /// Pure arguments after the leading shared object, which must be the
    /// registered `object`.
    fn pure_args<'a>(&self, call: &'a MoveCall, object: &str) -> Result<&'a [Value]> {
        match call.arguments.split_first() {
            Some((first, rest)) if first.as_str() == Some(self.chain.contract(object).as_str()) => Ok(rest),
            _ => Err(invalid(format!("{} expects object {} first", call.function, object))),
        }
    }
}

fn move_arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T> {
    serde_json::from_value(args.get(index).cloned().unwrap_or(Value::Null))
        .map_err(|e| invalid(format!("argument {}: {}", index, e)))
}

#[async_trait]
impl SuiLedger for SimSui {
    async fn latest_checkpoint(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn execute_move_call(&self, _signer: &SignerKey, call: MoveCall) -> Result<String> {
        let (target, sim) = match (call.module.as_str(), call.function.as_str()) {
            (DAPP_MODULE, "send_message") => {
                let args = self.pure_args(&call, DAPP_STATE)?;
                let to: String = move_arg(args, 0)?;
                let rollback: Vec<u8> = move_arg(args, 2)?;
                let rollback = (!rollback.is_empty()).then_some(rollback);
                (DAPP, send_call(&to, move_arg(args, 1)?, rollback)?)
            }
            (XCALL_MODULE, "execute_call") => {
                let args = self.pure_args(&call, XCALL_STORAGE)?;
                let req_id: String = move_arg(args, 0)?;
                (
                    XCALL,
                    SimCall::ExecuteCall {
                        req_id: RequestId::from_dec_str(&req_id)?,
                        data: Payload(move_arg(args, 1)?),
                    },
                )
            }
            (XCALL_MODULE, "execute_rollback") => {
                let args = self.pure_args(&call, XCALL_STORAGE)?;
                let sn: String = move_arg(args, 0)?;
                (
                    XCALL,
                    SimCall::ExecuteRollback {
                        sn: SerialNo::from_dec_str(&sn)?,
                    },
                )
            }
            (module, function) => {
                return Err(invalid(format!("unknown function {}::{}", module, function)))
            }
        };
        self.chain.submit(&call.package, target, sim)
    }

    async fn transaction_block(&self, digest: &str) -> Result<Option<SuiTransactionBlock>> {
        let Some(tx) = self.chain.tx(digest)? else {
            return Ok(None);
        };
        let package = self.chain.contract(XCALL);
        Ok(Some(SuiTransactionBlock {
            digest: tx.hash.clone(),
            checkpoint: Some(tx.height),
            status: if tx.failure.is_some() { "failure" } else { sui_codec::SUCCESS }.to_string(),
            error: tx.failure.map(|f| abort_message(&package, f)),
            events: self.events(&tx),
        }))
    }

    async fn query_events(
        &self,
        event_type: &str,
        cursor: Option<SuiEventId>,
        limit: usize,
    ) -> Result<Vec<SuiEvent>> {
        let head = self.chain.height()?;
        let newest_first: Vec<_> = self
            .chain
            .txs(0, head)?
            .iter()
            .rev()
            .flat_map(|tx| self.events(tx).into_iter().rev())
            .filter(|e| e.event_type == event_type)
            .collect();
        let skip = match cursor {
            Some(cursor) => match newest_first.iter().position(|e| e.id() == cursor) {
                Some(index) => index + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(newest_first.into_iter().skip(skip).take(limit).collect())
    }
}

fn abort_message(package: &str, failure: SimFailure) -> String {
    format!(
        "MoveAbort(MoveLocation {{ module: ModuleId {{ address: {}, name: Identifier(\"{}\") }}, function: 0, instruction: 0, function_name: None }}, {}) in command 0",
        package.trim_start_matches("0x"),
        XCALL_MODULE,
        failure.code()
    )
}

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// Simulated Stacks node and API.
pub struct SimStacks {
    chain: SimChain,
}

impl SimStacks {
    /// API for chain `nid` of `net`.
    pub fn new(net: SimNetwork, nid: &Nid) -> Result<Self> {
        Ok(Self {
            chain: SimChain::new(net, nid)?,
        })
    }

    fn logs(&self, tx: &SimTx) -> Vec<StacksContractEvent> {
        tx.records
            .iter()
            .map(|record| StacksContractEvent {
                tx_id: tx.hash.clone(),
                block_height: tx.height,
                repr: match record {
                    SimRecord::Event(event) => stacks_codec::encode_event(event),
                    SimRecord::Malformed(kind) => {
                        format!("(tuple (event \"{}\") (sn \"malformed\"))", kind.signature())
                    }
                },
            })
            .collect()
    }
}

fn clarity_arg<T>(
    call: &ClarityCall,
    index: usize,
    read: impl Fn(&ClarityValue) -> Option<T>,
) -> Result<T> {
    let repr = call
        .args
        .get(index)
        .ok_or_else(|| invalid(format!("{} missing argument {}", call.function, index)))?;
    let value = ClarityValue::parse(repr).map_err(invalid)?;
    read(&value).ok_or_else(|| invalid(format!("{} argument {} is {}", call.function, index, repr)))
}

#[async_trait]
impl StacksLedger for SimStacks {
    async fn tip_height(&self) -> Result<u64> {
        self.chain.height()
    }

    async fn call_contract(&self, _signer: &SignerKey, call: ClarityCall) -> Result<String> {
        let (target, sim) = match call.function.as_str() {
            "send-message" => {
                let to = clarity_arg(&call, 0, |v| v.as_str().map(str::to_string))?;
                let data = clarity_arg(&call, 1, |v| v.as_buff().map(<[u8]>::to_vec))?;
                let rollback = clarity_arg(&call, 2, |v| match v {
                    ClarityValue::Some(inner) => inner.as_buff().map(|b| Some(b.to_vec())),
                    ClarityValue::None => Some(None),
                    _ => None,
                })?;
                (DAPP, send_call(&to, data, rollback)?)
            }
            "execute-call" => (
                XCALL,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_u128(clarity_arg(&call, 0, ClarityValue::as_u128)?),
                    data: Payload(clarity_arg(&call, 1, |v| v.as_buff().map(<[u8]>::to_vec))?),
                },
            ),
            "execute-rollback" => (
                XCALL,
                SimCall::ExecuteRollback {
                    sn: SerialNo::from_u128(clarity_arg(&call, 0, ClarityValue::as_u128)?),
                },
            ),
            other => return Err(invalid(format!("unknown function {}", other))),
        };
        self.chain.submit(&call.contract_id, target, sim)
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<StacksTransaction>> {
        Ok(self.chain.tx(tx_id)?.map(|tx| StacksTransaction {
            tx_id: tx.hash.clone(),
            block_height: Some(tx.height),
            tx_status: match tx.failure {
                Some(_) => "abort_by_response".to_string(),
                None => stacks_codec::SUCCESS.to_string(),
            },
            tx_result_repr: match tx.failure {
                Some(f) => format!("(err u{})", f.code()),
                None => "(ok true)".to_string(),
            },
        }))
    }

    async fn contract_events(
        &self,
        contract_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<StacksEventPage> {
        if contract_id != self.chain.contract(XCALL) {
            return Ok(StacksEventPage::default());
        }
        let head = self.chain.height()?;
        let events: Vec<_> = self
            .chain
            .txs(0, head)?
            .iter()
            .rev()
            .flat_map(|tx| self.logs(tx).into_iter().rev())
            .skip(offset)
            .take(limit)
            .collect();
        Ok(StacksEventPage {
            fetched: events.len(),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChainKind;

    fn pair(kind: ChainKind) -> (SimNetwork, Nid, Nid) {
        let net = SimNetwork::new();
        let a = net.add_chain(kind, "src").nid;
        let b = net.add_chain(ChainKind::Evm, "dst").nid;
        (net, a, b)
    }

    #[tokio::test]
    async fn test_evm_receipt_carries_sent_event() {
        let (net, a, b) = pair(ChainKind::Evm);
        let ledger = SimEvm::new(net.clone(), &a).unwrap();
        let info = net.chain_info(&a).unwrap();
        let call = EvmCall {
            to: info.contracts.get(DAPP).unwrap().to_string(),
            input: evm_codec::send_message_call(
                &NetworkAddress::new(b, "0xdapp"),
                &Payload::from("hi"),
                None,
            ),
        };
        let hash = ledger.send_transaction(&SignerKey::new("k"), call).await.unwrap();
        let receipt = ledger.transaction_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, 1);
        assert_eq!(receipt.logs.len(), 1);
        assert!(matches!(
            evm_codec::decode_log(&receipt.logs[0]),
            Some(Ok(XCallEvent::CallMessageSent { .. }))
        ));
    }

    #[tokio::test]
    async fn test_wrong_contract_is_rejected() {
        let (net, a, _) = pair(ChainKind::Icon);
        let ledger = SimIcon::new(net, &a).unwrap();
        let call = icon_codec::execute_rollback_call("cxnotxcall", SerialNo::from_u64(1));
        let err = ledger.send_call(&SignerKey::new("k"), call).await.unwrap_err();
        assert!(matches!(err, XCallError::Rpc { .. }));
    }

    #[tokio::test]
    async fn test_cosmos_search_by_attribute() {
        let (net, a, _) = pair(ChainKind::Cosmos);
        let ledger = SimCosmos::new(net.clone(), &a).unwrap().with_base64_attributes();
        let xcall = net.chain_info(&a).unwrap().contracts.get(XCALL).unwrap().to_string();
        for sn in [1u64, 2] {
            net.inject_event(&a, XCallEvent::RollbackMessage { sn: SerialNo::from_u64(sn) })
                .unwrap();
        }
        let query = CosmosEventQuery {
            event_type: cosmos_codec::event_type(EventKind::RollbackMessage),
            contract: xcall,
            attribute: Some(("sn".into(), "2".into())),
            min_height: 0,
            max_height: None,
        };
        let found = ledger.tx_search(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            cosmos_codec::decode_event(&found[0].events[0]).unwrap().unwrap(),
            XCallEvent::RollbackMessage { sn: SerialNo::from_u64(2) }
        );
    }

    #[tokio::test]
    async fn test_stacks_pages_contract_events() {
        let (net, a, _) = pair(ChainKind::Stacks);
        let ledger = SimStacks::new(net.clone(), &a).unwrap();
        let xcall = net.chain_info(&a).unwrap().contracts.get(XCALL).unwrap().to_string();
        for sn in 1..=3u64 {
            net.inject_event(&a, XCallEvent::RollbackExecuted { sn: SerialNo::from_u64(sn) })
                .unwrap();
        }
        let newest = ledger.contract_events(&xcall, 0, 1).await.unwrap();
        assert!(newest.events[0].repr.contains("(sn u3)"));
        let page = ledger.contract_events(&xcall, 1, 1).await.unwrap();
        assert_eq!(page.fetched, 1);
        assert!(page.events[0].repr.contains("(sn u2)"));
    }

    #[tokio::test]
    async fn test_solana_failure_carries_anchor_error() {
        let (net, a, _) = pair(ChainKind::Solana);
        let ledger = SimSolana::new(net.clone(), &a).unwrap();
        let xcall = net.chain_info(&a).unwrap().contracts.get(XCALL).unwrap().to_string();
        let ix = SolanaInstruction {
            program_id: xcall.clone(),
            accounts: vec![xcall],
            data: solana_codec::instruction_data("execute_rollback", &ExecuteRollbackArgs { sn: 4 })
                .unwrap(),
        };
        let sig = ledger.send_instruction(&SignerKey::new("k"), ix).await.unwrap();
        let tx = ledger.transaction(&sig).await.unwrap().unwrap();
        assert!(tx.err.unwrap().contains("custom program error: 0x1776"));
        assert!(tx.log_messages.iter().any(|l| l.contains("RollbackNotEnabled")));
    }

    #[test]
    fn test_sui_abort_message_shape() {
        let msg = abort_message("0xabc", SimFailure::MaxDataSizeExceeded);
        assert!(msg.starts_with("MoveAbort(MoveLocation"));
        assert!(msg.ends_with(", 1) in command 0"));
    }
}
