//! In-process xCall network shared by every simulated ledger.
//!
//! Each applied transaction is its own block. Delivery between chains is
//! instant unless the receiving chain is paused, in which case operations
//! are held and applied in order on unpause.

use crate::domain::{
    ChainInfo, ChainKind, ContractRegistryBuilder, EventKind, NetworkAddress, Nid, Payload,
    RequestId, ResponseCode, Result, SerialNo, XCallError, XCallEvent, DAPP, XCALL,
};
use crate::ports::NodeControl;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Largest payload the xCall contract accepts.
pub const MAX_DATA_SIZE: usize = 2048;

/// Largest rollback payload the xCall contract accepts.
pub const MAX_ROLLBACK_SIZE: usize = 1024;

/// Payload the simulated dapp rejects, forcing a failed execution.
pub const FAILING_PAYLOAD: &[u8] = b"rollback";

/// Object ids registered for Sui chains.
pub const SUI_OBJECTS: [&str; 2] = [
    crate::adapters::sui::XCALL_STORAGE,
    crate::adapters::sui::DAPP_STATE,
];

/// Contract-level rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimFailure {
    /// Payload above [`MAX_DATA_SIZE`]
    MaxDataSizeExceeded,
    /// Rollback above [`MAX_ROLLBACK_SIZE`]
    MaxRollbackSizeExceeded,
    /// Destination network not connected
    UnknownNetwork,
    /// No admitted message under the request id
    InvalidRequestId,
    /// Payload differs from the admitted message
    DataMismatch,
    /// Rollback not executable for the serial number
    RollbackNotEnabled,
}

impl SimFailure {
    /// Contract error number.
    pub fn code(&self) -> u32 {
        match self {
            SimFailure::MaxDataSizeExceeded => 1,
            SimFailure::MaxRollbackSizeExceeded => 2,
            SimFailure::UnknownNetwork => 3,
            SimFailure::InvalidRequestId => 4,
            SimFailure::DataMismatch => 5,
            SimFailure::RollbackNotEnabled => 6,
        }
    }

    /// Contract error name.
    pub fn name(&self) -> &'static str {
        match self {
            SimFailure::MaxDataSizeExceeded => "MaxDataSizeExceeded",
            SimFailure::MaxRollbackSizeExceeded => "MaxRollbackSizeExceeded",
            SimFailure::UnknownNetwork => "UnknownNetwork",
            SimFailure::InvalidRequestId => "InvalidRequestId",
            SimFailure::DataMismatch => "DataMismatch",
            SimFailure::RollbackNotEnabled => "RollbackNotEnabled",
        }
    }
}

/// Something the xCall contract logged in a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimRecord {
    /// Well-formed event
    Event(XCallEvent),
    /// Event of this kind whose fields do not decode
    Malformed(EventKind),
}

/// An applied transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimTx {
    /// Family-formatted transaction id
    pub hash: String,
    /// Block it was applied in
    pub height: u64,
    /// Set when the contract rejected it
    pub failure: Option<SimFailure>,
    /// xCall contract logs
    pub records: Vec<SimRecord>,
}

impl SimTx {
    /// Well-formed events of this transaction.
    pub fn events(&self) -> impl Iterator<Item = &XCallEvent> {
        self.records.iter().filter_map(|r| match r {
            SimRecord::Event(e) => Some(e),
            SimRecord::Malformed(_) => None,
        })
    }
}

/// A decoded contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimCall {
    /// Dapp send
    Send {
        /// Destination endpoint
        to: NetworkAddress,
        /// Payload
        data: Payload,
        /// Rollback payload
        rollback: Option<Payload>,
    },
    /// Execute an admitted message
    ExecuteCall {
        /// Request id
        req_id: RequestId,
        /// Payload
        data: Payload,
    },
    /// Execute an enabled rollback
    ExecuteRollback {
        /// Serial number
        sn: SerialNo,
    },
}

#[derive(Clone, Debug)]
enum Delivery {
    Message {
        sn: SerialNo,
        from: String,
        to: String,
        data: Payload,
        rollback: bool,
    },
    Response {
        sn: SerialNo,
        code: ResponseCode,
    },
}

#[derive(Clone, Debug)]
enum Op {
    Call { call: SimCall, hash: String },
    Deliver(Delivery),
}

#[derive(Clone, Debug)]
struct Admitted {
    sn: SerialNo,
    source: Nid,
    data: Payload,
    rollback: bool,
}

#[derive(Clone, Debug)]
struct Outgoing {
    enabled: bool,
}

struct ChainState {
    info: ChainInfo,
    height: u64,
    nonce: u64,
    next_sn: u64,
    next_req_id: u64,
    txs: Vec<SimTx>,
    admitted: HashMap<RequestId, Admitted>,
    outgoing: HashMap<SerialNo, Outgoing>,
    paused: bool,
    held: Vec<Op>,
}

impl ChainState {
    fn new(info: ChainInfo) -> Self {
        Self {
            info,
            height: 1,
            nonce: 0,
            next_sn: 1,
            next_req_id: 1,
            txs: Vec::new(),
            admitted: HashMap::new(),
            outgoing: HashMap::new(),
            paused: false,
            held: Vec::new(),
        }
    }

    fn next_hash(&mut self) -> String {
        self.nonce += 1;
        let digest = Sha256::digest(format!("{}:{}", self.info.nid, self.nonce).as_bytes());
        format_hash(self.info.kind, &digest)
    }

    fn push(&mut self, hash: String, failure: Option<SimFailure>, records: Vec<SimRecord>) -> SimTx {
        self.height += 1;
        let tx = SimTx {
            hash,
            height: self.height,
            failure,
            records,
        };
        self.txs.push(tx.clone());
        tx
    }

    fn address(&self, name: &str) -> String {
        self.info
            .contracts
            .get(name)
            .map(str::to_string)
            .unwrap_or_default()
    }
}

fn format_hash(kind: ChainKind, digest: &[u8]) -> String {
    let hex = hex::encode(digest);
    match kind {
        ChainKind::Evm | ChainKind::Icon | ChainKind::Sui | ChainKind::Stacks => format!("0x{}", hex),
        ChainKind::Cosmos => hex.to_uppercase(),
        ChainKind::Solana | ChainKind::Stellar => hex,
    }
}

/// Contract addresses in the family's native shape.
fn contract_address(kind: ChainKind, nid: &str, name: &str) -> String {
    let hex = hex::encode(Sha256::digest(format!("{}/{}", nid, name).as_bytes()));
    match kind {
        ChainKind::Evm => format!("0x{}", &hex[..40]),
        ChainKind::Cosmos => format!("archway1{}", &hex[..38]),
        ChainKind::Icon => format!("cx{}", &hex[..40]),
        ChainKind::Solana => hex,
        ChainKind::Stellar => format!("C{}", hex[..55].to_uppercase()),
        ChainKind::Sui => format!("0x{}", hex),
        ChainKind::Stacks => format!("ST{}.{}", hex[..38].to_uppercase(), name),
    }
}

#[derive(Default)]
struct State {
    chains: HashMap<Nid, ChainState>,
}

impl State {
    fn chain(&mut self, nid: &Nid) -> Result<&mut ChainState> {
        self.chains
            .get_mut(nid)
            .ok_or_else(|| XCallError::rpc(nid.as_str(), "unknown chain"))
    }

    /// Apply `op` on `nid` and everything it triggers on other chains.
    fn apply(&mut self, nid: &Nid, op: Op, applied: &mut Vec<(Nid, SimTx)>) {
        let mut follow_ups = Vec::new();
        let known: HashSet<Nid> = self.chains.keys().cloned().collect();
        {
            let Some(chain) = self.chains.get_mut(nid) else {
                return;
            };
            if chain.paused {
                chain.held.push(op);
                return;
            }
            let tx = match op {
                Op::Call { call, hash } => apply_call(chain, &known, call, hash, &mut follow_ups),
                Op::Deliver(delivery) => apply_delivery(chain, delivery),
            };
            debug!(chain = %nid, tx = %tx.hash, height = tx.height, "Applied simulated transaction");
            applied.push((nid.clone(), tx));
        }
        for (target, delivery) in follow_ups {
            self.apply(&target, Op::Deliver(delivery), applied);
        }
    }
}

fn apply_call(
    chain: &mut ChainState,
    known: &HashSet<Nid>,
    call: SimCall,
    hash: String,
    follow_ups: &mut Vec<(Nid, Delivery)>,
) -> SimTx {
    match call {
        SimCall::Send { to, data, rollback } => {
            if data.len() > MAX_DATA_SIZE {
                return chain.push(hash, Some(SimFailure::MaxDataSizeExceeded), vec![]);
            }
            if rollback.as_ref().is_some_and(|r| r.len() > MAX_ROLLBACK_SIZE) {
                return chain.push(hash, Some(SimFailure::MaxRollbackSizeExceeded), vec![]);
            }
            if !known.contains(&to.nid) {
                return chain.push(hash, Some(SimFailure::UnknownNetwork), vec![]);
            }
            let sn = SerialNo::from_u64(chain.next_sn);
            chain.next_sn += 1;
            if rollback.is_some() {
                chain.outgoing.insert(sn, Outgoing { enabled: false });
            }
            let dapp = chain.address(DAPP);
            follow_ups.push((
                to.nid.clone(),
                Delivery::Message {
                    sn,
                    from: format!("{}/{}", chain.info.nid, dapp),
                    to: to.account.clone(),
                    data,
                    rollback: rollback.is_some(),
                },
            ));
            let sent = XCallEvent::CallMessageSent {
                from: Some(dapp),
                to: Some(to.to_string()),
                sn,
            };
            chain.push(hash, None, vec![SimRecord::Event(sent)])
        }
        SimCall::ExecuteCall { req_id, data } => {
            let Some(admitted) = chain.admitted.get(&req_id).cloned() else {
                return chain.push(hash, Some(SimFailure::InvalidRequestId), vec![]);
            };
            if admitted.data != data {
                return chain.push(hash, Some(SimFailure::DataMismatch), vec![]);
            }
            chain.admitted.remove(&req_id);
            let (code, msg) = if data.as_bytes() == FAILING_PAYLOAD {
                (ResponseCode::FAILURE, "rollback".to_string())
            } else {
                (ResponseCode::SUCCESS, String::new())
            };
            if admitted.rollback {
                follow_ups.push((
                    admitted.source.clone(),
                    Delivery::Response {
                        sn: admitted.sn,
                        code,
                    },
                ));
            }
            let executed = XCallEvent::CallExecuted { req_id, code, msg };
            chain.push(hash, None, vec![SimRecord::Event(executed)])
        }
        SimCall::ExecuteRollback { sn } => match chain.outgoing.get(&sn) {
            Some(Outgoing { enabled: true }) => {
                chain.outgoing.remove(&sn);
                chain.push(
                    hash,
                    None,
                    vec![SimRecord::Event(XCallEvent::RollbackExecuted { sn })],
                )
            }
            _ => chain.push(hash, Some(SimFailure::RollbackNotEnabled), vec![]),
        },
    }
}

fn apply_delivery(chain: &mut ChainState, delivery: Delivery) -> SimTx {
    let hash = chain.next_hash();
    match delivery {
        Delivery::Message {
            sn,
            from,
            to,
            data,
            rollback,
        } => {
            let req_id = RequestId::from_u64(chain.next_req_id);
            chain.next_req_id += 1;
            let source = from
                .split_once('/')
                .map(|(nid, _)| Nid::new(nid))
                .unwrap_or_else(|| Nid::new(""));
            chain.admitted.insert(
                req_id,
                Admitted {
                    sn,
                    source,
                    data: data.clone(),
                    rollback,
                },
            );
            let message = XCallEvent::CallMessage {
                from: Some(from),
                to: Some(to),
                sn,
                req_id,
                data,
            };
            chain.push(hash, None, vec![SimRecord::Event(message)])
        }
        Delivery::Response { sn, code } => {
            let mut records = vec![SimRecord::Event(XCallEvent::ResponseMessage { sn, code })];
            if code.is_success() {
                chain.outgoing.remove(&sn);
            } else if let Some(outgoing) = chain.outgoing.get_mut(&sn) {
                outgoing.enabled = true;
                records.push(SimRecord::Event(XCallEvent::RollbackMessage { sn }));
            }
            chain.push(hash, None, records)
        }
    }
}

/// Shared simulated network. Clones share state.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<State>>,
    applied: broadcast::Sender<(Nid, SimTx)>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    /// Empty network.
    pub fn new() -> Self {
        let (applied, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            applied,
        }
    }

    /// Deploy xCall and the test dapp on a new chain.
    pub fn add_chain(&self, kind: ChainKind, nid: &str) -> ChainInfo {
        let mut builder = ContractRegistryBuilder::new(Nid::new(nid))
            .register(XCALL, contract_address(kind, nid, XCALL))
            .register(DAPP, contract_address(kind, nid, DAPP));
        if kind == ChainKind::Sui {
            for object in SUI_OBJECTS {
                builder = builder.register(object, contract_address(kind, nid, object));
            }
        }
        let info = ChainInfo::new(kind, builder.build());
        self.state
            .lock()
            .chains
            .insert(info.nid.clone(), ChainState::new(info.clone()));
        info
    }

    /// Identity and registry of `nid`.
    pub fn chain_info(&self, nid: &Nid) -> Result<ChainInfo> {
        Ok(self.state.lock().chain(nid)?.info.clone())
    }

    /// Current height of `nid`.
    pub fn height(&self, nid: &Nid) -> Result<u64> {
        Ok(self.state.lock().chain(nid)?.height)
    }

    /// Accept `call` on `nid` and return its transaction id. Paused chains
    /// hold the call until unpaused.
    pub fn submit(&self, nid: &Nid, call: SimCall) -> Result<String> {
        let mut applied = Vec::new();
        let hash = {
            let mut state = self.state.lock();
            let hash = state.chain(nid)?.next_hash();
            state.apply(
                nid,
                Op::Call {
                    call,
                    hash: hash.clone(),
                },
                &mut applied,
            );
            hash
        };
        self.publish(applied);
        Ok(hash)
    }

    /// Applied transaction by id, `None` while held or unknown.
    pub fn transaction(&self, nid: &Nid, hash: &str) -> Result<Option<SimTx>> {
        let mut state = self.state.lock();
        Ok(state.chain(nid)?.txs.iter().find(|tx| tx.hash == hash).cloned())
    }

    /// Applied transactions in `[from, to]`, ascending.
    pub fn transactions(&self, nid: &Nid, from: u64, to: u64) -> Result<Vec<SimTx>> {
        let mut state = self.state.lock();
        Ok(state
            .chain(nid)?
            .txs
            .iter()
            .filter(|tx| tx.height >= from && tx.height <= to)
            .cloned()
            .collect())
    }

    /// Every applied transaction as it lands.
    pub fn subscribe(&self) -> broadcast::Receiver<(Nid, SimTx)> {
        self.applied.subscribe()
    }

    /// Stop applying operations on `nid`.
    pub fn pause_chain(&self, nid: &Nid) -> Result<()> {
        self.state.lock().chain(nid)?.paused = true;
        Ok(())
    }

    /// Resume `nid` and apply everything held while paused.
    pub fn unpause_chain(&self, nid: &Nid) -> Result<()> {
        let mut applied = Vec::new();
        {
            let mut state = self.state.lock();
            let chain = state.chain(nid)?;
            chain.paused = false;
            let held = std::mem::take(&mut chain.held);
            for op in held {
                state.apply(nid, op, &mut applied);
            }
        }
        self.publish(applied);
        Ok(())
    }

    /// Whether `nid` is paused.
    pub fn is_paused(&self, nid: &Nid) -> Result<bool> {
        Ok(self.state.lock().chain(nid)?.paused)
    }

    /// Produce `blocks` empty blocks on `nid`.
    pub fn advance(&self, nid: &Nid, blocks: u64) -> Result<u64> {
        let mut state = self.state.lock();
        let chain = state.chain(nid)?;
        chain.height += blocks;
        Ok(chain.height)
    }

    /// Log `event` from the xCall contract in a new transaction, bypassing
    /// contract rules and pauses.
    pub fn inject_event(&self, nid: &Nid, event: XCallEvent) -> Result<SimTx> {
        self.inject(nid, SimRecord::Event(event))
    }

    /// Log an undecodable event of `kind` in a new transaction.
    pub fn inject_malformed(&self, nid: &Nid, kind: EventKind) -> Result<SimTx> {
        self.inject(nid, SimRecord::Malformed(kind))
    }

    fn inject(&self, nid: &Nid, record: SimRecord) -> Result<SimTx> {
        let tx = {
            let mut state = self.state.lock();
            let chain = state.chain(nid)?;
            let hash = chain.next_hash();
            chain.push(hash, None, vec![record])
        };
        self.publish(vec![(nid.clone(), tx.clone())]);
        Ok(tx)
    }

    fn publish(&self, applied: Vec<(Nid, SimTx)>) {
        for item in applied {
            // No subscribers is fine.
            let _ = self.applied.send(item);
        }
    }
}

#[async_trait]
impl NodeControl for SimNetwork {
    async fn pause(&self, nid: &Nid) -> Result<()> {
        self.pause_chain(nid)
    }

    async fn unpause(&self, nid: &Nid) -> Result<()> {
        self.unpause_chain(nid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SimNetwork, Nid, Nid) {
        let net = SimNetwork::new();
        let a = net.add_chain(ChainKind::Evm, "0x2.evm").nid;
        let b = net.add_chain(ChainKind::Icon, "0x2.icon").nid;
        (net, a, b)
    }

    fn send(to: &Nid, data: &str, rollback: Option<&str>) -> SimCall {
        SimCall::Send {
            to: NetworkAddress::new(to.clone(), "cxdapp"),
            data: Payload::from(data),
            rollback: rollback.map(Payload::from),
        }
    }

    #[test]
    fn test_send_delivers_call_message() {
        let (net, a, b) = pair();
        let hash = net.submit(&a, send(&b, "hello", None)).unwrap();
        let sent = net.transaction(&a, &hash).unwrap().unwrap();
        assert!(sent.failure.is_none());

        let delivered = net.transactions(&b, 0, u64::MAX).unwrap();
        assert_eq!(delivered.len(), 1);
        match delivered[0].events().next() {
            Some(XCallEvent::CallMessage { sn, from, data, .. }) => {
                assert_eq!(*sn, SerialNo::from_u64(1));
                assert!(from.as_deref().unwrap().starts_with("0x2.evm/0x"));
                assert_eq!(data, &Payload::from("hello"));
            }
            other => panic!("expected CallMessage, got {:?}", other),
        };
    }

    #[test]
    fn test_oversized_payload_fails() {
        let (net, a, b) = pair();
        let data = "x".repeat(MAX_DATA_SIZE + 1);
        let hash = net.submit(&a, send(&b, &data, None)).unwrap();
        let tx = net.transaction(&a, &hash).unwrap().unwrap();
        assert_eq!(tx.failure, Some(SimFailure::MaxDataSizeExceeded));
        assert!(net.transactions(&b, 0, u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_pause_holds_delivery() {
        let (net, a, b) = pair();
        net.pause_chain(&b).unwrap();
        let before = net.height(&b).unwrap();
        net.submit(&a, send(&b, "held", None)).unwrap();
        assert_eq!(net.height(&b).unwrap(), before);

        net.unpause_chain(&b).unwrap();
        assert_eq!(net.height(&b).unwrap(), before + 1);
    }

    #[test]
    fn test_failed_execution_enables_rollback() {
        let (net, a, b) = pair();
        net.submit(&a, send(&b, "rollback", Some("undo"))).unwrap();
        let req_id = RequestId::from_u64(1);
        net.submit(
            &b,
            SimCall::ExecuteCall {
                req_id,
                data: Payload::from("rollback"),
            },
        )
        .unwrap();

        let source: Vec<XCallEvent> = net
            .transactions(&a, 0, u64::MAX)
            .unwrap()
            .iter()
            .flat_map(|tx| tx.events().cloned().collect::<Vec<_>>())
            .collect();
        let sn = SerialNo::from_u64(1);
        assert!(source.contains(&XCallEvent::ResponseMessage {
            sn,
            code: ResponseCode::FAILURE
        }));
        assert!(source.contains(&XCallEvent::RollbackMessage { sn }));

        let hash = net.submit(&a, SimCall::ExecuteRollback { sn }).unwrap();
        let tx = net.transaction(&a, &hash).unwrap().unwrap();
        assert_eq!(
            tx.events().next(),
            Some(&XCallEvent::RollbackExecuted { sn })
        );

        let again = net.submit(&a, SimCall::ExecuteRollback { sn }).unwrap();
        let tx = net.transaction(&a, &again).unwrap().unwrap();
        assert_eq!(tx.failure, Some(SimFailure::RollbackNotEnabled));
    }

    #[test]
    fn test_execute_unknown_request_fails() {
        let (net, _, b) = pair();
        let hash = net
            .submit(
                &b,
                SimCall::ExecuteCall {
                    req_id: RequestId::from_u64(99),
                    data: Payload::from("x"),
                },
            )
            .unwrap();
        let tx = net.transaction(&b, &hash).unwrap().unwrap();
        assert_eq!(tx.failure, Some(SimFailure::InvalidRequestId));
    }
}
