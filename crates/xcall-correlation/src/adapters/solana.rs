//! # Solana Adapter
//!
//! Anchor xCall programs over a [`SolanaLedger`]. Instructions and events
//! are an 8-byte discriminator followed by Borsh; events are read back from
//! `Program data:` log lines.

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
use crate::ports::ledgers::{SolanaInstruction, SolanaLedger, SolanaTransaction};
use crate::ports::XCallChain;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Log prefix Anchor uses for emitted events.
pub const PROGRAM_DATA: &str = "Program data: ";

/// Signatures requested per `getSignaturesForAddress` call.
const SIGNATURE_PAGE: usize = 1000;

/// Anchor discriminator: first 8 bytes of `sha256("<namespace>:<name>")`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// `send_call_message` arguments.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SendCallMessageArgs {
    /// Destination network address
    pub to: String,
    /// Payload
    pub data: Vec<u8>,
    /// Rollback payload
    pub rollback: Option<Vec<u8>>,
}

/// `execute_call` arguments.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExecuteCallArgs {
    /// Request id
    pub req_id: u128,
    /// Payload
    pub data: Vec<u8>,
}

/// `execute_rollback` arguments.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExecuteRollbackArgs {
    /// Serial number
    pub sn: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CallMessageSentEvent {
    from: [u8; 32],
    to: String,
    sn: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CallMessageEvent {
    from: String,
    to: String,
    sn: u128,
    req_id: u128,
    data: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct ResponseMessageEvent {
    sn: u128,
    code: u8,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct SnEvent {
    sn: u128,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CallExecutedEvent {
    req_id: u128,
    code: u8,
    msg: String,
}

/// Instruction data: discriminator then Borsh arguments.
pub fn instruction_data<T: BorshSerialize>(name: &str, args: &T) -> Result<Vec<u8>> {
    let mut data = discriminator("global", name).to_vec();
    data.extend(borsh::to_vec(args).map_err(|e| XCallError::InvalidValue(e.to_string()))?);
    Ok(data)
}

fn narrow(value: primitive_types::U256, what: &str) -> Result<u128> {
    if value.bits() > 128 {
        return Err(XCallError::InvalidValue(format!("{} {} exceeds u128", what, value)));
    }
    Ok(value.low_u128())
}

fn kind_of(disc: &[u8]) -> Option<EventKind> {
    EventKind::ALL
        .into_iter()
        .find(|k| discriminator("event", k.signature()) == disc)
}

fn borsh_err(e: std::io::Error) -> String {
    e.to_string()
}

fn event_bytes(line: &str) -> Option<(EventKind, Vec<u8>)> {
    let encoded = line.strip_prefix(PROGRAM_DATA)?;
    let bytes = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let kind = kind_of(bytes.get(..8)?)?;
    Some((kind, bytes))
}

/// Logical kind of a `Program data:` line, by discriminator only.
pub fn line_kind(line: &str) -> Option<EventKind> {
    event_bytes(line).map(|(kind, _)| kind)
}

/// Decode one `Program data:` line. `None` for lines that are not xCall
/// events.
pub fn decode_log_line(line: &str) -> Option<Decoded> {
    let (kind, bytes) = event_bytes(line)?;
    let body = &bytes[8..];
    let decoded = match kind {
        EventKind::CallMessageSent => CallMessageSentEvent::try_from_slice(body)
            .map(|e| XCallEvent::CallMessageSent {
                from: Some(hex::encode(e.from)),
                to: Some(e.to),
                sn: SerialNo::from_u128(e.sn),
            })
            .map_err(borsh_err),
        EventKind::CallMessage => CallMessageEvent::try_from_slice(body)
            .map(|e| XCallEvent::CallMessage {
                from: Some(e.from),
                to: Some(e.to),
                sn: SerialNo::from_u128(e.sn),
                req_id: RequestId::from_u128(e.req_id),
                data: Payload(e.data),
            })
            .map_err(borsh_err),
        EventKind::ResponseMessage => ResponseMessageEvent::try_from_slice(body)
            .map(|e| XCallEvent::ResponseMessage {
                sn: SerialNo::from_u128(e.sn),
                code: ResponseCode(i64::from(e.code)),
            })
            .map_err(borsh_err),
        EventKind::RollbackMessage => SnEvent::try_from_slice(body)
            .map(|e| XCallEvent::RollbackMessage {
                sn: SerialNo::from_u128(e.sn),
            })
            .map_err(borsh_err),
        EventKind::RollbackExecuted => SnEvent::try_from_slice(body)
            .map(|e| XCallEvent::RollbackExecuted {
                sn: SerialNo::from_u128(e.sn),
            })
            .map_err(borsh_err),
        EventKind::CallExecuted => CallExecutedEvent::try_from_slice(body)
            .map(|e| XCallEvent::CallExecuted {
                req_id: RequestId::from_u128(e.req_id),
                code: ResponseCode(i64::from(e.code)),
                msg: e.msg,
            })
            .map_err(borsh_err),
    };
    Some(decoded)
}

/// Render a logical event as the `Program data:` line Anchor emits.
///
/// `CallMessageSent.from` is the sender's 32-byte key; values that are not
/// 64 hex digits are hashed into one.
pub fn encode_log_line(event: &XCallEvent) -> String {
    let u128_of = |v: primitive_types::U256| v.low_u128();
    let code_of = |c: ResponseCode| u8::try_from(c.0).unwrap_or(0);
    let body = match event {
        XCallEvent::CallMessageSent { from, to, sn } => {
            let from = from.as_deref().unwrap_or_default();
            let key = hex::decode(from)
                .ok()
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
                .unwrap_or_else(|| Sha256::digest(from.as_bytes()).into());
            borsh::to_vec(&CallMessageSentEvent {
                from: key,
                to: to.clone().unwrap_or_default(),
                sn: u128_of(sn.0),
            })
        }
        XCallEvent::CallMessage {
            from,
            to,
            sn,
            req_id,
            data,
        } => borsh::to_vec(&CallMessageEvent {
            from: from.clone().unwrap_or_default(),
            to: to.clone().unwrap_or_default(),
            sn: u128_of(sn.0),
            req_id: u128_of(req_id.0),
            data: data.0.clone(),
        }),
        XCallEvent::ResponseMessage { sn, code } => borsh::to_vec(&ResponseMessageEvent {
            sn: u128_of(sn.0),
            code: code_of(*code),
        }),
        XCallEvent::RollbackMessage { sn } | XCallEvent::RollbackExecuted { sn } => {
            borsh::to_vec(&SnEvent { sn: u128_of(sn.0) })
        }
        XCallEvent::CallExecuted { req_id, code, msg } => borsh::to_vec(&CallExecutedEvent {
            req_id: u128_of(req_id.0),
            code: code_of(*code),
            msg: msg.clone(),
        }),
    };
    let mut bytes = discriminator("event", event.kind().signature()).to_vec();
    bytes.extend(body.unwrap_or_default());
    format!("{}{}", PROGRAM_DATA, general_purpose::STANDARD.encode(bytes))
}

/// Custom program error code embedded in a failure description.
fn custom_error_code(err: &str) -> i64 {
    err.split("custom program error: 0x")
        .nth(1)
        .and_then(|rest| {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
            i64::from_str_radix(&digits, 16).ok()
        })
        .unwrap_or(0)
}

fn observe(tx: &SolanaTransaction, kind: EventKind) -> Vec<DecodedEvent> {
    tx.log_messages
        .iter()
        .filter(|line| line_kind(line) == Some(kind))
        .filter_map(|line| decode_log_line(line))
        .map(|decoded| match decoded {
            Ok(event) => Ok(ObservedEvent {
                height: tx.slot,
                tx_id: tx.signature.clone(),
                event,
            }),
            Err(reason) => Err(DecodeFailure {
                height: tx.slot,
                tx_id: tx.signature.clone(),
                reason,
            }),
        })
        .collect()
}

/// [`PollSource`] over the xCall program's signatures.
pub struct SolanaEventSource<L> {
    chain: String,
    ledger: Arc<L>,
    page: usize,
}

#[async_trait]
impl<L: SolanaLedger> PollSource for SolanaEventSource<L> {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn head(&self) -> Result<u64> {
        self.ledger.slot().await
    }

    async fn fetch(&self, query: &EventQuery, from: u64, to: u64) -> Result<Vec<DecodedEvent>> {
        // Pages run newest first; stop once a page reaches below the window.
        let mut signatures = Vec::new();
        let mut before: Option<String> = None;
        loop {
            let page = self
                .ledger
                .signatures_for_address(&query.contract, before.as_deref(), self.page)
                .await?;
            let exhausted = page.len() < self.page || page.last().map_or(true, |s| s.slot < from);
            before = page.last().map(|s| s.signature.clone());
            signatures.extend(
                page.into_iter()
                    .filter(|s| s.err.is_none() && s.slot >= from && s.slot <= to),
            );
            if exhausted {
                break;
            }
        }
        signatures.reverse();
        signatures.sort_by_key(|s| s.slot);

        let mut events = Vec::new();
        for info in signatures {
            if let Some(tx) = self.ledger.transaction(&info.signature).await? {
                events.extend(observe(&tx, query.kind));
            }
        }
        Ok(events)
    }
}

/// Solana chain adapter.
pub struct SolanaChain<L> {
    info: ChainInfo,
    settings: CorrelationSettings,
    ledger: Arc<L>,
    waiter: PollingWaiter<SolanaEventSource<L>>,
}

impl<L: SolanaLedger + 'static> SolanaChain<L> {
    /// Adapter over `ledger`.
    pub fn new(info: ChainInfo, settings: CorrelationSettings, ledger: Arc<L>) -> Self {
        let source = SolanaEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::clone(&ledger),
            page: SIGNATURE_PAGE,
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
        ix: SolanaInstruction,
    ) -> Result<SolanaTransaction> {
        let chain = self.info.nid.as_str();
        let signature = self.ledger.send_instruction(signer, ix).await?;
        debug!(chain, tx = %signature, "Submitted instruction");
        let tx = await_inclusion(ctx, chain, &signature, self.settings.poll_interval, || {
            self.ledger.transaction(&signature)
        })
        .await?;
        if let Some(err) = &tx.err {
            let mut log = err.clone();
            for line in &tx.log_messages {
                log.push('\n');
                log.push_str(line);
            }
            return Err(XCallError::Submission {
                chain: chain.to_string(),
                code: custom_error_code(err),
                log,
            });
        }
        Ok(tx)
    }

    fn instruction(&self, program: &str, data: Vec<u8>) -> Result<SolanaInstruction> {
        Ok(SolanaInstruction {
            program_id: program.to_string(),
            accounts: vec![self.get_contract_address(XCALL)?],
            data,
        })
    }
}

#[async_trait]
impl<L: SolanaLedger + 'static> XCallChain for SolanaChain<L> {
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
        self.ledger.slot().await
    }

    async fn send_packet_xcall(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        destination: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<SendReceipt> {
        let args = SendCallMessageArgs {
            to: destination.to_string(),
            data: data.0.clone(),
            rollback: rollback.map(|r| r.0.clone()),
        };
        let dapp = self.get_contract_address(DAPP)?;
        let ix = self.instruction(&dapp, instruction_data("send_call_message", &args)?)?;
        let tx = self.submit(ctx, signer, ix).await?;
        let sn = extract_sn(
            self.info.nid.as_str(),
            &tx.signature,
            tx.log_messages.iter().filter_map(|l| decode_log_line(l)),
        )?;
        Ok(SendReceipt {
            sn,
            tx_id: tx.signature,
            height: tx.slot,
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
        let args = ExecuteCallArgs {
            req_id: narrow(req_id.0, "request id")?,
            data: data.0.clone(),
        };
        let xcall = self.get_contract_address(XCALL)?;
        let ix = self.instruction(&xcall, instruction_data("execute_call", &args)?)?;
        let tx = self.submit(ctx, signer, ix).await?;
        Ok(TxOutcome {
            tx_id: tx.signature,
            height: tx.slot,
        })
    }

    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome> {
        let args = ExecuteRollbackArgs {
            sn: narrow(sn.0, "serial number")?,
        };
        let xcall = self.get_contract_address(XCALL)?;
        let ix = self.instruction(&xcall, instruction_data("execute_rollback", &args)?)?;
        let tx = self.submit(ctx, signer, ix).await?;
        Ok(TxOutcome {
            tx_id: tx.signature,
            height: tx.slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_is_sha256_prefix() {
        let disc = discriminator("event", "CallMessage");
        let digest = Sha256::digest(b"event:CallMessage");
        assert_eq!(&disc[..], &digest[..8]);
        assert_ne!(disc, discriminator("global", "CallMessage"));
    }

    #[test]
    fn test_call_message_line() {
        let event = XCallEvent::CallMessage {
            from: Some("0x2.evm/0xdapp".into()),
            to: Some("DappProgram111".into()),
            sn: SerialNo::from_u64(77),
            req_id: RequestId::from_u64(5),
            data: Payload::from("hello"),
        };
        let line = encode_log_line(&event);
        assert!(line.starts_with(PROGRAM_DATA));
        assert_eq!(decode_log_line(&line).unwrap().unwrap(), event);
    }

    #[test]
    fn test_foreign_lines_are_ignored() {
        assert!(decode_log_line("Program 11111111111111111111111111111111 invoke [1]").is_none());
        let other = format!(
            "{}{}",
            PROGRAM_DATA,
            general_purpose::STANDARD.encode(discriminator("event", "Transfer"))
        );
        assert!(decode_log_line(&other).is_none());
    }

    #[test]
    fn test_truncated_body_is_decode_failure() {
        let mut bytes = discriminator("event", "RollbackExecuted").to_vec();
        bytes.extend([1, 2, 3]);
        let line = format!("{}{}", PROGRAM_DATA, general_purpose::STANDARD.encode(bytes));
        assert!(decode_log_line(&line).unwrap().is_err());
    }

    #[test]
    fn test_instruction_data_layout() {
        let args = ExecuteRollbackArgs { sn: 9 };
        let data = instruction_data("execute_rollback", &args).unwrap();
        assert_eq!(&data[..8], &discriminator("global", "execute_rollback"));
        assert_eq!(ExecuteRollbackArgs::try_from_slice(&data[8..]).unwrap(), args);
    }

    #[test]
    fn test_custom_error_code() {
        assert_eq!(
            custom_error_code("Error processing Instruction 0: custom program error: 0x1771"),
            0x1771
        );
        assert_eq!(custom_error_code("AccountNotFound"), 0);
    }

    #[tokio::test]
    async fn test_fetch_pages_back_past_newest_signatures() {
        use crate::domain::{ChainKind, EventMatcher};
        use crate::testkit::{SimNetwork, SimSolana};

        let net = SimNetwork::new();
        let info = net.add_chain(ChainKind::Solana, "solana");
        let heights: Vec<u64> = (1..=6)
            .map(|sn| {
                let sn = SerialNo::from_u64(sn);
                net.inject_event(&info.nid, XCallEvent::RollbackExecuted { sn })
                    .unwrap()
                    .height
            })
            .collect();
        let source = SolanaEventSource {
            chain: info.nid.to_string(),
            ledger: Arc::new(SimSolana::new(net.clone(), &info.nid).unwrap()),
            page: 2,
        };
        let query = EventQuery::new(
            EventKind::RollbackExecuted,
            info.contracts.get(XCALL).unwrap(),
            heights[0],
            EventMatcher::by_sn(SerialNo::from_u64(2)),
        );

        let found: Vec<_> = source
            .fetch(&query, heights[1], heights[3])
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap().height)
            .collect();
        assert_eq!(found, heights[1..=3].to_vec());
    }
}
