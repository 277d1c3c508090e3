//! # Inbound Port
//!
//! The capability contract every ledger adapter satisfies.

use crate::algorithms::{CorrelationContext, EventWaiter};
use crate::config::CorrelationSettings;
use crate::domain::{
    CallExecuted, CallMessage, ChainInfo, ChainKind, EventKind, EventMatcher, EventQuery,
    NetworkAddress, Nid, ObservedEvent, Payload, RequestId, ResponseCode, Result, SendReceipt,
    SerialNo, SignerKey, TxOutcome, XCallError, XCallEvent, XCallResponse, XCALL,
};
use crate::service::XCallOrchestrator;
use async_trait::async_trait;

/// One chain under test.
///
/// Implementors provide the send path and an [`EventWaiter`]; every `find_*`
/// operation is derived from those.
#[async_trait]
pub trait XCallChain: Send + Sync {
    /// Identity and registry.
    fn info(&self) -> &ChainInfo;

    /// Correlation timing for this chain.
    fn settings(&self) -> &CorrelationSettings;

    /// Correlation strategy for this chain.
    fn event_waiter(&self) -> &dyn EventWaiter;

    /// Network identifier.
    fn nid(&self) -> &Nid {
        &self.info().nid
    }

    /// Ledger family.
    fn kind(&self) -> ChainKind {
        self.info().kind
    }

    /// Registered contract address.
    fn get_contract_address(&self, name: &str) -> Result<String> {
        self.info().contracts.get(name).map(str::to_string)
    }

    /// Latest (or finalized) height. Non-decreasing on a healthy chain.
    async fn height(&self) -> Result<u64>;

    /// Send `data` to `destination` through the registered dapp, wait for
    /// inclusion and extract `sn` from `CallMessageSent`.
    async fn send_packet_xcall(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        destination: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<SendReceipt>;

    /// Execute an admitted message on this (destination) chain.
    async fn execute_call(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        req_id: RequestId,
        data: &Payload,
    ) -> Result<TxOutcome>;

    /// Execute an executable rollback on this (source) chain.
    async fn execute_rollback(
        &self,
        ctx: &CorrelationContext,
        signer: &SignerKey,
        sn: SerialNo,
    ) -> Result<TxOutcome>;

    /// Wait for an xCall-contract event of `kind` at or above `start_height`.
    async fn wait_for(
        &self,
        ctx: &CorrelationContext,
        kind: EventKind,
        start_height: u64,
        matcher: EventMatcher,
    ) -> Result<ObservedEvent> {
        let contract = self.get_contract_address(XCALL)?;
        let query = EventQuery::new(kind, contract, start_height, matcher);
        self.event_waiter().wait_for_event(ctx, &query).await
    }

    /// Correlate `CallMessage(from, to, sn)`.
    async fn find_call_message(
        &self,
        ctx: &CorrelationContext,
        start_height: u64,
        from: &str,
        to: &str,
        sn: SerialNo,
    ) -> Result<CallMessage> {
        let matcher = EventMatcher::by_sn(sn).with_from(from).with_to(to);
        let observed = self
            .wait_for(ctx, EventKind::CallMessage, start_height, matcher)
            .await?;
        match observed.event {
            XCallEvent::CallMessage {
                from,
                to,
                sn,
                req_id,
                data,
            } => Ok(CallMessage {
                req_id,
                sn,
                data,
                from,
                to,
                height: observed.height,
                tx_id: observed.tx_id,
            }),
            other => Err(unexpected(self.nid(), EventKind::CallMessage, &other)),
        }
    }

    /// Correlate `ResponseMessage(sn)` and return its code.
    async fn find_call_response(
        &self,
        ctx: &CorrelationContext,
        start_height: u64,
        sn: SerialNo,
    ) -> Result<ResponseCode> {
        let observed = self
            .wait_for(ctx, EventKind::ResponseMessage, start_height, EventMatcher::by_sn(sn))
            .await?;
        match observed.event {
            XCallEvent::ResponseMessage { code, .. } => Ok(code),
            other => Err(unexpected(self.nid(), EventKind::ResponseMessage, &other)),
        }
    }

    /// Correlate `RollbackMessage(sn)`.
    async fn find_rollback_message(
        &self,
        ctx: &CorrelationContext,
        start_height: u64,
        sn: SerialNo,
    ) -> Result<SerialNo> {
        let observed = self
            .wait_for(ctx, EventKind::RollbackMessage, start_height, EventMatcher::by_sn(sn))
            .await?;
        observed
            .event
            .sn()
            .ok_or_else(|| unexpected(self.nid(), EventKind::RollbackMessage, &observed.event))
    }

    /// Correlate `RollbackExecuted(sn)`.
    async fn find_rollback_executed_message(
        &self,
        ctx: &CorrelationContext,
        start_height: u64,
        sn: SerialNo,
    ) -> Result<SerialNo> {
        let observed = self
            .wait_for(ctx, EventKind::RollbackExecuted, start_height, EventMatcher::by_sn(sn))
            .await?;
        observed
            .event
            .sn()
            .ok_or_else(|| unexpected(self.nid(), EventKind::RollbackExecuted, &observed.event))
    }

    /// Correlate `CallExecuted(reqId)`.
    async fn find_call_executed(
        &self,
        ctx: &CorrelationContext,
        start_height: u64,
        req_id: RequestId,
    ) -> Result<CallExecuted> {
        let observed = self
            .wait_for(ctx, EventKind::CallExecuted, start_height, EventMatcher::by_req_id(req_id))
            .await?;
        match observed.event {
            XCallEvent::CallExecuted { req_id, code, msg } => Ok(CallExecuted {
                req_id,
                code,
                msg,
                height: observed.height,
            }),
            other => Err(unexpected(self.nid(), EventKind::CallExecuted, &other)),
        }
    }

    /// Send on this chain and correlate the delivery on `target`.
    async fn xcall(
        &self,
        ctx: &CorrelationContext,
        target: &dyn XCallChain,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<XCallResponse> {
        XCallOrchestrator::new()
            .xcall(ctx, self, target, signer, to, data, rollback)
            .await
    }
}

fn unexpected(nid: &Nid, wanted: EventKind, got: &XCallEvent) -> XCallError {
    XCallError::decode(
        nid.as_str(),
        wanted.signature(),
        format!("waiter returned {}", got.kind()),
    )
}
