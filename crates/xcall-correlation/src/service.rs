//! # XCall Orchestrator
//!
//! Composes the send path on a source chain with event correlation on a
//! destination chain.
//!
//! ```text
//! Idle ──height──▶ HeightCaptured ──send──▶ Sent ──▶ Correlating ──▶ Done
//!   └──────────────────────┴────────────────┴───────────┴──────────▶ Failed
//! ```

use crate::algorithms::CorrelationContext;
use crate::domain::{
    CallExecuted, FlowPhase, NetworkAddress, Payload, Result, SerialNo, SignerKey, XCallError,
    XCallFlow, XCallResponse, DAPP,
};
use crate::ports::{NodeControl, XCallChain};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use xcall_telemetry::{SUBMISSIONS, SUBMISSION_FAILURES};

/// Outcome of the rollback flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Destination succeeded; no rollback required.
    NotRequired,
    /// Rollback executed and `RollbackExecuted(sn)` observed.
    Executed(SerialNo),
}

/// Full round trip including destination execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundTrip {
    /// Delivery result
    pub response: XCallResponse,
    /// Destination execution result
    pub executed: CallExecuted,
    /// Rollback result on the source
    pub rollback: RollbackOutcome,
}

/// Drives send-then-correlate flows.
#[derive(Clone, Default)]
pub struct XCallOrchestrator {
    node_control: Option<Arc<dyn NodeControl>>,
}

impl XCallOrchestrator {
    /// Orchestrator without node control (no flush flow).
    pub fn new() -> Self {
        Self::default()
    }

    /// Orchestrator able to pause and resume destination nodes.
    pub fn with_node_control(node_control: Arc<dyn NodeControl>) -> Self {
        Self {
            node_control: Some(node_control),
        }
    }

    /// Send `data` from `source` to `to` and correlate the `CallMessage` on
    /// `target`.
    #[allow(clippy::too_many_arguments)]
    pub async fn xcall<S, D>(
        &self,
        ctx: &CorrelationContext,
        source: &S,
        target: &D,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<XCallResponse>
    where
        S: XCallChain + ?Sized,
        D: XCallChain + ?Sized,
    {
        let mut flow = XCallFlow::new();
        let outcome = self
            .run(&mut flow, ctx, source, target, signer, to, data, rollback, None)
            .await;
        if outcome.is_err() {
            flow.fail();
        }
        outcome
    }

    /// Like [`XCallOrchestrator::xcall`], but pauses `target` after the
    /// watermark is captured, sends, holds the pause for `hold`, resumes the
    /// node and only then correlates. The node is resumed on every path.
    #[allow(clippy::too_many_arguments)]
    pub async fn xcall_with_flush<S, D>(
        &self,
        ctx: &CorrelationContext,
        source: &S,
        target: &D,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
        hold: Duration,
    ) -> Result<XCallResponse>
    where
        S: XCallChain + ?Sized,
        D: XCallChain + ?Sized,
    {
        let control = self.node_control.as_ref().ok_or_else(|| XCallError::Unsupported {
            chain: target.nid().to_string(),
            operation: "flush without node control".into(),
        })?;
        let mut flow = XCallFlow::new();
        let outcome = self
            .run(
                &mut flow,
                ctx,
                source,
                target,
                signer,
                to,
                data,
                rollback,
                Some((control.as_ref(), hold)),
            )
            .await;
        if outcome.is_err() {
            flow.fail();
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run<S, D>(
        &self,
        flow: &mut XCallFlow,
        ctx: &CorrelationContext,
        source: &S,
        target: &D,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
        flush: Option<(&dyn NodeControl, Duration)>,
    ) -> Result<XCallResponse>
    where
        S: XCallChain + ?Sized,
        D: XCallChain + ?Sized,
    {
        let watermark = target.height().await?;
        flow.height_captured(watermark)?;

        let receipt = match flush {
            Some((control, hold)) => {
                control.pause(target.nid()).await?;
                let sent = self.send(ctx, source, signer, to, data, rollback).await;
                if sent.is_ok() {
                    ctx.pause(hold).await;
                }
                let resumed = control.unpause(target.nid()).await;
                let receipt = sent?;
                resumed?;
                receipt
            }
            None => self.send(ctx, source, signer, to, data, rollback).await?,
        };
        flow.sent(receipt.sn)?;

        let from = format!("{}/{}", source.nid(), source.get_contract_address(DAPP)?);
        flow.advance(FlowPhase::Correlating)?;
        info!(
            flow = %flow.id,
            source = %source.nid(),
            target = %target.nid(),
            sn = %receipt.sn,
            watermark,
            "Correlating CallMessage"
        );

        let correlate_ctx = ctx.child(target.settings().event_timeout);
        let message = target
            .find_call_message(&correlate_ctx, watermark, &from, &to.account, receipt.sn)
            .await?;
        flow.advance(FlowPhase::Done)?;

        Ok(XCallResponse {
            serial_no: message.sn,
            request_id: message.req_id,
            data: message.data,
        })
    }

    async fn send<S>(
        &self,
        ctx: &CorrelationContext,
        source: &S,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: Option<&Payload>,
    ) -> Result<crate::domain::SendReceipt>
    where
        S: XCallChain + ?Sized,
    {
        let chain = source.nid().to_string();
        SUBMISSIONS.with_label_values(&[&chain, "send"]).inc();
        let submit_ctx = ctx.child(source.settings().submit_timeout);
        let result = source
            .send_packet_xcall(&submit_ctx, signer, to, data, rollback)
            .await;
        match &result {
            Ok(receipt) => info!(chain = %chain, sn = %receipt.sn, tx = %receipt.tx_id, "Message sent"),
            Err(e) => {
                SUBMISSION_FAILURES.with_label_values(&[&chain, "send"]).inc();
                warn!(chain = %chain, error = %e, "Send failed");
            }
        }
        result
    }

    /// Execute the admitted call on `target` and correlate `CallExecuted`.
    pub async fn execute_call<D>(
        &self,
        ctx: &CorrelationContext,
        target: &D,
        signer: &SignerKey,
        response: &XCallResponse,
    ) -> Result<CallExecuted>
    where
        D: XCallChain + ?Sized,
    {
        let chain = target.nid().to_string();
        let start = target.height().await?;
        SUBMISSIONS.with_label_values(&[&chain, "execute_call"]).inc();
        let submit_ctx = ctx.child(target.settings().submit_timeout);
        target
            .execute_call(&submit_ctx, signer, response.request_id, &response.data)
            .await
            .inspect_err(|_| {
                SUBMISSION_FAILURES
                    .with_label_values(&[&chain, "execute_call"])
                    .inc();
            })?;

        let correlate_ctx = ctx.child(target.settings().event_timeout);
        target
            .find_call_executed(&correlate_ctx, start, response.request_id)
            .await
    }

    /// Correlate `ResponseMessage(sn)` on `source`; when it reports failure,
    /// wait for `RollbackMessage(sn)`, execute the rollback and correlate
    /// `RollbackExecuted(sn)`.
    pub async fn rollback<S>(
        &self,
        ctx: &CorrelationContext,
        source: &S,
        signer: &SignerKey,
        sn: SerialNo,
        start_height: u64,
    ) -> Result<RollbackOutcome>
    where
        S: XCallChain + ?Sized,
    {
        let settings = source.settings();
        let code = source
            .find_call_response(&ctx.child(settings.response_timeout), start_height, sn)
            .await?;
        if code.is_success() {
            info!(chain = %source.nid(), sn = %sn, "Response succeeded, no rollback");
            return Ok(RollbackOutcome::NotRequired);
        }

        let rollback_ctx = ctx.child(settings.rollback_timeout);
        source
            .find_rollback_message(&rollback_ctx, start_height, sn)
            .await?;

        let chain = source.nid().to_string();
        SUBMISSIONS.with_label_values(&[&chain, "execute_rollback"]).inc();
        source
            .execute_rollback(&ctx.child(settings.submit_timeout), signer, sn)
            .await
            .inspect_err(|_| {
                SUBMISSION_FAILURES
                    .with_label_values(&[&chain, "execute_rollback"])
                    .inc();
            })?;

        let executed = source
            .find_rollback_executed_message(&rollback_ctx, start_height, sn)
            .await?;
        info!(chain = %chain, sn = %executed, "Rollback executed");
        Ok(RollbackOutcome::Executed(executed))
    }

    /// Send, correlate, execute on the destination, then settle the
    /// response (and rollback) on the source.
    #[allow(clippy::too_many_arguments)]
    pub async fn xcall_with_rollback<S, D>(
        &self,
        ctx: &CorrelationContext,
        source: &S,
        target: &D,
        signer: &SignerKey,
        to: &NetworkAddress,
        data: &Payload,
        rollback: &Payload,
    ) -> Result<RoundTrip>
    where
        S: XCallChain + ?Sized,
        D: XCallChain + ?Sized,
    {
        let source_start = source.height().await?;
        let response = self
            .xcall(ctx, source, target, signer, to, data, Some(rollback))
            .await?;
        let executed = self.execute_call(ctx, target, signer, &response).await?;
        let rollback = self
            .rollback(ctx, source, signer, response.serial_no, source_start)
            .await?;
        Ok(RoundTrip {
            response,
            executed,
            rollback,
        })
    }
}
