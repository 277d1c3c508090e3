//! # Paused Destinations
//!
//! Deliveries to a paused node are held until it resumes. The flush flow
//! pauses the destination around the send; correlation must still find the
//! message once the held deliveries land above the watermark.

#[cfg(test)]
mod tests {
    use crate::fixtures::{ctx, signer, Pair};
    use std::time::Duration;
    use xcall_correlation::{
        ChainKind, CorrelationContext, Payload, XCallError, XCallOrchestrator,
    };

    #[tokio::test]
    async fn test_flush_resumes_destination_and_correlates() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Icon);
        let data = Payload::from("flushed");

        let response = pair
            .orchestrator()
            .xcall_with_flush(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &data,
                None,
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        assert_eq!(response.data, data);
        assert!(!pair.net.is_paused(pair.target_nid()).unwrap());
    }

    #[tokio::test]
    async fn test_flush_requires_node_control() {
        let pair = Pair::new(ChainKind::Stellar, ChainKind::Sui);
        let err = XCallOrchestrator::new()
            .xcall_with_flush(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload::from("x"),
                None,
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, XCallError::Unsupported { .. }), "{:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_hold_ends_on_cancellation() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Icon);
        let (cancellable, handle) = CorrelationContext::cancellable(Duration::from_secs(7200));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let hold = Duration::from_secs(3600);
        let started = tokio::time::Instant::now();
        let err = pair
            .orchestrator()
            .xcall_with_flush(
                &cancellable,
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload::from("held"),
                None,
                hold,
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < hold, "held for {:?}", started.elapsed());
        assert!(matches!(err, XCallError::Cancelled { .. }), "{:?}", err);
        assert!(!pair.net.is_paused(pair.target_nid()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_destination_times_out_then_delivers() {
        let pair = Pair::new(ChainKind::Solana, ChainKind::Evm);
        let start = pair.target.height().await.unwrap();
        pair.net.pause_chain(pair.target_nid()).unwrap();

        let receipt = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload::from("held"), None)
            .await
            .unwrap();

        let timeout = pair.target.settings().event_timeout;
        let err = pair
            .target
            .find_call_message(
                &CorrelationContext::with_timeout(timeout),
                start,
                &pair.from(),
                &pair.to().account,
                receipt.sn,
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);

        pair.net.unpause_chain(pair.target_nid()).unwrap();
        let message = pair
            .target
            .find_call_message(&ctx(), start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap();
        assert_eq!(message.sn, receipt.sn);
    }

    #[tokio::test]
    async fn test_cancelled_wait_stops_early() {
        let pair = Pair::new(ChainKind::Icon, ChainKind::Stacks);
        let start = pair.target.height().await.unwrap();
        pair.net.pause_chain(pair.target_nid()).unwrap();
        let receipt = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload::from("never"), None)
            .await
            .unwrap();

        let (cancellable, handle) = CorrelationContext::cancellable(Duration::from_secs(30));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.cancel();
        });

        let err = pair
            .target
            .find_call_message(&cancellable, start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap_err();
        assert!(matches!(err, XCallError::Cancelled { .. }), "{:?}", err);
    }
}
