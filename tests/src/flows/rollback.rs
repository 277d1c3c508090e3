//! # Round Trips
//!
//! Send with a rollback payload, execute on the destination, then settle
//! `ResponseMessage` on the source. A destination failure enables the
//! rollback, which the harness executes and correlates.

#[cfg(test)]
mod tests {
    use crate::fixtures::{ctx, signer, Pair};
    use xcall_correlation::testkit::FAILING_PAYLOAD;
    use xcall_correlation::{
        ChainKind, Payload, ResponseCode, RollbackOutcome, XCallError,
    };

    fn rollback_payload() -> Payload {
        Payload::from("undo")
    }

    #[tokio::test]
    async fn test_successful_execution_needs_no_rollback() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Icon);
        let trip = pair
            .orchestrator()
            .xcall_with_rollback(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload::from("hello"),
                &rollback_payload(),
            )
            .await
            .unwrap();

        assert_eq!(trip.executed.req_id, trip.response.request_id);
        assert_eq!(trip.executed.code, ResponseCode::SUCCESS);
        assert_eq!(trip.rollback, RollbackOutcome::NotRequired);
    }

    #[tokio::test]
    async fn test_failed_execution_rolls_back_on_source() {
        let pair = Pair::new(ChainKind::Cosmos, ChainKind::Sui);
        let trip = pair
            .orchestrator()
            .xcall_with_rollback(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload(FAILING_PAYLOAD.to_vec()),
                &rollback_payload(),
            )
            .await
            .unwrap();

        assert_eq!(trip.executed.code, ResponseCode::FAILURE);
        assert_eq!(trip.rollback, RollbackOutcome::Executed(trip.response.serial_no));
    }

    #[tokio::test]
    async fn test_rollback_across_every_source_family() {
        for kind in ChainKind::ALL {
            let pair = Pair::new(kind, ChainKind::Stacks);
            let trip = pair
                .orchestrator()
                .xcall_with_rollback(
                    &ctx(),
                    pair.source.as_ref(),
                    pair.target.as_ref(),
                    &signer(),
                    &pair.to(),
                    &Payload(FAILING_PAYLOAD.to_vec()),
                    &rollback_payload(),
                )
                .await
                .unwrap_or_else(|e| panic!("{}: {}", kind, e));
            assert!(matches!(trip.rollback, RollbackOutcome::Executed(_)), "{}", kind);
        }
    }

    #[tokio::test]
    async fn test_step_by_step_round_trip() {
        let pair = Pair::new(ChainKind::Stellar, ChainKind::Evm);
        let orchestrator = pair.orchestrator();
        let source_start = pair.source.height().await.unwrap();

        let response = orchestrator
            .xcall(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload(FAILING_PAYLOAD.to_vec()),
                Some(&rollback_payload()),
            )
            .await
            .unwrap();

        let executed = orchestrator
            .execute_call(&ctx(), pair.target.as_ref(), &signer(), &response)
            .await
            .unwrap();
        assert!(!executed.code.is_success());
        assert!(!executed.msg.is_empty());

        let code = pair
            .source
            .find_call_response(&ctx(), source_start, response.serial_no)
            .await
            .unwrap();
        assert_eq!(code, ResponseCode::FAILURE);

        let sn = pair
            .source
            .find_rollback_message(&ctx(), source_start, response.serial_no)
            .await
            .unwrap();
        assert_eq!(sn, response.serial_no);

        pair.source
            .execute_rollback(&ctx(), &signer(), sn)
            .await
            .unwrap();
        let executed_sn = pair
            .source
            .find_rollback_executed_message(&ctx(), source_start, sn)
            .await
            .unwrap();
        assert_eq!(executed_sn, sn);
    }

    #[tokio::test]
    async fn test_rollback_without_failure_is_rejected() {
        let pair = Pair::new(ChainKind::Solana, ChainKind::Cosmos);
        let response = pair
            .orchestrator()
            .xcall(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload::from("fine"),
                Some(&rollback_payload()),
            )
            .await
            .unwrap();

        let err = pair
            .source
            .execute_rollback(&ctx(), &signer(), response.serial_no)
            .await
            .unwrap_err();
        match err {
            XCallError::Submission { code, log, .. } => {
                assert_eq!(code, 6006);
                assert!(log.contains("RollbackNotEnabled"), "{}", log);
            }
            other => panic!("expected submission failure, got {:?}", other),
        }
    }
}
