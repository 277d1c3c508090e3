//! # Failure Paths and Serial Numbers
//!
//! Size-limit rejections, undecodable events and the serial-number
//! guarantees every source chain gives.

#[cfg(test)]
mod tests {
    use crate::fixtures::{ctx, signer, Pair};
    use proptest::prelude::*;
    use std::time::Duration;
    use xcall_correlation::testkit::{MAX_DATA_SIZE, MAX_ROLLBACK_SIZE};
    use xcall_correlation::{
        ChainKind, CorrelationContext, EventKind, NetworkAddress, Nid, Payload, SerialNo,
        XCallError,
    };

    // =============================================================================
    // SIZE LIMITS
    // =============================================================================

    #[tokio::test]
    async fn test_oversized_payload_is_size_violation() {
        for kind in [ChainKind::Evm, ChainKind::Cosmos, ChainKind::Solana, ChainKind::Icon] {
            let pair = Pair::new(kind, ChainKind::Stellar);
            let err = pair
                .source
                .send_packet_xcall(
                    &ctx(),
                    &signer(),
                    &pair.to(),
                    &Payload(vec![0x42; MAX_DATA_SIZE + 1]),
                    None,
                )
                .await
                .unwrap_err();
            assert!(err.is_size_limit_violation(), "{}: {:?}", kind, err);
        }
    }

    #[tokio::test]
    async fn test_payload_at_limit_is_delivered() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Cosmos);
        let data = Payload(vec![0x42; MAX_DATA_SIZE]);
        let response = pair
            .orchestrator()
            .xcall(&ctx(), pair.source.as_ref(), pair.target.as_ref(), &signer(), &pair.to(), &data, None)
            .await
            .unwrap();
        assert_eq!(response.data.len(), MAX_DATA_SIZE);
    }

    #[tokio::test]
    async fn test_oversized_rollback_is_rejected() {
        let pair = Pair::new(ChainKind::Icon, ChainKind::Evm);
        let err = pair
            .source
            .send_packet_xcall(
                &ctx(),
                &signer(),
                &pair.to(),
                &Payload::from("small"),
                Some(&Payload(vec![0; MAX_ROLLBACK_SIZE + 1])),
            )
            .await
            .unwrap_err();
        match err {
            XCallError::Submission { log, .. } => assert!(log.contains("MaxRollbackSizeExceeded"), "{}", log),
            other => panic!("expected submission failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_destination_fails_send() {
        let pair = Pair::new(ChainKind::Sui, ChainKind::Evm);
        let nowhere = NetworkAddress::new(Nid::new("nowhere"), "0xdead");
        let err = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &nowhere, &Payload::from("lost"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, XCallError::Submission { .. }), "{:?}", err);
    }

    // =============================================================================
    // UNDECODABLE EVENTS
    // =============================================================================

    #[tokio::test]
    async fn test_terminal_undecodable_event_surfaces() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Stacks);
        let start = pair.target.height().await.unwrap();
        pair.net
            .inject_malformed(pair.target_nid(), EventKind::CallMessage)
            .unwrap();

        let err = pair
            .target
            .find_call_message(
                &CorrelationContext::with_timeout(Duration::from_secs(1)),
                start,
                &pair.from(),
                &pair.to().account,
                SerialNo::from_u64(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, XCallError::Decode { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_undecodable_event_before_match_is_skipped() {
        let pair = Pair::new(ChainKind::Cosmos, ChainKind::Icon);
        let start = pair.target.height().await.unwrap();
        pair.net
            .inject_malformed(pair.target_nid(), EventKind::CallMessage)
            .unwrap();
        let receipt = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload::from("after"), None)
            .await
            .unwrap();

        let message = pair
            .target
            .find_call_message(&ctx(), start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap();
        assert_eq!(message.sn, receipt.sn);
    }

    // =============================================================================
    // SERIAL NUMBERS
    // =============================================================================

    #[tokio::test]
    async fn test_serial_numbers_increase_per_source() {
        let pair = Pair::new(ChainKind::Stellar, ChainKind::Cosmos);
        let mut previous: Option<SerialNo> = None;
        for i in 0..5 {
            let receipt = pair
                .source
                .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload(vec![i]), None)
                .await
                .unwrap();
            if let Some(previous) = previous {
                assert!(receipt.sn > previous, "{} after {}", receipt.sn, previous);
            }
            previous = Some(receipt.sn);
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_distinct_serials() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Sui);
        let (to, ctx, signer) = (pair.to(), ctx(), signer());
        let (da, db, dc) = (Payload::from("a"), Payload::from("b"), Payload::from("c"));
        let (a, b, c) = tokio::join!(
            pair.source.send_packet_xcall(&ctx, &signer, &to, &da, None),
            pair.source.send_packet_xcall(&ctx, &signer, &to, &db, None),
            pair.source.send_packet_xcall(&ctx, &signer, &to, &dc, None),
        );
        let mut sns = vec![a.unwrap().sn, b.unwrap().sn, c.unwrap().sn];
        sns.sort();
        sns.dedup();
        assert_eq!(sns.len(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_delivered_payload_matches_sent(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            kind in proptest::sample::select(ChainKind::ALL.to_vec()),
        ) {
            let pair = Pair::new(kind, ChainKind::Icon);
            let response = tokio_test::block_on(pair.orchestrator().xcall(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload(data.clone()),
                None,
            ));
            let response = response.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(response.data.0, data);
        }
    }
}
