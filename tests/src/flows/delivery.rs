//! # Delivery Flows
//!
//! Send on one family, correlate `CallMessage` on another. Each pair crosses
//! two different native encodings and at least one correlation strategy.

#[cfg(test)]
mod tests {
    use crate::fixtures::{ctx, signer, Pair};
    use xcall_correlation::{ChainKind, Payload};

    /// Payload used by the no-rollback transfer flows.
    const TRANSFER: &str = "MessageTransferTestingWithoutRollback";

    async fn transfer(source: ChainKind, target: ChainKind) -> Pair {
        let pair = Pair::new(source, target);
        let data = Payload::from(TRANSFER);

        let response = pair
            .orchestrator()
            .xcall(&ctx(), pair.source.as_ref(), pair.target.as_ref(), &signer(), &pair.to(), &data, None)
            .await
            .unwrap_or_else(|e| panic!("{} -> {}: {}", source, target, e));

        assert_eq!(response.data, data);
        assert_eq!(response.data.as_utf8(), Some(TRANSFER));
        pair
    }

    // =============================================================================
    // FAMILY PAIRS
    // =============================================================================

    #[tokio::test]
    async fn test_evm_to_cosmos() {
        transfer(ChainKind::Evm, ChainKind::Cosmos).await;
    }

    #[tokio::test]
    async fn test_solana_to_stellar() {
        transfer(ChainKind::Solana, ChainKind::Stellar).await;
    }

    #[tokio::test]
    async fn test_icon_to_sui() {
        transfer(ChainKind::Icon, ChainKind::Sui).await;
    }

    #[tokio::test]
    async fn test_stacks_to_evm() {
        transfer(ChainKind::Stacks, ChainKind::Evm).await;
    }

    #[tokio::test]
    async fn test_cosmos_to_icon() {
        transfer(ChainKind::Cosmos, ChainKind::Icon).await;
    }

    #[tokio::test]
    async fn test_sui_to_stacks() {
        transfer(ChainKind::Sui, ChainKind::Stacks).await;
    }

    #[tokio::test]
    async fn test_stellar_to_solana() {
        transfer(ChainKind::Stellar, ChainKind::Solana).await;
    }

    #[tokio::test]
    async fn test_every_family_sends_to_evm() {
        for kind in ChainKind::ALL {
            transfer(kind, ChainKind::Evm).await;
        }
    }

    #[tokio::test]
    async fn test_every_family_receives_from_icon() {
        for kind in ChainKind::ALL {
            transfer(ChainKind::Icon, kind).await;
        }
    }

    // =============================================================================
    // CORRELATION PROPERTIES
    // =============================================================================

    #[tokio::test]
    async fn test_call_message_carries_source_and_destination() {
        let pair = Pair::new(ChainKind::Evm, ChainKind::Cosmos);
        let start = pair.target.height().await.unwrap();
        let receipt = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload::from(TRANSFER), None)
            .await
            .unwrap();

        let message = pair
            .target
            .find_call_message(&ctx(), start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap();
        assert_eq!(message.sn, receipt.sn);
        assert_eq!(message.from.as_deref(), Some(pair.from().as_str()));
        assert_eq!(message.to.as_deref(), Some(pair.to().account.as_str()));
        assert!(message.height >= start);
    }

    #[tokio::test]
    async fn test_repeated_find_returns_same_request() {
        let pair = Pair::new(ChainKind::Icon, ChainKind::Stellar);
        let start = pair.target.height().await.unwrap();
        let receipt = pair
            .source
            .send_packet_xcall(&ctx(), &signer(), &pair.to(), &Payload::from("again"), None)
            .await
            .unwrap();

        let first = pair
            .target
            .find_call_message(&ctx(), start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap();
        let second = pair
            .target
            .find_call_message(&ctx(), start, &pair.from(), &pair.to().account, receipt.sn)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_trait_xcall_matches_orchestrator() {
        let pair = Pair::new(ChainKind::Sui, ChainKind::Solana);
        let data = Payload::from(TRANSFER);
        let response = pair
            .source
            .xcall(&ctx(), pair.target.as_ref(), &signer(), &pair.to(), &data, None)
            .await
            .unwrap();
        assert_eq!(response.data, data);
    }

    #[tokio::test]
    async fn test_response_serializes_with_wire_names() {
        let pair = transfer(ChainKind::Evm, ChainKind::Stacks).await;
        let response = pair
            .orchestrator()
            .xcall(
                &ctx(),
                pair.source.as_ref(),
                pair.target.as_ref(),
                &signer(),
                &pair.to(),
                &Payload::from(TRANSFER),
                None,
            )
            .await
            .unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("SerialNo").is_some());
        assert!(json.get("RequestID").is_some());
        assert!(json.get("Data").is_some());
    }
}
