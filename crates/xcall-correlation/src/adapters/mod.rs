//! # Adapters Layer (Hexagonal Architecture)
//!
//! One [`XCallChain`](crate::ports::XCallChain) implementation per ledger
//! family, each generic over that family's ledger port. `rpc` holds the
//! network clients; [`build_chain`] is the single dispatch on
//! [`ChainKind`](crate::domain::ChainKind).

pub mod clarity;
pub mod cosmos;
pub mod evm;
mod factory;
pub mod icon;
pub mod rpc;
pub mod solana;
pub mod stacks;
pub mod stellar;
pub mod sui;

pub use cosmos::CosmosChain;
pub use evm::EvmChain;
pub use factory::build_chain;
pub use icon::IconChain;
pub use solana::SolanaChain;
pub use stacks::StacksChain;
pub use stellar::StellarChain;
pub use sui::SuiChain;

use crate::domain::{EventKind, SerialNo, XCallError, XCallEvent};

/// Native event decoded into its logical shape, or the decoder message.
pub type Decoded = std::result::Result<XCallEvent, String>;

/// First `CallMessageSent` among a transaction's decoded events.
pub(crate) fn extract_sn<I>(chain: &str, tx_id: &str, decoded: I) -> crate::domain::Result<SerialNo>
where
    I: IntoIterator<Item = Decoded>,
{
    let mut last_failure = None;
    for item in decoded {
        match item {
            Ok(XCallEvent::CallMessageSent { sn, .. }) => return Ok(sn),
            Ok(_) => {}
            Err(reason) => last_failure = Some(reason),
        }
    }
    Err(XCallError::decode(
        chain,
        EventKind::CallMessageSent.signature(),
        last_failure.unwrap_or_else(|| format!("no CallMessageSent in transaction {}", tx_id)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sn_prefers_first_sent_event() {
        let events = vec![
            Err("garbage".to_string()),
            Ok(XCallEvent::RollbackMessage { sn: SerialNo::from_u64(1) }),
            Ok(XCallEvent::CallMessageSent {
                from: None,
                to: None,
                sn: SerialNo::from_u64(9),
            }),
        ];
        assert_eq!(extract_sn("c", "tx", events).unwrap(), SerialNo::from_u64(9));
    }

    #[test]
    fn test_extract_sn_reports_decoder_message() {
        let err = extract_sn("c", "tx", vec![Err("bad topic".to_string())]).unwrap_err();
        assert!(err.to_string().contains("bad topic"));

        let err = extract_sn("c", "0xabc", Vec::new()).unwrap_err();
        assert!(err.to_string().contains("0xabc"));
    }
}
