//! # xCall Correlation
//!
//! Drives xCall cross-chain message passing and proves delivery by
//! correlating the events each ledger emits.
//!
//! **Architecture:** Hexagonal (Ports/Adapters)
//!
//! ## Purpose
//!
//! Send a payload from a dapp on one chain, then find the matching
//! `CallMessage` on the destination chain by serial number:
//! - One capability contract ([`XCallChain`]) for every ledger family
//! - Poll and subscription correlation strategies behind one [`EventWaiter`]
//! - Round trips with execution, response and rollback settlement
//!
//! ## Ledger Families
//!
//! | Family | Correlation | Native event |
//! |--------|-------------|--------------|
//! | EVM | `eth_getLogs` topics | ABI log |
//! | Cosmos | `/subscribe` + `tx_search` | `wasm-<Name>` attributes |
//! | ICON | block results | `indexed` / `data` lists |
//! | Solana | program signatures | Anchor `Program data:` |
//! | Stellar | `getEvents` | `ScVal` map |
//! | Sui | `suix_queryEvents` | `parsedJson` |
//! | Stacks | contract logs | Clarity `print` tuple |
//!
//! ## Module Structure
//!
//! ```text
//! xcall-correlation/
//! ├── domain/          # Counters, events, registry, flow state, errors
//! ├── algorithms/      # Correlation waiters, inclusion polling
//! ├── ports/           # XCallChain, ledger ports, submitter, node control
//! ├── adapters/        # One adapter per family, RPC clients, factory
//! ├── config.rs        # TOML harness config
//! ├── service.rs       # XCallOrchestrator
//! └── testkit/         # Simulated ledgers (feature `test-utils`)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

// Re-exports
pub use adapters::build_chain;
pub use algorithms::{CancelHandle, CorrelationContext, EventWaiter};
pub use config::{ChainConfig, ConfigError, CorrelationSettings, HarnessConfig};
pub use domain::{
    CallExecuted, CallMessage, ChainInfo, ChainKind, ContractRegistry, ContractRegistryBuilder,
    EventKind, EventMatcher, NetworkAddress, Nid, ObservedEvent, Payload, RequestId,
    ResponseCode, Result, SendReceipt, SerialNo, SignerKey, TxOutcome, XCallError, XCallEvent,
    XCallResponse, CONNECTION, DAPP, XCALL,
};
pub use ports::{NativeCall, NodeControl, TransactionSubmitter, XCallChain};
pub use service::{RollbackOutcome, RoundTrip, XCallOrchestrator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    #[allow(clippy::const_is_empty)]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
