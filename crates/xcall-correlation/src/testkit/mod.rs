//! # Test Kit
//!
//! An in-memory xCall network and one simulated ledger per family. The
//! real adapters run on top of the simulated ledgers, so flow tests cover
//! the production codecs and correlation strategies without a devnet.
//!
//! ```text
//! SimNetwork ──► SimEvm / SimCosmos / ... ──► EvmChain / CosmosChain / ...
//!   (rules)         (native encodings)            (production adapters)
//! ```

mod ledgers;
mod network;

pub use ledgers::{SimCosmos, SimEvm, SimIcon, SimSolana, SimStacks, SimStellar, SimSui};
pub use network::{
    SimCall, SimFailure, SimNetwork, SimRecord, SimTx, FAILING_PAYLOAD, MAX_DATA_SIZE,
    MAX_ROLLBACK_SIZE, SUI_OBJECTS,
};

use crate::adapters::cosmos::CosmosStrategy;
use crate::adapters::{
    CosmosChain, EvmChain, IconChain, SolanaChain, StacksChain, StellarChain, SuiChain,
};
use crate::config::CorrelationSettings;
use crate::domain::{ChainKind, Nid, Result};
use crate::ports::XCallChain;
use std::sync::Arc;
use std::time::Duration;

/// Settings tuned for simulated ledgers: fast polling, short deadlines.
pub fn fast_settings() -> CorrelationSettings {
    CorrelationSettings {
        poll_interval: Duration::from_millis(10),
        event_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_secs(2),
        rollback_timeout: Duration::from_secs(3),
        submit_timeout: Duration::from_secs(2),
        max_window: 50,
    }
}

/// Production adapter for chain `nid` of `net`, backed by the family's simulated
/// ledger. Cosmos correlates over its subscription.
pub fn sim_chain(
    net: &SimNetwork,
    nid: &Nid,
    settings: CorrelationSettings,
) -> Result<Arc<dyn XCallChain>> {
    let info = net.chain_info(nid)?;
    let net = net.clone();
    let kind = info.kind;
    let chain: Arc<dyn XCallChain> = match kind {
        ChainKind::Evm => Arc::new(EvmChain::new(info, settings, Arc::new(SimEvm::new(net, nid)?))),
        ChainKind::Cosmos => Arc::new(CosmosChain::new(
            info,
            settings,
            Arc::new(SimCosmos::new(net, nid)?),
            CosmosStrategy::Subscribe,
        )),
        ChainKind::Icon => Arc::new(IconChain::new(info, settings, Arc::new(SimIcon::new(net, nid)?))),
        ChainKind::Solana => {
            Arc::new(SolanaChain::new(info, settings, Arc::new(SimSolana::new(net, nid)?)))
        }
        ChainKind::Stellar => {
            Arc::new(StellarChain::new(info, settings, Arc::new(SimStellar::new(net, nid)?)))
        }
        ChainKind::Sui => Arc::new(SuiChain::new(info, settings, Arc::new(SimSui::new(net, nid)?))),
        ChainKind::Stacks => {
            Arc::new(StacksChain::new(info, settings, Arc::new(SimStacks::new(net, nid)?)))
        }
    };
    Ok(chain)
}

/// Register `kind` as `nid` on `net` and return its adapter.
pub fn add_sim_chain(
    net: &SimNetwork,
    kind: ChainKind,
    nid: &str,
    settings: CorrelationSettings,
) -> Result<Arc<dyn XCallChain>> {
    let info = net.add_chain(kind, nid);
    sim_chain(net, &info.nid, settings)
}
