//! Shared fixtures for flow tests.

use std::sync::{Arc, Once};
use std::time::Duration;
use xcall_correlation::testkit::{add_sim_chain, fast_settings, SimNetwork};
use xcall_correlation::{
    ChainKind, CorrelationContext, NetworkAddress, Nid, SignerKey, XCallChain, XCallOrchestrator,
    DAPP,
};

static TRACING: Once = Once::new();

/// Route harness logs to the test writer once per process. `RUST_LOG`
/// controls the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Two simulated chains joined by one network.
pub struct Pair {
    /// Shared network
    pub net: SimNetwork,
    /// Sending chain
    pub source: Arc<dyn XCallChain>,
    /// Receiving chain
    pub target: Arc<dyn XCallChain>,
}

impl Pair {
    /// Register `source` and `target` families on a fresh network.
    pub fn new(source: ChainKind, target: ChainKind) -> Self {
        init_tracing();
        let net = SimNetwork::new();
        let source = add_sim_chain(&net, source, &format!("{}-src", source), fast_settings())
            .expect("source chain");
        let target = add_sim_chain(&net, target, &format!("{}-dst", target), fast_settings())
            .expect("target chain");
        Self {
            net,
            source,
            target,
        }
    }

    /// Destination dapp on the target chain.
    pub fn to(&self) -> NetworkAddress {
        NetworkAddress::new(
            self.target.nid().clone(),
            self.target.get_contract_address(DAPP).expect("target dapp"),
        )
    }

    /// Source dapp as `CallMessage.from` carries it.
    pub fn from(&self) -> String {
        format!(
            "{}/{}",
            self.source.nid(),
            self.source.get_contract_address(DAPP).expect("source dapp")
        )
    }

    /// Orchestrator able to pause nodes of this network.
    pub fn orchestrator(&self) -> XCallOrchestrator {
        XCallOrchestrator::with_node_control(Arc::new(self.net.clone()))
    }

    /// Target NID.
    pub fn target_nid(&self) -> &Nid {
        self.target.nid()
    }
}

/// Signer used by every flow; the simulated ledgers do not verify it.
pub fn signer() -> SignerKey {
    SignerKey::new("harness-signer")
}

/// Generous overall deadline; each step applies its own timeout beneath it.
pub fn ctx() -> CorrelationContext {
    CorrelationContext::with_timeout(Duration::from_secs(10))
}
