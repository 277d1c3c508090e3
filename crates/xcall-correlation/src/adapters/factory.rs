//! Builds a network-backed chain adapter from a `[[chains]]` entry.

use super::cosmos::CosmosStrategy;
use super::rpc::{
    CosmosRpcClient, EvmRpcClient, IconRpcClient, SolanaRpcClient, StacksRpcClient,
    StellarRpcClient, Submitter, SuiRpcClient,
};
use super::{CosmosChain, EvmChain, IconChain, SolanaChain, StacksChain, StellarChain, SuiChain};
use crate::config::{ChainConfig, CorrelationSettings};
use crate::domain::{ChainKind, Result, XCallError, XCALL};
use crate::ports::XCallChain;
use std::sync::Arc;
use tracing::info;

/// Adapter for `config`, talking to its `rpc_url`.
///
/// Cosmos chains correlate over `/subscribe` when `ws_url` is set and poll
/// `tx_search` otherwise.
pub fn build_chain(
    config: &ChainConfig,
    settings: CorrelationSettings,
    submitter: Submitter,
) -> Result<Arc<dyn XCallChain>> {
    let chain_info = config.chain_info();
    if !chain_info.contracts.contains(XCALL) {
        return Err(XCallError::Config(format!(
            "chain {} has no {} contract",
            config.nid, XCALL
        )));
    }
    let nid = chain_info.nid.clone();
    let url = config.rpc_url.as_str();

    let chain: Arc<dyn XCallChain> = match config.kind {
        ChainKind::Evm => Arc::new(EvmChain::new(
            chain_info,
            settings,
            Arc::new(EvmRpcClient::new(nid, url, submitter)),
        )),
        ChainKind::Cosmos => {
            let strategy = if config.ws_url.is_some() {
                CosmosStrategy::Subscribe
            } else {
                CosmosStrategy::Poll
            };
            Arc::new(CosmosChain::new(
                chain_info,
                settings,
                Arc::new(CosmosRpcClient::new(nid, url, config.ws_url.clone(), submitter)),
                strategy,
            ))
        }
        ChainKind::Icon => Arc::new(IconChain::new(
            chain_info,
            settings,
            Arc::new(IconRpcClient::new(nid, url, submitter)),
        )),
        ChainKind::Solana => Arc::new(SolanaChain::new(
            chain_info,
            settings,
            Arc::new(SolanaRpcClient::new(nid, url, submitter)),
        )),
        ChainKind::Stellar => Arc::new(StellarChain::new(
            chain_info,
            settings,
            Arc::new(StellarRpcClient::new(nid, url, submitter)),
        )),
        ChainKind::Sui => Arc::new(SuiChain::new(
            chain_info,
            settings,
            Arc::new(SuiRpcClient::new(nid, url, submitter)),
        )),
        ChainKind::Stacks => Arc::new(StacksChain::new(
            chain_info,
            settings,
            Arc::new(StacksRpcClient::new(nid, url, submitter)),
        )),
    };
    info!(chain = %config.nid, kind = %config.kind, rpc = %config.rpc_url, "Chain adapter ready");
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    const CONFIG: &str = r#"
[[chains]]
kind = "cosmos"
nid = "archway"
rpc_url = "http://localhost:26657"
ws_url = "ws://localhost:26657/websocket"
[chains.contracts]
xcall = "archway1xcall"

[[chains]]
kind = "sui"
nid = "sui"
rpc_url = "http://localhost:9000"
"#;

    #[tokio::test]
    async fn test_builds_adapter_per_kind() {
        let config = HarnessConfig::parse(CONFIG).unwrap();
        let archway = config.chain("archway").unwrap();
        let chain = build_chain(archway, config.settings_for(archway), None).unwrap();
        assert_eq!(chain.kind(), ChainKind::Cosmos);
        assert_eq!(chain.nid().as_str(), "archway");
    }

    #[test]
    fn test_missing_xcall_is_config_error() {
        let config = HarnessConfig::parse(CONFIG).unwrap();
        let sui = config.chain("sui").unwrap();
        let err = build_chain(sui, config.settings_for(sui), None).err().unwrap();
        assert!(matches!(err, XCallError::Config(_)));
    }
}
