//! # Harness Configuration
//!
//! TOML file describing the chains under test and correlation timing.
//!
//! ```toml
//! [correlation]
//! poll_interval_ms = 2000
//! call_message_timeout_secs = 60
//! max_window = 100
//!
//! [[chains]]
//! kind = "evm"
//! nid = "0x2.evm"
//! rpc_url = "http://localhost:8545"
//! signer = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
//! [chains.contracts]
//! xcall = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! dapp = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
//! ```

use crate::domain::{ChainInfo, ChainKind, ContractRegistryBuilder, Nid, XCallError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment override for every event timeout, in seconds.
pub const TIMEOUT_ENV: &str = "XCALL_CORRELATION_TIMEOUT_SECS";

/// Default fetch window for poll-based correlation.
pub const DEFAULT_MAX_WINDOW: u64 = 100;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Failed to read {path}: {error}")]
    Io {
        /// File path
        path: String,
        /// OS error
        error: String,
    },

    /// TOML parsing error.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Semantically invalid entry.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for XCallError {
    fn from(e: ConfigError) -> Self {
        XCallError::Config(e.to_string())
    }
}

/// Timing used by one chain's adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationSettings {
    /// Delay between poll attempts
    pub poll_interval: Duration,
    /// Wait for `CallMessage` / `CallExecuted`
    pub event_timeout: Duration,
    /// Wait for `ResponseMessage`
    pub response_timeout: Duration,
    /// Wait for `RollbackMessage` / `RollbackExecuted`
    pub rollback_timeout: Duration,
    /// Wait for transaction inclusion
    pub submit_timeout: Duration,
    /// Max heights fetched per poll
    pub max_window: u64,
}

impl CorrelationSettings {
    /// Defaults observed for each ledger family.
    pub fn for_kind(kind: ChainKind) -> Self {
        let event_timeout = kind.default_event_timeout();
        Self {
            poll_interval: kind.default_poll_interval(),
            event_timeout,
            response_timeout: event_timeout,
            rollback_timeout: event_timeout.max(Duration::from_secs(120)),
            submit_timeout: Duration::from_secs(30),
            max_window: DEFAULT_MAX_WINDOW,
        }
    }

    /// Apply file-level overrides.
    pub fn with_section(mut self, section: &CorrelationSection) -> Self {
        if let Some(ms) = section.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = section.call_message_timeout_secs {
            self.event_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = section.response_timeout_secs {
            self.response_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = section.rollback_timeout_secs {
            self.rollback_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = section.submit_timeout_secs {
            self.submit_timeout = Duration::from_secs(secs);
        }
        if let Some(window) = section.max_window {
            self.max_window = window.max(1);
        }
        self
    }

    /// Apply `XCALL_CORRELATION_TIMEOUT_SECS` when set.
    pub fn with_env_override(mut self) -> Self {
        if let Some(secs) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            let timeout = Duration::from_secs(secs);
            self.event_timeout = timeout;
            self.response_timeout = timeout;
            self.rollback_timeout = timeout;
        }
        self
    }
}

/// `[correlation]` section. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationSection {
    /// Poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,
    /// `CallMessage` timeout
    pub call_message_timeout_secs: Option<u64>,
    /// `ResponseMessage` timeout
    pub response_timeout_secs: Option<u64>,
    /// Rollback event timeout
    pub rollback_timeout_secs: Option<u64>,
    /// Inclusion timeout
    pub submit_timeout_secs: Option<u64>,
    /// Poll window
    pub max_window: Option<u64>,
}

/// One `[[chains]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Ledger family
    pub kind: ChainKind,
    /// Network identifier
    pub nid: String,
    /// JSON-RPC or REST endpoint
    pub rpc_url: String,
    /// WebSocket endpoint (Cosmos subscriptions)
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Node-signed account used by clients that can submit without an
    /// external signer
    #[serde(default)]
    pub signer: Option<String>,
    /// Deployed contracts by registry name
    #[serde(default)]
    pub contracts: HashMap<String, String>,
    /// Per-chain overrides of `[correlation]`
    #[serde(default)]
    pub correlation: Option<CorrelationSection>,
}

impl ChainConfig {
    /// Identity plus frozen registry.
    pub fn chain_info(&self) -> ChainInfo {
        let registry = ContractRegistryBuilder::new(Nid::new(&self.nid))
            .extend(self.contracts.clone())
            .build();
        ChainInfo::new(self.kind, registry)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    correlation: CorrelationSection,
    #[serde(default)]
    chains: Vec<ChainConfig>,
}

/// Parsed harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Global timing section
    pub correlation: CorrelationSection,
    /// Chains under test
    pub chains: Vec<ChainConfig>,
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for chain in &file.chains {
            if chain.nid.is_empty() {
                return Err(ConfigError::Invalid("chain with empty nid".into()));
            }
            if !seen.insert(chain.nid.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate nid {}", chain.nid)));
            }
        }

        Ok(Self {
            correlation: file.correlation,
            chains: file.chains,
        })
    }

    /// Chain entry by NID.
    pub fn chain(&self, nid: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.nid == nid)
    }

    /// Effective settings for `chain`: family defaults, then `[correlation]`,
    /// then the chain's own section, then the environment override.
    pub fn settings_for(&self, chain: &ChainConfig) -> CorrelationSettings {
        let mut settings =
            CorrelationSettings::for_kind(chain.kind).with_section(&self.correlation);
        if let Some(own) = &chain.correlation {
            settings = settings.with_section(own);
        }
        settings.with_env_override()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DAPP, XCALL};

    const SAMPLE: &str = r#"
[correlation]
poll_interval_ms = 500
call_message_timeout_secs = 45

[[chains]]
kind = "evm"
nid = "0x2.evm"
rpc_url = "http://localhost:8545"
signer = "0xf39f"
[chains.contracts]
xcall = "0xaaa"
dapp = "0xbbb"

[[chains]]
kind = "cosmos"
nid = "archway"
rpc_url = "http://localhost:26657"
ws_url = "ws://localhost:26657/websocket"
[chains.correlation]
max_window = 20
[chains.contracts]
xcall = "archway1xcall"
"#;

    #[test]
    fn test_parse_sample() {
        let config = HarnessConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.chains.len(), 2);

        let evm = config.chain("0x2.evm").unwrap();
        let info = evm.chain_info();
        assert_eq!(info.kind, ChainKind::Evm);
        assert_eq!(info.contracts.get(DAPP).unwrap(), "0xbbb");

        let settings = config.settings_for(evm);
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.max_window, DEFAULT_MAX_WINDOW);
    }

    #[test]
    fn test_chain_section_overrides_global() {
        let config = HarnessConfig::parse(SAMPLE).unwrap();
        let cosmos = config.chain("archway").unwrap();
        let settings = config.settings_for(cosmos);
        assert_eq!(settings.max_window, 20);
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(cosmos.chain_info().contracts.get(XCALL).unwrap(), "archway1xcall");
    }

    #[test]
    fn test_duplicate_nid_rejected() {
        let dup = r#"
[[chains]]
kind = "sui"
nid = "sui"
rpc_url = "http://a"
[[chains]]
kind = "sui"
nid = "sui"
rpc_url = "http://b"
"#;
        assert!(matches!(
            HarnessConfig::parse(dup),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let bad = "[[chains]]\nkind = \"bitcoin\"\nnid = \"btc\"\nrpc_url = \"x\"\n";
        assert!(matches!(HarnessConfig::parse(bad), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_family_defaults() {
        let cosmos = CorrelationSettings::for_kind(ChainKind::Cosmos);
        assert_eq!(cosmos.event_timeout, Duration::from_secs(16));
        let stellar = CorrelationSettings::for_kind(ChainKind::Stellar);
        assert_eq!(stellar.event_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            HarnessConfig::load("/nonexistent/xcall.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
