//! # Contract Registry
//!
//! Name → address map populated during setup (xCall, connection, mock dapp
//! deployment) and frozen afterwards.

use super::errors::{Result, XCallError};
use super::value_objects::{ChainKind, Nid};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry key for the xCall contract.
pub const XCALL: &str = "xcall";
/// Registry key for the connection contract.
pub const CONNECTION: &str = "connection";
/// Registry key for the mock dapp.
pub const DAPP: &str = "dapp";

/// Mutable registry used while the chain is being set up.
#[derive(Debug, Clone)]
pub struct ContractRegistryBuilder {
    nid: Nid,
    entries: HashMap<String, String>,
}

impl ContractRegistryBuilder {
    /// Start an empty registry for `nid`.
    pub fn new(nid: Nid) -> Self {
        Self {
            nid,
            entries: HashMap::new(),
        }
    }

    /// Record a deployed contract, replacing any previous address.
    pub fn register(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.entries.insert(name.into(), address.into());
        self
    }

    /// Record every entry of `contracts`.
    pub fn extend<I, K, V>(mut self, contracts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.entries
            .extend(contracts.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Freeze. No mutation is possible afterwards.
    pub fn build(self) -> ContractRegistry {
        ContractRegistry {
            nid: self.nid,
            entries: Arc::new(self.entries),
        }
    }
}

/// Frozen, cheaply cloneable registry.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    nid: Nid,
    entries: Arc<HashMap<String, String>>,
}

impl ContractRegistry {
    /// Address of `name`, or `RegistryLookup`.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| XCallError::RegistryLookup {
                chain: self.nid.to_string(),
                name: name.to_string(),
            })
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Chain this registry belongs to.
    pub fn nid(&self) -> &Nid {
        &self.nid
    }
}

/// Identity of a chain under test.
#[derive(Debug, Clone)]
pub struct ChainInfo {
    /// Network identifier
    pub nid: Nid,
    /// Ledger family
    pub kind: ChainKind,
    /// Deployed contracts
    pub contracts: ContractRegistry,
}

impl ChainInfo {
    /// Bundle identity and registry.
    pub fn new(kind: ChainKind, contracts: ContractRegistry) -> Self {
        Self {
            nid: contracts.nid().clone(),
            kind,
            contracts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_missing() {
        let registry = ContractRegistryBuilder::new(Nid::new("0x2.icon"))
            .register(XCALL, "cx01")
            .register(DAPP, "cx02")
            .build();

        assert_eq!(registry.get(XCALL).unwrap(), "cx01");
        match registry.get(CONNECTION) {
            Err(XCallError::RegistryLookup { chain, name }) => {
                assert_eq!(chain, "0x2.icon");
                assert_eq!(name, CONNECTION);
            }
            other => panic!("expected RegistryLookup, got {:?}", other),
        }
    }

    #[test]
    fn test_clones_share_storage() {
        let registry = ContractRegistryBuilder::new(Nid::new("sui"))
            .extend([(XCALL, "0xabc")])
            .build();
        let copy = registry.clone();
        assert!(Arc::ptr_eq(&registry.entries, &copy.entries));
    }
}
