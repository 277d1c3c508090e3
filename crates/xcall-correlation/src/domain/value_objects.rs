//! # Domain Value Objects
//!
//! Immutable value types shared by adapters, the correlation engine and the
//! orchestrator.

use super::errors::{Result, XCallError};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Ledger families the harness can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Account-based EVM chains (log topics).
    Evm,
    /// Cosmos SDK chains running CosmWasm (ABCI events).
    Cosmos,
    /// ICON (event logs in transaction results).
    Icon,
    /// Solana (Anchor events in program logs).
    Solana,
    /// Stellar / Soroban (contract events over JSON-RPC).
    Stellar,
    /// Sui (Move events).
    Sui,
    /// Stacks (Clarity print events).
    Stacks,
}

impl ChainKind {
    /// All families, in registry order.
    pub const ALL: [ChainKind; 7] = [
        ChainKind::Evm,
        ChainKind::Cosmos,
        ChainKind::Icon,
        ChainKind::Solana,
        ChainKind::Stellar,
        ChainKind::Sui,
        ChainKind::Stacks,
    ];

    /// Lowercase family name used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Evm => "evm",
            ChainKind::Cosmos => "cosmos",
            ChainKind::Icon => "icon",
            ChainKind::Solana => "solana",
            ChainKind::Stellar => "stellar",
            ChainKind::Sui => "sui",
            ChainKind::Stacks => "stacks",
        }
    }

    /// Delay between poll attempts when the family is polled.
    pub fn default_poll_interval(&self) -> Duration {
        match self {
            ChainKind::Evm => Duration::from_secs(1),
            ChainKind::Cosmos => Duration::from_secs(1),
            ChainKind::Icon => Duration::from_secs(2),
            ChainKind::Solana => Duration::from_secs(2),
            ChainKind::Stellar => Duration::from_secs(2),
            ChainKind::Sui => Duration::from_secs(2),
            ChainKind::Stacks => Duration::from_secs(5),
        }
    }

    /// Bounded wait for a destination-side event.
    pub fn default_event_timeout(&self) -> Duration {
        match self {
            ChainKind::Evm => Duration::from_secs(60),
            ChainKind::Cosmos => Duration::from_secs(16),
            ChainKind::Icon => Duration::from_secs(60),
            ChainKind::Solana => Duration::from_secs(60),
            ChainKind::Stellar => Duration::from_secs(120),
            ChainKind::Sui => Duration::from_secs(60),
            ChainKind::Stacks => Duration::from_secs(120),
        }
    }

    /// Families whose node pushes matching events over a subscription.
    pub fn supports_subscription(&self) -> bool {
        matches!(self, ChainKind::Cosmos)
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = XCallError;

    fn from_str(s: &str) -> Result<Self> {
        ChainKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| XCallError::Config(format!("unknown chain kind: {}", s)))
    }
}

/// Network identifier of a chain, e.g. `0x2.icon` or `archway`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nid(String);

impl Nid {
    /// Wrap a network identifier.
    pub fn new(nid: impl Into<String>) -> Self {
        Self(nid.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cross-chain endpoint `<nid>/<address>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    /// Network part
    pub nid: Nid,
    /// Account or contract on that network
    pub account: String,
}

impl NetworkAddress {
    /// Build from parts.
    pub fn new(nid: Nid, account: impl Into<String>) -> Self {
        Self {
            nid,
            account: account.into(),
        }
    }

    /// Split on the first `/`. Both sides must be non-empty.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((nid, account)) if !nid.is_empty() && !account.is_empty() => Ok(Self {
                nid: Nid::new(nid),
                account: account.to_string(),
            }),
            _ => Err(XCallError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.nid, self.account)
    }
}

impl FromStr for NetworkAddress {
    type Err = XCallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 256-bit protocol counters rendered as base-10 strings.
macro_rules! u256_counter {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub U256);

        impl $name {
            /// Wrap a small value.
            pub fn from_u64(v: u64) -> Self {
                Self(U256::from(v))
            }

            /// Wrap a `u128` (Borsh, Soroban and Clarity width).
            pub fn from_u128(v: u128) -> Self {
                Self(U256::from(v))
            }

            /// Narrow to `u128`, failing when the value does not fit.
            pub fn to_u128(&self) -> Option<u128> {
                (self.0.bits() <= 128).then(|| self.0.low_u128())
            }

            /// Parse base-10 digits.
            pub fn from_dec_str(s: &str) -> Result<Self> {
                U256::from_dec_str(s.trim())
                    .map(Self)
                    .map_err(|e| XCallError::InvalidValue(format!("{} {:?}: {:?}", stringify!($name), s, e)))
            }

            /// Parse `0x`-prefixed (or bare) hex.
            pub fn from_hex_str(s: &str) -> Result<Self> {
                let digits = s.trim().trim_start_matches("0x");
                if digits.is_empty() {
                    return Ok(Self::default());
                }
                U256::from_str_radix(digits, 16)
                    .map(Self)
                    .map_err(|e| XCallError::InvalidValue(format!("{} {:?}: {:?}", stringify!($name), s, e)))
            }

            /// Minimal `0x` hex form.
            pub fn to_hex(&self) -> String {
                format!("0x{:x}", self.0)
            }

            /// 32-byte big-endian form (ABI word, log topic).
            pub fn to_be_bytes(&self) -> [u8; 32] {
                let mut out = [0u8; 32];
                self.0.to_big_endian(&mut out);
                out
            }

            /// Read a big-endian word of at most 32 bytes.
            pub fn from_be_slice(bytes: &[u8]) -> Self {
                Self(U256::from_big_endian(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = XCallError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_dec_str(s)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self::from_u64(v)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_dec_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

u256_counter!(
    /// Serial number assigned by the source xCall contract. Sole correlation
    /// key between the send path and the receive path.
    SerialNo
);

u256_counter!(
    /// Request id assigned by the destination xCall contract when it admits
    /// an inbound message.
    RequestId
);

/// Opaque message payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty payload (no rollback data).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// UTF-8 view when the payload is text.
    pub fn as_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// `0x` hex form used by ICON and Stacks arguments.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Parse `0x` hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(s.trim().trim_start_matches("0x"))
            .map(Self)
            .map_err(|e| XCallError::InvalidValue(format!("payload hex {:?}: {}", s, e)))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_utf8() {
            Some(s) => f.write_str(s),
            None => f.write_str(&self.to_hex()),
        }
    }
}

/// Text payloads serialize as themselves; anything else, including text
/// that itself starts with `0x`, as `0x` hex.
impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.as_utf8() {
            Some(text) if !text.starts_with("0x") => serializer.serialize_str(text),
            _ => serializer.serialize_str(&self.to_hex()),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.starts_with("0x") {
            return Payload::from_hex(&text).map_err(serde::de::Error::custom);
        }
        Ok(Payload(text.into_bytes()))
    }
}

/// Result code carried by `ResponseMessage` and `CallExecuted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub i64);

impl ResponseCode {
    /// Destination executed the call.
    pub const SUCCESS: ResponseCode = ResponseCode(1);
    /// Destination failed; rollback becomes executable when one was supplied.
    pub const FAILURE: ResponseCode = ResponseCode(0);

    /// True for [`ResponseCode::SUCCESS`].
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the signing identity (keystore entry, account alias or address)
/// handed to the external signer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerKey(pub String);

impl SignerKey {
    /// Wrap a key name.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_network_address_splits_on_first_slash() {
        let addr = NetworkAddress::parse("0x2.icon/cx1234/extra").unwrap();
        assert_eq!(addr.nid.as_str(), "0x2.icon");
        assert_eq!(addr.account, "cx1234/extra");
        assert_eq!(addr.to_string(), "0x2.icon/cx1234/extra");
    }

    #[test]
    fn test_network_address_rejects_missing_parts() {
        assert!(NetworkAddress::parse("archway").is_err());
        assert!(NetworkAddress::parse("/archway1abc").is_err());
        assert!(NetworkAddress::parse("archway/").is_err());
    }

    #[test]
    fn test_serial_no_decimal_and_hex() {
        let sn = SerialNo::from_hex_str("0x1f").unwrap();
        assert_eq!(sn.to_string(), "31");
        assert_eq!(sn, SerialNo::from_dec_str("31").unwrap());
        assert_eq!(sn.to_hex(), "0x1f");
        assert_eq!(SerialNo::from_be_slice(&sn.to_be_bytes()), sn);
    }

    #[test]
    fn test_serial_no_u128_narrowing() {
        let big = SerialNo(U256::MAX);
        assert!(big.to_u128().is_none());
        assert_eq!(SerialNo::from_u128(u128::MAX).to_u128(), Some(u128::MAX));
    }

    #[test]
    fn test_chain_kind_from_str() {
        assert_eq!("EVM".parse::<ChainKind>().unwrap(), ChainKind::Evm);
        assert!("bitcoin".parse::<ChainKind>().is_err());
        assert!(ChainKind::Cosmos.supports_subscription());
        assert!(!ChainKind::Stacks.supports_subscription());
    }

    #[test]
    fn test_payload_json_keeps_bytes() {
        for payload in [
            Payload::from("MessageTransferTestingWithoutRollback"),
            Payload(vec![0xff, 0x00, 0xfe]),
            Payload::from("0xnot-hex"),
        ] {
            let json = serde_json::to_string(&payload).unwrap();
            let back: Payload = serde_json::from_str(&json).unwrap();
            assert_eq!(back, payload, "{}", json);
        }
        assert_eq!(serde_json::to_string(&Payload::from("hi")).unwrap(), "\"hi\"");
        assert_eq!(serde_json::to_string(&Payload(vec![0xff])).unwrap(), "\"0xff\"");
    }

    #[test]
    fn test_payload_display_falls_back_to_hex() {
        assert_eq!(Payload::from("hello").to_string(), "hello");
        assert_eq!(Payload(vec![0xff, 0x00]).to_string(), "0xff00");
    }

    proptest! {
        #[test]
        fn prop_serial_no_decimal_roundtrip(v in any::<u128>()) {
            let sn = SerialNo::from_u128(v);
            prop_assert_eq!(sn.to_string(), v.to_string());
            prop_assert_eq!(SerialNo::from_dec_str(&v.to_string()).unwrap(), sn);
        }

        #[test]
        fn prop_network_address_keeps_account(nid in "[a-z0-9.]{1,12}", account in "[a-zA-Z0-9/]{1,40}") {
            let raw = format!("{}/{}", nid, account);
            let addr = NetworkAddress::parse(&raw).unwrap();
            prop_assert_eq!(addr.nid.as_str(), nid.as_str());
            prop_assert_eq!(addr.account, account);
        }
    }
}
