//! # Domain Errors
//!
//! Error taxonomy shared by every adapter family and the orchestrator.

use thiserror::Error;

/// Failure log fragments that identify a payload-size rejection across
/// ledger families.
const SIZE_LIMIT_MARKERS: &[&str] = &[
    "maxdatasizeexceeded",
    "max data size exceeded",
    "maxdatasize",
    "data size exceeded",
    "payload too large",
    "exceeds max size",
    "size limit",
];

/// Cross-chain correlation errors.
#[derive(Debug, Error)]
pub enum XCallError {
    /// Transaction rejected or reverted after submission.
    #[error("[{chain}] transaction failed with code {code}: {log}")]
    Submission {
        /// Chain NID
        chain: String,
        /// Raw status or error code reported by the ledger
        code: i64,
        /// Raw failure log
        log: String,
    },

    /// Correlation deadline expired without a matching event.
    #[error("[{chain}] {signature} with sn {sn} not found in heights {from_height}..={to_height}")]
    EventNotFound {
        /// Chain NID
        chain: String,
        /// Logical event name
        signature: String,
        /// Serial number (or request id) searched for
        sn: String,
        /// Inclusive lower bound scanned
        from_height: u64,
        /// Highest height scanned
        to_height: u64,
    },

    /// A native event could not be decoded into its logical shape.
    #[error("[{chain}] failed to decode {signature}: {reason}")]
    Decode {
        /// Chain NID
        chain: String,
        /// Logical event name
        signature: String,
        /// Decoder message
        reason: String,
    },

    /// Contract name missing from the registry.
    #[error("[{chain}] contract {name} is not registered")]
    RegistryLookup {
        /// Chain NID
        chain: String,
        /// Registry key
        name: String,
    },

    /// Transport failure talking to a ledger RPC or indexer.
    #[error("[{chain}] rpc error: {message}")]
    Rpc {
        /// Chain NID
        chain: String,
        /// Transport message
        message: String,
    },

    /// Malformed `<nid>/<address>` endpoint.
    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    /// Value that does not parse as a counter, hex payload or literal.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Illegal flow state transition.
    #[error("Invalid flow transition: {from} -> {to}")]
    InvalidFlowTransition {
        /// Current phase
        from: String,
        /// Attempted phase
        to: String,
    },

    /// Correlation cancelled by the caller.
    #[error("[{chain}] wait for {signature} cancelled")]
    Cancelled {
        /// Chain NID
        chain: String,
        /// Logical event name
        signature: String,
    },

    /// Operation not available on this adapter or client.
    #[error("[{chain}] operation not supported: {operation}")]
    Unsupported {
        /// Chain NID
        chain: String,
        /// Operation name
        operation: String,
    },

    /// Invalid harness configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl XCallError {
    /// Build an RPC error from any displayable transport failure.
    pub fn rpc(chain: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Rpc {
            chain: chain.into(),
            message: message.to_string(),
        }
    }

    /// Build a decode error.
    pub fn decode(
        chain: impl Into<String>,
        signature: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Decode {
            chain: chain.into(),
            signature: signature.into(),
            reason: reason.to_string(),
        }
    }

    /// True when a submission failed because the payload exceeded the
    /// protocol's maximum message size.
    pub fn is_size_limit_violation(&self) -> bool {
        match self {
            Self::Submission { log, .. } => {
                let log = log.to_lowercase();
                SIZE_LIMIT_MARKERS.iter().any(|marker| log.contains(marker))
            }
            _ => false,
        }
    }

    /// True when a correlation wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EventNotFound { .. })
    }

    /// True for transport errors worth retrying inside a poll loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submission { .. } => "submission",
            Self::EventNotFound { .. } => "timeout",
            Self::Decode { .. } => "decode",
            Self::RegistryLookup { .. } => "registry",
            Self::Rpc { .. } => "rpc",
            Self::InvalidAddress(_) => "address",
            Self::InvalidValue(_) => "value",
            Self::InvalidFlowTransition { .. } => "flow",
            Self::Cancelled { .. } => "cancelled",
            Self::Unsupported { .. } => "unsupported",
            Self::Config(_) => "config",
        }
    }
}

/// Result alias for correlation operations.
pub type Result<T> = std::result::Result<T, XCallError>;
