//! # Outbound Ports
//!
//! External collaborators: transaction signing and node lifecycle control.

use super::ledgers::{
    ClarityCall, CosmosExecute, EvmCall, IconCall, MoveCall, SolanaInstruction, SorobanInvocation,
};
use crate::domain::{ChainKind, Nid, Result, SignerKey};
use async_trait::async_trait;

/// A family-native call handed to the external signer.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeCall {
    /// EVM contract call
    Evm(EvmCall),
    /// CosmWasm execute
    Cosmos(CosmosExecute),
    /// ICON SCORE call
    Icon(IconCall),
    /// Solana instruction
    Solana(SolanaInstruction),
    /// Soroban invocation
    Stellar(SorobanInvocation),
    /// Sui Move call
    Sui(MoveCall),
    /// Stacks contract call
    Stacks(ClarityCall),
}

impl NativeCall {
    /// Family this call belongs to.
    pub fn kind(&self) -> ChainKind {
        match self {
            NativeCall::Evm(_) => ChainKind::Evm,
            NativeCall::Cosmos(_) => ChainKind::Cosmos,
            NativeCall::Icon(_) => ChainKind::Icon,
            NativeCall::Solana(_) => ChainKind::Solana,
            NativeCall::Stellar(_) => ChainKind::Stellar,
            NativeCall::Sui(_) => ChainKind::Sui,
            NativeCall::Stacks(_) => ChainKind::Stacks,
        }
    }
}

/// Signs and broadcasts transactions; keystores live outside the harness.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Sign `call` with `signer` on chain `nid`, broadcast it and return the
    /// transaction id in the family's native format.
    async fn submit(&self, nid: &Nid, signer: &SignerKey, call: NativeCall) -> Result<String>;
}

/// Pauses and resumes a chain's block production (container control).
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Stop producing blocks on `nid`.
    async fn pause(&self, nid: &Nid) -> Result<()>;

    /// Resume block production on `nid`.
    async fn unpause(&self, nid: &Nid) -> Result<()>;
}
