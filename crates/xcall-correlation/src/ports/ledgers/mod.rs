//! # Ledger Ports
//!
//! Native RPC surface of each ledger family. Adapters are generic over these
//! traits; `adapters::rpc` provides network clients and `testkit` simulated
//! ledgers.

pub mod cosmos;
pub mod evm;
pub mod icon;
pub mod solana;
pub mod stacks;
pub mod stellar;
pub mod sui;

pub use cosmos::{AbciAttribute, AbciEvent, CosmosEventQuery, CosmosExecute, CosmosLedger, CosmosTxResult};
pub use evm::{EvmCall, EvmLedger, EvmLog, EvmReceipt, LogFilter};
pub use icon::{IconCall, IconEventLog, IconFailure, IconLedger, IconTxResult};
pub use solana::{SignatureInfo, SolanaInstruction, SolanaLedger, SolanaTransaction};
pub use stacks::{ClarityCall, StacksContractEvent, StacksEventPage, StacksLedger, StacksTransaction};
pub use stellar::{EventsStart, SorobanEvent, SorobanInvocation, SorobanTransaction, StellarLedger};
pub use sui::{MoveCall, SuiEvent, SuiEventId, SuiLedger, SuiTransactionBlock};
