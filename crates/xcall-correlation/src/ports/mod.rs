//! # Ports Module
//!
//! Inbound capability contract, outbound collaborators and the native ledger
//! surfaces adapters are built on.

pub mod inbound;
pub mod ledgers;
pub mod outbound;

pub use inbound::XCallChain;
pub use outbound::{NativeCall, NodeControl, TransactionSubmitter};
