//! # Domain Module
//!
//! Core types for xCall correlation: values, events, registry, flow state.

pub mod entities;
pub mod errors;
pub mod flow;
pub mod registry;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use flow::{FlowPhase, XCallFlow};
pub use registry::{ChainInfo, ContractRegistry, ContractRegistryBuilder, CONNECTION, DAPP, XCALL};
pub use value_objects::*;
