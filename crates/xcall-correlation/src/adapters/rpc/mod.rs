//! # Network Ledger Clients
//!
//! Each client implements one family's ledger port over the node's public
//! RPC. Reads go straight to the node. Writes that need a key the harness
//! does not hold are handed to an external [`TransactionSubmitter`]; without
//! one they fail with [`XCallError::Unsupported`].

mod cosmos;
mod evm;
mod icon;
pub mod json_rpc;
mod solana;
mod stacks;
mod stellar;
mod sui;

pub use cosmos::CosmosRpcClient;
pub use evm::EvmRpcClient;
pub use icon::IconRpcClient;
pub use json_rpc::JsonRpcClient;
pub use solana::SolanaRpcClient;
pub use stacks::StacksRpcClient;
pub use stellar::StellarRpcClient;
pub use sui::SuiRpcClient;

use crate::domain::{Nid, Result, SignerKey, XCallError};
use crate::ports::{NativeCall, TransactionSubmitter};
use std::sync::Arc;
use tracing::debug;

/// Optional external signer shared by the clients.
pub type Submitter = Option<Arc<dyn TransactionSubmitter>>;

/// Hand `call` to the external signer.
pub(crate) async fn submit_external(
    submitter: &Submitter,
    nid: &Nid,
    signer: &SignerKey,
    call: NativeCall,
) -> Result<String> {
    let Some(submitter) = submitter else {
        return Err(XCallError::Unsupported {
            chain: nid.to_string(),
            operation: format!("{} submission without a transaction submitter", call.kind()),
        });
    };
    let tx_id = submitter.submit(nid, signer, call).await?;
    debug!(chain = %nid, tx = %tx_id, "Submitted through external signer");
    Ok(tx_id)
}
