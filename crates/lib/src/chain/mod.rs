//! Chain interface.
//!
//! Everything the builder does on-chain goes through [`ChainInterface`]; the
//! builder never embeds a transport. [`JsonRpcChain`] talks JSON-RPC to a
//! local development node through an `alloy` client, and tests use an
//! in-memory chain.
//!
//! Signers are resolved by a [`SignerProvider`]. The default provider
//! impersonates accounts on the node, which is how local forks and dev
//! chains are driven.

mod rpc;
mod signer;

use alloy::rpc::types::trace::geth::CallFrame;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use alloy::primitives::{Address, B256, Bytes, Log, TxKind, U256};
pub use alloy::rpc::types::{TransactionInput, TransactionRequest};
pub use rpc::JsonRpcChain;
pub use signer::{ImpersonatingSigners, Signer, SignerProvider};

/// A call frame of the node's `callTracer`.
pub type CallTrace = CallFrame;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
  #[error("execution reverted{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
  Revert { data: Option<Bytes>, message: Option<String> },

  #[error("transaction {hash} failed on-chain")]
  Failed { hash: B256 },

  #[error("rpc error {code}: {message}")]
  Rpc {
    code: i64,
    message: String,
    data: Option<Value>,
  },

  #[error("transport error: {0}")]
  Transport(String),

  #[error("invalid response to {method}: {message}")]
  InvalidResponse { method: String, message: String },

  #[error("timed out waiting for receipt of {0}")]
  Timeout(B256),
}

impl ChainError {
  /// The revert payload carried by this error, if any.
  ///
  /// Nodes put it in the `data` of the JSON-RPC error, either directly or
  /// nested under another `data` key.
  pub fn revert_data(&self) -> Option<Bytes> {
    match self {
      ChainError::Revert { data, .. } => data.clone(),
      ChainError::Rpc { data: Some(data), .. } => {
        let payload = match data {
          Value::Object(map) => map.get("data")?,
          other => other,
        };
        payload.as_str()?.parse().ok()
      }
      _ => None,
    }
  }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionReceipt {
  pub transaction_hash: B256,
  pub contract_address: Option<Address>,
  pub logs: Vec<Log>,
  pub status: bool,
  pub block_number: u64,
}

/// Access to a chain.
///
/// Implementations are used from a single build at a time; calls are made
/// sequentially and never overlap.
#[async_trait]
pub trait ChainInterface: Send + Sync {
  /// The chain id reported by the node.
  async fn chain_id(&self) -> Result<u64, ChainError>;

  /// Raw JSON-RPC request, used for node control methods.
  async fn send(&self, method: &str, params: Value) -> Result<Value, ChainError>;

  /// Deployed code at an address, empty when there is none.
  async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

  /// Read-only call.
  async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError>;

  async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError>;

  /// Send a transaction and wait for it to be mined.
  ///
  /// A mined but reverted transaction returns a receipt with `status == false`.
  async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TransactionReceipt, ChainError>;

  /// Call trace of a mined transaction. `None` when the node cannot trace.
  async fn trace_transaction(&self, _hash: B256) -> Result<Option<CallTrace>, ChainError> {
    Ok(None)
  }
}

/// Calldata carried by a request, empty when it has none.
pub fn request_input(tx: &TransactionRequest) -> &[u8] {
  tx.input.input().map(|b| b.as_ref()).unwrap_or_default()
}
