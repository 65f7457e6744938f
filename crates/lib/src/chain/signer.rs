use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use alloy::primitives::keccak256;

use super::{Address, ChainError, ChainInterface, TransactionRequest};
use crate::consts::{IMPERSONATED_BALANCE, rpc};

/// An account able to send transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
  pub address: Address,
}

#[async_trait]
pub trait SignerProvider: Send + Sync {
  /// A signer for a specific address.
  async fn get_signer(&self, address: Address) -> Result<Signer, ChainError>;

  /// A signer for when the configuration does not name one.
  ///
  /// The same intent and salt must always yield the same signer.
  async fn get_default_signer(&self, intent: &TransactionRequest, salt: &str) -> Result<Signer, ChainError>;
}

/// Signs by impersonating accounts on a development node.
///
/// Impersonated accounts are funded so they can pay for gas.
pub struct ImpersonatingSigners {
  chain: Arc<dyn ChainInterface>,
}

impl ImpersonatingSigners {
  pub fn new(chain: Arc<dyn ChainInterface>) -> Self {
    Self { chain }
  }

  /// Deterministic pseudo-address for a deploy or call intent.
  pub fn derive_address(intent: &TransactionRequest, salt: &str) -> Address {
    let seed = json!({ "intent": intent, "salt": salt }).to_string();
    Address::from_word(keccak256(seed.as_bytes()))
  }
}

#[async_trait]
impl SignerProvider for ImpersonatingSigners {
  async fn get_signer(&self, address: Address) -> Result<Signer, ChainError> {
    self.chain.send(rpc::IMPERSONATE, json!([address])).await?;
    self
      .chain
      .send(rpc::SET_BALANCE, json!([address, IMPERSONATED_BALANCE]))
      .await?;
    debug!(address = %address, "impersonating signer");
    Ok(Signer { address })
  }

  async fn get_default_signer(&self, intent: &TransactionRequest, salt: &str) -> Result<Signer, ChainError> {
    self.get_signer(Self::derive_address(intent, salt)).await
  }
}
