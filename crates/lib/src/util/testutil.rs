//! Test utilities for cannon-lib.
//!
//! [`MockChain`] is an in-memory stand-in for a development node. It deploys
//! contracts at addresses derived from the sender and its nonce, mines every
//! transaction instantly, and supports the node control methods the builder
//! uses (snapshots, state dumps, impersonation).

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::abi::encode_hex;
use crate::chain::{
  Address, B256, Bytes, CallTrace, ChainError, ChainInterface, Log, TransactionReceipt, TransactionRequest, TxKind,
  request_input,
};
use crate::consts::rpc;

/// Code written for every deployed contract.
pub const DEPLOYED_CODE: [u8; 2] = [0x60, 0x80];

/// Node state that snapshots and dumps capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ChainState {
  code: BTreeMap<Address, Bytes>,
  nonces: BTreeMap<Address, u64>,
}

#[derive(Default)]
struct Inner {
  state: ChainState,
  snapshots: BTreeMap<u64, ChainState>,
  next_snapshot: u64,
  tx_count: u64,
  deployments: u64,
  control_calls: Vec<String>,
  traces: BTreeMap<B256, CallTrace>,
  reverts: Vec<(String, Bytes)>,
  emits: Vec<(String, Vec<Log>)>,
  call_results: Vec<(String, Bytes)>,
  sent: Vec<TransactionRequest>,
}

pub struct MockChain {
  chain_id: u64,
  inner: Mutex<Inner>,
}

impl MockChain {
  pub fn new(chain_id: u64) -> Self {
    Self {
      chain_id,
      inner: Mutex::new(Inner::default()),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap()
  }

  /// Control methods received through `send`, in order.
  pub fn control_calls(&self) -> Vec<String> {
    self.lock().control_calls.clone()
  }

  pub fn set_trace(&self, hash: B256, trace: CallTrace) {
    self.lock().traces.insert(hash, trace);
  }

  pub fn set_code(&self, address: Address, code: &[u8]) {
    self.lock().state.code.insert(address, Bytes::copy_from_slice(code));
  }

  /// Revert any transaction or call whose hex data starts with `prefix`.
  pub fn revert_on(&self, prefix: &str, revert_data: &[u8]) {
    self
      .lock()
      .reverts
      .push((prefix.to_lowercase(), Bytes::copy_from_slice(revert_data)));
  }

  /// Attach logs to the receipt of transactions whose data starts with `prefix`.
  pub fn emit_on(&self, prefix: &str, logs: Vec<Log>) {
    self.lock().emits.push((prefix.to_lowercase(), logs));
  }

  /// Answer calls whose data starts with `prefix` with `result`.
  pub fn respond_to(&self, prefix: &str, result: &[u8]) {
    self
      .lock()
      .call_results
      .push((prefix.to_lowercase(), Bytes::copy_from_slice(result)));
  }

  /// Number of contracts created so far.
  pub fn deployments(&self) -> u64 {
    self.lock().deployments
  }

  /// Every transaction submitted, including reverted ones.
  pub fn sent(&self) -> Vec<TransactionRequest> {
    self.lock().sent.clone()
  }

  /// Addresses with deployed code.
  pub fn accounts(&self) -> Vec<Address> {
    self.lock().state.code.keys().copied().collect()
  }

  fn matching_revert(inner: &Inner, data: &str) -> Option<Bytes> {
    inner
      .reverts
      .iter()
      .find(|(prefix, _)| data.starts_with(prefix.as_str()))
      .map(|(_, revert)| revert.clone())
  }
}

#[async_trait]
impl ChainInterface for MockChain {
  async fn chain_id(&self) -> Result<u64, ChainError> {
    Ok(self.chain_id)
  }

  async fn send(&self, method: &str, params: Value) -> Result<Value, ChainError> {
    let mut inner = self.lock();
    inner.control_calls.push(method.to_string());
    match method {
      rpc::SNAPSHOT => {
        let id = inner.next_snapshot;
        inner.next_snapshot += 1;
        let state = inner.state.clone();
        inner.snapshots.insert(id, state);
        Ok(json!(format!("{:#x}", id)))
      }
      rpc::REVERT => {
        let id = params
          .get(0)
          .and_then(Value::as_str)
          .and_then(|id| u64::from_str_radix(id.trim_start_matches("0x"), 16).ok())
          .unwrap_or(u64::MAX);
        match inner.snapshots.remove(&id) {
          Some(state) => {
            inner.state = state;
            inner.snapshots.retain(|k, _| *k < id);
            Ok(json!(true))
          }
          None => Ok(json!(false)),
        }
      }
      rpc::DUMP_STATE => serde_json::to_value(&inner.state).map_err(|e| ChainError::InvalidResponse {
        method: method.to_string(),
        message: e.to_string(),
      }),
      rpc::LOAD_STATE => {
        let loaded: ChainState = params
          .get(0)
          .cloned()
          .map(serde_json::from_value)
          .transpose()
          .map_err(|e| ChainError::InvalidResponse {
            method: method.to_string(),
            message: e.to_string(),
          })?
          .unwrap_or_default();
        inner.state.code.extend(loaded.code);
        for (address, nonce) in loaded.nonces {
          let entry = inner.state.nonces.entry(address).or_default();
          *entry = (*entry).max(nonce);
        }
        Ok(json!(true))
      }
      rpc::IMPERSONATE | rpc::SET_BALANCE => Ok(Value::Null),
      other => Err(ChainError::Rpc {
        code: -32601,
        message: format!("method {} not supported", other),
        data: None,
      }),
    }
  }

  async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
    Ok(self.lock().state.code.get(&address).cloned().unwrap_or_default())
  }

  async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
    let inner = self.lock();
    let data = encode_hex(request_input(tx));
    if let Some(data) = Self::matching_revert(&inner, &data) {
      return Err(ChainError::Revert {
        data: Some(data),
        message: None,
      });
    }
    Ok(
      inner
        .call_results
        .iter()
        .find(|(prefix, _)| data.starts_with(prefix.as_str()))
        .map(|(_, result)| result.clone())
        .unwrap_or_default(),
    )
  }

  async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
    let inner = self.lock();
    match Self::matching_revert(&inner, &encode_hex(request_input(tx))) {
      Some(data) => Err(ChainError::Revert {
        data: Some(data),
        message: Some("execution reverted".into()),
      }),
      None => Ok(100_000),
    }
  }

  async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TransactionReceipt, ChainError> {
    let mut inner = self.lock();
    inner.sent.push(tx.clone());
    inner.tx_count += 1;
    let hash = B256::left_padding_from(&inner.tx_count.to_be_bytes());
    let data = encode_hex(request_input(tx));

    if Self::matching_revert(&inner, &data).is_some() {
      return Ok(TransactionReceipt {
        transaction_hash: hash,
        status: false,
        block_number: inner.tx_count,
        ..Default::default()
      });
    }

    let from = tx.from.unwrap_or_default();
    let nonce = {
      let entry = inner.state.nonces.entry(from).or_default();
      let current = *entry;
      *entry += 1;
      current
    };

    let contract_address = match tx.to {
      Some(TxKind::Call(_)) => None,
      Some(TxKind::Create) | None => {
        let address = from.create(nonce);
        inner.state.code.insert(address, Bytes::from_static(&DEPLOYED_CODE));
        inner.deployments += 1;
        Some(address)
      }
    };

    let logs = inner
      .emits
      .iter()
      .filter(|(prefix, _)| data.starts_with(prefix.as_str()))
      .flat_map(|(_, logs)| logs.clone())
      .collect();

    Ok(TransactionReceipt {
      transaction_hash: hash,
      contract_address,
      logs,
      status: true,
      block_number: inner.tx_count,
    })
  }

  async fn trace_transaction(&self, hash: B256) -> Result<Option<CallTrace>, ChainError> {
    Ok(self.lock().traces.get(&hash).cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chain::TransactionInput;

  #[tokio::test]
  async fn deploys_and_reverts_to_snapshot() {
    let chain = MockChain::new(1);
    let snapshot = chain.send(rpc::SNAPSHOT, json!([])).await.unwrap();

    let receipt = chain
      .send_transaction(&TransactionRequest {
        from: Some(Address::with_last_byte(1)),
        input: TransactionInput::new(Bytes::from_static(&[0x60])),
        ..Default::default()
      })
      .await
      .unwrap();
    let address = receipt.contract_address.unwrap();
    assert_eq!(address, Address::with_last_byte(1).create(0));
    assert_eq!(chain.get_code(address).await.unwrap(), Bytes::from_static(&DEPLOYED_CODE));

    chain.send(rpc::REVERT, json!([snapshot])).await.unwrap();
    assert!(chain.get_code(address).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn dump_and_load_restore_code() {
    let chain = MockChain::new(1);
    chain.set_code(Address::with_last_byte(0xaa), &[0x01]);
    let dump = chain.send(rpc::DUMP_STATE, json!([])).await.unwrap();

    let other = MockChain::new(1);
    other.send(rpc::LOAD_STATE, json!([dump])).await.unwrap();
    assert_eq!(other.get_code(Address::with_last_byte(0xaa)).await.unwrap(), Bytes::from_static(&[0x01]));
  }

  #[tokio::test]
  async fn calls_match_on_hex_prefix() {
    let chain = MockChain::new(1);
    chain.respond_to("0xABCD", &[0x2a]);
    let tx = TransactionRequest {
      input: TransactionInput::new(Bytes::from_static(&[0xab, 0xcd, 0x01])),
      ..Default::default()
    };
    assert_eq!(chain.call(&tx).await.unwrap(), Bytes::from_static(&[0x2a]));
    assert!(chain.call(&TransactionRequest::default()).await.unwrap().is_empty());
  }
}
