use std::time::Duration;

use alloy::network::ReceiptResponse;
use alloy::primitives::U64;
use alloy::rpc::client::{ClientBuilder, ReqwestClient};
use alloy::rpc::json_rpc::{RpcRecv, RpcSend};
use alloy::rpc::types::{BlockNumberOrTag, TransactionReceipt as RpcReceipt};
use alloy::transports::http::reqwest;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::{Address, B256, Bytes, CallTrace, ChainError, ChainInterface, TransactionReceipt, TransactionRequest};

const METHOD_NOT_FOUND: i64 = -32601;
const RECEIPT_POLL: Duration = Duration::from_millis(100);
const RECEIPT_ATTEMPTS: u32 = 600;

/// JSON-RPC client for a development node.
#[derive(Clone, Debug)]
pub struct JsonRpcChain {
  inner: ReqwestClient,
  url: String,
}

impl JsonRpcChain {
  pub fn new(url: &str) -> Result<Self, ChainError> {
    let parsed: reqwest::Url = url
      .parse()
      .map_err(|e| ChainError::Transport(format!("invalid RPC URL {url}: {e}")))?;
    let http = reqwest::ClientBuilder::new()
      .timeout(Duration::from_secs(30))
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| ChainError::Transport(format!("failed to create HTTP client: {e}")))?;

    Ok(Self {
      inner: ClientBuilder::default().http_with_client(http, parsed),
      url: url.to_string(),
    })
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  async fn request<P: RpcSend, R: RpcRecv>(&self, method: &str, params: P) -> Result<R, ChainError> {
    trace!(method, "rpc request");
    self
      .inner
      .request(method.to_string(), params)
      .await
      .map_err(|e| from_alloy(method, e))
  }
}

fn from_alloy(method: &str, error: RpcError<TransportErrorKind>) -> ChainError {
  match error {
    RpcError::ErrorResp(payload) => ChainError::Rpc {
      code: payload.code,
      message: payload.message.to_string(),
      data: payload.data.and_then(|raw| serde_json::from_str(raw.get()).ok()),
    },
    RpcError::DeserError { err, .. } => ChainError::InvalidResponse {
      method: method.to_string(),
      message: err.to_string(),
    },
    other => ChainError::Transport(other.to_string()),
  }
}

fn to_receipt(receipt: &RpcReceipt) -> TransactionReceipt {
  TransactionReceipt {
    transaction_hash: receipt.transaction_hash,
    contract_address: receipt.contract_address,
    logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    status: receipt.status(),
    block_number: receipt.block_number.unwrap_or_default(),
  }
}

#[async_trait]
impl ChainInterface for JsonRpcChain {
  async fn chain_id(&self) -> Result<u64, ChainError> {
    let id: U64 = self.request("eth_chainId", ()).await?;
    Ok(id.to::<u64>())
  }

  async fn send(&self, method: &str, params: Value) -> Result<Value, ChainError> {
    self.request(method, params).await
  }

  async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
    self
      .request("eth_getCode", (address, BlockNumberOrTag::Latest))
      .await
  }

  async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
    self.request("eth_call", (tx, BlockNumberOrTag::Latest)).await
  }

  async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
    let gas: U64 = self.request("eth_estimateGas", (tx,)).await?;
    Ok(gas.to::<u64>())
  }

  async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TransactionReceipt, ChainError> {
    let hash: B256 = self.request("eth_sendTransaction", (tx,)).await?;
    debug!(hash = %hash, "transaction sent");

    for _ in 0..RECEIPT_ATTEMPTS {
      let receipt: Option<RpcReceipt> = self.request("eth_getTransactionReceipt", (hash,)).await?;
      if let Some(receipt) = receipt {
        return Ok(to_receipt(&receipt));
      }
      tokio::time::sleep(RECEIPT_POLL).await;
    }

    Err(ChainError::Timeout(hash))
  }

  async fn trace_transaction(&self, hash: B256) -> Result<Option<CallTrace>, ChainError> {
    let result = self
      .request::<_, CallTrace>("debug_traceTransaction", (hash, json!({"tracer": "callTracer"})))
      .await;

    match result {
      Ok(frame) => Ok(Some(frame)),
      Err(ChainError::Rpc { code, .. }) if code == METHOD_NOT_FOUND => Ok(None),
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use alloy::rpc::json_rpc::ErrorPayload;

  #[test]
  fn rejects_malformed_url() {
    assert!(matches!(JsonRpcChain::new("not a url"), Err(ChainError::Transport(_))));
    assert_eq!(
      JsonRpcChain::new("http://127.0.0.1:8545").unwrap().url(),
      "http://127.0.0.1:8545"
    );
  }

  #[test]
  fn error_response_keeps_revert_data() {
    let payload: ErrorPayload =
      serde_json::from_str(r#"{"code": 3, "message": "execution reverted", "data": "0x08c379a0"}"#).unwrap();
    let err = from_alloy("eth_estimateGas", RpcError::ErrorResp(payload));

    assert!(matches!(&err, ChainError::Rpc { code: 3, .. }));
    assert_eq!(err.revert_data(), Some(Bytes::from(vec![0x08, 0xc3, 0x79, 0xa0])));
  }

  fn rpc_receipt(status: &str, contract: Value) -> RpcReceipt {
    serde_json::from_value(json!({
      "type": "0x0",
      "status": status,
      "cumulativeGasUsed": "0x5208",
      "logs": [{
        "address": "0x00000000000000000000000000000000000000bb",
        "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
        "data": "0x",
        "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000010",
        "blockNumber": "0x10",
        "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
        "transactionIndex": "0x0",
        "logIndex": "0x0",
        "removed": false
      }],
      "logsBloom": format!("0x{}", "0".repeat(512)),
      "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
      "transactionIndex": "0x0",
      "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000010",
      "blockNumber": "0x10",
      "gasUsed": "0x5208",
      "effectiveGasPrice": "0x1",
      "from": "0x0000000000000000000000000000000000000001",
      "to": null,
      "contractAddress": contract
    }))
    .unwrap()
  }

  #[test]
  fn receipt_fields_are_carried_over() {
    let receipt = to_receipt(&rpc_receipt("0x1", json!("0x00000000000000000000000000000000000000bb")));

    assert_eq!(receipt.transaction_hash, B256::with_last_byte(0xaa));
    assert_eq!(receipt.contract_address, Some(Address::with_last_byte(0xbb)));
    assert!(receipt.status);
    assert_eq!(receipt.block_number, 16);
    assert_eq!(receipt.logs[0].address, Address::with_last_byte(0xbb));
    assert_eq!(receipt.logs[0].topics(), &[B256::with_last_byte(1)]);
  }

  #[test]
  fn failed_receipt_status() {
    let receipt = to_receipt(&rpc_receipt("0x0", Value::Null));
    assert!(!receipt.status);
    assert_eq!(receipt.contract_address, None);
  }
}
