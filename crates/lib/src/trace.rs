//! Failure diagnostics.
//!
//! When a transaction fails, [`explain_failure`] gathers what it can:
//!
//! 1. A call trace from the node, when it supports tracing
//! 2. The revert payload, decoded against every ABI known to the build
//!    context (imports included). The builtin `Error(string)` and
//!    `Panic(uint256)` decoders take precedence over custom errors.
//! 3. A rendered, indented call/create tree
//!
//! Nothing here fails: missing pieces are left out and the original chain
//! error is always kept.

use std::fmt;

use ethabi::ParamType;
use serde_json::Value;
use tracing::debug;

use crate::abi::{encode_hex, format_address, parse_abi, token_to_json};
use crate::chain::{Address, B256, Bytes, CallTrace, ChainError, ChainInterface};
use crate::context::BuildContext;

const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Solidity panic codes.
const PANIC_CODES: &[(u64, &str)] = &[
  (0x00, "generic compiler panic"),
  (0x01, "assertion failed"),
  (0x11, "arithmetic overflow or underflow"),
  (0x12, "division or modulo by zero"),
  (0x21, "invalid enum value"),
  (0x22, "incorrectly encoded storage byte array"),
  (0x31, "pop on empty array"),
  (0x32, "array index out of bounds"),
  (0x41, "out of memory"),
  (0x51, "call to uninitialized function"),
];

/// A revert payload decoded against a known error definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRevert {
  /// `Error`, `Panic`, or the custom error name (prefixed by the contract it was found in).
  pub name: String,
  pub args: Vec<Value>,
}

impl fmt::Display for DecodedRevert {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.name.as_str(), self.args.as_slice()) {
      ("Error", [Value::String(reason)]) => write!(f, "{}", reason),
      ("Panic", [code]) => {
        let code_num = code.as_str().and_then(|c| c.parse::<u64>().ok());
        let meaning = code_num
          .and_then(|c| PANIC_CODES.iter().find(|(k, _)| *k == c))
          .map(|(_, m)| *m)
          .unwrap_or("unknown panic code");
        write!(f, "panic 0x{:02x}: {}", code_num.unwrap_or_default(), meaning)
      }
      (name, args) => {
        let rendered: Vec<String> = args.iter().map(render_arg).collect();
        write!(f, "{}({})", name, rendered.join(", "))
      }
    }
  }
}

fn render_arg(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Everything known about a failed transaction.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
  pub source: ChainError,
  pub revert: Option<DecodedRevert>,
  pub trace: Option<String>,
}

impl fmt::Display for ExecutionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.source)?;
    if let Some(revert) = &self.revert {
      write!(f, "\nreason: {}", revert)?;
    }
    if let Some(trace) = &self.trace {
      write!(f, "\ntrace:\n{}", trace)?;
    }
    Ok(())
  }
}

/// Decode a revert payload.
pub fn decode_revert(data: &[u8], ctx: &BuildContext) -> Option<DecodedRevert> {
  if data.len() < 4 {
    return None;
  }
  let (selector, body) = data.split_at(4);

  if selector == ERROR_SELECTOR {
    let tokens = ethabi::decode(&[ParamType::String], body).ok()?;
    return Some(DecodedRevert {
      name: "Error".to_string(),
      args: tokens.iter().map(token_to_json).collect(),
    });
  }
  if selector == PANIC_SELECTOR {
    let tokens = ethabi::decode(&[ParamType::Uint(256)], body).ok()?;
    return Some(DecodedRevert {
      name: "Panic".to_string(),
      args: tokens.iter().map(token_to_json).collect(),
    });
  }

  for (contract_name, abi) in ctx.all_abis() {
    let Ok(contract) = parse_abi(abi) else {
      continue;
    };
    for error in contract.errors.values().flatten() {
      let kinds: Vec<ParamType> = error.inputs.iter().map(|p| p.kind.clone()).collect();
      if ethabi::short_signature(&error.name, &kinds) != selector {
        continue;
      }
      if let Ok(tokens) = ethabi::decode(&kinds, body) {
        return Some(DecodedRevert {
          name: format!("{}.{}", contract_name, error.name),
          args: tokens.iter().map(token_to_json).collect(),
        });
      }
    }
  }

  None
}

/// Name of the context contract deployed at `address`, searching imports too.
fn contract_at(ctx: &BuildContext, address: Address) -> Option<(String, Value)> {
  for (name, contract) in &ctx.contracts {
    if contract.address.parse::<Address>().ok() == Some(address) {
      return Some((name.clone(), contract.abi.clone()));
    }
  }
  for (label, import) in &ctx.imports {
    if let Some((name, abi)) = contract_at(import, address) {
      return Some((format!("{}.{}", label, name), abi));
    }
  }
  None
}

fn describe_call(abi: &Value, bytes: &[u8]) -> Option<String> {
  let contract = parse_abi(abi).ok()?;
  if bytes.len() < 4 {
    return None;
  }
  let function = contract
    .functions()
    .find(|f| f.short_signature().as_slice() == &bytes[..4])?;
  let kinds: Vec<ParamType> = function.inputs.iter().map(|p| p.kind.clone()).collect();
  let args = ethabi::decode(&kinds, &bytes[4..]).ok()?;
  let rendered: Vec<String> = args.iter().map(|t| render_arg(&token_to_json(t))).collect();
  Some(format!("{}({})", function.name, rendered.join(", ")))
}

/// Render a call trace as an indented tree, one frame per line.
pub fn render_trace(trace: &CallTrace, ctx: &BuildContext) -> String {
  let mut lines = Vec::new();
  render_frame(trace, ctx, 0, &mut lines);
  lines.join("\n")
}

fn render_frame(frame: &CallTrace, ctx: &BuildContext, depth: usize, lines: &mut Vec<String>) {
  let indent = "  ".repeat(depth);
  let is_create = frame.typ.starts_with("CREATE");
  let known = frame.to.and_then(|to| contract_at(ctx, to));
  let target_name = match (&known, frame.to) {
    (Some((name, _)), _) => name.clone(),
    (None, Some(to)) => format_address(to),
    (None, None) => "?".to_string(),
  };

  let mut line = if is_create {
    format!("{}{} {}", indent, frame.typ, target_name)
  } else {
    let call = known
      .as_ref()
      .and_then(|(_, abi)| describe_call(abi, &frame.input))
      .unwrap_or_else(|| format!("{}(..)", encode_hex(&frame.input[..frame.input.len().min(4)])));
    format!("{}{} {}.{}", indent, frame.typ, target_name, call)
  };

  if let Some(value) = frame.value.filter(|v| !v.is_zero()) {
    line.push_str(&format!(" value={}", value));
  }

  if let Some(error) = &frame.error {
    line.push_str(&format!(" !! {}", error));
    if let Some(revert) = frame.output.as_ref().and_then(|o| decode_revert(o, ctx)) {
      line.push_str(&format!(": {}", revert));
    }
  } else if let Some(output) = frame.output.as_ref().filter(|o| !o.is_empty() && !is_create) {
    line.push_str(&format!(" => {}", encode_hex(output)));
  }

  lines.push(line);
  for call in &frame.calls {
    render_frame(call, ctx, depth + 1, lines);
  }
}

/// Revert payload of the innermost failing frame.
fn innermost_revert(frame: &CallTrace) -> Option<&Bytes> {
  frame
    .calls
    .iter()
    .rev()
    .find_map(innermost_revert)
    .or_else(|| frame.error.as_ref().and(frame.output.as_ref()).filter(|o| !o.is_empty()))
}

/// Gather diagnostics for a failed transaction.
///
/// `hash` is the mined transaction, if the failure got that far.
pub async fn explain_failure(
  chain: &dyn ChainInterface,
  ctx: &BuildContext,
  error: ChainError,
  hash: Option<B256>,
) -> ExecutionFailure {
  let trace = match hash {
    Some(hash) => match chain.trace_transaction(hash).await {
      Ok(trace) => trace,
      Err(e) => {
        debug!(hash = %hash, error = %e, "call trace unavailable");
        None
      }
    },
    None => None,
  };

  let revert_data = error
    .revert_data()
    .or_else(|| trace.as_ref().and_then(innermost_revert).cloned());
  let revert = revert_data.and_then(|data| decode_revert(&data, ctx));

  ExecutionFailure {
    source: error,
    revert,
    trace: trace.as_ref().map(|t| render_trace(t, ctx)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chain::U256;
  use crate::context::ContractInfo;
  use crate::util::testutil::MockChain;
  use ethabi::Token;
  use serde_json::json;

  fn encode_with_selector(selector: [u8; 4], tokens: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend(ethabi::encode(tokens));
    Bytes::from(data)
  }

  fn vault_ctx() -> BuildContext {
    let abi = json!([
      {"type": "error", "name": "Insufficient", "inputs": [{"name": "needed", "type": "uint256"}]},
      {"type": "function", "name": "withdraw", "stateMutability": "nonpayable",
        "inputs": [{"name": "amount", "type": "uint256"}], "outputs": []}
    ]);
    let mut inner = BuildContext::default();
    inner.contracts.insert(
      "Vault".into(),
      ContractInfo {
        address: "0x00000000000000000000000000000000000000aa".into(),
        abi,
        ..Default::default()
      },
    );
    let mut ctx = BuildContext::default();
    ctx.imports.insert("bank".into(), inner);
    ctx
  }

  #[test]
  fn decodes_error_string() {
    let data = encode_with_selector(ERROR_SELECTOR, &[Token::String("not owner".into())]);
    let decoded = decode_revert(&data, &BuildContext::default()).unwrap();
    assert_eq!(decoded.to_string(), "not owner");
  }

  #[test]
  fn decodes_panic_code() {
    let data = encode_with_selector(PANIC_SELECTOR, &[Token::Uint(ethabi::Uint::from(0x11u64))]);
    let decoded = decode_revert(&data, &BuildContext::default()).unwrap();
    assert_eq!(decoded.name, "Panic");
    assert_eq!(decoded.to_string(), "panic 0x11: arithmetic overflow or underflow");
  }

  #[test]
  fn decodes_custom_error_from_import() {
    let selector = ethabi::short_signature("Insufficient", &[ParamType::Uint(256)]);
    let data = encode_with_selector(selector, &[Token::Uint(ethabi::Uint::from(500u64))]);
    let decoded = decode_revert(&data, &vault_ctx()).unwrap();
    assert_eq!(decoded.name, "bank.Vault.Insufficient");
    assert_eq!(decoded.to_string(), "bank.Vault.Insufficient(500)");
  }

  #[test]
  fn unknown_payload_is_none() {
    assert!(decode_revert(&[0xde, 0xad, 0xbe, 0xef], &vault_ctx()).is_none());
    assert!(decode_revert(&[], &vault_ctx()).is_none());
  }

  #[test]
  fn renders_nested_trace() {
    let selector = ethabi::short_signature("withdraw", &[ParamType::Uint(256)]);
    let input = encode_with_selector(selector, &[Token::Uint(ethabi::Uint::from(7u64))]);
    let revert = encode_with_selector(ERROR_SELECTOR, &[Token::String("empty".into())]);
    let trace = CallTrace {
      typ: "CALL".into(),
      from: Address::with_last_byte(1),
      to: Some(Address::with_last_byte(0xaa)),
      input,
      error: Some("execution reverted".into()),
      output: Some(revert.clone()),
      calls: vec![CallTrace {
        typ: "CREATE".into(),
        from: Address::with_last_byte(0xaa),
        to: Some(Address::with_last_byte(0xbb)),
        input: Bytes::from_static(&[0x60]),
        value: Some(U256::from(5)),
        ..Default::default()
      }],
      ..Default::default()
    };

    let rendered = render_trace(&trace, &vault_ctx());
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "CALL bank.Vault.withdraw(7) !! execution reverted: empty");
    assert_eq!(lines[1], "  CREATE 0x00000000000000000000000000000000000000bb value=5");
  }

  #[tokio::test]
  async fn explain_uses_trace_when_error_has_no_payload() {
    let revert = encode_with_selector(ERROR_SELECTOR, &[Token::String("nope".into())]);
    let chain = MockChain::new(1);
    let hash = B256::with_last_byte(0xfe);
    chain.set_trace(
      hash,
      CallTrace {
        typ: "CALL".into(),
        to: Some(Address::with_last_byte(2)),
        input: Bytes::from_static(&[0x12, 0x34, 0x56, 0x78, 0x9a]),
        error: Some("execution reverted".into()),
        output: Some(revert),
        ..Default::default()
      },
    );

    let failure = explain_failure(&chain, &BuildContext::default(), ChainError::Failed { hash }, Some(hash)).await;

    assert_eq!(failure.revert.as_ref().map(|r| r.to_string()).as_deref(), Some("nope"));
    assert!(
      failure
        .trace
        .as_deref()
        .unwrap()
        .starts_with("CALL 0x0000000000000000000000000000000000000002.0x12345678(..)")
    );
    assert!(failure.to_string().contains("reason: nope"));
  }

  #[tokio::test]
  async fn explain_without_trace_keeps_source() {
    let chain = MockChain::new(1);
    let failure = explain_failure(&chain, &BuildContext::default(), ChainError::Transport("down".into()), None).await;
    assert!(failure.revert.is_none());
    assert!(failure.trace.is_none());
    assert_eq!(failure.to_string(), "transport error: down");
  }
}
