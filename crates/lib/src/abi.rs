//! JSON <-> ABI token conversion.
//!
//! Configuration values are JSON: addresses and byte strings as hex, integers
//! as numbers or decimal/hex strings. This module converts them to `ethabi`
//! tokens for encoding, and decoded tokens back to JSON for the context.
//! Integers always come back as decimal strings so no precision is lost.

use ethabi::{Address, Contract, Function, Hash, ParamType, RawLog, Token, Uint};
use serde_json::Value;
use thiserror::Error;

use crate::chain::Log;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
  #[error("invalid abi: {0}")]
  InvalidAbi(String),

  #[error("function '{name}' not found; available: {}", .available.join(", "))]
  UnknownFunction { name: String, available: Vec<String> },

  #[error("'{name}' expects {expected} argument(s), got {got}")]
  ArgCount { name: String, expected: usize, got: usize },

  #[error("cannot convert {value} to {kind}: {message}")]
  InvalidArg { kind: String, value: String, message: String },

  #[error("encoding failed: {0}")]
  Encode(String),

  #[error("decoding failed: {0}")]
  Decode(String),
}

fn invalid(kind: &ParamType, value: &Value, message: impl Into<String>) -> AbiError {
  AbiError::InvalidArg {
    kind: kind.to_string(),
    value: value.to_string(),
    message: message.into(),
  }
}

/// Parse a JSON ABI array.
pub fn parse_abi(abi: &Value) -> Result<Contract, AbiError> {
  serde_json::from_value(abi.clone()).map_err(|e| AbiError::InvalidAbi(e.to_string()))
}

pub fn decode_hex(data: &str) -> Result<Vec<u8>, AbiError> {
  hex::decode(data.trim_start_matches("0x")).map_err(|e| AbiError::Decode(format!("invalid hex '{}': {}", data, e)))
}

pub fn encode_hex(data: &[u8]) -> String {
  format!("0x{}", hex::encode(data))
}

/// Lowercase `0x` hex of an address, as addresses are written to the context.
pub fn format_address(address: impl AsRef<[u8]>) -> String {
  encode_hex(address.as_ref())
}

fn parse_u256(kind: &ParamType, value: &Value) -> Result<Uint, AbiError> {
  let text = match value {
    Value::Number(n) => {
      if let Some(u) = n.as_u64() {
        return Ok(Uint::from(u));
      }
      n.to_string()
    }
    Value::String(s) => s.trim().to_string(),
    _ => return Err(invalid(kind, value, "expected a number")),
  };

  let (negative, digits) = match text.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, text.as_str()),
  };
  let magnitude = match digits.strip_prefix("0x") {
    Some(hex) => Uint::from_str_radix(hex, 16).map_err(|e| invalid(kind, value, e.to_string()))?,
    None => Uint::from_dec_str(digits).map_err(|e| invalid(kind, value, format!("{:?}", e)))?,
  };

  if negative {
    if matches!(kind, ParamType::Uint(_)) {
      return Err(invalid(kind, value, "negative value for unsigned integer"));
    }
    Ok(negate(magnitude))
  } else {
    Ok(magnitude)
  }
}

fn negate(value: Uint) -> Uint {
  (!value).overflowing_add(Uint::one()).0
}

fn parse_address(kind: &ParamType, value: &Value) -> Result<Address, AbiError> {
  let text = value.as_str().ok_or_else(|| invalid(kind, value, "expected a hex string"))?;
  let bytes = hex::decode(text.trim_start_matches("0x")).map_err(|e| invalid(kind, value, e.to_string()))?;
  if bytes.len() != 20 {
    return Err(invalid(kind, value, "expected 20 bytes"));
  }
  Ok(Address::from_slice(&bytes))
}

fn parse_list<'a>(kind: &ParamType, value: &'a Value) -> Result<std::borrow::Cow<'a, Vec<Value>>, AbiError> {
  match value {
    Value::Array(items) => Ok(std::borrow::Cow::Borrowed(items)),
    // templating may have rendered a list into a string
    Value::String(s) => match serde_json::from_str::<Value>(s) {
      Ok(Value::Array(items)) => Ok(std::borrow::Cow::Owned(items)),
      _ => Err(invalid(kind, value, "expected a list")),
    },
    _ => Err(invalid(kind, value, "expected a list")),
  }
}

/// Convert a JSON value to a token of the given type.
pub fn tokenize(kind: &ParamType, value: &Value) -> Result<Token, AbiError> {
  Ok(match kind {
    ParamType::Address => Token::Address(parse_address(kind, value)?),
    ParamType::Uint(_) => Token::Uint(parse_u256(kind, value)?),
    ParamType::Int(_) => Token::Int(parse_u256(kind, value)?),
    ParamType::Bool => match value {
      Value::Bool(b) => Token::Bool(*b),
      Value::String(s) if s == "true" || s == "false" => Token::Bool(s == "true"),
      _ => return Err(invalid(kind, value, "expected a boolean")),
    },
    ParamType::String => match value {
      Value::String(s) => Token::String(s.clone()),
      other => Token::String(other.to_string()),
    },
    ParamType::Bytes => {
      let text = value.as_str().ok_or_else(|| invalid(kind, value, "expected a hex string"))?;
      Token::Bytes(hex::decode(text.trim_start_matches("0x")).map_err(|e| invalid(kind, value, e.to_string()))?)
    }
    ParamType::FixedBytes(size) => {
      let text = value.as_str().ok_or_else(|| invalid(kind, value, "expected a hex string"))?;
      let bytes = hex::decode(text.trim_start_matches("0x")).map_err(|e| invalid(kind, value, e.to_string()))?;
      if bytes.len() != *size {
        return Err(invalid(kind, value, format!("expected {} bytes", size)));
      }
      Token::FixedBytes(bytes)
    }
    ParamType::Array(inner) => Token::Array(
      parse_list(kind, value)?
        .iter()
        .map(|item| tokenize(inner, item))
        .collect::<Result<_, _>>()?,
    ),
    ParamType::FixedArray(inner, size) => {
      let items = parse_list(kind, value)?;
      if items.len() != *size {
        return Err(invalid(kind, value, format!("expected {} items", size)));
      }
      Token::FixedArray(items.iter().map(|item| tokenize(inner, item)).collect::<Result<_, _>>()?)
    }
    ParamType::Tuple(kinds) => {
      let items = parse_list(kind, value)?;
      if items.len() != kinds.len() {
        return Err(invalid(kind, value, format!("expected {} components", kinds.len())));
      }
      Token::Tuple(
        kinds
          .iter()
          .zip(items.iter())
          .map(|(k, item)| tokenize(k, item))
          .collect::<Result<_, _>>()?,
      )
    }
  })
}

/// Convert a decoded token to JSON.
pub fn token_to_json(token: &Token) -> Value {
  match token {
    Token::Address(address) => Value::String(format_address(address)),
    Token::Uint(n) => Value::String(n.to_string()),
    Token::Int(n) => {
      if n.bit(255) {
        Value::String(format!("-{}", negate(*n)))
      } else {
        Value::String(n.to_string())
      }
    }
    Token::Bool(b) => Value::Bool(*b),
    Token::String(s) => Value::String(s.clone()),
    Token::Bytes(bytes) | Token::FixedBytes(bytes) => Value::String(encode_hex(bytes)),
    Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
      Value::Array(items.iter().map(token_to_json).collect())
    }
  }
}

fn tokenize_args(name: &str, kinds: &[ParamType], args: &[Value]) -> Result<Vec<Token>, AbiError> {
  if kinds.len() != args.len() {
    return Err(AbiError::ArgCount {
      name: name.to_string(),
      expected: kinds.len(),
      got: args.len(),
    });
  }
  kinds.iter().zip(args).map(|(k, v)| tokenize(k, v)).collect()
}

/// Find a function by name, or by full signature such as `transfer(address,uint256)`.
///
/// Overloads are disambiguated by argument count.
pub fn find_function<'a>(contract: &'a Contract, name: &str, arg_count: usize) -> Result<&'a Function, AbiError> {
  let unknown = || AbiError::UnknownFunction {
    name: name.to_string(),
    available: contract.functions.keys().cloned().collect(),
  };

  if let Some((base, _)) = name.split_once('(') {
    return contract
      .functions_by_name(base)
      .map_err(|_| unknown())?
      .iter()
      .find(|f| f.signature().starts_with(name))
      .ok_or_else(unknown);
  }

  let overloads = contract.functions_by_name(name).map_err(|_| unknown())?;
  overloads
    .iter()
    .find(|f| f.inputs.len() == arg_count)
    .or_else(|| overloads.first())
    .ok_or_else(unknown)
}

/// Encode a call to `function` with JSON arguments.
pub fn encode_call(function: &Function, args: &[Value]) -> Result<Vec<u8>, AbiError> {
  let kinds: Vec<ParamType> = function.inputs.iter().map(|p| p.kind.clone()).collect();
  let tokens = tokenize_args(&function.name, &kinds, args)?;
  function
    .encode_input(&tokens)
    .map_err(|e| AbiError::Encode(e.to_string()))
}

/// Creation code followed by encoded constructor arguments.
pub fn encode_deploy(contract: &Contract, bytecode: &str, args: &[Value]) -> Result<Vec<u8>, AbiError> {
  let code = decode_hex(bytecode)?;
  match &contract.constructor {
    Some(constructor) => {
      let kinds: Vec<ParamType> = constructor.inputs.iter().map(|p| p.kind.clone()).collect();
      let tokens = tokenize_args("constructor", &kinds, args)?;
      constructor
        .encode_input(code, &tokens)
        .map_err(|e| AbiError::Encode(e.to_string()))
    }
    None if args.is_empty() => Ok(code),
    None => Err(AbiError::ArgCount {
      name: "constructor".to_string(),
      expected: 0,
      got: args.len(),
    }),
  }
}

pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<Value>, AbiError> {
  let tokens = function
    .decode_output(data)
    .map_err(|e| AbiError::Decode(e.to_string()))?;
  Ok(tokens.iter().map(token_to_json).collect())
}

/// Decode a log against an ABI. Returns the event name and its arguments in declaration order.
pub fn decode_log(contract: &Contract, log: &Log) -> Option<(String, Vec<Value>)> {
  let topics: Vec<Hash> = log.topics().iter().map(|t| Hash::from_slice(t.as_slice())).collect();
  let first = *topics.first()?;
  let data = log.data.data.to_vec();

  let event = contract
    .events
    .values()
    .flatten()
    .find(|e| !e.anonymous && e.signature() == first)?;
  let parsed = event
    .parse_log(RawLog {
      topics,
      data,
    })
    .ok()?;

  Some((
    event.name.clone(),
    parsed.params.iter().map(|p| token_to_json(&p.value)).collect(),
  ))
}
