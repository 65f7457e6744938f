//! Template expressions in action configuration.
//!
//! String-valued configuration fields may reference the build context before
//! any cache check or execution happens.
//!
//! # Syntax
//!
//! - `<%= path %>` - a dotted lookup into the serialized context, such as
//!   `settings.owner`, `contracts.Token.address` or
//!   `imports.registry.contracts.Proxy.address`. Numeric segments index arrays.
//! - `<%%` - a literal `<%`.
//!
//! Strings render raw; other values render as compact JSON. A field that
//! consists of exactly one expression keeps the JSON value it resolves to,
//! so `"<%= contracts.Token.abi %>"` injects the ABI array itself.
//!
//! # Example
//!
//! ```
//! use cannon_lib::template::{parse, Segment};
//!
//! let segments = parse("owner: <%= settings.owner %>").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("owner: ".to_string()),
//!     Segment::Expr("settings.owner".to_string()),
//! ]);
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

const OPEN: &str = "<%";
const CLOSE: &str = "%>";

/// A segment of parsed template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  /// A dotted context path, trimmed.
  Expr(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed template expression at position {0}")]
  Unclosed(usize),

  #[error("empty template expression at position {0}")]
  Empty(usize),

  #[error("unsupported template tag at position {0}: expected '<%='")]
  UnsupportedTag(usize),

  #[error("unresolved template reference '{0}'")]
  Unresolved(String),
}

/// Parse a string into literal and expression segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(start) = rest.find(OPEN) {
    literal.push_str(&rest[..start]);
    let pos = offset + start;
    let after = &rest[start + OPEN.len()..];

    if let Some(tail) = after.strip_prefix('%') {
      // escaped: `<%%` renders as `<%`
      literal.push_str(OPEN);
      offset = pos + OPEN.len() + 1;
      rest = tail;
      continue;
    }

    let Some(body) = after.strip_prefix('=') else {
      return Err(TemplateError::UnsupportedTag(pos));
    };
    let Some(end) = body.find(CLOSE) else {
      return Err(TemplateError::Unclosed(pos));
    };

    let path = body[..end].trim();
    if path.is_empty() {
      return Err(TemplateError::Empty(pos));
    }

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }
    segments.push(Segment::Expr(path.to_string()));

    let consumed = start + OPEN.len() + 1 + end + CLOSE.len();
    offset += consumed;
    rest = &rest[consumed..];
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Look up a dotted path in a JSON value.
pub fn lookup<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
  path.split('.').try_fold(ctx, |current, key| match current {
    Value::Object(map) => map.get(key),
    Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn render_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Render a template string against a context.
pub fn render(input: &str, ctx: &Value) -> Result<String, TemplateError> {
  let mut out = String::with_capacity(input.len());
  for segment in parse(input)? {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Expr(path) => {
        let value = lookup(ctx, &path).ok_or(TemplateError::Unresolved(path))?;
        out.push_str(&render_value(value));
      }
    }
  }
  Ok(out)
}

/// Resolve a single string field, keeping the JSON type of a lone expression.
pub fn render_field(input: &str, ctx: &Value) -> Result<Value, TemplateError> {
  let segments = parse(input)?;
  if let [Segment::Expr(path)] = segments.as_slice() {
    let value = lookup(ctx, path).ok_or_else(|| TemplateError::Unresolved(path.clone()))?;
    return Ok(value.clone());
  }
  render(input, ctx).map(Value::String)
}

/// Resolve every string leaf of a configuration value. Object keys are left as written.
pub fn inject(config: &Value, ctx: &Value) -> Result<Value, TemplateError> {
  Ok(match config {
    Value::String(s) => render_field(s, ctx)?,
    Value::Array(items) => Value::Array(items.iter().map(|i| inject(i, ctx)).collect::<Result<_, _>>()?),
    Value::Object(map) => {
      let mut out = Map::with_capacity(map.len());
      for (key, value) in map {
        out.insert(key.clone(), inject(value, ctx)?);
      }
      Value::Object(out)
    }
    other => other.clone(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn ctx() -> Value {
    json!({
      "chainId": 13370,
      "settings": {"owner": "0xabc", "supply": "1000"},
      "contracts": {"Token": {"address": "0x1234", "abi": [{"type": "constructor"}]}},
      "imports": {"dep": {"contracts": {"Proxy": {"address": "0x9999"}}}},
      "list": ["zero", "one"]
    })
  }

  #[test]
  fn parse_plain_text() {
    assert_eq!(parse("hello").unwrap(), vec![Segment::Literal("hello".into())]);
    assert!(parse("").unwrap().is_empty());
  }

  #[test]
  fn parse_mixed() {
    assert_eq!(
      parse("<%= a.b %>-<%=c%>").unwrap(),
      vec![
        Segment::Expr("a.b".into()),
        Segment::Literal("-".into()),
        Segment::Expr("c".into()),
      ]
    );
  }

  #[test]
  fn parse_escape() {
    assert_eq!(
      parse("<%%= not %> <%= x %>").unwrap(),
      vec![Segment::Literal("<%= not %> ".into()), Segment::Expr("x".into())]
    );
  }

  #[test]
  fn parse_errors() {
    assert_eq!(parse("a <%= b"), Err(TemplateError::Unclosed(2)));
    assert_eq!(parse("<%=   %>"), Err(TemplateError::Empty(0)));
    assert_eq!(parse("x<% y %>"), Err(TemplateError::UnsupportedTag(1)));
  }

  #[test]
  fn render_strings_and_scalars() {
    let ctx = ctx();
    assert_eq!(render("owner=<%= settings.owner %>", &ctx).unwrap(), "owner=0xabc");
    assert_eq!(render("chain <%= chainId %>", &ctx).unwrap(), "chain 13370");
    assert_eq!(render("<%= list.1 %>", &ctx).unwrap(), "one");
    assert_eq!(
      render("<%= imports.dep.contracts.Proxy.address %>", &ctx).unwrap(),
      "0x9999"
    );
  }

  #[test]
  fn lone_expression_keeps_json_type() {
    let ctx = ctx();
    assert_eq!(render_field("<%= chainId %>", &ctx).unwrap(), json!(13370));
    assert_eq!(
      render_field("<%= contracts.Token.abi %>", &ctx).unwrap(),
      json!([{"type": "constructor"}])
    );
    assert_eq!(render_field(" <%= chainId %>", &ctx).unwrap(), json!(" 13370"));
  }

  #[test]
  fn unresolved_reference() {
    let err = render("<%= contracts.Missing.address %>", &ctx()).unwrap_err();
    assert_eq!(err, TemplateError::Unresolved("contracts.Missing.address".into()));
  }

  #[test]
  fn inject_walks_nested_config() {
    let config = json!({
      "artifact": "Token",
      "args": ["<%= settings.supply %>", 5, {"to": "<%= contracts.Token.address %>"}],
      "<%= keys.stay %>": true
    });
    let injected = inject(&config, &ctx()).unwrap();
    assert_eq!(
      injected,
      json!({
        "artifact": "Token",
        "args": ["1000", 5, {"to": "0x1234"}],
        "<%= keys.stay %>": true
      })
    );
  }
}
