//! Build context model.
//!
//! A [`BuildContext`] aggregates what a build has produced so far: deployed
//! contracts, sent transactions and the contexts of imported packages. Each
//! action receives a fresh context merged from its dependencies' outputs.
//!
//! Merging never detects collisions; duplicate names across sibling actions
//! are caught by the orchestrator, which knows where each entry came from.

mod types;

pub use types::*;

/// Merge contexts in order.
///
/// The result starts as a copy of the first context; the contracts,
/// transactions and imports of each following context are overlaid, later
/// entries winning. Chain id and timestamp are set to the given values.
pub fn merge_contexts<'a>(
  contexts: impl IntoIterator<Item = &'a BuildContext>,
  chain_id: u64,
  timestamp: u64,
) -> BuildContext {
  let mut iter = contexts.into_iter();
  let mut merged = iter.next().cloned().unwrap_or_default();
  for ctx in iter {
    merged.overlay(ctx);
  }
  merged.chain_id = chain_id;
  merged.timestamp = timestamp;
  merged
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use proptest::prelude::*;
  use serde_json::json;

  fn contract(address: &str, on: &str) -> ContractInfo {
    ContractInfo {
      address: address.to_string(),
      abi: json!([]),
      deployed_on: on.to_string(),
      ..Default::default()
    }
  }

  fn ctx_with(contracts: &[(&str, &str)], txns: &[&str]) -> BuildContext {
    let mut ctx = BuildContext::default();
    for (name, address) in contracts {
      ctx.contracts.insert(name.to_string(), contract(address, "contract.x"));
    }
    for hash in txns {
      ctx.txns.insert(
        format!("t{}", hash),
        TransactionInfo {
          hash: hash.to_string(),
          ..Default::default()
        },
      );
    }
    ctx
  }

  #[test]
  fn first_context_is_the_base() {
    let mut base = ctx_with(&[("A", "0x1")], &[]);
    base.settings.insert("owner".into(), "0xabc".into());
    base.package.name = "pkg".into();

    let merged = merge_contexts([&base, &ctx_with(&[("B", "0x2")], &["01"])], 10, 99);
    assert_eq!(merged.package.name, "pkg");
    assert_eq!(merged.settings["owner"], "0xabc");
    assert_eq!(merged.contracts.len(), 2);
    assert_eq!(merged.txns["t01"].hash, "01");
    assert_eq!((merged.chain_id, merged.timestamp), (10, 99));
  }

  #[test]
  fn later_entries_win() {
    let merged = merge_contexts([&ctx_with(&[("A", "0x1")], &[]), &ctx_with(&[("A", "0x2")], &[])], 1, 0);
    assert_eq!(merged.contracts["A"].address, "0x2");
  }

  #[test]
  fn empty_list_gives_default() {
    let merged = merge_contexts(Vec::<&BuildContext>::new(), 5, 6);
    assert!(merged.contracts.is_empty());
    assert_eq!(merged.chain_id, 5);
  }

  #[test]
  fn find_contract_walks_imports() {
    let mut inner = ctx_with(&[("Proxy", "0x9")], &[]);
    inner.imports.insert("deep".into(), ctx_with(&[("Core", "0x8")], &[]));
    let mut ctx = ctx_with(&[("Token", "0x1")], &[]);
    ctx.imports.insert("dep".into(), inner);

    assert_eq!(ctx.find_contract("Token").map(|c| c.address.as_str()), Some("0x1"));
    assert_eq!(ctx.find_contract("dep.Proxy").map(|c| c.address.as_str()), Some("0x9"));
    assert_eq!(ctx.find_contract("dep.deep.Core").map(|c| c.address.as_str()), Some("0x8"));
    assert!(ctx.find_contract("dep.Token").is_none());

    let names: Vec<String> = ctx.all_abis().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["Token", "dep.Proxy", "dep.deep.Core"]);
  }

  fn arb_ctx(prefix: &'static str) -> impl Strategy<Value = BuildContext> {
    (
      proptest::collection::btree_map("[a-z]{1,4}", "0x[0-9a-f]{4}", 0..4),
      proptest::collection::btree_map("[a-z]{1,4}", "[0-9a-f]{8}", 0..4),
    )
      .prop_map(move |(contracts, txns)| {
        let mut ctx = BuildContext::default();
        ctx.contracts = contracts
          .into_iter()
          .map(|(k, v)| (format!("{}{}", prefix, k), contract(&v, prefix)))
          .collect();
        ctx.txns = txns
          .into_iter()
          .map(|(k, v)| {
            (
              format!("{}{}", prefix, k),
              TransactionInfo {
                hash: v,
                ..Default::default()
              },
            )
          })
          .collect::<BTreeMap<_, _>>();
        ctx
      })
  }

  proptest! {
    #[test]
    fn merge_is_associative_for_disjoint_keys(a in arb_ctx("a_"), b in arb_ctx("b_"), c in arb_ctx("c_")) {
      let left = merge_contexts([&merge_contexts([&a, &b], 1, 2), &c], 1, 2);
      let right = merge_contexts([&a, &merge_contexts([&b, &c], 1, 2)], 1, 2);
      prop_assert_eq!(left, right);
    }
  }
}
