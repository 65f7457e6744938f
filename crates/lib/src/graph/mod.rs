//! Action graph construction and validation.
//!
//! A [`ChainDefinition`] is built once from a [`RawDefinition`] and is
//! immutable afterwards. It provides:
//! - Topological ordering of actions (ties broken by name)
//! - Root (no dependencies) and leaf (no dependents) sets
//! - Memoized transitive dependency trees
//! - Validation: cycles, extraneous dependencies, step schemas
//! - State layers (see [`layers`])
//!
//! Unknown dependencies are rejected while parsing, so a parsed definition
//! always refers only to declared actions.

pub mod layers;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::debug;

use crate::action::{Action, DefinitionError, RawDefinition, SettingDef};

pub use layers::{Layer, StateLayers};

/// A dependency that names an action that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
  pub action: String,
  pub dependency: String,
}

/// Errors raised while parsing a definition.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  #[error(
    "unknown action(s) in depends: {}\nknown actions: {}",
    format_missing(.missing),
    .known.join(", ")
  )]
  UnknownActions {
    missing: Vec<MissingDependency>,
    known: Vec<String>,
  },
}

fn format_missing(missing: &[MissingDependency]) -> String {
  missing
    .iter()
    .map(|m| format!("'{}' (required by {})", m.dependency, m.action))
    .collect::<Vec<_>>()
    .join(", ")
}

/// A direct dependency already implied by another direct dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraneousDependency {
  /// The action declaring the dependency.
  pub node: String,
  /// The redundant dependency.
  pub extraneous: String,
  /// The other direct dependency that already reaches it.
  pub in_dep: String,
}

/// One problem found by [`ChainDefinition::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphProblem {
  Cycle(Vec<String>),
  Extraneous(ExtraneousDependency),
  Schema { action: String, message: String },
}

impl fmt::Display for GraphProblem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphProblem::Cycle(path) => write!(f, "dependency cycle: {}", path.join(" -> ")),
      GraphProblem::Extraneous(e) => write!(
        f,
        "extraneous dependency: {} depends on {}, which is already required through {}",
        e.node, e.extraneous, e.in_dep
      ),
      GraphProblem::Schema { action, message } => write!(f, "invalid configuration for {}: {}", action, message),
    }
  }
}

/// Partial result of the cycle search.
enum CycleSearch {
  /// Members collected so far; the anchor is the last element.
  Open(Vec<String>),
  /// The anchor was reached; the list is final.
  Closed(Vec<String>),
}

/// The parsed, immutable action graph.
#[derive(Debug)]
pub struct ChainDefinition {
  raw: RawDefinition,
  actions: BTreeMap<String, Action>,
  /// Direct dependencies, sorted and deduplicated.
  dependencies: BTreeMap<String, Vec<String>>,
  dependents: BTreeMap<String, Vec<String>>,
  topological: Vec<String>,
  roots: Vec<String>,
  leaves: Vec<String>,
  trees: OnceLock<BTreeMap<String, BTreeSet<String>>>,
  layers: OnceLock<StateLayers>,
}

impl ChainDefinition {
  /// Build a definition from a raw cannonfile.
  ///
  /// # Errors
  ///
  /// Returns `UnknownActions` listing every dependency that names an
  /// undeclared action, together with the list of declared actions.
  pub fn parse(raw: RawDefinition) -> Result<Self, GraphError> {
    let actions: BTreeMap<String, Action> = raw.actions()?.into_iter().map(|a| (a.name(), a)).collect();

    let mut missing = Vec::new();
    let mut dependencies = BTreeMap::new();
    let mut dependents: BTreeMap<String, Vec<String>> = actions.keys().map(|n| (n.clone(), Vec::new())).collect();

    for (name, action) in &actions {
      let deps: BTreeSet<String> = action.depends.iter().cloned().collect();
      for dep in &deps {
        match dependents.get_mut(dep) {
          Some(list) => list.push(name.clone()),
          None => missing.push(MissingDependency {
            action: name.clone(),
            dependency: dep.clone(),
          }),
        }
      }
      dependencies.insert(name.clone(), deps.into_iter().collect::<Vec<_>>());
    }

    if !missing.is_empty() {
      return Err(GraphError::UnknownActions {
        missing,
        known: actions.keys().cloned().collect(),
      });
    }

    let topological = topological_order(&dependencies, &dependents);
    let roots = dependencies
      .iter()
      .filter(|(_, d)| d.is_empty())
      .map(|(n, _)| n.clone())
      .collect();
    let leaves = dependents
      .iter()
      .filter(|(_, d)| d.is_empty())
      .map(|(n, _)| n.clone())
      .collect();

    debug!(package = %raw.package_ref(), actions = actions.len(), "parsed chain definition");

    Ok(Self {
      raw,
      actions,
      dependencies,
      dependents,
      topological,
      roots,
      leaves,
      trees: OnceLock::new(),
      layers: OnceLock::new(),
    })
  }

  pub fn raw(&self) -> &RawDefinition {
    &self.raw
  }

  pub fn name(&self) -> &str {
    &self.raw.name
  }

  pub fn version(&self) -> &str {
    &self.raw.version
  }

  pub fn settings(&self) -> &BTreeMap<String, SettingDef> {
    &self.raw.setting
  }

  pub fn action(&self, name: &str) -> Option<&Action> {
    self.actions.get(name)
  }

  /// All action names, sorted.
  pub fn action_names(&self) -> impl Iterator<Item = &String> {
    self.actions.keys()
  }

  pub fn len(&self) -> usize {
    self.actions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.actions.is_empty()
  }

  /// Direct dependencies of an action, sorted.
  pub fn dependencies(&self, name: &str) -> &[String] {
    self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Actions that directly depend on `name`, sorted.
  pub fn dependents(&self, name: &str) -> &[String] {
    self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Actions in dependency order. Members of a cycle are omitted.
  pub fn topological_actions(&self) -> &[String] {
    &self.topological
  }

  /// Actions with no dependencies.
  pub fn roots(&self) -> &[String] {
    &self.roots
  }

  /// Actions nothing depends on.
  pub fn leaves(&self) -> &[String] {
    &self.leaves
  }

  /// Every action reachable through `depends` from `name`.
  ///
  /// Computed once for all actions on first use.
  pub fn dependency_tree(&self, name: &str) -> &BTreeSet<String> {
    static EMPTY: BTreeSet<String> = BTreeSet::new();
    self.trees.get_or_init(|| self.compute_trees()).get(name).unwrap_or(&EMPTY)
  }

  fn compute_trees(&self) -> BTreeMap<String, BTreeSet<String>> {
    let mut memo = BTreeMap::new();
    let mut visiting = BTreeSet::new();
    for name in self.actions.keys() {
      self.tree_into(name, &mut memo, &mut visiting);
    }
    memo
  }

  fn tree_into(
    &self,
    name: &str,
    memo: &mut BTreeMap<String, BTreeSet<String>>,
    visiting: &mut BTreeSet<String>,
  ) -> BTreeSet<String> {
    if let Some(tree) = memo.get(name) {
      return tree.clone();
    }

    visiting.insert(name.to_string());
    let mut tree = BTreeSet::new();
    for dep in self.dependencies(name) {
      tree.insert(dep.clone());
      if !visiting.contains(dep) {
        tree.extend(self.tree_into(dep, memo, visiting));
      }
    }
    visiting.remove(name);

    memo.insert(name.to_string(), tree.clone());
    tree
  }

  /// Find a dependency cycle.
  ///
  /// Returns the members of the first cycle found, walking actions in name
  /// order. Each member depends on the next; the last member, whose back-edge
  /// closed the loop, depends on the first.
  pub fn check_cycles(&self) -> Option<Vec<String>> {
    let names: Vec<String> = self.actions.keys().cloned().collect();
    let mut seen = BTreeSet::new();
    let mut path = BTreeSet::new();

    match self.find_cycle(&names, &mut seen, &mut path)? {
      CycleSearch::Open(cycle) | CycleSearch::Closed(cycle) => Some(cycle),
    }
  }

  fn find_cycle(&self, names: &[String], seen: &mut BTreeSet<String>, path: &mut BTreeSet<String>) -> Option<CycleSearch> {
    for name in names {
      if path.contains(name) {
        return Some(CycleSearch::Open(vec![name.clone()]));
      }
      if !seen.insert(name.clone()) {
        continue;
      }

      path.insert(name.clone());
      if let Some(found) = self.find_cycle(self.dependencies(name), seen, path) {
        return Some(match found {
          CycleSearch::Closed(cycle) => CycleSearch::Closed(cycle),
          CycleSearch::Open(cycle) if cycle.last() == Some(name) => CycleSearch::Closed(cycle),
          CycleSearch::Open(mut cycle) => {
            cycle.insert(0, name.clone());
            CycleSearch::Open(cycle)
          }
        });
      }
      path.remove(name);
    }

    None
  }

  /// Find direct dependencies that are already reachable through another
  /// direct dependency of the same action.
  pub fn check_extraneous_dependencies(&self) -> Vec<ExtraneousDependency> {
    let mut found = Vec::new();

    for node in &self.topological {
      let deps = self.dependencies(node);
      for dep in deps {
        let via = deps
          .iter()
          .find(|other| *other != dep && self.dependency_tree(other).contains(dep));
        if let Some(via) = via {
          found.push(ExtraneousDependency {
            node: node.clone(),
            extraneous: dep.clone(),
            in_dep: via.clone(),
          });
        }
      }
    }

    found
  }

  /// Collect every problem with the definition.
  ///
  /// An empty result means the definition is safe to build.
  pub fn validate(&self) -> Vec<GraphProblem> {
    let mut problems = Vec::new();

    if let Some(cycle) = self.check_cycles() {
      problems.push(GraphProblem::Cycle(cycle));
    }

    problems.extend(self.check_extraneous_dependencies().into_iter().map(GraphProblem::Extraneous));

    for (name, action) in &self.actions {
      if let Err(message) = action.kind.step().validate(&action.config) {
        problems.push(GraphProblem::Schema {
          action: name.clone(),
          message,
        });
      }
    }

    problems
  }

  /// State layers, computed on first use and cached for the definition's lifetime.
  pub fn state_layers(&self) -> &StateLayers {
    self.layers.get_or_init(|| StateLayers::compute(self))
  }
}

/// Kahn's algorithm with a name-ordered ready set.
fn topological_order(
  dependencies: &BTreeMap<String, Vec<String>>,
  dependents: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
  let mut remaining: BTreeMap<&str, usize> = dependencies.iter().map(|(n, d)| (n.as_str(), d.len())).collect();
  let mut ready: BTreeSet<&str> = remaining.iter().filter(|(_, c)| **c == 0).map(|(n, _)| *n).collect();
  let mut order = Vec::with_capacity(dependencies.len());

  while let Some(name) = ready.pop_first() {
    order.push(name.to_string());
    for dependent in &dependents[name] {
      if let Some(count) = remaining.get_mut(dependent.as_str()) {
        *count -= 1;
        if *count == 0 {
          ready.insert(dependent.as_str());
        }
      }
    }
  }

  order
}
