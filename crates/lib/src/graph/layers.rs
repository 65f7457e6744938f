//! State layers.
//!
//! A layer is a group of actions that must be rebuilt together on a backend
//! whose state is reset and reloaded from snapshots. Each layer persists one
//! chain-state dump covering all of its actions.
//!
//! # Algorithm
//!
//! Layers are computed in a single pass over the topological order, in an
//! arena of layer records addressed by stable ids:
//!
//! 1. Each action starts in its own layer.
//! 2. Direct dependencies already implied by another direct dependency are
//!    ignored, so a shortcut edge cannot fuse unrelated layers.
//! 3. A layer that is depended on is *claimed* by the first layer depending on
//!    it. An action depending on an already-claimed layer joins the claimer;
//!    two different claimers are merged, the smaller into the larger.
//! 4. Merges re-point membership union-find style; nothing is spliced.
//!
//! Afterwards any cycle between layers is fused and each layer's `depends` is
//! transitively reduced. Layers are keyed by their smallest action name and
//! all lists are sorted, so the result is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use super::ChainDefinition;

/// A group of actions rebuilt atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
  /// Member actions, sorted.
  pub actions: Vec<String>,
  /// Keys of the layers this one depends on, sorted.
  pub depends: Vec<String>,
}

/// The layer map of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateLayers {
  layers: BTreeMap<String, Layer>,
  #[serde(skip)]
  layer_of: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct LayerRecord {
  actions: BTreeSet<String>,
  /// Arena ids; resolve through `find` before use.
  depends: BTreeSet<usize>,
}

#[derive(Debug, Default)]
struct LayerArena {
  records: Vec<LayerRecord>,
  parent: Vec<usize>,
  claimed_by: Vec<Option<usize>>,
}

impl LayerArena {
  fn create(&mut self, action: &str) -> usize {
    let id = self.records.len();
    self.records.push(LayerRecord {
      actions: BTreeSet::from([action.to_string()]),
      depends: BTreeSet::new(),
    });
    self.parent.push(id);
    self.claimed_by.push(None);
    id
  }

  fn find(&mut self, id: usize) -> usize {
    let mut root = id;
    while self.parent[root] != root {
      root = self.parent[root];
    }
    let mut cursor = id;
    while self.parent[cursor] != root {
      let next = self.parent[cursor];
      self.parent[cursor] = root;
      cursor = next;
    }
    root
  }

  fn claimer(&mut self, id: usize) -> Option<usize> {
    let root = self.find(id);
    let claimer = self.claimed_by[root]?;
    Some(self.find(claimer))
  }

  /// Merge two layers; the smaller is folded into the larger. Returns the survivor.
  fn merge(&mut self, a: usize, b: usize) -> usize {
    let (a, b) = (self.find(a), self.find(b));
    if a == b {
      return a;
    }

    let (winner, loser) = match self.records[a].actions.len().cmp(&self.records[b].actions.len()) {
      std::cmp::Ordering::Less => (b, a),
      std::cmp::Ordering::Greater => (a, b),
      std::cmp::Ordering::Equal => (a.min(b), a.max(b)),
    };

    let moved = std::mem::take(&mut self.records[loser]);
    self.records[winner].actions.extend(moved.actions);
    self.records[winner].depends.extend(moved.depends);
    if self.claimed_by[winner].is_none() {
      self.claimed_by[winner] = self.claimed_by[loser];
    }
    self.claimed_by[loser] = None;
    self.parent[loser] = winner;
    winner
  }

  /// Live layer ids with their resolved dependency ids, self-edges removed.
  fn resolved(&mut self) -> BTreeMap<usize, BTreeSet<usize>> {
    let roots: BTreeSet<usize> = (0..self.records.len()).filter(|&i| self.parent[i] == i).collect();
    let mut resolved = BTreeMap::new();
    for &root in &roots {
      let raw: Vec<usize> = self.records[root].depends.iter().copied().collect();
      let deps: BTreeSet<usize> = raw.into_iter().map(|d| self.find(d)).filter(|&d| d != root).collect();
      resolved.insert(root, deps);
    }
    resolved
  }

  /// Fuse every strongly connected group of layers into one.
  fn fuse_cycles(&mut self) {
    let resolved = self.resolved();
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let index: BTreeMap<usize, NodeIndex> = resolved.keys().map(|&id| (id, graph.add_node(id))).collect();
    for (id, deps) in &resolved {
      for dep in deps {
        graph.add_edge(index[id], index[dep], ());
      }
    }

    for component in tarjan_scc(&graph) {
      let mut members = component.into_iter().map(|n| graph[n]);
      if let Some(first) = members.next() {
        members.fold(first, |acc, next| self.merge(acc, next));
      }
    }
  }
}

impl StateLayers {
  /// Compute the layers of a definition.
  ///
  /// Only acyclic actions participate; a definition with cycles must be
  /// rejected by validation before its layers are used.
  pub fn compute(def: &ChainDefinition) -> Self {
    let mut arena = LayerArena::default();
    let mut layer_of_action: BTreeMap<String, usize> = BTreeMap::new();

    for action in def.topological_actions() {
      let deps = def.dependencies(action);
      let direct: Vec<&String> = deps
        .iter()
        .filter(|dep| {
          !deps
            .iter()
            .any(|other| other != *dep && def.dependency_tree(other).contains(*dep))
        })
        .collect();

      let mut attaching: Option<usize> = None;
      for dep in &direct {
        let Some(&dep_layer) = layer_of_action.get(dep.as_str()) else {
          continue;
        };
        if let Some(claimer) = arena.claimer(dep_layer) {
          attaching = Some(match attaching {
            None => claimer,
            Some(current) => arena.merge(current, claimer),
          });
        }
      }

      let layer = match attaching {
        Some(existing) => {
          let existing = arena.find(existing);
          arena.records[existing].actions.insert(action.clone());
          existing
        }
        None => arena.create(action),
      };
      layer_of_action.insert(action.clone(), layer);

      for dep in &direct {
        let Some(&dep_layer) = layer_of_action.get(dep.as_str()) else {
          continue;
        };
        let (dep_layer, layer) = (arena.find(dep_layer), arena.find(layer));
        if dep_layer == layer {
          continue;
        }
        arena.records[layer].depends.insert(dep_layer);
        arena.claimed_by[dep_layer] = Some(layer);
      }
    }

    arena.fuse_cycles();
    Self::finalize(&mut arena, &layer_of_action)
  }

  fn finalize(arena: &mut LayerArena, layer_of_action: &BTreeMap<String, usize>) -> Self {
    let resolved = arena.resolved();

    let key_of: BTreeMap<usize, String> = resolved
      .keys()
      .filter_map(|&id| arena.records[id].actions.first().map(|k| (id, k.clone())))
      .collect();

    let mut reachable: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for &id in resolved.keys() {
      collect_reachable(id, &resolved, &mut reachable);
    }

    let mut layers = BTreeMap::new();
    for (id, deps) in &resolved {
      let Some(key) = key_of.get(id) else {
        continue;
      };
      let depends: BTreeSet<String> = deps
        .iter()
        .filter(|dep| !deps.iter().any(|other| other != *dep && reachable[other].contains(*dep)))
        .filter_map(|dep| key_of.get(dep).cloned())
        .collect();

      layers.insert(
        key.clone(),
        Layer {
          actions: arena.records[*id].actions.iter().cloned().collect(),
          depends: depends.into_iter().collect(),
        },
      );
    }

    let mut layer_of = BTreeMap::new();
    for (action, &id) in layer_of_action {
      let root = arena.find(id);
      if let Some(key) = key_of.get(&root) {
        layer_of.insert(action.clone(), key.clone());
      }
    }

    Self { layers, layer_of }
  }

  pub fn get(&self, key: &str) -> Option<&Layer> {
    self.layers.get(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Layer)> {
    self.layers.iter()
  }

  pub fn len(&self) -> usize {
    self.layers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Key of the layer containing `action`.
  pub fn layer_of(&self, action: &str) -> Option<&str> {
    self.layer_of.get(action).map(String::as_str)
  }

  /// Layer keys ordered so that every layer follows the layers it depends on.
  pub fn dependency_order(&self) -> Vec<String> {
    let mut order = Vec::with_capacity(self.layers.len());
    let mut visited = BTreeSet::new();
    for key in self.layers.keys() {
      self.visit(key, &mut visited, &mut order);
    }
    order
  }

  fn visit(&self, key: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
    if !visited.insert(key.to_string()) {
      return;
    }
    if let Some(layer) = self.layers.get(key) {
      for dep in &layer.depends {
        self.visit(dep, visited, order);
      }
    }
    order.push(key.to_string());
  }

  /// Whether the layer dependency graph is free of cycles.
  pub fn is_acyclic(&self) -> bool {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: BTreeMap<&str, NodeIndex> = self.layers.keys().map(|k| (k.as_str(), graph.add_node(k.as_str()))).collect();
    for (key, layer) in &self.layers {
      for dep in &layer.depends {
        if let Some(&target) = index.get(dep.as_str()) {
          graph.add_edge(index[key.as_str()], target, ());
        }
      }
    }
    !is_cyclic_directed(&graph)
  }
}

fn collect_reachable(
  id: usize,
  graph: &BTreeMap<usize, BTreeSet<usize>>,
  memo: &mut BTreeMap<usize, BTreeSet<usize>>,
) -> BTreeSet<usize> {
  if let Some(found) = memo.get(&id) {
    return found.clone();
  }
  // Marks the node while in progress; the graph is acyclic after fusing.
  memo.insert(id, BTreeSet::new());

  let mut reach = BTreeSet::new();
  for &dep in graph.get(&id).into_iter().flatten() {
    reach.insert(dep);
    reach.extend(collect_reachable(dep, graph, memo));
  }
  memo.insert(id, reach.clone());
  reach
}
