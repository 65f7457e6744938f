//! Execution state of one build.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};
use tracing::debug;

use super::{ActionState, BuildError, BuildEvent, BuildOptions, BuildOutcome, Builder, ReadMode, WriteMode};
use crate::action::Action;
use crate::consts::rpc;
use crate::context::{BuildContext, merge_contexts};
use crate::graph::ChainDefinition;
use crate::steps::{StepCall, StepOutput};
use crate::store::{ActionRecord, VariantKey};
use crate::util::hash::Fingerprint;

/// First producer of a contract or transaction name.
struct Site {
  action: String,
  /// Address or transaction hash.
  detail: String,
}

/// An action whose record matched during a layer cache check.
struct CachedAction {
  name: String,
  ctx: BuildContext,
  own: StepOutput,
}

pub(super) struct Session<'a> {
  builder: &'a Builder,
  def: &'a ChainDefinition,
  key: VariantKey,
  options: &'a BuildOptions,
  base: BuildContext,
  stack: &'a [String],
  outputs: BTreeMap<String, BuildContext>,
  states: BTreeMap<String, ActionState>,
  order: Vec<String>,
  sites: BTreeMap<(&'static str, String), Site>,
}

impl<'a> Session<'a> {
  pub(super) fn new(
    builder: &'a Builder,
    def: &'a ChainDefinition,
    key: VariantKey,
    options: &'a BuildOptions,
    base: BuildContext,
    stack: &'a [String],
  ) -> Self {
    let states = def
      .action_names()
      .map(|name| (name.clone(), ActionState::Pending))
      .collect();
    Self {
      builder,
      def,
      key,
      options,
      base,
      stack,
      outputs: BTreeMap::new(),
      states,
      order: Vec::new(),
      sites: BTreeMap::new(),
    }
  }

  /// Merged leaf outputs and per-action states.
  pub(super) fn finish(self) -> BuildOutcome {
    let leaves = self.def.leaves().iter().filter_map(|leaf| self.outputs.get(leaf));
    let context = merge_contexts(
      std::iter::once(&self.base).chain(leaves),
      self.base.chain_id,
      self.base.timestamp,
    );
    BuildOutcome {
      context,
      states: self.states,
      order: self.order,
    }
  }

  fn emit(&self, event: BuildEvent) {
    self.builder.observer().on_event(&event);
  }

  /// Settings and package metadata, overlaid with every dependency's output.
  fn context_for(&self, name: &str) -> BuildContext {
    let deps = self.def.dependencies(name).iter().filter_map(|d| self.outputs.get(d));
    merge_contexts(
      std::iter::once(&self.base).chain(deps),
      self.base.chain_id,
      self.base.timestamp,
    )
  }

  fn register(&mut self, kind: &'static str, name: &str, action: &str, detail: &str) -> Result<(), BuildError> {
    if let Some(prior) = self.sites.get(&(kind, name.to_string()))
      && prior.action != action
    {
      return Err(BuildError::DuplicateLabel {
        kind,
        name: name.to_string(),
        action: action.to_string(),
        prior_action: prior.action.clone(),
        prior_site: prior.detail.clone(),
      });
    }
    self.sites.insert(
      (kind, name.to_string()),
      Site {
        action: action.to_string(),
        detail: detail.to_string(),
      },
    );
    Ok(())
  }

  /// Register the names an action introduced on top of its inherited context.
  fn register_output(&mut self, action: &str, inherited: &BuildContext, produced: &StepOutput) -> Result<(), BuildError> {
    for (name, contract) in &produced.contracts {
      if let Some(existing) = inherited.contracts.get(name) {
        return Err(BuildError::DuplicateLabel {
          kind: "contract",
          name: name.clone(),
          action: action.to_string(),
          prior_action: existing.deployed_on.clone(),
          prior_site: existing.address.clone(),
        });
      }
      self.register("contract", name, action, &contract.address)?;
    }
    for (name, txn) in &produced.txns {
      if let Some(existing) = inherited.txns.get(name) {
        return Err(BuildError::DuplicateLabel {
          kind: "transaction",
          name: name.clone(),
          action: action.to_string(),
          prior_action: existing.deployed_on.clone(),
          prior_site: existing.hash.clone(),
        });
      }
      self.register("transaction", name, action, &txn.hash)?;
    }
    Ok(())
  }

  /// An action's entries as persisted: only what it produced, stamped with
  /// the package, settings and time it ran under.
  fn stored_entries(ctx: &BuildContext, own: &StepOutput) -> BuildContext {
    BuildContext {
      contracts: own.contracts.clone(),
      txns: own.txns.clone(),
      imports: own.imports.clone(),
      ..BuildContext::new(ctx.package.clone(), ctx.chain_id, ctx.timestamp, ctx.settings.clone())
    }
  }

  /// `ctx` with an action's own entries added.
  fn with_entries(mut ctx: BuildContext, own: &StepOutput) -> BuildContext {
    ctx.contracts.extend(own.contracts.iter().map(|(k, v)| (k.clone(), v.clone())));
    ctx.txns.extend(own.txns.iter().map(|(k, v)| (k.clone(), v.clone())));
    ctx.imports.extend(own.imports.iter().map(|(k, v)| (k.clone(), v.clone())));
    ctx
  }

  fn call(&self, action: &'a Action, fresh_state: bool) -> StepCall<'a> {
    StepCall {
      builder: self.builder,
      action,
      fresh_state,
      import_stack: self.stack,
    }
  }

  /// Resolve an action's configuration and fingerprint it.
  async fn prepare(
    &self,
    action: &'a Action,
    ctx: &BuildContext,
    fresh_state: bool,
  ) -> Result<(Value, Option<Fingerprint>), BuildError> {
    let name = action.name();
    let step = action.kind.step();
    let config = step
      .config_inject(ctx, &action.config)
      .map_err(|e| BuildError::step(&name, e))?;
    let call = self.call(action, fresh_state);
    let hash = step
      .get_state(&call, ctx, &config)
      .await
      .map_err(|e| BuildError::step(&name, e))?;
    Ok((config, hash))
  }

  /// The stored entries of `name`, if its record carries `hash`.
  fn matching_record(&self, name: &str, hash: &Option<Fingerprint>) -> Result<Option<StepOutput>, BuildError> {
    let Some(hash) = hash else {
      return Ok(None);
    };
    let record = self.builder.store().read_record(&self.key, name)?;
    Ok(
      record
        .filter(|r| r.hash.as_deref() == Some(hash.0.as_str()))
        .map(|r| StepOutput {
          contracts: r.output.contracts,
          txns: r.output.txns,
          imports: r.output.imports,
        }),
    )
  }

  /// Evaluate one action, emitting its lifecycle events.
  async fn run_action(&mut self, name: &str, allow_read: bool, fresh_state: bool) -> Result<(), BuildError> {
    self.order.push(name.to_string());
    self.emit(BuildEvent::PreStep {
      action: name.to_string(),
    });

    match self.evaluate(name, allow_read, fresh_state).await {
      Ok(state) => {
        self.states.insert(name.to_string(), state);
        self.emit(BuildEvent::PostStep {
          action: name.to_string(),
          state,
        });
        Ok(())
      }
      Err(e) => {
        self.states.insert(name.to_string(), ActionState::Failed);
        self.emit(BuildEvent::StepFailed {
          action: name.to_string(),
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  async fn evaluate(&mut self, name: &str, allow_read: bool, fresh_state: bool) -> Result<ActionState, BuildError> {
    let def = self.def;
    let action = def.action(name).ok_or_else(|| BuildError::NoProgress {
      remaining: vec![name.to_string()],
    })?;
    let ctx = self.context_for(name);
    let (config, hash) = self.prepare(action, &ctx, fresh_state).await?;

    if allow_read && let Some(own) = self.matching_record(name, &hash)? {
      debug!(action = %name, "record matches, skipping");
      self.register_output(name, &ctx, &own)?;
      self.outputs.insert(name.to_string(), Self::with_entries(ctx, &own));
      return Ok(ActionState::Cached);
    }

    self.states.insert(name.to_string(), ActionState::Executing);
    let call = self.call(action, fresh_state);
    let produced = action
      .kind
      .step()
      .exec(&call, &ctx, &config)
      .await
      .map_err(|e| BuildError::step(name, e))?;
    self.register_output(name, &ctx, &produced)?;

    if self.options.write != WriteMode::None {
      let record = ActionRecord::new(hash.map(|h| h.0), Self::stored_entries(&ctx, &produced));
      self.builder.store().write_record(&self.key, name, &record)?;
    }
    self.outputs.insert(name.to_string(), Self::with_entries(ctx, &produced));
    Ok(ActionState::Done)
  }

  /// Execute actions in topological order, in passes.
  ///
  /// Each pass runs every action whose dependencies are complete. A pass
  /// that completes nothing means the remaining actions wait on each other.
  pub(super) async fn run_direct(&mut self) -> Result<(), BuildError> {
    let allow_read = self.options.read != ReadMode::None;

    let mut remaining: Vec<String> = self.def.topological_actions().to_vec();
    for name in self.def.action_names() {
      if !remaining.contains(name) {
        remaining.push(name.clone());
      }
    }

    while !remaining.is_empty() {
      let mut blocked = Vec::new();
      let mut progressed = false;
      for name in std::mem::take(&mut remaining) {
        let ready = self
          .def
          .dependencies(&name)
          .iter()
          .all(|d| self.outputs.contains_key(d));
        if ready {
          self.run_action(&name, allow_read, false).await?;
          progressed = true;
        } else {
          blocked.push(name);
        }
      }
      if !progressed {
        return Err(BuildError::NoProgress { remaining: blocked });
      }
      remaining = blocked;
    }
    Ok(())
  }

  /// Actions of a layer in topological order.
  fn layer_actions(&self, layer: &str) -> Vec<String> {
    let def = self.def;
    let Some(members) = def.state_layers().get(layer) else {
      return Vec::new();
    };
    def
      .topological_actions()
      .iter()
      .filter(|a| members.actions.contains(a))
      .cloned()
      .collect()
  }

  /// Execute layer by layer, reusing stored layers when possible.
  ///
  /// Layers are visited in dependency order so every depended-upon layer is
  /// settled first. A layer is reused only when none of its dependencies was
  /// rebuilt, reading is `All`, every action's record matches and its chain
  /// state is stored. Otherwise the chain is reset to the base snapshot, the
  /// dependency layers' states are loaded, the layer's actions run and the
  /// resulting state is dumped.
  pub(super) async fn run_layered(&mut self) -> Result<(), BuildError> {
    let builder = self.builder;
    let def = self.def;
    let chain = builder.chain();
    let layers = def.state_layers();
    let mut snapshot = chain.send(rpc::SNAPSHOT, json!([])).await?;

    let mut rebuilt: BTreeSet<String> = BTreeSet::new();
    let mut states: BTreeMap<String, Value> = BTreeMap::new();
    let mut settled: BTreeSet<String> = BTreeSet::new();

    for key in layers.dependency_order() {
      let Some(layer) = layers.get(&key) else { continue };
      if let Some(dep) = layer.depends.iter().find(|d| !settled.contains(*d)) {
        return Err(BuildError::NoProgress {
          remaining: vec![key.clone(), dep.clone()],
        });
      }

      let tainted = layer.depends.iter().any(|d| rebuilt.contains(d));
      if !tainted && self.options.read == ReadMode::All && self.restore_layer(&key).await? {
        self.emit(BuildEvent::LayerCached { layer: key.clone() });
        settled.insert(key);
        continue;
      }

      snapshot = self.reset_chain(snapshot).await?;
      for dep in &layer.depends {
        let state = self.layer_state(dep, &states)?;
        chain.send(rpc::LOAD_STATE, json!([state])).await?;
      }

      for name in self.layer_actions(&key) {
        self.run_action(&name, false, true).await?;
      }

      let state = chain.send(rpc::DUMP_STATE, json!([])).await?;
      if self.options.write == WriteMode::All {
        self.builder.store().write_layer_state(&self.key, &key, &state)?;
      }
      states.insert(key.clone(), state);
      self.emit(BuildEvent::LayerRebuilt {
        layer: key.clone(),
        tainted,
      });
      rebuilt.insert(key.clone());
      settled.insert(key);
    }

    // Leave the chain holding every layer's effects.
    let depended: BTreeSet<&String> = layers.iter().flat_map(|(_, l)| l.depends.iter()).collect();
    let tips: Vec<String> = layers
      .iter()
      .map(|(k, _)| k)
      .filter(|k| !depended.contains(k))
      .cloned()
      .collect();
    if !tips.is_empty() {
      self.reset_chain(snapshot).await?;
      for tip in &tips {
        let state = self.layer_state(tip, &states)?;
        chain.send(rpc::LOAD_STATE, json!([state])).await?;
      }
    }
    Ok(())
  }

  /// Revert to `snapshot` and take a fresh one, since reverting consumes it.
  async fn reset_chain(&self, snapshot: Value) -> Result<Value, BuildError> {
    let chain = self.builder.chain();
    chain.send(rpc::REVERT, json!([snapshot])).await?;
    Ok(chain.send(rpc::SNAPSHOT, json!([])).await?)
  }

  fn layer_state(&self, layer: &str, states: &BTreeMap<String, Value>) -> Result<Value, BuildError> {
    if let Some(state) = states.get(layer) {
      return Ok(state.clone());
    }
    self
      .builder
      .store()
      .read_layer_state(&self.key, layer)?
      .ok_or_else(|| BuildError::MissingLayerState {
        layer: layer.to_string(),
      })
  }

  /// Serve a layer from its records. Returns `false`, leaving nothing
  /// behind, when any action's record is stale or the layer state is missing.
  async fn restore_layer(&mut self, layer: &str) -> Result<bool, BuildError> {
    let mut cached: Vec<CachedAction> = Vec::new();
    let mut hit = true;

    let def = self.def;
    for name in self.layer_actions(layer) {
      let action = def.action(&name).ok_or_else(|| BuildError::NoProgress {
        remaining: vec![name.clone()],
      })?;
      let ctx = self.context_for(&name);
      let (_, hash) = self.prepare(action, &ctx, false).await?;
      match self.matching_record(&name, &hash)? {
        Some(own) => {
          self
            .outputs
            .insert(name.clone(), Self::with_entries(ctx.clone(), &own));
          cached.push(CachedAction { name, ctx, own });
        }
        None => {
          debug!(layer, action = %name, "record stale, rebuilding layer");
          hit = false;
          break;
        }
      }
    }

    if hit && self.builder.store().read_layer_state(&self.key, layer)?.is_none() {
      debug!(layer, "layer state missing, rebuilding layer");
      hit = false;
    }
    if !hit {
      for entry in &cached {
        self.outputs.remove(&entry.name);
      }
      return Ok(false);
    }

    for entry in cached {
      self.order.push(entry.name.clone());
      self.emit(BuildEvent::PreStep {
        action: entry.name.clone(),
      });
      self.register_output(&entry.name, &entry.ctx, &entry.own)?;
      self.states.insert(entry.name.clone(), ActionState::Cached);
      self.emit(BuildEvent::PostStep {
        action: entry.name,
        state: ActionState::Cached,
      });
    }
    Ok(true)
  }
}
