//! Build orchestration.
//!
//! A [`Builder`] executes a definition against its collaborators: a chain,
//! a signer provider, an artifact source, a package source for imports and
//! the deployment store. A build:
//!
//! 1. Validates the definition exhaustively and fails before any side effect
//! 2. Persists the raw definition
//! 3. Checks the chain id reported by the chain
//! 4. Resolves settings (supplied value, then default)
//! 5. Executes the actions, in one of two modes:
//!    - **direct**: actions run in topological order; an action whose
//!      stored fingerprint matches is served from its record
//!    - **layered** (read or write mode `All`): state layers are rebuilt as a
//!      unit on a reset chain, and a layer is reused only when all its records
//!      match and no ancestor layer was rebuilt
//!
//! Lifecycle events go to a [`BuildObserver`].

mod error;
mod events;
mod session;
mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::action::RawDefinition;
use crate::artifacts::ArtifactSource;
use crate::chain::{ChainInterface, ImpersonatingSigners, SignerProvider};
use crate::context::{BuildContext, PackageMeta, merge_contexts};
use crate::graph::ChainDefinition;
use crate::steps::{ImportRequirement, RunHandler, StepError, get_required_imports};
use crate::store::{BuildStatus, DeploymentStore, PackageSource, StoreError, VariantKey};
use crate::util::hash::fingerprint;

pub use error::{BuildError, ErrorCategory};
pub use events::{BuildEvent, BuildObserver, TracingObserver};
pub use types::*;

use session::Session;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct Builder {
  chain: Arc<dyn ChainInterface>,
  signers: Arc<dyn SignerProvider>,
  artifacts: Arc<dyn ArtifactSource>,
  packages: Arc<dyn PackageSource>,
  store: DeploymentStore,
  observer: Arc<dyn BuildObserver>,
  run_handlers: BTreeMap<String, Arc<dyn RunHandler>>,
}

impl Builder {
  /// A builder signing through impersonation, importing packages from `store`
  /// and logging events through `tracing`.
  pub fn new(chain: Arc<dyn ChainInterface>, artifacts: Arc<dyn ArtifactSource>, store: DeploymentStore) -> Self {
    Self {
      signers: Arc::new(ImpersonatingSigners::new(chain.clone())),
      packages: Arc::new(store.clone()),
      chain,
      artifacts,
      store,
      observer: Arc::new(TracingObserver),
      run_handlers: BTreeMap::new(),
    }
  }

  pub fn with_signers(mut self, signers: Arc<dyn SignerProvider>) -> Self {
    self.signers = signers;
    self
  }

  pub fn with_packages(mut self, packages: Arc<dyn PackageSource>) -> Self {
    self.packages = packages;
    self
  }

  pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
    self.observer = observer;
    self
  }

  /// Register the handler `run` actions reach through `exec = "<name>"`.
  pub fn with_run_handler(mut self, name: impl Into<String>, handler: Arc<dyn RunHandler>) -> Self {
    self.run_handlers.insert(name.into(), handler);
    self
  }

  pub fn store(&self) -> &DeploymentStore {
    &self.store
  }

  pub(crate) fn chain(&self) -> &dyn ChainInterface {
    self.chain.as_ref()
  }

  pub(crate) fn signers(&self) -> &dyn SignerProvider {
    self.signers.as_ref()
  }

  pub(crate) fn artifacts(&self) -> &dyn ArtifactSource {
    self.artifacts.as_ref()
  }

  pub(crate) fn packages(&self) -> &dyn PackageSource {
    self.packages.as_ref()
  }

  pub(crate) fn observer(&self) -> &dyn BuildObserver {
    self.observer.as_ref()
  }

  pub(crate) fn run_handler(&self, name: &str) -> Option<&dyn RunHandler> {
    self.run_handlers.get(name).map(|h| h.as_ref())
  }

  pub(crate) fn run_handler_names(&self) -> Vec<String> {
    self.run_handlers.keys().cloned().collect()
  }

  /// Parse and validate a definition, reporting every problem at once.
  pub fn check(&self, raw: RawDefinition) -> Result<ChainDefinition, BuildError> {
    check(raw)
  }

  pub async fn build(&self, raw: RawDefinition, options: &BuildOptions) -> Result<BuildOutcome, BuildError> {
    let stack = vec![raw.package_ref()];
    self.build_nested(raw, options, &stack).await
  }

  /// Build with `stack` naming the packages being built around this one.
  pub(crate) fn build_nested<'a>(
    &'a self,
    raw: RawDefinition,
    options: &'a BuildOptions,
    stack: &'a [String],
  ) -> BoxFuture<'a, Result<BuildOutcome, BuildError>> {
    Box::pin(self.run_build(raw, options, stack))
  }

  async fn run_build(
    &self,
    raw: RawDefinition,
    options: &BuildOptions,
    stack: &[String],
  ) -> Result<BuildOutcome, BuildError> {
    let def = check(raw)?;
    self.store.write_definition(def.raw())?;

    let chain_id = self.chain.chain_id().await?;
    if let Some(expected) = options.chain_id
      && expected != chain_id
    {
      return Err(BuildError::ChainIdMismatch {
        expected,
        actual: chain_id,
      });
    }

    let settings = resolve_settings(&def, &options.settings)?;
    let base = BuildContext::new(package_meta(&def), chain_id, now(), settings);
    self.check_imports(&def, &base).await?;

    let key = VariantKey::new(def.name(), def.version(), chain_id, &options.preset);
    info!(
      variant = %key,
      actions = def.len(),
      layered = options.layered(),
      "building"
    );
    if options.write != WriteMode::None {
      self.store.set_status(&key, BuildStatus::Partial, &options.settings, None)?;
    }

    let mut session = Session::new(self, &def, key.clone(), options, base, stack);
    if options.layered() {
      session.run_layered().await?;
    } else {
      session.run_direct().await?;
    }
    let outcome = session.finish();

    if options.write != WriteMode::None {
      let head = fingerprint(&outcome.context).map_err(StoreError::Serialize)?;
      self
        .store
        .set_status(&key, BuildStatus::Complete, &options.settings, Some(head.0))?;
    }
    info!(
      variant = %key,
      executed = outcome.executed().len(),
      cached = outcome.cached().len(),
      "build complete"
    );
    Ok(outcome)
  }

  /// Fail early when an import names a package the package source cannot load.
  async fn check_imports(&self, def: &ChainDefinition, base: &BuildContext) -> Result<(), BuildError> {
    for (name, requirement) in required_imports(def, base) {
      self
        .packages
        .load_definition(&requirement.source)
        .await
        .map_err(|e| BuildError::step(&name, StepError::Store(e)))?;
    }
    Ok(())
  }

  /// Merged outputs of a stored deployment; see [`get_outputs`].
  pub fn get_outputs(&self, key: &VariantKey) -> Result<Option<BuildContext>, BuildError> {
    get_outputs(&self.store, key)
  }

  /// Forget every record and layer state of a deployment.
  pub fn wipe(&self, key: &VariantKey) -> Result<(), BuildError> {
    Ok(self.store.wipe(key)?)
  }
}

/// Merged outputs of a stored deployment.
///
/// Records hold only what their action produced, so the entries of every
/// recorded action are overlaid in topological order on top of the package
/// and the settings of the last build. Returns `None` when the variant was
/// never built. The chain is not touched.
pub fn get_outputs(store: &DeploymentStore, key: &VariantKey) -> Result<Option<BuildContext>, BuildError> {
  let Some(raw) = store.read_definition(&key.name, &key.version)? else {
    return Ok(None);
  };
  let Some(variant) = store.read_variant(key)? else {
    return Ok(None);
  };
  let def = ChainDefinition::parse(raw)?;

  let records: Vec<&BuildContext> = def
    .topological_actions()
    .iter()
    .filter_map(|name| variant.records.get(name).map(|r| &r.output))
    .collect();
  if records.is_empty() {
    return Ok(None);
  }
  let timestamp = records.iter().map(|c| c.timestamp).max().unwrap_or_default();
  let base = BuildContext::new(
    package_meta(&def),
    key.chain_id,
    timestamp,
    resolve_settings(&def, &variant.options)?,
  );
  Ok(Some(merge_contexts(
    std::iter::once(&base).chain(records),
    key.chain_id,
    timestamp,
  )))
}

fn package_meta(def: &ChainDefinition) -> PackageMeta {
  PackageMeta {
    name: def.name().to_string(),
    version: def.version().to_string(),
    description: def.raw().description.clone(),
  }
}

pub(crate) fn check(raw: RawDefinition) -> Result<ChainDefinition, BuildError> {
  let def = ChainDefinition::parse(raw)?;
  let problems = def.validate();
  if !problems.is_empty() {
    return Err(BuildError::Invalid {
      package: def.raw().package_ref(),
      problems,
    });
  }
  Ok(def)
}

/// Supplied value, then declared default.
pub fn resolve_settings(
  def: &ChainDefinition,
  supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, BuildError> {
  for name in supplied.keys().filter(|n| !def.settings().contains_key(*n)) {
    warn!(setting = %name, "ignoring value for undeclared setting");
  }

  def
    .settings()
    .iter()
    .map(|(name, setting)| {
      supplied
        .get(name)
        .cloned()
        .or_else(|| setting.default_string())
        .map(|value| (name.clone(), value))
        .ok_or_else(|| BuildError::MissingSetting { setting: name.clone() })
    })
    .collect()
}

/// Packages the import actions of `def` need, keyed by action.
///
/// Sources that reference outputs of other actions cannot be resolved ahead
/// of execution and are left out.
pub fn required_imports(def: &ChainDefinition, base: &BuildContext) -> Vec<(String, ImportRequirement)> {
  let mut out = Vec::new();
  for name in def.topological_actions() {
    let Some(action) = def.action(name) else { continue };
    if action.kind != crate::action::ActionKind::Import {
      continue;
    }
    if let Ok(requirements) = get_required_imports(base, &action.config) {
      out.extend(requirements.into_iter().map(|r| (name.clone(), r)));
    }
  }
  out
}

fn now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}
