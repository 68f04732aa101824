//! Steps: declared id, weight, dependencies and deferred keys, plus the async action that
//! runs (and optionally compensates) them. [StepGraph] validates a set of steps once, at
//! construction time, so a wiring defect never surfaces mid-run.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::deferred::DeferredValueRegistry;
use crate::error::{GraphError, StepError};
use crate::events::EventSink;
use crate::ledger::ResourceLedger;
use crate::types::{ResourceLedgerEntry, ResourceType};

/// Work performed by a step.
#[async_trait]
pub trait StepAction: Send + Sync {
  /// Consulted only for optional steps. `false` skips the step without calling [StepAction::run].
  async fn precondition(&self, _ctx: &StepContext) -> bool {
    true
  }

  /// Performs the step. Every created external resource must be recorded through
  /// [StepContext::record] right after the service confirms it.
  async fn run(&self, ctx: &StepContext) -> Result<(), StepError>;

  /// Undoes one resource this step recorded. The default has nothing to undo with, which the
  /// executor reports as a manual-cleanup item.
  async fn compensate(&self, _entry: &ResourceLedgerEntry) -> Result<(), StepError> {
    Err(StepError::NotCompensable)
  }
}

/// Handles given to a running step: the run's ledger, registry, cancel flag and event sink.
#[derive(Debug, Clone)]
pub struct StepContext {
  run_id: Uuid,
  step_id: String,
  ledger: ResourceLedger,
  registry: DeferredValueRegistry,
  cancel: CancelFlag,
  events: EventSink,
}

impl StepContext {
  pub fn new(
    step_id: impl Into<String>,
    ledger: ResourceLedger,
    registry: DeferredValueRegistry,
    cancel: CancelFlag,
    events: EventSink,
  ) -> Self {
    Self {
      run_id: ledger.run_id(),
      step_id: step_id.into(),
      ledger,
      registry,
      cancel,
      events,
    }
  }

  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  pub fn step_id(&self) -> &str {
    &self.step_id
  }

  pub fn cancel_flag(&self) -> &CancelFlag {
    &self.cancel
  }

  pub fn registry(&self) -> &DeferredValueRegistry {
    &self.registry
  }

  pub fn ledger(&self) -> &ResourceLedger {
    &self.ledger
  }

  /// Safe point for cooperative cancellation.
  pub fn checkpoint(&self) -> Result<(), StepError> {
    self.cancel.check()
  }

  /// Records a confirmed external resource as created by this step.
  pub fn record(
    &self,
    resource_type: ResourceType,
    identifier: impl Into<String>,
  ) -> Result<ResourceLedgerEntry, StepError> {
    Ok(self.ledger.record(resource_type, identifier, &self.step_id)?)
  }

  /// Resolves a deferred value as this step.
  pub fn resolve(&self, key: &str, value: impl Into<String>) -> Result<(), StepError> {
    Ok(self.registry.resolve(key, value, &self.step_id)?)
  }

  /// Waits for a deferred value; fails with [StepError::Abandoned] if the run winds down first.
  pub async fn await_value(&self, key: &str) -> Result<String, StepError> {
    Ok(self.registry.await_value(key).await?)
  }

  /// Sends a fine-grained progress message for this step.
  pub fn report(&self, message: impl Into<String>) {
    self.events.progress(Some(&self.step_id), message);
  }
}

/// A step definition. Built once per request shape and validated by [StepGraph::new].
#[derive(Clone)]
pub struct Step {
  id: String,
  depends_on: BTreeSet<String>,
  weight: u32,
  optional: bool,
  awaits: BTreeSet<String>,
  resolves: BTreeSet<String>,
  action: Arc<dyn StepAction>,
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("id", &self.id)
      .field("depends_on", &self.depends_on)
      .field("weight", &self.weight)
      .field("optional", &self.optional)
      .field("awaits", &self.awaits)
      .field("resolves", &self.resolves)
      .finish()
  }
}

impl Step {
  /// New step with weight 1 and no dependencies.
  pub fn new(id: impl Into<String>, action: impl StepAction + 'static) -> Self {
    Self::from_action(id, Arc::new(action))
  }

  pub fn from_action(id: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
    Self {
      id: id.into(),
      depends_on: BTreeSet::new(),
      weight: 1,
      optional: false,
      awaits: BTreeSet::new(),
      resolves: BTreeSet::new(),
      action,
    }
  }

  /// Adds a prerequisite step.
  pub fn after(mut self, step_id: impl Into<String>) -> Self {
    self.depends_on.insert(step_id.into());
    self
  }

  pub fn with_weight(mut self, weight: u32) -> Self {
    self.weight = weight;
    self
  }

  /// Marks the step optional: its precondition decides between running and `Skipped`.
  pub fn optional(mut self) -> Self {
    self.optional = true;
    self
  }

  /// Declares that the step awaits `key`.
  pub fn awaiting(mut self, key: impl Into<String>) -> Self {
    self.awaits.insert(key.into());
    self
  }

  /// Declares that the step resolves `key`. Each key has exactly one resolver.
  pub fn resolving(mut self, key: impl Into<String>) -> Self {
    self.resolves.insert(key.into());
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn depends_on(&self) -> &BTreeSet<String> {
    &self.depends_on
  }

  pub fn weight(&self) -> u32 {
    self.weight
  }

  pub fn is_optional(&self) -> bool {
    self.optional
  }

  pub fn awaits(&self) -> &BTreeSet<String> {
    &self.awaits
  }

  pub fn resolves(&self) -> &BTreeSet<String> {
    &self.resolves
  }

  pub fn action(&self) -> Arc<dyn StepAction> {
    Arc::clone(&self.action)
  }
}

/// A validated step graph in declaration order.
#[derive(Debug, Clone)]
pub struct StepGraph {
  steps: Vec<Step>,
  index: HashMap<String, usize>,
}

impl StepGraph {
  /// Validates ids, dependencies, acyclicity and deferred-key wiring.
  #[instrument(level = "trace", skip(steps))]
  pub fn new(steps: Vec<Step>) -> Result<Self, GraphError> {
    let mut index = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
      if index.insert(step.id.clone(), i).is_some() {
        return Err(GraphError::DuplicateStep(step.id.clone()));
      }
    }
    for step in &steps {
      for dep in &step.depends_on {
        if !index.contains_key(dep) {
          return Err(GraphError::UnknownDependency {
            step: step.id.clone(),
            dependency: dep.clone(),
          });
        }
      }
    }
    let graph = Self { steps, index };
    graph.check_acyclic()?;
    graph.check_deferred_wiring()?;
    Ok(graph)
  }

  fn check_acyclic(&self) -> Result<(), GraphError> {
    let mut indegree: Vec<usize> = self.steps.iter().map(|s| s.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
    for (i, step) in self.steps.iter().enumerate() {
      for dep in &step.depends_on {
        dependents[self.index[dep]].push(i);
      }
    }
    let mut queue: VecDeque<usize> = (0..self.steps.len()).filter(|i| indegree[*i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
      visited += 1;
      for &d in &dependents[i] {
        indegree[d] -= 1;
        if indegree[d] == 0 {
          queue.push_back(d);
        }
      }
    }
    if visited == self.steps.len() {
      return Ok(());
    }
    let mut stuck: Vec<String> = self
      .steps
      .iter()
      .enumerate()
      .filter(|(i, _)| indegree[*i] > 0)
      .map(|(_, s)| s.id.clone())
      .collect();
    stuck.sort();
    Err(GraphError::Cycle(stuck))
  }

  fn check_deferred_wiring(&self) -> Result<(), GraphError> {
    let mut resolvers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for step in &self.steps {
      for key in &step.resolves {
        resolvers.entry(key.as_str()).or_default().push(&step.id);
      }
    }
    for (key, steps) in &resolvers {
      if steps.len() > 1 {
        return Err(GraphError::DuplicateResolver {
          key: key.to_string(),
          steps: steps.iter().map(|s| s.to_string()).collect(),
        });
      }
    }
    for step in &self.steps {
      for key in &step.awaits {
        let resolver = match resolvers.get(key.as_str()).and_then(|s| s.first()) {
          Some(r) => *r,
          None => {
            return Err(GraphError::UnresolvedKey {
              step: step.id.clone(),
              key: key.clone(),
            });
          }
        };
        let resolver_step = &self.steps[self.index[resolver]];
        if resolver_step.optional {
          return Err(GraphError::OptionalResolver {
            step: resolver.to_string(),
            key: key.clone(),
          });
        }
        if resolver != step.id && self.depends_transitively(resolver, &step.id) {
          return Err(GraphError::DeferredDeadlock {
            key: key.clone(),
            awaiting: step.id.clone(),
            resolver: resolver.to_string(),
          });
        }
      }
    }
    Ok(())
  }

  /// True if `from` (transitively) depends on `on`.
  pub fn depends_transitively(&self, from: &str, on: &str) -> bool {
    let mut stack: Vec<&str> = vec![from];
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    while let Some(id) = stack.pop() {
      let Some(&i) = self.index.get(id) else {
        continue;
      };
      for dep in &self.steps[i].depends_on {
        if dep == on {
          return true;
        }
        if seen.insert(dep.as_str()) {
          stack.push(dep.as_str());
        }
      }
    }
    false
  }

  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  pub fn get(&self, step_id: &str) -> Option<&Step> {
    self.index.get(step_id).map(|&i| &self.steps[i])
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Every deferred key awaited or resolved by some step; declared up front by the executor.
  pub fn deferred_keys(&self) -> BTreeSet<String> {
    self
      .steps
      .iter()
      .flat_map(|s| s.awaits.iter().chain(s.resolves.iter()).cloned())
      .collect()
  }
}
