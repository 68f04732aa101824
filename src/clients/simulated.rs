//! In-process stand-ins for the external services, with injectable latency and failures.
//! Used by the CLI demo mode and by tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{
  ArtifactWriter, CreateRequest, CreatedResource, PrerequisiteChecker, ServiceClient, ServiceKind,
  Services,
};
use crate::error::ClientError;

/// One call observed by a [SimulatedService].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
  Create(String),
  Configure(String),
  Delete(String),
}

type CreateHook = Arc<dyn Fn(&CreateRequest) + Send + Sync>;

#[derive(Default)]
struct SimulatedState {
  next_id: u64,
  live: BTreeMap<String, BTreeMap<String, String>>,
  calls: Vec<ServiceCall>,
  transient_failures: u32,
}

/// Simulated external service holding its resources in memory.
pub struct SimulatedService {
  kind: ServiceKind,
  latency: Duration,
  fail_creates: bool,
  fail_deletes: bool,
  with_urls: bool,
  on_create: Option<CreateHook>,
  state: Mutex<SimulatedState>,
}

impl std::fmt::Debug for SimulatedService {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SimulatedService")
      .field("kind", &self.kind)
      .field("latency", &self.latency)
      .field("fail_creates", &self.fail_creates)
      .field("fail_deletes", &self.fail_deletes)
      .finish_non_exhaustive()
  }
}

impl SimulatedService {
  pub fn new(kind: ServiceKind) -> Self {
    Self {
      kind,
      latency: Duration::ZERO,
      fail_creates: false,
      fail_deletes: false,
      with_urls: !matches!(kind, ServiceKind::Workspace | ServiceKind::PackageManager),
      on_create: None,
      state: Mutex::new(SimulatedState::default()),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Every `create` fails permanently.
  pub fn failing_creates(mut self) -> Self {
    self.fail_creates = true;
    self
  }

  /// Every `delete` fails permanently.
  pub fn failing_deletes(mut self) -> Self {
    self.fail_deletes = true;
    self
  }

  /// The next `n` calls fail with a transient error.
  pub fn with_transient_failures(self, n: u32) -> Self {
    self.lock().transient_failures = n;
    self
  }

  /// Runs `hook` after each confirmed create.
  pub fn on_create(mut self, hook: impl Fn(&CreateRequest) + Send + Sync + 'static) -> Self {
    self.on_create = Some(Arc::new(hook));
    self
  }

  pub fn kind(&self) -> ServiceKind {
    self.kind
  }

  /// Identifiers of resources that currently exist.
  pub fn live_resources(&self) -> Vec<String> {
    self.lock().live.keys().cloned().collect()
  }

  /// Settings applied to a live resource through `configure`.
  pub fn settings(&self, identifier: &str) -> Option<BTreeMap<String, String>> {
    self.lock().live.get(identifier).cloned()
  }

  pub fn calls(&self) -> Vec<ServiceCall> {
    self.lock().calls.clone()
  }

  /// Seeds a resource as if created earlier, e.g. by a crashed run.
  pub fn seed(&self, identifier: impl Into<String>) {
    self.lock().live.insert(identifier.into(), BTreeMap::new());
  }

  fn lock(&self) -> MutexGuard<'_, SimulatedState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  async fn call(&self, call: ServiceCall) -> Result<(), ClientError> {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    let mut state = self.lock();
    state.calls.push(call.clone());
    if state.transient_failures > 0 {
      state.transient_failures -= 1;
      return Err(ClientError::Transient(format!("{} temporarily unavailable", self.kind)));
    }
    Ok(())
  }
}

#[async_trait]
impl ServiceClient for SimulatedService {
  fn service(&self) -> ServiceKind {
    self.kind
  }

  async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, ClientError> {
    self.call(ServiceCall::Create(request.name.clone())).await?;
    if self.fail_creates {
      return Err(ClientError::Permanent(format!(
        "{} rejected `{}`",
        self.kind, request.name
      )));
    }
    let created = {
      let mut state = self.lock();
      state.next_id += 1;
      let identifier = format!("{}/{}-{}", self.kind, request.name, state.next_id);
      state.live.insert(identifier.clone(), request.attributes.clone());
      CreatedResource {
        url: self
          .with_urls
          .then(|| format!("https://{}.example.test/{}", self.kind, request.name)),
        identifier,
      }
    };
    debug!(service = %self.kind, identifier = %created.identifier, "simulated create");
    if let Some(hook) = &self.on_create {
      hook(request);
    }
    Ok(created)
  }

  async fn configure(
    &self,
    identifier: &str,
    settings: &BTreeMap<String, String>,
  ) -> Result<(), ClientError> {
    self.call(ServiceCall::Configure(identifier.to_string())).await?;
    let mut state = self.lock();
    match state.live.get_mut(identifier) {
      Some(current) => {
        current.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
      }
      None => Err(ClientError::NotFound(identifier.to_string())),
    }
  }

  async fn delete(&self, identifier: &str) -> Result<(), ClientError> {
    self.call(ServiceCall::Delete(identifier.to_string())).await?;
    if self.fail_deletes {
      return Err(ClientError::Permanent(format!(
        "{} refused to delete `{identifier}`",
        self.kind
      )));
    }
    match self.lock().live.remove(identifier) {
      Some(_) => Ok(()),
      None => Err(ClientError::NotFound(identifier.to_string())),
    }
  }
}

/// Prerequisite checker answering from a fixed set of installed tools.
#[derive(Debug, Default)]
pub struct StaticPrerequisites {
  installed: BTreeSet<String>,
}

impl StaticPrerequisites {
  pub fn new<I, S>(installed: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      installed: installed.into_iter().map(Into::into).collect(),
    }
  }
}

#[async_trait]
impl PrerequisiteChecker for StaticPrerequisites {
  async fn is_available(&self, tool: &str) -> Result<bool, ClientError> {
    Ok(self.installed.contains(tool))
  }
}

/// Artifact writer that keeps every write in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactWriter {
  writes: Mutex<Vec<(PathBuf, String)>>,
}

impl MemoryArtifactWriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every write so far as (path, contents), in order.
  pub fn writes(&self) -> Vec<(PathBuf, String)> {
    self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

#[async_trait]
impl ArtifactWriter for MemoryArtifactWriter {
  async fn write(&self, project_dir: &Path, name: &str, contents: &str) -> Result<(), ClientError> {
    self
      .writes
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push((project_dir.join(name), contents.to_string()));
    Ok(())
  }
}

/// A full set of simulated collaborators, keeping concrete handles for inspection.
#[derive(Debug, Clone)]
pub struct SimulatedEnvironment {
  pub services: HashMap<ServiceKind, Arc<SimulatedService>>,
  pub prerequisites: Arc<StaticPrerequisites>,
  pub artifacts: Arc<MemoryArtifactWriter>,
}

impl SimulatedEnvironment {
  /// All services healthy; `installed` lists tools and packages already present.
  pub fn new<I, S>(installed: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      services: ServiceKind::ALL
        .into_iter()
        .map(|k| (k, Arc::new(SimulatedService::new(k))))
        .collect(),
      prerequisites: Arc::new(StaticPrerequisites::new(installed)),
      artifacts: Arc::new(MemoryArtifactWriter::new()),
    }
  }

  /// Replaces one service, e.g. with a failure-injecting one.
  pub fn with_service(mut self, service: SimulatedService) -> Self {
    self.services.insert(service.kind(), Arc::new(service));
    self
  }

  pub fn service(&self, kind: ServiceKind) -> Arc<SimulatedService> {
    match self.services.get(&kind) {
      Some(service) => Arc::clone(service),
      None => Arc::new(SimulatedService::new(kind)),
    }
  }

  /// Resources still alive across every service, as (service, identifier).
  pub fn live_resources(&self) -> Vec<(ServiceKind, String)> {
    let mut all: Vec<(ServiceKind, String)> = self
      .services
      .iter()
      .flat_map(|(k, s)| s.live_resources().into_iter().map(move |id| (*k, id)))
      .collect();
    all.sort();
    all
  }

  pub fn services(&self) -> Services {
    let client = |k: ServiceKind| -> Arc<dyn ServiceClient> { self.service(k) };
    Services {
      source_control: client(ServiceKind::SourceControl),
      content: client(ServiceKind::ContentPlatform),
      edge: client(ServiceKind::EdgeConfig),
      api_mesh: client(ServiceKind::ApiMesh),
      workspace: client(ServiceKind::Workspace),
      packages: client(ServiceKind::PackageManager),
      prerequisites: self.prerequisites.clone(),
      artifacts: self.artifacts.clone(),
    }
  }
}
