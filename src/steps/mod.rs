//! Concrete provisioning steps and the graph builder for a [ProvisionSpec].

mod commit_config;
mod install_packages;
mod prerequisites;
mod resource;


pub use commit_config::{CommitProjectConfig, PROJECT_CONFIG_SETTING, ProjectConfig};
pub use install_packages::InstallPackages;
pub use prerequisites::CheckPrerequisites;
pub use resource::{CreateResource, delete_resource};

use tracing::instrument;

use crate::clients::{CreateRequest, PATH_ATTRIBUTE, Services};
use crate::config::{PrerequisitePlacement, ProvisionerConfig};
use crate::error::GraphError;
use crate::step::{Step, StepGraph};
use crate::types::{Capability, ProvisionSpec, ResourceType};

pub const CHECK_PREREQUISITES: &str = "check-prerequisites";
pub const CREATE_PROJECT_DIRECTORY: &str = "create-project-directory";
pub const INSTALL_PACKAGES: &str = "install-packages";
pub const CREATE_REPOSITORY: &str = "create-repository";
pub const CREATE_CONTENT_SITE: &str = "create-content-site";
pub const BIND_EDGE_CONFIG: &str = "bind-edge-config";
pub const DEPLOY_API_MESH: &str = "deploy-api-mesh";
pub const COMMIT_PROJECT_CONFIG: &str = "commit-project-config";

pub const REPOSITORY_URL: &str = "repository-url";
pub const CONTENT_SITE_URL: &str = "content-site-url";
pub const ENDPOINT_URL: &str = "endpoint-url";

/// Builds the validated step graph for `spec`. Capability-gated steps are only added when
/// the capability is requested.
#[instrument(level = "trace", skip_all, fields(project = %spec.project_name))]
pub fn build_step_graph(
  spec: &ProvisionSpec,
  services: &Services,
  config: &ProvisionerConfig,
) -> Result<StepGraph, GraphError> {
  let retry = config.retry;
  let upfront = config.prerequisites == PrerequisitePlacement::Upfront;
  let mut steps = Vec::new();
  let mut resolved_keys = vec![REPOSITORY_URL];

  steps.push(
    Step::new(
      CHECK_PREREQUISITES,
      CheckPrerequisites::new(
        services.prerequisites.clone(),
        spec.required_tools.clone(),
        retry,
      ),
    )
    .with_weight(5),
  );

  let mut project_dir = Step::new(
    CREATE_PROJECT_DIRECTORY,
    CreateResource::new(
      services.workspace.clone(),
      ResourceType::LocalDirectory,
      CreateRequest::named(&spec.project_name)
        .with(PATH_ATTRIBUTE, spec.project_dir.display().to_string()),
      retry,
    ),
  )
  .with_weight(5);
  if upfront {
    project_dir = project_dir.after(CHECK_PREREQUISITES);
  }
  steps.push(project_dir);

  steps.push(
    Step::new(
      INSTALL_PACKAGES,
      InstallPackages::new(
        services.packages.clone(),
        services.prerequisites.clone(),
        spec.packages.clone(),
        spec.project_dir.clone(),
        config.max_concurrent_installs,
        retry,
      ),
    )
    .after(CHECK_PREREQUISITES)
    .after(CREATE_PROJECT_DIRECTORY)
    .optional()
    .with_weight(10),
  );

  steps.push(
    Step::new(
      CREATE_REPOSITORY,
      CreateResource::new(
        services.source_control.clone(),
        ResourceType::Repository,
        CreateRequest::named(&spec.project_name)
          .with("owner", &spec.owner)
          .with("template", &spec.template),
        retry,
      )
      .resolving(REPOSITORY_URL),
    )
    .after(CREATE_PROJECT_DIRECTORY)
    .resolving(REPOSITORY_URL)
    .with_weight(15),
  );

  if spec.wants(Capability::HostedContent) {
    resolved_keys.push(CONTENT_SITE_URL);
    steps.push(
      Step::new(
        CREATE_CONTENT_SITE,
        CreateResource::new(
          services.content.clone(),
          ResourceType::HostedContentSite,
          CreateRequest::named(&spec.project_name),
          retry,
        )
        .input("repository", REPOSITORY_URL)
        .resolving(CONTENT_SITE_URL),
      )
      .after(CREATE_REPOSITORY)
      .awaiting(REPOSITORY_URL)
      .resolving(CONTENT_SITE_URL)
      .with_weight(15),
    );
  }

  if spec.wants(Capability::EdgeDelivery) {
    steps.push(
      Step::new(
        BIND_EDGE_CONFIG,
        CreateResource::new(
          services.edge.clone(),
          ResourceType::EdgeConfigBinding,
          CreateRequest::named(&spec.project_name),
          retry,
        )
        .input("origin", CONTENT_SITE_URL),
      )
      .after(CREATE_CONTENT_SITE)
      .awaiting(CONTENT_SITE_URL)
      .with_weight(10),
    );
  }

  if spec.wants(Capability::ApiMesh) {
    resolved_keys.push(ENDPOINT_URL);
    steps.push(
      Step::new(
        DEPLOY_API_MESH,
        CreateResource::new(
          services.api_mesh.clone(),
          ResourceType::DeployedEndpoint,
          CreateRequest::named(&spec.project_name).with("sources", spec.mesh_sources.join(",")),
          retry,
        )
        .resolving(ENDPOINT_URL),
      )
      .after(CREATE_REPOSITORY)
      .resolving(ENDPOINT_URL)
      .with_weight(25),
    );
  }

  let mut commit = Step::new(
    COMMIT_PROJECT_CONFIG,
    CommitProjectConfig::new(
      spec.clone(),
      resolved_keys.iter().map(|k| k.to_string()).collect(),
      &config.artifact_name,
      services.artifacts.clone(),
      services.source_control.clone(),
      retry,
    ),
  )
  .after(CREATE_REPOSITORY)
  .after(INSTALL_PACKAGES)
  .with_weight(15);
  for key in resolved_keys {
    commit = commit.awaiting(key);
  }
  steps.push(commit);

  StepGraph::new(steps)
}
