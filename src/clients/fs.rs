//! File-system backed collaborators: the project directory and the configuration artifact.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{ArtifactWriter, CreateRequest, CreatedResource, ServiceClient, ServiceKind};
use crate::error::ClientError;

/// Attribute of a [CreateRequest] holding the directory to create.
pub const PATH_ATTRIBUTE: &str = "path";

fn client_error(e: io::Error, what: &Path) -> ClientError {
  match e.kind() {
    io::ErrorKind::NotFound => ClientError::NotFound(what.display().to_string()),
    io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
      ClientError::Transient(format!("{}: {e}", what.display()))
    }
    _ => ClientError::Permanent(format!("{}: {e}", what.display())),
  }
}

/// Creates and removes the local project directory. The identifier is the directory path.
#[derive(Debug, Clone, Default)]
pub struct FsDirectoryService;

#[async_trait]
impl ServiceClient for FsDirectoryService {
  fn service(&self) -> ServiceKind {
    ServiceKind::Workspace
  }

  #[instrument(level = "trace", skip(self))]
  async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, ClientError> {
    let path = request
      .attributes
      .get(PATH_ATTRIBUTE)
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from(&request.name));
    // Never take ownership of a directory that was already there.
    if tokio::fs::try_exists(&path).await.map_err(|e| client_error(e, &path))? {
      return Err(ClientError::Permanent(format!(
        "{} already exists",
        path.display()
      )));
    }
    tokio::fs::create_dir_all(&path)
      .await
      .map_err(|e| client_error(e, &path))?;
    debug!(path = %path.display(), "project directory created");
    Ok(CreatedResource {
      identifier: path.display().to_string(),
      url: None,
    })
  }

  async fn configure(
    &self,
    identifier: &str,
    _settings: &BTreeMap<String, String>,
  ) -> Result<(), ClientError> {
    let path = Path::new(identifier);
    tokio::fs::metadata(path)
      .await
      .map(|_| ())
      .map_err(|e| client_error(e, path))
  }

  async fn delete(&self, identifier: &str) -> Result<(), ClientError> {
    let path = Path::new(identifier);
    tokio::fs::remove_dir_all(path)
      .await
      .map_err(|e| client_error(e, path))
  }
}

/// Writes the artifact into the project directory (temp file + rename).
#[derive(Debug, Clone, Default)]
pub struct FsArtifactWriter;

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
  #[instrument(level = "trace", skip(self, contents))]
  async fn write(&self, project_dir: &Path, name: &str, contents: &str) -> Result<(), ClientError> {
    let path = project_dir.join(name);
    let tmp = project_dir.join(format!(".{name}.tmp"));
    tokio::fs::write(&tmp, contents)
      .await
      .map_err(|e| client_error(e, &tmp))?;
    tokio::fs::rename(&tmp, &path)
      .await
      .map_err(|e| client_error(e, &path))
  }
}
