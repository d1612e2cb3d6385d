use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::RecordStore;
use crate::error::{DeployError, DeployResult};
use crate::model::{Deployment, DeploymentId, Project, ProjectId};

const PROJECTS: &str = "projects";
const DEPLOYMENTS: &str = "deployments";

/// One JSON document per record under `<root>/projects` and
/// `<root>/deployments`.
///
/// Writes go to a temporary sibling that is renamed over the target,
/// so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating its directories.
    pub async fn open(root: impl Into<PathBuf>) -> DeployResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(PROJECTS)).await?;
        tokio::fs::create_dir_all(root.join(DEPLOYMENTS)).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, kind: &str, id: &str) -> Option<PathBuf> {
        is_safe_id(id).then(|| self.root.join(kind).join(format!("{id}.json")))
    }

    async fn write<T: Serialize + Sync>(&self, kind: &str, id: &str, record: &T) -> DeployResult<()> {
        let path = self
            .path(kind, id)
            .ok_or_else(|| DeployError::Store(format!("invalid record id: {id}")))?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));

        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }
        debug!(path = %path.display(), "record written");
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, id: &str) -> DeployResult<Option<T>> {
        let Some(path) = self.path(kind, id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ids become file names, so only plain tokens are accepted.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl RecordStore for FileStore {
    async fn save_project(&self, project: &Project) -> DeployResult<()> {
        self.write(PROJECTS, project.id.as_str(), project).await
    }

    async fn load_project(&self, id: &ProjectId) -> DeployResult<Option<Project>> {
        self.read(PROJECTS, id.as_str()).await
    }

    async fn save_deployment(&self, deployment: &Deployment) -> DeployResult<()> {
        self.write(DEPLOYMENTS, deployment.id.as_str(), deployment)
            .await
    }

    async fn load_deployment(&self, id: &DeploymentId) -> DeployResult<Option<Deployment>> {
        self.read(DEPLOYMENTS, id.as_str()).await
    }

    async fn deployments(&self) -> DeployResult<Vec<Deployment>> {
        let mut entries = tokio::fs::read_dir(self.root.join(DEPLOYMENTS)).await?;
        let mut out = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Deployment>(&raw) {
                Ok(d) => out.push(d),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(out)
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> DeployResult<bool> {
        let Some(path) = self.path(DEPLOYMENTS, id.as_str()) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
