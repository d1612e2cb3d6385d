use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::RecordStore;
use crate::error::DeployResult;
use crate::model::{Deployment, DeploymentId, Project, ProjectId};

/// Records held in process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
    deployments: Arc<RwLock<HashMap<DeploymentId, Deployment>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_project(&self, project: &Project) -> DeployResult<()> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn load_project(&self, id: &ProjectId) -> DeployResult<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn save_deployment(&self, deployment: &Deployment) -> DeployResult<()> {
        self.deployments
            .write()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn load_deployment(&self, id: &DeploymentId) -> DeployResult<Option<Deployment>> {
        Ok(self.deployments.read().await.get(id).cloned())
    }

    async fn deployments(&self) -> DeployResult<Vec<Deployment>> {
        Ok(self.deployments.read().await.values().cloned().collect())
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> DeployResult<bool> {
        Ok(self.deployments.write().await.remove(id).is_some())
    }
}
