//! Persisted project and deployment records.
//!
//! Every record is a self-contained document addressed by its id.
//! Writers replace whole documents, so a concurrent reader sees either
//! the old record or the new one.

pub mod fs;
pub mod memory;

use async_trait::async_trait;

use crate::error::DeployResult;
use crate::model::{Deployment, DeploymentId, Project, ProjectId};

pub use fs::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_project(&self, project: &Project) -> DeployResult<()>;

    async fn load_project(&self, id: &ProjectId) -> DeployResult<Option<Project>>;

    async fn save_deployment(&self, deployment: &Deployment) -> DeployResult<()>;

    async fn load_deployment(&self, id: &DeploymentId) -> DeployResult<Option<Deployment>>;

    /// All deployments, in no particular order.
    async fn deployments(&self) -> DeployResult<Vec<Deployment>>;

    /// Returns whether a record was removed.
    async fn delete_deployment(&self, id: &DeploymentId) -> DeployResult<bool>;
}

/// Most recently modified first, ties broken by id.
pub fn sort_recent_first(deployments: &mut [Deployment]) {
    deployments.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}
