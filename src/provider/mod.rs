//! Cloud storage targets a build can be published to.
//!
//! Each target implements [`StorageProvider`] and is selected by name
//! through a [`ProviderRegistry`]. New targets are added by
//! registering another implementation.

pub mod azure;
pub mod backend;
pub mod registry;
pub mod s3;
pub mod site;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::Analysis;
use crate::credentials::Credentials;
use crate::error::DeployResult;
use crate::model::DeploymentId;

pub use azure::AzureBlob;
pub use registry::ProviderRegistry;
pub use s3::S3;

/// Written next to the uploaded files and returned as the provider
/// details of a completed deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub deployment_id: DeploymentId,
    pub provider: String,
    pub container: String,
    pub url: String,
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub uploaded_files: u64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub url: String,
    pub metadata: ContainerMetadata,
}

impl From<ContainerMetadata> for UploadResult {
    fn from(metadata: ContainerMetadata) -> Self {
        Self {
            url: metadata.url.clone(),
            metadata,
        }
    }
}

/// What the provider reports about a deployment's remote container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Active {
        container: String,
        metadata: Option<ContainerMetadata>,
    },
    NotFound,
    Error {
        message: String,
    },
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Registry key, e.g. `aws`.
    fn name(&self) -> &str;

    /// Structural check only: required keys present and non-empty.
    fn validate_credentials(&self, credentials: &Credentials) -> bool;

    async fn upload(
        &self,
        deployment_id: &DeploymentId,
        build_dir: &Path,
        analysis: &Analysis,
        credentials: &Credentials,
        custom_domain: Option<&str>,
    ) -> DeployResult<UploadResult>;

    /// Never fails; backend errors come back as [`RemoteStatus::Error`].
    async fn status(&self, deployment_id: &DeploymentId, credentials: &Credentials) -> RemoteStatus;

    /// `false` when no container matches or any step fails.
    async fn delete(&self, deployment_id: &DeploymentId, credentials: &Credentials) -> bool;
}
