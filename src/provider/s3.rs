use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::backend::aws_cli::{self, AwsCliBackend, DEFAULT_REGION};
use super::backend::{self, Connector, StorageBackend};
use super::site::{self, SiteUpload};
use super::{RemoteStatus, StorageProvider, UploadResult};
use crate::analyze::Analysis;
use crate::credentials::Credentials;
use crate::error::DeployResult;
use crate::model::DeploymentId;

pub const NAME: &str = "aws";

const REQUIRED_KEYS: &[&str] = &["access_key_id", "secret_access_key"];

fn connect(credentials: &Credentials) -> DeployResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(AwsCliBackend::from_credentials(credentials)?))
}

/// S3 static website hosting. One bucket per deployment.
pub struct S3 {
    connector: Connector,
    collision_retries: u32,
}

impl Default for S3 {
    fn default() -> Self {
        Self::new()
    }
}

impl S3 {
    /// Talks to S3 through the `aws` CLI.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(connect))
    }

    #[must_use]
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_connector(backend::fixed(backend))
    }

    #[must_use]
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector,
            collision_retries: 1,
        }
    }

    #[must_use]
    pub const fn collision_retries(mut self, retries: u32) -> Self {
        self.collision_retries = retries;
        self
    }

    /// Website endpoint of a bucket. `us-east-1` uses the legacy
    /// dashed host form.
    #[must_use]
    pub fn website_url(bucket: &str, region: &str) -> String {
        if region == DEFAULT_REGION {
            format!("https://{bucket}.s3-website-{region}.amazonaws.com")
        } else {
            format!("https://{bucket}.s3-website.{region}.amazonaws.com")
        }
    }
}

#[async_trait]
impl StorageProvider for S3 {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_credentials(&self, credentials: &Credentials) -> bool {
        credentials.missing(REQUIRED_KEYS).is_empty()
    }

    async fn upload(
        &self,
        deployment_id: &DeploymentId,
        build_dir: &Path,
        analysis: &Analysis,
        credentials: &Credentials,
        custom_domain: Option<&str>,
    ) -> DeployResult<UploadResult> {
        let backend = (self.connector)(credentials)?;
        let region = aws_cli::region_of(credentials).to_string();

        let upload = SiteUpload {
            provider: NAME,
            deployment_id,
            build_dir,
            collision_retries: self.collision_retries,
            framework: analysis.framework.to_string(),
            region: Some(region.clone()),
            account: None,
            custom_domain,
        };
        let metadata = site::publish(backend, upload, |bucket| Self::website_url(bucket, &region)).await?;
        info!(
            deployment_id = %deployment_id,
            bucket = %metadata.container,
            url = %metadata.url,
            "s3 deployment uploaded"
        );
        Ok(metadata.into())
    }

    async fn status(&self, deployment_id: &DeploymentId, credentials: &Credentials) -> RemoteStatus {
        match (self.connector)(credentials) {
            Ok(backend) => site::status(backend.as_ref(), deployment_id).await,
            Err(e) => RemoteStatus::Error {
                message: e.to_string(),
            },
        }
    }

    async fn delete(&self, deployment_id: &DeploymentId, credentials: &Credentials) -> bool {
        match (self.connector)(credentials) {
            Ok(backend) => site::teardown(backend.as_ref(), deployment_id).await,
            Err(e) => {
                warn!(deployment_id = %deployment_id, error = %e, "s3 connect failed");
                false
            }
        }
    }
}
