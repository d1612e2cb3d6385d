use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::backend::azure_cli::{self, AzureCliBackend, SERVICE_PRINCIPAL_KEYS};
use super::backend::{self, Connector, StorageBackend};
use super::site::{self, SiteUpload};
use super::{RemoteStatus, StorageProvider, UploadResult};
use crate::analyze::Analysis;
use crate::credentials::Credentials;
use crate::error::{DeployError, DeployResult};
use crate::model::DeploymentId;

pub const NAME: &str = "azure";

fn connect(credentials: &Credentials) -> DeployResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(AzureCliBackend::from_credentials(credentials)?))
}

/// Storage account that serves the blobs.
#[must_use]
pub fn account_of(credentials: &Credentials) -> Option<String> {
    credentials
        .get("connection_string")
        .and_then(azure_cli::account_from_connection_string)
        .or_else(|| credentials.get("storage_account").map(String::from))
}

/// Azure Blob Storage. Each deployment gets its own public container.
pub struct AzureBlob {
    connector: Connector,
    collision_retries: u32,
}

impl Default for AzureBlob {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureBlob {
    /// Talks to Blob Storage through the `az` CLI.
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

    #[must_use]
    pub fn public_url(account: &str, container: &str, custom_domain: Option<&str>) -> String {
        match custom_domain {
            Some(domain) => format!("https://{domain}"),
            None => format!("https://{account}.blob.core.windows.net/{container}/index.html"),
        }
    }
}

#[async_trait]
impl StorageProvider for AzureBlob {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_credentials(&self, credentials: &Credentials) -> bool {
        credentials.has("connection_string") || credentials.missing(SERVICE_PRINCIPAL_KEYS).is_empty()
    }

    async fn upload(
        &self,
        deployment_id: &DeploymentId,
        build_dir: &Path,
        analysis: &Analysis,
        credentials: &Credentials,
        custom_domain: Option<&str>,
    ) -> DeployResult<UploadResult> {
        let account = account_of(credentials).ok_or_else(|| DeployError::InvalidCredentials {
            provider: NAME.into(),
            reason: "no storage account in credentials".into(),
        })?;
        let backend = (self.connector)(credentials)?;

        let upload = SiteUpload {
            provider: NAME,
            deployment_id,
            build_dir,
            collision_retries: self.collision_retries,
            framework: analysis.framework.to_string(),
            region: None,
            account: Some(account.clone()),
            custom_domain,
        };
        let metadata = site::publish(backend, upload, |container| {
            Self::public_url(&account, container, custom_domain)
        })
        .await?;
        info!(
            deployment_id = %deployment_id,
            container = %metadata.container,
            url = %metadata.url,
            "azure deployment uploaded"
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
                warn!(deployment_id = %deployment_id, error = %e, "azure connect failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn either_credential_shape_is_accepted() {
        let provider = AzureBlob::new();
        let conn = Credentials::new().with("connection_string", "AccountName=a;AccountKey=k");
        let sp: Credentials = SERVICE_PRINCIPAL_KEYS.iter().map(|k| (*k, "v")).collect();
        let partial = Credentials::new().with("tenant_id", "t");

        assert!(provider.validate_credentials(&conn));
        assert!(provider.validate_credentials(&sp));
        assert!(!provider.validate_credentials(&partial));
    }

    #[test]
    fn custom_domain_replaces_blob_url() {
        assert_eq!(
            AzureBlob::public_url("acct", "deploy-1", Some("www.example.com")),
            "https://www.example.com"
        );
        assert_eq!(
            AzureBlob::public_url("acct", "deploy-1", None),
            "https://acct.blob.core.windows.net/deploy-1/index.html"
        );
    }
}
