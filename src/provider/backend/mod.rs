//! Object storage primitives a provider is built on.
//!
//! A backend knows nothing about deployments. It creates containers
//! (S3 buckets, blob containers), stores objects, and lists them.

pub mod aws_cli;
pub mod azure_cli;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::DeployResult;

pub use aws_cli::AwsCliBackend;
pub use azure_cli::AzureCliBackend;
pub use memory::MemoryBackend;

/// Page size the cloud listing and batch-delete APIs allow.
pub const CLOUD_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub enum ObjectBody {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProps {
    pub content_type: String,
    pub cache_control: Option<String>,
}

/// One page of object keys. `next` is the continuation token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next: Option<String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fails with `NameCollision` when the name is already taken.
    async fn create_container(&self, name: &str) -> DeployResult<()>;

    /// Make the container's objects readable over a public URL.
    async fn publish_container(&self, name: &str) -> DeployResult<()>;

    async fn list_containers(&self) -> DeployResult<Vec<String>>;

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        props: &ObjectProps,
    ) -> DeployResult<()>;

    async fn get_object(&self, container: &str, key: &str) -> DeployResult<Option<Vec<u8>>>;

    async fn list_objects(&self, container: &str, token: Option<&str>) -> DeployResult<ObjectPage>;

    /// Delete a batch of keys. Returns the keys that could not be
    /// deleted.
    async fn delete_objects(&self, container: &str, keys: &[String]) -> DeployResult<Vec<String>>;

    async fn delete_container(&self, name: &str) -> DeployResult<()>;
}

/// Opens a backend session for one call's credentials.
pub type Connector =
    Arc<dyn Fn(&Credentials) -> DeployResult<Arc<dyn StorageBackend>> + Send + Sync>;

/// A connector that always hands out the same backend.
#[must_use]
pub fn fixed(backend: Arc<dyn StorageBackend>) -> Connector {
    Arc::new(
        move |_: &Credentials| -> DeployResult<Arc<dyn StorageBackend>> {
            Ok(Arc::clone(&backend))
        },
    )
}
