use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{ObjectBody, ObjectPage, ObjectProps, StorageBackend};
use crate::error::{DeployError, DeployResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

#[derive(Debug, Default)]
struct Container {
    public: bool,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Creates left to reject as if another account owned the name.
    collisions: u32,
    rejected: Vec<String>,
    undeletable: BTreeSet<String>,
}

/// In-process object store with the same paging rules as a cloud
/// backend. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    containers: Arc<RwLock<BTreeMap<String, Container>>>,
    faults: Arc<Mutex<Faults>>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            containers: Arc::default(),
            faults: Arc::default(),
            page_size: super::CLOUD_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Reject the next `n` container creates with a name collision.
    pub async fn collide_next(&self, n: u32) {
        self.faults.lock().await.collisions = n;
    }

    /// Names whose creation was rejected, in order.
    pub async fn rejected_names(&self) -> Vec<String> {
        self.faults.lock().await.rejected.clone()
    }

    /// Make deletes of `key` fail in every container.
    pub async fn fail_delete(&self, key: &str) {
        self.faults.lock().await.undeletable.insert(key.to_string());
    }

    pub async fn container_names(&self) -> Vec<String> {
        self.containers.read().await.keys().cloned().collect()
    }

    pub async fn is_public(&self, container: &str) -> bool {
        self.containers
            .read()
            .await
            .get(container)
            .is_some_and(|c| c.public)
    }

    pub async fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        self.containers
            .read()
            .await
            .get(container)
            .and_then(|c| c.objects.get(key).cloned())
    }

    pub async fn object_keys(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .await
            .get(container)
            .map(|c| c.objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn no_container(name: &str) -> DeployError {
    DeployError::provider("memory", format!("no such container: {name}"))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_container(&self, name: &str) -> DeployResult<()> {
        {
            let mut faults = self.faults.lock().await;
            if faults.collisions > 0 {
                faults.collisions -= 1;
                faults.rejected.push(name.to_string());
                return Err(DeployError::NameCollision(name.to_string()));
            }
        }

        let mut containers = self.containers.write().await;
        if containers.contains_key(name) {
            return Err(DeployError::NameCollision(name.to_string()));
        }
        containers.insert(name.to_string(), Container::default());
        Ok(())
    }

    async fn publish_container(&self, name: &str) -> DeployResult<()> {
        let mut containers = self.containers.write().await;
        let container = containers.get_mut(name).ok_or_else(|| no_container(name))?;
        container.public = true;
        Ok(())
    }

    async fn list_containers(&self) -> DeployResult<Vec<String>> {
        Ok(self.container_names().await)
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        props: &ObjectProps,
    ) -> DeployResult<()> {
        let data = match body {
            ObjectBody::Bytes(data) => data,
            ObjectBody::File(path) => tokio::fs::read(&path).await?,
        };

        let mut containers = self.containers.write().await;
        let target = containers
            .get_mut(container)
            .ok_or_else(|| no_container(container))?;
        target.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: props.content_type.clone(),
                cache_control: props.cache_control.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, container: &str, key: &str) -> DeployResult<Option<Vec<u8>>> {
        let containers = self.containers.read().await;
        let target = containers.get(container).ok_or_else(|| no_container(container))?;
        Ok(target.objects.get(key).map(|o| o.data.clone()))
    }

    async fn list_objects(&self, container: &str, token: Option<&str>) -> DeployResult<ObjectPage> {
        let containers = self.containers.read().await;
        let target = containers.get(container).ok_or_else(|| no_container(container))?;

        let mut keys: Vec<String> = target
            .objects
            .keys()
            .filter(|k| token.is_none_or(|t| k.as_str() > t))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next = if keys.len() > self.page_size {
            keys.pop();
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage { keys, next })
    }

    async fn delete_objects(&self, container: &str, keys: &[String]) -> DeployResult<Vec<String>> {
        let undeletable = self.faults.lock().await.undeletable.clone();
        let mut containers = self.containers.write().await;
        let target = containers
            .get_mut(container)
            .ok_or_else(|| no_container(container))?;

        let mut failed = Vec::new();
        for key in keys {
            if undeletable.contains(key) {
                failed.push(key.clone());
            } else {
                target.objects.remove(key);
            }
        }
        Ok(failed)
    }

    async fn delete_container(&self, name: &str) -> DeployResult<()> {
        let mut containers = self.containers.write().await;
        match containers.get(name) {
            None => Err(no_container(name)),
            Some(c) if !c.objects.is_empty() => Err(DeployError::provider(
                "memory",
                format!("container not empty: {name}"),
            )),
            Some(_) => {
                containers.remove(name);
                Ok(())
            }
        }
    }
}
