use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AzureBlob, S3, StorageProvider};
use crate::credentials::{CredentialValidator, Credentials};
use crate::error::{DeployError, DeployResult};

/// Name-keyed set of storage providers.
///
/// # Example
///
/// ```
/// use rampa::provider::ProviderRegistry;
///
/// let registry = ProviderRegistry::with_defaults();
/// assert_eq!(registry.names(), vec!["aws", "azure"]);
/// assert!(registry.get("gcs").is_err());
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn StorageProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `aws` and `azure` providers.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(S3::new()))
            .register(Arc::new(AzureBlob::new()))
    }

    /// Add a provider under its own name, replacing any previous one.
    #[must_use]
    pub fn register(mut self, provider: Arc<dyn StorageProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn get(&self, name: &str) -> DeployResult<Arc<dyn StorageProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownProvider {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Registered names, alphabetical.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Structural validation by the named provider's own rules. Unknown
/// providers never validate.
impl CredentialValidator for ProviderRegistry {
    fn is_valid(&self, provider: &str, credentials: &Credentials) -> bool {
        self.providers
            .get(provider)
            .is_some_and(|p| p.validate_credentials(credentials))
    }
}
