//! Deployment orchestration.
//!
//! The coordinator owns the record store and drives each deployment
//! through build and upload on a background task. Callers get the
//! deployment id back at once and poll [`Coordinator::status`].
//!
//! ```text
//! deploy() ──► record (in_progress) ──► spawn ──► wait for slot
//!                                                  │
//!                      build ──► upload ──► completed | failed
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument, warn};

use crate::analyze::{Analysis, ProjectAnalyzer};
use crate::api::DeployRequest;
use crate::build::{ArtifactSummary, BuildExecutor};
use crate::checkout::{GitCheckout, RepositoryCheckout};
use crate::config::Config;
use crate::credentials::{CredentialValidator, Credentials};
use crate::error::{DeployError, DeployResult};
use crate::model::{
    Deployment, DeploymentId, DeploymentResult, DeploymentSummary, Project, ProjectId,
};
use crate::provider::{AzureBlob, ProviderRegistry, RemoteStatus, S3, StorageProvider};
use crate::store::{self, FileStore, RecordStore};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(900);

pub struct Coordinator {
    store: Arc<dyn RecordStore>,
    builder: Arc<BuildExecutor>,
    providers: ProviderRegistry,
    analyzer: ProjectAnalyzer,
    checkout: Option<Arc<dyn RepositoryCheckout>>,
    validator: Option<Arc<dyn CredentialValidator>>,
    slots: Arc<Semaphore>,
    upload_timeout: Duration,
    running: Mutex<HashMap<DeploymentId, JoinHandle<()>>>,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        builder: BuildExecutor,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            builder: Arc::new(builder),
            providers,
            analyzer: ProjectAnalyzer::new(),
            checkout: None,
            validator: None,
            slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// File-backed store, git checkouts, and the default providers, all
    /// tuned from `config`.
    pub async fn from_config(config: &Config) -> DeployResult<Self> {
        let store = FileStore::open(&config.paths.data_dir).await?;
        let builder = BuildExecutor::new(config.build.timeout())
            .with_install_timeout(config.build.install_timeout());
        let retries = config.deploy.collision_retries;
        let providers = ProviderRegistry::new()
            .register(Arc::new(S3::new().collision_retries(retries)))
            .register(Arc::new(AzureBlob::new().collision_retries(retries)));
        let checkout = GitCheckout::new(
            &config.paths.checkout_dir,
            config.checkout.clone_timeout(),
        );

        Ok(Self::new(Arc::new(store), builder, providers)
            .with_checkout(Arc::new(checkout))
            .max_concurrent(config.deploy.max_concurrent)
            .upload_timeout(config.deploy.upload_timeout()))
    }

    #[must_use]
    pub fn with_checkout(mut self, checkout: Arc<dyn RepositoryCheckout>) -> Self {
        self.checkout = Some(checkout);
        self
    }

    /// Extra credential check consulted before the provider's own.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Pipelines allowed to run at once. Further deploys queue.
    #[must_use]
    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.slots = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    #[must_use]
    pub const fn upload_timeout(mut self, limit: Duration) -> Self {
        self.upload_timeout = limit;
        self
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Clone a repository and analyze it into a new project.
    #[instrument(skip(self))]
    pub async fn analyze(&self, repo_url: &str, branch: &str) -> DeployResult<Project> {
        let checkout = self
            .checkout
            .as_ref()
            .ok_or_else(|| DeployError::Config("no repository checkout configured".into()))?;
        let path = checkout.clone_repo(repo_url, branch).await?;
        self.analyze_path(repo_url, branch, path).await
    }

    /// Analyze an already checked-out tree into a new project.
    pub async fn analyze_path(
        &self,
        repo_url: &str,
        branch: &str,
        path: PathBuf,
    ) -> DeployResult<Project> {
        let analyzer = self.analyzer;
        let target = path.clone();
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&target))
            .await
            .unwrap_or_else(|e| Analysis::failed(format!("analysis task failed: {e}")));

        let project = Project::new(repo_url, branch, path, analysis);
        self.store.save_project(&project).await?;
        info!(
            project_id = %project.id,
            framework = %project.analysis.framework,
            supported = project.analysis.supported(),
            "project analyzed"
        );
        Ok(project)
    }

    pub async fn project(&self, id: &ProjectId) -> DeployResult<Project> {
        self.store
            .load_project(id)
            .await?
            .ok_or_else(|| DeployError::ProjectNotFound(id.to_string()))
    }

    /// Validate a deploy request, record it, and start its pipeline.
    /// Returns as soon as the record exists.
    #[instrument(skip(self, request), fields(project_id = %request.project_id, provider = %request.provider))]
    pub async fn deploy(&self, request: DeployRequest) -> DeployResult<DeploymentId> {
        let provider = self.providers.get(&request.provider)?;
        self.check_credentials(provider.as_ref(), &request.credentials)?;
        let project = self.project(&request.project_id).await?;

        let deployment = Deployment::new(
            project.id.clone(),
            provider.name(),
            request.custom_domain,
        );
        self.store.save_deployment(&deployment).await?;
        let id = deployment.id.clone();
        info!(deployment_id = %id, "deployment accepted");

        let pipeline = Pipeline {
            store: Arc::clone(&self.store),
            builder: Arc::clone(&self.builder),
            provider,
            upload_timeout: self.upload_timeout,
            deployment,
            project,
            credentials: request.credentials,
        };
        let handle = tokio::spawn(supervise(pipeline, Arc::clone(&self.slots)));

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|_, h| !h.is_finished());
        running.insert(id.clone(), handle);
        Ok(id)
    }

    fn check_credentials(
        &self,
        provider: &dyn StorageProvider,
        credentials: &Credentials,
    ) -> DeployResult<()> {
        let rejected_by = |reason: &str| DeployError::InvalidCredentials {
            provider: provider.name().to_string(),
            reason: reason.to_string(),
        };
        if let Some(validator) = &self.validator {
            if !validator.is_valid(provider.name(), credentials) {
                return Err(rejected_by("rejected by credential validation"));
            }
        }
        if !provider.validate_credentials(credentials) {
            return Err(rejected_by("required keys missing or empty"));
        }
        Ok(())
    }

    /// The deployment as last written. Never mutates anything.
    pub async fn status(&self, id: &DeploymentId) -> DeployResult<Deployment> {
        self.store
            .load_deployment(id)
            .await?
            .ok_or_else(|| DeployError::DeploymentNotFound(id.to_string()))
    }

    /// Most recently updated first.
    pub async fn list(&self, offset: usize, limit: usize) -> DeployResult<Vec<DeploymentSummary>> {
        let mut all = self.store.deployments().await?;
        store::sort_recent_first(&mut all);
        Ok(all
            .iter()
            .skip(offset)
            .take(limit)
            .map(Deployment::summary)
            .collect())
    }

    /// Block until the pipeline for `id` has finished, then return the
    /// final record.
    pub async fn wait(&self, id: &DeploymentId) -> DeployResult<Deployment> {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(deployment_id = %id, error = %e, "pipeline supervisor ended abnormally");
            }
        }
        self.status(id).await
    }

    /// Wait for every pipeline started by this coordinator.
    pub async fn wait_all(&self) {
        let handles: Vec<_> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(deployment_id = %id, error = %e, "pipeline supervisor ended abnormally");
            }
        }
    }

    /// Ask the deployment's provider about its remote container.
    pub async fn remote_status(
        &self,
        id: &DeploymentId,
        credentials: &Credentials,
    ) -> DeployResult<RemoteStatus> {
        let deployment = self.status(id).await?;
        let provider = self.providers.get(&deployment.provider)?;
        Ok(provider.status(id, credentials).await)
    }

    /// Delete the deployment's remote container. The record is kept.
    pub async fn teardown(&self, id: &DeploymentId, credentials: &Credentials) -> DeployResult<bool> {
        let deployment = self.status(id).await?;
        let provider = self.providers.get(&deployment.provider)?;
        let removed = provider.delete(id, credentials).await;
        info!(deployment_id = %id, removed, "teardown finished");
        Ok(removed)
    }

    /// Delete finished deployment records completed more than
    /// `retention` ago. Returns how many were removed.
    pub async fn prune(&self, retention: chrono::Duration) -> DeployResult<usize> {
        let cutoff = Utc::now() - retention;
        let mut removed = 0;

        for deployment in self.store.deployments().await? {
            let expired = deployment.status.is_terminal()
                && deployment.completed_at.is_some_and(|at| at < cutoff);
            if expired && self.store.delete_deployment(&deployment.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "pruned deployment records");
        }
        Ok(removed)
    }
}

/// Wait for a slot, run the pipeline on its own task, and record a
/// failure if that task dies.
async fn supervise(pipeline: Pipeline, slots: Arc<Semaphore>) {
    let id = pipeline.deployment.id.clone();
    let store = Arc::clone(&pipeline.store);

    let Some((pipeline, _permit)) = acquire_slot(pipeline, slots).await else {
        return;
    };

    if let Err(e) = tokio::spawn(pipeline.run()).await {
        record_abort(store.as_ref(), &id, &e).await;
    }
}

async fn acquire_slot(
    mut pipeline: Pipeline,
    slots: Arc<Semaphore>,
) -> Option<(Pipeline, OwnedSemaphorePermit)> {
    if let Ok(permit) = Arc::clone(&slots).try_acquire_owned() {
        return Some((pipeline, permit));
    }

    pipeline.log("Queued: waiting for a free deployment slot").await;
    match slots.acquire_owned().await {
        Ok(permit) => Some((pipeline, permit)),
        Err(_) => {
            pipeline
                .finish(Err(DeployError::Other("deployment queue closed".into())))
                .await;
            None
        }
    }
}

async fn record_abort(store: &dyn RecordStore, id: &DeploymentId, cause: &JoinError) {
    error!(deployment_id = %id, error = %cause, "pipeline task aborted");
    let Ok(Some(mut deployment)) = store.load_deployment(id).await else {
        return;
    };
    if deployment.status.is_terminal() {
        return;
    }
    let err = DeployError::Other(format!("pipeline aborted: {cause}"));
    deployment.log(format!("Deployment failed: {}", err.failure_message()));
    if deployment.fail(&err).is_ok() {
        if let Err(e) = store.save_deployment(&deployment).await {
            error!(deployment_id = %id, error = %e, "could not record aborted pipeline");
        }
    }
}

/// One deployment's build and upload. Owns the only writable copy of
/// its record.
struct Pipeline {
    store: Arc<dyn RecordStore>,
    builder: Arc<BuildExecutor>,
    provider: Arc<dyn StorageProvider>,
    upload_timeout: Duration,
    deployment: Deployment,
    project: Project,
    credentials: Credentials,
}

impl Pipeline {
    async fn run(mut self) {
        info!(
            deployment_id = %self.deployment.id,
            project_id = %self.project.id,
            provider = self.provider.name(),
            "deployment started"
        );
        self.log("Starting deployment process").await;
        let outcome = self.execute().await;
        self.finish(outcome).await;
    }

    async fn execute(&mut self) -> DeployResult<DeploymentResult> {
        self.log("Building project...").await;
        let output = self
            .builder
            .build(&self.project.repo_path, &self.project.analysis)
            .await?;

        let scan = output.clone();
        let summary = tokio::task::spawn_blocking(move || ArtifactSummary::collect(&scan))
            .await
            .unwrap_or_default();
        self.log(format!(
            "Build completed: {} ({} files)",
            output.display(),
            summary.total_files
        ))
        .await;

        self.log(format!("Deploying to {}...", self.provider.name())).await;
        let upload = self.provider.upload(
            &self.deployment.id,
            &output,
            &self.project.analysis,
            &self.credentials,
            self.deployment.custom_domain.as_deref(),
        );
        let uploaded = tokio::time::timeout(self.upload_timeout, upload)
            .await
            .map_err(|_| DeployError::UploadTimeout {
                provider: self.provider.name().to_string(),
                limit: self.upload_timeout,
            })??;

        Ok(DeploymentResult {
            url: uploaded.url,
            details: uploaded.metadata,
        })
    }

    async fn finish(&mut self, outcome: DeployResult<DeploymentResult>) {
        let id = self.deployment.id.clone();
        let transition = match outcome {
            Ok(result) => {
                info!(deployment_id = %id, url = %result.url, "deployment completed");
                self.deployment
                    .log(format!("Deployment completed successfully: {}", result.url));
                self.deployment.complete(result)
            }
            Err(e) => {
                warn!(deployment_id = %id, error = %e, transient = e.is_transient(), "deployment failed");
                self.deployment
                    .log(format!("Deployment failed: {}", e.failure_message()));
                self.deployment.fail(&e)
            }
        };
        if let Err(e) = transition {
            error!(deployment_id = %id, error = %e, "invalid deployment transition");
        }
        self.persist().await;
    }

    /// Append a log entry and write the record through.
    async fn log(&mut self, message: impl Into<String> + Send) {
        self.deployment.log(message);
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save_deployment(&self.deployment).await {
            error!(deployment_id = %self.deployment.id, error = %e, "failed to persist deployment");
        }
    }
}
