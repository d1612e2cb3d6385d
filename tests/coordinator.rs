use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rampa::analyze::{Analysis, Framework};
use rampa::api::{DeployRequest, StatusResponse};
use rampa::credentials::{CredentialValidator, Credentials};
use rampa::error::{DeployError, DeployResult};
use rampa::model::{Deployment, DeploymentId, DeploymentStatus, Project, ProjectId};
use rampa::provider::backend::MemoryBackend;
use rampa::provider::{RemoteStatus, S3, StorageProvider, UploadResult};
use rampa::store::{MemoryStore, RecordStore};
use rampa::{BuildExecutor, Coordinator, ProviderRegistry};

struct Harness {
    coordinator: Coordinator,
    backend: MemoryBackend,
    store: Arc<MemoryStore>,
}

fn harness() -> Harness {
    let backend = MemoryBackend::new();
    let store = Arc::new(MemoryStore::new());
    let providers =
        ProviderRegistry::new().register(Arc::new(S3::with_backend(Arc::new(backend.clone()))));
    let coordinator = Coordinator::new(
        store.clone(),
        BuildExecutor::new(Duration::from_secs(30)),
        providers,
    );
    Harness {
        coordinator,
        backend,
        store,
    }
}

fn aws_credentials() -> Credentials {
    Credentials::new()
        .with("access_key_id", "AKIAEXAMPLE")
        .with("secret_access_key", "secret")
        .with("region", "eu-west-1")
}

fn request(project_id: &ProjectId) -> DeployRequest {
    DeployRequest {
        project_id: project_id.clone(),
        provider: "aws".into(),
        credentials: aws_credentials(),
        custom_domain: None,
    }
}

fn static_site(root: &Path) {
    fs::write(root.join("index.html"), "<html></html>").unwrap();
    fs::write(root.join("style.css"), "body {}").unwrap();
}

/// Store a project whose build runs `command` and writes into `out`.
async fn project_with_build(store: &MemoryStore, root: &Path, command: &str) -> ProjectId {
    let analysis = Analysis {
        framework: Framework::React,
        build_command: Some(command.to_string()),
        output_directory: "out".to_string(),
        is_static_site: true,
        ..Analysis::default()
    };
    let project = Project::new("https://example.com/app.git", "main", root.to_path_buf(), analysis);
    store.save_project(&project).await.unwrap();
    project.id
}

fn messages(deployment: &Deployment) -> Vec<&str> {
    deployment.logs.iter().map(|e| e.message.as_str()).collect()
}

#[tokio::test]
async fn static_site_deploys_end_to_end() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());

    let project = h
        .coordinator
        .analyze_path("https://example.com/site.git", "main", dir.path().to_path_buf())
        .await
        .unwrap();
    assert_eq!(project.analysis.framework, Framework::Static);

    let id = h.coordinator.deploy(request(&project.id)).await.unwrap();
    let deployment = h.coordinator.wait(&id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert!(deployment.completed_at.is_some());
    assert!(deployment.error.is_none());
    let result = deployment.result.as_ref().unwrap();
    assert_eq!(result.details.uploaded_files, 2);
    assert_eq!(result.details.framework, "static");
    assert!(h.backend.is_public(&result.details.container).await);

    let log = messages(&deployment);
    assert_eq!(log[0], "Starting deployment process");
    assert_eq!(log[1], "Building project...");
    assert!(log[2].starts_with("Build completed: ") && log[2].ends_with("(2 files)"));
    assert_eq!(log[3], "Deploying to aws...");
    assert_eq!(
        log[4],
        format!("Deployment completed successfully: {}", result.url)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn failed_build_is_recorded() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let project_id = project_with_build(&h.store, dir.path(), "false && mkdir out").await;

    let id = h.coordinator.deploy(request(&project_id)).await.unwrap();
    let deployment = h.coordinator.wait(&id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.result.is_none());
    let failure = deployment.error.as_ref().unwrap();
    assert!(!failure.transient);
    assert!(failure.message.contains("build command 'false' failed"));

    let last = deployment.logs.last().unwrap();
    assert!(last.message.starts_with("Deployment failed: permanent: "));
    assert!(last.message.contains("'false'"));
    assert!(!messages(&deployment).contains(&"Deploying to aws..."));
    assert!(h.backend.container_names().await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn built_project_uploads_output_directory() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let project_id = project_with_build(
        &h.store,
        dir.path(),
        "mkdir -p out/static && touch out/index.html out/static/app.js",
    )
    .await;

    let id = h.coordinator.deploy(request(&project_id)).await.unwrap();
    let deployment = h.coordinator.wait(&id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Completed);
    let details = &deployment.result.unwrap().details;
    assert_eq!(details.files, vec!["index.html", "static/app.js"]);
}

#[tokio::test]
async fn unknown_deployment_is_not_found() {
    let h = harness();

    let err = h
        .coordinator
        .status(&DeploymentId::from("does-not-exist"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::DeploymentNotFound(ref id) if id == "does-not-exist"));
}

#[tokio::test]
async fn status_reads_are_idempotent() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = h
        .coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();
    let id = h.coordinator.deploy(request(&project.id)).await.unwrap();
    h.coordinator.wait(&id).await.unwrap();

    let first = h.coordinator.status(&id).await.unwrap();
    let second = h.coordinator.status(&id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(StatusResponse::from(&first), StatusResponse::from(&second));
}

#[tokio::test]
async fn unknown_provider_is_rejected_before_recording() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = h
        .coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();

    let mut req = request(&project.id);
    req.provider = "gcs".into();
    let err = h.coordinator.deploy(req).await.unwrap_err();

    assert!(matches!(err, DeployError::UnknownProvider { .. }));
    assert!(h.coordinator.list(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn incomplete_credentials_are_rejected() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = h
        .coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();

    let mut req = request(&project.id);
    req.credentials = Credentials::new().with("access_key_id", "AKIA");
    let err = h.coordinator.deploy(req).await.unwrap_err();

    assert!(matches!(err, DeployError::InvalidCredentials { ref provider, .. } if provider == "aws"));
    assert!(h.store.deployments().await.unwrap().is_empty());
}

struct DenyAll;

impl CredentialValidator for DenyAll {
    fn is_valid(&self, _provider: &str, _credentials: &Credentials) -> bool {
        false
    }
}

#[tokio::test]
async fn custom_validator_runs_first() {
    let h = harness();
    let coordinator = h.coordinator.with_validator(Arc::new(DenyAll));
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();

    let err = coordinator.deploy(request(&project.id)).await.unwrap_err();

    assert!(matches!(err, DeployError::InvalidCredentials { .. }));
}

#[tokio::test]
async fn unknown_project_is_rejected() {
    let h = harness();

    let err = h
        .coordinator
        .deploy(request(&ProjectId::from("nope")))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ProjectNotFound(_)));
}

#[tokio::test]
async fn list_is_recent_first_and_paged() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = h
        .coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = h.coordinator.deploy(request(&project.id)).await.unwrap();
        h.coordinator.wait(&id).await.unwrap();
        ids.push(id);
    }

    let first_page = h.coordinator.list(0, 2).await.unwrap();
    let second_page = h.coordinator.list(2, 2).await.unwrap();

    assert_eq!(first_page.len(), 2);
    assert_eq!(second_page.len(), 1);
    assert_eq!(first_page[0].id, ids[2]);
    assert_eq!(second_page[0].id, ids[0]);
    assert!(first_page.iter().all(|d| d.url.is_some()));
    assert!(h.coordinator.list(5, 2).await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn deployments_queue_beyond_the_limit() {
    let h = harness();
    let coordinator = h.coordinator.max_concurrent(1);
    let dir = tempfile::tempdir().unwrap();
    let slow = project_with_build(
        &h.store,
        dir.path(),
        "sleep 1 && mkdir -p out && touch out/index.html",
    )
    .await;

    let first = coordinator.deploy(request(&slow)).await.unwrap();
    wait_for_log(&coordinator, &first, "Building project...").await;
    let second = coordinator.deploy(request(&slow)).await.unwrap();

    let first = coordinator.wait(&first).await.unwrap();
    let second = coordinator.wait(&second).await.unwrap();

    assert_eq!(first.status, DeploymentStatus::Completed);
    assert_eq!(second.status, DeploymentStatus::Completed);
    assert!(!messages(&first).iter().any(|m| m.starts_with("Queued")));
    assert_eq!(
        messages(&second)[0],
        "Queued: waiting for a free deployment slot"
    );
    assert!(second.completed_at >= first.completed_at);
}

async fn wait_for_log(coordinator: &Coordinator, id: &DeploymentId, message: &str) {
    for _ in 0..200 {
        let deployment = coordinator.status(id).await.unwrap();
        if messages(&deployment).contains(&message) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("log entry '{message}' never appeared");
}

/// Accepts any credentials and never finishes an upload.
struct StalledProvider;

#[async_trait]
impl StorageProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    fn validate_credentials(&self, _credentials: &Credentials) -> bool {
        true
    }

    async fn upload(
        &self,
        _deployment_id: &DeploymentId,
        _build_dir: &Path,
        _analysis: &Analysis,
        _credentials: &Credentials,
        _custom_domain: Option<&str>,
    ) -> DeployResult<UploadResult> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(DeployError::Other("unreachable".into()))
    }

    async fn status(&self, _deployment_id: &DeploymentId, _credentials: &Credentials) -> RemoteStatus {
        RemoteStatus::NotFound
    }

    async fn delete(&self, _deployment_id: &DeploymentId, _credentials: &Credentials) -> bool {
        false
    }
}

#[tokio::test]
async fn upload_timeout_fails_transiently() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(
        store,
        BuildExecutor::new(Duration::from_secs(30)),
        ProviderRegistry::new().register(Arc::new(StalledProvider)),
    )
    .upload_timeout(Duration::from_millis(100));
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();

    let mut req = request(&project.id);
    req.provider = "stalled".into();
    let id = coordinator.deploy(req).await.unwrap();
    let deployment = coordinator.wait(&id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    let failure = deployment.error.unwrap();
    assert!(failure.transient);
    assert!(failure.message.contains("upload timed out"));
}

#[tokio::test]
async fn remote_status_and_teardown() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    static_site(dir.path());
    let project = h
        .coordinator
        .analyze_path("site", "main", dir.path().to_path_buf())
        .await
        .unwrap();
    let id = h.coordinator.deploy(request(&project.id)).await.unwrap();
    h.coordinator.wait(&id).await.unwrap();
    let creds = aws_credentials();

    let status = h.coordinator.remote_status(&id, &creds).await.unwrap();
    assert!(matches!(status, RemoteStatus::Active { .. }));

    assert!(h.coordinator.teardown(&id, &creds).await.unwrap());
    assert_eq!(
        h.coordinator.remote_status(&id, &creds).await.unwrap(),
        RemoteStatus::NotFound
    );
    // The record outlives its container.
    assert_eq!(
        h.coordinator.status(&id).await.unwrap().status,
        DeploymentStatus::Completed
    );
}

#[tokio::test]
async fn prune_removes_only_old_finished_records() {
    let h = harness();
    let project = ProjectId::from("p");

    let mut old = Deployment::new(project.clone(), "aws", None);
    old.fail(&DeployError::Other("boom".into())).unwrap();
    old.completed_at = old.completed_at.map(|t| t - chrono::Duration::days(40));
    let mut recent = Deployment::new(project.clone(), "aws", None);
    recent.fail(&DeployError::Other("boom".into())).unwrap();
    let running = Deployment::new(project, "aws", None);
    for d in [&old, &recent, &running] {
        h.store.save_deployment(d).await.unwrap();
    }

    let removed = h.coordinator.prune(chrono::Duration::days(30)).await.unwrap();

    assert_eq!(removed, 1);
    assert!(h.store.load_deployment(&old.id).await.unwrap().is_none());
    assert!(h.store.load_deployment(&recent.id).await.unwrap().is_some());
    assert!(h.store.load_deployment(&running.id).await.unwrap().is_some());
}

#[tokio::test]
async fn analysis_of_missing_path_is_stored_as_unsupported() {
    let h = harness();

    let project = h
        .coordinator
        .analyze_path("gone", "main", PathBuf::from("/nonexistent/rampa/checkout"))
        .await
        .unwrap();

    assert!(project.analysis.error.is_some());
    assert!(!project.analysis.supported());
    assert_eq!(h.coordinator.project(&project.id).await.unwrap(), project);
}

/// A stand-in `az` that rejects the login and echoes its arguments.
#[cfg(unix)]
fn rejecting_az(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("az");
    fs::write(
        &path,
        "#!/bin/sh\necho \"AADSTS7000215: Invalid client secret ($*)\" >&2\nexit 1\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn rejected_azure_login_never_stores_the_secret() {
    use rampa::provider::AzureBlob;
    use rampa::provider::backend::{AzureCliBackend, StorageBackend};

    const SECRET: &str = "TOPSECRET-42";
    let bin = tempfile::tempdir().unwrap();
    let az = rejecting_az(bin.path()).to_string_lossy().into_owned();
    let connector = Arc::new(
        move |credentials: &Credentials| -> DeployResult<Arc<dyn StorageBackend>> {
            let backend = AzureCliBackend::from_credentials(credentials)?.with_program(az.clone());
            Ok(Arc::new(backend))
        },
    );
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(
        store.clone(),
        BuildExecutor::new(Duration::from_secs(30)),
        ProviderRegistry::new().register(Arc::new(AzureBlob::with_connector(connector))),
    );
    let site = tempfile::tempdir().unwrap();
    static_site(site.path());
    let project = coordinator
        .analyze_path("https://example.com/site.git", "main", site.path().to_path_buf())
        .await
        .unwrap();

    let id = coordinator
        .deploy(DeployRequest {
            project_id: project.id.clone(),
            provider: "azure".into(),
            credentials: Credentials::new()
                .with("tenant_id", "t")
                .with("client_id", "c")
                .with("client_secret", SECRET)
                .with("subscription_id", "sub")
                .with("storage_account", "acct"),
            custom_domain: None,
        })
        .await
        .unwrap();
    let deployment = coordinator.wait(&id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    let failure = deployment.error.as_ref().unwrap();
    assert!(failure.message.contains("AADSTS7000215"), "{}", failure.message);
    let stored = store.load_deployment(&id).await.unwrap().unwrap();
    let serialized = serde_json::to_string(&stored).unwrap();
    assert!(!serialized.contains(SECRET), "{serialized}");
}
