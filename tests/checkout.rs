use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rampa::analyze::Framework;
use rampa::checkout::{GitCheckout, LocalCheckout, RepositoryCheckout};
use rampa::error::DeployError;
use rampa::store::MemoryStore;
use rampa::{BuildExecutor, Coordinator, ProviderRegistry};

#[tokio::test]
async fn local_checkout_resolves_directories() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = LocalCheckout;

    let path = checkout
        .clone_repo(&dir.path().to_string_lossy(), "ignored")
        .await
        .unwrap();

    assert_eq!(path, dir.path().canonicalize().unwrap());
    checkout.cleanup(&path).await.unwrap();
    assert!(path.is_dir());
}

#[tokio::test]
async fn local_checkout_rejects_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("index.html");
    fs::write(&file, "<html></html>").unwrap();

    let err = LocalCheckout
        .clone_repo(&file.to_string_lossy(), "main")
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Analysis(_)));
}

#[tokio::test]
async fn git_checkout_refuses_option_like_input() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = GitCheckout::new(dir.path(), Duration::from_secs(5));

    let url = checkout.clone_repo("--upload-pack=touch /tmp/x", "main").await;
    let branch = checkout
        .clone_repo("https://example.com/site.git", "-b")
        .await;

    assert!(matches!(url, Err(DeployError::Analysis(_))));
    assert!(matches!(branch, Err(DeployError::Analysis(_))));
}

#[tokio::test]
async fn git_cleanup_stays_inside_its_root() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let checkout = GitCheckout::new(root.path(), Duration::from_secs(5));

    let err = checkout.cleanup(outside.path()).await.unwrap_err();

    assert!(matches!(err, DeployError::Other(_)));
    assert!(outside.path().is_dir());
    checkout
        .cleanup(&root.path().join("already-gone"))
        .await
        .unwrap();
}

#[tokio::test]
async fn coordinator_analyzes_through_checkout() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
    let coordinator = Coordinator::new(
        Arc::new(MemoryStore::new()),
        BuildExecutor::new(Duration::from_secs(30)),
        ProviderRegistry::with_defaults(),
    )
    .with_checkout(Arc::new(LocalCheckout));

    let project = coordinator
        .analyze(&dir.path().to_string_lossy(), "main")
        .await
        .unwrap();

    assert_eq!(project.analysis.framework, Framework::Static);
    assert_eq!(project.branch, "main");
    assert_eq!(coordinator.project(&project.id).await.unwrap(), project);
}

#[tokio::test]
async fn analyze_without_checkout_is_a_config_error() {
    let coordinator = Coordinator::new(
        Arc::new(MemoryStore::new()),
        BuildExecutor::new(Duration::from_secs(30)),
        ProviderRegistry::with_defaults(),
    );

    let err = coordinator
        .analyze("https://example.com/site.git", "main")
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Config(_)));
}
