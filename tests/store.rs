use std::path::PathBuf;

use chrono::{Duration, Utc};
use rampa::analyze::Analysis;
use rampa::error::DeployError;
use rampa::model::{Deployment, DeploymentId, Project, ProjectId};
use rampa::store::{self, FileStore, MemoryStore, RecordStore};

fn project() -> Project {
    Project::new(
        "https://example.com/site.git",
        "main",
        PathBuf::from("/tmp/site"),
        Analysis::default(),
    )
}

async fn round_trip(store: &dyn RecordStore) {
    let project = project();
    store.save_project(&project).await.unwrap();
    assert_eq!(store.load_project(&project.id).await.unwrap(), Some(project.clone()));
    assert_eq!(store.load_project(&ProjectId::from("missing")).await.unwrap(), None);

    let mut deployment = Deployment::new(project.id.clone(), "aws", None);
    store.save_deployment(&deployment).await.unwrap();
    deployment.log("Starting deployment process");
    deployment
        .fail(&DeployError::Other("boom".into()))
        .unwrap();
    store.save_deployment(&deployment).await.unwrap();

    let loaded = store.load_deployment(&deployment.id).await.unwrap().unwrap();
    assert_eq!(loaded, deployment);
    assert_eq!(store.deployments().await.unwrap().len(), 1);

    assert!(store.delete_deployment(&deployment.id).await.unwrap());
    assert!(!store.delete_deployment(&deployment.id).await.unwrap());
    assert_eq!(store.load_deployment(&deployment.id).await.unwrap(), None);
}

#[tokio::test]
async fn memory_store_round_trip() {
    round_trip(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("data")).await.unwrap();

    round_trip(&store).await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let deployment = Deployment::new(ProjectId::generate(), "azure", Some("www.example.com".into()));

    FileStore::open(dir.path())
        .await
        .unwrap()
        .save_deployment(&deployment)
        .await
        .unwrap();
    let reopened = FileStore::open(dir.path()).await.unwrap();

    assert_eq!(
        reopened.load_deployment(&deployment.id).await.unwrap(),
        Some(deployment)
    );
}

#[tokio::test]
async fn file_store_skips_corrupt_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();
    let deployment = Deployment::new(ProjectId::generate(), "aws", None);
    store.save_deployment(&deployment).await.unwrap();
    std::fs::write(dir.path().join("deployments/broken.json"), "{").unwrap();

    let all = store.deployments().await.unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, deployment.id);
}

#[tokio::test]
async fn file_store_refuses_path_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();

    let lookup = store
        .load_deployment(&DeploymentId::from("../../etc/passwd"))
        .await
        .unwrap();

    assert!(lookup.is_none());
}

#[test]
fn recent_first_ordering() {
    let now = Utc::now();
    let mut older = Deployment::new(ProjectId::from("p"), "aws", None);
    older.updated_at = now - Duration::minutes(5);
    let mut newer = Deployment::new(ProjectId::from("p"), "aws", None);
    newer.updated_at = now;
    let mut a = Deployment::new(ProjectId::from("p"), "aws", None);
    let mut b = Deployment::new(ProjectId::from("p"), "aws", None);
    a.updated_at = now - Duration::minutes(1);
    b.updated_at = now - Duration::minutes(1);

    let mut all = vec![older.clone(), a.clone(), newer.clone(), b.clone()];
    store::sort_recent_first(&mut all);

    let (first_tie, second_tie) = if a.id < b.id { (&a, &b) } else { (&b, &a) };
    let ids: Vec<_> = all.iter().map(|d| d.id.clone()).collect();
    assert_eq!(
        ids,
        vec![
            newer.id,
            first_tie.id.clone(),
            second_tie.id.clone(),
            older.id
        ]
    );
}
