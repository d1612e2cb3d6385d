//! Build execution against real processes. Unix only: the build
//! commands are coreutils.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use rampa::analyze::{Analysis, Framework, Language, PackageManager};
use rampa::build::{ArtifactSummary, BuildExecutor, install_command};
use rampa::error::DeployError;

fn analysis(command: &str, output: &str) -> Analysis {
    Analysis {
        framework: Framework::React,
        build_command: Some(command.to_string()),
        output_directory: output.to_string(),
        is_static_site: true,
        ..Analysis::default()
    }
}

fn executor() -> BuildExecutor {
    BuildExecutor::new(Duration::from_secs(30))
}

#[tokio::test]
async fn chain_runs_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("mkdir -p out/css && touch out/index.html out/css/site.css", "out");

    let output = executor().build(dir.path(), &spec).await.unwrap();

    assert_eq!(output, dir.path().join("out"));
    assert!(output.join("index.html").is_file());
    assert!(output.join("css/site.css").is_file());
}

#[tokio::test]
async fn first_failing_step_is_named() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("false && touch never", "out");

    let err = executor().build(dir.path(), &spec).await.unwrap_err();

    match err {
        DeployError::BuildFailed { command, .. } => assert_eq!(command, "false"),
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    assert!(!dir.path().join("never").exists());
}

#[tokio::test]
async fn missing_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("true", "dist");

    let err = executor().build(dir.path(), &spec).await.unwrap_err();

    assert!(matches!(err, DeployError::OutputMissing(path) if path == dir.path().join("dist")));
}

#[tokio::test]
async fn empty_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("mkdir -p dist", "dist");

    let err = executor().build(dir.path(), &spec).await.unwrap_err();

    assert!(matches!(err, DeployError::OutputEmpty(_)));
}

#[tokio::test]
async fn slow_build_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("sleep 10", "out");

    let err = BuildExecutor::new(Duration::from_millis(200))
        .build(dir.path(), &spec)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::BuildTimeout { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn missing_program_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let spec = analysis("rampa-no-such-builder --prod", "out");

    let err = executor().build(dir.path(), &spec).await.unwrap_err();

    assert!(matches!(err, DeployError::BuildFailed { .. }));
    assert!(err.to_string().contains("command not found"));
}

#[tokio::test]
async fn static_site_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
    let spec = Analysis {
        framework: Framework::Static,
        output_directory: ".".to_string(),
        ..Analysis::default()
    };

    let output = executor().build(dir.path(), &spec).await.unwrap();

    assert_eq!(output, dir.path());
}

#[test]
fn install_prefers_lockfiles() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("package.json"), "{}").unwrap();

    let npm = Analysis {
        language: Language::Javascript,
        package_manager: PackageManager::Npm,
        ..Analysis::default()
    };
    assert_eq!(install_command(root, &npm).unwrap().display(), "npm install");

    fs::write(root.join("package-lock.json"), "{}").unwrap();
    assert_eq!(install_command(root, &npm).unwrap().display(), "npm ci");

    fs::write(root.join("yarn.lock"), "").unwrap();
    let yarn = Analysis {
        package_manager: PackageManager::Yarn,
        ..npm
    };
    assert_eq!(
        install_command(root, &yarn).unwrap().display(),
        "yarn install --frozen-lockfile"
    );
}

#[test]
fn no_install_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let spec = Analysis {
        language: Language::Javascript,
        ..Analysis::default()
    };

    assert!(install_command(dir.path(), &spec).is_none());
    assert!(install_command(Path::new("/"), &Analysis::default()).is_none());
}

#[test]
fn artifact_summary_counts_assets() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("static/js")).unwrap();
    fs::write(root.join("index.html"), "<html></html>").unwrap();
    fs::write(root.join("static/js/main.js"), "1").unwrap();
    fs::write(root.join("robots.txt"), "").unwrap();

    let summary = ArtifactSummary::collect(root);

    assert_eq!(summary.total_files, 3);
    assert!(summary.has_index_html);
    assert_eq!(summary.static_assets, vec!["static/js/main.js"]);
    assert_eq!(summary.file_types.get(".txt"), Some(&1));
}
