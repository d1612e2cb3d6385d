//! Getting a repository onto local disk before analysis.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::cmd::Cmd;
use crate::error::{DeployError, DeployResult};

#[async_trait]
pub trait RepositoryCheckout: Send + Sync {
    /// Fetch `branch` of `url` and return the local directory.
    async fn clone_repo(&self, url: &str, branch: &str) -> DeployResult<PathBuf>;

    /// Release a directory returned by [`Self::clone_repo`].
    async fn cleanup(&self, path: &Path) -> DeployResult<()>;
}

/// Shallow `git clone` into a fresh directory per request.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    root: PathBuf,
    timeout: Duration,
}

impl GitCheckout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RepositoryCheckout for GitCheckout {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn clone_repo(&self, url: &str, branch: &str) -> DeployResult<PathBuf> {
        if url.starts_with('-') || branch.starts_with('-') {
            return Err(DeployError::Analysis(format!(
                "refusing repository '{url}' at branch '{branch}'"
            )));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let dest = self.root.join(uuid::Uuid::new_v4().simple().to_string());

        let result = Cmd::new("git")
            .args(["clone", "--depth", "1", "--branch", branch, "--", url])
            .arg(dest.to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout)
            .output()
            .await;

        match result {
            Ok(_) => {
                info!(path = %dest.display(), "repository cloned");
                Ok(dest)
            }
            Err(e) => {
                tokio::fs::remove_dir_all(&dest).await.ok();
                Err(match e {
                    DeployError::CommandFailed { stderr, .. } => {
                        DeployError::Analysis(format!("clone of {url} failed: {stderr}"))
                    }
                    other => other,
                })
            }
        }
    }

    async fn cleanup(&self, path: &Path) -> DeployResult<()> {
        if !path.starts_with(&self.root) {
            return Err(DeployError::Other(format!(
                "{} is outside the checkout directory",
                path.display()
            )));
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkout cleanup failed");
                Err(e.into())
            }
        }
    }
}

/// Uses a directory that is already on disk. The "url" is its path and
/// the branch is ignored. Cleanup leaves the directory alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCheckout;

#[async_trait]
impl RepositoryCheckout for LocalCheckout {
    async fn clone_repo(&self, url: &str, _branch: &str) -> DeployResult<PathBuf> {
        let path = tokio::fs::canonicalize(url)
            .await
            .map_err(|e| DeployError::Analysis(format!("{url}: {e}")))?;
        if !path.is_dir() {
            return Err(DeployError::Analysis(format!("not a directory: {url}")));
        }
        Ok(path)
    }

    async fn cleanup(&self, _path: &Path) -> DeployResult<()> {
        Ok(())
    }
}
