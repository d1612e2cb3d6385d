//! Dependency install and build command execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::analyze::{
    Analysis, Language, PACKAGE_JSON, PACKAGE_LOCK, PackageManager, REQUIREMENTS_TXT, YARN_LOCK,
};
use crate::cmd::Cmd;
use crate::error::{DeployError, DeployResult};

/// Separator between steps of a build command chain.
pub const STEP_SEPARATOR: &str = "&&";

const ASSET_EXTENSIONS: &[&str] = &["css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];

/// Runs the install and build steps for an analyzed checkout.
///
/// The install gets its own budget. Every step of the build chain
/// draws from one shared deadline.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    timeout: Duration,
    install_timeout: Duration,
}

impl BuildExecutor {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            install_timeout: timeout,
        }
    }

    #[must_use]
    pub const fn with_install_timeout(mut self, limit: Duration) -> Self {
        self.install_timeout = limit;
        self
    }

    /// Build the checkout and return the directory holding the output.
    ///
    /// Without a build command the checkout itself is returned and
    /// nothing runs. Partial output is left in place on failure.
    #[instrument(skip(self, analysis), fields(path = %checkout.display()))]
    pub async fn build(&self, checkout: &Path, analysis: &Analysis) -> DeployResult<PathBuf> {
        let Some(chain) = analysis.build_command.as_deref() else {
            debug!("no build command, using checkout as output");
            return Ok(checkout.to_path_buf());
        };

        if let Some(install) = install_command(checkout, analysis) {
            let install = install.current_dir(checkout).timeout(self.install_timeout);
            info!(command = %install.display(), "installing dependencies");
            run_step(&install, self.install_timeout).await?;
        }

        self.run_chain(checkout, chain).await?;

        let output = checkout.join(&analysis.output_directory);
        verify_output(&output).await?;
        info!(output = %output.display(), "build finished");
        Ok(output)
    }

    async fn run_chain(&self, checkout: &Path, chain: &str) -> DeployResult<()> {
        let deadline = Instant::now() + self.timeout;

        for step in chain.split(STEP_SEPARATOR) {
            let Some(cmd) = Cmd::parse(step) else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeployError::BuildTimeout {
                    command: cmd.display(),
                    limit: self.timeout,
                });
            }

            let cmd = cmd.current_dir(checkout).timeout(remaining);
            info!(command = %cmd.display(), "running build step");
            run_step(&cmd, self.timeout).await?;
        }
        Ok(())
    }
}

/// The install invocation for a checkout, if it needs one.
#[must_use]
pub fn install_command(checkout: &Path, analysis: &Analysis) -> Option<Cmd> {
    match analysis.language {
        Language::Javascript => {
            if !checkout.join(PACKAGE_JSON).is_file() {
                return None;
            }
            let cmd = match analysis.package_manager {
                PackageManager::Yarn if checkout.join(YARN_LOCK).is_file() => {
                    Cmd::new("yarn").args(["install", "--frozen-lockfile"])
                }
                PackageManager::Yarn => Cmd::new("yarn").arg("install"),
                PackageManager::Npm | PackageManager::None
                    if checkout.join(PACKAGE_LOCK).is_file() =>
                {
                    Cmd::new("npm").arg("ci")
                }
                PackageManager::Npm | PackageManager::None => Cmd::new("npm").arg("install"),
            };
            Some(cmd)
        }
        Language::Python => checkout
            .join(REQUIREMENTS_TXT)
            .is_file()
            .then(|| Cmd::new("pip").args(["install", "-r", REQUIREMENTS_TXT])),
        Language::Html | Language::Unknown => None,
    }
}

async fn run_step(cmd: &Cmd, limit: Duration) -> DeployResult<()> {
    cmd.output()
        .await
        .map(drop)
        .map_err(|e| into_build_error(e, &cmd.display(), limit))
}

fn into_build_error(err: DeployError, command: &str, limit: Duration) -> DeployError {
    let command = command.to_string();
    match err {
        DeployError::CommandTimeout { .. } => DeployError::BuildTimeout { command, limit },
        DeployError::CommandFailed { stderr, .. } => DeployError::BuildFailed {
            command,
            reason: stderr,
        },
        DeployError::CommandNotFound(program) => DeployError::BuildFailed {
            command,
            reason: format!("command not found: {program}"),
        },
        other => DeployError::BuildFailed {
            command,
            reason: other.to_string(),
        },
    }
}

async fn verify_output(output: &Path) -> DeployResult<()> {
    if !tokio::fs::metadata(output).await.is_ok_and(|m| m.is_dir()) {
        return Err(DeployError::OutputMissing(output.to_path_buf()));
    }
    let mut entries = tokio::fs::read_dir(output).await?;
    if entries.next_entry().await?.is_none() {
        return Err(DeployError::OutputEmpty(output.to_path_buf()));
    }
    Ok(())
}

/// What a build produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub total_files: u64,
    pub total_bytes: u64,
    pub file_types: BTreeMap<String, u64>,
    pub has_index_html: bool,
    /// Stylesheets, scripts, and images, relative to the output root.
    pub static_assets: Vec<String>,
}

impl ArtifactSummary {
    /// Walk a build output directory. Unreadable entries are skipped.
    #[must_use]
    pub fn collect(output: &Path) -> Self {
        let mut summary = Self::default();

        for entry in WalkDir::new(output).sort_by_file_name().into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(output) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            let ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            summary.total_files += 1;
            summary.total_bytes += entry.metadata().map_or(0, |m| m.len());
            *summary
                .file_types
                .entry(if ext.is_empty() {
                    String::new()
                } else {
                    format!(".{ext}")
                })
                .or_default() += 1;

            if relative == "index.html" {
                summary.has_index_html = true;
            }
            if ASSET_EXTENSIONS.contains(&ext.as_str()) {
                summary.static_assets.push(relative);
            }
        }
        summary
    }
}
