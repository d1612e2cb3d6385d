//! Persisted records: projects, deployments, and their log trail.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::Analysis;
use crate::error::{DeployError, DeployResult};
use crate::provider::ContainerMetadata;

/// Opaque project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque deployment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in remote container names.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A repository that has been checked out and analyzed.
///
/// Re-analysis creates a new project; records are never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub repo_url: String,
    pub branch: String,
    pub repo_path: PathBuf,
    pub analysis: Analysis,
    pub created_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn new(repo_url: &str, branch: &str, repo_path: PathBuf, analysis: Analysis) -> Self {
        Self {
            id: ProjectId::generate(),
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            repo_path,
            analysis,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Completed,
    Failed,
}

impl DeploymentStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Why a deployment failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    /// A timeout rather than a bad input; retrying may help.
    pub transient: bool,
}

impl From<&DeployError> for Failure {
    fn from(err: &DeployError) -> Self {
        Self {
            message: err.failure_message(),
            transient: err.is_transient(),
        }
    }
}

/// Result attached to a completed deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub url: String,
    pub details: ContainerMetadata,
}

/// One run of the build and upload pipeline against a provider.
///
/// State only moves forward: `in_progress` to `completed` or
/// `failed`. Log entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    pub provider: String,
    pub custom_domain: Option<String>,
    pub status: DeploymentStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<DeploymentResult>,
    pub error: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    #[must_use]
    pub fn new(project_id: ProjectId, provider: &str, custom_domain: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            project_id,
            provider: provider.to_string(),
            custom_domain,
            status: DeploymentStatus::InProgress,
            logs: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Append a timestamped log entry.
    pub fn log(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.logs.push(LogEntry {
            timestamp: now,
            message: message.into(),
        });
        self.updated_at = now;
    }

    pub fn complete(&mut self, result: DeploymentResult) -> DeployResult<()> {
        self.ensure_in_progress()?;
        let now = Utc::now();
        self.status = DeploymentStatus::Completed;
        self.result = Some(result);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, err: &DeployError) -> DeployResult<()> {
        self.ensure_in_progress()?;
        let now = Utc::now();
        self.status = DeploymentStatus::Failed;
        self.error = Some(Failure::from(err));
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.url.as_str())
    }

    #[must_use]
    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            id: self.id.clone(),
            status: self.status,
            provider: self.provider.clone(),
            url: self.url().map(String::from),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    fn ensure_in_progress(&self) -> DeployResult<()> {
        if self.status.is_terminal() {
            return Err(DeployError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status.to_string(),
            });
        }
        Ok(())
    }
}

/// Listing projection of a deployment; carries no logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
    pub provider: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
