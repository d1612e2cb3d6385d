//! Request and response shapes for an outer request layer.
//!
//! These carry no transport details. Credentials can be deserialized
//! in a request but never appear in a response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::Analysis;
use crate::credentials::Credentials;
use crate::model::{
    Deployment, DeploymentId, DeploymentStatus, DeploymentSummary, Failure, LogEntry, Project,
    ProjectId,
};

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_owned()
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub project_id: ProjectId,
    pub analysis: Analysis,
    /// The detected framework has a known build recipe.
    pub supported: bool,
    pub message: String,
}

impl From<&Project> for AnalyzeResponse {
    fn from(project: &Project) -> Self {
        let supported = project.analysis.supported();
        let message = if supported {
            "Repository analyzed successfully"
        } else {
            "Framework not supported for deployment"
        };
        Self {
            success: true,
            project_id: project.id.clone(),
            analysis: project.analysis.clone(),
            supported,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub project_id: ProjectId,
    pub provider: String,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub deployment_id: DeploymentId,
    pub status: DeploymentStatus,
    pub message: String,
}

impl DeployResponse {
    #[must_use]
    pub fn started(deployment_id: DeploymentId) -> Self {
        Self {
            success: true,
            deployment_id,
            status: DeploymentStatus::InProgress,
            message: "Deployment started".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub deployment_id: DeploymentId,
    pub status: DeploymentStatus,
    pub url: Option<String>,
    pub logs: Vec<LogEntry>,
    pub error: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Deployment> for StatusResponse {
    fn from(d: &Deployment) -> Self {
        Self {
            deployment_id: d.id.clone(),
            status: d.status,
            url: d.url().map(String::from),
            logs: d.logs.clone(),
            error: d.error.clone(),
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListRequest {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

const fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub deployments: Vec<DeploymentSummary>,
    /// Number of entries in this page.
    pub total: usize,
}

impl From<Vec<DeploymentSummary>> for ListResponse {
    fn from(deployments: Vec<DeploymentSummary>) -> Self {
        Self {
            total: deployments.len(),
            deployments,
        }
    }
}
