use std::path::PathBuf;
use std::time::Duration;

pub type DeployResult<T> = Result<T, DeployError>;

/// Broad family an error belongs to. Decides how the error reaches
/// the caller: as a lookup failure, a rejected request, or a failed
/// deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Analysis,
    Build,
    Provider,
    NotFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command '{command}' failed: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command '{command}' timed out after {limit:?}")]
    CommandTimeout { command: String, limit: Duration },

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("build command '{command}' failed: {reason}")]
    BuildFailed { command: String, reason: String },

    #[error("build command '{command}' timed out after {limit:?}")]
    BuildTimeout { command: String, limit: Duration },

    #[error("build output directory not found: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("build output directory is empty: {}", .0.display())]
    OutputEmpty(PathBuf),

    #[error("unsupported provider: {name} (supported: {available})")]
    UnknownProvider { name: String, available: String },

    #[error("invalid {provider} credentials: {reason}")]
    InvalidCredentials { provider: String, reason: String },

    #[error("container name already taken: {0}")]
    NameCollision(String),

    #[error("{provider} deployment failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{provider} upload timed out after {limit:?}")]
    UploadTimeout { provider: String, limit: Duration },

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("deployment {id} is already {from}")]
    InvalidTransition { id: String, from: String },

    #[error("record store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Timeouts may succeed on a later attempt. Everything else needs
    /// a change of input (credentials, code, configuration) first.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. } | Self::BuildTimeout { .. } | Self::UploadTimeout { .. }
        )
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Analysis(_) => ErrorCategory::Analysis,
            Self::CommandNotFound(_)
            | Self::CommandFailed { .. }
            | Self::CommandTimeout { .. }
            | Self::BuildFailed { .. }
            | Self::BuildTimeout { .. }
            | Self::OutputMissing(_)
            | Self::OutputEmpty(_) => ErrorCategory::Build,
            Self::UnknownProvider { .. }
            | Self::InvalidCredentials { .. }
            | Self::NameCollision(_)
            | Self::Provider { .. }
            | Self::UploadTimeout { .. } => ErrorCategory::Provider,
            Self::ProjectNotFound(_) | Self::DeploymentNotFound(_) => ErrorCategory::NotFound,
            Self::InvalidTransition { .. }
            | Self::Store(_)
            | Self::Config(_)
            | Self::Other(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Message recorded on a failed deployment.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let kind = if self.is_transient() {
            "transient"
        } else {
            "permanent"
        };
        format!("{kind}: {self}")
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}
