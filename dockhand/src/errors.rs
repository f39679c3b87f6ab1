//! Error types for dockhand

use thiserror::Error;

/// Main error type for the deployment orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deployment queue is full")]
    QueueFull,

    #[error("Incomplete configuration: {0}")]
    ConfigIncomplete(String),

    #[error("Path escapes its allowed root: {0}")]
    PathEscape(String),

    #[error("Failed to decrypt secrets: {0}")]
    SecretDecrypt(String),

    #[error("Secret entry '{0}' has no value")]
    SecretMissingValue(String),

    #[error("Secret entry '{0}' cannot be downgraded to a plain value")]
    SecretDowngrade(String),

    #[error("Command failed with exit code {code}: {safe_cmd}")]
    CommandFailed {
        code: i32,
        safe_cmd: String,
        stdout: String,
        stderr: String,
    },

    #[error("No previous release to roll back to")]
    NoPrevious,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
