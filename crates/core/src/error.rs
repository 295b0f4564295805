use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("Missing {artifact}. {hint}")]
    DependencyMissing { artifact: String, hint: String },

    #[error("{tool} failed: {message}")]
    ExternalCall { tool: String, message: String },

    #[error("Inputs cannot be stream-copied together: {reason}")]
    IncompatibleInputs { reason: String },

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },

    #[error("Config error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn invalid_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency_missing(artifact: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::DependencyMissing {
            artifact: artifact.into(),
            hint: hint.into(),
        }
    }

    pub fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalCall {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Network failures, HTTP 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::ApiError(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .map(|s| s.is_server_error() || s.as_u16() == 429)
                    .unwrap_or(false)
            }
            PipelineError::ExternalCall { message, .. } => {
                message.starts_with("HTTP 5") || message.starts_with("HTTP 429")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
