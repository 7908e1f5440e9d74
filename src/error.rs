use crate::core::{RegionError, ResolveError};
use crate::services::{AuthError, GcpError, RunnerError, SourceError, TorchServeError};
use thiserror::Error;

/// Top-level error for every command
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Command(#[from] RunnerError),

    #[error(transparent)]
    Gcp(#[from] GcpError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    TorchServe(#[from] TorchServeError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to render output: {0}")]
    Render(String),

    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for DeployError {
    fn from(e: serde_json::Error) -> Self {
        DeployError::Render(e.to_string())
    }
}

impl From<toml::ser::Error> for DeployError {
    fn from(e: toml::ser::Error) -> Self {
        DeployError::Render(e.to_string())
    }
}
