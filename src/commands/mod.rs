// Command exports
pub mod build;
pub mod ci;
pub mod deploy;
pub mod export;
pub mod plan;
pub mod resolve;
pub mod status;

use crate::config::Settings;
use crate::error::DeployError;
use crate::services::{
    CloudFunctionsClient, CloudRunClient, CommandRunner, DockerClient, GcpClient, TokenProvider, TorchServeClient,
};
use std::sync::Arc;

/// Shared state handed to every command
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub runner: Arc<dyn CommandRunner>,
    pub http: reqwest::Client,
    pub tokens: Arc<TokenProvider>,
    pub gcp: Arc<GcpClient>,
}

impl AppContext {
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>) -> Result<Self, DeployError> {
        let http = GcpClient::http_client(&settings)?;
        let tokens = Arc::new(TokenProvider::from_settings(&settings.gcp, http.clone(), runner.clone())?);
        let gcp = Arc::new(GcpClient::from_settings(&settings, http.clone(), tokens.clone()));

        Ok(Self {
            settings,
            runner,
            http,
            tokens,
            gcp,
        })
    }

    pub fn cloud_run(&self) -> CloudRunClient {
        CloudRunClient::from_settings(self.gcp.clone(), &self.settings.gcp)
    }

    pub fn functions(&self) -> CloudFunctionsClient {
        CloudFunctionsClient::from_settings(self.gcp.clone(), &self.settings.gcp)
    }

    pub fn docker(&self) -> DockerClient {
        DockerClient::new(self.runner.clone())
    }

    pub fn torchserve(&self) -> TorchServeClient {
        TorchServeClient::new(self.http.clone())
    }
}
