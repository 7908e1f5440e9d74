use crate::config::GcpSettings;
use crate::services::runner::{CommandRunner, CommandSpec, RunnerError};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_CACHE_KEY: &str = "access_token";

/// Access tokens live for an hour; refresh well before that
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Errors that can occur while obtaining an OAuth access token
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to read credentials {path}: {source}")]
    ReadCredentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("JWT signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("gcloud could not provide a token: {0}")]
    Gcloud(#[from] RunnerError),
}

/// Service account key file as downloaded from the console
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::ReadCredentials {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| AuthError::InvalidKey(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Where access tokens come from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Static(String),
    ServiceAccount(ServiceAccountKey),
    /// `gcloud auth print-access-token`
    Gcloud,
}

/// Supplies bearer tokens for Google Cloud API calls, caching them between calls
pub struct TokenProvider {
    source: CredentialSource,
    http: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
    cache: Cache<&'static str, String>,
}

impl TokenProvider {
    pub fn new(source: CredentialSource, http: reqwest::Client, runner: Arc<dyn CommandRunner>) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(TOKEN_TTL)
            .build();

        Self {
            source,
            http,
            runner,
            cache,
        }
    }

    /// Pick the credential source: explicit token, then key file, then gcloud
    pub fn from_settings(
        settings: &GcpSettings,
        http: reqwest::Client,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, AuthError> {
        let source = if let Some(token) = settings.access_token.clone().filter(|t| !t.is_empty()) {
            CredentialSource::Static(token)
        } else if let Some(path) = &settings.credentials_file {
            CredentialSource::ServiceAccount(ServiceAccountKey::from_file(path)?)
        } else {
            CredentialSource::Gcloud
        };

        tracing::debug!("Using {} credentials", source.kind());
        Ok(Self::new(source, http, runner))
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    pub async fn access_token(&self) -> Result<String, AuthError> {
        if let CredentialSource::Static(token) = &self.source {
            return Ok(token.clone());
        }

        if let Some(token) = self.cache.get(TOKEN_CACHE_KEY).await {
            return Ok(token);
        }

        let token = match &self.source {
            CredentialSource::ServiceAccount(key) => self.exchange_jwt(key).await?,
            _ => self.gcloud_token().await?,
        };

        self.cache.insert(TOKEN_CACHE_KEY, token.clone()).await;
        Ok(token)
    }

    async fn exchange_jwt(&self, key: &ServiceAccountKey) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let assertion = jsonwebtoken::encode(&header, &claims, &signing_key)?;

        tracing::debug!("Exchanging JWT for {} at {}", key.client_email, key.token_uri);

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(AuthError::TokenEndpoint { status, body });
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn gcloud_token(&self) -> Result<String, AuthError> {
        let spec = CommandSpec::new("gcloud").args(["auth", "print-access-token"]);
        let output = self.runner.run_checked(&spec).await?;
        let token = output.stdout.trim().to_string();

        if token.is_empty() {
            return Err(AuthError::Gcloud(RunnerError::Failed {
                command: spec.to_string(),
                code: "0".to_string(),
                stderr: "empty token".to_string(),
            }));
        }

        Ok(token)
    }
}

impl CredentialSource {
    fn kind(&self) -> &'static str {
        match self {
            CredentialSource::Static(_) => "static token",
            CredentialSource::ServiceAccount(_) => "service account",
            CredentialSource::Gcloud => "gcloud",
        }
    }
}
