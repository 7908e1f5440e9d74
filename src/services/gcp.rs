use crate::config::Settings;
use crate::models::requests::{IamPolicy, SetIamPolicyRequest};
use crate::models::Operation;
use crate::services::auth::{AuthError, TokenProvider};
use crate::services::retry::{RetryPolicy, Retryable};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Member granted the invoker role for public endpoints
pub const ALL_USERS: &str = "allUsers";

/// Errors that can occur when calling Google Cloud REST APIs
#[derive(Debug, Error)]
pub enum GcpError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API returned {status} for {url}: {body}")]
    Api { status: u16, url: String, body: String },

    #[error("Operation {operation} failed ({code}): {message}")]
    OperationFailed {
        operation: String,
        code: i32,
        message: String,
    },

    #[error("Operation {operation} did not finish within {waited_secs}s")]
    OperationTimeout { operation: String, waited_secs: u64 },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl Retryable for GcpError {
    fn is_retryable(&self) -> bool {
        match self {
            GcpError::Api { status, .. } => *status == 429 || *status >= 500,
            GcpError::RequestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Authenticated JSON client shared by the Cloud Run and Cloud Functions clients
pub struct GcpClient {
    http: Client,
    tokens: Arc<TokenProvider>,
    retry: RetryPolicy,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl GcpClient {
    pub fn new(
        http: Client,
        tokens: Arc<TokenProvider>,
        retry: RetryPolicy,
        poll_interval: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            http,
            tokens,
            retry,
            poll_interval,
            operation_timeout,
        }
    }

    pub fn from_settings(settings: &Settings, http: Client, tokens: Arc<TokenProvider>) -> Self {
        Self::new(
            http,
            tokens,
            RetryPolicy::from(&settings.retry),
            Duration::from_secs(settings.deploy.poll_interval_secs),
            Duration::from_secs(settings.deploy.operation_timeout_secs),
        )
    }

    /// HTTP client with the configured request timeout
    pub fn http_client(settings: &Settings) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_secs(settings.gcp.http_timeout_secs))
            .build()
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    async fn send_once<B>(&self, method: Method, url: &str, body: Option<&B>) -> Result<reqwest::Response, GcpError>
    where
        B: Serialize + ?Sized,
    {
        let token = self.tokens.access_token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(GcpError::NotFound(url.to_string()));
        }

        let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
        Err(GcpError::Api {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    }

    /// Send a JSON request, retrying transient failures, and decode the response
    pub async fn send_json<B, T>(&self, method: Method, url: &str, body: Option<&B>) -> Result<T, GcpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("{} {}", method, url);

        let label = format!("{} {}", method, url);
        let response = self
            .retry
            .run(&label, || self.send_once(method.clone(), url, body))
            .await?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| GcpError::InvalidResponse(format!("{} {}: {}", method, url, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, GcpError> {
        self.send_json::<(), T>(Method::GET, url, None).await
    }

    /// GET that maps 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, GcpError> {
        match self.get(url).await {
            Ok(value) => Ok(Some(value)),
            Err(GcpError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T, GcpError> {
        self.send_json(Method::POST, url, Some(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T, GcpError> {
        self.send_json(Method::PATCH, url, Some(body)).await
    }

    /// Poll a long-running operation until it is done
    ///
    /// `api_root` is the versioned endpoint the operation name is relative to,
    /// e.g. `https://run.googleapis.com/v2`.
    pub async fn wait_operation(&self, api_root: &str, mut op: Operation) -> Result<Operation, GcpError> {
        let started = Instant::now();
        let deadline = started + self.operation_timeout;

        while !op.done {
            if Instant::now() >= deadline {
                return Err(GcpError::OperationTimeout {
                    operation: op.name,
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            sleep(self.poll_interval).await;
            tracing::debug!("Polling operation {}", op.name);
            op = self
                .get(&format!("{}/{}", api_root.trim_end_matches('/'), op.name))
                .await?;
        }

        if let Some(error) = &op.error {
            return Err(GcpError::OperationFailed {
                operation: op.name.clone(),
                code: error.code,
                message: error.message.clone(),
            });
        }

        tracing::debug!("Operation {} finished in {:?}", op.name, started.elapsed());
        Ok(op)
    }

    /// Grant `role` to `member` on a resource, leaving existing bindings intact
    pub async fn ensure_binding(&self, resource_url: &str, role: &str, member: &str) -> Result<(), GcpError> {
        let mut policy: IamPolicy = self.get(&format!("{}:getIamPolicy", resource_url)).await?;

        if !policy.grant(role, member) {
            tracing::debug!("{} already has {} on {}", member, role, resource_url);
            return Ok(());
        }

        let _: IamPolicy = self
            .post(
                &format!("{}:setIamPolicy", resource_url),
                &SetIamPolicyRequest { policy },
            )
            .await?;

        tracing::info!("Granted {} to {} on {}", role, member, resource_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::CredentialSource;
    use crate::services::runner::ProcessRunner;

    fn client(retry: RetryPolicy) -> GcpClient {
        let http = Client::new();
        let tokens = Arc::new(TokenProvider::new(
            CredentialSource::Static("token".to_string()),
            http.clone(),
            Arc::new(ProcessRunner),
        ));
        GcpClient::new(http, tokens, retry, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn test_retryable_statuses() {
        let api = |status| GcpError::Api {
            status,
            url: String::new(),
            body: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!GcpError::NotFound("x".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_get_optional_maps_404() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/projects/p/locations/r/services/missing")
            .match_header("authorization", "Bearer token")
            .with_status(404)
            .with_body(r#"{"error":{"code":404}}"#)
            .create_async()
            .await;

        let url = format!("{}/v2/projects/p/locations/r/services/missing", server.url());
        let result: Option<serde_json::Value> = client(RetryPolicy::none()).get_optional(&url).await.unwrap();

        assert!(result.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/v1/thing")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
        };
        let url = format!("{}/v1/thing", server.url());
        let err = client(policy).get::<serde_json::Value>(&url).await.unwrap_err();

        assert!(matches!(err, GcpError::Api { status: 503, .. }));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_operation_polls_until_done() {
        let mut server = mockito::Server::new_async().await;
        let poll = server
            .mock("GET", "/v2/operations/op-1")
            .with_status(200)
            .with_body(r#"{"name":"operations/op-1","done":true}"#)
            .create_async()
            .await;

        let pending = Operation {
            name: "operations/op-1".to_string(),
            done: false,
            error: None,
            response: None,
        };
        let root = format!("{}/v2", server.url());
        let op = client(RetryPolicy::none()).wait_operation(&root, pending).await.unwrap();

        assert!(op.done);
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_operation_surfaces_error() {
        let done = Operation {
            name: "operations/op-2".to_string(),
            done: true,
            error: Some(crate::models::responses::OperationError {
                code: 9,
                message: "image not found".to_string(),
            }),
            response: None,
        };

        let err = client(RetryPolicy::none()).wait_operation("http://unused", done).await.unwrap_err();
        assert!(matches!(err, GcpError::OperationFailed { code: 9, .. }));
    }

    #[tokio::test]
    async fn test_ensure_binding_skips_existing_member() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/v1/projects/p/locations/r/functions/f:getIamPolicy")
            .with_status(200)
            .with_body(r#"{"bindings":[{"role":"roles/cloudfunctions.invoker","members":["allUsers"]}],"etag":"BwX"}"#)
            .create_async()
            .await;
        let set = server
            .mock("POST", "/v1/projects/p/locations/r/functions/f:setIamPolicy")
            .expect(0)
            .create_async()
            .await;

        let resource = format!("{}/v1/projects/p/locations/r/functions/f", server.url());
        client(RetryPolicy::none())
            .ensure_binding(&resource, "roles/cloudfunctions.invoker", ALL_USERS)
            .await
            .unwrap();

        get.assert_async().await;
        set.assert_async().await;
    }
}
