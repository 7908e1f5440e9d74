use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TorchServeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredModel {
    pub model_name: String,
    #[serde(default)]
    pub model_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsPage {
    #[serde(default)]
    models: Vec<RegisteredModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Read-only client for a deployed TorchServe's inference and management APIs
pub struct TorchServeClient {
    client: Client,
}

impl TorchServeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, TorchServeError> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TorchServeError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// True when the inference API reports itself healthy
    pub async fn ping(&self, inference_url: &str) -> Result<bool, TorchServeError> {
        let url = format!("{}/ping", inference_url.trim_end_matches('/'));
        let ping: PingResponse = self.get(&url).await?;
        Ok(ping.status.eq_ignore_ascii_case("healthy"))
    }

    /// Names of every model registered with the management API, following pagination
    pub async fn list_models(&self, management_url: &str) -> Result<Vec<String>, TorchServeError> {
        let base = format!("{}/models", management_url.trim_end_matches('/'));
        let mut names = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = match &token {
                Some(t) => format!("{}?next_page_token={}", base, urlencoding::encode(t)),
                None => base.clone(),
            };
            let page: ModelsPage = self.get(&url).await?;
            names.extend(page.models.into_iter().map(|m| m.model_name));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping() {
        let mut server = mockito::Server::new_async().await;
        let _ping = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body(r#"{"status": "Healthy"}"#)
            .create_async()
            .await;

        let client = TorchServeClient::new(Client::new());
        assert!(client.ping(&format!("{}/", server.url())).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_models_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"nextPageToken":"1","models":[{"modelName":"Rwanda","modelUrl":"Rwanda.mar"}]}"#)
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/models?next_page_token=1")
            .with_status(200)
            .with_body(r#"{"models":[{"modelName":"Kenya","modelUrl":"Kenya.mar"}]}"#)
            .create_async()
            .await;

        let client = TorchServeClient::new(Client::new());
        let models = client.list_models(&server.url()).await.unwrap();
        assert_eq!(models, vec!["Kenya", "Rwanda"]);
    }

    #[tokio::test]
    async fn test_unhealthy_status_code() {
        let mut server = mockito::Server::new_async().await;
        let _ping = server.mock("GET", "/ping").with_status(503).create_async().await;

        let client = TorchServeClient::new(Client::new());
        let err = client.ping(&server.url()).await.unwrap_err();
        assert!(matches!(err, TorchServeError::Status { status: 503, .. }));
    }
}
