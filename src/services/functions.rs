use crate::config::GcpSettings;
use crate::models::{CloudFunction, FunctionSpec, FunctionStatus, Operation, UploadUrlResponse};
use crate::services::gcp::{GcpClient, GcpError, ALL_USERS};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;

const FUNCTIONS_INVOKER_ROLE: &str = "roles/cloudfunctions.invoker";

/// Upper bound the signed upload URL accepts, 100 MiB
const MAX_SOURCE_BYTES: usize = 104_857_600;

/// Cloud Functions API v1 client
pub struct CloudFunctionsClient {
    gcp: Arc<GcpClient>,
    api_root: String,
    parent: String,
}

impl CloudFunctionsClient {
    pub fn new(gcp: Arc<GcpClient>, endpoint: &str, project: &str, region: &str) -> Self {
        Self {
            gcp,
            api_root: format!("{}/v1", endpoint.trim_end_matches('/')),
            parent: format!("projects/{}/locations/{}", project, region),
        }
    }

    pub fn from_settings(gcp: Arc<GcpClient>, settings: &GcpSettings) -> Self {
        Self::new(gcp, &settings.functions_endpoint, &settings.project, &settings.region)
    }

    fn resource_name(&self, name: &str) -> String {
        format!("{}/functions/{}", self.parent, name)
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/{}", self.api_root, self.resource_name(name))
    }

    pub async fn get_function(&self, name: &str) -> Result<Option<FunctionStatus>, GcpError> {
        self.gcp.get_optional(&self.function_url(name)).await
    }

    /// Upload a zipped source tree to a fresh signed URL and return that URL
    pub async fn upload_source(&self, archive: Vec<u8>) -> Result<String, GcpError> {
        if archive.len() > MAX_SOURCE_BYTES {
            return Err(GcpError::InvalidResponse(format!(
                "source archive is {} bytes, limit is {}",
                archive.len(),
                MAX_SOURCE_BYTES
            )));
        }

        let url = format!("{}/{}/functions:generateUploadUrl", self.api_root, self.parent);
        let UploadUrlResponse { upload_url } = self.gcp.post(&url, &serde_json::json!({})).await?;

        tracing::debug!("Uploading {} byte source archive", archive.len());

        let response = self
            .gcp
            .http()
            .put(&upload_url)
            .header(CONTENT_TYPE, "application/zip")
            .header("x-goog-content-length-range", format!("0,{}", MAX_SOURCE_BYTES))
            .body(archive)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(GcpError::Api {
                status,
                url: upload_url,
                body,
            });
        }

        Ok(upload_url)
    }

    /// Upload the source, then create or patch the function and wait for it
    pub async fn deploy_function(&self, spec: &FunctionSpec, archive: Vec<u8>) -> Result<FunctionStatus, GcpError> {
        let source_upload_url = self.upload_source(archive).await?;
        let body = CloudFunction::from_spec(spec, self.resource_name(&spec.name), source_upload_url);
        let exists = self.get_function(&spec.name).await?.is_some();

        let op: Operation = if exists {
            tracing::info!("Updating Cloud Function {}", spec.name);
            let url = format!(
                "{}?updateMask={}",
                self.function_url(&spec.name),
                urlencoding::encode(CloudFunction::UPDATE_MASK)
            );
            self.gcp.patch(&url, &body).await?
        } else {
            tracing::info!("Creating Cloud Function {}", spec.name);
            self.gcp
                .post(&format!("{}/{}/functions", self.api_root, self.parent), &body)
                .await?
        };

        let op = self.gcp.wait_operation(&self.api_root, op).await?;

        if spec.allow_unauthenticated {
            self.gcp
                .ensure_binding(&self.function_url(&spec.name), FUNCTIONS_INVOKER_ROLE, ALL_USERS)
                .await?;
        }

        let status = match op.response.and_then(|r| serde_json::from_value::<FunctionStatus>(r).ok()) {
            Some(status) if !status.name.is_empty() => status,
            _ => self
                .get_function(&spec.name)
                .await?
                .ok_or_else(|| GcpError::NotFound(self.function_url(&spec.name)))?,
        };

        tracing::info!(
            "Function {} is {}",
            spec.name,
            status.status.as_deref().unwrap_or("UNKNOWN")
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FunctionTrigger;
    use crate::services::auth::{CredentialSource, TokenProvider};
    use crate::services::retry::RetryPolicy;
    use crate::services::runner::ProcessRunner;
    use mockito::Matcher;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration;

    const FUNCTION_PATH: &str = "/v1/projects/proj/locations/us-central1/functions/trigger-inference";

    fn client(endpoint: &str) -> CloudFunctionsClient {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenProvider::new(
            CredentialSource::Static("token".to_string()),
            http.clone(),
            Arc::new(ProcessRunner),
        ));
        let gcp = GcpClient::new(http, tokens, RetryPolicy::none(), Duration::from_millis(1), Duration::from_secs(1));
        CloudFunctionsClient::new(Arc::new(gcp), endpoint, "proj", "us-central1")
    }

    fn trigger_spec() -> FunctionSpec {
        let mut env = BTreeMap::new();
        env.insert("MODELS".to_string(), "Kenya Rwanda".to_string());
        FunctionSpec {
            name: "trigger-inference".to_string(),
            entry_point: "trigger".to_string(),
            runtime: "python39".to_string(),
            timeout_secs: 300,
            memory_mb: 256,
            source_dir: PathBuf::from("gcp/trigger_inference_function"),
            allow_unauthenticated: false,
            extra_sources: vec![],
            trigger: FunctionTrigger::StorageFinalize {
                bucket: "crop-mask-inference".to_string(),
            },
            env,
        }
    }

    async fn mock_upload(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
        let upload_url = format!("{}/upload/signed", server.url());
        let generate = server
            .mock("POST", "/v1/projects/proj/locations/us-central1/functions:generateUploadUrl")
            .with_status(200)
            .with_body(format!(r#"{{"uploadUrl":"{}"}}"#, upload_url))
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/upload/signed")
            .match_header("content-type", "application/zip")
            .match_header("x-goog-content-length-range", "0,104857600")
            .match_body(Matcher::Exact("zip-bytes".to_string()))
            .with_status(200)
            .create_async()
            .await;
        (generate, put)
    }

    #[tokio::test]
    async fn test_new_function_is_created() {
        let mut server = mockito::Server::new_async().await;
        let (generate, put) = mock_upload(&mut server).await;
        let missing = server
            .mock("GET", FUNCTION_PATH)
            .with_status(404)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v1/projects/proj/locations/us-central1/functions")
            .match_body(Matcher::PartialJsonString(
                r#"{"timeout":"300s","environmentVariables":{"MODELS":"Kenya Rwanda"},"eventTrigger":{"eventType":"google.storage.object.finalize"}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"name":"operations/abc","done":true,"response":{"@type":"type.googleapis.com/google.cloud.functions.v1.CloudFunction","name":"projects/proj/locations/us-central1/functions/trigger-inference","status":"ACTIVE"}}"#,
            )
            .create_async()
            .await;

        let status = client(&server.url())
            .deploy_function(&trigger_spec(), b"zip-bytes".to_vec())
            .await
            .unwrap();

        assert_eq!(status.status.as_deref(), Some("ACTIVE"));
        generate.assert_async().await;
        put.assert_async().await;
        missing.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_existing_function_is_patched_with_mask() {
        let mut server = mockito::Server::new_async().await;
        let (_generate, _put) = mock_upload(&mut server).await;
        let existing = server
            .mock("GET", FUNCTION_PATH)
            .with_status(200)
            .with_body(r#"{"name":"trigger-inference","status":"ACTIVE"}"#)
            .expect(2)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", FUNCTION_PATH)
            .match_query(Matcher::UrlEncoded(
                "updateMask".to_string(),
                CloudFunction::UPDATE_MASK.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"name":"operations/def","done":true}"#)
            .create_async()
            .await;

        client(&server.url())
            .deploy_function(&trigger_spec(), b"zip-bytes".to_vec())
            .await
            .unwrap();

        existing.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_upload_stops_deploy() {
        let mut server = mockito::Server::new_async().await;
        let upload_url = format!("{}/upload/signed", server.url());
        let _generate = server
            .mock("POST", "/v1/projects/proj/locations/us-central1/functions:generateUploadUrl")
            .with_status(200)
            .with_body(format!(r#"{{"uploadUrl":"{}"}}"#, upload_url))
            .create_async()
            .await;
        let _put = server.mock("PUT", "/upload/signed").with_status(403).create_async().await;
        let create = server
            .mock("POST", "/v1/projects/proj/locations/us-central1/functions")
            .expect(0)
            .create_async()
            .await;

        let err = client(&server.url())
            .deploy_function(&trigger_spec(), b"zip-bytes".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, GcpError::Api { status: 403, .. }));
        create.assert_async().await;
    }
}
