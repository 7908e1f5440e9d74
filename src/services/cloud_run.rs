use crate::config::GcpSettings;
use crate::models::{Operation, RunService, RunServiceStatus, ServiceSpec};
use crate::services::gcp::{GcpClient, GcpError, ALL_USERS};
use std::sync::Arc;

const RUN_INVOKER_ROLE: &str = "roles/run.invoker";

/// Cloud Run Admin API v2 client
///
/// Services are created when absent and replaced in place otherwise, so the
/// same deploy can run repeatedly.
pub struct CloudRunClient {
    gcp: Arc<GcpClient>,
    api_root: String,
    parent: String,
}

impl CloudRunClient {
    pub fn new(gcp: Arc<GcpClient>, endpoint: &str, project: &str, region: &str) -> Self {
        Self {
            gcp,
            api_root: format!("{}/v2", endpoint.trim_end_matches('/')),
            parent: format!("projects/{}/locations/{}", project, region),
        }
    }

    pub fn from_settings(gcp: Arc<GcpClient>, settings: &GcpSettings) -> Self {
        Self::new(gcp, &settings.run_endpoint, &settings.project, &settings.region)
    }

    fn services_url(&self) -> String {
        format!("{}/{}/services", self.api_root, self.parent)
    }

    fn service_url(&self, name: &str) -> String {
        format!("{}/{}", self.services_url(), name)
    }

    pub async fn get_service(&self, name: &str) -> Result<Option<RunServiceStatus>, GcpError> {
        self.gcp.get_optional(&self.service_url(name)).await
    }

    /// Create or replace a service and wait until its revision is serving
    pub async fn deploy_service(&self, spec: &ServiceSpec) -> Result<RunServiceStatus, GcpError> {
        let body = RunService::from_spec(spec);
        let exists = self.get_service(&spec.name).await?.is_some();

        let op: Operation = if exists {
            tracing::info!("Updating Cloud Run service {} with {}", spec.name, spec.image);
            self.gcp.patch(&self.service_url(&spec.name), &body).await?
        } else {
            tracing::info!("Creating Cloud Run service {} with {}", spec.name, spec.image);
            let url = format!(
                "{}?serviceId={}",
                self.services_url(),
                urlencoding::encode(&spec.name)
            );
            self.gcp.post(&url, &body).await?
        };

        let op = self.gcp.wait_operation(&self.api_root, op).await?;

        if spec.allow_unauthenticated {
            self.gcp
                .ensure_binding(&self.service_url(&spec.name), RUN_INVOKER_ROLE, ALL_USERS)
                .await?;
        }

        // finished operations carry the service; read it back when they don't
        let status = match op.response.and_then(|r| serde_json::from_value::<RunServiceStatus>(r).ok()) {
            Some(status) if status.uri.is_some() => status,
            _ => self
                .get_service(&spec.name)
                .await?
                .ok_or_else(|| GcpError::NotFound(self.service_url(&spec.name)))?,
        };

        tracing::info!(
            "Service {} ready at {}",
            spec.name,
            status.uri.as_deref().unwrap_or("<no uri>")
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::{CredentialSource, TokenProvider};
    use crate::services::retry::RetryPolicy;
    use crate::services::runner::ProcessRunner;
    use mockito::Matcher;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn client(endpoint: &str) -> CloudRunClient {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenProvider::new(
            CredentialSource::Static("token".to_string()),
            http.clone(),
            Arc::new(ProcessRunner),
        ));
        let gcp = GcpClient::new(http, tokens, RetryPolicy::none(), Duration::from_millis(1), Duration::from_secs(1));
        CloudRunClient::new(Arc::new(gcp), endpoint, "proj", "us-central1")
    }

    fn spec(public: bool) -> ServiceSpec {
        ServiceSpec {
            name: "crop-mask".to_string(),
            image: "registry/crop-mask:latest".to_string(),
            memory: "8Gi".to_string(),
            cpu: None,
            concurrency: Some(10),
            port: Some(8080),
            allow_unauthenticated: public,
            env: BTreeMap::new(),
            revision_annotations: BTreeMap::new(),
        }
    }

    const SERVICE_PATH: &str = "/v2/projects/proj/locations/us-central1/services/crop-mask";

    #[tokio::test]
    async fn test_existing_service_is_patched() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", SERVICE_PATH)
            .with_status(200)
            .with_body(r#"{"name":"crop-mask","uri":"https://crop-mask-abc.a.run.app"}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", SERVICE_PATH)
            .match_body(Matcher::PartialJsonString(
                r#"{"template":{"maxInstanceRequestConcurrency":10}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"name":"operations/1","done":true,"response":{"name":"crop-mask","uri":"https://crop-mask-abc.a.run.app"}}"#)
            .create_async()
            .await;

        let status = client(&server.url()).deploy_service(&spec(false)).await.unwrap();

        assert_eq!(status.uri.as_deref(), Some("https://crop-mask-abc.a.run.app"));
        get.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_service_is_created_and_opened() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", SERVICE_PATH)
            .with_status(404)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/projects/proj/locations/us-central1/services")
            .match_query(Matcher::UrlEncoded("serviceId".to_string(), "crop-mask".to_string()))
            .with_status(200)
            .with_body(r#"{"name":"operations/2","done":true,"response":{"name":"crop-mask","uri":"https://crop-mask-new.a.run.app"}}"#)
            .create_async()
            .await;
        let get_policy = server
            .mock("GET", format!("{}:getIamPolicy", SERVICE_PATH).as_str())
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let set_policy = server
            .mock("POST", format!("{}:setIamPolicy", SERVICE_PATH).as_str())
            .match_body(Matcher::PartialJsonString(
                r#"{"policy":{"bindings":[{"role":"roles/run.invoker","members":["allUsers"]}]}}"#.to_string(),
            ))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let status = client(&server.url()).deploy_service(&spec(true)).await.unwrap();

        assert_eq!(status.uri.as_deref(), Some("https://crop-mask-new.a.run.app"));
        missing.assert_async().await;
        create.assert_async().await;
        get_policy.assert_async().await;
        set_policy.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_operation_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server.mock("GET", SERVICE_PATH).with_status(404).create_async().await;
        let _create = server
            .mock("POST", "/v2/projects/proj/locations/us-central1/services")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"name":"operations/3","done":true,"error":{"code":9,"message":"Revision failed to start"}}"#)
            .create_async()
            .await;

        let err = client(&server.url()).deploy_service(&spec(false)).await.unwrap_err();
        assert!(matches!(err, GcpError::OperationFailed { code: 9, .. }));
    }
}
