use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::domain::TargetStatus;

/// Google long-running operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(default)]
    pub response: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Subset of a Cloud Run v2 `Service` read back after deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunServiceStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub latest_ready_revision: Option<String>,
}

/// Subset of a Cloud Functions v1 `CloudFunction` read back after deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub https_trigger: Option<HttpsTriggerStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsTriggerStatus {
    #[serde(default)]
    pub url: Option<String>,
}

impl FunctionStatus {
    pub fn url(&self) -> Option<&str> {
        self.https_trigger.as_ref().and_then(|t| t.url.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
}

/// One row of a deploy report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    #[serde(flatten)]
    pub status: TargetStatus,
}

/// Result of a full deploy run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub run_id: uuid::Uuid,
    pub image: String,
    pub models: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub targets: Vec<TargetReport>,
    pub verification: Option<VerificationReport>,
}

impl DeployReport {
    pub fn new(run_id: uuid::Uuid, image: String, models: String) -> Self {
        Self {
            run_id,
            image,
            models,
            started_at: chrono::Utc::now(),
            finished_at: None,
            targets: Vec::new(),
            verification: None,
        }
    }

    pub fn record(&mut self, target: impl Into<String>, status: TargetStatus) {
        self.targets.push(TargetReport {
            target: target.into(),
            status,
        });
    }

    pub fn status_of(&self, target: &str) -> Option<&TargetStatus> {
        self.targets.iter().find(|t| t.target == target).map(|t| &t.status)
    }

    pub fn is_success(&self) -> bool {
        let targets_ok = !self.targets.iter().any(|t| t.status.is_failed());
        let verified = self.verification.as_ref().map(|v| v.is_healthy()).unwrap_or(true);
        targets_ok && verified
    }
}

/// Live state of a deployment compared to the local model set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub inference_healthy: bool,
    pub registered_models: Vec<String>,
    pub missing_models: Vec<String>,
    pub unexpected_models: Vec<String>,
    pub status_function: Option<Value>,
    pub errors: Vec<String>,
}

impl VerificationReport {
    pub fn is_healthy(&self) -> bool {
        self.inference_healthy && self.missing_models.is_empty() && self.errors.is_empty()
    }
}
