use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::models::domain::{BoundingBox, FunctionSpec, FunctionTrigger, ServiceSpec};

/// Cloud Run Admin API v2 `Service` resource (only the fields we manage)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunService {
    pub template: RevisionTemplate,
    pub ingress: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<RunContainer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instance_request_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContainer {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl RunService {
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("memory".to_string(), spec.memory.clone());
        if let Some(cpu) = &spec.cpu {
            limits.insert("cpu".to_string(), cpu.clone());
        }

        let container = RunContainer {
            image: spec.image.clone(),
            ports: spec
                .port
                .map(|port| vec![ContainerPort { container_port: port }])
                .unwrap_or_default(),
            resources: ResourceRequirements { limits },
            env: spec
                .env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        };

        let mut labels = BTreeMap::new();
        labels.insert("managed-by".to_string(), "crop-mask-deploy".to_string());

        Self {
            template: RevisionTemplate {
                annotations: spec.revision_annotations.clone(),
                containers: vec![container],
                max_instance_request_concurrency: spec.concurrency,
            },
            ingress: "INGRESS_TRAFFIC_ALL".to_string(),
            labels,
        }
    }
}

/// Cloud Functions API v1 `CloudFunction` resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFunction {
    pub name: String,
    pub entry_point: String,
    pub runtime: String,
    /// Duration in the API's `"<secs>s"` form
    pub timeout: String,
    pub available_memory_mb: u32,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    pub source_upload_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<EventTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_trigger: Option<HttpsTrigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    pub event_type: String,
    pub resource: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsTrigger {}

impl CloudFunction {
    /// Fields sent as `updateMask` when patching an existing function
    pub const UPDATE_MASK: &'static str = "entryPoint,runtime,timeout,availableMemoryMb,environmentVariables,sourceUploadUrl,eventTrigger,httpsTrigger";

    pub fn from_spec(spec: &FunctionSpec, resource_name: String, source_upload_url: String) -> Self {
        let (event_trigger, https_trigger) = match &spec.trigger {
            FunctionTrigger::StorageFinalize { bucket } => (
                Some(EventTrigger {
                    event_type: FunctionTrigger::FINALIZE_EVENT.to_string(),
                    resource: format!("projects/_/buckets/{}", bucket),
                }),
                None,
            ),
            FunctionTrigger::Http => (None, Some(HttpsTrigger::default())),
        };

        Self {
            name: resource_name,
            entry_point: spec.entry_point.clone(),
            runtime: spec.runtime.clone(),
            timeout: format!("{}s", spec.timeout_secs),
            available_memory_mb: spec.memory_mb,
            environment_variables: spec.env.clone(),
            source_upload_url,
            event_trigger,
            https_trigger,
        }
    }
}

/// IAM policy as returned by `getIamPolicy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

impl IamPolicy {
    /// Add `member` to `role`. Returns false when it was already granted.
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        if let Some(binding) = self.bindings.iter_mut().find(|b| b.role == role) {
            if binding.members.iter().any(|m| m == member) {
                return false;
            }
            binding.members.push(member.to_string());
            return true;
        }

        self.bindings.push(IamBinding {
            role: role.to_string(),
            members: vec![member.to_string()],
        });
        true
    }
}

/// Body of a `setIamPolicy` call
#[derive(Debug, Clone, Serialize)]
pub struct SetIamPolicyRequest {
    pub policy: IamPolicy,
}

/// Request sent to the HTTP function to export imagery for a region
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegionExportRequest {
    #[validate(length(min = 1))]
    pub region_name: String,
    pub bbox: BoundingBox,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    #[validate(length(min = 1))]
    pub dest_bucket: String,
    #[validate(range(min = 100))]
    pub metres_per_polygon: Option<u32>,
    pub identifiers: Vec<String>,
}
