use crate::config::Settings;
use crate::models::{ExtraSource, FunctionSpec, FunctionTrigger, ModelSet, ServiceSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Port Cloud Run routes to when a service declares none
pub const PLATFORM_DEFAULT_PORT: u16 = 8080;

/// Ports for the TorchServe listeners a profile does not publish
const INTERNAL_PORTS: [u16; 3] = [8081, 8082, 8083];

/// Revision annotations that change on every deploy run
pub const RUN_ID_ANNOTATION: &str = "crop-mask/run-id";
pub const MODELS_DIGEST_ANNOTATION: &str = "crop-mask/models-digest";

/// Two ports distinct from `public` and from each other
fn internal_ports(public: u16) -> [u16; 2] {
    let mut free = INTERNAL_PORTS.iter().copied().filter(|p| *p != public);
    // three candidates with at most one excluded, the fallbacks never apply
    [free.next().unwrap_or(8091), free.next().unwrap_or(8092)]
}

fn listener_address(port: u16) -> String {
    format!("http://0.0.0.0:{}", port)
}

/// Everything one deploy run needs, derived once from settings and the model set
///
/// All four deployment targets and the image build read `MODELS` from the
/// single `ModelSet` held here, so they can never disagree.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    run_id: uuid::Uuid,
    settings: Settings,
    image: String,
    models: ModelSet,
    models_digest: String,
}

impl DeploymentPlan {
    pub fn new(settings: &Settings, models: ModelSet, models_digest: String) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            image: settings.image_ref(),
            settings: settings.clone(),
            models,
            models_digest,
        }
    }

    /// Identifies this run in the deploy report and on every new revision
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn models_digest(&self) -> &str {
        &self.models_digest
    }

    /// The shared `MODELS` value
    pub fn models_arg(&self) -> String {
        self.models.as_arg()
    }

    fn base_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("MODELS".to_string(), self.models_arg());
        env
    }

    /// Stamped on the revision template so a redeploy of a mutable tag
    /// always rolls out a new revision
    fn revision_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(RUN_ID_ANNOTATION.to_string(), self.run_id.to_string());
        annotations.insert(MODELS_DIGEST_ANNOTATION.to_string(), self.models_digest.clone());
        annotations
    }

    /// Every TorchServe listener gets its own port; only `public` is served
    fn listener_env(env: &mut BTreeMap<String, String>, inference: u16, management: u16, metrics: u16) {
        env.insert("TS_INFERENCE_ADDRESS".to_string(), listener_address(inference));
        env.insert("TS_MANAGEMENT_ADDRESS".to_string(), listener_address(management));
        env.insert("TS_METRICS_ADDRESS".to_string(), listener_address(metrics));
    }

    /// Public inference endpoint: more memory, bounded concurrency, fixed port
    pub fn inference_service(&self) -> ServiceSpec {
        let s = &self.settings.inference;
        let mut env = self.base_env();
        let [management, metrics] = internal_ports(s.port);
        Self::listener_env(&mut env, s.port, management, metrics);

        ServiceSpec {
            name: s.name.clone(),
            image: self.image.clone(),
            memory: s.memory.clone(),
            cpu: s.cpu.clone(),
            concurrency: Some(s.concurrency),
            port: Some(s.port),
            allow_unauthenticated: s.allow_unauthenticated,
            env,
            revision_annotations: self.revision_annotations(),
        }
    }

    /// Management endpoint: less memory, platform default port and concurrency
    pub fn management_service(&self) -> ServiceSpec {
        let s = &self.settings.management;
        let mut env = self.base_env();
        let [inference, metrics] = internal_ports(PLATFORM_DEFAULT_PORT);
        Self::listener_env(&mut env, inference, PLATFORM_DEFAULT_PORT, metrics);

        ServiceSpec {
            name: s.name.clone(),
            image: self.image.clone(),
            memory: s.memory.clone(),
            cpu: s.cpu.clone(),
            concurrency: None,
            port: None,
            allow_unauthenticated: s.allow_unauthenticated,
            env,
            revision_annotations: self.revision_annotations(),
        }
    }

    /// Storage-triggered function that runs inference on new uploads
    pub fn trigger_function(&self, inference_url: &str) -> FunctionSpec {
        let s = &self.settings.trigger_function;
        let mut env = self.base_env();
        env.insert("INFERENCE_HOST".to_string(), inference_url.to_string());

        FunctionSpec {
            name: s.name.clone(),
            entry_point: s.entry_point.clone(),
            runtime: s.runtime.clone(),
            timeout_secs: s.timeout_secs,
            memory_mb: s.memory_mb,
            source_dir: s.source_dir.clone(),
            allow_unauthenticated: false,
            extra_sources: Vec::new(),
            trigger: FunctionTrigger::StorageFinalize {
                bucket: s.bucket.clone(),
            },
            env,
        }
    }

    /// HTTP function for status checks and region exports, shipped with the ETL package
    pub fn status_function(&self, inference_url: &str) -> FunctionSpec {
        let s = &self.settings.status_function;
        let mut env = self.base_env();
        env.insert("DEST_BUCKET".to_string(), s.dest_bucket.clone());
        env.insert(
            "INFERENCE_HOST".to_string(),
            s.inference_host
                .clone()
                .unwrap_or_else(|| inference_url.to_string()),
        );

        FunctionSpec {
            name: s.name.clone(),
            entry_point: s.entry_point.clone(),
            runtime: s.runtime.clone(),
            timeout_secs: s.timeout_secs,
            memory_mb: s.memory_mb,
            source_dir: s.source_dir.clone(),
            allow_unauthenticated: s.allow_unauthenticated,
            extra_sources: vec![ExtraSource {
                from: self.settings.image.etl_dir.clone(),
                to: PathBuf::from("src/ETL"),
            }],
            trigger: FunctionTrigger::Http,
            env,
        }
    }

    pub fn summary(&self, inference_url: &str) -> PlanSummary {
        PlanSummary {
            image: self.image.clone(),
            models: self.models_arg(),
            models_digest: self.models_digest.clone(),
            inference_service: self.inference_service(),
            management_service: self.management_service(),
            trigger_function: self.trigger_function(inference_url),
            status_function: self.status_function(inference_url),
        }
    }
}

/// Printable view of a plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub image: String,
    pub models: String,
    pub models_digest: String,
    pub inference_service: ServiceSpec,
    pub management_service: ServiceSpec,
    pub trigger_function: FunctionSpec,
    pub status_function: FunctionSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelArtifact;

    fn plan() -> DeploymentPlan {
        plan_with(Settings::default(), "digest")
    }

    fn plan_with(mut settings: Settings, digest: &str) -> DeploymentPlan {
        settings.gcp.project = "proj".to_string();
        settings.trigger_function.bucket = "uploads".to_string();
        settings.status_function.dest_bucket = "preds".to_string();

        let models = ModelSet::new(
            ["model_b", "model_a"]
                .iter()
                .map(|n| ModelArtifact {
                    name: n.to_string(),
                    path: PathBuf::from(format!("{}.pt", n)),
                    size_bytes: 1,
                })
                .collect(),
        );
        DeploymentPlan::new(&settings, models, digest.to_string())
    }

    fn port_of(address: &str) -> u16 {
        address.rsplit(':').next().unwrap().parse().unwrap()
    }

    fn listener_ports(spec: &ServiceSpec) -> [u16; 3] {
        [
            port_of(&spec.env["TS_INFERENCE_ADDRESS"]),
            port_of(&spec.env["TS_MANAGEMENT_ADDRESS"]),
            port_of(&spec.env["TS_METRICS_ADDRESS"]),
        ]
    }

    #[test]
    fn test_all_targets_share_models() {
        let plan = plan();
        let url = "https://crop-mask.run.app";
        let expected = "model_a model_b";

        assert_eq!(plan.inference_service().env["MODELS"], expected);
        assert_eq!(plan.management_service().env["MODELS"], expected);
        assert_eq!(plan.trigger_function(url).env["MODELS"], expected);
        assert_eq!(plan.status_function(url).env["MODELS"], expected);
    }

    #[test]
    fn test_service_profiles() {
        let plan = plan();
        let inference = plan.inference_service();
        let management = plan.management_service();

        assert_eq!(inference.port, Some(8080));
        assert_eq!(inference.concurrency, Some(10));
        assert_eq!(inference.memory, "8Gi");
        assert_eq!(management.port, None);
        assert_eq!(management.concurrency, None);
        assert_eq!(management.memory, "4Gi");
        assert_eq!(inference.image, management.image);
    }

    #[test]
    fn test_listeners_never_share_a_port() {
        for port in [8080, 8081, 8082, 9000] {
            let mut settings = Settings::default();
            settings.inference.port = port;
            let plan = plan_with(settings, "digest");

            let [inference, management, metrics] = listener_ports(&plan.inference_service());
            assert_eq!(inference, port);
            assert!(inference != management && inference != metrics && management != metrics, "port {}", port);

            let [inference, management, metrics] = listener_ports(&plan.management_service());
            assert_eq!(management, PLATFORM_DEFAULT_PORT);
            assert!(inference != management && inference != metrics && management != metrics);
        }
    }

    #[test]
    fn test_each_run_stamps_a_new_revision() {
        let first = plan_with(Settings::default(), "digest-v1");
        let second = plan_with(Settings::default(), "digest-v1");

        let a = first.inference_service().revision_annotations;
        let b = second.inference_service().revision_annotations;
        assert_eq!(a[RUN_ID_ANNOTATION], first.run_id().to_string());
        assert_eq!(a[MODELS_DIGEST_ANNOTATION], "digest-v1");
        assert_ne!(a, b);
        assert_eq!(first.management_service().revision_annotations, a);
    }

    #[test]
    fn test_function_parameters() {
        let plan = plan();
        let trigger = plan.trigger_function("https://inference");
        let status = plan.status_function("https://inference");

        assert_eq!(
            trigger.trigger,
            FunctionTrigger::StorageFinalize {
                bucket: "uploads".to_string()
            }
        );
        assert_eq!(trigger.env["INFERENCE_HOST"], "https://inference");
        assert_eq!(status.trigger, FunctionTrigger::Http);
        assert_eq!(status.env["DEST_BUCKET"], "preds");
        assert_eq!(status.extra_sources[0].to, PathBuf::from("src/ETL"));
    }

    #[test]
    fn test_summary_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&plan().summary("https://inference")).unwrap();
        assert!(rendered.contains("models = \"model_a model_b\""));
    }
}
