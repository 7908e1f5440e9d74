use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Application configuration
///
/// Built once at process start and handed to every step; nothing downstream
/// reads the process environment directly.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Settings {
    #[validate(nested)]
    pub gcp: GcpSettings,
    #[validate(nested)]
    pub models: ModelSettings,
    #[validate(nested)]
    pub image: ImageSettings,
    #[validate(nested)]
    pub inference: InferenceServiceSettings,
    #[validate(nested)]
    pub management: ManagementServiceSettings,
    #[validate(nested)]
    pub trigger_function: TriggerFunctionSettings,
    #[validate(nested)]
    pub status_function: StatusFunctionSettings,
    pub ci: CiSettings,
    #[validate(nested)]
    pub deploy: DeploySettings,
    #[validate(nested)]
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct GcpSettings {
    #[validate(length(min = 1, message = "gcp.project must be set"))]
    pub project: String,
    #[validate(length(min = 1))]
    pub region: String,
    /// Pre-issued OAuth access token, takes precedence over everything else
    pub access_token: Option<String>,
    /// Service account key used for the JWT bearer flow
    pub credentials_file: Option<PathBuf>,
    pub run_endpoint: String,
    pub functions_endpoint: String,
    pub http_timeout_secs: u64,
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            project: String::new(),
            region: "us-central1".to_string(),
            access_token: None,
            credentials_file: None,
            run_endpoint: "https://run.googleapis.com".to_string(),
            functions_endpoint: "https://cloudfunctions.googleapis.com".to_string(),
            http_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ModelSettings {
    pub dir: PathBuf,
    #[validate(length(min = 1))]
    pub extension: String,
    /// Whitespace-separated list the resolved set must match (legacy `MODELS`)
    pub expected: Option<String>,
    #[validate(length(min = 1))]
    pub pull_command: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/models"),
            extension: "pt".to_string(),
            expected: None,
            pull_command: "dvc pull data/models.dvc -f".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ImageSettings {
    /// Full image reference; derived from project and region when empty
    pub tag: String,
    pub repository: String,
    pub context: PathBuf,
    #[validate(length(min = 1))]
    pub base_image: String,
    pub handler: PathBuf,
    pub inference_helper: PathBuf,
    pub etl_dir: PathBuf,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            tag: String::new(),
            repository: "crop-mask".to_string(),
            context: PathBuf::from("."),
            base_image: "pytorch/torchserve:0.5.3-cpu".to_string(),
            handler: PathBuf::from("src/torchserve_handler.py"),
            inference_helper: PathBuf::from("src/inference.py"),
            etl_dir: PathBuf::from("src/ETL"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct InferenceServiceSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub memory: String,
    pub cpu: Option<String>,
    #[validate(range(min = 1))]
    pub concurrency: u32,
    pub port: u16,
    /// Public URL override (legacy `URL`); otherwise taken from the deployed service
    pub url: Option<String>,
    pub allow_unauthenticated: bool,
}

impl Default for InferenceServiceSettings {
    fn default() -> Self {
        Self {
            name: "crop-mask".to_string(),
            memory: "8Gi".to_string(),
            cpu: Some("4".to_string()),
            concurrency: 10,
            port: 8080,
            url: None,
            allow_unauthenticated: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ManagementServiceSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub memory: String,
    pub cpu: Option<String>,
    pub allow_unauthenticated: bool,
}

impl Default for ManagementServiceSettings {
    fn default() -> Self {
        Self {
            name: "crop-mask-management-api".to_string(),
            memory: "4Gi".to_string(),
            cpu: None,
            allow_unauthenticated: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TriggerFunctionSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub entry_point: String,
    pub runtime: String,
    #[validate(length(min = 1, message = "trigger_function.bucket must be set"))]
    pub bucket: String,
    #[validate(range(min = 1, max = 540))]
    pub timeout_secs: u64,
    pub memory_mb: u32,
    pub source_dir: PathBuf,
}

impl Default for TriggerFunctionSettings {
    fn default() -> Self {
        Self {
            name: "trigger-inference".to_string(),
            entry_point: "trigger".to_string(),
            runtime: "python39".to_string(),
            bucket: String::new(),
            timeout_secs: 300,
            memory_mb: 256,
            source_dir: PathBuf::from("gcp/trigger_inference_function"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct StatusFunctionSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub entry_point: String,
    pub runtime: String,
    #[validate(length(min = 1, message = "status_function.dest_bucket must be set"))]
    pub dest_bucket: String,
    /// Overrides the host derived from the inference URL (legacy `INFERENCE_HOST`)
    pub inference_host: Option<String>,
    #[validate(range(min = 1, max = 540))]
    pub timeout_secs: u64,
    pub memory_mb: u32,
    pub source_dir: PathBuf,
    pub allow_unauthenticated: bool,
}

impl Default for StatusFunctionSettings {
    fn default() -> Self {
        Self {
            name: "export-region".to_string(),
            entry_point: "hello_http".to_string(),
            runtime: "python39".to_string(),
            dest_bucket: String::new(),
            inference_host: None,
            timeout_secs: 540,
            memory_mb: 512,
            source_dir: PathBuf::from("gcp/export_region_function"),
            allow_unauthenticated: true,
        }
    }
}

/// Commands run by the CI pipelines
///
/// Each line is split with shell quoting rules and run without a shell.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CiSettings {
    pub working_dir: PathBuf,
    pub type_check: String,
    pub lint: String,
    pub unit_test: String,
    pub data_pull: String,
    pub integration_tests: Vec<String>,
}

impl Default for CiSettings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            type_check: "mypy src scripts test".to_string(),
            lint: "flake8 src scripts test".to_string(),
            unit_test: "python -m unittest discover -s test".to_string(),
            data_pull: "dvc pull -f".to_string(),
            integration_tests: vec![
                "python -m unittest test/integration_test_labeled.py".to_string(),
                "python -m unittest test/integration_test_model_bbox.py".to_string(),
                "python -m unittest test/integration_test_model_evaluation.py".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DeploySettings {
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
    #[validate(range(min = 1))]
    pub operation_timeout_secs: u64,
    pub verify: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            operation_timeout_secs: 900,
            verify: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

/// Environment variables the old shell scripts consumed, and the key each one overrides
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("TAG", "image.tag"),
    ("BUCKET", "trigger_function.bucket"),
    ("URL", "inference.url"),
    ("MODELS", "models.expected"),
    ("DEST_BUCKET", "status_function.dest_bucket"),
    ("INFERENCE_HOST", "status_function.inference_host"),
];

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration files (config/default.toml, config/local.toml)
    /// 3. Environment variables (prefixed with CROPMASK__)
    /// 4. Legacy script variables (TAG, BUCKET, URL, MODELS, DEST_BUCKET, INFERENCE_HOST)
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        Self::finish(builder)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::from(path.as_ref()));
        Self::finish(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        // e.g., CROPMASK__GCP__PROJECT -> gcp.project
        let builder = builder.add_source(
            Environment::with_prefix("CROPMASK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        apply_legacy_env(builder, |key| std::env::var(key).ok())?
            .build()?
            .try_deserialize()
    }

    /// Image reference every build and deployment uses
    pub fn image_ref(&self) -> String {
        if !self.image.tag.is_empty() {
            return self.image.tag.clone();
        }

        format!(
            "{}-docker.pkg.dev/{}/{}/crop-mask:latest",
            self.gcp.region, self.gcp.project, self.image.repository
        )
    }

    /// Names the resolved model set is required to match, if configured
    pub fn expected_models(&self) -> Option<Vec<String>> {
        self.models
            .expected
            .as_deref()
            .map(|list| list.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|names| !names.is_empty())
    }
}

/// Layer the legacy script variables on top of the configured sources
fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (var, key) in LEGACY_ENV_OVERRIDES {
        if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Applying legacy {} override to {}", var, key);
            builder = builder.set_override(*key, value)?;
        }
    }

    Ok(builder)
}
