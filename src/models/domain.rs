use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A serialized model file synced from the versioned data store
///
/// Identified by its filename stem; the stem is the name TorchServe registers
/// the archived model under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Canonical model list for one deployment
///
/// Artifacts are kept sorted by name, so two resolutions of the same
/// directory always compare equal. Names are unique because they are the
/// stems of files in one directory sharing one extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSet {
    artifacts: Vec<ModelArtifact>,
}

impl ModelSet {
    pub fn new(mut artifacts: Vec<ModelArtifact>) -> Self {
        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &[ModelArtifact] {
        &self.artifacts
    }

    pub fn names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.iter().any(|a| a.name == name)
    }

    /// Whitespace-separated name list, the `MODELS` value every target receives
    pub fn as_arg(&self) -> String {
        self.names().join(" ")
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }
}

impl fmt::Display for ModelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_arg())
    }
}

/// Geographic bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Growing season window used to pick export dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Season {
    /// From the start of the current season up to today
    InSeason,
    /// The last complete season
    PostSeason,
}

/// Desired state of one Cloud Run service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub memory: String,
    pub cpu: Option<String>,
    /// Max concurrent requests per instance; `None` keeps the platform default
    pub concurrency: Option<u32>,
    /// Container port; `None` keeps the platform default
    pub port: Option<u16>,
    pub allow_unauthenticated: bool,
    pub env: BTreeMap<String, String>,
    /// Annotations on the revision template; a change forces a new revision
    #[serde(default)]
    pub revision_annotations: BTreeMap<String, String>,
}

/// What invokes a Cloud Function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionTrigger {
    /// Fires when an object is written to the bucket
    StorageFinalize { bucket: String },
    Http,
}

impl FunctionTrigger {
    pub const FINALIZE_EVENT: &'static str = "google.storage.object.finalize";
}

/// Directory copied into a function's staged source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraSource {
    pub from: PathBuf,
    /// Destination relative to the staged source root
    pub to: PathBuf,
}

/// Desired state of one Cloud Function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub entry_point: String,
    pub runtime: String,
    pub timeout_secs: u64,
    pub memory_mb: u32,
    pub source_dir: PathBuf,
    pub allow_unauthenticated: bool,
    pub extra_sources: Vec<ExtraSource>,
    pub trigger: FunctionTrigger,
    pub env: BTreeMap<String, String>,
}

/// Outcome of deploying a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Deployed { url: Option<String> },
    Failed { error: String },
    Skipped { reason: String },
}

impl TargetStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, TargetStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> ModelArtifact {
        ModelArtifact {
            name: name.to_string(),
            path: PathBuf::from(format!("data/models/{}.pt", name)),
            size_bytes: 10,
        }
    }

    #[test]
    fn test_model_set_sorts() {
        let set = ModelSet::new(vec![artifact("model_b"), artifact("model_a")]);
        assert_eq!(set.names(), vec!["model_a", "model_b"]);
        assert_eq!(set.as_arg(), "model_a model_b");
        assert_eq!(set.total_size_bytes(), 20);
    }

    #[test]
    fn test_empty_model_set() {
        let set = ModelSet::default();
        assert!(set.is_empty());
        assert_eq!(set.as_arg(), "");
    }
}
