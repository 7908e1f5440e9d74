use crate::config::Settings;
use crate::core::{check_expected, fingerprint, resolve_models, DeploymentPlan, ResolveError};
use crate::models::ModelSet;
use serde::Serialize;

/// Resolve the local model set and check it against any expected list
pub fn resolve(settings: &Settings) -> Result<ModelSet, ResolveError> {
    let set = resolve_models(&settings.models.dir, &settings.models.extension)?;

    if let Some(expected) = settings.expected_models() {
        check_expected(&set, &expected)?;
    }

    Ok(set)
}

/// Resolve once and build the plan every later step reads from
pub fn prepare_plan(settings: &Settings) -> Result<DeploymentPlan, ResolveError> {
    let models = resolve(settings)?;
    let digest = fingerprint(&models)?;
    tracing::debug!("Model set digest {}", digest);
    Ok(DeploymentPlan::new(settings, models, digest))
}

#[derive(Debug, Serialize)]
pub struct ResolveOutput {
    pub models: String,
    pub count: usize,
    pub total_size_bytes: u64,
    pub digest: String,
}

impl ResolveOutput {
    pub fn from_plan(plan: &DeploymentPlan) -> Self {
        Self {
            models: plan.models_arg(),
            count: plan.models().len(),
            total_size_bytes: plan.models().total_size_bytes(),
            digest: plan.models_digest().to_string(),
        }
    }
}
