use crate::core::DeploymentPlan;
use crate::error::DeployError;
use clap::ValueEnum;

/// Shown in place of the inference URL before the service exists
pub const PENDING_URL: &str = "<inference service url>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Toml,
    Json,
}

/// Render what a deploy would do without touching anything
pub fn render_plan(plan: &DeploymentPlan, format: OutputFormat) -> Result<String, DeployError> {
    let url = plan
        .settings()
        .inference
        .url
        .clone()
        .unwrap_or_else(|| PENDING_URL.to_string());
    let summary = plan.summary(&url);

    Ok(match format {
        OutputFormat::Toml => toml::to_string_pretty(&summary)?,
        OutputFormat::Json => serde_json::to_string_pretty(&summary)?,
    })
}
