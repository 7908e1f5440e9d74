use crate::commands::build::build_image;
use crate::commands::status::{verify, Endpoints};
use crate::commands::AppContext;
use crate::core::DeploymentPlan;
use crate::error::DeployError;
use crate::models::{DeployReport, FunctionSpec, FunctionStatus, TargetStatus};
use crate::services::stage_function_source;

pub const INFERENCE_SERVICE: &str = "inference-service";
pub const MANAGEMENT_SERVICE: &str = "management-service";
pub const TRIGGER_FUNCTION: &str = "trigger-function";
pub const STATUS_FUNCTION: &str = "status-function";

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Reuse the image already in the registry
    pub skip_build: bool,
    pub skip_verify: bool,
}

async fn deploy_function(ctx: &AppContext, spec: &FunctionSpec) -> Result<FunctionStatus, DeployError> {
    let staged = stage_function_source(spec)?;
    let archive = staged.zip()?;
    let status = ctx.functions().deploy_function(spec, archive).await?;
    Ok(status)
}

/// Record a target's outcome, keeping the value when it deployed
fn record<T>(
    report: &mut DeployReport,
    target: &str,
    result: Result<T, DeployError>,
    url: impl FnOnce(&T) -> Option<String>,
) -> Option<T> {
    match result {
        Ok(value) => {
            report.record(target, TargetStatus::Deployed { url: url(&value) });
            Some(value)
        }
        Err(e) => {
            tracing::error!(target_name = target, "Deploy failed: {}", e);
            report.record(target, TargetStatus::Failed { error: e.to_string() });
            None
        }
    }
}

/// Build the image and roll it out to both services and both functions
///
/// The image build failing is fatal. After that every target is attempted
/// and its outcome recorded; the functions need an inference URL, so they are
/// skipped when the inference service failed and no URL is configured.
pub async fn deploy(ctx: &AppContext, plan: &DeploymentPlan, options: DeployOptions) -> Result<DeployReport, DeployError> {
    let mut report = DeployReport::new(plan.run_id(), plan.image().to_string(), plan.models_arg());
    tracing::info!(run_id = %report.run_id, image = %plan.image(), models = %plan.models_arg(), "Starting deploy");

    if options.skip_build {
        tracing::info!("Skipping image build, deploying existing {}", plan.image());
    } else {
        build_image(ctx, plan, true).await?;
    }

    let run = ctx.cloud_run();

    let inference = run
        .deploy_service(&plan.inference_service())
        .await
        .map_err(DeployError::from);
    let inference = record(&mut report, INFERENCE_SERVICE, inference, |s| s.uri.clone());

    let management = run
        .deploy_service(&plan.management_service())
        .await
        .map_err(DeployError::from);
    let management = record(&mut report, MANAGEMENT_SERVICE, management, |s| s.uri.clone());

    let inference_url = plan
        .settings()
        .inference
        .url
        .clone()
        .or_else(|| inference.as_ref().and_then(|s| s.uri.clone()));

    let mut status_function_url = None;
    match &inference_url {
        Some(url) => {
            let trigger = deploy_function(ctx, &plan.trigger_function(url)).await;
            record(&mut report, TRIGGER_FUNCTION, trigger, |_| None);

            let status = deploy_function(ctx, &plan.status_function(url)).await;
            status_function_url = record(&mut report, STATUS_FUNCTION, status, |f| f.url().map(str::to_string))
                .and_then(|f| f.url().map(str::to_string));
        }
        None => {
            let reason = if inference.is_none() {
                "inference service failed to deploy"
            } else {
                "inference service has no URL"
            };
            for target in [TRIGGER_FUNCTION, STATUS_FUNCTION] {
                tracing::warn!(target_name = target, "Skipping: {}", reason);
                report.record(target, TargetStatus::Skipped { reason: reason.to_string() });
            }
        }
    }

    if plan.settings().deploy.verify && !options.skip_verify && inference_url.is_some() {
        let endpoints = Endpoints {
            inference: inference_url,
            management: management.and_then(|s| s.uri),
            status_function: status_function_url,
        };
        report.verification = Some(verify(ctx, plan.models(), &endpoints).await);
    }

    report.finished_at = Some(chrono::Utc::now());

    if report.is_success() {
        tracing::info!(run_id = %report.run_id, "Deploy finished");
    } else {
        tracing::error!(run_id = %report.run_id, "Deploy finished with failures");
    }

    Ok(report)
}
