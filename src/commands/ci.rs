use crate::commands::deploy::{deploy, DeployOptions};
use crate::commands::resolve::prepare_plan;
use crate::commands::AppContext;
use crate::core::{run_pipeline, Pipeline, PipelineReport};
use crate::error::DeployError;
use crate::models::DeployReport;
use serde::Serialize;

/// Checks for a pull request; fails fast on the first broken step
pub async fn pull_request(ctx: &AppContext) -> Result<PipelineReport, DeployError> {
    let pipeline = Pipeline::pull_request(&ctx.settings.ci)?;
    Ok(run_pipeline(&pipeline, ctx.runner.as_ref()).await)
}

#[derive(Debug, Serialize)]
pub struct CiDeployReport {
    pub pipeline: PipelineReport,
    pub deploy: Option<DeployReport>,
}

impl CiDeployReport {
    pub fn is_success(&self) -> bool {
        self.pipeline.is_success() && self.deploy.as_ref().map(|d| d.is_success()).unwrap_or(false)
    }
}

/// Main-branch deploy: pull the versioned models, then run the full deploy
///
/// Nothing in the cloud is touched unless the model pull succeeds.
pub async fn deploy_pipeline(ctx: &AppContext, options: DeployOptions) -> Result<CiDeployReport, DeployError> {
    let pipeline = Pipeline::deploy(&ctx.settings)?;
    let report = run_pipeline(&pipeline, ctx.runner.as_ref()).await;

    if !report.is_success() {
        return Ok(CiDeployReport {
            pipeline: report,
            deploy: None,
        });
    }

    let plan = prepare_plan(&ctx.settings)?;
    let deployed = deploy(ctx, &plan, options).await?;

    Ok(CiDeployReport {
        pipeline: report,
        deploy: Some(deployed),
    })
}
