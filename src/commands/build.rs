use crate::commands::AppContext;
use crate::core::{DeploymentPlan, ImageBuild};
use crate::error::DeployError;

/// Build the serving image for a plan, optionally pushing it to the registry
pub async fn build_image(ctx: &AppContext, plan: &DeploymentPlan, push: bool) -> Result<ImageBuild, DeployError> {
    let build = ImageBuild::from_plan(plan);
    let docker = ctx.docker();

    tracing::info!(
        image = %build.image,
        models = %plan.models_arg(),
        "Building image with {} models",
        plan.models().len()
    );
    docker.build(&build).await?;

    if push {
        let token = ctx.tokens.access_token().await?;
        docker.login(&build.image, &token).await?;
        docker.push(&build.image).await?;
    }

    Ok(build)
}
