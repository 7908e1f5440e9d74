use crate::commands::AppContext;
use crate::error::DeployError;
use crate::models::{ModelSet, VerificationReport};
use serde_json::Value;

/// URLs of the deployed endpoints a verification run checks
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub inference: Option<String>,
    pub management: Option<String>,
    pub status_function: Option<String>,
}

/// Look up the live endpoint URLs, preferring the configured inference URL
pub async fn discover_endpoints(ctx: &AppContext) -> Result<Endpoints, DeployError> {
    let run = ctx.cloud_run();
    let settings = &ctx.settings;

    let inference = match &settings.inference.url {
        Some(url) => Some(url.clone()),
        None => run.get_service(&settings.inference.name).await?.and_then(|s| s.uri),
    };
    let management = run
        .get_service(&settings.management.name)
        .await?
        .and_then(|s| s.uri);
    let status_function = ctx
        .functions()
        .get_function(&settings.status_function.name)
        .await?
        .and_then(|f| f.url().map(str::to_string));

    Ok(Endpoints {
        inference,
        management,
        status_function,
    })
}

/// Compare the live deployment against the expected model set
///
/// Check failures are collected into the report rather than returned, so
/// one unreachable endpoint does not hide the state of the others.
pub async fn verify(ctx: &AppContext, models: &ModelSet, endpoints: &Endpoints) -> VerificationReport {
    let torchserve = ctx.torchserve();
    let mut report = VerificationReport::default();

    match &endpoints.inference {
        Some(url) => match torchserve.ping(url).await {
            Ok(healthy) => report.inference_healthy = healthy,
            Err(e) => report.errors.push(format!("inference ping: {}", e)),
        },
        None => report.errors.push("inference service has no URL".to_string()),
    }

    match &endpoints.management {
        Some(url) => match torchserve.list_models(url).await {
            Ok(registered) => {
                report.missing_models = models
                    .names()
                    .into_iter()
                    .filter(|name| !registered.iter().any(|r| r == name))
                    .map(str::to_string)
                    .collect();
                report.unexpected_models = registered
                    .iter()
                    .filter(|r| !models.contains(r))
                    .cloned()
                    .collect();
                report.registered_models = registered;
            }
            Err(e) => report.errors.push(format!("management models: {}", e)),
        },
        None => report.errors.push("management service has no URL".to_string()),
    }

    if let Some(url) = &endpoints.status_function {
        match check_status_function(ctx, url).await {
            Ok(value) => report.status_function = Some(value),
            Err(e) => report.errors.push(format!("status function: {}", e)),
        }
    }

    if report.is_healthy() {
        tracing::info!("Deployment healthy, {} models registered", report.registered_models.len());
    } else {
        tracing::warn!(
            missing = ?report.missing_models,
            errors = ?report.errors,
            "Deployment verification failed"
        );
    }

    report
}

async fn check_status_function(ctx: &AppContext, url: &str) -> Result<Value, reqwest::Error> {
    let response = ctx.http.get(url).send().await?.error_for_status()?;
    let text = response.text().await?;
    // plain-text replies are kept as a JSON string
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}
