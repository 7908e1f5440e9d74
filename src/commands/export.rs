use crate::commands::AppContext;
use crate::config::Settings;
use crate::core::{export_identifiers, named_region, region_names, season_dates, split_into_patches, RegionError};
use crate::error::DeployError;
use crate::models::{RegionExportRequest, Season};
use chrono::NaiveDate;
use serde_json::Value;
use validator::Validate;

/// Build the export request for a named region and season window
pub fn build_export_request(
    settings: &Settings,
    region: &str,
    season: Season,
    metres_per_polygon: Option<u32>,
    today: NaiveDate,
) -> Result<RegionExportRequest, DeployError> {
    let bbox = named_region(region)?;
    let canonical = region_names()
        .into_iter()
        .find(|n| n.eq_ignore_ascii_case(region))
        .ok_or_else(|| RegionError::UnknownRegion(region.to_string()))?;

    let (start_date, end_date) = season_dates(season, today)?;
    let patch_count = match metres_per_polygon {
        Some(metres) => Some(split_into_patches(&bbox, metres)?.len()),
        None => None,
    };

    let request = RegionExportRequest {
        region_name: canonical.to_string(),
        bbox,
        start_date,
        end_date,
        dest_bucket: settings.status_function.dest_bucket.clone(),
        metres_per_polygon,
        identifiers: export_identifiers(canonical, start_date, end_date, patch_count),
    };
    request.validate()?;

    tracing::info!(
        region = canonical,
        start = %start_date,
        end = %end_date,
        "Prepared {} export task(s)",
        request.identifiers.len()
    );
    Ok(request)
}

/// Post an export request to the deployed HTTP function
pub async fn export_region(
    ctx: &AppContext,
    request: &RegionExportRequest,
    function_url: Option<String>,
) -> Result<Value, DeployError> {
    let url = match function_url {
        Some(url) => url,
        None => ctx
            .functions()
            .get_function(&ctx.settings.status_function.name)
            .await?
            .and_then(|f| f.url().map(str::to_string))
            .ok_or_else(|| {
                DeployError::Failed(format!(
                    "function {} is not deployed or has no HTTP trigger",
                    ctx.settings.status_function.name
                ))
            })?,
    };

    tracing::info!("Requesting export of {} from {}", request.region_name, url);
    let response = ctx.http.post(&url).json(request).send().await?.error_for_status()?;
    let text = response.text().await?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}
