use clap::Parser;
use crop_mask_deploy::cli::{CiCommand, Cli, Command, LogFormat};
use crop_mask_deploy::commands::{build, ci, deploy, export, plan, resolve, status, AppContext};
use crop_mask_deploy::config::Settings;
use crop_mask_deploy::core::ImageBuild;
use crop_mask_deploy::error::DeployError;
use crop_mask_deploy::services::ProcessRunner;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::Validate;

fn init_logging(settings: &Settings, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DeployError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Validate settings and build the context for commands that talk to the cloud
fn cloud_context(settings: Settings) -> Result<AppContext, DeployError> {
    settings.validate()?;
    AppContext::new(settings, Arc::new(ProcessRunner))
}

async fn run(command: Command, settings: Settings) -> Result<bool, DeployError> {
    match command {
        Command::Resolve => {
            let plan = resolve::prepare_plan(&settings)?;
            print_json(&resolve::ResolveOutput::from_plan(&plan))?;
            Ok(true)
        }
        Command::Plan { output } => {
            let deployment = resolve::prepare_plan(&settings)?;
            println!("{}", plan::render_plan(&deployment, output)?);
            Ok(true)
        }
        Command::Build { push, print_dockerfile } => {
            let plan = resolve::prepare_plan(&settings)?;
            if print_dockerfile {
                print!("{}", ImageBuild::from_plan(&plan).dockerfile);
                return Ok(true);
            }

            let ctx = if push {
                cloud_context(settings)?
            } else {
                AppContext::new(settings, Arc::new(ProcessRunner))?
            };
            let image = build::build_image(&ctx, &plan, push).await?;
            info!("Built {}", image.image);
            Ok(true)
        }
        Command::Deploy(args) => {
            let plan = resolve::prepare_plan(&settings)?;
            let ctx = cloud_context(settings)?;
            let options = deploy::DeployOptions {
                skip_build: args.skip_build,
                skip_verify: args.skip_verify,
            };
            let report = deploy::deploy(&ctx, &plan, options).await?;
            print_json(&report)?;
            Ok(report.is_success())
        }
        Command::Status => {
            let models = resolve::resolve(&settings)?;
            let ctx = cloud_context(settings)?;
            let endpoints = status::discover_endpoints(&ctx).await?;
            let report = status::verify(&ctx, &models, &endpoints).await;
            print_json(&report)?;
            Ok(report.is_healthy())
        }
        Command::ExportRegion(args) => {
            let today = args.today.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let request =
                export::build_export_request(&settings, &args.region, args.season, args.metres_per_polygon, today)?;

            if args.dry_run {
                print_json(&request)?;
                return Ok(true);
            }

            let ctx = cloud_context(settings)?;
            let response = export::export_region(&ctx, &request, args.url).await?;
            print_json(&response)?;
            Ok(true)
        }
        Command::Ci(CiCommand::PullRequest) => {
            let ctx = AppContext::new(settings, Arc::new(ProcessRunner))?;
            let report = ci::pull_request(&ctx).await?;
            print_json(&report)?;
            Ok(report.is_success())
        }
        Command::Ci(CiCommand::Deploy(args)) => {
            let ctx = cloud_context(settings)?;
            let options = deploy::DeployOptions {
                skip_build: args.skip_build,
                skip_verify: args.skip_verify,
            };
            let report = ci::deploy_pipeline(&ctx, options).await?;
            print_json(&report)?;
            Ok(report.is_success())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    let fallback = Settings::default();
    let log_settings = loaded.as_ref().unwrap_or(&fallback);
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_setting(&log_settings.logging.format));
    init_logging(log_settings, format);

    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(cli.command, settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
