use crate::commands::plan::OutputFormat;
use crate::models::Season;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Build and deploy the crop-mask inference service
#[derive(Debug, Parser)]
#[command(name = "crop-mask-deploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file; config/default.toml and config/local.toml otherwise
    #[arg(short, long, global = true, env = "CROPMASK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format, overrides logging.format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_setting(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the local model files every target will receive
    Resolve,

    /// Show the image and deployment parameters without changing anything
    Plan {
        #[arg(short, long, value_enum, default_value = "toml")]
        output: OutputFormat,
    },

    /// Build the serving image
    Build {
        /// Push the image after building
        #[arg(long)]
        push: bool,

        /// Print the rendered Dockerfile instead of building
        #[arg(long)]
        print_dockerfile: bool,
    },

    /// Build, push and deploy both services and both functions
    Deploy(DeployArgs),

    /// Check the live deployment against the local model set
    Status,

    /// Ask the deployed HTTP function to export imagery for a region
    ExportRegion(ExportArgs),

    /// CI pipelines
    #[command(subcommand)]
    Ci(CiCommand),
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// Deploy the image already in the registry
    #[arg(long)]
    pub skip_build: bool,

    /// Skip the post-deploy health and model checks
    #[arg(long)]
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Named region, e.g. Kenya or Togo
    pub region: String,

    #[arg(long, value_enum, default_value = "in-season")]
    pub season: Season,

    /// Split the region into patches of at most this many metres per side
    #[arg(long)]
    pub metres_per_polygon: Option<u32>,

    /// Date the season window is computed from, today by default
    #[arg(long)]
    pub today: Option<NaiveDate>,

    /// Function URL; looked up from the deployed function otherwise
    #[arg(long)]
    pub url: Option<String>,

    /// Print the request without sending it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum CiCommand {
    /// Type checks, lint, unit tests, data pull and integration tests
    PullRequest,

    /// Model pull followed by a full deploy
    Deploy(DeployArgs),
}
