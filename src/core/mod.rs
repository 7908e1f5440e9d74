// Core exports
pub mod image;
pub mod pipeline;
pub mod plan;
pub mod region;
pub mod resolver;

pub use image::{render_dockerfile, ImageBuild, MODEL_STORE};
pub use pipeline::{run_pipeline, Pipeline, PipelineReport, PipelineStep, StepOutcome, StepReport};
pub use plan::{DeploymentPlan, PlanSummary};
pub use region::{
    distance_metres, export_identifiers, named_region, region_names, season_dates, split_into_patches, RegionError,
};
pub use resolver::{check_expected, fingerprint, resolve_models, ResolveError};
