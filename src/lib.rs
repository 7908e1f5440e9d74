//! crop-mask-deploy - build and deployment workflow for the crop-mask inference service
//!
//! Resolves the locally synced model files into one model set, bakes them into
//! a TorchServe image and rolls that image out to two Cloud Run services and
//! two Cloud Functions, all parametrized by the same `MODELS` list.

pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use crate::core::{resolve_models, DeploymentPlan, ImageBuild};
pub use error::DeployError;
pub use models::{DeployReport, ModelArtifact, ModelSet};
