// Service exports
pub mod auth;
pub mod cloud_run;
pub mod docker;
pub mod functions;
pub mod gcp;
pub mod retry;
pub mod runner;
pub mod source;
pub mod torchserve;

pub use auth::{AuthError, CredentialSource, ServiceAccountKey, TokenProvider};
pub use cloud_run::CloudRunClient;
pub use docker::DockerClient;
pub use functions::CloudFunctionsClient;
pub use gcp::{GcpClient, GcpError};
pub use retry::{RetryPolicy, Retryable};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, RunnerError};
pub use source::{stage_function_source, SourceError, StagedSource};
pub use torchserve::{TorchServeClient, TorchServeError};
