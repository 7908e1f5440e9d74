// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{BoundingBox, ExtraSource, FunctionSpec, FunctionTrigger, ModelArtifact, ModelSet, Season, ServiceSpec, TargetStatus};
pub use requests::{CloudFunction, IamPolicy, RegionExportRequest, RunService, SetIamPolicyRequest};
pub use responses::{DeployReport, FunctionStatus, Operation, RunServiceStatus, TargetReport, UploadUrlResponse, VerificationReport};
