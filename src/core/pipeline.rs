use crate::config::{CiSettings, Settings};
use crate::services::runner::{CommandRunner, CommandSpec, RunnerError};
use serde::Serialize;

/// One named command in a CI pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub name: String,
    pub command: CommandSpec,
}

/// Ordered list of steps, run fail-fast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub name: String,
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    fn step(ci: &CiSettings, name: impl Into<String>, line: &str) -> Result<PipelineStep, RunnerError> {
        Ok(PipelineStep {
            name: name.into(),
            command: CommandSpec::parse(line)?.current_dir(&ci.working_dir).streaming(),
        })
    }

    /// Checks run on every pull request
    ///
    /// Static checks and unit tests come first, then the versioned data is
    /// pulled for the integration tests.
    pub fn pull_request(ci: &CiSettings) -> Result<Self, RunnerError> {
        let mut steps = vec![
            Self::step(ci, "type-check", &ci.type_check)?,
            Self::step(ci, "lint", &ci.lint)?,
            Self::step(ci, "unit-tests", &ci.unit_test)?,
            Self::step(ci, "data-pull", &ci.data_pull)?,
        ];

        for (i, line) in ci.integration_tests.iter().enumerate() {
            steps.push(Self::step(ci, format!("integration-test-{}", i + 1), line)?);
        }

        Ok(Self {
            name: "pull-request".to_string(),
            steps,
        })
    }

    /// Steps that must pass on the main branch before anything is deployed
    pub fn deploy(settings: &Settings) -> Result<Self, RunnerError> {
        Ok(Self {
            name: "deploy".to_string(),
            steps: vec![Self::step(&settings.ci, "model-pull", &settings.models.pull_command)?],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub command: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub steps: Vec<StepReport>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == StepOutcome::Passed)
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
    }
}

/// Run every step in order; after the first failure the rest are skipped
pub async fn run_pipeline(pipeline: &Pipeline, runner: &dyn CommandRunner) -> PipelineReport {
    let mut failed = false;
    let mut steps = Vec::with_capacity(pipeline.steps.len());

    for step in &pipeline.steps {
        let outcome = if failed {
            StepOutcome::Skipped
        } else {
            tracing::info!(pipeline = %pipeline.name, step = %step.name, "Running step");
            match runner.run_checked(&step.command).await {
                Ok(_) => StepOutcome::Passed,
                Err(e) => {
                    tracing::error!(pipeline = %pipeline.name, step = %step.name, "Step failed: {}", e);
                    failed = true;
                    StepOutcome::Failed { error: e.to_string() }
                }
            }
        };

        steps.push(StepReport {
            name: step.name.clone(),
            command: step.command.to_string(),
            outcome,
        });
    }

    PipelineReport {
        pipeline: pipeline.name.clone(),
        steps,
    }
}
