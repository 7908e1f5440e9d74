use crate::core::image::ImageBuild;
use crate::services::runner::{CommandRunner, CommandSpec, RunnerError};
use std::sync::Arc;

/// Username Artifact Registry expects alongside an OAuth access token
const OAUTH_USER: &str = "oauth2accesstoken";

/// Drives the docker CLI through a `CommandRunner`
pub struct DockerClient {
    runner: Arc<dyn CommandRunner>,
}

/// Registry host of an image reference, if it names one
pub fn registry_host(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
}

impl DockerClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Log in to the image's registry; the token goes through stdin, never argv
    pub async fn login(&self, image: &str, access_token: &str) -> Result<(), RunnerError> {
        let Some(registry) = registry_host(image) else {
            tracing::debug!("{} has no registry host, skipping login", image);
            return Ok(());
        };

        let spec = CommandSpec::new("docker")
            .args(["login", "-u", OAUTH_USER, "--password-stdin"])
            .arg(registry)
            .stdin(access_token);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    pub fn build_command(build: &ImageBuild) -> CommandSpec {
        // bind mounts in the rendered Dockerfile need BuildKit
        let mut spec = CommandSpec::new("docker")
            .args(["build", "-f", "-"])
            .env("DOCKER_BUILDKIT", "1");

        for (key, value) in &build.build_args {
            spec = spec.arg("--build-arg").arg(format!("{}={}", key, value));
        }
        for (key, value) in &build.labels {
            spec = spec.arg("--label").arg(format!("{}={}", key, value));
        }

        spec.arg("-t")
            .arg(&build.image)
            .arg(build.context.to_string_lossy())
            .stdin(build.dockerfile.clone())
            .streaming()
    }

    /// Build the image with the rendered Dockerfile on stdin
    pub async fn build(&self, build: &ImageBuild) -> Result<(), RunnerError> {
        tracing::info!("Building {}", build.image);
        self.runner.run_checked(&Self::build_command(build)).await?;
        Ok(())
    }

    pub async fn push(&self, image: &str) -> Result<(), RunnerError> {
        tracing::info!("Pushing {}", image);
        let spec = CommandSpec::new("docker").args(["push", image]).streaming();
        self.runner.run_checked(&spec).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runner::CommandOutput;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
            self.seen.lock().unwrap().push(spec.clone());
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    fn image_build() -> ImageBuild {
        let mut build_args = BTreeMap::new();
        build_args.insert("MODELS".to_string(), "Kenya Rwanda".to_string());
        build_args.insert("MODELS_DIGEST".to_string(), "abc".to_string());
        ImageBuild {
            image: "us-central1-docker.pkg.dev/p/crop-mask/crop-mask:latest".to_string(),
            context: PathBuf::from("."),
            dockerfile: "FROM pytorch/torchserve\n".to_string(),
            build_args,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("us-central1-docker.pkg.dev/p/r/i:latest"), Some("us-central1-docker.pkg.dev"));
        assert_eq!(registry_host("localhost/crop-mask"), Some("localhost"));
        assert_eq!(registry_host("library/ubuntu"), None);
        assert_eq!(registry_host("crop-mask"), None);
    }

    #[test]
    fn test_build_command() {
        let spec = DockerClient::build_command(&image_build());
        assert_eq!(
            spec.args,
            vec![
                "build",
                "-f",
                "-",
                "--build-arg",
                "MODELS=Kenya Rwanda",
                "--build-arg",
                "MODELS_DIGEST=abc",
                "-t",
                "us-central1-docker.pkg.dev/p/crop-mask/crop-mask:latest",
                ".",
            ]
        );
        assert_eq!(spec.stdin.as_deref(), Some("FROM pytorch/torchserve\n"));
        assert_eq!(spec.env["DOCKER_BUILDKIT"], "1");
    }

    #[tokio::test]
    async fn test_login_passes_token_on_stdin() {
        let recorder = Arc::new(Recorder::default());
        let docker = DockerClient::new(recorder.clone());
        docker
            .login("us-central1-docker.pkg.dev/p/crop-mask/crop-mask:latest", "ya29.secret")
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].to_string().contains("ya29.secret"));
        assert_eq!(seen[0].stdin.as_deref(), Some("ya29.secret"));
    }
}
