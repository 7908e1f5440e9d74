use crate::core::plan::DeploymentPlan;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory inside the image where TorchServe model archives are exported
pub const MODEL_STORE: &str = "/home/model-server/model-store";

const MODEL_SERVER_HOME: &str = "/home/model-server";

/// Everything needed to build the serving image, independent of how it is built
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuild {
    pub image: String,
    pub context: PathBuf,
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageBuild {
    pub fn from_plan(plan: &DeploymentPlan) -> Self {
        let mut build_args = BTreeMap::new();
        build_args.insert("MODELS".to_string(), plan.models_arg());
        build_args.insert("MODELS_DIGEST".to_string(), plan.models_digest().to_string());

        let mut labels = BTreeMap::new();
        labels.insert("crop-mask.models".to_string(), plan.models_arg());
        labels.insert("crop-mask.models-digest".to_string(), plan.models_digest().to_string());

        Self {
            image: plan.image().to_string(),
            context: plan.settings().image.context.clone(),
            dockerfile: render_dockerfile(plan),
            build_args,
            labels,
        }
    }
}

/// Path as written in a Dockerfile `COPY`, relative to the build context
fn context_path(context: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(context).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Render the serving image Dockerfile
///
/// Models are archived once per name in `$MODELS` during the build. The
/// weights are bind-mounted into that single step, so only the `.mar`
/// archives end up in a layer. Any change to the mounted files or to the
/// digest arg reruns it.
pub fn render_dockerfile(plan: &DeploymentPlan) -> String {
    let settings = plan.settings();
    let context = &settings.image.context;
    let ext = settings.models.extension.trim_start_matches('.');

    let mut lines = vec![
        "# syntax=docker/dockerfile:1".to_string(),
        format!("FROM {}", settings.image.base_image),
        "USER root".to_string(),
        format!("WORKDIR {}", MODEL_SERVER_HOME),
        "ARG MODELS".to_string(),
        "ARG MODELS_DIGEST".to_string(),
        format!("COPY {} src/ETL", context_path(context, &settings.image.etl_dir)),
        format!("COPY {} inference.py", context_path(context, &settings.image.inference_helper)),
        format!("COPY {} handler.py", context_path(context, &settings.image.handler)),
        format!(
            "RUN --mount=type=bind,source={},target=models \\",
            context_path(context, &settings.models.dir)
        ),
        format!("    echo \"models digest $MODELS_DIGEST\" && mkdir -p {} && for m in $MODELS; do \\", MODEL_STORE),
        "      torch-model-archiver --model-name \"$m\" --version 1.0 \\".to_string(),
        format!("        --serialized-file \"models/$m.{}\" \\", ext),
        "        --handler handler.py --extra-files inference.py \\".to_string(),
        format!("        --export-path {} || exit 1; \\", MODEL_STORE),
        "    done".to_string(),
        format!(
            "RUN printf 'enable_envvars_config=true\\ninference_address=http://0.0.0.0:8080\\nmanagement_address=http://0.0.0.0:8081\\nmodel_store={}\\nload_models=all\\n' > config.properties",
            MODEL_STORE
        ),
        "RUN chown -R model-server model-store config.properties".to_string(),
        "USER model-server".to_string(),
        "CMD [\"serve\"]".to_string(),
    ];
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::{ModelArtifact, ModelSet};

    fn plan(names: &[&str], digest: &str) -> DeploymentPlan {
        let mut settings = Settings::default();
        settings.image.tag = "registry/crop-mask:latest".to_string();
        let models = ModelSet::new(
            names
                .iter()
                .map(|n| ModelArtifact {
                    name: n.to_string(),
                    path: PathBuf::from(format!("data/models/{}.pt", n)),
                    size_bytes: 1,
                })
                .collect(),
        );
        DeploymentPlan::new(&settings, models, digest.to_string())
    }

    #[test]
    fn test_build_args_carry_models() {
        let build = ImageBuild::from_plan(&plan(&["model_b", "model_a"], "abc"));
        assert_eq!(build.build_args["MODELS"], "model_a model_b");
        assert_eq!(build.build_args["MODELS_DIGEST"], "abc");
        assert_eq!(build.image, "registry/crop-mask:latest");
    }

    #[test]
    fn test_dockerfile_is_reproducible() {
        let a = ImageBuild::from_plan(&plan(&["model_a", "model_b"], "abc"));
        let b = ImageBuild::from_plan(&plan(&["model_b", "model_a"], "abc"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_dockerfile_layout() {
        let dockerfile = render_dockerfile(&plan(&["model_a"], "abc"));
        let digest_pos = dockerfile.find("ARG MODELS_DIGEST").unwrap();
        let mount_pos = dockerfile.find("RUN --mount=type=bind,source=data/models,target=models").unwrap();

        assert!(digest_pos < mount_pos);
        assert!(dockerfile.starts_with("# syntax=docker/dockerfile:1\nFROM pytorch/torchserve"));
        assert!(dockerfile.contains("--serialized-file \"models/$m.pt\""));
        assert!(dockerfile.contains(MODEL_STORE));
    }

    #[test]
    fn test_weights_never_copied_into_a_layer() {
        let dockerfile = render_dockerfile(&plan(&["model_a"], "abc"));
        assert!(!dockerfile.contains("COPY data/models"));
        assert!(!dockerfile.contains("rm -rf models"));
        assert_eq!(dockerfile.matches("models/$m.pt").count(), 1);
    }

    #[test]
    fn test_context_path_strips_prefix() {
        assert_eq!(context_path(Path::new("repo"), Path::new("repo/src/ETL")), "src/ETL");
        assert_eq!(context_path(Path::new("."), Path::new("data/models")), "data/models");
    }
}
