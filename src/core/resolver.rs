use crate::models::{ModelArtifact, ModelSet};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while resolving the local model set
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Model directory {0} does not exist; pull the versioned models first")]
    MissingDir(PathBuf),

    #[error("No .{extension} model files found in {dir}")]
    NoModels { dir: PathBuf, extension: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} has extension .{found}, model files must end in .{expected}")]
    ExtensionCase {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("Model file {0} is not a valid model name; use ASCII letters, digits, '_', '-' or '.'")]
    InvalidName(PathBuf),

    #[error("Resolved models [{resolved}] do not match expected [{expected}]")]
    Skew { resolved: String, expected: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResolveError + '_ {
    move |source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Enumerate the model files in `dir` and derive the canonical model set
///
/// Only regular files directly inside `dir` whose extension equals
/// `extension` (leading dot optional) are kept. The image build reads
/// `models/<name>.<extension>` for every name, so an extension differing only
/// in case is rejected, as is any stem that would not survive being split out
/// of the whitespace-joined `MODELS` value. A missing directory or one
/// without any matching file is an error; an empty set is never returned.
pub fn resolve_models(dir: &Path, extension: &str) -> Result<ModelSet, ResolveError> {
    if !dir.is_dir() {
        return Err(ResolveError::MissingDir(dir.to_path_buf()));
    }

    let wanted = extension.trim_start_matches('.');
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        // follows symlinks, DVC may link files out of its cache
        let metadata = fs::metadata(&path).map_err(io_error(&path))?;

        if !metadata.is_file() {
            continue;
        }

        let Some(found) = path.extension().map(|e| e.to_string_lossy().into_owned()) else {
            continue;
        };
        if found != wanted {
            if found.eq_ignore_ascii_case(wanted) {
                return Err(ResolveError::ExtensionCase {
                    path,
                    found,
                    expected: wanted.to_string(),
                });
            }
            continue;
        }

        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(name) if is_valid_name(name) => name,
            _ => return Err(ResolveError::InvalidName(path)),
        };

        artifacts.push(ModelArtifact {
            name: name.to_string(),
            size_bytes: metadata.len(),
            path,
        });
    }

    let set = ModelSet::new(artifacts);
    if set.is_empty() {
        return Err(ResolveError::NoModels {
            dir: dir.to_path_buf(),
            extension: wanted.to_string(),
        });
    }

    tracing::info!("Resolved {} models from {}: {}", set.len(), dir.display(), set);
    Ok(set)
}

/// A name TorchServe accepts and the Dockerfile's `for m in $MODELS` loop
/// reads back unchanged
fn is_valid_name(name: &str) -> bool {
    name.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Fail when the resolved set differs from an explicitly expected name list
pub fn check_expected(set: &ModelSet, expected: &[String]) -> Result<(), ResolveError> {
    let mut expected_sorted: Vec<&str> = expected.iter().map(String::as_str).collect();
    expected_sorted.sort_unstable();
    expected_sorted.dedup();

    if set.names() != expected_sorted {
        return Err(ResolveError::Skew {
            resolved: set.as_arg(),
            expected: expected_sorted.join(" "),
        });
    }

    Ok(())
}

/// SHA-256 over every artifact's name and bytes, in name order
///
/// Any change to model data changes the digest, which is what invalidates
/// the image build cache for the archiving layer.
pub fn fingerprint(set: &ModelSet) -> Result<String, ResolveError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    for artifact in set.artifacts() {
        hasher.update(artifact.name.as_bytes());
        hasher.update([0u8]);

        let mut file = fs::File::open(&artifact.path).map_err(io_error(&artifact.path))?;
        loop {
            let n = file.read(&mut buf).map_err(io_error(&artifact.path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        hasher.update([0u8]);
    }

    Ok(hex::encode(hasher.finalize()))
}
