use crate::models::FunctionSpec;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Directories never shipped with function source
const SKIPPED_DIRS: &[&str] = &["__pycache__", ".pytest_cache", ".mypy_cache"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Function source directory {0} does not exist")]
    MissingSource(PathBuf),

    #[error("Failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Function source assembled in a temporary directory
///
/// The directory is removed when this value is dropped, whether or not the
/// deploy succeeded.
#[derive(Debug)]
pub struct StagedSource {
    dir: TempDir,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Zip the staged tree with stable ordering and timestamps
    pub fn zip(&self) -> Result<Vec<u8>, SourceError> {
        zip_dir(self.path())
    }
}

/// Copy a function's source directory and its extra sources into a fresh staging directory
pub fn stage_function_source(spec: &FunctionSpec) -> Result<StagedSource, SourceError> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", spec.name))
        .tempdir()
        .map_err(io_error(&spec.source_dir))?;

    copy_tree(&spec.source_dir, dir.path())?;
    for extra in &spec.extra_sources {
        copy_tree(&extra.from, &dir.path().join(&extra.to))?;
    }

    tracing::debug!("Staged {} source in {}", spec.name, dir.path().display());
    Ok(StagedSource { dir })
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), SourceError> {
    if !from.is_dir() {
        return Err(SourceError::MissingSource(from.to_path_buf()));
    }

    for entry in WalkDir::new(from).follow_links(true).into_iter().filter_entry(|e| !is_skipped(e)) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            fs::copy(entry.path(), &target).map_err(io_error(entry.path()))?;
        }
    }

    Ok(())
}

/// Archive every file under `root`, entries named relative to it with `/` separators
pub fn zip_dir(root: &Path) -> Result<Vec<u8>, SourceError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let contents = fs::read(entry.path()).map_err(io_error(entry.path()))?;
        writer.start_file(name, options)?;
        writer.write_all(&contents).map_err(io_error(entry.path()))?;
    }

    Ok(writer.finish()?.into_inner())
}
