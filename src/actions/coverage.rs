//! `upload-coverage`: collect coverage reports and forward them to a sink

use super::{Action, ActionContext, ActionError, ActionOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File names recognised as coverage reports
pub const COVERAGE_FILE_NAMES: &[&str] = &[
    "coverage.xml",
    "coverage.json",
    ".coverage",
    "lcov.info",
    "coverage.lcov",
    "cobertura.xml",
];

/// Directories never searched for reports
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Default sink directory, relative to the working directory
pub const DEFAULT_DESTINATION: &str = ".pipeline/coverage";

/// Find coverage reports under `root`, skipping `exclude` and the usual
/// build/VCS directories. Symlinked directories are not followed.
pub fn discover(root: &Path, exclude: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if root.is_dir() {
        walk(root, exclude, &mut found)?;
    }
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, exclude: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_ref()) || path == exclude {
                continue;
            }
            walk(&path, exclude, found)?;
        } else if COVERAGE_FILE_NAMES.contains(&name.as_ref()) {
            found.push(path);
        }
    }
    Ok(())
}

/// Destination for collected coverage reports
#[async_trait]
pub trait CoverageSink: Send + Sync {
    fn describe(&self) -> String;

    /// Forward `files` (found under `root`), returning a log of what was done
    async fn forward(
        &self,
        ctx: &ActionContext<'_>,
        root: &Path,
        files: &[PathBuf],
    ) -> Result<String, ActionError>;
}

/// Copies reports into a directory, keeping their layout relative to the
/// search root
#[derive(Debug, Clone)]
pub struct DirectorySink {
    destination: PathBuf,
}

impl DirectorySink {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl CoverageSink for DirectorySink {
    fn describe(&self) -> String {
        format!("directory {}", self.destination.display())
    }

    async fn forward(
        &self,
        _ctx: &ActionContext<'_>,
        root: &Path,
        files: &[PathBuf],
    ) -> Result<String, ActionError> {
        let mut log = String::new();
        for file in files {
            let relative = match file.strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => PathBuf::from(file.file_name().unwrap_or_default()),
            };
            let target = self.destination.join(&relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(file, &target).await?;
            log.push_str(&format!("copied {} -> {}\n", file.display(), target.display()));
        }
        Ok(log)
    }
}

/// Hands reports to an uploader command; file paths are appended as arguments
#[derive(Debug, Clone)]
pub struct CommandSink {
    command: String,
}

impl CommandSink {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CoverageSink for CommandSink {
    fn describe(&self) -> String {
        format!("command '{}'", self.command)
    }

    async fn forward(
        &self,
        ctx: &ActionContext<'_>,
        _root: &Path,
        files: &[PathBuf],
    ) -> Result<String, ActionError> {
        let mut args = vec![
            "-e".to_string(),
            "-c".to_string(),
            format!("{} \"$@\"", self.command),
            "upload-coverage".to_string(),
        ];
        args.extend(files.iter().map(|f| f.display().to_string()));
        let output = ctx.run_program("sh", &args).await?;
        Ok(output.combined())
    }
}

/// The `upload-coverage` action
#[derive(Clone, Default)]
pub struct UploadCoverage {
    sink: Option<Arc<dyn CoverageSink>>,
}

impl UploadCoverage {
    /// Sink chosen from the step parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Always forward to `sink`, ignoring `uploader`/`destination`
    pub fn with_sink(sink: Arc<dyn CoverageSink>) -> Self {
        Self { sink: Some(sink) }
    }

    fn collect(
        ctx: &ActionContext<'_>,
        root: &Path,
        destination: &Path,
    ) -> Result<(Vec<PathBuf>, Vec<String>), ActionError> {
        match ctx.param("files") {
            Some(list) => {
                let mut files = Vec::new();
                let mut missing = Vec::new();
                for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let path = ctx.env.resolve(item);
                    if path.is_file() {
                        files.push(path);
                    } else {
                        missing.push(item.to_string());
                    }
                }
                Ok((files, missing))
            }
            None => Ok((discover(root, destination)?, Vec::new())),
        }
    }
}

#[async_trait]
impl Action for UploadCoverage {
    fn name(&self) -> &'static str {
        "upload-coverage"
    }

    fn declared_keys(&self, _params: &BTreeMap<String, String>) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
        let root = ctx.env.resolve(ctx.param("directory").unwrap_or("."));
        let destination = ctx
            .env
            .resolve(ctx.param("destination").unwrap_or(DEFAULT_DESTINATION));
        let fail_if_missing = ctx.flag("fail-if-missing", false)?;
        let mut output = ActionOutput::new();

        let (files, missing) = Self::collect(ctx, &root, &destination)?;
        if !missing.is_empty() {
            if fail_if_missing {
                return Err(ActionError::Failed(format!(
                    "coverage files not found: {}",
                    missing.join(", ")
                )));
            }
            warn!("[{}] coverage files not found: {}", ctx.step_id, missing.join(", "));
            output.log_line(format!("missing: {}", missing.join(", ")));
        }
        if files.is_empty() {
            if fail_if_missing {
                return Err(ActionError::Failed(format!(
                    "no coverage files found under {}",
                    root.display()
                )));
            }
            output.log_line(format!("no coverage files found under {}", root.display()));
            return Ok(output);
        }

        let sink: Arc<dyn CoverageSink> = match (&self.sink, ctx.param("uploader")) {
            (Some(sink), _) => sink.clone(),
            (None, Some(command)) => Arc::new(CommandSink::new(command)),
            (None, None) => Arc::new(DirectorySink::new(destination)),
        };
        info!(
            "[{}] forwarding {} coverage file(s) to {}",
            ctx.step_id,
            files.len(),
            sink.describe()
        );
        let log = sink.forward(ctx, &root, &files).await?;
        output.log_output(&log);
        output.log_line(format!("uploaded {} file(s) to {}", files.len(), sink.describe()));
        Ok(output)
    }
}
