// crates/server-jobs/src/pipeline.rs
//! How job parameters become a pipeline command, and how its output is counted.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::JobError;
use crate::process::CommandSpec;
use crate::types::JobParams;

pub const DEFAULT_THEME: &str = "peliculas";
pub const MAX_COUNT: u32 = 50;

/// The external pipeline a job runs.
pub trait PipelineInvocation: Send + Sync {
    /// Build the command for one job writing into `output_dir`.
    ///
    /// Rejects parameters the pipeline cannot run with
    /// [`JobError::InvalidParameter`].
    fn build_command(&self, params: &JobParams, output_dir: &Path)
        -> Result<CommandSpec, JobError>;

    /// Number of artifacts (videos) currently present under `output_area`.
    fn count_produced_artifacts(&self, output_area: &Path) -> usize;
}

/// Runs `<interpreter> <script> --test | --single <theme> | --batch`.
#[derive(Debug, Clone)]
pub struct ScriptPipeline {
    pub interpreter: String,
    pub script: PathBuf,
    pub work_dir: Option<PathBuf>,
    /// File extension counted as a produced artifact.
    pub artifact_extension: String,
}

impl ScriptPipeline {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            work_dir: None,
            artifact_extension: "mp4".into(),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

impl PipelineInvocation for ScriptPipeline {
    fn build_command(
        &self,
        params: &JobParams,
        output_dir: &Path,
    ) -> Result<CommandSpec, JobError> {
        if let Some(count) = params.count {
            if !(1..=MAX_COUNT).contains(&count) {
                return Err(JobError::InvalidParameter(format!(
                    "count must be between 1 and {MAX_COUNT}"
                )));
            }
        }

        let mut cmd = CommandSpec::new(&self.interpreter)
            .arg(self.script.to_string_lossy())
            .env("REELRUN_OUTPUT_DIR", output_dir.to_string_lossy());
        cmd = match params.mode.as_str() {
            "test" => cmd.arg("--test"),
            "single" => cmd
                .arg("--single")
                .arg(params.theme.as_deref().unwrap_or(DEFAULT_THEME)),
            "batch" => cmd.arg("--batch"),
            _ => return Err(JobError::InvalidParameter("Invalid mode".into())),
        };
        if let Some(dir) = &self.work_dir {
            cmd = cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    fn count_produced_artifacts(&self, output_area: &Path) -> usize {
        WalkDir::new(output_area)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.artifact_extension))
            })
            .count()
    }
}
