//! Working-directory layout for a NarraForge job: where its SQLite database,
//! checkpoints, logs, and output manifest live on disk.
//!
//! Generalized from `Config` (project-dir + `.forge/` layout
//! resolution, `ensure_directories()`), narrowed from "forge project
//! directory" to "one job's working directory."

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Resolved filesystem layout for a single job run.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub working_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl JobPaths {
    /// Resolve paths rooted at `working_dir` (created if absent).
    pub fn new(working_dir: PathBuf, output_directory: &str) -> Result<Self> {
        std::fs::create_dir_all(&working_dir)
            .with_context(|| format!("failed to create working directory {}", working_dir.display()))?;
        let working_dir = working_dir
            .canonicalize()
            .context("failed to resolve working directory")?;

        let narraforge_dir = working_dir.join(".narraforge");
        let db_path = narraforge_dir.join("narraforge.sqlite3");
        let log_dir = narraforge_dir.join("logs");
        let output_dir = if PathBuf::from(output_directory).is_absolute() {
            PathBuf::from(output_directory)
        } else {
            working_dir.join(output_directory)
        };

        Ok(Self { working_dir, db_path, log_dir, output_dir })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("failed to create log directory")?;
        std::fs::create_dir_all(&self.output_dir).context("failed to create output directory")?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        Ok(())
    }

    /// The per-job output directory: one
    /// subdirectory per job id, under `output_dir`.
    pub fn job_output_dir(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(job_id)
    }

    /// Every job id with a written manifest under `output_dir`, discovered
    /// by globbing for `<output_dir>/*/metadata.json` rather than walking
    /// the checkpoint database — this lists what actually landed on disk,
    /// including jobs whose checkpoints have since been swept by
    /// `checkpoint_retention`.
    pub fn list_job_ids(&self) -> Result<Vec<String>> {
        let pattern = self.output_dir.join("*").join("metadata.json").to_string_lossy().to_string();
        let mut ids: Vec<String> = glob::glob(&pattern)
            .context("failed to read output directory glob pattern")?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.parent()?.file_name()?.to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
