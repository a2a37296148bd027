//! Workspace layout and `.pipeline/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{PipelineConfig, write_config};
use crate::io::plan_store::{PLAN_SCHEMA, Plan, write_plan};

/// All canonical paths within `.pipeline/` for a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub pipeline_dir: PathBuf,
    pub state_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    pub plan_schema_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let pipeline_dir = root.join(".pipeline");
        let state_dir = pipeline_dir.join("state");
        Self {
            root: root.clone(),
            pipeline_dir: pipeline_dir.clone(),
            state_dir: state_dir.clone(),
            artifacts_dir: pipeline_dir.join("artifacts"),
            runs_dir: pipeline_dir.join("runs"),
            config_path: state_dir.join("config.toml"),
            plan_path: state_dir.join("plan.json"),
            plan_schema_path: state_dir.join("plan.schema.json"),
        }
    }

    /// Directory holding one run's report, inputs, staging, and attempt logs.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("report.json")
    }

    /// Per-task directory within a run.
    pub fn task_dir(&self, run_id: &str, task_id: &str) -> PathBuf {
        self.run_dir(run_id).join(task_id)
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing pipeline-owned files.
    pub force: bool,
}

/// Create `.pipeline/` scaffolding in `root`.
///
/// Fails if `.pipeline/` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.pipeline_dir.exists() && !options.force {
        return Err(anyhow!(
            "pipeline init: .pipeline already exists (use --force to overwrite)"
        ));
    }
    if paths.pipeline_dir.exists() && !paths.pipeline_dir.is_dir() {
        return Err(anyhow!(
            "pipeline init: .pipeline exists but is not a directory"
        ));
    }

    create_dir(&paths.pipeline_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.artifacts_dir)?;
    create_dir(&paths.runs_dir)?;

    write_config(&paths.config_path, &PipelineConfig::default())?;
    write_plan(&paths.plan_path, &Plan::default())?;
    fs::write(&paths.plan_schema_path, PLAN_SCHEMA)
        .with_context(|| format!("write {}", paths.plan_schema_path.display()))?;

    Ok(paths)
}

/// Allocate the next `run-NNN` id from the existing run directories.
pub fn allocate_run_id(runs_dir: &Path) -> Result<String> {
    let mut highest = 0u32;
    if runs_dir.exists() {
        for entry in fs::read_dir(runs_dir)
            .with_context(|| format!("read runs dir {}", runs_dir.display()))?
        {
            let entry = entry.with_context(|| "read runs dir entry")?;
            let name = entry.file_name();
            let Some(suffix) = name.to_string_lossy().strip_prefix("run-").map(str::to_string)
            else {
                continue;
            };
            if let Ok(number) = suffix.parse::<u32>() {
                highest = highest.max(number);
            }
        }
    }
    Ok(format!("run-{:03}", highest + 1))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies init_workspace creates the complete directory structure and files.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let paths = init_workspace(root, &InitOptions { force: false }).expect("init");

        assert!(paths.pipeline_dir.is_dir());
        assert!(paths.state_dir.is_dir());
        assert!(paths.artifacts_dir.is_dir());
        assert!(paths.runs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.plan_path.is_file());
        assert!(paths.plan_schema_path.is_file());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn run_ids_increment_from_existing_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runs_dir = temp.path().join("runs");

        assert_eq!(allocate_run_id(&runs_dir).expect("id"), "run-001");

        fs::create_dir_all(runs_dir.join("run-001")).expect("mkdir");
        fs::create_dir_all(runs_dir.join("run-007")).expect("mkdir");
        fs::create_dir_all(runs_dir.join("unrelated")).expect("mkdir");
        assert_eq!(allocate_run_id(&runs_dir).expect("id"), "run-008");
    }

    #[test]
    fn task_dir_nests_under_run_dir() {
        let paths = WorkspacePaths::new("/ws");
        assert!(
            paths
                .task_dir("run-001", "sentiment")
                .ends_with(Path::new(".pipeline/runs/run-001/sentiment"))
        );
    }
}
