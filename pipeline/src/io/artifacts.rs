//! Convention-based artifact store with staged, atomic commits.
//!
//! Each task owns a disjoint file namespace derived from its id. Generated
//! code writes into a per-task staging directory; files only become visible
//! to downstream tasks once the producing task succeeds and the orchestrator
//! commits them (rename into the artifact directory). Results tables carry
//! the identifier columns plus the declared new columns and nothing else.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::TaskSpec;
use crate::io::dataset::{Table, read_header};

/// Path-resolution and contract checks for one run's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    artifacts_dir: PathBuf,
    id_columns: Vec<String>,
}

/// Staged artifact locations for one task.
#[derive(Debug, Clone)]
pub struct StagedArtifacts {
    pub dir: PathBuf,
    /// Results table; `None` for tasks that only produce a summary or model.
    pub results: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

impl StagedArtifacts {
    /// All declared file paths, results first.
    pub fn files(&self) -> Vec<PathBuf> {
        [&self.results, &self.model, &self.summary]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

impl ArtifactStore {
    pub fn new(artifacts_dir: impl Into<PathBuf>, id_columns: Vec<String>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            id_columns,
        }
    }

    pub fn id_columns(&self) -> &[String] {
        &self.id_columns
    }

    /// File name of a task's results table.
    pub fn results_file_name(spec: &TaskSpec) -> Option<String> {
        if spec.output_variables.is_empty() && spec.hints.results_file.is_none() {
            return None;
        }
        Some(
            spec.hints
                .results_file
                .clone()
                .unwrap_or_else(|| format!("{}_results.csv", spec.task_id)),
        )
    }

    /// Resolve the staging paths a task must write to.
    pub fn staged(&self, staging_dir: &Path, spec: &TaskSpec) -> StagedArtifacts {
        StagedArtifacts {
            dir: staging_dir.to_path_buf(),
            results: Self::results_file_name(spec).map(|name| staging_dir.join(name)),
            model: spec.hints.model_file.as_ref().map(|name| staging_dir.join(name)),
            summary: spec
                .hints
                .summary_file
                .as_ref()
                .map(|name| staging_dir.join(name)),
        }
    }

    /// Committed location of a task's results table.
    pub fn committed_results_path(&self, spec: &TaskSpec) -> Option<PathBuf> {
        Self::results_file_name(spec).map(|name| self.artifacts_dir.join(name))
    }

    /// Header a results table must carry: identifier columns, then declared
    /// output variables, in declared order.
    pub fn expected_columns(&self, spec: &TaskSpec) -> Vec<String> {
        let mut columns = self.id_columns.clone();
        columns.extend(spec.output_variables.iter().cloned());
        columns
    }

    /// Check staged files against the artifact contract.
    ///
    /// Returns a violation description suitable for diagnosis; the caller
    /// routes it back through the synthesis loop rather than failing the run.
    pub fn verify_staged(&self, staged: &StagedArtifacts, spec: &TaskSpec) -> Result<(), String> {
        if let Some(results) = &staged.results {
            if !results.is_file() {
                return Err(format!(
                    "results file '{}' was not written",
                    results.display()
                ));
            }
            let header = read_header(results)
                .map_err(|err| format!("results file is not readable as CSV: {err:#}"))?;
            let expected = self.expected_columns(spec);
            if header != expected {
                return Err(format!(
                    "results columns mismatch: expected [{}], found [{}]",
                    expected.join(", "),
                    header.join(", ")
                ));
            }
        }
        if let Some(model) = &staged.model {
            if !model.is_file() {
                return Err(format!("model file '{}' was not written", model.display()));
            }
        }
        if let Some(summary) = &staged.summary {
            if !summary.is_file() {
                return Err(format!(
                    "summary file '{}' was not written",
                    summary.display()
                ));
            }
        }
        Ok(())
    }

    /// Move staged files into the artifact directory.
    ///
    /// Each file is renamed, so downstream readers observe either the previous
    /// committed artifact or the complete new one, never a partial write.
    pub fn commit(&self, staged: &StagedArtifacts) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.artifacts_dir)
            .with_context(|| format!("create directory {}", self.artifacts_dir.display()))?;
        let mut committed = Vec::new();
        for file in staged.files() {
            let name = file
                .file_name()
                .with_context(|| format!("staged file has no name: {}", file.display()))?;
            let target = self.artifacts_dir.join(name);
            fs::rename(&file, &target).with_context(|| {
                format!("commit {} to {}", file.display(), target.display())
            })?;
            debug!(target = %target.display(), "artifact committed");
            committed.push(target);
        }
        Ok(committed)
    }

    /// Load a committed results table.
    pub fn load_results(&self, spec: &TaskSpec) -> Result<Table> {
        let path = self
            .committed_results_path(spec)
            .with_context(|| format!("task '{}' declares no results table", spec.task_id))?;
        Table::read_csv(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    fn store(temp: &Path) -> ArtifactStore {
        ArtifactStore::new(temp.join("artifacts"), vec!["id".to_string()])
    }

    #[test]
    fn staged_paths_use_task_namespace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let spec = task("topics", &["abstract"], &["topic"]);
        let staged = store.staged(&temp.path().join("staging"), &spec);
        assert!(
            staged
                .results
                .as_ref()
                .expect("results")
                .ends_with("topics_results.csv")
        );
        assert_eq!(staged.model, None);
    }

    #[test]
    fn verify_accepts_exact_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let spec = task("topics", &["abstract"], &["topic", "topic_score"]);
        let staged = store.staged(temp.path(), &spec);
        fs::write(
            staged.results.as_ref().expect("results"),
            "id,topic,topic_score\n1,energy,0.8\n",
        )
        .expect("write");

        assert_eq!(store.verify_staged(&staged, &spec), Ok(()));
    }

    #[test]
    fn verify_rejects_leaked_input_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let spec = task("topics", &["abstract"], &["topic"]);
        let staged = store.staged(temp.path(), &spec);
        fs::write(
            staged.results.as_ref().expect("results"),
            "id,abstract,topic\n1,long text,energy\n",
        )
        .expect("write");

        let violation = store.verify_staged(&staged, &spec).unwrap_err();
        assert!(violation.contains("expected [id, topic]"));
        assert!(violation.contains("abstract"));
    }

    #[test]
    fn verify_rejects_missing_results_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let spec = task("topics", &["abstract"], &["topic"]);
        let staged = store.staged(temp.path(), &spec);
        let violation = store.verify_staged(&staged, &spec).unwrap_err();
        assert!(violation.contains("was not written"));
    }

    #[test]
    fn verify_requires_declared_model_and_summary_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let mut spec = task("fit", &["x"], &["yhat"]);
        spec.hints.model_file = Some("fit_model.pkl".to_string());
        spec.hints.summary_file = Some("fit_summary.json".to_string());
        let staged = store.staged(temp.path(), &spec);
        fs::write(staged.results.as_ref().expect("results"), "id,yhat\n").expect("write");
        fs::write(staged.model.as_ref().expect("model"), b"model").expect("write");

        let violation = store.verify_staged(&staged, &spec).unwrap_err();
        assert!(violation.contains("fit_summary.json"));
    }

    #[test]
    fn summary_only_task_needs_no_results_table() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let mut spec = task("hypothesis", &["x"], &[]);
        spec.hints.summary_file = Some("hypothesis_summary.json".to_string());
        let staged = store.staged(temp.path(), &spec);
        assert_eq!(staged.results, None);
        fs::write(staged.summary.as_ref().expect("summary"), "{}").expect("write");
        assert_eq!(store.verify_staged(&staged, &spec), Ok(()));
    }

    #[test]
    fn commit_moves_files_and_load_reads_them_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let spec = task("topics", &["abstract"], &["topic"]);
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).expect("staging");
        let staged = store.staged(&staging, &spec);
        fs::write(
            staged.results.as_ref().expect("results"),
            "id,topic\n1,energy\n",
        )
        .expect("write");

        let committed_path = store.committed_results_path(&spec).expect("path");
        assert!(!committed_path.exists());

        let committed = store.commit(&staged).expect("commit");
        assert_eq!(committed, vec![committed_path.clone()]);
        assert!(committed_path.is_file());
        assert!(!staged.results.as_ref().expect("results").exists());

        let table = store.load_results(&spec).expect("load");
        assert_eq!(table.columns(), ["id", "topic"]);
    }
}
