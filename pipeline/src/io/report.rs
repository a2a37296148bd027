//! Run reporting and per-attempt logging under `.pipeline/runs/`.
//!
//! # Separation of Concerns
//!
//! These files are product artifacts, written unconditionally: the report is
//! the structured record a run always produces, and the attempt logs make
//! every synthesis round inspectable after the fact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::classifier::ErrorKind;
use crate::core::types::{AttemptOutcome, AttemptRecord, TaskStatus};

/// Structured record of one task in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempts_used: u32,
    pub artifacts_written: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Structured record emitted at the end of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn succeeded_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.status.is_success())
            .count()
    }

    /// True when every task succeeded.
    pub fn is_clean(&self) -> bool {
        self.succeeded_count() == self.tasks.len()
    }
}

/// Atomically write the report to disk (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("report path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(report)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}

/// File paths for one attempt's log pair.
pub fn attempt_paths(task_dir: &Path, index: usize) -> (PathBuf, PathBuf) {
    (
        task_dir.join(format!("attempt_{index}.py")),
        task_dir.join(format!("attempt_{index}.log")),
    )
}

/// Write one attempt's code and diagnostic log.
pub fn write_attempt(task_dir: &Path, index: usize, record: &AttemptRecord) -> Result<()> {
    fs::create_dir_all(task_dir)
        .with_context(|| format!("create directory {}", task_dir.display()))?;
    let (code_path, log_path) = attempt_paths(task_dir, index);

    if let Some(code) = &record.code {
        let mut buf = code.clone();
        if !buf.ends_with('\n') {
            buf.push('\n');
        }
        fs::write(&code_path, buf).with_context(|| format!("write {}", code_path.display()))?;
    }

    let outcome = match record.outcome {
        AttemptOutcome::Success => "success",
        AttemptOutcome::RuntimeError => "runtime_error",
        AttemptOutcome::StaticIssue => "static_issue",
    };
    let mut log = format!("outcome: {outcome}\n");
    if let Some(kind) = record.error_kind {
        log.push_str(&format!(
            "error_kind: {}\n",
            serde_json::to_value(kind)?.as_str().unwrap_or("unknown")
        ));
    }
    if !record.detail.is_empty() {
        log.push_str(&format!("detail: {}\n", record.detail));
    }
    fs::write(&log_path, log).with_context(|| format!("write {}", log_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies write then read preserves all fields.
    #[test]
    fn report_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.json");
        let report = RunReport {
            run_id: "run-001".to_string(),
            tasks: vec![
                TaskReport {
                    task_id: "a".to_string(),
                    status: TaskStatus::Succeeded,
                    attempts_used: 1,
                    artifacts_written: vec!["a_results.csv".to_string()],
                    error_kind: None,
                },
                TaskReport {
                    task_id: "b".to_string(),
                    status: TaskStatus::AbortedRepeatedError,
                    attempts_used: 2,
                    artifacts_written: Vec::new(),
                    error_kind: Some(ErrorKind::ColumnNotFound),
                },
            ],
        };

        write_report(&path, &report).expect("write");
        let loaded = load_report(&path).expect("load");
        assert_eq!(loaded, report);
        assert_eq!(loaded.succeeded_count(), 1);
        assert!(!loaded.is_clean());
    }

    /// Guards against accidental changes to the serialized status names.
    #[test]
    fn report_serialization_is_stable() {
        let report = RunReport {
            run_id: "run-002".to_string(),
            tasks: vec![TaskReport {
                task_id: "c".to_string(),
                status: TaskStatus::SkippedDueToDependency,
                attempts_used: 0,
                artifacts_written: Vec::new(),
                error_kind: None,
            }],
        };
        let json = serde_json::to_string_pretty(&report).expect("serialize");
        assert!(json.contains("\"skipped_due_to_dependency\""));
        assert!(!json.contains("error_kind"));
    }

    #[test]
    fn attempt_logs_record_code_and_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task_dir = temp.path().join("topics");
        let record = AttemptRecord {
            outcome: AttemptOutcome::RuntimeError,
            error_kind: Some(ErrorKind::ColumnNotFound),
            detail: "KeyError: 'ghost'".to_string(),
            code: Some("df['ghost']".to_string()),
        };

        write_attempt(&task_dir, 1, &record).expect("write");

        let (code_path, log_path) = attempt_paths(&task_dir, 1);
        assert_eq!(
            fs::read_to_string(code_path).expect("code"),
            "df['ghost']\n"
        );
        let log = fs::read_to_string(log_path).expect("log");
        assert!(log.contains("outcome: runtime_error"));
        assert!(log.contains("error_kind: column_not_found"));
        assert!(log.contains("KeyError: 'ghost'"));
    }
}
