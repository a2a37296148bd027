//! Shared deterministic types for pipeline core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::classifier::ErrorKind;

/// Declarative description of one analysis step.
///
/// `input_variables` name what the step reads (base-dataset columns or another
/// step's outputs); `output_variables` name the columns it promises to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub objective: String,
    #[serde(default)]
    pub input_variables: Vec<String>,
    pub output_variables: Vec<String>,
    #[serde(default)]
    pub hints: TaskHints,
}

/// Optional structured configuration attached to a task.
///
/// Everything here is advisory except the file names, which fix where the
/// task's artifacts must land.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskHints {
    /// Preferred algorithm, surfaced verbatim in the generation request.
    pub algorithm: Option<String>,
    /// Free-form algorithm parameters.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Override for the results table file name.
    pub results_file: Option<String>,
    /// File name for a serialized model object, when the task produces one.
    pub model_file: Option<String>,
    /// File name for a summary document, when the task produces one.
    pub summary_file: Option<String>,
    /// Declared data types for output columns (column name to type name).
    pub column_types: BTreeMap<String, String>,
}

/// Outcome of one code or shell submission to the execution session.
///
/// Raised failures inside the session are always converted into `error`,
/// never propagated to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            error: None,
        }
    }

    pub fn failed(stdout: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// How a single attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RuntimeError,
    StaticIssue,
}

/// One iteration of the synthesis loop for a task.
///
/// The ordered list of these records is the attempt history consulted for
/// repeated-error detection. `code` is absent when no code could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Terminal state of the synthesis loop for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Succeeded,
    AbortedMaxAttempts,
    AbortedRepeatedError,
    AbortedSynthesisFailure,
}

/// Run-level status of one task, as recorded in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    AbortedMaxAttempts,
    AbortedRepeatedError,
    AbortedSynthesisFailure,
    SkippedDueToDependency,
    SkippedDueToTimeout,
}

impl TaskStatus {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl From<TerminalStatus> for TaskStatus {
    fn from(terminal: TerminalStatus) -> Self {
        match terminal {
            TerminalStatus::Succeeded => Self::Succeeded,
            TerminalStatus::AbortedMaxAttempts => Self::AbortedMaxAttempts,
            TerminalStatus::AbortedRepeatedError => Self::AbortedRepeatedError,
            TerminalStatus::AbortedSynthesisFailure => Self::AbortedSynthesisFailure,
        }
    }
}
