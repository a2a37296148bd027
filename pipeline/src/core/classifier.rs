//! Deterministic classification of execution failures.
//!
//! Raw error text from the execution session is matched against an ordered
//! table of known kinds. The taxonomy is a first-class, testable artifact:
//! unmatched text classifies as [`ErrorKind::Unknown`] with the raw text
//! truncated as detail, never silently dropped.

use serde::{Deserialize, Serialize};

/// Classified category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Undefined name or missing attribute.
    MissingName,
    /// Key or column not found in the working data.
    ColumnNotFound,
    TypeMismatch,
    InvalidValue,
    /// Import failed or package not installed.
    MissingDependency,
    IndexOutOfRange,
    /// Division by zero and similar arithmetic failures.
    Arithmetic,
    FileNotFound,
    Syntax,
    /// The session did not finish the submission within its time budget.
    Timeout,
    /// Persisted artifact broke the column contract.
    SchemaViolation,
    /// No extractable code in the model response.
    SynthesisFailure,
    Unknown,
}

/// A classified failure with remediation guidance for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Last meaningful line of the raw error, truncated.
    pub detail: String,
    pub hint: String,
}

impl Classification {
    /// Remediation hint, enriched with the concretely bound column names for
    /// column-not-found failures so retries stop guessing at names.
    pub fn hint_with_columns(&self, columns: &[String]) -> String {
        if self.kind == ErrorKind::ColumnNotFound && !columns.is_empty() {
            return format!("{} Actual columns: [{}].", self.hint, columns.join(", "));
        }
        self.hint.clone()
    }
}

const DETAIL_LIMIT: usize = 240;

/// Ordered matcher table: the first entry with a matching pattern wins, so
/// more specific patterns must come before broader ones.
const MATCHERS: &[(ErrorKind, &[&str], &str)] = &[
    (
        ErrorKind::MissingDependency,
        &["ModuleNotFoundError", "ImportError"],
        "Install the package through the shell (pip install <package>) or use a library that is already available.",
    ),
    (
        ErrorKind::Syntax,
        &["SyntaxError", "IndentationError"],
        "Fix the syntax: close all brackets and quotes and keep indentation consistent.",
    ),
    (
        ErrorKind::ColumnNotFound,
        &["KeyError", "not in index", "None of ["],
        "A referenced column does not exist. Use only columns that are present in the working data.",
    ),
    (
        ErrorKind::MissingName,
        &["NameError", "AttributeError"],
        "A name or attribute is undefined. Define it before use and check the object actually has that attribute.",
    ),
    (
        ErrorKind::FileNotFound,
        &["FileNotFoundError", "No such file or directory"],
        "The path does not exist. Create parent directories first and write outputs to the paths given in the task.",
    ),
    (
        ErrorKind::IndexOutOfRange,
        &["IndexError", "out of bounds", "index out of range"],
        "An index exceeded the data size. Check lengths before indexing and prefer positional access over label access.",
    ),
    (
        ErrorKind::Arithmetic,
        &["ZeroDivisionError", "division by zero"],
        "Guard divisions against zero denominators or filter empty groups first.",
    ),
    (
        ErrorKind::TypeMismatch,
        &["TypeError"],
        "Check argument and return types; convert dates and mixed columns explicitly before computing.",
    ),
    (
        ErrorKind::InvalidValue,
        &["ValueError"],
        "An input value is invalid for the operation. Simplify the method: cap category counts, drop missing rows, or fall back to a point estimate.",
    ),
    (
        ErrorKind::Timeout,
        &["timed out"],
        "The code ran too long. Reduce the work per submission and avoid unbounded loops.",
    ),
];

/// Classify raw error text against the ordered matcher table.
pub fn classify(raw: &str) -> Classification {
    for (kind, patterns, hint) in MATCHERS {
        if patterns.iter().any(|pattern| raw.contains(pattern)) {
            return Classification {
                kind: *kind,
                detail: last_line_truncated(raw),
                hint: (*hint).to_string(),
            };
        }
    }
    Classification {
        kind: ErrorKind::Unknown,
        detail: truncate(raw.trim(), DETAIL_LIMIT),
        hint: "Re-check the logic and rewrite the full script rather than patching it.".to_string(),
    }
}

/// Classification for an artifact that broke the column contract.
///
/// These do not originate in the session, so they bypass the matcher table.
pub fn schema_violation(detail: impl Into<String>) -> Classification {
    Classification {
        kind: ErrorKind::SchemaViolation,
        detail: truncate(&detail.into(), DETAIL_LIMIT),
        hint: "Save exactly the identifier columns plus the declared new columns, in that order. Do not copy raw input columns into the results file.".to_string(),
    }
}

/// Classification for a model response with no extractable code.
pub fn synthesis_failure(detail: impl Into<String>) -> Classification {
    Classification {
        kind: ErrorKind::SynthesisFailure,
        detail: truncate(&detail.into(), DETAIL_LIMIT),
        hint: "Reply with one complete script inside a single fenced code block.".to_string(),
    }
}

fn last_line_truncated(raw: &str) -> String {
    let line = raw
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    truncate(line, DETAIL_LIMIT)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_known_kinds() {
        let cases = [
            ("NameError: name 'foo' is not defined", ErrorKind::MissingName),
            ("KeyError: 'missing_col'", ErrorKind::ColumnNotFound),
            ("TypeError: unsupported operand", ErrorKind::TypeMismatch),
            ("ValueError: could not convert", ErrorKind::InvalidValue),
            (
                "ModuleNotFoundError: No module named 'statsmodels'",
                ErrorKind::MissingDependency,
            ),
            ("IndexError: list index out of range", ErrorKind::IndexOutOfRange),
            ("ZeroDivisionError: division by zero", ErrorKind::Arithmetic),
            ("FileNotFoundError: [Errno 2]", ErrorKind::FileNotFound),
            ("SyntaxError: invalid syntax", ErrorKind::Syntax),
            ("code execution timed out after 300s", ErrorKind::Timeout),
        ];
        for (raw, expected) in cases {
            assert_eq!(classify(raw).kind, expected, "raw: {raw}");
        }
    }

    #[test]
    fn classify_takes_detail_from_last_nonempty_line() {
        let raw = "Traceback (most recent call last):\n  File \"<string>\"\nKeyError: 'topic'\n";
        let class = classify(raw);
        assert_eq!(class.kind, ErrorKind::ColumnNotFound);
        assert_eq!(class.detail, "KeyError: 'topic'");
    }

    #[test]
    fn classify_unknown_keeps_truncated_raw_text() {
        let raw = "x".repeat(1000);
        let class = classify(&raw);
        assert_eq!(class.kind, ErrorKind::Unknown);
        assert!(class.detail.len() <= DETAIL_LIMIT + 3);
        assert!(class.detail.ends_with("..."));
    }

    #[test]
    fn column_hint_is_enriched_with_actual_columns() {
        let class = classify("KeyError: 'missing'");
        let hint = class.hint_with_columns(&["id".to_string(), "score".to_string()]);
        assert!(hint.contains("[id, score]"));

        let other = classify("TypeError: bad operand");
        let unchanged = other.hint_with_columns(&["id".to_string()]);
        assert_eq!(unchanged, other.hint);
    }

    #[test]
    fn module_errors_win_over_broader_patterns() {
        // ImportError tracebacks frequently mention names too; the dependency
        // entry sits earlier in the table and must win.
        let raw = "ImportError: cannot import name 'foo' from 'bar'";
        assert_eq!(classify(raw).kind, ErrorKind::MissingDependency);
    }

    #[test]
    fn schema_violation_and_synthesis_failure_have_fixed_kinds() {
        assert_eq!(
            schema_violation("unexpected column 'abstract'").kind,
            ErrorKind::SchemaViolation
        );
        assert_eq!(synthesis_failure("prose only").kind, ErrorKind::SynthesisFailure);
    }
}
