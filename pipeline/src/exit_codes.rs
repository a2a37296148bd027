//! Stable exit codes for pipeline CLI commands.

/// Command succeeded and, for `run`, every task succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/plan or other errors.
pub const INVALID: i32 = 1;
/// `run` completed but at least one task was aborted or skipped.
pub const PARTIAL: i32 = 2;
