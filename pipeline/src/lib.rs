//! LLM-driven analysis pipeline over a tabular dataset.
//!
//! A plan of dependency-ordered analysis tasks is validated into a DAG, then
//! each task is turned into working code through an iterative synthesize,
//! execute, diagnose loop against a persistent execution session, with
//! results handed between tasks as column-sparse files on disk. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph construction, error
//!   classification, code extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, process execution,
//!   the session and generator backends). Isolated to enable mocking in tests.
//!
//! Orchestration modules ([`coding`], [`run`]) coordinate core logic with I/O
//! to implement CLI commands.

pub mod coding;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
