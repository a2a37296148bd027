//! CLI tests for workspace lifecycle: init, validate, graph.
//!
//! Spawns the pipeline binary and verifies exit codes and output for valid
//! and invalid plans. Validation never touches the generator or the session,
//! so these tests need no backends at all.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use pipeline::exit_codes;
use pipeline::io::paths::WorkspacePaths;
use pipeline::io::plan_store::{Plan, write_plan};
use pipeline::test_support::task;

const DATASET: &str = "id,text\n1,alpha\n2,beta\n";

fn pipeline_cmd(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pipeline"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run pipeline binary")
}

fn init_with_dataset(root: &Path) -> WorkspacePaths {
    let output = pipeline_cmd(root, &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    fs::create_dir_all(root.join("data")).expect("data dir");
    fs::write(root.join("data/dataset.csv"), DATASET).expect("dataset");
    WorkspacePaths::new(root)
}

#[test]
fn init_then_validate_reports_topological_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_with_dataset(temp.path());
    write_plan(
        &paths.plan_path,
        &Plan {
            tasks: vec![
                task("rank", &["score"], &["rank"]),
                task("score", &["text"], &["score"]),
            ],
        },
    )
    .expect("plan");

    let output = pipeline_cmd(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 tasks"), "stdout: {stdout}");
    assert!(stdout.contains("score rank"), "stdout: {stdout}");
}

#[test]
fn validate_names_unresolved_input_without_executing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_with_dataset(temp.path());
    write_plan(
        &paths.plan_path,
        &Plan {
            tasks: vec![task("a", &["nonexistent_col"], &["x"])],
        },
    )
    .expect("plan");

    let output = pipeline_cmd(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nonexistent_col"), "stderr: {stderr}");
    // Nothing ran: no run directory was allocated.
    assert!(fs::read_dir(&paths.runs_dir).expect("runs dir").next().is_none());
}

#[test]
fn validate_rejects_cyclic_plans() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_with_dataset(temp.path());
    write_plan(
        &paths.plan_path,
        &Plan {
            tasks: vec![task("a", &["b_out"], &["a_out"]), task("b", &["a_out"], &["b_out"])],
        },
    )
    .expect("plan");

    let output = pipeline_cmd(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dependency cycle"), "stderr: {stderr}");
}

#[test]
fn graph_prints_tasks_with_their_dependents() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_with_dataset(temp.path());
    write_plan(
        &paths.plan_path,
        &Plan {
            tasks: vec![
                task("score", &["text"], &["score"]),
                task("rank", &["score"], &["rank"]),
                task("band", &["score"], &["band"]),
            ],
        },
    )
    .expect("plan");

    let output = pipeline_cmd(temp.path(), &["graph"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "score -> band, rank");
    assert!(lines.contains(&"rank"));
    assert!(lines.contains(&"band"));
}

#[test]
fn second_init_requires_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_with_dataset(temp.path());

    let output = pipeline_cmd(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already exists"), "stderr: {stderr}");

    let output = pipeline_cmd(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}
