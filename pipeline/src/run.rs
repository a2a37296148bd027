//! Whole-run orchestration over the task graph.
//!
//! Tasks execute strictly in topological order. Each task gets a working
//! table assembled from the base dataset and the committed artifacts of its
//! upstream tasks, joined on the identifier columns, and a freshly reset
//! session. A failed task never stops the run: its dependents are skipped,
//! independent branches continue, and the run always ends with a report.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::coding::{LoopOptions, TaskContext, run_task};
use crate::core::classifier::ErrorKind;
use crate::core::graph::TaskGraph;
use crate::core::types::{TaskSpec, TaskStatus};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::PipelineConfig;
use crate::io::dataset::Table;
use crate::io::generator::Generator;
use crate::io::paths::WorkspacePaths;
use crate::io::report::{RunReport, TaskReport, write_report};
use crate::io::session::Session;

/// Options for one `run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Wall-clock budget; tasks not started before expiry are skipped.
    pub deadline: Option<Duration>,
}

/// Execute every task of `graph` and write the run report.
#[instrument(skip_all, fields(run_id))]
pub fn run_plan<G: Generator, S: Session>(
    paths: &WorkspacePaths,
    config: &PipelineConfig,
    graph: &TaskGraph,
    generator: &G,
    session: &mut S,
    run_id: &str,
    options: &RunOptions,
) -> Result<RunReport> {
    let started = Instant::now();
    let deadline = options.deadline.map(|budget| started + budget);
    let dataset_path = paths.root.join(&config.dataset.path);
    let store = ArtifactStore::new(&paths.artifacts_dir, config.dataset.id_columns.clone());
    let loop_options = LoopOptions {
        max_attempts: config.coding.max_attempts,
        repetition_threshold: config.coding.repetition_threshold,
        prompt_budget_bytes: config.coding.prompt_budget_bytes,
        gen_timeout: Duration::from_secs(config.generator.timeout_secs),
        gen_output_limit_bytes: config.generator.output_limit_bytes,
    };

    info!(tasks = graph.len(), "run started");
    let mut reports: Vec<TaskReport> = Vec::with_capacity(graph.len());

    for task_id in graph.order() {
        let spec = graph
            .get(task_id)
            .with_context(|| format!("task '{task_id}' missing from graph"))?;

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(task_id = %task_id, "run deadline expired, skipping");
            reports.push(skipped(spec, TaskStatus::SkippedDueToTimeout));
            continue;
        }

        let blocked_on = graph.dependencies_of(task_id).into_keys().find(|upstream| {
            !reports
                .iter()
                .any(|report| report.task_id == *upstream && report.status.is_success())
        });
        if let Some(upstream) = blocked_on {
            info!(task_id = %task_id, upstream = %upstream, "upstream did not succeed, skipping");
            reports.push(skipped(spec, TaskStatus::SkippedDueToDependency));
            continue;
        }

        let report = execute_task(
            paths,
            config,
            graph,
            &store,
            generator,
            session,
            run_id,
            spec,
            &dataset_path,
            &loop_options,
        )?;
        info!(task_id = %task_id, status = ?report.status, "task finished");
        reports.push(report);
    }

    let report = RunReport {
        run_id: run_id.to_string(),
        tasks: reports,
    };
    write_report(&paths.report_path(run_id), &report)?;
    info!(
        succeeded = report.succeeded_count(),
        total = report.tasks.len(),
        "run finished"
    );
    Ok(report)
}

/// Assemble the working table, reset the session, and drive the loop.
#[allow(clippy::too_many_arguments)]
fn execute_task<G: Generator, S: Session>(
    paths: &WorkspacePaths,
    config: &PipelineConfig,
    graph: &TaskGraph,
    store: &ArtifactStore,
    generator: &G,
    session: &mut S,
    run_id: &str,
    spec: &TaskSpec,
    dataset_path: &Path,
    loop_options: &LoopOptions,
) -> Result<TaskReport> {
    let task_dir = paths.task_dir(run_id, &spec.task_id);
    let staging_dir = task_dir.join("staging");
    std::fs::create_dir_all(&staging_dir)
        .with_context(|| format!("create directory {}", staging_dir.display()))?;

    let working = match resolve_inputs(graph, store, spec, dataset_path) {
        Ok(working) => working,
        Err(err) => {
            // Unreadable upstream artifacts are a task-scoped failure, not a
            // run-scoped one; dependents get skipped through the report.
            warn!(task_id = %spec.task_id, error = %format!("{err:#}"), "input resolution failed");
            return Ok(failed_before_attempts(spec, ErrorKind::FileNotFound));
        }
    };
    let input_path = task_dir.join("input.csv");
    working.write_csv(&input_path)?;

    let bound_columns = match session.reset(&input_path) {
        Ok(columns) => columns,
        Err(err) => {
            warn!(task_id = %spec.task_id, error = %format!("{err:#}"), "session reset failed");
            return Ok(failed_before_attempts(spec, ErrorKind::Unknown));
        }
    };
    debug!(task_id = %spec.task_id, columns = bound_columns.len(), "session ready");

    let staged = store.staged(&staging_dir, spec);
    let ctx = TaskContext {
        spec,
        working: &working,
        bound_columns: &bound_columns,
        store,
        staged: &staged,
        task_dir: &task_dir,
    };
    let result = run_task(generator, session, &ctx, loop_options)?;

    let status = TaskStatus::from(result.terminal);
    let artifacts_written = if status.is_success() {
        store
            .commit(&staged)?
            .into_iter()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(TaskReport {
        task_id: spec.task_id.clone(),
        status,
        attempts_used: result.attempts_used(),
        artifacts_written,
        error_kind: result.failure_kind(),
    })
}

/// Build the task's working table: identifier columns plus requested base
/// columns, left-joined with each upstream artifact on the identifier
/// columns. Joins are always key-based; artifact tables are column-sparse
/// and carry no positional relationship to the base rows.
fn resolve_inputs(
    graph: &TaskGraph,
    store: &ArtifactStore,
    spec: &TaskSpec,
    dataset_path: &Path,
) -> Result<Table> {
    let base = Table::read_csv(dataset_path)?;

    let mut wanted: Vec<String> = store.id_columns().to_vec();
    for variable in graph.base_inputs_of(&spec.task_id) {
        if !wanted.contains(&variable) {
            wanted.push(variable);
        }
    }
    let mut working = base.select(&wanted)?;

    for (upstream_id, variables) in graph.dependencies_of(&spec.task_id) {
        let upstream = graph
            .get(&upstream_id)
            .with_context(|| format!("upstream task '{upstream_id}' missing from graph"))?;
        let artifact = store
            .load_results(upstream)
            .with_context(|| format!("load artifact of upstream task '{upstream_id}'"))?;

        let mut carried: Vec<String> = store.id_columns().to_vec();
        carried.extend(variables);
        let narrowed = artifact.select(&carried).with_context(|| {
            format!("select consumed columns from artifact of '{upstream_id}'")
        })?;
        working = working
            .left_join(&narrowed, store.id_columns())
            .with_context(|| format!("join artifact of '{upstream_id}'"))?;
    }

    Ok(working)
}

fn skipped(spec: &TaskSpec, status: TaskStatus) -> TaskReport {
    TaskReport {
        task_id: spec.task_id.clone(),
        status,
        attempts_used: 0,
        artifacts_written: Vec::new(),
        error_kind: None,
    }
}

fn failed_before_attempts(spec: &TaskSpec, kind: ErrorKind) -> TaskReport {
    TaskReport {
        task_id: spec.task_id.clone(),
        status: TaskStatus::AbortedMaxAttempts,
        attempts_used: 0,
        artifacts_written: Vec::new(),
        error_kind: Some(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecOutcome;
    use crate::io::plan_store::Plan;
    use crate::test_support::{
        ScriptedExec, ScriptedGenerator, ScriptedSession, TestWorkspace, fenced, task,
    };

    const DATASET: &str = "id,text\n1,alpha\n2,beta\n";

    fn results_exec(workspace: &TestWorkspace, task_id: &str, contents: &str) -> ScriptedExec {
        ScriptedExec {
            outcome: ExecOutcome::ok(""),
            files: vec![(
                workspace
                    .paths
                    .task_dir("run-001", task_id)
                    .join("staging")
                    .join(format!("{task_id}_results.csv")),
                contents.to_string(),
            )],
        }
    }

    fn failing_exec(message: &str) -> ScriptedExec {
        ScriptedExec {
            outcome: ExecOutcome::failed("", message),
            files: Vec::new(),
        }
    }

    fn build_graph(workspace: &TestWorkspace, plan: &Plan) -> TaskGraph {
        let header =
            crate::io::dataset::read_header(&workspace.root().join("data/dataset.csv"))
                .expect("header");
        TaskGraph::build(&plan.tasks, &header).expect("graph")
    }

    /// Independent branch keeps running when a sibling fails terminally.
    ///
    /// a (outputs x) succeeds; b (inputs x) fails every attempt; c (inputs x,
    /// independent of b) must still run to completion.
    #[test]
    fn failed_branch_does_not_stop_independent_branch() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write_dataset(DATASET).expect("dataset");
        let plan = Plan {
            tasks: vec![
                task("a", &["text"], &["x"]),
                task("b", &["x"], &["y"]),
                task("c", &["x"], &["z"]),
            ],
        };
        let graph = build_graph(&workspace, &plan);
        let config = workspace.config();

        // b consumes three attempts with distinct error kinds.
        let generator = ScriptedGenerator::new(vec![
            fenced("a()"),
            fenced("b1()"),
            fenced("b2()"),
            fenced("b3()"),
            fenced("c()"),
        ]);
        let mut session = ScriptedSession::new(
            workspace.root(),
            vec![
                results_exec(&workspace, "a", "id,x\n1,0.1\n2,0.2\n"),
                failing_exec("TypeError: bad operand"),
                failing_exec("KeyError: 'x2'"),
                failing_exec("ValueError: bad shape"),
                results_exec(&workspace, "c", "id,z\n1,10\n2,20\n"),
            ],
        );

        let report = run_plan(
            &workspace.paths,
            &config,
            &graph,
            &generator,
            &mut session,
            "run-001",
            &RunOptions::default(),
        )
        .expect("run");

        assert_eq!(report.tasks.len(), 3);
        let by_id = |id: &str| {
            report
                .tasks
                .iter()
                .find(|t| t.task_id == id)
                .expect("task report")
        };
        assert_eq!(by_id("a").status, TaskStatus::Succeeded);
        assert_eq!(by_id("b").status, TaskStatus::AbortedMaxAttempts);
        assert_eq!(by_id("b").attempts_used, 3);
        assert!(by_id("b").error_kind.is_some());
        assert_eq!(by_id("c").status, TaskStatus::Succeeded);

        assert!(workspace.paths.artifacts_dir.join("a_results.csv").is_file());
        assert!(workspace.paths.artifacts_dir.join("c_results.csv").is_file());
        assert!(!workspace.paths.artifacts_dir.join("b_results.csv").exists());
        assert!(workspace.paths.report_path("run-001").is_file());
    }

    /// Dependents of a failed task are skipped, not executed.
    #[test]
    fn dependents_of_failed_task_are_skipped() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write_dataset(DATASET).expect("dataset");
        let plan = Plan {
            tasks: vec![
                task("a", &["text"], &["x"]),
                task("b", &["x"], &["y"]),
                task("c", &["y"], &["z"]),
            ],
        };
        let graph = build_graph(&workspace, &plan);
        let config = workspace.config();

        // a fails with the same kind twice and aborts early; b and c must
        // never reach the generator.
        let generator = ScriptedGenerator::new(vec![fenced("a1()"), fenced("a2()")]);
        let mut session = ScriptedSession::new(
            workspace.root(),
            vec![
                failing_exec("KeyError: 'text2'"),
                failing_exec("KeyError: 'text2'"),
            ],
        );

        let report = run_plan(
            &workspace.paths,
            &config,
            &graph,
            &generator,
            &mut session,
            "run-001",
            &RunOptions::default(),
        )
        .expect("run");

        assert_eq!(report.tasks[0].status, TaskStatus::AbortedRepeatedError);
        assert_eq!(report.tasks[0].error_kind, Some(ErrorKind::ColumnNotFound));
        assert_eq!(report.tasks[1].status, TaskStatus::SkippedDueToDependency);
        assert_eq!(report.tasks[2].status, TaskStatus::SkippedDueToDependency);
        assert_eq!(generator.remaining(), 0);
        assert_eq!(session.runs_used(), 2);
    }

    /// Downstream tasks see upstream outputs joined by identifier, not by
    /// row position.
    #[test]
    fn downstream_input_joins_artifact_by_id() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write_dataset(DATASET).expect("dataset");
        let plan = Plan {
            tasks: vec![
                task("score", &["text"], &["score"]),
                task("rank", &["score"], &["rank"]),
            ],
        };
        let graph = build_graph(&workspace, &plan);
        let config = workspace.config();

        let generator = ScriptedGenerator::new(vec![fenced("score()"), fenced("rank()")]);
        // The artifact lists ids in reverse order; the join must realign them.
        let mut session = ScriptedSession::new(
            workspace.root(),
            vec![
                results_exec(&workspace, "score", "id,score\n2,0.9\n1,0.1\n"),
                results_exec(&workspace, "rank", "id,rank\n1,2\n2,1\n"),
            ],
        );

        run_plan(
            &workspace.paths,
            &config,
            &graph,
            &generator,
            &mut session,
            "run-001",
            &RunOptions::default(),
        )
        .expect("run");

        let input = std::fs::read_to_string(
            workspace.paths.task_dir("run-001", "rank").join("input.csv"),
        )
        .expect("input");
        let mut lines = input.lines();
        assert_eq!(lines.next(), Some("id,score"));
        assert_eq!(lines.next(), Some("1,0.1"));
        assert_eq!(lines.next(), Some("2,0.9"));
    }

    /// An expired deadline skips every task not yet started.
    #[test]
    fn expired_deadline_skips_remaining_tasks() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write_dataset(DATASET).expect("dataset");
        let plan = Plan {
            tasks: vec![task("a", &["text"], &["x"]), task("b", &["x"], &["y"])],
        };
        let graph = build_graph(&workspace, &plan);
        let config = workspace.config();

        let generator = ScriptedGenerator::new(Vec::new());
        let mut session = ScriptedSession::new(workspace.root(), Vec::new());

        let report = run_plan(
            &workspace.paths,
            &config,
            &graph,
            &generator,
            &mut session,
            "run-001",
            &RunOptions {
                deadline: Some(Duration::from_secs(0)),
            },
        )
        .expect("run");

        assert!(
            report
                .tasks
                .iter()
                .all(|t| t.status == TaskStatus::SkippedDueToTimeout)
        );
        assert_eq!(session.reset_count(), 0);
    }

    /// Re-running a task with identical inputs and a deterministic generator
    /// produces a byte-identical artifact.
    #[test]
    fn rerun_produces_byte_identical_artifact() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.write_dataset(DATASET).expect("dataset");
        let plan = Plan {
            tasks: vec![task("a", &["text"], &["x"])],
        };
        let graph = build_graph(&workspace, &plan);
        let config = workspace.config();
        let artifact = workspace.paths.artifacts_dir.join("a_results.csv");

        for run_id in ["run-001", "run-002"] {
            let generator = ScriptedGenerator::new(vec![fenced("a()")]);
            let mut session = ScriptedSession::new(
                workspace.root(),
                vec![ScriptedExec {
                    outcome: ExecOutcome::ok(""),
                    files: vec![(
                        workspace
                            .paths
                            .task_dir(run_id, "a")
                            .join("staging/a_results.csv"),
                        "id,x\n1,0.1\n2,0.2\n".to_string(),
                    )],
                }],
            );
            run_plan(
                &workspace.paths,
                &config,
                &graph,
                &generator,
                &mut session,
                run_id,
                &RunOptions::default(),
            )
            .expect("run");
        }

        let bytes = std::fs::read(&artifact).expect("artifact");
        assert_eq!(bytes, b"id,x\n1,0.1\n2,0.2\n");
    }
}
