//! Pipeline CLI: scaffold a workspace, validate the plan, inspect the task
//! graph, and drive runs.
//!
//! Graph-level mistakes are caught by `validate` and at the start of `run`,
//! before any generation or execution cost is spent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use pipeline::core::graph::TaskGraph;
use pipeline::exit_codes;
use pipeline::io::config::{PipelineConfig, load_config};
use pipeline::io::dataset::read_header;
use pipeline::io::generator::CommandGenerator;
use pipeline::io::paths::{InitOptions, WorkspacePaths, allocate_run_id, init_workspace};
use pipeline::io::plan_store::load_plan;
use pipeline::io::session::{PythonSession, PythonSessionOptions};
use pipeline::run::{RunOptions, run_plan};

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Iterative code-synthesis pipeline over a tabular dataset"
)]
struct Cli {
    /// Workspace root containing `.pipeline/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.pipeline/` scaffolding (config, empty plan, schema).
    Init {
        /// Overwrite existing pipeline-owned files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, plan schema, and graph without executing anything.
    Validate,
    /// Print the topological execution order and dependency edges.
    Graph,
    /// Execute every task of the plan and write the run report.
    Run {
        /// Wall-clock budget in seconds, overriding the configured deadline.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

fn main() {
    pipeline::logging::init();
    let cli = Cli::parse();
    let code = match dispatch(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Init { force } => cmd_init(&cli.root, *force),
        Command::Validate => cmd_validate(&cli.root),
        Command::Graph => cmd_graph(&cli.root),
        Command::Run { deadline_secs } => cmd_run(&cli.root, *deadline_secs),
    }
}

/// Everything `validate` proves before a run may start.
struct Validated {
    paths: WorkspacePaths,
    config: PipelineConfig,
    graph: TaskGraph,
}

fn load_validated(root: &Path) -> Result<Validated> {
    let paths = WorkspacePaths::new(root);
    ensure_dir(&paths.pipeline_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_file(&paths.plan_path)?;

    let config = load_config(&paths.config_path).context("load config.toml")?;
    let plan = load_plan(&paths.plan_path).context("load plan.json")?;

    let dataset_path = paths.root.join(&config.dataset.path);
    let base_columns = read_header(&dataset_path).context("read dataset header")?;
    for id_column in &config.dataset.id_columns {
        if !base_columns.contains(id_column) {
            return Err(anyhow!(
                "identifier column '{id_column}' is not in the dataset header"
            ));
        }
    }

    let graph = TaskGraph::build(&plan.tasks, &base_columns).map_err(anyhow::Error::from)?;
    Ok(Validated {
        paths,
        config,
        graph,
    })
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.pipeline_dir.display());
    println!("config: {}", paths.config_path.display());
    println!("plan: {}", paths.plan_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let validated = load_validated(root)?;
    println!(
        "ok: {} tasks, order: {}",
        validated.graph.len(),
        validated.graph.order().join(" ")
    );
    Ok(exit_codes::OK)
}

fn cmd_graph(root: &Path) -> Result<i32> {
    let validated = load_validated(root)?;
    for task_id in validated.graph.order() {
        let dependents = validated.graph.dependents_of(task_id);
        if dependents.is_empty() {
            println!("{task_id}");
        } else {
            println!("{task_id} -> {}", dependents.join(", "));
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, deadline_secs: Option<u64>) -> Result<i32> {
    let validated = load_validated(root)?;
    let paths = &validated.paths;
    let config = &validated.config;

    let run_id = allocate_run_id(&paths.runs_dir)?;
    let generator = CommandGenerator::new(config.generator.command.clone(), &paths.root);
    let mut session = PythonSession::new(PythonSessionOptions {
        python: config.session.python.clone(),
        workdir: paths.root.clone(),
        code_timeout: Duration::from_secs(config.session.code_timeout_secs),
        shell_timeout: Duration::from_secs(config.session.shell_timeout_secs),
        output_limit_bytes: config.session.output_limit_bytes,
    });
    let options = RunOptions {
        deadline: deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .or_else(|| config.deadline()),
    };

    let report = run_plan(
        paths,
        config,
        &validated.graph,
        &generator,
        &mut session,
        &run_id,
        &options,
    )?;

    for task in &report.tasks {
        println!(
            "task={} status={:?} attempts={} artifacts={}",
            task.task_id,
            task.status,
            task.attempts_used,
            task.artifacts_written.join(",")
        );
    }
    println!("report: {}", paths.report_path(&run_id).display());

    if report.is_clean() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::PARTIAL)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(anyhow!(
            "missing directory {} (run `pipeline init` first)",
            path.display()
        ));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["pipeline", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_deadline() {
        let cli = Cli::parse_from(["pipeline", "run", "--deadline-secs", "120"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                deadline_secs: Some(120)
            }
        ));
    }

    #[test]
    fn parse_root_override() {
        let cli = Cli::parse_from(["pipeline", "--root", "/ws", "validate"]);
        assert_eq!(cli.root, PathBuf::from("/ws"));
    }
}
