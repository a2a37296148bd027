//! Test-only helpers: scripted backends and disposable workspaces.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::{ExecOutcome, TaskSpec};
use crate::io::config::{PipelineConfig, load_config};
use crate::io::dataset::read_header;
use crate::io::generator::{GenRequest, Generator};
use crate::io::paths::{InitOptions, WorkspacePaths, init_workspace};
use crate::io::plan_store::{Plan, write_plan};
use crate::io::session::Session;

/// Create a deterministic task spec with default hints.
pub fn task(id: &str, inputs: &[&str], outputs: &[&str]) -> TaskSpec {
    TaskSpec {
        task_id: id.to_string(),
        objective: format!("{id} objective"),
        input_variables: inputs.iter().map(|name| (*name).to_string()).collect(),
        output_variables: outputs.iter().map(|name| (*name).to_string()).collect(),
        hints: Default::default(),
    }
}

/// Wrap code in the fenced block convention the extraction logic prefers.
pub fn fenced(code: &str) -> String {
    format!("```python\n{code}\n```")
}

/// Generator that replays queued responses and records every prompt.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .context("no scripted response left")
    }
}

/// One scripted `run_code` outcome, with files to materialize on execution.
pub struct ScriptedExec {
    pub outcome: ExecOutcome,
    /// Files the "executed code" writes, as absolute paths.
    pub files: Vec<(PathBuf, String)>,
}

/// Session that replays queued execution outcomes without spawning processes.
///
/// `reset` reads the header of the dataset it is given, so the reported bound
/// columns reflect the real working table.
pub struct ScriptedSession {
    root: PathBuf,
    script: VecDeque<ScriptedExec>,
    resets: u32,
    runs: u32,
}

impl ScriptedSession {
    pub fn new(root: &Path, script: Vec<ScriptedExec>) -> Self {
        Self {
            root: root.to_path_buf(),
            script: script.into(),
            resets: 0,
            runs: 0,
        }
    }

    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    pub fn runs_used(&self) -> u32 {
        self.runs
    }
}

impl Session for ScriptedSession {
    fn reset(&mut self, dataset: &Path) -> Result<Vec<String>> {
        self.resets += 1;
        read_header(dataset)
    }

    fn run_code(&mut self, _code: &str) -> Result<ExecOutcome> {
        self.runs += 1;
        let exec = self
            .script
            .pop_front()
            .context("no scripted execution left")?;
        for (path, contents) in &exec.files {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(exec.outcome)
    }

    fn run_shell(&mut self, _command: &str) -> Result<ExecOutcome> {
        Ok(ExecOutcome::ok(""))
    }

    fn read_file(&mut self, path: &Path, _limit: Option<usize>) -> Result<String> {
        fs::read_to_string(self.root.join(path)).with_context(|| format!("read {}", path.display()))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        fs::write(self.root.join(path), contents)
            .with_context(|| format!("write {}", path.display()))
    }
}

/// Disposable initialized workspace backed by a temp directory.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    pub paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = init_workspace(temp.path(), &InitOptions { force: false })?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Write the base dataset at the default configured location.
    pub fn write_dataset(&self, contents: &str) -> Result<PathBuf> {
        let path = self.root().join("data/dataset.csv");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_plan(&self, plan: &Plan) -> Result<()> {
        write_plan(&self.paths.plan_path, plan)
    }

    pub fn config(&self) -> PipelineConfig {
        load_config(&self.paths.config_path).expect("workspace config loads")
    }
}
