//! Pipeline configuration stored under `.pipeline/state/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub generator: GeneratorConfig,
    pub session: SessionConfig,
    pub coding: CodingConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Base dataset CSV, relative to the workspace root.
    pub path: PathBuf,
    /// Stable key columns present in every artifact, used for joins.
    pub id_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and writes a completion to stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate generator output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Interpreter command hosting the execution session.
    pub python: Vec<String>,
    pub code_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    /// Truncate shell output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodingConfig {
    /// Maximum synthesize-execute attempts per task.
    pub max_attempts: u32,
    /// Abort a task once one error kind recurs this many times.
    pub repetition_threshold: u32,
    /// Maximum bytes for a generation request before dropping sections.
    pub prompt_budget_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock budget for a whole run in seconds. Zero disables it.
    pub deadline_secs: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dataset.csv"),
            id_columns: vec!["id".to_string()],
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm-complete".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            python: vec!["python3".to_string()],
            code_timeout_secs: 5 * 60,
            shell_timeout_secs: 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for CodingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            repetition_threshold: 2,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { deadline_secs: 0 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            generator: GeneratorConfig::default(),
            session: SessionConfig::default(),
            coding: CodingConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dataset.id_columns.is_empty() {
            return Err(anyhow!("dataset.id_columns must not be empty"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.session.python.is_empty() || self.session.python[0].trim().is_empty() {
            return Err(anyhow!("session.python must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.session.code_timeout_secs == 0 || self.session.shell_timeout_secs == 0 {
            return Err(anyhow!("session timeouts must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 || self.session.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.coding.max_attempts == 0 {
            return Err(anyhow!("coding.max_attempts must be > 0"));
        }
        if self.coding.repetition_threshold == 0 {
            return Err(anyhow!("coding.repetition_threshold must be > 0"));
        }
        if self.coding.prompt_budget_bytes == 0 {
            return Err(anyhow!("coding.prompt_budget_bytes must be > 0"));
        }
        Ok(())
    }

    /// Run deadline as a duration, when configured.
    pub fn deadline(&self) -> Option<Duration> {
        (self.run.deadline_secs > 0).then(|| Duration::from_secs(self.run.deadline_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
