//! Generation backend abstraction for code synthesis.
//!
//! The [`Generator`] trait decouples the synthesis loop from the actual model
//! endpoint. The production backend shells out to a configured command that
//! reads the request on stdin and writes free text to stdout; the loop owns
//! all parsing of that text because its format is not contractually
//! structured. Tests use scripted generators that return predetermined
//! responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenRequest {
    /// Rendered request text fed to the backend.
    pub prompt: String,
    /// Maximum time to wait for a completion.
    pub timeout: Duration,
    /// Truncate backend output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over text-generation backends.
pub trait Generator {
    /// Produce free text for the request. The caller extracts code from it.
    fn generate(&self, request: &GenRequest) -> Result<String>;
}

/// Generator that spawns a configured completion command.
pub struct CommandGenerator {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
        }
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenRequest) -> Result<String> {
        info!(command = %self.command[0], "requesting completion");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&self.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run completion command '{}'", self.command[0]))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "completion timed out");
            return Err(anyhow!(
                "completion command timed out after {:?}",
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "completion command failed");
            return Err(anyhow!(
                "completion command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        debug!(bytes = output.stdout.len(), "completion received");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
