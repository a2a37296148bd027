//! Stateful execution session hosting generated code.
//!
//! The [`Session`] trait decouples the synthesis loop and the orchestrator
//! from the actual interpreter backend. Tests use scripted sessions that
//! return predetermined outcomes without spawning processes.
//!
//! The production backend keeps a Python child process alive for the duration
//! of one task so bindings accumulate across submissions, and restarts it on
//! reset so no state leaks between tasks.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ExecOutcome;
use crate::io::process::run_command_with_timeout;

/// Stateful code-execution environment scoped to one task at a time.
pub trait Session {
    /// Clear all bindings and load `dataset` into a fresh `df` binding.
    ///
    /// Returns the column names concretely bound in the environment.
    fn reset(&mut self, dataset: &Path) -> Result<Vec<String>>;

    /// Execute a code snippet in the persistent namespace.
    ///
    /// Failures raised by the snippet are returned as structured results,
    /// never propagated as errors.
    fn run_code(&mut self, code: &str) -> Result<ExecOutcome>;

    /// Execute an OS-level command with the same output contract.
    fn run_shell(&mut self, command: &str) -> Result<ExecOutcome>;

    /// Read a file, truncated beyond `limit` bytes when given.
    fn read_file(&mut self, path: &Path, limit: Option<usize>) -> Result<String>;

    /// Write a file, creating parent directories.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;
}

/// Destructive command patterns rejected before execution.
const SHELL_DENYLIST: &[(&str, &str)] = &[
    ("rm -rf /", "recursive delete of a root path"),
    ("rm -fr /", "recursive delete of a root path"),
    ("sudo ", "privilege escalation"),
    ("su ", "privilege escalation"),
    ("mkfs", "filesystem format"),
    (":(){", "fork bomb"),
    ("> /dev/", "raw device write"),
    ("of=/dev/", "raw device write"),
    ("chmod -R 777 /", "recursive permission change on a root path"),
    ("shutdown", "host shutdown"),
    ("reboot", "host reboot"),
];

/// Reason a shell command is denied, if any pattern matches.
pub fn denied_reason(command: &str) -> Option<&'static str> {
    let trimmed = command.trim();
    SHELL_DENYLIST
        .iter()
        .find(|(pattern, _)| trimmed.contains(pattern))
        .map(|(_, reason)| *reason)
}

/// Timings and limits for the Python session backend.
#[derive(Debug, Clone)]
pub struct PythonSessionOptions {
    /// Interpreter argv, e.g. `["python3"]`.
    pub python: Vec<String>,
    pub workdir: PathBuf,
    pub code_timeout: Duration,
    pub shell_timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Session backend driving a persistent Python child over JSON lines.
pub struct PythonSession {
    options: PythonSessionOptions,
    child: Option<DriverChild>,
}

struct DriverChild {
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<std::io::Result<String>>,
}

const DRIVER: &str = include_str!("py/driver.py");

enum Reply {
    Value(Value),
    TimedOut,
}

impl PythonSession {
    pub fn new(options: PythonSessionOptions) -> Self {
        Self {
            options,
            child: None,
        }
    }

    #[instrument(skip_all)]
    fn spawn_driver(&self) -> Result<DriverChild> {
        let argv = &self.options.python;
        info!(interpreter = %argv[0], "starting session driver");
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .current_dir(&self.options.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn session driver '{}'", argv[0]))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("driver stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("driver stdout was not piped"))?;

        let (sender, replies) = channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if sender.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = sender.send(Err(err));
                        break;
                    }
                }
            }
        });

        Ok(DriverChild {
            child,
            stdin,
            replies,
        })
    }

    fn shutdown_driver(&mut self) {
        if let Some(mut driver) = self.child.take() {
            debug!("killing session driver");
            let _ = driver.child.kill();
            let _ = driver.child.wait();
        }
    }

    /// Send one request and wait for the driver's reply line.
    ///
    /// On timeout the child is killed so the next request starts a fresh
    /// driver; accumulated state is lost, which the caller surfaces as a
    /// classified timeout failure.
    fn request(&mut self, payload: &Value, timeout: Duration) -> Result<Reply> {
        if self.child.is_none() {
            self.child = Some(self.spawn_driver()?);
        }
        let driver = self.child.as_mut().expect("driver was just spawned");

        let mut line = serde_json::to_string(payload).context("serialize driver request")?;
        line.push('\n');
        if let Err(err) = driver.stdin.write_all(line.as_bytes()) {
            self.shutdown_driver();
            return Err(err).context("write driver request");
        }

        match driver.replies.recv_timeout(timeout) {
            Ok(Ok(reply)) => {
                let value =
                    serde_json::from_str(&reply).context("parse driver reply")?;
                Ok(Reply::Value(value))
            }
            Ok(Err(err)) => {
                self.shutdown_driver();
                Err(err).context("read driver reply")
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_secs = timeout.as_secs(), "session request timed out");
                self.shutdown_driver();
                Ok(Reply::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown_driver();
                Err(anyhow!("session driver exited unexpectedly"))
            }
        }
    }
}

impl Drop for PythonSession {
    fn drop(&mut self) {
        self.shutdown_driver();
    }
}

impl Session for PythonSession {
    fn reset(&mut self, dataset: &Path) -> Result<Vec<String>> {
        // A fresh child is the strongest reset: nothing survives it.
        self.shutdown_driver();
        let payload = json!({ "op": "reset", "dataset": dataset.to_string_lossy() });
        match self.request(&payload, self.options.code_timeout)? {
            Reply::TimedOut => Err(anyhow!("session reset timed out")),
            Reply::Value(reply) => {
                if reply["ok"].as_bool() != Some(true) {
                    return Err(anyhow!(
                        "session reset failed: {}",
                        reply["error"].as_str().unwrap_or("unknown driver error")
                    ));
                }
                let columns = reply["columns"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                debug!(?columns, "session reset");
                Ok(columns)
            }
        }
    }

    fn run_code(&mut self, code: &str) -> Result<ExecOutcome> {
        let payload = json!({ "op": "run", "code": code });
        let timeout = self.options.code_timeout;
        match self.request(&payload, timeout)? {
            Reply::TimedOut => Ok(ExecOutcome::failed(
                "",
                format!("code execution timed out after {}s", timeout.as_secs()),
            )),
            Reply::Value(reply) => {
                let stdout = reply["stdout"].as_str().unwrap_or_default().to_string();
                let error = reply["error"].as_str().map(str::to_string);
                Ok(ExecOutcome { stdout, error })
            }
        }
    }

    fn run_shell(&mut self, command: &str) -> Result<ExecOutcome> {
        if let Some(reason) = denied_reason(command) {
            warn!(command, reason, "shell command rejected");
            return Ok(ExecOutcome::failed(
                "",
                format!("command rejected: {reason}"),
            ));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.options.workdir);
        let output = run_command_with_timeout(
            cmd,
            None,
            self.options.shell_timeout,
            self.options.output_limit_bytes,
        )
        .context("run shell command")?;

        if output.timed_out {
            return Ok(ExecOutcome::failed(
                output.rendered("shell"),
                format!(
                    "shell command timed out after {}s",
                    self.options.shell_timeout.as_secs()
                ),
            ));
        }
        if !output.status.success() {
            return Ok(ExecOutcome::failed(
                output.rendered("shell"),
                format!("shell command failed with status {:?}", output.status.code()),
            ));
        }
        Ok(ExecOutcome::ok(output.rendered("shell")))
    }

    fn read_file(&mut self, path: &Path, limit: Option<usize>) -> Result<String> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let Some(limit) = limit else {
            return Ok(contents);
        };
        if contents.len() <= limit {
            return Ok(contents);
        }
        let mut end = limit;
        while !contents.is_char_boundary(end) {
            end -= 1;
        }
        Ok(format!(
            "{}\n[truncated {} bytes]\n",
            &contents[..end],
            contents.len() - end
        ))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        std::fs::write(path, contents).with_context(|| format!("write {}", path.display()))
    }
}
