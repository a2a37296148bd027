//! Iterative code synthesis for a single task.
//!
//! One task runs as an explicit state machine: `Synthesizing` builds a
//! generation request and extracts code from the response, `Executing`
//! submits it to the session and checks the artifact contract, `Diagnosing`
//! classifies failures and decides between another round and giving up.
//! Termination is bounded by construction: every pass through `Diagnosing`
//! either ends the task or consumes one of a fixed number of attempts, and a
//! repeated error kind ends it early because further retries are provably
//! unproductive.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{self, Classification, ErrorKind};
use crate::core::extract::extract_code;
use crate::core::types::{
    AttemptOutcome, AttemptRecord, ExecOutcome, TaskSpec, TerminalStatus,
};
use crate::io::artifacts::{ArtifactStore, StagedArtifacts};
use crate::io::dataset::Table;
use crate::io::generator::{GenRequest, Generator};
use crate::io::prompt::{ColumnInfo, PriorAttempt, PromptBuilder, PromptInputs};
use crate::io::report::write_attempt;
use crate::io::session::Session;

/// Attempt and budget limits for the synthesis loop.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub max_attempts: u32,
    /// Abort once one error kind recurs this many times within the task.
    pub repetition_threshold: u32,
    pub prompt_budget_bytes: usize,
    pub gen_timeout: Duration,
    pub gen_output_limit_bytes: usize,
}

/// Everything the loop needs to know about the task being solved.
pub struct TaskContext<'a> {
    pub spec: &'a TaskSpec,
    /// Resolved input table the session has loaded as `df`.
    pub working: &'a Table,
    /// Column names concretely bound in the session after reset.
    pub bound_columns: &'a [String],
    pub store: &'a ArtifactStore,
    pub staged: &'a StagedArtifacts,
    /// Directory receiving per-attempt code and diagnostic logs.
    pub task_dir: &'a Path,
}

/// Final state of the loop for one task.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub terminal: TerminalStatus,
    pub attempts: Vec<AttemptRecord>,
    /// Code of the last submitted attempt, accepted code on success.
    pub code: Option<String>,
}

impl LoopResult {
    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Error kind of the deciding failure, for the run report.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.terminal == TerminalStatus::Succeeded {
            return None;
        }
        self.attempts.iter().rev().find_map(|record| record.error_kind)
    }
}

enum Phase {
    Synthesizing,
    Executing {
        code: String,
    },
    Diagnosing {
        code: Option<String>,
        class: Classification,
        outcome: AttemptOutcome,
    },
}

/// Drive one task to a terminal status.
///
/// All generation and execution failures are captured here and converted into
/// attempt records; nothing escapes as an error except log-writing itself.
#[instrument(skip_all, fields(task_id = %ctx.spec.task_id))]
pub fn run_task<G: Generator, S: Session>(
    generator: &G,
    session: &mut S,
    ctx: &TaskContext<'_>,
    options: &LoopOptions,
) -> Result<LoopResult> {
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut prior: Option<PriorAttempt> = None;
    let mut last_code: Option<String> = None;
    let mut synthesis_retry_available = true;
    let mut phase = Phase::Synthesizing;

    loop {
        match phase {
            Phase::Synthesizing => {
                let prompt = build_prompt(ctx, prior.as_ref(), options.prompt_budget_bytes);
                let request = GenRequest {
                    prompt,
                    timeout: options.gen_timeout,
                    output_limit_bytes: options.gen_output_limit_bytes,
                };
                let text = match generator.generate(&request) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "generation request failed");
                        phase = Phase::Diagnosing {
                            code: None,
                            class: Classification {
                                kind: ErrorKind::Unknown,
                                detail: format!("text generation failed: {err:#}"),
                                hint: "Retry with the same task context.".to_string(),
                            },
                            outcome: AttemptOutcome::RuntimeError,
                        };
                        continue;
                    }
                };

                match extract_code(&text) {
                    Ok(code) => {
                        synthesis_retry_available = true;
                        phase = Phase::Executing { code };
                    }
                    Err(_) if synthesis_retry_available => {
                        // One free retry: a fresh request often fixes a
                        // prose-only response without burning an attempt.
                        debug!("no code in response, retrying synthesis once");
                        synthesis_retry_available = false;
                    }
                    Err(_) => {
                        synthesis_retry_available = true;
                        phase = Phase::Diagnosing {
                            code: None,
                            class: classifier::synthesis_failure(text),
                            outcome: AttemptOutcome::StaticIssue,
                        };
                    }
                }
            }

            Phase::Executing { code } => {
                debug!(bytes = code.len(), "submitting code to session");
                let exec = match session.run_code(&code) {
                    Ok(exec) => exec,
                    Err(err) => ExecOutcome::failed("", format!("session failure: {err:#}")),
                };
                last_code = Some(code.clone());

                phase = match exec.error {
                    None => match ctx.store.verify_staged(ctx.staged, ctx.spec) {
                        Ok(()) => {
                            attempts.push(AttemptRecord {
                                outcome: AttemptOutcome::Success,
                                error_kind: None,
                                detail: String::new(),
                                code: Some(code),
                            });
                            write_attempt(
                                ctx.task_dir,
                                attempts.len(),
                                attempts.last().expect("attempt was just pushed"),
                            )?;
                            info!(attempts = attempts.len(), "task code accepted");
                            return Ok(LoopResult {
                                terminal: TerminalStatus::Succeeded,
                                attempts,
                                code: last_code,
                            });
                        }
                        Err(violation) => Phase::Diagnosing {
                            code: Some(code),
                            class: classifier::schema_violation(violation),
                            outcome: AttemptOutcome::StaticIssue,
                        },
                    },
                    Some(raw) => Phase::Diagnosing {
                        code: Some(code),
                        class: classifier::classify(&raw),
                        outcome: AttemptOutcome::RuntimeError,
                    },
                };
            }

            Phase::Diagnosing {
                code,
                class,
                outcome,
            } => {
                attempts.push(AttemptRecord {
                    outcome,
                    error_kind: Some(class.kind),
                    detail: class.detail.clone(),
                    code: code.clone(),
                });
                write_attempt(
                    ctx.task_dir,
                    attempts.len(),
                    attempts.last().expect("attempt was just pushed"),
                )?;
                debug!(kind = ?class.kind, detail = %class.detail, "attempt failed");

                let repeats = attempts
                    .iter()
                    .filter(|record| record.error_kind == Some(class.kind))
                    .count() as u32;
                if repeats >= options.repetition_threshold {
                    let terminal = if class.kind == ErrorKind::SynthesisFailure {
                        TerminalStatus::AbortedSynthesisFailure
                    } else {
                        TerminalStatus::AbortedRepeatedError
                    };
                    warn!(kind = ?class.kind, repeats, "repeated error, giving up");
                    return Ok(LoopResult {
                        terminal,
                        attempts,
                        code: last_code,
                    });
                }
                if attempts.len() as u32 >= options.max_attempts {
                    warn!(attempts = attempts.len(), "attempt budget exhausted");
                    return Ok(LoopResult {
                        terminal: TerminalStatus::AbortedMaxAttempts,
                        attempts,
                        code: last_code,
                    });
                }

                prior = Some(PriorAttempt {
                    code,
                    diagnostic: class.detail.clone(),
                    hint: class.hint_with_columns(ctx.bound_columns),
                });
                phase = Phase::Synthesizing;
            }
        }
    }
}

fn build_prompt(ctx: &TaskContext<'_>, prior: Option<&PriorAttempt>, budget: usize) -> String {
    let input_columns = ctx
        .working
        .columns()
        .iter()
        .map(|name| ColumnInfo {
            name: name.clone(),
            dtype: Some(ctx.working.infer_dtype(name).to_string()),
        })
        .collect();
    let output_columns = ctx
        .spec
        .output_variables
        .iter()
        .map(|name| ColumnInfo {
            name: name.clone(),
            dtype: ctx.spec.hints.column_types.get(name).cloned(),
        })
        .collect();
    let parameters = (!ctx.spec.hints.parameters.is_empty())
        .then(|| serde_json::to_string(&ctx.spec.hints.parameters).unwrap_or_default());

    let inputs = PromptInputs {
        task_id: ctx.spec.task_id.clone(),
        objective: ctx.spec.objective.clone(),
        row_count: ctx.working.len(),
        input_columns,
        id_columns: ctx.store.id_columns().to_vec(),
        output_columns,
        results_path: ctx
            .staged
            .results
            .as_ref()
            .map(|path| path.display().to_string()),
        model_path: ctx
            .staged
            .model
            .as_ref()
            .map(|path| path.display().to_string()),
        summary_path: ctx
            .staged
            .summary
            .as_ref()
            .map(|path| path.display().to_string()),
        algorithm: ctx.spec.hints.algorithm.clone(),
        parameters,
        history: prior.cloned(),
    };
    PromptBuilder::new(budget).build(&inputs)
}
