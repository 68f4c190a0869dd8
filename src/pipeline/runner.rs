//! DH-018: Pipeline execution — run steps in order, record provenance.

use super::step::{self, PipelineStep, Secrets, StepKind};
use super::{PipelineError, TriggerEvent};
use crate::core::types::{PipelineSpec, ProvenanceEvent};
use crate::tripwire::eventlog;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Captured output of one step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes a single step. Non-zero exits are returned as output, not errors.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &PipelineStep) -> Result<StepOutput, PipelineError>;
}

/// Runs steps through `bash -o pipefail -c`, bounded by the step timeout.
pub struct ShellStepRunner;

#[async_trait]
impl StepRunner for ShellStepRunner {
    async fn run(&self, step: &PipelineStep) -> Result<StepOutput, PipelineError> {
        let mut std_command = std::process::Command::new("bash");
        std_command
            .args(["-o", "pipefail", "-c", step.command.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own group, so a timeout reaches every process the step started
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_command, 0);

        let child = Command::from(std_command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                step: step.kind,
                source,
            })?;
        let pid = child.id();

        let output = match step.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    return Err(PipelineError::StepTimedOut {
                        step: step.kind,
                        limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| PipelineError::Spawn {
            step: step.kind,
            source,
        })?;

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes plain integers and only sends a signal.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "cannot kill step process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Inputs of one pipeline run.
pub struct PipelineRun<'a> {
    pub spec: &'a PipelineSpec,
    pub secrets: &'a Secrets,
    pub trigger: &'a TriggerEvent,
    /// `pipeline.jsonl` to append to; None disables provenance
    pub event_log: Option<&'a Path>,
}

/// Result of one executed step. Output is already redacted.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub kind: StepKind,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: String,

    /// Steps that ran, in order; the last one failed if `failure` is set
    pub steps: Vec<StepResult>,

    pub failure: Option<PipelineError>,

    pub total_duration: Duration,
}

impl PipelineReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// The step that aborted the run.
    pub fn failed_step(&self) -> Option<StepKind> {
        self.failure.as_ref().and_then(PipelineError::step)
    }

    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }
}

fn record(run: &PipelineRun, event: ProvenanceEvent) -> Result<(), PipelineError> {
    match run.event_log {
        Some(path) => eventlog::append_event(path, event).map_err(PipelineError::EventLog),
        None => Ok(()),
    }
}

/// Run every step in order, stopping at the first failure.
///
/// Errors are returned only when provenance cannot be written; step
/// failures land in the report.
pub async fn run_pipeline<R>(run: &PipelineRun<'_>, runner: &R) -> Result<PipelineReport, PipelineError>
where
    R: StepRunner + ?Sized,
{
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let steps = step::plan_steps(run.spec, run.secrets, run.trigger.commit.as_deref());

    info!(run_id = %run_id, branch = %run.trigger.branch_name(), "pipeline started");
    record(
        run,
        ProvenanceEvent::PipelineStarted {
            run_id: run_id.clone(),
            branch: run.trigger.branch_name().to_string(),
            commit: run.trigger.commit.clone(),
        },
    )?;

    let mut results = Vec::with_capacity(steps.len());
    let mut failure = None;

    for step in &steps {
        info!(
            run_id = %run_id,
            step = %step.kind,
            command = %run.secrets.redact(&step.command),
            "running step"
        );
        record(
            run,
            ProvenanceEvent::StepStarted {
                run_id: run_id.clone(),
                step: step.kind.to_string(),
            },
        )?;

        let step_start = Instant::now();
        let outcome = runner.run(step).await;
        let duration = step_start.elapsed();

        let (result, err) = match outcome {
            Ok(out) => {
                let result = StepResult {
                    kind: step.kind,
                    success: out.success(),
                    exit_code: Some(out.exit_code),
                    stdout: run.secrets.redact(&out.stdout),
                    stderr: run.secrets.redact(&out.stderr),
                    duration,
                };
                let err = (!out.success()).then(|| PipelineError::StepFailed {
                    step: step.kind,
                    exit_code: out.exit_code,
                    stderr: result.stderr.trim().to_string(),
                });
                (result, err)
            }
            Err(e) => (
                StepResult {
                    kind: step.kind,
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration,
                },
                Some(e),
            ),
        };
        results.push(result);

        match err {
            None => {
                info!(run_id = %run_id, step = %step.kind, seconds = duration.as_secs_f64(), "step succeeded");
                record(
                    run,
                    ProvenanceEvent::StepSucceeded {
                        run_id: run_id.clone(),
                        step: step.kind.to_string(),
                        duration_seconds: duration.as_secs_f64(),
                    },
                )?;
            }
            Some(e) => {
                let message = run.secrets.redact(&e.to_string());
                error!(run_id = %run_id, step = %step.kind, error = %message, "step failed");
                record(
                    run,
                    ProvenanceEvent::StepFailed {
                        run_id: run_id.clone(),
                        step: step.kind.to_string(),
                        error: message,
                    },
                )?;
                failure = Some(e);
                break;
            }
        }
    }

    let total_duration = start.elapsed();
    record(
        run,
        ProvenanceEvent::PipelineCompleted {
            run_id: run_id.clone(),
            success: failure.is_none(),
            total_seconds: total_duration.as_secs_f64(),
        },
    )?;
    info!(run_id = %run_id, success = failure.is_none(), "pipeline finished");

    Ok(PipelineReport {
        run_id,
        steps: results,
        failure,
        total_duration,
    })
}
