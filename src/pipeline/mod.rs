//! Deployment pipeline — build, publish and roll out the container image.
//!
//! Six steps run strictly in sequence. Each success gates the next; the
//! first failure aborts the run. No retries, no rollback.

pub mod runner;
pub mod step;

use crate::core::types::Trigger;
use std::time::Duration;
use step::StepKind;
use thiserror::Error;

pub use runner::{run_pipeline, PipelineReport, PipelineRun, ShellStepRunner, StepRunner};
pub use step::{PipelineStep, Secrets};

/// Errors raised while running the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing secret '{secret}': environment variable '{var}' is not set")]
    MissingSecret { secret: &'static str, var: String },

    #[error("step {step} failed with exit code {exit_code}: {stderr}")]
    StepFailed {
        step: StepKind,
        exit_code: i32,
        stderr: String,
    },

    #[error("step {step} timed out after {limit:?}")]
    StepTimedOut { step: StepKind, limit: Duration },

    #[error("cannot spawn step {step}: {source}")]
    Spawn {
        step: StepKind,
        #[source]
        source: std::io::Error,
    },

    #[error("event log: {0}")]
    EventLog(String),
}

impl PipelineError {
    /// The step the error belongs to, if any.
    pub fn step(&self) -> Option<StepKind> {
        match self {
            PipelineError::StepFailed { step, .. }
            | PipelineError::StepTimedOut { step, .. }
            | PipelineError::Spawn { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// A source-control event that may start the pipeline.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub event: String,
    pub branch: String,
    pub commit: Option<String>,
}

impl TriggerEvent {
    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch_name(&self) -> &str {
        self.branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.branch)
    }

    /// Whether the configured trigger fires for this event.
    pub fn matches(&self, trigger: &Trigger) -> bool {
        self.event == trigger.event && self.branch_name() == trigger.branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event: &str, branch: &str) -> TriggerEvent {
        TriggerEvent {
            event: event.to_string(),
            branch: branch.to_string(),
            commit: None,
        }
    }

    #[test]
    fn test_dh017_trigger_push_to_main() {
        let trigger = Trigger::default();
        assert!(event("push", "main").matches(&trigger));
        assert!(event("push", "refs/heads/main").matches(&trigger));
    }

    #[test]
    fn test_dh017_trigger_skips_other_events() {
        let trigger = Trigger::default();
        assert!(!event("pull_request", "main").matches(&trigger));
        assert!(!event("push", "feature/x").matches(&trigger));
        assert!(!event("push", "refs/tags/main").matches(&trigger));
    }

    #[test]
    fn test_dh017_error_step() {
        let err = PipelineError::StepTimedOut {
            step: StepKind::Deploy,
            limit: Duration::from_secs(600),
        };
        assert_eq!(err.step(), Some(StepKind::Deploy));
        assert_eq!(err.to_string(), "step deploy timed out after 600s");
        let err = PipelineError::StepTimedOut {
            step: StepKind::Push,
            limit: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "step push timed out after 200ms");
        let err = PipelineError::EventLog("disk full".to_string());
        assert_eq!(err.step(), None);
    }
}
