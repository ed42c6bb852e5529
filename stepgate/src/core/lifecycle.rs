//! Job lifecycle transitions.
//!
//! ```text
//! PLANNING -> READY -> EXECUTING <-> PAUSED
//!                      EXECUTING  -> COMPLETE | FAILED
//! any      -> ARCHIVED
//! ```
//!
//! Transitions never error: wrong-state requests produce
//! [`TransitionOutcome::Rejected`] with a stable message.

use serde::{Deserialize, Serialize};

use crate::core::policies::{Policies, RetryExhaustedAction};
use crate::core::types::{Job, JobStatus, NextAction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied { from: JobStatus, to: JobStatus },
    Unchanged { status: JobStatus },
    Rejected { status: JobStatus, reason: String },
}

impl TransitionOutcome {
    /// True for applied and no-op transitions.
    pub fn is_success(&self) -> bool {
        !matches!(self, TransitionOutcome::Rejected { .. })
    }

    pub fn status(&self) -> JobStatus {
        match self {
            TransitionOutcome::Applied { to, .. } => *to,
            TransitionOutcome::Unchanged { status } | TransitionOutcome::Rejected { status, .. } => {
                *status
            }
        }
    }
}

/// Result of a set-ready request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyReport {
    pub ready: bool,
    pub status: JobStatus,
    pub missing_artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Planning artifacts still missing before the job may become READY.
pub fn missing_artifacts(job: &Job) -> Vec<String> {
    let mut missing = Vec::new();
    if !job.deliverables.iter().any(|d| !d.trim().is_empty()) {
        missing.push("deliverables".to_string());
    }
    if !job.definition_of_done.iter().any(|d| !d.trim().is_empty()) {
        missing.push("definition_of_done".to_string());
    }
    if job.invariants.is_none() {
        missing.push("invariants".to_string());
    }
    if job.step_order.is_empty() {
        missing.push("steps".to_string());
    }
    missing
}

pub fn set_ready(job: &mut Job) -> ReadyReport {
    match job.status {
        JobStatus::Planning => {
            let missing = missing_artifacts(job);
            if missing.is_empty() {
                apply(job, JobStatus::Ready);
                ReadyReport {
                    ready: true,
                    status: job.status,
                    missing_artifacts: missing,
                    reason: None,
                }
            } else {
                ReadyReport {
                    ready: false,
                    status: job.status,
                    missing_artifacts: missing,
                    reason: Some("planning artifacts missing".to_string()),
                }
            }
        }
        JobStatus::Ready => ReadyReport {
            ready: true,
            status: job.status,
            missing_artifacts: Vec::new(),
            reason: None,
        },
        other => ReadyReport {
            ready: false,
            status: other,
            missing_artifacts: Vec::new(),
            reason: Some(format!("job is {other}, not PLANNING")),
        },
    }
}

pub fn start(job: &mut Job) -> TransitionOutcome {
    match job.status {
        JobStatus::Ready => transition(job, JobStatus::Executing),
        JobStatus::Executing => TransitionOutcome::Unchanged {
            status: job.status,
        },
        other => rejected(other, "start requires READY"),
    }
}

pub fn pause(job: &mut Job) -> TransitionOutcome {
    match job.status {
        JobStatus::Executing => transition(job, JobStatus::Paused),
        JobStatus::Paused => TransitionOutcome::Unchanged {
            status: job.status,
        },
        other => rejected(other, "pause requires EXECUTING"),
    }
}

pub fn resume(job: &mut Job) -> TransitionOutcome {
    match job.status {
        JobStatus::Paused => transition(job, JobStatus::Executing),
        JobStatus::Executing => TransitionOutcome::Unchanged {
            status: job.status,
        },
        other => rejected(other, "resume requires PAUSED"),
    }
}

pub fn archive(job: &mut Job) -> TransitionOutcome {
    match job.status {
        JobStatus::Archived => TransitionOutcome::Unchanged {
            status: job.status,
        },
        _ => transition(job, JobStatus::Archived),
    }
}

/// States in which the plan may be replaced.
pub fn can_replan(status: JobStatus) -> bool {
    matches!(
        status,
        JobStatus::Planning | JobStatus::Ready | JobStatus::Paused
    )
}

/// States in which planning inputs may be edited.
pub fn can_edit_planning(status: JobStatus) -> bool {
    matches!(status, JobStatus::Planning | JobStatus::Ready)
}

/// Advance the cursor after an accepted submission.
pub fn advance(job: &mut Job) -> NextAction {
    let len = job.step_order.len();
    job.current_step_index = (job.current_step_index + 1).min(len);
    job.touch();
    if job.current_step_index >= len {
        apply(job, JobStatus::Complete);
        NextAction::JobComplete
    } else {
        NextAction::NextStepAvailable
    }
}

/// Apply retry policy after a rejection; `rejections` includes this one.
pub fn escalate(job: &mut Job, policies: &Policies, rejections: u32) -> NextAction {
    if !policies.retries_exhausted(rejections) {
        return NextAction::Retry;
    }
    match policies.retry_exhausted_action {
        RetryExhaustedAction::PauseForHuman => {
            apply(job, JobStatus::Paused);
            NextAction::PauseForHuman
        }
        RetryExhaustedAction::FailJob => {
            apply(job, JobStatus::Failed);
            NextAction::JobFailed
        }
        RetryExhaustedAction::Continue => NextAction::Retry,
    }
}

fn transition(job: &mut Job, to: JobStatus) -> TransitionOutcome {
    let from = job.status;
    apply(job, to);
    TransitionOutcome::Applied { from, to }
}

fn apply(job: &mut Job, to: JobStatus) {
    job.status = to;
    job.touch();
}

fn rejected(status: JobStatus, requirement: &str) -> TransitionOutcome {
    TransitionOutcome::Rejected {
        status,
        reason: format!("{requirement} (job is {status})"),
    }
}
