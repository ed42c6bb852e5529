//! Test-only fixtures: deterministic jobs, steps, attempts and a scripted shell.

use std::collections::HashMap;
use std::fs;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;

use crate::core::policies::Policies;
use crate::core::types::{Attempt, AttemptOutcome, Evidence, Job, ModelClaim, Step};
use crate::io::shell::{ShellExecutor, ShellOutcome, ShellRequest};

/// Exit code reported for commands the script does not know about.
pub const UNSCRIPTED_EXIT_CODE: i32 = 127;

/// A step with a title and nothing else.
pub fn step(step_id: &str, order_index: usize) -> Step {
    Step {
        step_id: step_id.to_string(),
        order_index,
        title: format!("{step_id} title"),
        instruction_prompt: format!("Carry out {step_id}."),
        expected_outputs: Vec::new(),
        acceptance_criteria: Vec::new(),
        required_evidence: Vec::new(),
        gates: Vec::new(),
        remediation_prompt: String::new(),
        context_refs: Vec::new(),
        is_checkpoint: false,
        human_approved: false,
    }
}

/// A planned job with `count` steps `S1..S{count}` and `step_order` set.
pub fn job_with_steps(count: usize) -> (Job, Vec<Step>) {
    let mut job = Job::new("Fixture job", "Exercise the fixture", Policies::default());
    job.deliverables = vec!["fixture output".to_string()];
    job.definition_of_done = vec!["fixture accepted".to_string()];
    job.invariants = Some(Vec::new());
    let steps: Vec<Step> = (0..count)
        .map(|idx| step(&format!("S{}", idx + 1), idx))
        .collect();
    job.step_order = steps.iter().map(|s| s.step_id.clone()).collect();
    job.next_step_seq = count as u32 + 1;
    (job, steps)
}

/// An attempt record with empty evidence.
pub fn attempt(job_id: &str, step_id: &str, accepted: bool) -> Attempt {
    Attempt {
        attempt_id: uuid::Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        step_id: step_id.to_string(),
        created_at: Utc::now(),
        model_claim: if accepted {
            ModelClaim::Met
        } else {
            ModelClaim::NotMet
        },
        summary: format!("attempt on {step_id}"),
        evidence: Evidence::new(),
        outcome: if accepted {
            AttemptOutcome::Accepted
        } else {
            AttemptOutcome::Rejected
        },
        rejection_reasons: Vec::new(),
        missing_fields: Vec::new(),
        warnings: Vec::new(),
        gate_results: Vec::new(),
        devlog_line: None,
        commit_hash: None,
    }
}

/// A temporary repository containing `files` (relative path, contents).
pub fn scratch_repo(files: &[(&str, &str)]) -> Result<tempfile::TempDir> {
    let temp = tempfile::tempdir()?;
    for (relative, contents) in files {
        let path = temp.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(temp)
}

/// Shell executor returning canned outcomes keyed by the exact command.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    outcomes: HashMap<String, ShellOutcome>,
    calls: Mutex<Vec<ShellRequest>>,
}

impl ScriptedShell {
    pub fn with_exit(mut self, command: &str, exit_code: i32, output: &str) -> Self {
        self.outcomes.insert(
            command.to_string(),
            ShellOutcome {
                exit_code: Some(exit_code),
                output: output.to_string(),
                timed_out: false,
            },
        );
        self
    }

    pub fn with_timeout(mut self, command: &str) -> Self {
        self.outcomes.insert(
            command.to_string(),
            ShellOutcome {
                exit_code: None,
                output: String::new(),
                timed_out: true,
            },
        );
        self
    }

    /// Every request seen so far, in order.
    pub fn calls(&self) -> Vec<ShellRequest> {
        self.calls.lock().clone()
    }
}

impl ShellExecutor for ScriptedShell {
    fn run(&self, request: &ShellRequest) -> Result<ShellOutcome> {
        self.calls.lock().push(request.clone());
        Ok(self
            .outcomes
            .get(&request.command)
            .cloned()
            .unwrap_or_else(|| ShellOutcome {
                exit_code: Some(UNSCRIPTED_EXIT_CODE),
                output: format!("unscripted command: {}", request.command),
                timed_out: false,
            }))
    }
}
