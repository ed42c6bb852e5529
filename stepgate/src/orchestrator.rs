//! The job/step state machine, wired to storage, gates and events.
//!
//! Every mutating operation runs under a per-job lock taken from a lock
//! table, so two submissions for the same job are serialized while
//! different jobs proceed independently. Reads go straight to the store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core::conductor::{Phase, Question, compute_next_questions, current_phase};
use crate::core::gate_spec::{GateResult, GateSpec};
use crate::core::lifecycle::{self, ReadyReport, TransitionOutcome};
use crate::core::plan::{StepSpec, compile};
use crate::core::policies::Policies;
use crate::core::submission::{SubmissionCheck, assemble, precheck};
use crate::core::types::{
    Attempt, AttemptOutcome, Evidence, Job, JobStatus, ModelClaim, NextAction, Step, StepState,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::evidence::{SUMMARY_MIN_CHARS, check_text_quality, validate};
use crate::gates::{GateContext, evaluate_gates};
use crate::io::config::StepgateConfig;
use crate::io::events::{DEFAULT_QUEUE_CAPACITY, EventBus, JobEvent};
use crate::io::prompt::{StepPromptInputs, render_step_prompt};
use crate::io::shell::{DEFAULT_OUTPUT_LIMIT_BYTES, ShellExecutor};
use crate::io::store::{JobLease, Store};

/// Knobs taken from the workspace configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Policies for jobs created without explicit policies.
    pub default_policies: Policies,
    pub shell_output_limit_bytes: usize,
    pub shell_timeout_cap_secs: Option<u64>,
    pub event_queue_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_policies: Policies::default(),
            shell_output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            shell_timeout_cap_secs: None,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl From<&StepgateConfig> for OrchestratorSettings {
    fn from(config: &StepgateConfig) -> Self {
        Self {
            default_policies: config.policies.clone(),
            shell_output_limit_bytes: config.shell.output_limit_bytes,
            shell_timeout_cap_secs: Some(config.shell.timeout_secs),
            event_queue_capacity: config.events.queue_capacity,
        }
    }
}

/// Edits to a job's planning inputs. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningUpdate {
    /// Merged key by key into `planning_answers`.
    pub answers: Map<String, Value>,
    pub deliverables: Option<Vec<String>>,
    pub definition_of_done: Option<Vec<String>>,
    /// `Some(vec![])` records "no invariants".
    pub invariants: Option<Vec<String>>,
    pub repo_root: Option<PathBuf>,
    /// Policy overrides merged onto the job's current policies.
    pub policies: Option<Map<String, Value>>,
}

impl PlanningUpdate {
    /// Route a single interview answer to the field it belongs to.
    ///
    /// List fields accept a JSON array or a single string.
    pub fn from_answer(key: &str, value: Value) -> Result<Self, String> {
        let mut update = Self::default();
        match key {
            "deliverables" => update.deliverables = Some(string_list(key, value)?),
            "definition_of_done" => update.definition_of_done = Some(string_list(key, value)?),
            "invariants" => update.invariants = Some(string_list(key, value)?),
            "repo_root" => match value {
                Value::String(path) if !path.trim().is_empty() => {
                    update.repo_root = Some(PathBuf::from(path.trim()));
                }
                _ => return Err("repo_root must be a non-empty string".to_string()),
            },
            _ => {
                update.answers.insert(key.to_string(), value);
            }
        }
        Ok(update)
    }
}

fn string_list(key: &str, value: Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(item) => Ok(vec![item]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(format!("{key} entries must be strings, got {other}")),
            })
            .collect(),
        other => Err(format!("{key} must be a list of strings, got {other}")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningReport {
    pub updated: bool,
    pub status: JobStatus,
    pub next_questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanReport {
    pub replaced: bool,
    pub status: JobStatus,
    pub step_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One executor submission for the step at the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub step_id: String,
    pub model_claim: ModelClaim,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub devlog_line: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub next_action: NextAction,
    pub job_status: JobStatus,
    pub missing_fields: Vec<String>,
    pub rejection_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub gate_results: Vec<GateResult>,
    pub retry_count: u32,
    pub retry_after_ms: Option<u64>,
    /// `None` when the submission was turned away before evaluation.
    pub attempt_id: Option<String>,
}

impl SubmitOutcome {
    fn turned_away(next_action: NextAction, job_status: JobStatus, reason: String) -> Self {
        Self {
            accepted: false,
            next_action,
            job_status,
            missing_fields: Vec::new(),
            rejection_reasons: vec![reason],
            warnings: Vec::new(),
            gate_results: Vec::new(),
            retry_count: 0,
            retry_after_ms: None,
            attempt_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPrompt {
    pub step_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: String,
    pub order_index: usize,
    pub title: String,
    pub state: StepState,
    pub is_checkpoint: bool,
    pub human_approved: bool,
    pub rejected_attempts: u32,
}

/// Read-only view of a job and its plan progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub phase: Option<Phase>,
    pub current_step_id: Option<String>,
    pub steps: Vec<StepSummary>,
    pub attempt_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub all_passed: bool,
    pub results: Vec<GateResult>,
}

/// Ad-hoc gate evaluation outside of a submission.
#[derive(Debug, Clone, Copy)]
pub struct GateCheck<'a> {
    pub gates: &'a [GateSpec],
    pub evidence: &'a Evidence,
    pub repo_root: Option<&'a std::path::Path>,
    pub policies: &'a Policies,
    pub changed_files: Option<&'a [String]>,
}

pub struct Orchestrator<S: Store, X: ShellExecutor> {
    store: S,
    shell: X,
    events: EventBus,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    settings: OrchestratorSettings,
}

impl<S: Store, X: ShellExecutor> Orchestrator<S, X> {
    pub fn new(store: S, shell: X) -> Self {
        Self::with_settings(store, shell, OrchestratorSettings::default())
    }

    pub fn with_settings(store: S, shell: X, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            shell,
            events: EventBus::new(settings.event_queue_capacity),
            locks: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shell(&self) -> &X {
        &self.shell
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> mpsc::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Per-job mutex; entries exist only for jobs the store knows about.
    fn job_lock(&self, job_id: &str) -> OrchestratorResult<Arc<Mutex<()>>> {
        if let Some(lock) = self.locks.lock().get(job_id) {
            return Ok(Arc::clone(lock));
        }
        self.load_job(job_id)?;
        Ok(self
            .locks
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .clone())
    }

    /// Drop the job's mutex from the table once nobody holds or waits on it.
    fn release_job_lock(&self, job_id: &str) {
        let mut locks = self.locks.lock();
        if locks
            .get(job_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(job_id);
        }
    }

    /// Number of jobs with a live entry in the lock table.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }

    fn lease(&self, job_id: &str) -> OrchestratorResult<JobLease> {
        self.store.lock_job(job_id).map_err(OrchestratorError::Storage)
    }

    fn load_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        self.store
            .get_job(job_id)
            .map_err(OrchestratorError::Storage)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    fn save_job(&self, job: &Job) -> OrchestratorResult<()> {
        self.store.save_job(job).map_err(OrchestratorError::Storage)
    }

    fn publish_status(&self, job: &Job) {
        self.events.publish(JobEvent::JobUpdated {
            job_id: job.job_id.clone(),
            status: job.status,
        });
    }

    #[instrument(skip_all, fields(title = %title))]
    pub fn create_job(
        &self,
        title: &str,
        goal: &str,
        policies: Option<Policies>,
    ) -> OrchestratorResult<Job> {
        let policies = policies.unwrap_or_else(|| self.settings.default_policies.clone());
        let job = Job::new(title.trim(), goal.trim(), policies);
        self.store.create_job(&job).map_err(OrchestratorError::Storage)?;
        info!(job_id = %job.job_id, "job created");
        self.events.publish(JobEvent::JobCreated {
            job_id: job.job_id.clone(),
        });
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        self.load_job(job_id)
    }

    pub fn list_jobs(&self) -> OrchestratorResult<Vec<Job>> {
        self.store.list_jobs().map_err(OrchestratorError::Storage)
    }

    pub fn list_steps(&self, job_id: &str) -> OrchestratorResult<Vec<Step>> {
        self.load_job(job_id)?;
        self.store
            .list_steps(job_id)
            .map_err(OrchestratorError::Storage)
    }

    pub fn list_attempts(
        &self,
        job_id: &str,
        step_id: Option<&str>,
    ) -> OrchestratorResult<Vec<Attempt>> {
        self.load_job(job_id)?;
        self.store
            .list_attempts(job_id, step_id)
            .map_err(OrchestratorError::Storage)
    }

    pub fn next_questions(&self, job_id: &str) -> OrchestratorResult<Vec<Question>> {
        Ok(compute_next_questions(&self.load_job(job_id)?))
    }

    #[instrument(skip(self, update))]
    pub fn update_planning(
        &self,
        job_id: &str,
        update: PlanningUpdate,
    ) -> OrchestratorResult<PlanningReport> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        let mut job = self.load_job(job_id)?;
        if !lifecycle::can_edit_planning(job.status) {
            return Ok(PlanningReport {
                updated: false,
                status: job.status,
                next_questions: compute_next_questions(&job),
                reason: Some(format!(
                    "planning can only change in PLANNING or READY (job is {})",
                    job.status
                )),
            });
        }

        if let Some(overrides) = &update.policies {
            job.policies = job
                .policies
                .merged_with(overrides)
                .map_err(|err| OrchestratorError::InvalidUpdate(err.to_string()))?;
        }
        job.planning_answers.extend(update.answers);
        if let Some(deliverables) = update.deliverables {
            job.deliverables = deliverables;
        }
        if let Some(dod) = update.definition_of_done {
            job.definition_of_done = dod;
        }
        if let Some(invariants) = update.invariants {
            job.invariants = Some(invariants);
        }
        if let Some(root) = update.repo_root {
            job.repo_root = Some(root);
        }
        job.touch();
        self.save_job(&job)?;
        self.publish_status(&job);
        debug!(phase = ?current_phase(&job), "planning updated");

        Ok(PlanningReport {
            updated: true,
            status: job.status,
            next_questions: compute_next_questions(&job),
            reason: None,
        })
    }

    /// Compile `raw_steps` and make them the job's plan, resetting the cursor.
    #[instrument(skip(self, raw_steps), fields(proposed = raw_steps.len()))]
    pub fn compile_and_replace_steps(
        &self,
        job_id: &str,
        raw_steps: &[StepSpec],
    ) -> OrchestratorResult<ReplanReport> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        let mut job = self.load_job(job_id)?;
        if !lifecycle::can_replan(job.status) {
            return Ok(ReplanReport {
                replaced: false,
                status: job.status,
                step_order: job.step_order,
                reason: Some(format!(
                    "plan can only be replaced in PLANNING, READY or PAUSED (job is {})",
                    job.status
                )),
            });
        }

        let plan = compile(
            raw_steps,
            &job.policies,
            job.next_step_seq,
            &job.used_step_ids(),
        )
        .map_err(OrchestratorError::InvalidPlan)?;
        job.install_plan(plan.step_order(), plan.next_seq);
        job.touch();
        self.store
            .replace_steps(&job, &plan.steps)
            .map_err(OrchestratorError::Storage)?;

        info!(steps = job.step_order.len(), "plan replaced");
        self.events.publish(JobEvent::StepsReplaced {
            job_id: job.job_id.clone(),
            step_count: job.step_order.len(),
        });
        Ok(ReplanReport {
            replaced: true,
            status: job.status,
            step_order: job.step_order,
            reason: None,
        })
    }

    pub fn set_ready(&self, job_id: &str) -> OrchestratorResult<ReadyReport> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        let mut job = self.load_job(job_id)?;
        let before = job.status;
        let report = lifecycle::set_ready(&mut job);
        if job.status != before {
            self.save_job(&job)?;
            self.publish_status(&job);
        }
        Ok(report)
    }

    pub fn start(&self, job_id: &str) -> OrchestratorResult<TransitionOutcome> {
        self.transition(job_id, lifecycle::start)
    }

    pub fn pause(&self, job_id: &str) -> OrchestratorResult<TransitionOutcome> {
        self.transition(job_id, lifecycle::pause)
    }

    pub fn resume(&self, job_id: &str) -> OrchestratorResult<TransitionOutcome> {
        self.transition(job_id, lifecycle::resume)
    }

    pub fn archive(&self, job_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let outcome = self.transition(job_id, lifecycle::archive)?;
        self.release_job_lock(job_id);
        Ok(outcome)
    }

    fn transition(
        &self,
        job_id: &str,
        apply: fn(&mut Job) -> TransitionOutcome,
    ) -> OrchestratorResult<TransitionOutcome> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        let mut job = self.load_job(job_id)?;
        let outcome = apply(&mut job);
        match &outcome {
            TransitionOutcome::Applied { from, to } => {
                self.save_job(&job)?;
                info!(job_id, %from, %to, "job transitioned");
                self.publish_status(&job);
            }
            TransitionOutcome::Rejected { reason, .. } => {
                debug!(job_id, reason = %reason, "transition rejected");
            }
            TransitionOutcome::Unchanged { .. } => {}
        }
        Ok(outcome)
    }

    /// Record human sign-off on a step so its `human_approval` gate admits submissions.
    pub fn approve_step(&self, job_id: &str, step_id: &str) -> OrchestratorResult<Step> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        self.load_job(job_id)?;
        let mut step = self
            .store
            .list_steps(job_id)
            .map_err(OrchestratorError::Storage)?
            .into_iter()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| OrchestratorError::StepNotFound {
                job_id: job_id.to_string(),
                step_id: step_id.to_string(),
            })?;
        if !step.human_approved {
            step.human_approved = true;
            self.store
                .update_step(job_id, &step)
                .map_err(OrchestratorError::Storage)?;
            info!(job_id, step_id, "step approved");
            self.events.publish(JobEvent::StepApproved {
                job_id: job_id.to_string(),
                step_id: step_id.to_string(),
            });
        }
        Ok(step)
    }

    /// Prompt for the step at the cursor, or `None` when no step is active.
    pub fn current_step_prompt(&self, job_id: &str) -> OrchestratorResult<Option<StepPrompt>> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let job = self.load_job(job_id)?;
        let Some(step_id) = job.current_step_id() else {
            return Ok(None);
        };
        let step = self.find_step(&job, step_id)?;
        let attempts = self
            .store
            .list_attempts(job_id, Some(step_id))
            .map_err(OrchestratorError::Storage)?;
        let prompt = render_step_prompt(&StepPromptInputs {
            job: &job,
            step: &step,
            attempts: &attempts,
        })
        .map_err(OrchestratorError::Prompt)?;
        Ok(Some(StepPrompt {
            step_id: step.step_id,
            prompt,
        }))
    }

    fn find_step(&self, job: &Job, step_id: &str) -> OrchestratorResult<Step> {
        self.store
            .list_steps(&job.job_id)
            .map_err(OrchestratorError::Storage)?
            .into_iter()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| OrchestratorError::StepNotFound {
                job_id: job.job_id.clone(),
                step_id: step_id.to_string(),
            })
    }

    /// Evaluate a submission for the step at the cursor and move the job on.
    #[instrument(skip(self, submission), fields(step_id = %submission.step_id, claim = submission.model_claim.as_str()))]
    pub fn submit(&self, job_id: &str, submission: Submission) -> OrchestratorResult<SubmitOutcome> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let _lease = self.lease(job_id)?;
        let mut job = self.load_job(job_id)?;

        if job.status != JobStatus::Executing {
            return Ok(SubmitOutcome::turned_away(
                NextAction::NotExecuting,
                job.status,
                format!("Job is {}, not EXECUTING.", job.status),
            ));
        }
        let expected = job.current_step_id().unwrap_or_default().to_string();
        if expected != submission.step_id {
            warn!(expected = %expected, "stale step submission");
            return Err(OrchestratorError::StaleStep {
                expected,
                submitted: submission.step_id,
            });
        }
        let step = self.find_step(&job, &expected)?;
        if step.requires_human_approval() && !step.human_approved {
            return Ok(SubmitOutcome::turned_away(
                NextAction::AwaitHumanApproval,
                job.status,
                format!("Step {} requires human approval.", step.step_id),
            ));
        }

        let policies = job.policies.clone();
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: submission.model_claim,
            evidence: &submission.evidence,
            devlog_line: submission.devlog_line.as_deref(),
            commit_hash: submission.commit_hash.as_deref(),
        };
        let pre = precheck(&check);

        let repo_root = job.effective_repo_root();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut gate_results = Vec::new();
        if pre.missing_fields.is_empty() {
            let mut report = validate(
                &submission.evidence,
                &step.required_evidence,
                repo_root.as_deref(),
                policies.is_strict(),
            );
            if let Some(problem) =
                check_text_quality("summary", &submission.summary, SUMMARY_MIN_CHARS)
            {
                report.quality(policies.is_strict(), problem);
            }
            issues = report.issues;
            warnings = report.warnings;

            let ctx = GateContext {
                evidence: &submission.evidence,
                repo_root: repo_root.as_deref(),
                policies: &policies,
                changed_files: None,
                output_limit_bytes: self.settings.shell_output_limit_bytes,
                timeout_cap_secs: self.settings.shell_timeout_cap_secs,
            };
            gate_results = evaluate_gates(&step.gates, &ctx, &self.shell).1;
        }
        let verdict = assemble(pre, &issues, &gate_results);

        let attempt = Attempt {
            attempt_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.job_id.clone(),
            step_id: step.step_id.clone(),
            created_at: Utc::now(),
            model_claim: submission.model_claim,
            summary: submission.summary,
            evidence: submission.evidence,
            outcome: if verdict.accepted {
                AttemptOutcome::Accepted
            } else {
                AttemptOutcome::Rejected
            },
            rejection_reasons: verdict.rejection_reasons.clone(),
            missing_fields: verdict.missing_fields.clone(),
            warnings: warnings.clone(),
            gate_results: gate_results.clone(),
            devlog_line: submission.devlog_line,
            commit_hash: submission.commit_hash,
        };
        self.store
            .append_attempt(&attempt)
            .map_err(OrchestratorError::Storage)?;

        let status_before = job.status;
        let retry_count = self
            .store
            .count_rejected_attempts(&job.job_id, &step.step_id)
            .map_err(OrchestratorError::Storage)?;
        let (next_action, retry_after_ms) = if verdict.accepted {
            (lifecycle::advance(&mut job), None)
        } else {
            let action = lifecycle::escalate(&mut job, &policies, retry_count);
            let delay = match action {
                NextAction::Retry => policies.retry_delay_ms(retry_count),
                _ => None,
            };
            (action, delay)
        };
        job.touch();
        self.save_job(&job)?;

        info!(
            attempt_id = %attempt.attempt_id,
            accepted = verdict.accepted,
            next_action = ?next_action,
            retry_count,
            "submission evaluated"
        );
        self.events.publish(JobEvent::AttemptRecorded {
            job_id: job.job_id.clone(),
            step_id: step.step_id.clone(),
            attempt_id: attempt.attempt_id.clone(),
            accepted: verdict.accepted,
        });
        if job.status != status_before {
            self.publish_status(&job);
        }

        Ok(SubmitOutcome {
            accepted: verdict.accepted,
            next_action,
            job_status: job.status,
            missing_fields: verdict.missing_fields,
            rejection_reasons: verdict.rejection_reasons,
            warnings,
            gate_results,
            retry_count,
            retry_after_ms,
            attempt_id: Some(attempt.attempt_id),
        })
    }

    pub fn job_snapshot(&self, job_id: &str) -> OrchestratorResult<JobSnapshot> {
        let lock = self.job_lock(job_id)?;
        let _guard = lock.lock();
        let job = self.load_job(job_id)?;
        let steps = self
            .store
            .list_steps(job_id)
            .map_err(OrchestratorError::Storage)?;
        let attempts = self
            .store
            .list_attempts(job_id, None)
            .map_err(OrchestratorError::Storage)?;

        let summaries = job
            .step_order
            .iter()
            .enumerate()
            .filter_map(|(idx, step_id)| {
                let step = steps.iter().find(|s| &s.step_id == step_id)?;
                let rejected_attempts = attempts
                    .iter()
                    .filter(|a| &a.step_id == step_id && a.is_rejected())
                    .count() as u32;
                Some(StepSummary {
                    step_id: step.step_id.clone(),
                    order_index: idx,
                    title: step.title.clone(),
                    state: job.step_state(idx),
                    is_checkpoint: step.is_checkpoint,
                    human_approved: step.human_approved,
                    rejected_attempts,
                })
            })
            .collect();

        Ok(JobSnapshot {
            phase: current_phase(&job),
            current_step_id: job.current_step_id().map(str::to_string),
            steps: summaries,
            attempt_count: attempts.len(),
            job,
        })
    }

    /// Run `check.gates` without recording anything.
    pub fn evaluate_gates(&self, check: GateCheck<'_>) -> GateReport {
        let ctx = GateContext {
            evidence: check.evidence,
            repo_root: check.repo_root,
            policies: check.policies,
            changed_files: check.changed_files,
            output_limit_bytes: self.settings.shell_output_limit_bytes,
            timeout_cap_secs: self.settings.shell_timeout_cap_secs,
        };
        let (all_passed, results) = evaluate_gates(check.gates, &ctx, &self.shell);
        GateReport {
            all_passed,
            results,
        }
    }
}
