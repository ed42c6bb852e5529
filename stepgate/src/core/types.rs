//! Shared deterministic types for the job/step state machine.
//!
//! These types define stable contracts between core components and the
//! storage layer. Serialized forms are JSON-shaped and tolerate unknown keys.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::gate_spec::{GateResult, GateSpec};
use crate::core::policies::Policies;

/// Free-form evidence payload submitted with a step.
pub type Evidence = Map<String, Value>;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Planning,
    Ready,
    Executing,
    Paused,
    Complete,
    Failed,
    Archived,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Planning => "PLANNING",
            JobStatus::Ready => "READY",
            JobStatus::Executing => "EXECUTING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
            JobStatus::Archived => "ARCHIVED",
        }
    }

    /// True once the job can no longer change state (other than archival).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Archived
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The executor's own claim about a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelClaim {
    Met,
    NotMet,
    Partial,
}

impl ModelClaim {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelClaim::Met => "MET",
            ModelClaim::NotMet => "NOT_MET",
            ModelClaim::Partial => "PARTIAL",
        }
    }
}

impl std::str::FromStr for ModelClaim {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MET" => Ok(ModelClaim::Met),
            "NOT_MET" => Ok(ModelClaim::NotMet),
            "PARTIAL" => Ok(ModelClaim::Partial),
            other => Err(format!(
                "unknown model claim '{other}' (expected MET, NOT_MET or PARTIAL)"
            )),
        }
    }
}

/// What the caller should do after a submission or transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    NextStepAvailable,
    JobComplete,
    Retry,
    PauseForHuman,
    JobFailed,
    AwaitHumanApproval,
    NotExecuting,
}

/// Final decision recorded on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Accepted,
    Rejected,
}

/// Derived progress of a step relative to the job cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Done,
    Active,
    Pending,
}

/// One end-to-end unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub title: String,
    pub goal: String,
    pub status: JobStatus,
    #[serde(default)]
    pub policies: Policies,
    #[serde(default)]
    pub deliverables: Vec<String>,
    /// `None` means unset; `Some(vec![])` means explicitly "no invariants".
    #[serde(default)]
    pub invariants: Option<Vec<String>>,
    #[serde(default)]
    pub definition_of_done: Vec<String>,
    #[serde(default)]
    pub repo_root: Option<PathBuf>,
    #[serde(default)]
    pub step_order: Vec<String>,
    #[serde(default)]
    pub current_step_index: usize,
    /// Numeric suffix handed to the next auto-assigned step id.
    #[serde(default = "default_next_step_seq")]
    pub next_step_seq: u32,
    /// Ids of steps from replaced plans. Their attempts stay keyed by them.
    #[serde(default)]
    pub retired_step_ids: Vec<String>,
    #[serde(default)]
    pub planning_answers: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_next_step_seq() -> u32 {
    1
}

impl Job {
    pub fn new(title: impl Into<String>, goal: impl Into<String>, policies: Policies) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            goal: goal.into(),
            status: JobStatus::Planning,
            policies,
            deliverables: Vec::new(),
            invariants: None,
            definition_of_done: Vec::new(),
            repo_root: None,
            step_order: Vec::new(),
            current_step_index: 0,
            next_step_seq: default_next_step_seq(),
            retired_step_ids: Vec::new(),
            planning_answers: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Step id at the cursor, or `None` once the plan is exhausted.
    pub fn current_step_id(&self) -> Option<&str> {
        self.step_order
            .get(self.current_step_index)
            .map(String::as_str)
    }

    /// Every step id this job has handed out, current plan included.
    pub fn used_step_ids(&self) -> Vec<String> {
        self.retired_step_ids
            .iter()
            .chain(&self.step_order)
            .cloned()
            .collect()
    }

    /// Make `step_order` the plan and retire the previous one, cursor at 0.
    pub fn install_plan(&mut self, step_order: Vec<String>, next_seq: u32) {
        let previous = std::mem::replace(&mut self.step_order, step_order);
        for id in previous {
            if !self.retired_step_ids.contains(&id) {
                self.retired_step_ids.push(id);
            }
        }
        self.current_step_index = 0;
        self.next_step_seq = self.next_step_seq.max(next_seq);
    }

    /// Repository root from the job field, falling back to the interview answer.
    pub fn effective_repo_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.repo_root {
            return Some(root.clone());
        }
        self.planning_answers
            .get("repo_root")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn step_state(&self, index: usize) -> StepState {
        match index.cmp(&self.current_step_index) {
            std::cmp::Ordering::Less => StepState::Done,
            std::cmp::Ordering::Equal => StepState::Active,
            std::cmp::Ordering::Greater => StepState::Pending,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One atomic, independently gated unit of execution within a job's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub order_index: usize,
    pub title: String,
    #[serde(default)]
    pub instruction_prompt: String,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub required_evidence: Vec<String>,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub remediation_prompt: String,
    #[serde(default)]
    pub context_refs: Vec<String>,
    #[serde(default)]
    pub is_checkpoint: bool,
    #[serde(default)]
    pub human_approved: bool,
}

impl Step {
    pub fn requires_human_approval(&self) -> bool {
        self.gates.iter().any(GateSpec::is_human_approval)
    }

    /// Positional checklist keys (`c1..cN`) for the acceptance criteria.
    pub fn checklist_keys(&self) -> Vec<String> {
        (1..=self.acceptance_criteria.len())
            .map(|n| format!("c{n}"))
            .collect()
    }
}

/// Immutable record of one evaluated submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: String,
    pub job_id: String,
    pub step_id: String,
    pub created_at: DateTime<Utc>,
    pub model_claim: ModelClaim,
    pub summary: String,
    pub evidence: Evidence,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub rejection_reasons: Vec<String>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub gate_results: Vec<GateResult>,
    #[serde(default)]
    pub devlog_line: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

impl Attempt {
    pub fn is_rejected(&self) -> bool {
        self.outcome == AttemptOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_in_planning_with_unset_invariants() {
        let job = Job::new("Title", "Goal", Policies::default());
        assert_eq!(job.status, JobStatus::Planning);
        assert_eq!(job.invariants, None);
        assert_eq!(job.current_step_index, 0);
        assert_eq!(job.next_step_seq, 1);
        assert!(job.current_step_id().is_none());
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&JobStatus::Executing).expect("serialize");
        assert_eq!(json, "\"EXECUTING\"");
        let claim: ModelClaim = serde_json::from_str("\"NOT_MET\"").expect("parse");
        assert_eq!(claim, ModelClaim::NotMet);
    }

    #[test]
    fn model_claim_parses_case_insensitively() {
        assert_eq!("met".parse::<ModelClaim>(), Ok(ModelClaim::Met));
        assert_eq!(" partial ".parse::<ModelClaim>(), Ok(ModelClaim::Partial));
        assert!("maybe".parse::<ModelClaim>().is_err());
    }

    #[test]
    fn effective_repo_root_prefers_job_field() {
        let mut job = Job::new("t", "g", Policies::default());
        job.planning_answers
            .insert("repo_root".to_string(), Value::from("/from/answer"));
        assert_eq!(job.effective_repo_root(), Some(PathBuf::from("/from/answer")));

        job.repo_root = Some(PathBuf::from("/from/field"));
        assert_eq!(job.effective_repo_root(), Some(PathBuf::from("/from/field")));
    }

    #[test]
    fn step_state_tracks_cursor() {
        let mut job = Job::new("t", "g", Policies::default());
        job.step_order = vec!["S1".into(), "S2".into(), "S3".into()];
        job.current_step_index = 1;
        assert_eq!(job.step_state(0), StepState::Done);
        assert_eq!(job.step_state(1), StepState::Active);
        assert_eq!(job.step_state(2), StepState::Pending);
    }

    #[test]
    fn installing_a_plan_retires_the_previous_ids() {
        let mut job = Job::new("t", "g", Policies::default());
        job.install_plan(vec!["S1".into(), "S2".into()], 3);
        job.current_step_index = 1;
        job.install_plan(vec!["S3".into()], 4);
        assert_eq!(job.step_order, vec!["S3"]);
        assert_eq!(job.current_step_index, 0);
        assert_eq!(job.next_step_seq, 4);
        assert_eq!(job.retired_step_ids, vec!["S1", "S2"]);
        assert_eq!(job.used_step_ids(), vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn job_tolerates_missing_optional_fields() {
        let json = r#"{
            "job_id": "j1",
            "title": "t",
            "goal": "g",
            "status": "PLANNING",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "unexpected": true
        }"#;
        let job: Job = serde_json::from_str(json).expect("parse");
        assert_eq!(job.next_step_seq, 1);
        assert!(job.step_order.is_empty());
        assert!(job.retired_step_ids.is_empty());
        assert_eq!(job.policies, Policies::default());
    }
}
