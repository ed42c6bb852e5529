//! Planning interview: which questions to ask next.
//!
//! Questions come in strictly ordered phases. [`compute_next_questions`]
//! returns every question of the first phase whose required questions are not
//! yet answered, and nothing once all phases are satisfied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IntentScope,
    DeliverablesDod,
    Invariants,
    RepoContext,
    Plan,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::IntentScope,
        Phase::DeliverablesDod,
        Phase::Invariants,
        Phase::RepoContext,
        Phase::Plan,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub phase: Phase,
    pub key: String,
    pub text: String,
    pub rationale: String,
    pub required_fields: Vec<String>,
    pub required: bool,
}

/// Where the answer to a question is read from.
#[derive(Clone, Copy)]
enum Source {
    Answer,
    JobList,
    Invariants,
    RepoRoot,
    Steps,
}

struct Template {
    key: &'static str,
    text: &'static str,
    rationale: &'static str,
    required: bool,
    source: Source,
}

const INTENT_SCOPE: &[Template] = &[
    Template {
        key: "repo_exists",
        text: "Is there an existing repository this work should build on?",
        rationale: "Decides whether repository context is collected before planning.",
        required: true,
        source: Source::Answer,
    },
    Template {
        key: "out_of_scope",
        text: "What is explicitly out of scope for this job?",
        rationale: "Bounds the plan so steps do not drift into unrequested work.",
        required: true,
        source: Source::Answer,
    },
    Template {
        key: "target_environment",
        text: "Which environment must the result run in (OS, runtime, versions)?",
        rationale: "Verification commands and gates depend on the target environment.",
        required: true,
        source: Source::Answer,
    },
    Template {
        key: "timeline_priority",
        text: "What matters most: speed, completeness, or safety?",
        rationale: "Sets how aggressively steps are split and how strict gates are.",
        required: true,
        source: Source::Answer,
    },
    Template {
        key: "user_constraints",
        text: "Are there any other constraints (libraries, style, budgets)?",
        rationale: "Captures constraints that do not fit the other questions.",
        required: false,
        source: Source::Answer,
    },
];

const DELIVERABLES_DOD: &[Template] = &[
    Template {
        key: "deliverables",
        text: "List the concrete deliverables this job must produce.",
        rationale: "Every step should trace back to at least one deliverable.",
        required: true,
        source: Source::JobList,
    },
    Template {
        key: "definition_of_done",
        text: "What must be true for the job to count as done?",
        rationale: "The definition of done anchors acceptance criteria for each step.",
        required: true,
        source: Source::JobList,
    },
    Template {
        key: "tests_expected",
        text: "Which tests are expected to exist or pass at the end?",
        rationale: "Lets checkpoint steps verify the right test suite.",
        required: false,
        source: Source::Answer,
    },
];

const INVARIANTS: &[Template] = &[Template {
    key: "invariants",
    text: "Which invariants must never be broken (APIs, data, behavior)? Answer [] if none.",
    rationale: "Invariants are repeated in every step prompt; an empty list is a valid answer.",
    required: true,
    source: Source::Invariants,
}];

const REPO_CONTEXT: &[Template] = &[
    Template {
        key: "repo_root",
        text: "What is the absolute path of the repository root?",
        rationale: "File and command gates resolve paths against the repository root.",
        required: true,
        source: Source::RepoRoot,
    },
    Template {
        key: "key_files",
        text: "Which files are most relevant to this job?",
        rationale: "Key files are referenced from step context.",
        required: false,
        source: Source::Answer,
    },
    Template {
        key: "entrypoints",
        text: "What are the entrypoints (binaries, services, commands)?",
        rationale: "Entrypoints tell the executor how to run what it builds.",
        required: false,
        source: Source::Answer,
    },
];

const PLAN: &[Template] = &[Template {
    key: "steps",
    text: "Propose the ordered list of steps for this job.",
    rationale: "Execution cannot start without a compiled plan.",
    required: true,
    source: Source::Steps,
}];

fn templates(phase: Phase) -> &'static [Template] {
    match phase {
        Phase::IntentScope => INTENT_SCOPE,
        Phase::DeliverablesDod => DELIVERABLES_DOD,
        Phase::Invariants => INVARIANTS,
        Phase::RepoContext => REPO_CONTEXT,
        Phase::Plan => PLAN,
    }
}

/// Next interview questions for `job`, or empty once planning is complete.
pub fn compute_next_questions(job: &Job) -> Vec<Question> {
    let Some(phase) = current_phase(job) else {
        return Vec::new();
    };
    templates(phase)
        .iter()
        .map(|t| Question {
            phase,
            key: t.key.to_string(),
            text: t.text.to_string(),
            rationale: t.rationale.to_string(),
            required_fields: vec![t.key.to_string()],
            required: t.required,
        })
        .collect()
}

/// First phase with an unanswered required question.
pub fn current_phase(job: &Job) -> Option<Phase> {
    Phase::ALL
        .into_iter()
        .filter(|phase| phase_applies(job, *phase))
        .find(|phase| !phase_satisfied(job, *phase))
}

fn phase_applies(job: &Job, phase: Phase) -> bool {
    match phase {
        Phase::RepoContext => job.planning_answers.get("repo_exists") == Some(&Value::Bool(true)),
        _ => true,
    }
}

fn phase_satisfied(job: &Job, phase: Phase) -> bool {
    templates(phase)
        .iter()
        .filter(|t| t.required)
        .all(|t| is_answered(job, t))
}

fn is_answered(job: &Job, template: &Template) -> bool {
    match template.source {
        Source::Answer => job
            .planning_answers
            .get(template.key)
            .is_some_and(answer_present),
        Source::JobList => {
            let list = match template.key {
                "deliverables" => &job.deliverables,
                _ => &job.definition_of_done,
            };
            list.iter().any(|item| !item.trim().is_empty())
        }
        Source::Invariants => job.invariants.is_some(),
        Source::RepoRoot => job.effective_repo_root().is_some(),
        Source::Steps => !job.step_order.is_empty(),
    }
}

/// `false` and `[]` count as answers; null and blank strings do not.
fn answer_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
