//! Step prompt rendering for the executor.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{Attempt, Job, Step};

const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

#[derive(Debug, Clone, Serialize)]
struct JobContext<'a> {
    title: &'a str,
    goal: &'a str,
    deliverables: &'a [String],
    definition_of_done: &'a [String],
    invariants: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
struct CriterionContext<'a> {
    key: String,
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct GateContext<'a> {
    gate_type: &'a str,
    description: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct StepContext<'a> {
    step_id: &'a str,
    position: usize,
    total: usize,
    title: &'a str,
    instruction_prompt: &'a str,
    expected_outputs: &'a [String],
    criteria: Vec<CriterionContext<'a>>,
    required_evidence: &'a [String],
    gates: Vec<GateContext<'a>>,
    is_checkpoint: bool,
}

#[derive(Debug, Clone, Serialize)]
struct RetryContext<'a> {
    count: usize,
    reasons: &'a [String],
    remediation: Option<&'a str>,
}

/// Everything the step prompt is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct StepPromptInputs<'a> {
    pub job: &'a Job,
    pub step: &'a Step,
    /// Attempts already recorded for this step, oldest first.
    pub attempts: &'a [Attempt],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("step", STEP_TEMPLATE)
            .context("load step prompt template")?;
        Ok(Self { env })
    }

    pub fn render_step(&self, input: &StepPromptInputs<'_>) -> Result<String> {
        let job = input.job;
        let step = input.step;
        let job_ctx = JobContext {
            title: job.title.trim(),
            goal: job.goal.trim(),
            deliverables: &job.deliverables,
            definition_of_done: &job.definition_of_done,
            invariants: job.invariants.as_deref().unwrap_or(&[]),
        };
        let step_ctx = StepContext {
            step_id: &step.step_id,
            position: step.order_index + 1,
            total: job.step_order.len(),
            title: &step.title,
            instruction_prompt: step.instruction_prompt.trim(),
            expected_outputs: &step.expected_outputs,
            criteria: step
                .checklist_keys()
                .into_iter()
                .zip(&step.acceptance_criteria)
                .map(|(key, text)| CriterionContext { key, text })
                .collect(),
            required_evidence: &step.required_evidence,
            gates: step
                .gates
                .iter()
                .map(|g| GateContext {
                    gate_type: g.gate_type(),
                    description: &g.description,
                })
                .collect(),
            is_checkpoint: step.is_checkpoint,
        };
        let retry = retry_context(step, input.attempts);

        let template = self.env.get_template("step")?;
        let rendered = template
            .render(context! {
                job => job_ctx,
                step => step_ctx,
                strict => job.policies.is_strict(),
                retry => retry,
            })
            .context("render step prompt")?;
        debug!(step_id = %step.step_id, bytes = rendered.len(), "rendered step prompt");
        Ok(rendered)
    }
}

/// Retry section only when the latest attempt for the step was rejected.
fn retry_context<'a>(step: &'a Step, attempts: &'a [Attempt]) -> Option<RetryContext<'a>> {
    let last = attempts
        .iter()
        .rev()
        .find(|a| a.step_id == step.step_id)?;
    if !last.is_rejected() {
        return None;
    }
    let count = attempts
        .iter()
        .filter(|a| a.step_id == step.step_id && a.is_rejected())
        .count();
    let remediation = Some(step.remediation_prompt.trim()).filter(|s| !s.is_empty());
    Some(RetryContext {
        count,
        reasons: &last.rejection_reasons,
        remediation,
    })
}

/// Render the prompt for `step` in one call.
pub fn render_step_prompt(input: &StepPromptInputs<'_>) -> Result<String> {
    PromptEngine::new()?.render_step(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate_spec::{GateKind, GateSpec};
    use crate::test_support::{attempt, job_with_steps};

    #[test]
    fn prompt_sections_are_ordered() {
        let (mut job, mut steps) = job_with_steps(2);
        job.invariants = Some(vec!["Public API stays stable".to_string()]);
        steps[0].acceptance_criteria = vec!["Parser handles empty input".to_string()];
        steps[0].gates = vec![GateSpec::new(GateKind::HumanApproval, "Reviewer signs off")];

        let rendered = render_step_prompt(&StepPromptInputs {
            job: &job,
            step: &steps[0],
            attempts: &[],
        })
        .expect("render");

        let contract = rendered.find("### Executor Contract").expect("contract");
        let goal = rendered.find("### Job:").expect("job");
        let invariants = rendered.find("### Invariants").expect("invariants");
        let step = rendered.find("### Step 1 of 2").expect("step");
        let criteria = rendered.find("### Acceptance Criteria").expect("criteria");
        assert!(contract < goal && goal < invariants && invariants < step && step < criteria);
        assert!(rendered.contains("- Public API stays stable"));
        assert!(rendered.contains("`c1`: Parser handles empty input"));
        assert!(rendered.contains("`human_approval`: Reviewer signs off"));
        assert!(!rendered.contains("Previous Attempt Rejected"));
    }

    #[test]
    fn retry_section_lists_last_rejection() {
        let (job, mut steps) = job_with_steps(1);
        steps[0].remediation_prompt = "Add the missing tests first.".to_string();
        let mut rejected = attempt(&job.job_id, "S1", false);
        rejected.rejection_reasons = vec!["Model claim is not MET.".to_string()];

        let rendered = render_step_prompt(&StepPromptInputs {
            job: &job,
            step: &steps[0],
            attempts: &[rejected],
        })
        .expect("render");
        assert!(rendered.contains("### Previous Attempt Rejected (retry 1)"));
        assert!(rendered.contains("- Model claim is not MET."));
        assert!(rendered.contains("Add the missing tests first."));
    }

    #[test]
    fn unset_invariants_render_placeholder() {
        let (mut job, steps) = job_with_steps(1);
        job.invariants = None;
        let rendered = render_step_prompt(&StepPromptInputs {
            job: &job,
            step: &steps[0],
            attempts: &[],
        })
        .expect("render");
        assert!(rendered.contains("None declared."));
    }
}
