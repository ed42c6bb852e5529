//! Plan compilation: proposed steps in, numbered steps out.
//!
//! Compilation validates the proposal, injects checkpoint steps at the
//! policy cadence, and assigns `S{n}` identifiers to steps without one.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::gate_spec::{CommandGate, GateKind, GateSpec};
use crate::core::policies::Policies;
use crate::core::types::Step;

/// A step as proposed by the planner, before compilation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
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
}

impl StepSpec {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub steps: Vec<Step>,
    /// Sequence number the next compilation should start from.
    pub next_seq: u32,
}

impl CompiledPlan {
    pub fn step_order(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.step_id.clone()).collect()
    }
}

const CHECKPOINT_INSTRUCTIONS: &str = "Re-run the full test suite for the project. \
Verify that every test passes and that the steps completed so far introduced no regressions. \
Report the exact commands you ran and their results.";

const CHECKPOINT_REMEDIATION: &str = "Fix any failing tests or regressions before \
resubmitting this checkpoint. Do not weaken or skip tests to make them pass.";

/// Compile `raw_steps` into a numbered plan.
///
/// `first_seq` is the numeric suffix used for the first auto-assigned id.
/// `used_ids` are ids handed out by earlier plans of the same job: explicit
/// ids may not repeat them and auto-numbering skips them.
/// Returns a list of validation errors when the proposal is unusable.
pub fn compile(
    raw_steps: &[StepSpec],
    policies: &Policies,
    first_seq: u32,
    used_ids: &[String],
) -> Result<CompiledPlan, Vec<String>> {
    validate_specs(raw_steps, used_ids)?;

    let interval = policies.checkpoint_interval_steps as usize;
    let mut specs: Vec<(StepSpec, bool)> = Vec::with_capacity(raw_steps.len());
    let mut checkpoints = 0u32;
    for (idx, spec) in raw_steps.iter().enumerate() {
        specs.push((normalize_spec(spec), false));
        if interval > 0 && (idx + 1) % interval == 0 {
            checkpoints += 1;
            specs.push((checkpoint_spec(checkpoints, policies), true));
        }
    }

    let mut taken: HashSet<String> = specs
        .iter()
        .filter_map(|(spec, _)| spec.step_id.clone())
        .chain(used_ids.iter().cloned())
        .collect();
    let mut seq = first_seq.max(1);
    let mut steps = Vec::with_capacity(specs.len());
    for (order_index, (spec, is_checkpoint)) in specs.into_iter().enumerate() {
        let step_id = match spec.step_id {
            Some(id) => id,
            None => {
                let id = loop {
                    let candidate = format!("S{seq}");
                    seq += 1;
                    if !taken.contains(&candidate) {
                        break candidate;
                    }
                };
                taken.insert(id.clone());
                id
            }
        };
        steps.push(Step {
            step_id,
            order_index,
            title: spec.title,
            instruction_prompt: spec.instruction_prompt,
            expected_outputs: spec.expected_outputs,
            acceptance_criteria: spec.acceptance_criteria,
            required_evidence: spec.required_evidence,
            gates: spec.gates,
            remediation_prompt: spec.remediation_prompt,
            context_refs: spec.context_refs,
            is_checkpoint,
            human_approved: false,
        });
    }

    let past_explicit = steps
        .iter()
        .filter_map(|s| sequence_number(&s.step_id))
        .max()
        .map_or(0, |n| n.saturating_add(1));
    Ok(CompiledPlan {
        steps,
        next_seq: seq.max(past_explicit),
    })
}

/// Numeric suffix of an `S{n}` id.
fn sequence_number(step_id: &str) -> Option<u32> {
    step_id.strip_prefix('S')?.parse().ok()
}

fn validate_specs(raw_steps: &[StepSpec], used_ids: &[String]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if raw_steps.is_empty() {
        errors.push("plan must contain at least one step".to_string());
    }
    let mut seen = HashSet::new();
    for (idx, spec) in raw_steps.iter().enumerate() {
        if spec.title.trim().is_empty() {
            errors.push(format!("step {}: title must not be empty", idx + 1));
        }
        if let Some(id) = &spec.step_id {
            let id = id.trim();
            if id.is_empty() {
                errors.push(format!("step {}: step_id must not be blank", idx + 1));
            } else if !seen.insert(id.to_string()) {
                errors.push(format!("step {}: duplicate step_id '{}'", idx + 1, id));
            } else if used_ids.iter().any(|used| used == id) {
                errors.push(format!(
                    "step {}: step_id '{}' was used by an earlier plan of this job",
                    idx + 1,
                    id
                ));
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn normalize_spec(spec: &StepSpec) -> StepSpec {
    fn clean(items: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let item = item.trim();
            if !item.is_empty() && !out.iter().any(|existing| existing == item) {
                out.push(item.to_string());
            }
        }
        out
    }

    StepSpec {
        step_id: spec.step_id.as_ref().map(|id| id.trim().to_string()),
        title: spec.title.trim().to_string(),
        instruction_prompt: spec.instruction_prompt.trim().to_string(),
        expected_outputs: clean(&spec.expected_outputs),
        // Criteria are positional (c1..cN), so blanks are dropped but duplicates kept.
        acceptance_criteria: spec
            .acceptance_criteria
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        required_evidence: clean(&spec.required_evidence),
        gates: spec.gates.clone(),
        remediation_prompt: spec.remediation_prompt.trim().to_string(),
        context_refs: clean(&spec.context_refs),
    }
}

fn checkpoint_spec(number: u32, policies: &Policies) -> StepSpec {
    StepSpec {
        step_id: None,
        title: format!("Checkpoint {number}: Regression verification"),
        instruction_prompt: CHECKPOINT_INSTRUCTIONS.to_string(),
        expected_outputs: vec!["Full test suite results".to_string()],
        acceptance_criteria: vec![
            "The full test suite passes".to_string(),
            "No regressions were introduced by earlier steps".to_string(),
        ],
        required_evidence: vec![
            "tests_run".to_string(),
            "tests_passed".to_string(),
            "commands_run".to_string(),
        ],
        gates: vec![GateSpec::new(
            GateKind::CommandExit0(CommandGate::new(policies.test_command.clone())),
            "Project test command exits 0",
        )],
        remediation_prompt: CHECKPOINT_REMEDIATION.to_string(),
        context_refs: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(n: usize) -> Vec<StepSpec> {
        (1..=n)
            .map(|i| StepSpec::titled(format!("Step {i}")))
            .collect()
    }

    fn with_interval(n: u32) -> Policies {
        Policies {
            checkpoint_interval_steps: n,
            ..Policies::default()
        }
    }

    #[test]
    fn interval_two_over_five_steps_injects_two_checkpoints() {
        let plan = compile(&specs(5), &with_interval(2), 1, &[]).expect("compile");
        assert_eq!(plan.steps.len(), 7);

        let checkpoint_positions: Vec<usize> = plan
            .steps
            .iter()
            .filter(|s| s.is_checkpoint)
            .map(|s| s.order_index)
            .collect();
        assert_eq!(checkpoint_positions, vec![2, 5]);
        assert!(plan.steps[2].title.contains("Checkpoint 1"));
        assert!(plan.steps[5].title.contains("Checkpoint 2"));
        assert_eq!(plan.steps[6].title, "Step 5");
    }

    #[test]
    fn interval_zero_injects_nothing() {
        let plan = compile(&specs(5), &with_interval(0), 1, &[]).expect("compile");
        assert_eq!(plan.steps.len(), 5);
        assert!(plan.steps.iter().all(|s| !s.is_checkpoint));
    }

    #[test]
    fn checkpoint_requires_test_evidence_and_runs_test_command() {
        let policies = Policies {
            checkpoint_interval_steps: 1,
            test_command: "cargo test".to_string(),
            ..Policies::default()
        };
        let plan = compile(&specs(1), &policies, 1, &[]).expect("compile");
        let checkpoint = &plan.steps[1];
        assert_eq!(
            checkpoint.required_evidence,
            vec!["tests_run", "tests_passed", "commands_run"]
        );
        assert_eq!(checkpoint.gates.len(), 1);
        match &checkpoint.gates[0].kind {
            GateKind::CommandExit0(params) => assert_eq!(params.command, "cargo test"),
            other => panic!("unexpected gate {other:?}"),
        }
    }

    #[test]
    fn ids_are_sequential_from_first_seq() {
        let plan = compile(&specs(3), &with_interval(0), 1, &[]).expect("compile");
        assert_eq!(plan.step_order(), vec!["S1", "S2", "S3"]);
        assert_eq!(plan.next_seq, 4);

        let replanned = compile(&specs(2), &with_interval(0), plan.next_seq, &[]).expect("compile");
        assert_eq!(replanned.step_order(), vec!["S4", "S5"]);
    }

    #[test]
    fn explicit_ids_are_kept_and_skipped_by_auto_numbering() {
        let mut raw = specs(3);
        raw[0].step_id = Some("S2".to_string());
        let plan = compile(&raw, &with_interval(0), 1, &[]).expect("compile");
        assert_eq!(plan.step_order(), vec!["S2", "S1", "S3"]);
    }

    #[test]
    fn duplicate_ids_and_blank_titles_are_rejected() {
        let mut raw = specs(2);
        raw[0].step_id = Some("A".to_string());
        raw[1].step_id = Some("A".to_string());
        raw[1].title = "  ".to_string();
        let errors = compile(&raw, &Policies::default(), 1, &[]).expect_err("invalid");
        assert!(errors.iter().any(|e| e.contains("duplicate step_id 'A'")));
        assert!(errors.iter().any(|e| e.contains("title must not be empty")));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let errors = compile(&[], &Policies::default(), 1, &[]).expect_err("invalid");
        assert_eq!(errors, vec!["plan must contain at least one step".to_string()]);
    }

    #[test]
    fn normalization_trims_and_dedupes_evidence_keys() {
        let mut raw = specs(1);
        raw[0].required_evidence = vec![
            " tests_run ".to_string(),
            "tests_run".to_string(),
            "".to_string(),
        ];
        raw[0].acceptance_criteria = vec!["a".to_string(), " ".to_string(), "a".to_string()];
        let plan = compile(&raw, &Policies::default(), 1, &[]).expect("compile");
        assert_eq!(plan.steps[0].required_evidence, vec!["tests_run"]);
        assert_eq!(plan.steps[0].acceptance_criteria, vec!["a", "a"]);
    }

    #[test]
    fn explicit_ids_push_the_sequence_past_them() {
        let mut raw = specs(2);
        raw[0].step_id = Some("S3".to_string());
        let plan = compile(&raw, &with_interval(0), 1, &[]).expect("compile");
        assert_eq!(plan.step_order(), vec!["S3", "S1"]);
        assert_eq!(plan.next_seq, 4);

        let used = plan.step_order();
        let replanned = compile(&specs(2), &with_interval(0), 1, &used).expect("compile");
        assert_eq!(replanned.step_order(), vec!["S2", "S4"]);
    }

    #[test]
    fn ids_from_earlier_plans_cannot_be_claimed_again() {
        let mut raw = specs(1);
        raw[0].step_id = Some("S1".to_string());
        let errors = compile(&raw, &with_interval(0), 2, &["S1".to_string()]).expect_err("reused");
        assert_eq!(
            errors,
            vec!["step 1: step_id 'S1' was used by an earlier plan of this job".to_string()]
        );
    }
}
