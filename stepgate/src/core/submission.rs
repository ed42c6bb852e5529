//! Pure decision rules for a step submission.
//!
//! The rules run in a fixed order: missing evidence keys, strict acceptance
//! checklist, model claim. Validator issues and gate failures found by the
//! caller are folded in afterwards by [`assemble`].

use serde_json::Value;

use crate::core::gate_spec::GateResult;
use crate::core::policies::Policies;
use crate::core::types::{Evidence, ModelClaim, Step};

pub const CLAIM_NOT_MET: &str = "Model claim is not MET.";

/// Inputs shared by every submission rule.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionCheck<'a> {
    pub step: &'a Step,
    pub policies: &'a Policies,
    pub claim: ModelClaim,
    pub evidence: &'a Evidence,
    pub devlog_line: Option<&'a str>,
    pub commit_hash: Option<&'a str>,
}

/// Result of the ordered rules, before validator and gate findings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Precheck {
    pub missing_fields: Vec<String>,
    /// The first rule that rejected the submission, if any.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub missing_fields: Vec<String>,
    pub rejection_reasons: Vec<String>,
}

/// Apply the ordered submission rules.
pub fn precheck(check: &SubmissionCheck<'_>) -> Precheck {
    let missing_fields = missing_fields(check);
    if !missing_fields.is_empty() {
        let reason = format!(
            "Missing required evidence keys: {}",
            missing_fields.join(", ")
        );
        return Precheck {
            missing_fields,
            reason: Some(reason),
        };
    }

    let unchecked = unchecked_criteria(check);
    if !unchecked.is_empty() {
        return Precheck {
            missing_fields,
            reason: Some(format!(
                "Acceptance criteria marked false: {}",
                unchecked.join(", ")
            )),
        };
    }

    if check.claim != ModelClaim::Met {
        return Precheck {
            missing_fields,
            reason: Some(CLAIM_NOT_MET.to_string()),
        };
    }

    Precheck::default()
}

/// Every required key absent from the submission, each listed once.
pub fn missing_fields(check: &SubmissionCheck<'_>) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    let mut push = |key: &str| {
        if !missing.iter().any(|existing| existing == key) {
            missing.push(key.to_string());
        }
    };

    for key in &check.step.required_evidence {
        if !check.evidence.contains_key(key) {
            push(key);
        }
    }

    let policies = check.policies;
    if policies.require_devlog_per_step && !provided(check.devlog_line, check.evidence, "devlog_line") {
        push("devlog_line");
    }
    if policies.require_commit_per_step && !provided(check.commit_hash, check.evidence, "commit_hash") {
        push("commit_hash");
    }
    if policies.require_diff_summary && !check.evidence.contains_key("diff_summary") {
        push("diff_summary");
    }
    if policies.require_tests_evidence {
        for key in ["tests_run", "tests_passed"] {
            if !check.evidence.contains_key(key) {
                push(key);
            }
        }
    }

    if strict_checklist_applies(check) && !checklist_complete_shape(check) {
        push("criteria_checklist");
    }

    missing
}

/// Checklist keys (`c1..cN`) whose value is not `true`, in strict mode only.
pub fn unchecked_criteria(check: &SubmissionCheck<'_>) -> Vec<String> {
    if !strict_checklist_applies(check) {
        return Vec::new();
    }
    let Some(Value::Object(checklist)) = check.evidence.get("criteria_checklist") else {
        return Vec::new();
    };
    check
        .step
        .checklist_keys()
        .into_iter()
        .filter(|key| checklist.get(key) != Some(&Value::Bool(true)))
        .collect()
}

/// Combine the ordered rules with validator issues and gate results.
pub fn assemble(precheck: Precheck, validator_issues: &[String], gates: &[GateResult]) -> Verdict {
    let mut rejection_reasons = Vec::new();
    rejection_reasons.extend(precheck.reason);
    rejection_reasons.extend(validator_issues.iter().cloned());
    rejection_reasons.extend(gates.iter().filter(|g| !g.passed).map(GateResult::reason));
    Verdict {
        accepted: rejection_reasons.is_empty(),
        missing_fields: precheck.missing_fields,
        rejection_reasons,
    }
}

fn strict_checklist_applies(check: &SubmissionCheck<'_>) -> bool {
    check.policies.is_strict() && !check.step.acceptance_criteria.is_empty()
}

/// Strict mode wants a boolean for every positional criterion key.
fn checklist_complete_shape(check: &SubmissionCheck<'_>) -> bool {
    let Some(Value::Object(checklist)) = check.evidence.get("criteria_checklist") else {
        return false;
    };
    check
        .step
        .checklist_keys()
        .iter()
        .all(|key| matches!(checklist.get(key), Some(Value::Bool(_))))
}

fn provided(arg: Option<&str>, evidence: &Evidence, key: &str) -> bool {
    arg.is_some_and(|v| !v.trim().is_empty()) || evidence.contains_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate_spec::{GateKind, GateSpec};
    use crate::core::policies::EvidenceSchemaMode;
    use serde_json::json;

    fn step(required: &[&str], criteria: &[&str]) -> Step {
        Step {
            step_id: "S1".to_string(),
            order_index: 0,
            title: "Implement parser".to_string(),
            instruction_prompt: String::new(),
            expected_outputs: Vec::new(),
            acceptance_criteria: criteria.iter().map(|c| c.to_string()).collect(),
            required_evidence: required.iter().map(|r| r.to_string()).collect(),
            gates: Vec::new(),
            remediation_prompt: String::new(),
            context_refs: Vec::new(),
            is_checkpoint: false,
            human_approved: false,
        }
    }

    fn evidence(value: Value) -> Evidence {
        value.as_object().cloned().expect("object")
    }

    fn strict() -> Policies {
        Policies {
            evidence_schema_mode: EvidenceSchemaMode::Strict,
            ..Policies::default()
        }
    }

    #[test]
    fn lists_every_missing_key_once() {
        let step = step(&["tests_run", "diff_summary", "tests_run"], &[]);
        let policies = Policies {
            require_tests_evidence: true,
            require_devlog_per_step: true,
            ..Policies::default()
        };
        let ev = evidence(json!({"unrelated": 1}));
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::Met,
            evidence: &ev,
            devlog_line: None,
            commit_hash: None,
        };
        assert_eq!(
            missing_fields(&check),
            vec!["tests_run", "diff_summary", "devlog_line", "tests_passed"]
        );
        let pre = precheck(&check);
        assert_eq!(
            pre.reason.as_deref(),
            Some("Missing required evidence keys: tests_run, diff_summary, devlog_line, tests_passed")
        );
    }

    #[test]
    fn devlog_and_commit_can_come_from_arguments() {
        let step = step(&[], &[]);
        let policies = Policies {
            require_devlog_per_step: true,
            require_commit_per_step: true,
            ..Policies::default()
        };
        let ev = Evidence::new();
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::Met,
            evidence: &ev,
            devlog_line: Some("added parser"),
            commit_hash: Some("abc123"),
        };
        assert!(missing_fields(&check).is_empty());
    }

    #[test]
    fn strict_mode_requires_positional_checklist() {
        let step = step(&[], &["parses input", "rejects garbage"]);
        let policies = strict();
        let ev = evidence(json!({"criteria_checklist": {"c1": true}}));
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::Met,
            evidence: &ev,
            devlog_line: None,
            commit_hash: None,
        };
        assert_eq!(missing_fields(&check), vec!["criteria_checklist"]);
    }

    #[test]
    fn false_criterion_rejects_before_claim() {
        let step = step(&[], &["parses input", "rejects garbage"]);
        let policies = strict();
        let ev = evidence(json!({"criteria_checklist": {"c1": true, "c2": false}}));
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::NotMet,
            evidence: &ev,
            devlog_line: None,
            commit_hash: None,
        };
        let pre = precheck(&check);
        assert!(pre.missing_fields.is_empty());
        assert_eq!(
            pre.reason.as_deref(),
            Some("Acceptance criteria marked false: c2")
        );
    }

    #[test]
    fn loose_mode_ignores_checklist() {
        let step = step(&[], &["parses input"]);
        let policies = Policies::default();
        let ev = evidence(json!({"criteria_checklist": {"c1": false}}));
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::Met,
            evidence: &ev,
            devlog_line: None,
            commit_hash: None,
        };
        assert_eq!(precheck(&check), Precheck::default());
    }

    #[test]
    fn not_met_claim_rejects_with_exact_reason() {
        let step = step(&["tests_passed"], &[]);
        let policies = Policies::default();
        let ev = evidence(json!({"tests_passed": true}));
        let check = SubmissionCheck {
            step: &step,
            policies: &policies,
            claim: ModelClaim::NotMet,
            evidence: &ev,
            devlog_line: None,
            commit_hash: None,
        };
        let verdict = assemble(precheck(&check), &[], &[]);
        assert!(!verdict.accepted);
        assert_eq!(verdict.rejection_reasons, vec![CLAIM_NOT_MET.to_string()]);
    }

    #[test]
    fn assemble_folds_gate_failures_and_issues() {
        let gate = GateSpec::new(GateKind::CriteriaChecklistComplete, "all ticked");
        let failed = GateResult::fail(&gate, "c2 is false");
        let passed = GateResult::pass(&gate);
        let verdict = assemble(
            Precheck::default(),
            &["diff_summary is too vague".to_string()],
            &[passed, failed],
        );
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.rejection_reasons,
            vec![
                "diff_summary is too vague".to_string(),
                "Gate failed (criteria_checklist_complete): c2 is false".to_string()
            ]
        );
    }

    #[test]
    fn clean_submission_is_accepted() {
        let verdict = assemble(Precheck::default(), &[], &[]);
        assert!(verdict.accepted);
        assert!(verdict.rejection_reasons.is_empty());
    }
}
