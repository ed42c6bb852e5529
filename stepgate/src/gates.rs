//! Gate evaluation.
//!
//! Every gate is evaluated independently; [`evaluate_gates`] never short
//! circuits so callers see every failure of a submission at once. Command
//! gates go through a [`ShellExecutor`]; nothing here returns an error, a
//! gate that cannot be evaluated fails.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::allowlist::{command_matches_allowlist, normalize_path, path_matches_any};
use crate::core::gate_spec::{CommandGate, ExpectedBool, FileText, GateKind, GateResult, GateSpec, PathTarget};
use crate::core::policies::Policies;
use crate::core::types::Evidence;
use crate::evidence::is_empty_value;
use crate::io::repo::Repo;
use crate::io::shell::{DEFAULT_OUTPUT_LIMIT_BYTES, ShellExecutor, ShellOutcome, ShellRequest};

/// Estimated diff size per changed file when evidence carries no `diff_lines`.
pub const LINES_PER_CHANGED_FILE: u64 = 50;

/// Everything a gate may look at.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub evidence: &'a Evidence,
    pub repo_root: Option<&'a Path>,
    pub policies: &'a Policies,
    /// Overrides `evidence.changed_files` when set.
    pub changed_files: Option<&'a [String]>,
    pub output_limit_bytes: usize,
    /// Ceiling on command timeouts, from the workspace config.
    pub timeout_cap_secs: Option<u64>,
}

impl<'a> GateContext<'a> {
    pub fn new(evidence: &'a Evidence, policies: &'a Policies) -> Self {
        Self {
            evidence,
            repo_root: None,
            policies,
            changed_files: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            timeout_cap_secs: None,
        }
    }

    /// Changed files, normalized, from the explicit list or the evidence.
    pub fn changed_files(&self) -> Vec<String> {
        match self.changed_files {
            Some(files) => files.iter().map(|f| normalize_path(f)).collect(),
            None => self
                .evidence
                .get("changed_files")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(normalize_path)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn repo(&self) -> Option<Repo> {
        self.repo_root.map(Repo::new)
    }
}

/// Evaluate every gate; `true` only if all passed.
#[instrument(skip_all, fields(gates = gates.len()))]
pub fn evaluate_gates<X: ShellExecutor + ?Sized>(
    gates: &[GateSpec],
    ctx: &GateContext<'_>,
    shell: &X,
) -> (bool, Vec<GateResult>) {
    let results: Vec<GateResult> = gates
        .iter()
        .map(|gate| evaluate_gate(gate, ctx, shell))
        .collect();
    let all_passed = results.iter().all(|r| r.passed);
    debug!(all_passed, "gates evaluated");
    (all_passed, results)
}

pub fn evaluate_gate<X: ShellExecutor + ?Sized>(
    gate: &GateSpec,
    ctx: &GateContext<'_>,
    shell: &X,
) -> GateResult {
    let result = match &gate.kind {
        GateKind::TestsPassed(params) => evidence_bool(gate, ctx, "tests_passed", params),
        GateKind::LintPassed(params) => evidence_bool(gate, ctx, "lint_passed", params),
        GateKind::CriteriaChecklistComplete => checklist_complete(gate, ctx),
        GateKind::FileExists(target) => file_presence(gate, ctx, target, true),
        GateKind::FileNotExists(target) => file_presence(gate, ctx, target, false),
        GateKind::ChangedFilesAllowlist(params) => {
            let outside: Vec<String> = ctx
                .changed_files()
                .into_iter()
                .filter(|f| !path_matches_any(f, &params.patterns))
                .collect();
            if outside.is_empty() {
                GateResult::pass(gate)
            } else {
                GateResult::fail(gate, format!("files outside allowlist: {}", outside.join(", ")))
            }
        }
        GateKind::ForbidPaths(params) => {
            let forbidden: Vec<String> = ctx
                .changed_files()
                .into_iter()
                .filter(|f| path_matches_any(f, &params.patterns))
                .collect();
            if forbidden.is_empty() {
                GateResult::pass(gate)
            } else {
                GateResult::fail(gate, format!("forbidden paths changed: {}", forbidden.join(", ")))
            }
        }
        GateKind::ChangedFilesMinimum(params) => {
            let count = ctx
                .changed_files()
                .iter()
                .filter(|f| path_matches_any(f, &params.patterns))
                .count();
            if count >= params.min_count {
                GateResult::pass(gate)
            } else {
                GateResult::fail(
                    gate,
                    format!("{count} matching changed files, need at least {}", params.min_count),
                )
            }
        }
        GateKind::DiffMaxLines(params) => {
            let files = ctx.changed_files();
            if params.max == 0 {
                if files.is_empty() {
                    GateResult::pass(gate)
                } else {
                    GateResult::fail(gate, format!("max=0 but {} files changed", files.len()))
                }
            } else {
                let lines = diff_lines(ctx, files.len());
                if lines <= params.max {
                    GateResult::pass(gate)
                } else {
                    GateResult::fail(gate, format!("{lines} diff lines exceeds max {}", params.max))
                }
            }
        }
        GateKind::DiffMinLines(params) => {
            let lines = diff_lines(ctx, ctx.changed_files().len());
            if lines >= params.min {
                GateResult::pass(gate)
            } else {
                GateResult::fail(gate, format!("{lines} diff lines below min {}", params.min))
            }
        }
        GateKind::CommandExit0(params)
        | GateKind::CommandOutputContains(params)
        | GateKind::CommandOutputRegex(params) => command_gate(gate, ctx, params, shell),
        GateKind::HumanApproval => GateResult::pass(gate),
        GateKind::EvidenceKeysPresent(params) => {
            let missing: Vec<&str> = params
                .keys
                .iter()
                .filter(|key| ctx.evidence.get(key.as_str()).is_none_or(is_empty_value))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                GateResult::pass(gate)
            } else {
                GateResult::fail(gate, format!("missing evidence keys: {}", missing.join(", ")))
            }
        }
        GateKind::FileContains(params) => file_text(gate, ctx, params, true),
        GateKind::FileNotContains(params) => file_text(gate, ctx, params, false),
        GateKind::Unknown { tag, .. } => {
            GateResult::fail(gate, format!("unknown gate type: {tag}"))
        }
        GateKind::Invalid { tag, error, .. } => {
            GateResult::fail(gate, format!("invalid parameters for {tag}: {error}"))
        }
    };
    debug!(gate_type = gate.gate_type(), passed = result.passed, "gate evaluated");
    result
}

fn evidence_bool(
    gate: &GateSpec,
    ctx: &GateContext<'_>,
    key: &str,
    params: &ExpectedBool,
) -> GateResult {
    match ctx.evidence.get(key).and_then(Value::as_bool) {
        None => GateResult::fail(gate, format!("evidence '{key}' missing or not a boolean")),
        Some(actual) if actual == params.expected => GateResult::pass(gate),
        Some(actual) => GateResult::fail(
            gate,
            format!("evidence '{key}' is {actual}, expected {}", params.expected),
        ),
    }
}

fn checklist_complete(gate: &GateSpec, ctx: &GateContext<'_>) -> GateResult {
    let Some(checklist) = ctx
        .evidence
        .get("criteria_checklist")
        .and_then(Value::as_object)
    else {
        return GateResult::fail(gate, "evidence 'criteria_checklist' missing or not a map");
    };
    let unchecked: Vec<&str> = checklist
        .iter()
        .filter(|(_, value)| **value != Value::Bool(true))
        .map(|(key, _)| key.as_str())
        .collect();
    if unchecked.is_empty() {
        GateResult::pass(gate)
    } else {
        GateResult::fail(gate, format!("criteria not checked: {}", unchecked.join(", ")))
    }
}

fn file_presence(
    gate: &GateSpec,
    ctx: &GateContext<'_>,
    target: &PathTarget,
    want_present: bool,
) -> GateResult {
    let Some(repo) = ctx.repo() else {
        return GateResult::fail(gate, "repo_root is not set");
    };
    let (label, present) = match (&target.path, &target.path_pattern) {
        (Some(path), _) => (path.clone(), repo.exists(path)),
        (None, Some(pattern)) => match repo.glob(pattern) {
            Ok(matches) => (pattern.clone(), !matches.is_empty()),
            Err(err) => return GateResult::fail(gate, format!("{err:#}")),
        },
        (None, None) => {
            return GateResult::fail(gate, "requires 'path' or 'path_pattern'");
        }
    };
    match (want_present, present) {
        (true, true) | (false, false) => GateResult::pass(gate),
        (true, false) => GateResult::fail(gate, format!("{label} does not exist")),
        (false, true) => GateResult::fail(gate, format!("{label} exists")),
    }
}

fn file_text(gate: &GateSpec, ctx: &GateContext<'_>, params: &FileText, want: bool) -> GateResult {
    let Some(repo) = ctx.repo() else {
        return GateResult::fail(gate, "repo_root is not set");
    };
    if !want && !repo.exists(&params.path) {
        return GateResult::pass(gate).with_details(format!("{} does not exist", params.path));
    }
    let contents = match repo.read_to_string(&params.path) {
        Ok(contents) => contents,
        Err(err) => return GateResult::fail(gate, format!("{err:#}")),
    };
    match (want, contents.contains(&params.text)) {
        (true, true) | (false, false) => GateResult::pass(gate),
        (true, false) => GateResult::fail(
            gate,
            format!("{} does not contain {:?}", params.path, params.text),
        ),
        (false, true) => GateResult::fail(gate, format!("{} contains {:?}", params.path, params.text)),
    }
}

fn diff_lines(ctx: &GateContext<'_>, changed: usize) -> u64 {
    ctx.evidence
        .get("diff_lines")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| (changed as u64).saturating_mul(LINES_PER_CHANGED_FILE))
}

fn command_gate<X: ShellExecutor + ?Sized>(
    gate: &GateSpec,
    ctx: &GateContext<'_>,
    params: &CommandGate,
    shell: &X,
) -> GateResult {
    let policies = ctx.policies;
    if !policies.enable_shell_gates {
        return GateResult::pass(gate).with_details("shell gates disabled");
    }
    if !command_matches_allowlist(&params.command, &policies.shell_gate_allowlist) {
        warn!(command = %params.command, "command rejected by allowlist");
        return GateResult::fail(
            gate,
            format!("command not in shell_gate_allowlist: {}", params.command),
        );
    }

    // Validate the regex before spending a process on it.
    let regex = match &gate.kind {
        GateKind::CommandOutputRegex(_) => {
            let Some(pattern) = params.pattern.as_deref() else {
                return GateResult::fail(gate, "requires 'pattern'");
            };
            match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => return GateResult::fail(gate, format!("invalid regex: {err}")),
            }
        }
        _ => None,
    };
    if matches!(gate.kind, GateKind::CommandOutputContains(_)) && params.expected.is_none() {
        return GateResult::fail(gate, "requires 'expected'");
    }

    let mut timeout_secs = params
        .timeout_secs
        .unwrap_or(policies.shell_gate_timeout_secs);
    if let Some(cap) = ctx.timeout_cap_secs {
        timeout_secs = timeout_secs.min(cap);
    }
    let timeout_secs = timeout_secs.max(1);
    let request = ShellRequest {
        command: params.command.clone(),
        cwd: command_cwd(ctx.repo_root, params.cwd.as_deref()),
        env: params
            .env
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
        timeout: Duration::from_secs(timeout_secs),
        output_limit_bytes: ctx.output_limit_bytes,
    };

    let outcome = match shell.run(&request) {
        Ok(outcome) => outcome,
        Err(err) => return GateResult::fail(gate, format!("failed to run command: {err:#}")),
    };
    judge_command(gate, params, regex.as_ref(), outcome, timeout_secs)
}

fn judge_command(
    gate: &GateSpec,
    params: &CommandGate,
    regex: Option<&Regex>,
    outcome: ShellOutcome,
    timeout_secs: u64,
) -> GateResult {
    let verdict = if outcome.timed_out {
        Err(format!("command timed out after {timeout_secs}s"))
    } else {
        match &gate.kind {
            GateKind::CommandExit0(_) if outcome.exit_code == Some(0) => Ok(()),
            GateKind::CommandExit0(_) => Err(match outcome.exit_code {
                Some(code) => format!("command exited with code {code}"),
                None => "command terminated by signal".to_string(),
            }),
            GateKind::CommandOutputContains(_) => {
                let expected = params.expected.as_deref().unwrap_or_default();
                if outcome.output.contains(expected) {
                    Ok(())
                } else {
                    Err(format!("output does not contain {expected:?}"))
                }
            }
            _ => match regex {
                Some(re) if re.is_match(&outcome.output) => Ok(()),
                Some(re) => Err(format!("output does not match /{}/", re.as_str())),
                None => Err("requires 'pattern'".to_string()),
            },
        }
    };

    let mut result = match verdict {
        Ok(()) => GateResult::pass(gate),
        Err(details) => GateResult::fail(gate, details),
    };
    result.exit_code = outcome.exit_code;
    result.output = Some(outcome.output);
    result
}

fn command_cwd(repo_root: Option<&Path>, cwd: Option<&str>) -> Option<PathBuf> {
    match (repo_root, cwd) {
        (Some(root), Some(dir)) => Some(root.join(normalize_path(dir))),
        (None, Some(dir)) => Some(PathBuf::from(dir)),
        (Some(root), None) => Some(root.to_path_buf()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate_spec::{CommandGate, MaxLines};
    use crate::test_support::ScriptedShell;
    use serde_json::json;
    use std::fs;

    fn gate(value: Value) -> GateSpec {
        serde_json::from_value(value).expect("gate")
    }

    fn evidence(value: Value) -> Evidence {
        value.as_object().cloned().expect("object")
    }

    fn shell_policies(allowlist: &[&str]) -> Policies {
        Policies {
            enable_shell_gates: true,
            shell_gate_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            ..Policies::default()
        }
    }

    #[test]
    fn tests_passed_compares_expected_value() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = evidence(json!({"tests_passed": false}));
        let ctx = GateContext::new(&ev, &policies);

        let expect_true = gate(json!({"type": "tests_passed"}));
        assert!(!evaluate_gate(&expect_true, &ctx, &shell).passed);
        let expect_false = gate(json!({"type": "tests_passed", "parameters": {"expected": false}}));
        assert!(evaluate_gate(&expect_false, &ctx, &shell).passed);

        let empty = Evidence::new();
        let ctx = GateContext::new(&empty, &policies);
        let result = evaluate_gate(&expect_true, &ctx, &shell);
        assert!(!result.passed);
        assert!(result.reason().contains("missing"));
    }

    #[test]
    fn diff_max_zero_passes_only_without_changes() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let max_zero = GateSpec::new(GateKind::DiffMaxLines(MaxLines { max: 0 }), "");

        let none = evidence(json!({"changed_files": []}));
        assert!(evaluate_gate(&max_zero, &GateContext::new(&none, &policies), &shell).passed);

        let some = evidence(json!({"changed_files": ["src/lib.rs"], "diff_lines": 0}));
        assert!(!evaluate_gate(&max_zero, &GateContext::new(&some, &policies), &shell).passed);
    }

    #[test]
    fn diff_lines_fall_back_to_estimate() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = evidence(json!({"changed_files": ["a", "b", "c"]}));
        let ctx = GateContext::new(&ev, &policies);
        assert!(evaluate_gate(&gate(json!({"type": "diff_max_lines", "parameters": {"max": 150}})), &ctx, &shell).passed);
        assert!(!evaluate_gate(&gate(json!({"type": "diff_max_lines", "parameters": {"max": 149}})), &ctx, &shell).passed);
        assert!(evaluate_gate(&gate(json!({"type": "diff_min_lines", "parameters": {"min": 150}})), &ctx, &shell).passed);

        let explicit = evidence(json!({"changed_files": ["a"], "diff_lines": 400}));
        let ctx = GateContext::new(&explicit, &policies);
        assert!(!evaluate_gate(&gate(json!({"type": "diff_max_lines", "parameters": {"max": 300}})), &ctx, &shell).passed);
    }

    #[test]
    fn changed_file_gates_use_normalized_paths() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = evidence(json!({"changed_files": ["./src/lib.rs", "src\\io\\repo.rs", "Cargo.lock"]}));
        let ctx = GateContext::new(&ev, &policies);

        let allow = gate(json!({"type": "changed_files_allowlist", "parameters": {"patterns": ["src/**"]}}));
        let result = evaluate_gate(&allow, &ctx, &shell);
        assert!(!result.passed);
        assert_eq!(result.details.as_deref(), Some("files outside allowlist: Cargo.lock"));

        let forbid = gate(json!({"type": "forbid_paths", "parameters": {"forbidden": ["*.lock"]}}));
        assert!(!evaluate_gate(&forbid, &ctx, &shell).passed);

        let minimum = gate(json!({"type": "changed_files_minimum", "parameters": {"patterns": ["src/**"], "min_count": 2}}));
        assert!(evaluate_gate(&minimum, &ctx, &shell).passed);
    }

    #[test]
    fn explicit_changed_files_override_evidence() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = evidence(json!({"changed_files": ["docs/a.md"]}));
        let explicit = vec!["src/main.rs".to_string()];
        let ctx = GateContext {
            changed_files: Some(&explicit),
            ..GateContext::new(&ev, &policies)
        };
        let allow = gate(json!({"type": "changed_files_allowlist", "parameters": {"patterns": ["src/**"]}}));
        assert!(evaluate_gate(&allow, &ctx, &shell).passed);
    }

    #[test]
    fn file_gates_resolve_against_repo_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/lib.rs"), "pub fn parse() {}\n// TODO later\n").expect("write");
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = Evidence::new();
        let ctx = GateContext {
            repo_root: Some(temp.path()),
            ..GateContext::new(&ev, &policies)
        };

        let exists = gate(json!({"type": "file_exists", "parameters": {"path": "src/lib.rs"}}));
        assert!(evaluate_gate(&exists, &ctx, &shell).passed);
        let glob = gate(json!({"type": "file_exists", "parameters": {"path_pattern": "src/*.rs"}}));
        assert!(evaluate_gate(&glob, &ctx, &shell).passed);
        let absent = gate(json!({"type": "file_not_exists", "parameters": {"path_pattern": "tests/*.rs"}}));
        assert!(evaluate_gate(&absent, &ctx, &shell).passed);

        let contains = gate(json!({"type": "file_contains", "parameters": {"path": "src/lib.rs", "text": "fn parse"}}));
        assert!(evaluate_gate(&contains, &ctx, &shell).passed);
        let no_todo = gate(json!({"type": "file_not_contains", "parameters": {"path": "src/lib.rs", "text": "TODO"}}));
        assert!(!evaluate_gate(&no_todo, &ctx, &shell).passed);
        let missing_file = gate(json!({"type": "file_not_contains", "parameters": {"path": "src/gone.rs", "text": "TODO"}}));
        assert!(evaluate_gate(&missing_file, &ctx, &shell).passed);
    }

    #[test]
    fn file_gates_fail_without_repo_root() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = Evidence::new();
        let exists = gate(json!({"type": "file_exists", "parameters": {"path": "src/lib.rs"}}));
        let result = evaluate_gate(&exists, &GateContext::new(&ev, &policies), &shell);
        assert!(!result.passed);
        assert_eq!(result.details.as_deref(), Some("repo_root is not set"));
    }

    #[test]
    fn command_gates_auto_pass_when_disabled() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = Evidence::new();
        let gate = GateSpec::new(GateKind::CommandExit0(CommandGate::new("rm -rf /")), "");
        let result = evaluate_gate(&gate, &GateContext::new(&ev, &policies), &shell);
        assert!(result.passed);
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn command_outside_allowlist_fails_without_running() {
        let policies = shell_policies(&["pytest"]);
        let shell = ScriptedShell::default();
        let ev = Evidence::new();
        let gate = GateSpec::new(GateKind::CommandExit0(CommandGate::new("rm -rf /")), "");
        let result = evaluate_gate(&gate, &GateContext::new(&ev, &policies), &shell);
        assert!(!result.passed);
        assert!(result.reason().contains("allowlist"));
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn command_results_are_judged() {
        let policies = shell_policies(&["*pytest*"]);
        let shell = ScriptedShell::default()
            .with_exit("pytest -q", 1, "2 failed, 10 passed")
            .with_exit("pytest -q --lf", 0, "10 passed in 0.4s");
        let ev = Evidence::new();
        let ctx = GateContext::new(&ev, &policies);

        let failing = GateSpec::new(GateKind::CommandExit0(CommandGate::new("pytest -q")), "");
        let result = evaluate_gate(&failing, &ctx, &shell);
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.output.as_deref(), Some("2 failed, 10 passed"));

        let mut contains = CommandGate::new("pytest -q --lf");
        contains.expected = Some("10 passed".to_string());
        assert!(evaluate_gate(&GateSpec::new(GateKind::CommandOutputContains(contains), ""), &ctx, &shell).passed);

        let mut regex = CommandGate::new("pytest -q --lf");
        regex.pattern = Some(r"\d+ passed in [0-9.]+s".to_string());
        assert!(evaluate_gate(&GateSpec::new(GateKind::CommandOutputRegex(regex), ""), &ctx, &shell).passed);
    }

    #[test]
    fn command_timeout_is_a_gate_failure() {
        let policies = shell_policies(&["sleep*"]);
        let shell = ScriptedShell::default().with_timeout("sleep 100");
        let ev = Evidence::new();
        let gate = GateSpec::new(GateKind::CommandExit0(CommandGate::new("sleep 100")), "");
        let result = evaluate_gate(&gate, &GateContext::new(&ev, &policies), &shell);
        assert!(!result.passed);
        assert!(result.details.as_deref().is_some_and(|d| d.contains("timed out")));
    }

    #[test]
    fn command_runs_in_repo_root_with_env() {
        let policies = shell_policies(&["make*"]);
        let shell = ScriptedShell::default().with_exit("make check", 0, "");
        let ev = Evidence::new();
        let root = PathBuf::from("/work/repo");
        let ctx = GateContext {
            repo_root: Some(&root),
            ..GateContext::new(&ev, &policies)
        };
        let mut params = CommandGate::new("make check");
        params.cwd = Some("crates/core".to_string());
        params.env.insert("CI".to_string(), json!(true));
        params.timeout_secs = Some(5);
        evaluate_gate(&GateSpec::new(GateKind::CommandExit0(params), ""), &ctx, &shell);

        let calls = shell.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd, Some(PathBuf::from("/work/repo/crates/core")));
        assert_eq!(calls[0].env, vec![("CI".to_string(), "true".to_string())]);
        assert_eq!(calls[0].timeout, Duration::from_secs(5));
    }

    #[test]
    fn configured_cap_bounds_command_timeout() {
        let policies = Policies {
            shell_gate_timeout_secs: 600,
            ..shell_policies(&["make*"])
        };
        let shell = ScriptedShell::default().with_exit("make check", 0, "");
        let ev = Evidence::new();
        let ctx = GateContext {
            timeout_cap_secs: Some(30),
            ..GateContext::new(&ev, &policies)
        };
        let gate = GateSpec::new(GateKind::CommandExit0(CommandGate::new("make check")), "");
        assert!(evaluate_gate(&gate, &ctx, &shell).passed);
        assert_eq!(shell.calls()[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_and_invalid_gates_fail_closed() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = Evidence::new();
        let ctx = GateContext::new(&ev, &policies);

        let unknown = evaluate_gate(&gate(json!({"type": "security_scan"})), &ctx, &shell);
        assert!(!unknown.passed);
        assert_eq!(unknown.details.as_deref(), Some("unknown gate type: security_scan"));

        let invalid = evaluate_gate(&gate(json!({"type": "diff_max_lines", "parameters": {}})), &ctx, &shell);
        assert!(!invalid.passed);
        assert!(invalid.reason().contains("invalid parameters for diff_max_lines"));
    }

    #[test]
    fn evaluate_gates_reports_every_failure() {
        let policies = Policies::default();
        let shell = ScriptedShell::default();
        let ev = evidence(json!({"criteria_checklist": {"c1": true, "c2": false}, "summary": ""}));
        let ctx = GateContext::new(&ev, &policies);
        let gates = vec![
            gate(json!({"type": "criteria_checklist_complete"})),
            gate(json!({"type": "human_approval"})),
            gate(json!({"type": "evidence_keys_present", "parameters": {"keys": ["summary", "notes"]}})),
        ];
        let (all_passed, results) = evaluate_gates(&gates, &ctx, &shell);
        assert!(!all_passed);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].details.as_deref(), Some("criteria not checked: c2"));
        assert!(results[1].passed);
        assert_eq!(results[2].details.as_deref(), Some("missing evidence keys: summary, notes"));
    }
}
