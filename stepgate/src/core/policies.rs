//! Typed job policies.
//!
//! Every policy the core consumes is a named field with a default. Keys the
//! core does not know about are kept in [`Policies::extra`] so a policy map
//! written by a newer client survives a load/save cycle unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How strictly evidence text and shapes are judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSchemaMode {
    #[default]
    Loose,
    Strict,
}

/// What happens when a step runs out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryExhaustedAction {
    #[default]
    PauseForHuman,
    FailJob,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    pub evidence_schema_mode: EvidenceSchemaMode,
    pub require_devlog_per_step: bool,
    pub require_tests_evidence: bool,
    pub require_diff_summary: bool,
    pub require_commit_per_step: bool,
    /// Rejections allowed per step before escalation. `0` disables the limit.
    pub max_retries_per_step: u32,
    pub retry_exhausted_action: RetryExhaustedAction,
    /// Base for the exponential retry hint. `0` disables the hint.
    pub retry_backoff_base_ms: u64,
    pub enable_shell_gates: bool,
    pub shell_gate_allowlist: Vec<String>,
    pub shell_gate_timeout_secs: u64,
    /// Insert a checkpoint after every N original steps. `0` disables.
    pub checkpoint_interval_steps: u32,
    /// Command run by checkpoint steps.
    pub test_command: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            evidence_schema_mode: EvidenceSchemaMode::Loose,
            require_devlog_per_step: false,
            require_tests_evidence: false,
            require_diff_summary: false,
            require_commit_per_step: false,
            max_retries_per_step: 3,
            retry_exhausted_action: RetryExhaustedAction::PauseForHuman,
            retry_backoff_base_ms: 0,
            enable_shell_gates: false,
            shell_gate_allowlist: Vec::new(),
            shell_gate_timeout_secs: 60,
            checkpoint_interval_steps: 0,
            test_command: "pytest -q".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl Policies {
    pub fn is_strict(&self) -> bool {
        self.evidence_schema_mode == EvidenceSchemaMode::Strict
    }

    /// True once `rejections` has reached the per-step retry ceiling.
    pub fn retries_exhausted(&self, rejections: u32) -> bool {
        self.max_retries_per_step > 0 && rejections >= self.max_retries_per_step
    }

    /// Exponential backoff hint: `base * 2^(rejections - 1)`.
    pub fn retry_delay_ms(&self, rejections: u32) -> Option<u64> {
        if self.retry_backoff_base_ms == 0 || rejections == 0 {
            return None;
        }
        let exp = rejections.saturating_sub(1).min(20);
        Some(self.retry_backoff_base_ms.saturating_mul(1u64 << exp))
    }

    /// Apply a JSON override map on top of these policies.
    ///
    /// Keys are merged shallowly; unknown keys land in `extra`.
    pub fn merged_with(&self, overrides: &serde_json::Map<String, Value>) -> serde_json::Result<Self> {
        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(base))
    }
}
