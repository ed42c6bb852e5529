//! Declarative gate definitions and results.
//!
//! Gates arrive as JSON maps `{type, parameters, description}`. They are
//! decoded into [`GateKind`], one variant per supported type. Tags we do not
//! recognize decode to [`GateKind::Unknown`] and parameters that do not fit a
//! known type decode to [`GateKind::Invalid`]; both always fail.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Serialized gate output is capped at this many characters.
pub const MAX_GATE_OUTPUT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedBool {
    pub expected: bool,
}

impl Default for ExpectedBool {
    fn default() -> Self {
        Self { expected: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PathTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedPatterns {
    #[serde(alias = "allowed")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenPatterns {
    #[serde(alias = "forbidden")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimumChanged {
    pub patterns: Vec<String>,
    pub min_count: usize,
}

impl Default for MinimumChanged {
    fn default() -> Self {
        Self {
            patterns: vec!["**".to_string()],
            min_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxLines {
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinLines {
    pub min: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandGate {
    pub command: String,
    /// Substring for `command_output_contains`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Regex for `command_output_regex`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Working directory relative to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub env: Map<String, Value>,
}

impl CommandGate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected: None,
            pattern: None,
            timeout_secs: None,
            cwd: None,
            env: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceKeys {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileText {
    pub path: String,
    pub text: String,
}

/// The typed gate variants.
#[derive(Debug, Clone, PartialEq)]
pub enum GateKind {
    TestsPassed(ExpectedBool),
    LintPassed(ExpectedBool),
    CriteriaChecklistComplete,
    FileExists(PathTarget),
    FileNotExists(PathTarget),
    ChangedFilesAllowlist(AllowedPatterns),
    ForbidPaths(ForbiddenPatterns),
    ChangedFilesMinimum(MinimumChanged),
    DiffMaxLines(MaxLines),
    DiffMinLines(MinLines),
    CommandExit0(CommandGate),
    CommandOutputContains(CommandGate),
    CommandOutputRegex(CommandGate),
    HumanApproval,
    EvidenceKeysPresent(EvidenceKeys),
    FileContains(FileText),
    FileNotContains(FileText),
    /// Unrecognized tag, kept verbatim so it round-trips.
    Unknown {
        tag: String,
        parameters: Map<String, Value>,
    },
    /// Recognized tag whose parameters failed to decode.
    Invalid {
        tag: String,
        parameters: Map<String, Value>,
        error: String,
    },
}

impl GateKind {
    pub fn tag(&self) -> &str {
        match self {
            GateKind::TestsPassed(_) => "tests_passed",
            GateKind::LintPassed(_) => "lint_passed",
            GateKind::CriteriaChecklistComplete => "criteria_checklist_complete",
            GateKind::FileExists(_) => "file_exists",
            GateKind::FileNotExists(_) => "file_not_exists",
            GateKind::ChangedFilesAllowlist(_) => "changed_files_allowlist",
            GateKind::ForbidPaths(_) => "forbid_paths",
            GateKind::ChangedFilesMinimum(_) => "changed_files_minimum",
            GateKind::DiffMaxLines(_) => "diff_max_lines",
            GateKind::DiffMinLines(_) => "diff_min_lines",
            GateKind::CommandExit0(_) => "command_exit_0",
            GateKind::CommandOutputContains(_) => "command_output_contains",
            GateKind::CommandOutputRegex(_) => "command_output_regex",
            GateKind::HumanApproval => "human_approval",
            GateKind::EvidenceKeysPresent(_) => "evidence_keys_present",
            GateKind::FileContains(_) => "file_contains",
            GateKind::FileNotContains(_) => "file_not_contains",
            GateKind::Unknown { tag, .. } | GateKind::Invalid { tag, .. } => tag,
        }
    }

    fn from_parts(tag: &str, parameters: Map<String, Value>) -> Self {
        fn decode<T: DeserializeOwned>(
            tag: &str,
            parameters: &Map<String, Value>,
            wrap: fn(T) -> GateKind,
        ) -> GateKind {
            match serde_json::from_value::<T>(Value::Object(parameters.clone())) {
                Ok(params) => wrap(params),
                Err(err) => GateKind::Invalid {
                    tag: tag.to_string(),
                    parameters: parameters.clone(),
                    error: err.to_string(),
                },
            }
        }

        match tag {
            "tests_passed" => decode(tag, &parameters, GateKind::TestsPassed),
            "lint_passed" => decode(tag, &parameters, GateKind::LintPassed),
            "criteria_checklist_complete" => GateKind::CriteriaChecklistComplete,
            "file_exists" => decode(tag, &parameters, GateKind::FileExists),
            "file_not_exists" => decode(tag, &parameters, GateKind::FileNotExists),
            "changed_files_allowlist" => decode(tag, &parameters, GateKind::ChangedFilesAllowlist),
            "forbid_paths" => decode(tag, &parameters, GateKind::ForbidPaths),
            "changed_files_minimum" => decode(tag, &parameters, GateKind::ChangedFilesMinimum),
            "diff_max_lines" => decode(tag, &parameters, GateKind::DiffMaxLines),
            "diff_min_lines" => decode(tag, &parameters, GateKind::DiffMinLines),
            "command_exit_0" => decode(tag, &parameters, GateKind::CommandExit0),
            "command_output_contains" => decode(tag, &parameters, GateKind::CommandOutputContains),
            "command_output_regex" => decode(tag, &parameters, GateKind::CommandOutputRegex),
            "human_approval" => GateKind::HumanApproval,
            "evidence_keys_present" => decode(tag, &parameters, GateKind::EvidenceKeysPresent),
            "file_contains" => decode(tag, &parameters, GateKind::FileContains),
            "file_not_contains" => decode(tag, &parameters, GateKind::FileNotContains),
            _ => GateKind::Unknown {
                tag: tag.to_string(),
                parameters,
            },
        }
    }

    fn parameters(&self) -> Map<String, Value> {
        fn encode<T: Serialize>(params: &T) -> Map<String, Value> {
            match serde_json::to_value(params) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            }
        }

        match self {
            GateKind::TestsPassed(p) | GateKind::LintPassed(p) => encode(p),
            GateKind::CriteriaChecklistComplete | GateKind::HumanApproval => Map::new(),
            GateKind::FileExists(p) | GateKind::FileNotExists(p) => encode(p),
            GateKind::ChangedFilesAllowlist(p) => encode(p),
            GateKind::ForbidPaths(p) => encode(p),
            GateKind::ChangedFilesMinimum(p) => encode(p),
            GateKind::DiffMaxLines(p) => encode(p),
            GateKind::DiffMinLines(p) => encode(p),
            GateKind::CommandExit0(p)
            | GateKind::CommandOutputContains(p)
            | GateKind::CommandOutputRegex(p) => encode(p),
            GateKind::EvidenceKeysPresent(p) => encode(p),
            GateKind::FileContains(p) | GateKind::FileNotContains(p) => encode(p),
            GateKind::Unknown { parameters, .. } | GateKind::Invalid { parameters, .. } => {
                parameters.clone()
            }
        }
    }
}

/// A declarative gate attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGateSpec", into = "RawGateSpec")]
pub struct GateSpec {
    pub kind: GateKind,
    pub description: String,
}

impl GateSpec {
    pub fn new(kind: GateKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn gate_type(&self) -> &str {
        self.kind.tag()
    }

    pub fn is_human_approval(&self) -> bool {
        matches!(self.kind, GateKind::HumanApproval)
    }

    pub fn is_command(&self) -> bool {
        matches!(
            self.kind,
            GateKind::CommandExit0(_)
                | GateKind::CommandOutputContains(_)
                | GateKind::CommandOutputRegex(_)
        )
    }
}

/// Wire shape of a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawGateSpec {
    #[serde(rename = "type")]
    gate_type: String,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    parameters: Map<String, Value>,
    #[serde(default)]
    description: String,
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<RawGateSpec> for GateSpec {
    fn from(raw: RawGateSpec) -> Self {
        let tag = raw.gate_type.trim().to_ascii_lowercase();
        Self {
            kind: GateKind::from_parts(&tag, raw.parameters),
            description: raw.description,
        }
    }
}

impl From<GateSpec> for RawGateSpec {
    fn from(spec: GateSpec) -> Self {
        Self {
            gate_type: spec.kind.tag().to_string(),
            parameters: spec.kind.parameters(),
            description: spec.description,
        }
    }
}

/// Outcome of evaluating one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub gate_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_truncated"
    )]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl GateResult {
    pub fn pass(gate: &GateSpec) -> Self {
        Self {
            passed: true,
            gate_type: gate.gate_type().to_string(),
            description: gate.description.clone(),
            details: None,
            output: None,
            exit_code: None,
        }
    }

    pub fn fail(gate: &GateSpec, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: Some(details.into()),
            ..Self::pass(gate)
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Human-readable rejection reason for a failed gate.
    pub fn reason(&self) -> String {
        match &self.details {
            Some(details) => format!("Gate failed ({}): {}", self.gate_type, details),
            None => format!("Gate failed ({})", self.gate_type),
        }
    }
}

/// Cap `text` at [`MAX_GATE_OUTPUT_CHARS`] characters.
pub fn truncate_output(text: &str) -> &str {
    match text.char_indices().nth(MAX_GATE_OUTPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn serialize_truncated<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(text) => s.serialize_some(truncate_output(text)),
        None => s.serialize_none(),
    }
}
