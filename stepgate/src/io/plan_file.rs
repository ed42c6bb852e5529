//! Plan file loading with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::Deserialize;
use serde_json::Value;

use crate::core::plan::StepSpec;

pub const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/plan.schema.json"
));

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanDocument {
    Bare(Vec<StepSpec>),
    Wrapped { steps: Vec<StepSpec> },
}

/// Load and validate a plan file.
pub fn load_plan(path: &Path) -> Result<Vec<StepSpec>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    parse_plan(&contents).with_context(|| format!("load plan {}", path.display()))
}

/// Parse and validate plan JSON text.
pub fn parse_plan(contents: &str) -> Result<Vec<StepSpec>> {
    let value: Value = serde_json::from_str(contents).context("parse plan json")?;
    parse_plan_value(value)
}

pub fn parse_plan_value(value: Value) -> Result<Vec<StepSpec>> {
    validate_schema(&value)?;
    let document: PlanDocument = serde_json::from_value(value).context("deserialize plan")?;
    Ok(match document {
        PlanDocument::Bare(steps) | PlanDocument::Wrapped { steps } => steps,
    })
}

fn validate_schema(plan: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse embedded plan schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(plan) {
        let messages = compiled
            .iter_errors(plan)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "plan schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
