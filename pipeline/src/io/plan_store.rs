//! Plan load/save helpers with JSON Schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::TaskSpec;

/// Embedded schema for `.pipeline/state/plan.json` (Draft 2020-12).
pub const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));

/// The task list driving one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<TaskSpec>,
}

/// Load and schema-validate the plan from disk.
///
/// Semantic checks (providers, acyclicity) belong to the graph builder and
/// run after this structural pass.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read plan {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    validate_schema(&value)?;
    let plan: Plan = serde_json::from_value(value)
        .with_context(|| format!("deserialize plan {}", path.display()))?;
    Ok(plan)
}

/// Write the plan to disk with canonical formatting.
pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(plan)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write plan {}", path.display()))
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
