//! Embedded JSON Schemas and the shared validation helper.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

pub const SESSION_V1: &str = include_str!("../../../schemas/session/v1.schema.json");
pub const ACTION_V1: &str = include_str!("../../../schemas/completion/action.v1.schema.json");
pub const DECOMPOSITION_V1: &str =
    include_str!("../../../schemas/completion/decomposition.v1.schema.json");

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema_text: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_text).context("parse json schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
