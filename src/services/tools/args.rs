//! Pipe-delimited argument parsing — the calling convention small models
//! emit more reliably than nested JSON.

use serde::de::DeserializeOwned;

use super::error::ToolError;

/// Splits `args` on `|` into exactly `fields` positional slots. Trailing
/// empty fields are permitted (the spec calls them "default"); a call with
/// fewer than `fields` pipe-separated slots is padded with empty strings
/// rather than rejected, since trailing optional args are routinely
/// omitted by the model.
pub fn split_args(tool: &str, args: &str, fields: usize) -> Result<Vec<String>, ToolError> {
    let mut parts: Vec<String> = args.split('|').map(|s| s.to_string()).collect();
    if parts.len() > fields {
        return Err(ToolError::ArgumentError {
            tool: tool.to_string(),
            reason: format!("expected at most {fields} pipe-delimited fields, got {}", parts.len()),
        });
    }
    parts.resize(fields, String::new());
    Ok(parts)
}

/// Parses a JSON field, treating an empty string as the type's default
/// (`{}`/`[]`/`null`, depending on what `T` deserializes from `"null"`).
pub fn parse_json_field<T: DeserializeOwned + Default>(
    tool: &str,
    field_name: &str,
    raw: &str,
) -> Result<T, ToolError> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|e| ToolError::ArgumentError {
        tool: tool.to_string(),
        reason: format!("invalid JSON in '{field_name}': {e}"),
    })
}

pub fn parse_i64_field(tool: &str, field_name: &str, raw: &str, default: i64) -> Result<i64, ToolError> {
    if raw.trim().is_empty() {
        return Ok(default);
    }
    raw.trim().parse::<i64>().map_err(|e| ToolError::ArgumentError {
        tool: tool.to_string(),
        reason: format!("invalid integer in '{field_name}': {e}"),
    })
}

pub fn require_nonempty(tool: &str, field_name: &str, raw: &str) -> Result<String, ToolError> {
    if raw.trim().is_empty() {
        return Err(ToolError::ArgumentError {
            tool: tool.to_string(),
            reason: format!("'{field_name}' is required"),
        });
    }
    Ok(raw.trim().to_string())
}

pub fn optional(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.trim().to_string())
    }
}
