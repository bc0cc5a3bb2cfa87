//! Semantic Column Resolver — maps free-form column intent to concrete
//! column names via a JSON-object LLM call, with a deterministic keyword
//! fallback and an in-process TTL cache.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::services::llm::{LLMClient, LLMError, ProviderConfig};

use super::cache::ResolverCache;
use super::lexicon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Llm,
    KeywordFallback,
    UserDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    pub source_column: String,
    pub extraction_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnResolution {
    pub roles: HashMap<String, Option<String>>,
    pub extraction: Option<ExtractionSpec>,
    pub source: ResolutionSource,
}

const MAX_TOKENS: u32 = 256;

/// Resolves `roles` (caller-chosen role names, e.g. "actual", "target") to
/// concrete columns in `columns`, given one `sample_row` and the `purpose`
/// phrase describing what the caller needs the columns for.
///
/// `user_overrides` carries any role already pinned by the file's
/// `user_definitions` — those roles are returned verbatim (validated
/// against the column list) without consulting the LLM or the keyword
/// fallback, since an explicit user definition always wins.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_columns(
    client: &LLMClient,
    provider: &ProviderConfig,
    cache: &ResolverCache,
    purpose: &str,
    roles: &[String],
    columns: &[String],
    sample_row: &serde_json::Value,
    user_overrides: &HashMap<String, String>,
) -> ColumnResolution {
    if let Some(cached) = cache.get(purpose, columns, sample_row) {
        return apply_user_overrides(cached, roles, columns, user_overrides);
    }

    let resolved = match call_llm(client, provider, purpose, roles, columns, sample_row).await {
        Ok(resolution) => resolution,
        Err(_) => keyword_fallback(roles, columns),
    };

    cache.put(purpose, columns, sample_row, resolved.clone());
    apply_user_overrides(resolved, roles, columns, user_overrides)
}

fn apply_user_overrides(
    mut resolution: ColumnResolution,
    roles: &[String],
    columns: &[String],
    user_overrides: &HashMap<String, String>,
) -> ColumnResolution {
    let mut overrode_any = false;
    for role in roles {
        if let Some(col) = user_overrides.get(role) {
            if columns.iter().any(|c| c == col) {
                resolution.roles.insert(role.clone(), Some(col.clone()));
                overrode_any = true;
            }
        }
    }
    if overrode_any {
        resolution.source = ResolutionSource::UserDefinition;
    }
    resolution
}

async fn call_llm(
    client: &LLMClient,
    provider: &ProviderConfig,
    purpose: &str,
    roles: &[String],
    columns: &[String],
    sample_row: &serde_json::Value,
) -> Result<ColumnResolution, LLMError> {
    let system_prompt = "You map free-form column intent to concrete column names in a \
        tabular dataset. Reply with exactly one JSON object mapping each requested role \
        name to a column name from the provided list, or null if none fits. If the purpose \
        mentions extracting a value from a composite column, also include \
        \"source_column\" and \"extraction_pattern\" (a regex with exactly one capture \
        group). Reply with JSON only, no prose.";

    let user_prompt = serde_json::json!({
        "purpose": purpose,
        "roles": roles,
        "available_columns": columns,
        "sample_row": sample_row,
    })
    .to_string();

    let content = client.complete_json(provider, system_prompt, &user_prompt, MAX_TOKENS).await?;
    parse_reply(&content, roles, columns)
        .map_err(|e| LLMError::ParseError(e))
}

/// Strips a fenced code block (```json ... ``` or ``` ... ```) if present,
/// then parses and validates the JSON reply.
fn parse_reply(raw: &str, roles: &[String], columns: &[String]) -> Result<ColumnResolution, String> {
    let stripped = strip_code_fence(raw);

    let value: serde_json::Value =
        serde_json::from_str(&stripped).map_err(|e| format!("invalid JSON reply: {e}"))?;
    let obj = value.as_object().ok_or_else(|| "reply is not a JSON object".to_string())?;

    let mut resolved_roles = HashMap::new();
    for role in roles {
        match obj.get(role) {
            None | Some(serde_json::Value::Null) => {
                resolved_roles.insert(role.clone(), None);
            },
            Some(serde_json::Value::String(col)) => {
                if !columns.iter().any(|c| c == col) {
                    return Err(format!("reply named unknown column '{col}' for role '{role}'"));
                }
                resolved_roles.insert(role.clone(), Some(col.clone()));
            },
            Some(other) => return Err(format!("role '{role}' must be a string or null, got {other}")),
        }
    }

    let extraction = match (obj.get("source_column"), obj.get("extraction_pattern")) {
        (Some(serde_json::Value::String(source_column)), Some(serde_json::Value::String(pattern))) => {
            if !columns.iter().any(|c| c == source_column) {
                return Err(format!("extraction source_column '{source_column}' is not a known column"));
            }
            validate_extraction_pattern(pattern)?;
            Some(ExtractionSpec {
                source_column: source_column.clone(),
                extraction_pattern: pattern.clone(),
            })
        },
        (None, None) => None,
        _ => return Err("extraction fields must both be present or both absent".to_string()),
    };

    Ok(ColumnResolution { roles: resolved_roles, extraction, source: ResolutionSource::Llm })
}

fn validate_extraction_pattern(pattern: &str) -> Result<(), String> {
    let re = Regex::new(pattern).map_err(|e| format!("extraction pattern does not compile: {e}"))?;
    if re.captures_len() != 2 {
        return Err(format!(
            "extraction pattern '{pattern}' must have exactly one capture group, has {}",
            re.captures_len().saturating_sub(1)
        ));
    }
    Ok(())
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

fn keyword_fallback(roles: &[String], columns: &[String]) -> ColumnResolution {
    let resolved_roles = roles
        .iter()
        .map(|role| (role.clone(), lexicon::resolve_role(role, columns)))
        .collect();
    ColumnResolution { roles: resolved_roles, extraction: None, source: ResolutionSource::KeywordFallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json_block() {
        let raw = "```json\n{\"actual\": \"Actual_Qty\"}\n```";
        assert_eq!(strip_code_fence(raw), "{\"actual\": \"Actual_Qty\"}");
    }

    #[test]
    fn strips_bare_fence_without_language_tag() {
        let raw = "```\n{\"a\": null}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\": null}");
    }

    #[test]
    fn parses_valid_reply_with_null_role() {
        let roles = vec!["actual".to_string(), "target".to_string()];
        let columns = vec!["Actual_Qty".to_string(), "Target_Qty".to_string()];
        let raw = r#"{"actual": "Actual_Qty", "target": null}"#;
        let resolution = parse_reply(raw, &roles, &columns).unwrap();
        assert_eq!(resolution.roles.get("actual").unwrap(), &Some("Actual_Qty".to_string()));
        assert_eq!(resolution.roles.get("target").unwrap(), &None);
    }

    #[test]
    fn rejects_reply_naming_unknown_column() {
        let roles = vec!["actual".to_string()];
        let columns = vec!["Actual_Qty".to_string()];
        let raw = r#"{"actual": "Not_A_Real_Column"}"#;
        assert!(parse_reply(raw, &roles, &columns).is_err());
    }

    #[test]
    fn rejects_extraction_pattern_with_two_capture_groups() {
        assert!(validate_extraction_pattern(r"(\w+)-(\d+)").is_err());
    }

    #[test]
    fn accepts_extraction_pattern_with_one_capture_group() {
        assert!(validate_extraction_pattern(r"Line-(\d+)").is_ok());
    }

    #[test]
    fn keyword_fallback_never_errors_on_unmatched_role() {
        let roles = vec!["totally_unmatched_role".to_string()];
        let columns = vec!["Product".to_string()];
        let resolution = keyword_fallback(&roles, &columns);
        assert_eq!(resolution.roles.get("totally_unmatched_role").unwrap(), &None);
        assert_eq!(resolution.source, ResolutionSource::KeywordFallback);
    }

    #[test]
    fn user_override_wins_and_marks_source() {
        let mut resolution = keyword_fallback(
            &["actual".to_string()],
            &["Actual_Qty".to_string(), "Override_Col".to_string()],
        );
        resolution.roles.insert("actual".to_string(), None);
        let mut overrides = HashMap::new();
        overrides.insert("actual".to_string(), "Override_Col".to_string());
        let result = apply_user_overrides(
            resolution,
            &["actual".to_string()],
            &["Actual_Qty".to_string(), "Override_Col".to_string()],
            &overrides,
        );
        assert_eq!(result.roles.get("actual").unwrap(), &Some("Override_Col".to_string()));
        assert_eq!(result.source, ResolutionSource::UserDefinition);
    }
}
