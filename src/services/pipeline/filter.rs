//! Filter grammar -> `$match` translation.
//!
//! `{"col": v}` is equality; `{"col": {"$op": v}}` is a comparison/set/range
//! operator; anything else is a `FilterGrammarError`.

use bson::{doc, Bson, Document};
use serde_json::Value as Json;

use super::error::PipelineError;

const SUPPORTED_OPS: &[&str] =
    &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$between", "$regex"];

/// Translate a filter grammar JSON object into a bson filter document.
/// `temporal_columns` names columns whose scalar filter values should be
/// coerced to the store's native datetime type.
pub fn build_filter(
    filters: &Json,
    temporal_columns: &[String],
) -> Result<Document, PipelineError> {
    let obj = match filters {
        Json::Null => return Ok(Document::new()),
        Json::Object(map) if map.is_empty() => return Ok(Document::new()),
        Json::Object(map) => map,
        other => {
            return Err(PipelineError::FilterGrammarError(format!(
                "filter must be a JSON object, got {other}"
            )))
        },
    };

    let mut doc = Document::new();
    for (column, value) in obj {
        let is_temporal = temporal_columns.iter().any(|c| c == column);
        let clause = build_clause(column, value, is_temporal)?;
        doc.insert(column.clone(), clause);
    }
    Ok(doc)
}

fn build_clause(column: &str, value: &Json, is_temporal: bool) -> Result<Bson, PipelineError> {
    match value {
        Json::Object(ops) => {
            let mut clause = Document::new();
            for (op, operand) in ops {
                if op == "$options" {
                    continue;
                }
                if !SUPPORTED_OPS.contains(&op.as_str()) {
                    return Err(PipelineError::FilterGrammarError(format!(
                        "unknown operator '{op}' on column '{column}'"
                    )));
                }
                match op.as_str() {
                    "$between" => {
                        let bounds = operand.as_array().ok_or_else(|| {
                            PipelineError::FilterGrammarError(format!(
                                "$between on '{column}' requires a [lo, hi] array"
                            ))
                        })?;
                        if bounds.len() != 2 {
                            return Err(PipelineError::FilterGrammarError(format!(
                                "$between on '{column}' requires exactly two bounds"
                            )));
                        }
                        clause.insert("$gte", scalar_to_bson(&bounds[0], is_temporal)?);
                        clause.insert("$lte", scalar_to_bson(&bounds[1], is_temporal)?);
                    },
                    "$in" | "$nin" => {
                        let arr = operand.as_array().ok_or_else(|| {
                            PipelineError::FilterGrammarError(format!(
                                "{op} on '{column}' requires an array"
                            ))
                        })?;
                        let values: Result<Vec<Bson>, PipelineError> =
                            arr.iter().map(|v| scalar_to_bson(v, is_temporal)).collect();
                        clause.insert(op.as_str(), Bson::Array(values?));
                    },
                    "$regex" => {
                        let pattern = operand.as_str().ok_or_else(|| {
                            PipelineError::FilterGrammarError(format!(
                                "$regex on '{column}' requires a string pattern"
                            ))
                        })?;
                        clause.insert("$regex", pattern);
                        if let Some(options) = ops.get("$options").and_then(Json::as_str) {
                            clause.insert("$options", options);
                        }
                    },
                    _ => {
                        clause.insert(op.as_str(), scalar_to_bson(operand, is_temporal)?);
                    },
                }
            }
            Ok(Bson::Document(clause))
        },
        scalar => scalar_to_bson(scalar, is_temporal),
    }
}

fn scalar_to_bson(value: &Json, is_temporal: bool) -> Result<Bson, PipelineError> {
    match value {
        Json::Null => Ok(Bson::Null),
        Json::Bool(b) => Ok(Bson::Boolean(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Bson::Int64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Bson::Double(f))
            } else {
                Err(PipelineError::FilterGrammarError(format!("unsupported number {n}")))
            }
        },
        Json::String(s) => {
            if is_temporal {
                let parsed = chrono::DateTime::parse_from_rfc3339(s).map_err(|_| {
                    PipelineError::FilterGrammarError(format!(
                        "expected ISO-8601 date, got '{s}'"
                    ))
                })?;
                Ok(Bson::DateTime(bson::DateTime::from_chrono(
                    parsed.with_timezone(&chrono::Utc),
                )))
            } else {
                Ok(Bson::String(s.clone()))
            }
        },
        other => Err(PipelineError::FilterGrammarError(format!(
            "unsupported filter value {other}"
        ))),
    }
}

/// The fixed tenant prelude: every pipeline's first stage.
pub fn tenant_prelude(user_id: &str, file_id: &str, table_name: &str) -> Document {
    doc! {
        "$match": {
            "user_id": user_id,
            "file_id": file_id,
            "table_name": table_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_shorthand() {
        let filters = serde_json::json!({"Product": "Assembly-Z"});
        let doc = build_filter(&filters, &[]).unwrap();
        assert_eq!(doc.get_str("Product").unwrap(), "Assembly-Z");
    }

    #[test]
    fn comparison_operator() {
        let filters = serde_json::json!({"Failed_Qty": {"$gt": 100}});
        let doc = build_filter(&filters, &[]).unwrap();
        let inner = doc.get_document("Failed_Qty").unwrap();
        assert_eq!(inner.get_i64("$gt").unwrap(), 100);
    }

    #[test]
    fn unknown_operator_is_grammar_error() {
        let filters = serde_json::json!({"x": {"$bogus": 1}});
        let err = build_filter(&filters, &[]).unwrap_err();
        assert!(matches!(err, PipelineError::FilterGrammarError(_)));
    }

    #[test]
    fn between_produces_inclusive_range() {
        let filters = serde_json::json!({"Qty": {"$between": [1, 10]}});
        let doc = build_filter(&filters, &[]).unwrap();
        let inner = doc.get_document("Qty").unwrap();
        assert_eq!(inner.get_i64("$gte").unwrap(), 1);
        assert_eq!(inner.get_i64("$lte").unwrap(), 10);
    }

    #[test]
    fn tenant_prelude_always_matches_three_keys() {
        let prelude = tenant_prelude("u1", "f1", "production");
        let m = prelude.get_document("$match").unwrap();
        assert_eq!(m.get_str("user_id").unwrap(), "u1");
        assert_eq!(m.get_str("file_id").unwrap(), "f1");
        assert_eq!(m.get_str("table_name").unwrap(), "production");
    }
}
