//! Schema inference over sample documents — the Tool Surface's view of
//! "what columns does this table have" (there is no separate DDL; the
//! schema is derived from the stored rows themselves).

use bson::{Bson, Document};

const METADATA_FIELDS: &[&str] = &["_id", "user_id", "file_id", "table_name", "row_id"];

#[derive(Debug, Clone, serde::Serialize)]
pub struct ColumnInfo {
    pub column: String,
    pub inferred_type: String,
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "boolean",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => "number",
        Bson::String(_) => "string",
        Bson::DateTime(_) => "date",
        _ => "other",
    }
}

/// Column names present in `rows`, excluding storage metadata fields, in
/// first-seen order.
pub fn column_names(rows: &[Document]) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !METADATA_FIELDS.contains(&key.as_str()) && !seen.contains(key) {
                seen.push(key.clone());
            }
        }
    }
    seen
}

/// For each column, the type of the first non-null value observed.
pub fn infer_schema(rows: &[Document]) -> Vec<ColumnInfo> {
    column_names(rows)
        .into_iter()
        .map(|column| {
            let inferred_type = rows
                .iter()
                .filter_map(|r| r.get(&column))
                .find(|v| !matches!(v, Bson::Null))
                .map(bson_type_name)
                .unwrap_or("null")
                .to_string();
            ColumnInfo { column, inferred_type }
        })
        .collect()
}

/// Columns whose sampled values are all dates (or ISO-8601-parseable
/// strings) — the Pipeline Builder's `temporal_columns` input.
pub fn temporal_columns(rows: &[Document]) -> Vec<String> {
    column_names(rows)
        .into_iter()
        .filter(|col| {
            rows.iter().filter_map(|r| r.get(col)).any(|v| match v {
                Bson::DateTime(_) => true,
                Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
                _ => false,
            })
        })
        .collect()
}
