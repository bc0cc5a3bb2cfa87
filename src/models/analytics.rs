//! Core data model: File, TableRow, Conversation, AuditRecord.
//!
//! These are the four entities from the data model. `File`, `Conversation`
//! and `AuditRecord` are relational rows (sqlx/SQLite); `TableRow` lives in
//! the document store and is represented here only as the in-memory scalar
//! shape the rest of the crate operates on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::services::kernel;

// ============================================================================
// Scalar — the value type stored in every TableRow column
// ============================================================================

/// A single cell value. Mirrors the scalar set the spec allows in a
/// `TableRow.row`: null, bool, number, string, or an ISO-8601 date.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Decimal),
    Str(String),
    Date(DateTime<Utc>),
}

impl Scalar {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Scalar::Number(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }

    /// Render as a JSON value, encoding decimals losslessly per the Numeric
    /// Kernel's JSON encoding rule (number when representable, else string).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Number(d) => kernel::json::decimal_to_json(*d),
            Scalar::Str(s) => serde_json::Value::String(s.clone()),
            Scalar::Date(dt) => serde_json::Value::String(dt.to_rfc3339()),
        }
    }

    pub fn from_bson(value: &bson::Bson) -> Scalar {
        match value {
            bson::Bson::Null => Scalar::Null,
            bson::Bson::Boolean(b) => Scalar::Bool(*b),
            bson::Bson::Int32(i) => Scalar::Number(Decimal::from(*i)),
            bson::Bson::Int64(i) => Scalar::Number(Decimal::from(*i)),
            bson::Bson::Double(f) => Scalar::Number(
                f.to_string().parse::<Decimal>().unwrap_or(Decimal::ZERO),
            ),
            bson::Bson::Decimal128(d) => {
                d.to_string()
                    .parse::<Decimal>()
                    .map(Scalar::Number)
                    .unwrap_or(Scalar::Null)
            },
            bson::Bson::String(s) => Scalar::Str(s.clone()),
            bson::Bson::DateTime(dt) => {
                Scalar::Date(DateTime::<Utc>::from(dt.to_chrono()))
            },
            _ => Scalar::Null,
        }
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Xlsx,
    Xls,
    Csv,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Xlsx => "xlsx",
            FileType::Xls => "xls",
            FileType::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub user_id: String,
    pub original_filename: String,
    pub file_type: String,
    /// JSON-encoded `Vec<String>` of sheet/table names.
    pub sheet_names_json: String,
    pub row_count: i64,
    /// JSON-encoded `HashMap<String, String>` keyed `"<sheet>::<col>"`.
    pub user_definitions_json: String,
    pub created_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn sheet_names(&self) -> Vec<String> {
        serde_json::from_str(&self.sheet_names_json).unwrap_or_default()
    }

    pub fn user_definitions(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.user_definitions_json).unwrap_or_default()
    }

    /// Look up a user-supplied column definition for `table::column`, the
    /// precedence winner over any resolver/keyword-fallback suggestion.
    pub fn user_definition_for(&self, table: &str, column: &str) -> Option<String> {
        self.user_definitions().get(&format!("{table}::{column}")).cloned()
    }
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub conversation_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The single pending tool-call slot a conversation may hold while the
/// orchestrator waits on a date-range handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDateRange {
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
    pub time_column: String,
    pub tool_name: String,
    pub tool_args: String,
    #[serde(default)]
    pub clarification_attempts: u32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub user_id: String,
    pub file_id: Option<String>,
    pub original_question: String,
    /// JSON-encoded `Option<PendingDateRange>`.
    pub pending_date_range_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn pending_date_range(&self) -> Option<PendingDateRange> {
        self.pending_date_range_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

// ============================================================================
// AuditRecord
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Completed,
    Stopped,
    Error,
    ClarificationNeeded,
}

impl FinalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalState::Completed => "completed",
            FinalState::Stopped => "stopped",
            FinalState::Error => "error",
            FinalState::ClarificationNeeded => "clarification_needed",
        }
    }
}

/// One tool invocation plus the pipeline(s) it produced, kept so an
/// AuditRecord's numeric answer can be reproduced by re-execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolInvocation {
    pub name: String,
    pub args: String,
    pub observation_summary: String,
    pub pipelines: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Provenance {
    pub matched_row_count: i64,
    pub tool_calls: Vec<ToolInvocation>,
}

impl Provenance {
    pub fn pipelines(&self) -> Vec<&serde_json::Value> {
        self.tool_calls.iter().flat_map(|t| t.pipelines.iter()).collect()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub user_id: String,
    pub question: String,
    pub provider: String,
    pub model: String,
    /// JSON-encoded `Vec<String>`.
    pub tools_called_json: String,
    pub latency_ms: i64,
    /// JSON-encoded `Provenance`.
    pub provenance_json: String,
    pub answer_short: String,
    pub answer_detailed: String,
    pub chart_config_json: Option<String>,
    pub final_state: String,
    pub created_at: DateTime<Utc>,
}
