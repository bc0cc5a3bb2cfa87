//! Pipeline Builder error taxonomy.

use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown column '{column}'; available columns: {available:?}")]
    UnknownColumn { column: String, available: Vec<String> },

    #[error("filter grammar error: {0}")]
    FilterGrammarError(String),

    #[error("derived column error: composite column '{composite_column}' did not match pattern '{pattern}'")]
    DerivedColumnError { composite_column: String, pattern: String },

    #[error("authorization error: {0}")]
    AuthorizationError(String),

    #[error("store unavailable after retries: {0}")]
    StoreUnavailableError(String),
}

impl PipelineError {
    pub fn unknown_column(column: impl Into<String>, available: &[String]) -> Self {
        Self::UnknownColumn { column: column.into(), available: available.to_vec() }
    }

    /// Renders as a JSON observation string for the ReAct loop, per the
    /// user-input/tool-execution error class.
    pub fn to_observation(&self) -> serde_json::Value {
        let mut map = HashMap::new();
        map.insert("error".to_string(), self.to_string());
        serde_json::json!(map)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthorizationError(_) | Self::StoreUnavailableError(_))
    }
}
