//! Tool Surface error taxonomy.
//!
//! Every variant here is a tool-execution-class failure: it never
//! terminates the agent loop, it becomes an `Observation` string the LLM
//! reads and (ideally) self-corrects from.

use crate::services::pipeline::PipelineError;
use crate::services::store::StoreError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("malformed arguments for {tool}: {reason}")]
    ArgumentError { tool: String, reason: String },

    #[error("unknown file or table: {0}")]
    UnknownFileOrTable(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} is not a temporal column")]
    NotTemporal(String),

    #[error("n must be > 0")]
    InvalidRank,
}

impl ToolError {
    /// Renders as the JSON `Observation` string the agent loop reads back,
    /// matching the Pipeline Builder's own error-to-observation shape.
    pub fn to_observation(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }

    /// Whether this failure terminates the request (resource/authorization
    /// class) rather than becoming an observation the agent can retry past.
    pub fn is_fatal(&self) -> bool {
        match self {
            ToolError::Store(_) => true,
            ToolError::Pipeline(e) => e.is_fatal(),
            _ => false,
        }
    }
}
