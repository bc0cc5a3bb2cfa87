//! Agent Orchestrator error taxonomy — the semantic/resource/authorization
//! classes that terminate a request rather than becoming an observation
//! the loop can read and retry past (that split lives in `ToolError`).

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no provider available after retry and fallback")]
    ProviderUnavailableError,

    #[error("repeated identical action and input three times in a row")]
    LoopDetectedError,

    #[error("iteration cap ({0}) exceeded with no final answer")]
    IterationCapExceeded(u32),

    #[error("request exceeded the wall-clock cap of {0}s")]
    WallClockExceeded(u64),

    #[error("model output was unparseable for {0} consecutive turns")]
    UnparseableOutputError(u32),

    #[error("tenant mismatch or missing user context")]
    AuthorizationError,

    #[error("conversation already has a pending date-range clarification")]
    PendingHandshakeConflict,

    #[error("ambiguous date range after {0} clarification attempts")]
    AmbiguousDateRange(u32),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] crate::services::store::StoreError),

    #[error(transparent)]
    Llm(#[from] crate::services::llm::LLMError),
}

impl OrchestratorError {
    /// Error-taxonomy category (spec §7), used only for audit tagging —
    /// every variant here already terminates the request.
    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::ProviderUnavailableError
            | OrchestratorError::Store(_)
            | OrchestratorError::Llm(_) => "resource",
            OrchestratorError::LoopDetectedError
            | OrchestratorError::IterationCapExceeded(_)
            | OrchestratorError::UnparseableOutputError(_) => "semantic",
            OrchestratorError::AuthorizationError => "authorization",
            OrchestratorError::PendingHandshakeConflict
            | OrchestratorError::AmbiguousDateRange(_) => "user_input",
            OrchestratorError::WallClockExceeded(_) | OrchestratorError::Cancelled => "resource",
        }
    }
}
