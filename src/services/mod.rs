pub mod audit_retention_task;
pub mod kernel;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod tools;

pub use audit_retention_task::AuditRetentionTask;
pub use llm::{LLMClient, LLMError};
pub use orchestrator::{
    CancellationToken, Orchestrator, OrchestratorConfig, OrchestratorError, QueryOutcome,
};
