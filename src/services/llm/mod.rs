//! LLM client module.
//!
//! Thin OpenAI-compatible chat-completions client used by the agent
//! orchestrator (free-text ReAct turns) and the semantic column resolver
//! (forced JSON-object completions). Provider selection (primary/fallback)
//! is config-driven, not a managed database record.

mod client;
mod error;
mod provider;

pub use client::LLMClient;
pub use error::LLMError;
pub use provider::{ProviderConfig, ProviderSet};
