//! Agent Orchestrator (C5) — the ReAct loop that turns a natural-language
//! question into tool calls, a date-range handshake, or a Final Answer.

mod chart;
mod datehandshake;
mod error;
mod parser;
mod prompt;
mod react;

pub use error::OrchestratorError;
pub use react::{
    CancellationToken, Orchestrator, OrchestratorConfig, QueryOutcome, ScratchpadEntry,
};
