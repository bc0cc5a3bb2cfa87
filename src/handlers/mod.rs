//! HTTP handlers — the thin axum layer over the Agent Orchestrator, the
//! Tool Surface registry, and the relational audit/conversation tables.

pub mod agent;

pub use agent::{agent_audit, agent_query, agent_suggestions, tools_probe};
