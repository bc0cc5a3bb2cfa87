//! Tabular Analytics Agent — library root.
//!
//! This crate contains the core modules: the Numeric Kernel, Pipeline
//! Builder, Semantic Column Resolver, Tool Surface, and Agent Orchestrator,
//! plus the ambient stack (config, db, HTTP transport) wired around them.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, QueryOutcome};
pub use services::resolver::ResolverCache;
pub use services::store::DocumentStore;
pub use services::tools::FileCatalog;
pub use utils::JwtUtil;

/// Application shared state. Per-request state (the `ToolContext` scoped to
/// the authenticated tenant, and the `Orchestrator` that borrows from it) is
/// assembled inside each handler from these shared pools, the way the
/// reference service's services are constructed once here and cloned
/// cheaply per request via `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,

    pub store: Arc<dyn DocumentStore>,
    pub files: Arc<dyn FileCatalog>,

    pub llm: services::llm::LLMClient,
    pub providers: services::llm::ProviderSet,
    pub resolver_cache: Arc<ResolverCache>,

    pub orchestrator_config: OrchestratorConfig,
    pub audit_retention_days: i64,

    pub jwt_util: Arc<JwtUtil>,
}

impl AppState {
    /// Builds the `Orchestrator` for one request, scoped to `user_id`.
    pub fn orchestrator(&self, user_id: &str) -> Orchestrator {
        Orchestrator {
            llm: self.llm.clone(),
            providers: self.providers.clone(),
            tool_ctx: services::tools::ToolContext {
                user_id: user_id.to_string(),
                store: Arc::clone(&self.store),
                files: Arc::clone(&self.files),
            },
            resolver_cache: Arc::clone(&self.resolver_cache),
            config: self.orchestrator_config.clone(),
        }
    }
}
