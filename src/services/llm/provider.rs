//! Provider configuration and primary/fallback selection.
//!
//! Distinct from the `LLMProvider` database row in `models.rs` (a managed,
//! CRUD-able provider record); `ProviderConfig` is the lightweight,
//! config-file-sourced shape the agent orchestrator and column resolver
//! actually call through.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Primary/fallback pair the orchestrator retries across on transient
/// failure (HTTP 5xx, rate-limit, timeout): once more on `primary`, then
/// once on `fallback`.
#[derive(Debug, Clone)]
pub struct ProviderSet {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
}

impl ProviderSet {
    pub fn new(primary: ProviderConfig, fallback: Option<ProviderConfig>) -> Self {
        Self { primary, fallback }
    }
}
