use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::services::llm::ProviderConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub agent: AgentConfig,
    pub store: StoreConfig,
    pub audit: AuditConfig,
    /// Named provider configs (`[providers.primary]`, `[providers.fallback]`
    /// in `config.toml`); `agent.provider_primary`/`provider_fallback` name
    /// which entry each role uses.
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expires_in: String,
}

impl AuthConfig {
    /// Parses `jwt_expires_in` (`"24h"`, `"30m"`, `"3600s"`, `"7d"`) into
    /// seconds for `JwtUtil::new`. Falls back to 24h on anything unparseable
    /// rather than failing startup over a cosmetic config typo.
    pub fn jwt_expires_in_seconds(&self) -> i64 {
        let s = self.jwt_expires_in.trim();
        let (digits, unit) = s.split_at(s.len() - s.chars().last().map_or(0, |c| c.len_utf8()));
        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => return digits.parse().unwrap_or(86_400),
        };
        digits.trim().parse::<i64>().map(|n| n * multiplier).unwrap_or(86_400)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Agent Orchestrator (C5) tuning knobs — `spec.md` §6's `AGENT_*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub wallclock_seconds: u64,
    pub tool_timeout_seconds: u64,
    pub llm_timeout_seconds: u64,
    pub large_dataset_rows: i64,
    pub large_dataset_days: i64,
    pub tool_max_raw_rows: u32,
    pub resolver_ttl_seconds: u64,
    pub provider_primary: String,
    pub provider_fallback: Option<String>,
    pub provider_rate_limit_rpm: u32,
}

/// Document store connection — `spec.md` §6's `STORE_*` keys, plus the
/// connection string/database name the MongoDB driver itself needs (not
/// enumerated in `spec.md`, since it treats the store as an abstract
/// interface; added here the same way the reference service's
/// `DatabaseConfig.url` supplies the one concrete connection detail sqlx
/// needs).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub pool_size: u32,
    pub mongo_uri: String,
    pub mongo_database: String,
}

/// Audit trail retention — `spec.md` §6's `AUDIT_*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: i64,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "tabular-agent")]
#[command(version, about = "Tabular Analytics Agent")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// JWT secret key (overrides config file)
    #[arg(long, value_name = "SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT expiration time (overrides config file, e.g., "24h")
    #[arg(long, value_name = "DURATION")]
    pub jwt_expires_in: Option<String>,

    /// Logging level (overrides config file, e.g., "info,tabular_agent=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Agent iteration cap (overrides config file, max 25)
    #[arg(long, value_name = "N")]
    pub agent_max_iterations: Option<u32>,

    /// Agent per-request wall-clock cap in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub agent_wallclock_seconds: Option<u64>,

    /// Primary LLM provider name (overrides config file)
    #[arg(long, value_name = "NAME")]
    pub agent_provider_primary: Option<String>,

    /// Fallback LLM provider name (overrides config file)
    #[arg(long, value_name = "NAME")]
    pub agent_provider_fallback: Option<String>,

    /// Document store pool size (overrides config file)
    #[arg(long, value_name = "N")]
    pub store_pool_size: Option<u32>,

    /// Audit record retention in days (overrides config file)
    #[arg(long, value_name = "DAYS")]
    pub audit_retention_days: Option<i64>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (`APP_*` / `AGENT_*` / `STORE_*` / `AUDIT_*`)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST, APP_SERVER_PORT, APP_DATABASE_URL, APP_JWT_SECRET,
    ///   APP_JWT_EXPIRES_IN, APP_LOG_LEVEL
    /// - AGENT_MAX_ITERATIONS, AGENT_WALLCLOCK_SECONDS, AGENT_TOOL_TIMEOUT_SECONDS,
    ///   AGENT_LLM_TIMEOUT_SECONDS, AGENT_LARGE_DATASET_ROWS, AGENT_LARGE_DATASET_DAYS,
    ///   AGENT_TOOL_MAX_RAW_ROWS, AGENT_RESOLVER_TTL_SECONDS, AGENT_PROVIDER_PRIMARY,
    ///   AGENT_PROVIDER_FALLBACK, AGENT_PROVIDER_RATE_LIMIT_RPM
    /// - STORE_POOL_SIZE
    /// - AUDIT_RETENTION_DAYS
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
        }
        if let Ok(secret) = std::env::var("APP_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(expires) = std::env::var("APP_JWT_EXPIRES_IN") {
            self.auth.jwt_expires_in = expires;
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(v) = std::env::var("AGENT_MAX_ITERATIONS")
            && let Ok(v) = v.parse()
        {
            self.agent.max_iterations = v;
        }
        if let Ok(v) = std::env::var("AGENT_WALLCLOCK_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.agent.wallclock_seconds = v;
        }
        if let Ok(v) = std::env::var("AGENT_TOOL_TIMEOUT_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.agent.tool_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("AGENT_LLM_TIMEOUT_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.agent.llm_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("AGENT_LARGE_DATASET_ROWS")
            && let Ok(v) = v.parse()
        {
            self.agent.large_dataset_rows = v;
        }
        if let Ok(v) = std::env::var("AGENT_LARGE_DATASET_DAYS")
            && let Ok(v) = v.parse()
        {
            self.agent.large_dataset_days = v;
        }
        if let Ok(v) = std::env::var("AGENT_TOOL_MAX_RAW_ROWS")
            && let Ok(v) = v.parse()
        {
            self.agent.tool_max_raw_rows = v;
        }
        if let Ok(v) = std::env::var("AGENT_RESOLVER_TTL_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.agent.resolver_ttl_seconds = v;
        }
        if let Ok(v) = std::env::var("AGENT_PROVIDER_PRIMARY") {
            self.agent.provider_primary = v;
        }
        if let Ok(v) = std::env::var("AGENT_PROVIDER_FALLBACK") {
            self.agent.provider_fallback = Some(v);
        }
        if let Ok(v) = std::env::var("AGENT_PROVIDER_RATE_LIMIT_RPM")
            && let Ok(v) = v.parse()
        {
            self.agent.provider_rate_limit_rpm = v;
        }
        if let Ok(v) = std::env::var("STORE_POOL_SIZE")
            && let Ok(v) = v.parse()
        {
            self.store.pool_size = v;
        }
        if let Ok(v) = std::env::var("STORE_MONGO_URI") {
            self.store.mongo_uri = v;
        }
        if let Ok(v) = std::env::var("STORE_MONGO_DATABASE") {
            self.store.mongo_database = v;
        }
        if let Ok(v) = std::env::var("AUDIT_RETENTION_DAYS")
            && let Ok(v) = v.parse()
        {
            self.audit.retention_days = v;
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
        }
        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
        }
        if let Some(secret) = &args.jwt_secret {
            self.auth.jwt_secret = secret.clone();
        }
        if let Some(expires) = &args.jwt_expires_in {
            self.auth.jwt_expires_in = expires.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(v) = args.agent_max_iterations {
            self.agent.max_iterations = v;
        }
        if let Some(v) = args.agent_wallclock_seconds {
            self.agent.wallclock_seconds = v;
        }
        if let Some(v) = &args.agent_provider_primary {
            self.agent.provider_primary = v.clone();
        }
        if let Some(v) = &args.agent_provider_fallback {
            self.agent.provider_fallback = Some(v.clone());
        }
        if let Some(v) = args.store_pool_size {
            self.store.pool_size = v;
        }
        if let Some(v) = args.audit_retention_days {
            self.audit.retention_days = v;
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.jwt_secret == "dev-secret-key-change-in-production" {
            tracing::warn!("Using default JWT secret — set APP_JWT_SECRET in production");
        }
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.agent.max_iterations == 0 || self.agent.max_iterations > 25 {
            anyhow::bail!("agent.max_iterations must be between 1 and 25");
        }
        if self.agent.wallclock_seconds == 0 {
            anyhow::bail!("agent.wallclock_seconds must be > 0");
        }
        if self.agent.provider_primary.is_empty() {
            anyhow::bail!("agent.provider_primary cannot be empty");
        }
        if !self.providers.contains_key(&self.agent.provider_primary) {
            anyhow::bail!(
                "agent.provider_primary '{}' has no matching [providers.*] entry",
                self.agent.provider_primary
            );
        }
        if self.store.pool_size == 0 {
            anyhow::bail!("store.pool_size must be > 0");
        }
        if self.audit.retention_days <= 0 {
            anyhow::bail!("audit.retention_days must be > 0");
        }
        Ok(())
    }

    /// Resolves `agent.provider_primary`/`provider_fallback` against the
    /// named `[providers.*]` table into the orchestrator's runtime
    /// `ProviderSet`.
    pub fn provider_set(&self) -> Result<crate::services::llm::ProviderSet, anyhow::Error> {
        let primary = self
            .providers
            .get(&self.agent.provider_primary)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("no [providers.{}] entry configured", self.agent.provider_primary)
            })?;
        let fallback = self
            .agent
            .provider_fallback
            .as_ref()
            .and_then(|name| self.providers.get(name).cloned());
        Ok(crate::services::llm::ProviderSet::new(primary, fallback))
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];
        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://tmp/tabular-agent.db".to_string() }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-key-change-in-production".to_string(),
            jwt_expires_in: "24h".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tabular_agent=debug".to_string(),
            file: Some("logs/tabular-agent.log".to_string()),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            wallclock_seconds: 180,
            tool_timeout_seconds: 30,
            llm_timeout_seconds: 60,
            large_dataset_rows: 10_000,
            large_dataset_days: 90,
            tool_max_raw_rows: 500,
            resolver_ttl_seconds: 600,
            provider_primary: "primary".to_string(),
            provider_fallback: None,
            provider_rate_limit_rpm: 15,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 32,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "tabular_agent".to_string(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}
