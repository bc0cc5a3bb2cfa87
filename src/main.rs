use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabular_agent::config::Config;
use tabular_agent::db;
use tabular_agent::services::store::mongo::MongoStore;
use tabular_agent::services::tools::SqlFileCatalog;
use tabular_agent::services::AuditRetentionTask;
use tabular_agent::utils::{JwtUtil, ScheduledExecutor};
use tabular_agent::{handlers, middleware, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("tabular-agent.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Tabular Analytics Agent starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool_with_size(&config.database.url, config.store.pool_size).await?;
    tracing::info!("Relational pool created successfully");

    let store = Arc::new(
        MongoStore::connect(&config.store.mongo_uri, &config.store.mongo_database, config.store.pool_size)
            .await?,
    );
    tracing::info!("Document store connected: {}", config.store.mongo_database);

    let files = Arc::new(SqlFileCatalog::new(pool.clone()));
    let jwt_util =
        Arc::new(JwtUtil::new(&config.auth.jwt_secret, config.auth.jwt_expires_in_seconds()));
    let providers = config.provider_set()?;
    let llm = tabular_agent::services::llm::LLMClient::new();
    let resolver_cache = Arc::new(tabular_agent::services::resolver::ResolverCache::new(
        Duration::from_secs(config.agent.resolver_ttl_seconds),
    ));

    let app_state = AppState {
        db: pool.clone(),
        store,
        files,
        llm,
        providers,
        resolver_cache,
        orchestrator_config: (&config.agent).into(),
        audit_retention_days: config.audit.retention_days,
        jwt_util: Arc::clone(&jwt_util),
    };

    let audit_task = AuditRetentionTask::new(pool.clone(), config.audit.retention_days);
    let audit_executor = ScheduledExecutor::new("audit-retention", Duration::from_secs(24 * 3600));
    tokio::spawn(async move {
        audit_executor.start(audit_task).await;
    });
    tracing::info!("Audit retention task started (interval: 24h, retention: {}d)", config.audit.retention_days);

    let auth_state = middleware::AuthState { jwt_util: Arc::clone(&jwt_util) };

    let agent_routes = Router::new()
        .route("/api/agent/query", post(handlers::agent_query))
        .route("/api/agent/suggestions", get(handlers::agent_suggestions))
        .route("/api/agent/audit/:request_id", get(handlers::agent_audit))
        .route("/api/tools/probe", get(handlers::tools_probe))
        .with_state(app_state)
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(agent_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Tabular Analytics Agent is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
