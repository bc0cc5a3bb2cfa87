//! The four HTTP operations this crate exposes: `agent.query`,
//! `agent.suggestions`, `agent.audit`, `tools.probe`. Conversation turns and
//! audit records are persisted to the relational tables from `db.rs`; the
//! orchestrator itself only ever sees an in-memory `Conversation`.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::middleware::UserContext;
use crate::models::{AuditRecord, Conversation, FinalState, Provenance};
use crate::services::orchestrator::CancellationToken;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub provider: Option<String>,
    pub conversation_id: Option<String>,
    pub date_range: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub conversation_id: String,
    pub request_id: String,
    pub answer_short: String,
    pub answer_detailed: String,
    pub chart_config: Option<serde_json::Value>,
    pub provenance: Provenance,
    pub tools_called: Vec<String>,
    pub latency_ms: i64,
    pub final_state: String,
}

/// `agent.query` — the single entry point into the ReAct loop. Each call is
/// one conversation turn: loads or creates the `Conversation`, runs the
/// orchestrator, persists both chat messages and the audit record, and
/// returns the outcome.
pub async fn agent_query(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    if req.question.trim().is_empty() {
        return Err(ApiError::invalid_input("question must not be empty"));
    }

    let mut conversation = load_or_create_conversation(&state, &user.user_id, &req).await?;

    let effective_question = match &req.date_range {
        Some(range) if !range.trim().is_empty() => format!("{} {}", req.question, range),
        _ => req.question.clone(),
    };

    let mut orchestrator = state.orchestrator(&user.user_id);
    if let Some(name) = &req.provider {
        apply_provider_override(&mut orchestrator, name)?;
    }

    let started = Utc::now();
    let cancel = CancellationToken::new();
    let result = orchestrator.run(&mut conversation, &effective_question, &cancel).await;
    let latency_ms = (Utc::now() - started).num_milliseconds().max(0);

    persist_conversation_turn(&state, &conversation, &req.question).await?;

    let request_id = uuid::Uuid::new_v4().to_string();
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            let api_err: ApiError = err.clone().into();
            record_audit(
                &state,
                &request_id,
                &user.user_id,
                &req.question,
                &orchestrator.providers.primary.name,
                &orchestrator.providers.primary.model,
                &[],
                latency_ms,
                &Provenance::default(),
                "",
                &err.to_string(),
                None,
                FinalState::Error,
            )
            .await?;
            return Err(api_err);
        },
    };

    persist_conversation_messages(&state, &conversation, &req.question, &outcome.answer_detailed)
        .await?;

    record_audit(
        &state,
        &request_id,
        &user.user_id,
        &req.question,
        &orchestrator.providers.primary.name,
        &orchestrator.providers.primary.model,
        &outcome.tools_called,
        latency_ms,
        &outcome.provenance,
        &outcome.answer_short,
        &outcome.answer_detailed,
        outcome.chart_config.clone(),
        outcome.final_state,
    )
    .await?;

    Ok(Json(QueryResponse {
        conversation_id: conversation.conversation_id,
        request_id,
        answer_short: outcome.answer_short,
        answer_detailed: outcome.answer_detailed,
        chart_config: outcome.chart_config,
        provenance: outcome.provenance,
        tools_called: outcome.tools_called,
        latency_ms,
        final_state: outcome.final_state.as_str().to_string(),
    }))
}

/// `agent.suggestions` — dynamic example questions derived from the
/// tenant's uploaded files, falling back to generic examples when the
/// tenant has none yet.
pub async fn agent_suggestions(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
) -> ApiResult<Json<Vec<String>>> {
    let files = state.files.list_files(&user.user_id).await.map_err(|e| {
        ApiError::internal_error(format!("listing files for suggestions: {e}"))
    })?;

    if files.is_empty() {
        return Ok(Json(vec![
            "Upload a spreadsheet to get started.".to_string(),
            "What totals can you compute once I upload a file?".to_string(),
        ]));
    }

    let mut suggestions = Vec::new();
    for file in files.iter().take(5) {
        for table in file.sheet_names().iter().take(2) {
            suggestions.push(format!("What is the total in {table}?"));
            suggestions.push(format!("Rank the top 5 entries in {table}."));
        }
    }
    suggestions.truncate(10);
    Ok(Json(suggestions))
}

/// `agent.audit` — fetches one audit record by request id, scoped to the
/// caller's tenant so one user can never read another's audit trail.
pub async fn agent_audit(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<AuditRecord>> {
    let record: Option<AuditRecord> = sqlx::query_as(
        "SELECT * FROM audit_records WHERE request_id = ? AND user_id = ?",
    )
    .bind(&request_id)
    .bind(&user.user_id)
    .fetch_optional(&state.db)
    .await?;

    record.map(Json).ok_or_else(|| ApiError::not_found(format!("audit record {request_id} not found")))
}

#[derive(Debug, Serialize)]
pub struct ToolProbe {
    pub name: &'static str,
    pub signature: &'static str,
    pub example: &'static str,
}

/// `tools.probe` — the static tool registry, exposed verbatim so the UI and
/// the agent's own system prompt can never drift apart.
pub async fn tools_probe() -> Json<Vec<ToolProbe>> {
    let probes = crate::services::tools::TOOLS
        .iter()
        .map(|t| ToolProbe { name: t.name, signature: t.signature, example: t.example })
        .collect();
    Json(probes)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn apply_provider_override(
    orchestrator: &mut crate::services::orchestrator::Orchestrator,
    requested: &str,
) -> ApiResult<()> {
    if orchestrator.providers.primary.name == requested {
        return Ok(());
    }
    if let Some(fallback) = orchestrator.providers.fallback.clone() {
        if fallback.name == requested {
            let old_primary = orchestrator.providers.primary.clone();
            orchestrator.providers.primary = fallback;
            orchestrator.providers.fallback = Some(old_primary);
            return Ok(());
        }
    }
    Err(ApiError::invalid_input(format!("unknown provider '{requested}'")))
}

async fn load_or_create_conversation(
    state: &AppState,
    user_id: &str,
    req: &QueryRequest,
) -> ApiResult<Conversation> {
    if let Some(id) = &req.conversation_id {
        let existing: Option<Conversation> = sqlx::query_as(
            "SELECT * FROM conversations WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;
        if let Some(conversation) = existing {
            return Ok(conversation);
        }
        return Err(ApiError::not_found(format!("conversation {id} not found")));
    }

    let conversation = Conversation {
        conversation_id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        file_id: None,
        original_question: req.question.clone(),
        pending_date_range_json: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO conversations (conversation_id, user_id, file_id, original_question, \
         pending_date_range_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&conversation.conversation_id)
    .bind(&conversation.user_id)
    .bind(&conversation.file_id)
    .bind(&conversation.original_question)
    .bind(&conversation.pending_date_range_json)
    .bind(conversation.created_at)
    .bind(conversation.updated_at)
    .execute(&state.db)
    .await?;

    Ok(conversation)
}

/// Writes back the conversation's `pending_date_range_json`, mutated by
/// `Orchestrator::run` when it starts or resolves a date-range handshake.
async fn persist_conversation_turn(
    state: &AppState,
    conversation: &Conversation,
    _question: &str,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE conversations SET pending_date_range_json = ?, updated_at = ? WHERE conversation_id = ?",
    )
    .bind(&conversation.pending_date_range_json)
    .bind(Utc::now())
    .bind(&conversation.conversation_id)
    .execute(&state.db)
    .await?;
    Ok(())
}

async fn persist_conversation_messages(
    state: &AppState,
    conversation: &Conversation,
    question: &str,
    answer: &str,
) -> ApiResult<()> {
    let next_seq: (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM conversation_messages WHERE conversation_id = ?",
    )
    .bind(&conversation.conversation_id)
    .fetch_one(&state.db)
    .await?;

    sqlx::query(
        "INSERT INTO conversation_messages (conversation_id, seq, role, content) VALUES (?, ?, 'user', ?)",
    )
    .bind(&conversation.conversation_id)
    .bind(next_seq.0)
    .bind(question)
    .execute(&state.db)
    .await?;

    sqlx::query(
        "INSERT INTO conversation_messages (conversation_id, seq, role, content) VALUES (?, ?, 'assistant', ?)",
    )
    .bind(&conversation.conversation_id)
    .bind(next_seq.0 + 1)
    .bind(answer)
    .execute(&state.db)
    .await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn record_audit(
    state: &AppState,
    request_id: &str,
    user_id: &str,
    question: &str,
    provider: &str,
    model: &str,
    tools_called: &[String],
    latency_ms: i64,
    provenance: &Provenance,
    answer_short: &str,
    answer_detailed: &str,
    chart_config: Option<serde_json::Value>,
    final_state: FinalState,
) -> ApiResult<()> {
    let tools_called_json = serde_json::to_string(tools_called).unwrap_or_else(|_| "[]".to_string());
    let provenance_json = serde_json::to_string(provenance).unwrap_or_else(|_| "{}".to_string());
    let chart_config_json = chart_config.as_ref().and_then(|v| serde_json::to_string(v).ok());

    sqlx::query(
        "INSERT INTO audit_records (request_id, user_id, question, provider, model, \
         tools_called_json, latency_ms, provenance_json, answer_short, answer_detailed, \
         chart_config_json, final_state) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(request_id)
    .bind(user_id)
    .bind(question)
    .bind(provider)
    .bind(model)
    .bind(tools_called_json)
    .bind(latency_ms)
    .bind(provenance_json)
    .bind(answer_short)
    .bind(answer_detailed)
    .bind(chart_config_json)
    .bind(final_state.as_str())
    .execute(&state.db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::ProviderConfig;
    use crate::services::orchestrator::{Orchestrator, OrchestratorConfig};
    use crate::services::resolver::ResolverCache;
    use crate::services::store::memory::MemoryStore;
    use crate::services::tools::{FileCatalog, ToolContext};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EmptyCatalog;

    #[async_trait]
    impl FileCatalog for EmptyCatalog {
        async fn list_files(
            &self,
            _user_id: &str,
        ) -> Result<Vec<crate::models::UploadedFile>, crate::services::tools::ToolError> {
            Ok(Vec::new())
        }

        async fn get_file(
            &self,
            _user_id: &str,
            _file_id: &str,
        ) -> Result<Option<crate::models::UploadedFile>, crate::services::tools::ToolError> {
            Ok(None)
        }
    }

    fn orchestrator_with_providers(primary: &str, fallback: Option<&str>) -> Orchestrator {
        Orchestrator {
            llm: crate::services::llm::LLMClient::new(),
            providers: crate::services::llm::ProviderSet::new(
                ProviderConfig {
                    name: primary.to_string(),
                    api_base: "http://localhost:0".into(),
                    api_key: "k".into(),
                    model: "m".into(),
                    timeout_seconds: 1,
                },
                fallback.map(|name| ProviderConfig {
                    name: name.to_string(),
                    api_base: "http://localhost:0".into(),
                    api_key: "k".into(),
                    model: "m".into(),
                    timeout_seconds: 1,
                }),
            ),
            tool_ctx: ToolContext {
                user_id: "u1".to_string(),
                store: Arc::new(MemoryStore::new()),
                files: Arc::new(EmptyCatalog),
            },
            resolver_cache: Arc::new(ResolverCache::with_default_ttl()),
            config: OrchestratorConfig::default(),
        }
    }

    #[test]
    fn provider_override_accepts_fallback_name_and_swaps() {
        let mut orch = orchestrator_with_providers("openai", Some("anthropic"));
        apply_provider_override(&mut orch, "anthropic").unwrap();
        assert_eq!(orch.providers.primary.name, "anthropic");
        assert_eq!(orch.providers.fallback.unwrap().name, "openai");
    }

    #[test]
    fn provider_override_is_noop_for_current_primary() {
        let mut orch = orchestrator_with_providers("openai", None);
        apply_provider_override(&mut orch, "openai").unwrap();
        assert_eq!(orch.providers.primary.name, "openai");
    }

    #[test]
    fn provider_override_rejects_unknown_name() {
        let mut orch = orchestrator_with_providers("openai", Some("anthropic"));
        let err = apply_provider_override(&mut orch, "mistral");
        assert!(err.is_err());
    }
}
