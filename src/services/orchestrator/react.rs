//! The ReAct loop itself: render prompt, call the LLM, parse the step,
//! dispatch to the Tool Surface, repeat until a Final Answer or a stop
//! condition fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as Json;

use chrono::{DateTime, Utc};

use crate::models::{Conversation, FinalState, PendingDateRange, Provenance, ToolInvocation};
use crate::services::llm::{LLMClient, ProviderSet};
use crate::services::resolver::{self, ResolverCache};
use crate::services::tools::{self, ToolContext, ToolError};

use super::chart;
use super::datehandshake;
use super::error::OrchestratorError;
use super::parser::{self, ParsedStep};
use super::prompt;

/// The observed range for a time-bounded tool call whose window was left
/// unbounded, surfaced to the caller as a clarification prompt.
struct HandshakeInfo {
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
    time_column: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub hard_max_iterations: u32,
    pub wallclock_seconds: u64,
    pub llm_max_tokens: u32,
    pub large_dataset_rows: i64,
    pub large_dataset_days: i64,
    pub max_clarification_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            hard_max_iterations: 25,
            wallclock_seconds: 180,
            llm_max_tokens: 1024,
            large_dataset_rows: 10_000,
            large_dataset_days: 90,
            max_clarification_attempts: 2,
        }
    }
}

impl From<&crate::config::AgentConfig> for OrchestratorConfig {
    /// `hard_max_iterations` (25) and `max_clarification_attempts` (2) are
    /// fixed invariants per `spec.md`, not configurable knobs — only
    /// `max_iterations` itself is env/CLI-tunable, clamped to 25 at
    /// `Config::validate()`.
    fn from(agent: &crate::config::AgentConfig) -> Self {
        Self {
            max_iterations: agent.max_iterations,
            hard_max_iterations: 25,
            wallclock_seconds: agent.wallclock_seconds,
            llm_max_tokens: 1024,
            large_dataset_rows: agent.large_dataset_rows,
            large_dataset_days: agent.large_dataset_days,
            max_clarification_attempts: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag checked at every tool/LLM boundary.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scratchpad & outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScratchpadEntry {
    pub thought: String,
    pub action: String,
    pub action_input: String,
    pub observation: String,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub answer_short: String,
    pub answer_detailed: String,
    pub chart_config: Option<Json>,
    pub provenance: Provenance,
    pub tools_called: Vec<String>,
    pub final_state: FinalState,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    pub llm: LLMClient,
    pub providers: ProviderSet,
    pub tool_ctx: ToolContext,
    pub resolver_cache: Arc<ResolverCache>,
    pub config: OrchestratorConfig,
}

impl Orchestrator {
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, OrchestratorError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.wallclock_seconds);
        let mut scratchpad: Vec<ScratchpadEntry> = Vec::new();
        let mut tools_called: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolInvocation> = Vec::new();

        if let Some(pending) = conversation.pending_date_range() {
            match self.resume_pending(conversation, &pending, question, &mut scratchpad, &mut tools_called, &mut tool_calls).await? {
                Some(outcome) => return Ok(outcome),
                None => {},
            }
        }

        let transcript = format!("User: {question}");
        let mut unparseable_streak = 0u32;
        let mut repeated_action: Option<(String, String)> = None;
        let mut repeated_count = 0u32;
        let mut fatal_repeat: Option<(String, String)> = None;
        let mut fatal_repeat_count = 0u32;

        for iteration in 0..self.config.hard_max_iterations {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::WallClockExceeded(self.config.wallclock_seconds));
            }

            let system_prompt = prompt::render_system_prompt(&transcript, &scratchpad);
            let completion = self.call_llm(&system_prompt, question).await?;

            let step = match parser::parse_step(&completion) {
                Some(step) => {
                    unparseable_streak = 0;
                    step
                },
                None => {
                    unparseable_streak += 1;
                    if unparseable_streak >= 3 {
                        return Err(OrchestratorError::UnparseableOutputError(unparseable_streak));
                    }
                    scratchpad.push(ScratchpadEntry {
                        thought: String::new(),
                        action: String::new(),
                        action_input: String::new(),
                        observation: "parse error: expected Action/Action Input or Final Answer".to_string(),
                    });
                    continue;
                },
            };

            match step {
                ParsedStep::FinalAnswer { answer, .. } => {
                    return Ok(self.finish(answer, tool_calls, FinalState::Completed));
                },
                ParsedStep::Action { thought, action, action_input } => {
                    if cancel.is_cancelled() {
                        return Err(OrchestratorError::Cancelled);
                    }

                    match &repeated_action {
                        Some((a, i)) if *a == action && *i == action_input => {
                            repeated_count += 1;
                            if repeated_count >= 2 {
                                return Err(OrchestratorError::LoopDetectedError);
                            }
                        },
                        _ => {
                            repeated_action = Some((action.clone(), action_input.clone()));
                            repeated_count = 0;
                        },
                    }

                    if action == "resolve_columns" {
                        let observation = self.handle_resolve_columns(&action_input).await.to_string();
                        scratchpad.push(ScratchpadEntry {
                            thought,
                            action,
                            action_input,
                            observation,
                        });
                        continue;
                    }

                    if let Some(handshake) = self.check_handshake(&action, &action_input).await? {
                        let pending = datehandshake::build_pending(
                            handshake.min_date,
                            handshake.max_date,
                            &handshake.time_column,
                            &action,
                            &action_input,
                        );
                        persist_pending(conversation, &pending);
                        return Ok(QueryOutcome {
                            answer_short: format!(
                                "This dataset spans {} to {} — which range should I use?",
                                pending.min_date.format("%Y-%m-%d"),
                                pending.max_date.format("%Y-%m-%d")
                            ),
                            answer_detailed: format!(
                                "The requested time window is unbounded and the dataset spans {} to {}. \
                                Please specify a range (e.g. \"last 30 days\" or \"2026-01-01 to 2026-02-01\").",
                                pending.min_date.format("%Y-%m-%d"),
                                pending.max_date.format("%Y-%m-%d")
                            ),
                            chart_config: None,
                            provenance: Provenance { matched_row_count: 0, tool_calls },
                            tools_called,
                            final_state: FinalState::ClarificationNeeded,
                        });
                    }

                    tools_called.push(action.clone());
                    let result = tools::dispatch(&self.tool_ctx, &action, &action_input).await;

                    let observation = match &result {
                        Ok((value, _)) => {
                            fatal_repeat = None;
                            fatal_repeat_count = 0;
                            value.to_string()
                        },
                        Err(err) => {
                            if err.is_fatal() {
                                match &fatal_repeat {
                                    Some((a, i)) if *a == action && *i == action_input => {
                                        fatal_repeat_count += 1;
                                        if fatal_repeat_count >= 2 {
                                            return Err(match err {
                                                ToolError::Store(e) => OrchestratorError::Store(e.clone()),
                                                other => OrchestratorError::Store(
                                                    crate::services::store::StoreError::Transport(
                                                        other.to_string(),
                                                    ),
                                                ),
                                            });
                                        }
                                    },
                                    _ => {
                                        fatal_repeat = Some((action.clone(), action_input.clone()));
                                        fatal_repeat_count = 0;
                                    },
                                }
                            }
                            err.to_observation().to_string()
                        },
                    };

                    tool_calls.push(ToolInvocation {
                        name: action.clone(),
                        args: action_input.clone(),
                        observation_summary: truncate_summary(&observation),
                        pipelines: pipelines_to_json(&result),
                    });

                    scratchpad.push(ScratchpadEntry { thought, action, action_input, observation });

                    if iteration + 1 >= self.config.max_iterations {
                        let best_effort = scratchpad
                            .last()
                            .map(|e| e.observation.clone())
                            .unwrap_or_else(|| "no observation available".to_string());
                        return Ok(self.finish(
                            format!("Reached the iteration limit; last observation: {best_effort}"),
                            tool_calls,
                            FinalState::Stopped,
                        ));
                    }
                },
            }
        }

        let best_effort = scratchpad.last().map(|e| e.observation.clone()).unwrap_or_default();
        Ok(self.finish(
            format!("Reached the iteration limit; last observation: {best_effort}"),
            tool_calls,
            FinalState::Stopped,
        ))
    }

    /// Resumes a pending date-range handshake, if `question` parses as a
    /// range; returns `Ok(None)` when it doesn't (caller continues as a
    /// fresh question under the same clarification budget).
    async fn resume_pending(
        &self,
        conversation: &mut Conversation,
        pending: &PendingDateRange,
        question: &str,
        scratchpad: &mut Vec<ScratchpadEntry>,
        tools_called: &mut Vec<String>,
        tool_calls: &mut Vec<ToolInvocation>,
    ) -> Result<Option<QueryOutcome>, OrchestratorError> {
        match datehandshake::parse_date_range(question, pending.max_date) {
            Some(range) => {
                conversation.pending_date_range_json = None;
                let injected = datehandshake::inject_range(pending, &range)
                    .unwrap_or_else(|| pending.tool_args.clone());
                tools_called.push(pending.tool_name.clone());
                let result = tools::dispatch(&self.tool_ctx, &pending.tool_name, &injected).await;
                let observation = match &result {
                    Ok((v, _)) => v.to_string(),
                    Err(e) => e.to_observation().to_string(),
                };
                tool_calls.push(ToolInvocation {
                    name: pending.tool_name.clone(),
                    args: injected.clone(),
                    observation_summary: truncate_summary(&observation),
                    pipelines: pipelines_to_json(&result),
                });
                scratchpad.push(ScratchpadEntry {
                    thought: "Resuming with the clarified date range.".to_string(),
                    action: pending.tool_name.clone(),
                    action_input: injected,
                    observation,
                });
                Ok(None)
            },
            None => {
                let attempts = pending.clarification_attempts + 1;
                if attempts > self.config.max_clarification_attempts {
                    conversation.pending_date_range_json = None;
                    return Err(OrchestratorError::AmbiguousDateRange(attempts));
                }
                let mut retried = pending.clone();
                retried.clarification_attempts = attempts;
                persist_pending(conversation, &retried);
                Ok(Some(QueryOutcome {
                    answer_short: "I couldn't parse that as a date range — could you rephrase it?".to_string(),
                    answer_detailed: format!(
                        "The dataset spans {} to {}. Try a phrase like \"last 30 days\" or \"2026-01-01 to 2026-02-01\".",
                        pending.min_date.format("%Y-%m-%d"),
                        pending.max_date.format("%Y-%m-%d")
                    ),
                    chart_config: None,
                    provenance: Provenance::default(),
                    tools_called: Vec::new(),
                    final_state: FinalState::ClarificationNeeded,
                }))
            },
        }
    }

    /// Calls `get_date_range` ahead of a time-bounded tool call whose
    /// start/end are both empty, and returns the observed range when it
    /// exceeds the handshake threshold. Only `timeseries_analyzer` carries
    /// an explicit start/end pair in its signature.
    async fn check_handshake(
        &self,
        action: &str,
        action_input: &str,
    ) -> Result<Option<HandshakeInfo>, OrchestratorError> {
        if action != "timeseries_analyzer" {
            return Ok(None);
        }
        let parts: Vec<&str> = action_input.split('|').collect();
        if parts.len() < 8 || !parts[6].trim().is_empty() || !parts[7].trim().is_empty() {
            return Ok(None);
        }
        let (file_id, table, time_col) = (parts[0], parts[1], parts[2]);
        let args = format!("{file_id}|{table}|{time_col}");
        let observation = match tools::dispatch(&self.tool_ctx, "get_date_range", &args).await {
            Ok((v, _)) => v,
            Err(_) => return Ok(None),
        };
        let min_date = observation.get("min_date").and_then(|v| v.as_str()).and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&chrono::Utc))
        });
        let max_date = observation.get("max_date").and_then(|v| v.as_str()).and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&chrono::Utc))
        });
        let row_count = observation.get("row_count").and_then(|v| v.as_i64()).unwrap_or(0);
        match (min_date, max_date) {
            (Some(min_date), Some(max_date)) => {
                if datehandshake::exceeds_threshold(
                    min_date,
                    max_date,
                    row_count,
                    self.config.large_dataset_days,
                    self.config.large_dataset_rows,
                ) {
                    Ok(Some(HandshakeInfo { min_date, max_date, time_column: time_col.to_string() }))
                } else {
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }

    /// Resolves free-form column intent via C3 for an `Action:
    /// resolve_columns` step. Never errors outward — resolution failures
    /// are surfaced as an `Observation` the agent can read, matching the
    /// keyword-fallback guarantee `resolve_columns` itself offers.
    async fn handle_resolve_columns(&self, args: &str) -> Json {
        let parts: Vec<&str> = args.splitn(4, '|').collect();
        if parts.len() < 4 {
            return serde_json::json!({
                "error": "resolve_columns requires purpose|roles_json|file_id|table"
            });
        }
        let (purpose, roles_json, file_id, table) = (parts[0], parts[1], parts[2], parts[3]);
        let roles: Vec<String> = match serde_json::from_str(roles_json) {
            Ok(r) => r,
            Err(e) => return serde_json::json!({ "error": format!("invalid roles_json: {e}") }),
        };

        let (columns, sample_row) = match tools::sample_for_resolver(&self.tool_ctx, file_id, table).await {
            Ok(v) => v,
            Err(e) => return e.to_observation(),
        };

        let overrides = self.user_overrides(file_id, table, &roles).await;

        let resolution = resolver::resolve_columns(
            &self.llm,
            &self.providers.primary,
            &self.resolver_cache,
            purpose,
            &roles,
            &columns,
            &sample_row,
            &overrides,
        )
        .await;

        serde_json::to_value(&resolution).unwrap_or(Json::Null)
    }

    /// Inverts a file's `user_definitions` (keyed `table::column` →
    /// role) into the `role → column` map `resolve_columns` needs, scoped
    /// to the roles actually requested this call.
    async fn user_overrides(
        &self,
        file_id: &str,
        table: &str,
        roles: &[String],
    ) -> std::collections::HashMap<String, String> {
        let file = match self.tool_ctx.files.get_file(&self.tool_ctx.user_id, file_id).await {
            Ok(Some(f)) => f,
            _ => return std::collections::HashMap::new(),
        };
        let prefix = format!("{table}::");
        file.user_definitions()
            .into_iter()
            .filter_map(|(key, role)| {
                key.strip_prefix(&prefix)
                    .filter(|_| roles.iter().any(|r| r == &role))
                    .map(|column| (role, column.to_string()))
            })
            .collect()
    }

    async fn call_llm(&self, system_prompt: &str, user_prompt: &str) -> Result<String, OrchestratorError> {
        match self
            .llm
            .complete_text(&self.providers.primary, system_prompt, user_prompt, self.config.llm_max_tokens)
            .await
        {
            Ok(text) => return Ok(text),
            Err(e) if !e.is_retryable() => return Err(OrchestratorError::Llm(e)),
            Err(_) => {},
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        match self
            .llm
            .complete_text(&self.providers.primary, system_prompt, user_prompt, self.config.llm_max_tokens)
            .await
        {
            Ok(text) => return Ok(text),
            Err(e) if !e.is_retryable() => return Err(OrchestratorError::Llm(e)),
            Err(_) => {},
        }

        if let Some(fallback) = &self.providers.fallback {
            if let Ok(text) = self
                .llm
                .complete_text(fallback, system_prompt, user_prompt, self.config.llm_max_tokens)
                .await
            {
                return Ok(text);
            }
        }

        Err(OrchestratorError::ProviderUnavailableError)
    }

    fn finish(&self, answer: String, tool_calls: Vec<ToolInvocation>, final_state: FinalState) -> QueryOutcome {
        let (chart_config, answer_detailed) = chart::extract_chart(&answer);
        let answer_short = answer
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or(&answer)
            .trim()
            .to_string();
        let tools_called = tool_calls.iter().map(|t| t.name.clone()).collect();
        let matched_row_count = tool_calls
            .iter()
            .filter_map(|t| serde_json::from_str::<Json>(&t.observation_summary).ok())
            .filter_map(|v| v.get("row_count").and_then(|r| r.as_i64()))
            .last()
            .unwrap_or(0);
        QueryOutcome {
            answer_short,
            answer_detailed: if answer_detailed.is_empty() { answer.trim().to_string() } else { answer_detailed },
            chart_config,
            provenance: Provenance { matched_row_count, tool_calls },
            tools_called,
            final_state,
        }
    }
}

fn persist_pending(conversation: &mut Conversation, pending: &PendingDateRange) {
    conversation.pending_date_range_json = serde_json::to_string(pending).ok();
}

fn truncate_summary(observation: &str) -> String {
    const MAX_LEN: usize = 2000;
    if observation.len() <= MAX_LEN {
        observation.to_string()
    } else {
        format!("{}…", &observation[..MAX_LEN])
    }
}

/// Renders the stages a dispatched tool call actually ran as JSON for
/// `ToolInvocation.pipelines`, so `AuditRecord.provenance` carries the
/// re-executable pipeline behind every numeric result. Empty on a failed
/// call — nothing was executed to attribute the observation to.
fn pipelines_to_json(result: &Result<(Json, Vec<bson::Document>), ToolError>) -> Vec<Json> {
    match result {
        Ok((_, stages)) => {
            stages.iter().map(|stage| serde_json::to_value(stage).unwrap_or(Json::Null)).collect()
        },
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::models::UploadedFile;
    use crate::services::llm::ProviderConfig;
    use crate::services::store::memory::MemoryStore;
    use crate::services::tools::FileCatalog;

    struct EmptyCatalog;

    #[async_trait]
    impl FileCatalog for EmptyCatalog {
        async fn list_files(&self, _user_id: &str) -> Result<Vec<UploadedFile>, ToolError> {
            Ok(Vec::new())
        }

        async fn get_file(
            &self,
            _user_id: &str,
            _file_id: &str,
        ) -> Result<Option<UploadedFile>, ToolError> {
            Ok(None)
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let rows: Vec<bson::Document> = vec![bson::doc! {
            "user_id": "u1", "file_id": "f1", "table_name": "production", "row_id": 0,
            "Product": "Widget-A", "Actual_Qty": 100,
        }];
        store.insert_many(tools::ROWS_COLLECTION, rows);
        Arc::new(store)
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator {
            llm: LLMClient::new(),
            providers: ProviderSet::new(
                ProviderConfig {
                    name: "primary".into(),
                    api_base: "http://localhost:0".into(),
                    api_key: "test".into(),
                    model: "test-model".into(),
                    timeout_seconds: 1,
                },
                None,
            ),
            tool_ctx: ToolContext {
                user_id: "u1".to_string(),
                store: seeded_store(),
                files: Arc::new(EmptyCatalog),
            },
            resolver_cache: Arc::new(ResolverCache::with_default_ttl()),
            config: OrchestratorConfig::default(),
        }
    }

    #[test]
    fn finish_extracts_answer_short_as_first_nonempty_line() {
        let orch = orchestrator();
        let outcome = orch.finish(
            "\nThe total is 237525.\nDetails follow.".to_string(),
            Vec::new(),
            FinalState::Completed,
        );
        assert_eq!(outcome.answer_short, "The total is 237525.");
    }

    #[test]
    fn finish_extracts_chart_config_when_present() {
        let orch = orchestrator();
        let outcome = orch.finish(
            "```json\n{\"type\":\"line\",\"data\":{}}\n```".to_string(),
            Vec::new(),
            FinalState::Completed,
        );
        assert!(outcome.chart_config.is_some());
    }

    #[tokio::test]
    async fn dispatched_tool_calls_carry_their_pipeline_in_provenance() {
        let orch = orchestrator();
        let (_, stages) = tools::dispatch(
            &orch.tool_ctx,
            "agg_helper",
            r#"f1|production|{}|[{"op":"sum","field":"Actual_Qty","alias":"total"}]"#,
        )
        .await
        .unwrap();
        let pipelines = pipelines_to_json(&Ok((Json::Null, stages)));
        assert!(pipelines.iter().any(|s| s.get("$match").is_some()));
        assert!(pipelines.iter().any(|s| s.get("$group").is_some()));
    }

    #[tokio::test]
    async fn failed_dispatch_yields_no_pipelines() {
        let err: Result<(Json, Vec<bson::Document>), ToolError> =
            Err(ToolError::UnknownTool("nope".into()));
        assert!(pipelines_to_json(&err).is_empty());
    }

    #[tokio::test]
    async fn check_handshake_ignores_non_timeseries_actions() {
        let orch = orchestrator();
        let result = orch.check_handshake("agg_helper", "f1|production|{}|[]").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn check_handshake_ignores_already_bounded_calls() {
        let orch = orchestrator();
        let result = orch
            .check_handshake(
                "timeseries_analyzer",
                "f1|production|Date|Actual_Qty|month|sum|2026-01-01T00:00:00Z|2026-02-01T00:00:00Z",
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
