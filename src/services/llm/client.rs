//! LLM Client - HTTP client for OpenAI-compatible APIs
//!
//! Uses reqwest to call LLM APIs. Compatible with:
//! - OpenAI
//! - Azure OpenAI
//! - DeepSeek
//! - Other OpenAI-compatible APIs

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::LLMError;
use super::provider::ProviderConfig;

/// LLM HTTP Client
#[derive(Clone)]
pub struct LLMClient {
    http_client: Client,
}

impl Default for LLMClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LLMClient {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client }
    }

    /// Raw-text completion for the ReAct loop: no forced response format,
    /// the caller parses `Thought/Action/.../Final Answer` free text out of
    /// the returned string. Temperature 0 for determinism where supported.
    pub async fn complete_text(
        &self,
        provider: &ProviderConfig,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LLMError> {
        self.complete(provider, system_prompt, user_prompt, max_tokens, None).await
    }

    /// JSON-object completion for the semantic column resolver: forces
    /// `response_format: json_object`, reusing the reference provider's
    /// chat-completion request shape verbatim.
    pub async fn complete_json(
        &self,
        provider: &ProviderConfig,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LLMError> {
        self.complete(
            provider,
            system_prompt,
            user_prompt,
            max_tokens,
            Some(ResponseFormat { r#type: "json_object".to_string() }),
        )
        .await
    }

    async fn complete(
        &self,
        provider: &ProviderConfig,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        response_format: Option<ResponseFormat>,
    ) -> Result<String, LLMError> {
        let chat_request = ChatCompletionRequest {
            model: provider.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(max_tokens),
            temperature: Some(0.0),
            response_format,
        };

        let url = format!("{}/chat/completions", provider.api_base.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", provider.api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(provider.timeout_seconds))
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout(provider.timeout_seconds)
                } else {
                    LLMError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LLMError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse =
            response.json().await.map_err(|e| LLMError::ParseError(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LLMError::ParseError("Empty response from LLM".to_string()))
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[allow(dead_code)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[allow(dead_code)]
    prompt_tokens: i32,
    #[allow(dead_code)]
    completion_tokens: i32,
}
