//! OpenAI-compatible chat completions backend (OpenAI, Azure, Ollama, vLLM, LM Studio).

use super::{ChatBackend, map_transport_error, resolve_api_key};
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{ChatRole, Turn};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Backend for any server speaking the `/chat/completions` protocol.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = resolve_api_key(config, "OpenAI")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    fn build_request_body(&self, system_instruction: &str, turns: &[Turn]) -> Value {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !system_instruction.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": system_instruction }));
        }
        for turn in turns {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Model => "assistant",
                ChatRole::System => continue,
            };
            messages.push(serde_json::json!({ "role": role, "content": turn.text }));
        }

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }

    fn parse_response(body: &Value) -> Result<String, LlmError> {
        body["choices"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["message"]["content"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'choices[0].message.content' in response".to_string(),
            })
    }

    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "OpenAI".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 20,
            },
            500..=599 => LlmError::Server {
                status: status.as_u16(),
                message: body_text.to_string(),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from chat completions API: {}", status, body_text),
            },
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    async fn generate(&self, system_instruction: &str, turns: &[Turn]) -> Result<String, LlmError> {
        let body = self.build_request_body(system_instruction, turns);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(model = self.model.as_str(), url = url.as_str(), "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let json: Value = serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON in response: {}", e),
        })?;
        Self::parse_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
