//! Google Gemini collaborator backend.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - System instruction is a top-level `system_instruction` field
//! - Roles are `"user"` / `"model"` (not `"assistant"`)

use super::{ChatBackend, map_transport_error, resolve_api_key};
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{ChatRole, Turn};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent` backend.
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl GeminiBackend {
    /// Create a new Gemini backend from configuration.
    ///
    /// Returns `LlmError::AuthFailed` if no API key is configured.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = resolve_api_key(config, "Gemini")?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new Gemini backend with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
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

    /// Build the JSON request body for `generateContent`.
    fn build_request_body(&self, system_instruction: &str, turns: &[Turn]) -> Value {
        let contents: Vec<Value> = turns
            .iter()
            .filter(|t| t.role != ChatRole::System)
            .map(|t| {
                serde_json::json!({
                    "role": if t.role == ChatRole::Model { "model" } else { "user" },
                    "parts": [{ "text": t.text }],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
                "temperature": self.temperature,
            },
        });
        if !system_instruction.is_empty() {
            body["system_instruction"] = serde_json::json!({
                "parts": [{ "text": system_instruction }],
            });
        }
        body
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// Extract the concatenated text parts of the first candidate.
    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing or empty 'candidates' array in response".to_string(),
            })?;
        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            })?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if text.is_empty() {
            return Err(LlmError::ResponseParse {
                message: "Candidate contained no text parts".to_string(),
            });
        }
        Ok(text)
    }

    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            500..=599 => LlmError::Server {
                status: status.as_u16(),
                message: body_text.to_string(),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn generate(&self, system_instruction: &str, turns: &[Turn]) -> Result<String, LlmError> {
        let body = self.build_request_body(system_instruction, turns);
        debug!(model = self.model.as_str(), turns = turns.len(), "Sending Gemini request");

        let response = self
            .client
            .post(self.endpoint_url())
            .header("content-type", "application/json")
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
