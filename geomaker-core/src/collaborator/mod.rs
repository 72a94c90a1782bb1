//! Conversational collaborator backends.
//!
//! The system talks to the collaborator through a narrow request/response
//! contract: a system instruction (carrying the session context) plus the
//! running list of user/model turns, answered with generated text.
//!
//! Provides concrete implementations of [`ChatBackend`] for:
//! - Google Gemini `generateContent`
//! - OpenAI-compatible chat completions
//! - an in-process mock for tests and offline use
//!
//! Use [`create_backend`] to instantiate the backend named in config and
//! [`CollaboratorSession::open`] to start a conversation.

pub mod gemini;
pub mod mock;
pub mod openai_compat;

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::Turn;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use openai_compat::OpenAiCompatibleBackend;

/// A text-generation provider that can answer a grounded conversation.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Generate the next model turn for `turns`, grounded by `system_instruction`.
    async fn generate(&self, system_instruction: &str, turns: &[Turn]) -> Result<String, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// An explicit collaborator conversation handle.
///
/// Created with [`CollaboratorSession::open`] and destroyed by dropping it;
/// its lifetime is owned by the caller, independent of any presentation state.
pub struct CollaboratorSession {
    backend: Arc<dyn ChatBackend>,
    system_instruction: String,
    turns: Vec<Turn>,
    retry: RetryConfig,
}

impl CollaboratorSession {
    /// Open a new conversation grounded by `system_instruction`.
    pub fn open(
        backend: Arc<dyn ChatBackend>,
        system_instruction: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            backend,
            system_instruction: system_instruction.into(),
            turns: Vec::new(),
            retry,
        }
    }

    /// Send a user message and return the generated reply.
    ///
    /// On failure the pending user turn is rolled back so the history only
    /// ever contains answered exchanges.
    pub async fn send(&mut self, message: &str) -> Result<String, LlmError> {
        self.turns.push(Turn::user(message));
        let backend = self.backend.clone();
        let system = self.system_instruction.as_str();
        let turns = self.turns.as_slice();
        let result = with_retry(&self.retry, || backend.generate(system, turns)).await;
        match result {
            Ok(reply) => {
                self.turns.push(Turn::model(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                self.turns.pop();
                Err(e)
            }
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

/// Create the backend named by `config.provider`.
///
/// Fails with `LlmError::AuthFailed` when a remote provider has no API key and
/// `LlmError::UnsupportedProvider` for unknown names.
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn ChatBackend>, LlmError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiBackend::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiCompatibleBackend::new(config)?)),
        "mock" => Ok(Arc::new(MockBackend::new())),
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Resolve the API key: inline config value first, then the configured env var.
pub(crate) fn resolve_api_key(config: &LlmConfig, provider: &str) -> Result<String, LlmError> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| LlmError::AuthFailed {
            provider: format!("{} (env var '{}' not set)", provider, config.api_key_env),
        })
}

/// Map a transport-level reqwest failure onto the collaborator error taxonomy.
pub(crate) fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if err.is_connect() {
        LlmError::Connection {
            message: err.to_string(),
        }
    } else {
        LlmError::ApiRequest {
            message: err.to_string(),
        }
    }
}

/// Run a collaborator request, retrying transient failures.
///
/// Delays come from [`retry_delay`]; the last error is returned once it is
/// permanent or `config.max_retries` retries have been spent.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retries = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(delay) = retry_delay(config, retries, &err) else {
            return Err(err);
        };
        retries += 1;
        tracing::warn!(
            retry = retries,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Collaborator request failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Delay before the next attempt after `retries` retries already made, or
/// `None` when `err` is permanent or the budget is spent.
///
/// Rate limits, connection failures, timeouts and provider 5xx responses are
/// transient. The delay grows geometrically up to `max_backoff_ms`, gains up
/// to a quarter of jitter and never undercuts a provider's retry-after.
fn retry_delay(config: &RetryConfig, retries: u32, err: &LlmError) -> Option<Duration> {
    let transient = matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
            | LlmError::Server { .. }
    );
    if !transient || retries >= config.max_retries {
        return None;
    }

    let grown = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(retries as i32);
    let mut delay_ms = grown.min(config.max_backoff_ms as f64) as u64;
    if config.jitter && delay_ms > 0 {
        delay_ms += rand::thread_rng().gen_range(0..=delay_ms / 4);
    }
    if let LlmError::RateLimited { retry_after_secs } = err {
        delay_ms = delay_ms.max(retry_after_secs.saturating_mul(1000));
    }
    Some(Duration::from_millis(delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_retry(max_retries: u32, delay_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: delay_ms,
            max_backoff_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_error() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = with_retry(&fixed_retry(3, 100), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Server {
                    status: 503,
                    message: "overloaded".into(),
                })
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error_when_budget_spent() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fixed_retry(2, 10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Timeout { timeout_secs: 5 })
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fixed_retry(3, 1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::AuthFailed {
                provider: "gemini".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_delay_classifies_errors() {
        let config = fixed_retry(1, 50);
        let bad_request = LlmError::ApiRequest {
            message: "HTTP 400".into(),
        };
        assert_eq!(retry_delay(&config, 0, &bad_request), None);
        let parse = LlmError::ResponseParse {
            message: "no candidates".into(),
        };
        assert_eq!(retry_delay(&config, 0, &parse), None);

        let server = LlmError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(retry_delay(&config, 0, &server), Some(Duration::from_millis(50)));
        assert_eq!(retry_delay(&config, 1, &server), None);
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 3.0,
            jitter: false,
        };
        let err = LlmError::Connection {
            message: "reset".into(),
        };
        let delays: Vec<u64> = (0..4)
            .map(|n| retry_delay(&config, n, &err).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 300, 900, 1_000]);

        let jittered = RetryConfig { jitter: true, ..config };
        for _ in 0..20 {
            let ms = retry_delay(&jittered, 1, &err).unwrap().as_millis() as u64;
            assert!((300..=375).contains(&ms));
        }
    }

    #[test]
    fn test_retry_delay_honors_retry_after() {
        let err = LlmError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(
            retry_delay(&fixed_retry(1, 5), 0, &err),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_create_backend_unknown_provider() {
        let config = LlmConfig {
            provider: "telegraph".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_backend(&config),
            Err(LlmError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn test_create_backend_mock() {
        let config = LlmConfig {
            provider: "mock".to_string(),
            ..LlmConfig::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.model_name(), "mock-model");
    }

    #[tokio::test]
    async fn test_session_keeps_history_and_rolls_back_failures() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_reply("first answer");
        backend.queue_error(LlmError::ApiRequest {
            message: "HTTP 500".into(),
        });
        let mut session =
            CollaboratorSession::open(backend.clone(), "be helpful", fixed_retry(0, 1));

        assert_eq!(session.send("hello").await.unwrap(), "first answer");
        assert_eq!(session.turns().len(), 2);

        assert!(session.send("again").await.is_err());
        assert_eq!(session.turns().len(), 2);

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].system_instruction, "be helpful");
        assert_eq!(requests[1].turns.len(), 3);
    }
}
