//! In-process collaborator for tests and offline sessions.

use super::ChatBackend;
use crate::error::LlmError;
use crate::types::{ChatRole, Turn};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A request captured by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub system_instruction: String,
    pub turns: Vec<Turn>,
}

/// A mock backend that replays queued replies and echoes otherwise.
pub struct MockBackend {
    model: String,
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<MockRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply to be returned by the next `generate` call.
    pub fn queue_reply(&self, text: &str) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(text.to_string()));
        }
    }

    /// Queue a failure to be returned by the next `generate` call.
    pub fn queue_error(&self, err: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(err));
        }
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn generate(&self, system_instruction: &str, turns: &[Turn]) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(MockRequest {
                system_instruction: system_instruction.to_string(),
                turns: turns.to_vec(),
            });
        }

        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match queued {
            Some(reply) => reply,
            None => {
                let last_user = turns
                    .iter()
                    .rev()
                    .find(|t| t.role == ChatRole::User)
                    .map(|t| t.text.as_str())
                    .unwrap_or("");
                Ok(format!("Echo: {}", last_user))
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
