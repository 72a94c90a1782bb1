//! The assistant conversation.
//!
//! Owns the collaborator handle, the visible transcript, the user-declared
//! domain hint and the simulated research-agent log. The session is only
//! read, through [`SessionController::context`], so a slow collaborator never
//! holds the session lock.

use crate::context::SessionContext;
use crate::error::MlError;
use crate::session::SessionController;
use chrono::Local;
use geomaker_core::{ChatBackend, ChatMessage, CollaboratorSession, LlmConfig, LlmError, create_backend};
use std::sync::Arc;
use tracing::{info, warn};

/// Phrases after which users typically name their classification domain.
pub const DOMAIN_KEYWORDS: &[&str] = &[
    "classification of",
    "type of image is",
    "i am analyzing",
    "i'm analyzing",
    "my dataset is about",
    "focus is on",
    "goal is",
    "problem of",
    "working with",
    "dataset for",
    "images of",
];

/// Words that trigger the simulated research agents.
pub const RESEARCH_KEYWORDS: &[&str] = &[
    "articles",
    "research",
    "advances",
    "multidisciplinary",
    "literature",
    "recent studies",
    "trends in",
    "papers",
];

const WELCOME_PREFIX: &str = "Hello! I'm your image-analysis assistant.";

/// Conversation with the external collaborator about the current session.
pub struct AssistantConversation {
    llm: LlmConfig,
    backend_override: Option<Arc<dyn ChatBackend>>,
    collaborator: Option<CollaboratorSession>,
    transcript: Vec<ChatMessage>,
    domain_hint: Option<String>,
    agent_log: Vec<String>,
}

impl AssistantConversation {
    pub fn new(llm: LlmConfig) -> Self {
        Self {
            llm,
            backend_override: None,
            collaborator: None,
            transcript: Vec::new(),
            domain_hint: None,
            agent_log: Vec::new(),
        }
    }

    /// Use `backend` instead of the provider named in the config.
    pub fn with_backend(llm: LlmConfig, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend_override: Some(backend),
            ..Self::new(llm)
        }
    }

    /// Open a new collaborator conversation grounded by `context`.
    ///
    /// Replaces any open handle. On failure a system message is appended
    /// and the conversation stays closed.
    pub fn open(&mut self, context: &SessionContext) -> Result<(), LlmError> {
        self.collaborator = None;
        let backend = match &self.backend_override {
            Some(backend) => Ok(backend.clone()),
            None => create_backend(&self.llm),
        };
        let backend = match backend {
            Ok(backend) => backend,
            Err(e) => {
                warn!(provider = self.llm.provider.as_str(), error = %e, "Assistant initialization failed");
                self.transcript.push(ChatMessage::system(format!(
                    "The assistant is unavailable: {}",
                    e
                )));
                return Err(e);
            }
        };

        let instruction = system_instruction(&context.text);
        info!(model = backend.model_name(), "Assistant conversation opened");
        self.collaborator = Some(CollaboratorSession::open(
            backend,
            instruction,
            self.llm.retry.clone(),
        ));

        let welcome = welcome_message(context, self.domain_hint.as_deref());
        let repeated = self
            .transcript
            .iter()
            .rev()
            .find(|m| m.text.starts_with(WELCOME_PREFIX))
            .is_some_and(|m| m.text == welcome);
        if !repeated {
            self.transcript.push(ChatMessage::model(welcome));
        }
        Ok(())
    }

    /// Drop the collaborator handle. The transcript is kept.
    pub fn close(&mut self) {
        if self.collaborator.take().is_some() {
            info!("Assistant conversation closed");
        }
    }

    /// Forget everything: handle, transcript, domain hint and agent log.
    pub fn reset(&mut self) {
        self.close();
        self.transcript.clear();
        self.domain_hint = None;
        self.agent_log.clear();
    }

    /// Reopen with a fresh context from `controller`.
    pub async fn refresh(&mut self, controller: &SessionController) -> Result<(), MlError> {
        let context = controller.context(self.domain_hint.as_deref()).await?;
        self.open(&context)?;
        Ok(())
    }

    /// Send a user message and return the collaborator's reply.
    ///
    /// A newly declared domain reopens the conversation with a fresh context.
    /// Failures are recorded in the transcript and returned.
    pub async fn send(&mut self, controller: &SessionController, text: &str) -> Result<String, MlError> {
        self.transcript.push(ChatMessage::user(text));
        self.agent_log.clear();

        let mut needs_open = self.collaborator.is_none();
        if self.domain_hint.is_none() {
            if let Some(hint) = extract_domain_hint(text) {
                info!(domain = hint.as_str(), "User declared classification domain");
                self.domain_hint = Some(hint);
                needs_open = true;
            }
        }

        if needs_open {
            if let Err(e) = self.refresh(controller).await {
                self.transcript.push(ChatMessage::model(
                    "Sorry, I can't process your message: the assistant is not initialized. Check that an API key is configured.",
                ));
                return Err(e);
            }
        }

        if let Some(domain) = self.domain_hint.clone() {
            if needs_research(text) {
                self.simulate_research(&domain, text);
            }
        }

        let Some(collaborator) = self.collaborator.as_mut() else {
            return Err(MlError::Llm(LlmError::Connection {
                message: "assistant conversation is not open".to_string(),
            }));
        };
        match collaborator.send(text).await {
            Ok(reply) => {
                self.transcript.push(ChatMessage::model(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, "Assistant request failed");
                self.transcript.push(ChatMessage::model(
                    "Sorry, an error occurred while getting a reply from the assistant.",
                ));
                Err(e.into())
            }
        }
    }

    fn simulate_research(&mut self, domain: &str, text: &str) {
        let query: String = text.chars().take(30).collect();
        let now = || Local::now().format("%H:%M:%S").to_string();
        self.agent_log.push(format!(
            "[{}] INFO: User query suggests in-depth research.",
            now()
        ));
        self.agent_log.push(format!(
            "[{}] AGENT_SYSTEM: Activating research agent specialized in \"{}\".",
            now(),
            domain
        ));
        self.agent_log.push(format!(
            "[{}] AGENT_WEB_QUERY: Searching articles and data on \"AI for {}\" and \"{}...\".",
            now(),
            domain,
            query
        ));
        self.agent_log.push(format!(
            "[{}] AGENT_ANALYSIS: Synthesis complete. Preparing answer...",
            now()
        ));
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn domain_hint(&self) -> Option<&str> {
        self.domain_hint.as_deref()
    }

    pub fn agent_log(&self) -> &[String] {
        &self.agent_log
    }

    pub fn is_open(&self) -> bool {
        self.collaborator.is_some()
    }
}

/// Extract a declared classification domain from free text.
///
/// Everything after the first matching keyword, minus a trailing `, and ...`
/// clause and final `.`/`?`, title-cased. Must be 3 to 99 characters.
pub fn extract_domain_hint(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for keyword in DOMAIN_KEYWORDS {
        let Some(pos) = lower.find(keyword) else {
            continue;
        };
        let mut rest = lower[pos + keyword.len()..].trim();
        if let Some(clause) = rest.find(", and") {
            rest = &rest[..clause];
        }
        let rest = rest.strip_suffix('.').unwrap_or(rest);
        let rest = rest.strip_suffix('?').unwrap_or(rest).trim();

        let len = rest.chars().count();
        if len > 2 && len < 100 {
            return Some(title_case(rest));
        }
    }
    None
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `text` asks for something that calls for outside research.
pub fn needs_research(text: &str) -> bool {
    let lower = text.to_lowercase();
    RESEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn system_instruction(context: &str) -> String {
    let mut out = String::new();
    out.push_str("You are an expert assistant in AI and data science. Your goal is to analyze the results of an image classification model and answer questions about them. ");
    out.push_str("The results of the current run are provided below as a textual summary with a JSON block of the key configuration and performance data, followed by details in text and table form.\n\n");
    out.push_str("Results context:\n");
    out.push_str(context);
    out.push_str("\nAdditional instructions:\n");
    out.push_str("- Use the JSON block for a quick overview and the text/CSV details for granular information.\n");
    out.push_str("- If the user-declared classification type is \"not available\" and the question would benefit from knowing it, ask the user what they are classifying (for example melanoma diagnosis or rock types).\n");
    out.push_str("- Be clear, concise and helpful. If results are not available, tell the user to train a model first.\n");
    out.push_str("- If the user asks for something that needs outside research, answer comprehensively from your knowledge and the context.\n");
    out
}

fn welcome_message(context: &SessionContext, domain_hint: Option<&str>) -> String {
    let snapshot = &context.snapshot;
    if !snapshot.overall_performance.is_available() {
        return format!(
            "{} I can help analyze your model's results, discuss image characteristics or explain AI concepts.\n\nNo results from this session are loaded yet. Start a training run so I can analyze the generated data, or we can talk about AI in general.",
            WELCOME_PREFIX
        );
    }

    let mut loaded = Vec::new();
    if snapshot.training_summary.is_available() {
        loaded.push("training metrics");
    }
    loaded.push("classification report");
    loaded.push("confusion matrix");
    loaded.push("ROC/PR curves");
    if snapshot.clustering_metrics.is_available() {
        loaded.push("clustering");
    }

    let mut out = String::from(WELCOME_PREFIX);
    out.push_str(&format!(
        " Your session results (including {}) and the model configuration are loaded in my context. ",
        loaded.join(", ")
    ));
    match domain_hint {
        Some(domain) => out.push_str(&format!("Your stated focus is \"{}\". ", domain)),
        None => out.push_str("For a more targeted analysis, tell me what kind of classification you are doing (for example medical diagnosis or geology). "),
    }
    out.push_str("How can I help with the analysis today?");
    out
}
