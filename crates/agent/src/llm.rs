//! Reply text generation.
//!
//! [`TextGenerator`] is the seam the runtime composes replies through. Two backends ship:
//! personality templates that need nothing external, and chat models reached over HTTP (Ollama's
//! `/api/chat` or an OpenAI-compatible `/v1/chat/completions`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::{LlmConfig, LlmProvider};
use parley_core::domain::message::{Message, MessageKind};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::arbiter::{DrawSource, StyleHint};
use crate::profile::Personality;

pub const SYSTEM_PROMPT: &str = "You are a conversation agent participating in a multi-agent chat \
     system. Be conversational with short colloquial responses. You have access to the full \
     conversation history.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator is misconfigured: {0}")]
    Config(String),
    #[error("model request failed: {0}")]
    Network(String),
    #[error("model returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model response could not be parsed: {0}")]
    Parse(String),
    #[error("model returned no content")]
    Empty,
}

/// Everything a backend may use to write one reply.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub speaker: String,
    pub persona: Option<String>,
    pub style: StyleHint,
    pub trigger: Message,
    /// Recent conversation, oldest first. May or may not already contain `trigger`.
    pub context: Vec<Message>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Picks the backend named by `llm.provider`.
pub fn generator_from_config(
    config: &LlmConfig,
    draws: Arc<dyn DrawSource>,
) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    match config.provider {
        LlmProvider::Template => Ok(Arc::new(TemplateTextGenerator::new(draws))),
        LlmProvider::Ollama | LlmProvider::OpenAi => {
            Ok(Arc::new(HttpTextGenerator::from_config(config)?))
        }
    }
}

const CURIOUS_REPLIES: &[&str] = &[
    "That's interesting! Can you tell me more about that?",
    "I'm curious about that. What made you think of it?",
    "Fascinating! I'd love to hear more details.",
    "That's a great point. How did you come to that conclusion?",
    "I'm intrigued by that. Could you elaborate?",
];
const HELPFUL_REPLIES: &[&str] = &[
    "I'd be happy to help with that!",
    "That sounds like something I can assist with.",
    "Let me see if I can provide some guidance on that.",
    "I'm here to help! What specifically would you like to know?",
    "That's a common challenge. I might have some suggestions.",
];
const SOCIAL_REPLIES: &[&str] = &[
    "That's really cool! I love hearing about that kind of thing.",
    "Nice! I'm always interested in what others are thinking about.",
    "That sounds awesome! I'd love to chat more about it.",
    "I'm really enjoying this conversation!",
    "That's a great perspective! I hadn't thought of it that way.",
];
const TECHNICAL_REPLIES: &[&str] = &[
    "From a technical perspective, that's quite interesting.",
    "I can see the technical implications of what you're saying.",
    "That raises some interesting technical questions.",
    "I'd like to explore the technical aspects of that.",
    "From an engineering standpoint, that's worth considering.",
];
const PHILOSOPHICAL_REPLIES: &[&str] = &[
    "That's a profound observation. It makes me think about the deeper meaning.",
    "I find myself pondering the philosophical implications of what you've said.",
    "That touches on some fundamental questions about existence and purpose.",
    "I'm intrigued by the philosophical dimensions of your statement.",
    "That raises some interesting questions about the nature of reality.",
];
const DEFAULT_REPLIES: &[&str] = &[
    "That's interesting!",
    "I see what you mean.",
    "That's a good point.",
    "I hadn't thought of it that way.",
    "That's worth considering.",
];
const SYSTEM_ACKNOWLEDGEMENTS: &[&str] = &[
    "I understand the system message.",
    "Got it, thanks for the update.",
    "I'll keep that in mind.",
    "Understood.",
    "Noted.",
];

/// Canned replies keyed by personality. Used when no model backend is configured.
pub struct TemplateTextGenerator {
    draws: Arc<dyn DrawSource>,
}

impl TemplateTextGenerator {
    pub fn new(draws: Arc<dyn DrawSource>) -> Self {
        Self { draws }
    }

    fn pick<'a>(&self, choices: &[&'a str]) -> &'a str {
        let index = (self.draws.draw().clamp(0.0, 1.0) * choices.len() as f64) as usize;
        choices[index.min(choices.len() - 1)]
    }

    fn reply_to_agent(&self, other: &str) -> String {
        let openers = [
            "I agree with that perspective.".to_string(),
            format!("That's a good point from {other}."),
            format!("I'd like to add to what {other} said."),
            format!("That's interesting, {other}."),
            "I have a different take on that.".to_string(),
        ];
        let index = (self.draws.draw().clamp(0.0, 1.0) * openers.len() as f64) as usize;
        openers[index.min(openers.len() - 1)].clone()
    }

    fn reply_to_user(&self, personality: &Personality, text: &str) -> String {
        match personality {
            Personality::Curious => {
                let reply = self.pick(CURIOUS_REPLIES);
                if text.contains('?') {
                    format!("That's a great question! {reply}")
                } else if has_any_word(text, &["i", "we", "my"]) {
                    format!("I find that really interesting! {reply}")
                } else {
                    reply.to_string()
                }
            }
            Personality::Helpful => {
                let reply = self.pick(HELPFUL_REPLIES);
                if text.contains('?') && !has_any_word(text, &["help", "problem", "issue"]) {
                    format!("I'd be glad to help answer that! {reply}")
                } else {
                    reply.to_string()
                }
            }
            Personality::Social => {
                let reply = self.pick(SOCIAL_REPLIES);
                if has_any_word(text, &["hello", "hi", "hey"]) {
                    format!("Hello there! {reply}")
                } else {
                    reply.to_string()
                }
            }
            Personality::Technical => self.pick(TECHNICAL_REPLIES).to_string(),
            Personality::Philosophical => self.pick(PHILOSOPHICAL_REPLIES).to_string(),
            Personality::Other(_) => self.pick(DEFAULT_REPLIES).to_string(),
        }
    }
}

fn has_any_word(text: &str, candidates: &[&str]) -> bool {
    text.split(|ch: char| !ch.is_alphanumeric())
        .any(|word| candidates.iter().any(|candidate| word.eq_ignore_ascii_case(candidate)))
}

#[async_trait]
impl TextGenerator for TemplateTextGenerator {
    fn backend(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let trigger = &request.trigger;
        let reply = match request.style.trigger_kind {
            MessageKind::System => self.pick(SYSTEM_ACKNOWLEDGEMENTS).to_string(),
            MessageKind::Agent => self.reply_to_agent(trigger.sender_label()),
            MessageKind::User | MessageKind::Context => {
                self.reply_to_user(&request.style.personality, &trigger.text)
            }
        };
        Ok(reply)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatBackend {
    Ollama,
    OpenAi,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

/// Chat-model backend over HTTP.
pub struct HttpTextGenerator {
    backend: ChatBackend,
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_tokens: u32,
    temperature: f32,
}

impl HttpTextGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let backend = match config.provider {
            LlmProvider::Ollama => ChatBackend::Ollama,
            LlmProvider::OpenAi => ChatBackend::OpenAi,
            LlmProvider::Template => {
                return Err(GenerationError::Config(
                    "template provider has no HTTP backend".to_string(),
                ))
            }
        };
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GenerationError::Config("llm.base_url is required".to_string()))?;
        if backend == ChatBackend::OpenAi && config.api_key.is_none() {
            return Err(GenerationError::Config("llm.api_key is required for openai".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| GenerationError::Config(format!("http client: {error}")))?;

        Ok(Self {
            backend,
            http_client,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> String {
        match self.backend {
            ChatBackend::Ollama => format!("{}/api/chat", self.base_url),
            ChatBackend::OpenAi => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        body: &B,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut builder = self.http_client.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response = builder.send().await.map_err(|error| {
            warn!(
                event_name = "agent.generation.request_failed",
                backend = self.backend(),
                error = %error,
                "model request failed"
            );
            GenerationError::Network(error.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

/// System prompt, then every context entry as `"<sender>: <text>"`, then the trigger text.
pub fn chat_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.context.len() + 2);
    let mut system = format!(
        "{SYSTEM_PROMPT} Your name is {}. Your personality is {}.",
        request.speaker, request.style.personality
    );
    if let Some(persona) = &request.persona {
        system.push(' ');
        system.push_str(persona);
    }
    messages.push(ChatMessage::new("system", system));
    for entry in request.context.iter().filter(|entry| entry.id != request.trigger.id) {
        let role = if entry.kind == MessageKind::Agent { "assistant" } else { "user" };
        messages.push(ChatMessage::new(role, format!("{}: {}", entry.sender_label(), entry.text)));
    }
    messages.push(ChatMessage::new("user", request.trigger.text.clone()));
    messages
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    fn backend(&self) -> &'static str {
        match self.backend {
            ChatBackend::Ollama => "ollama",
            ChatBackend::OpenAi => "openai",
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let messages = chat_messages(request);
        let started = std::time::Instant::now();

        let content = match self.backend {
            ChatBackend::Ollama => {
                let body = OllamaRequest {
                    model: &self.model,
                    messages: &messages,
                    stream: false,
                    options: OllamaOptions { temperature: self.temperature, top_p: 0.9, top_k: 40 },
                };
                let response: OllamaResponse = self
                    .post(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|error| GenerationError::Parse(error.to_string()))?;
                response.message.content
            }
            ChatBackend::OpenAi => {
                let body = OpenAiRequest {
                    model: &self.model,
                    messages: &messages,
                    max_tokens: self.max_tokens,
                    temperature: self.temperature,
                };
                let response: OpenAiResponse = self
                    .post(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|error| GenerationError::Parse(error.to_string()))?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or(GenerationError::Empty)?
            }
        };

        debug!(
            event_name = "agent.generation.completed",
            backend = self.backend(),
            model = %self.model,
            duration_ms = started.elapsed().as_millis() as u64,
            "model reply received"
        );
        if content.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(content)
    }
}
