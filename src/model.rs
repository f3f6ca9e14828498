//! Language-model and embedding providers.
//!
//! The pipeline talks to models through the [`LanguageModel`] trait; the
//! shipped implementation speaks the OpenAI-compatible chat and embedding
//! protocols over HTTP. [`MockLanguageModel`] gives tests a scriptable
//! stand-in with no network.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::retrieval::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport failures, 5xx responses, misconfiguration. Retryable.
    #[error("model unavailable: {0}")]
    Unavailable(String),
    /// HTTP 429. Retryable after backoff.
    #[error("model rate limited")]
    RateLimited,
    /// The model answered but the answer does not parse. Retrying gets a
    /// fresh sample, so this is retryable too.
    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// A chat-style language model. `context` carries retrieved chapter text;
/// implementations decide how it is placed relative to the prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ModelError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatModel {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: trim_base(api_base.into()),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Reads `BOOKWRIGHT_API_BASE`, `BOOKWRIGHT_API_KEY` and
    /// `BOOKWRIGHT_CHAT_MODEL` from the environment, loading `.env` first.
    pub fn from_env() -> Result<Self, ModelError> {
        dotenvy::dotenv().ok();
        Ok(Self::new(
            require_env("BOOKWRIGHT_API_BASE")?,
            require_env("BOOKWRIGHT_API_KEY")?,
            require_env("BOOKWRIGHT_CHAT_MODEL")?,
        ))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ModelError> {
        let user = if context.is_empty() {
            prompt.to_string()
        } else {
            format!("{prompt}\n\n---\n\n{context}")
        };
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            return Err(ModelError::Unavailable(format!("http {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Malformed("response carries no choices".into()))?;
        debug!(chars = content.len(), "model completion received");
        Ok(content)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding client for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiCompatEmbeddings {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatEmbeddings {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: trim_base(api_base.into()),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Reads `BOOKWRIGHT_API_BASE`, `BOOKWRIGHT_API_KEY` and
    /// `BOOKWRIGHT_EMBEDDING_MODEL` from the environment.
    pub fn from_env() -> Result<Self, ModelError> {
        dotenvy::dotenv().ok();
        Ok(Self::new(
            require_env("BOOKWRIGHT_API_BASE")?,
            require_env("BOOKWRIGHT_API_KEY")?,
            require_env("BOOKWRIGHT_EMBEDDING_MODEL")?,
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbeddings {
    #[instrument(skip_all, fields(model = %self.model, texts = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Unavailable(format!("http {status}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

fn require_env(name: &str) -> Result<String, ModelError> {
    std::env::var(name).map_err(|_| ModelError::Unavailable(format!("{name} is not set")))
}

type ResponseHandler = Box<dyn Fn(&str, &str) -> Result<String, ModelError> + Send + Sync>;

enum MockBehavior {
    Fixed(String),
    Script(Mutex<VecDeque<Result<String, ModelError>>>),
    Handler(ResponseHandler),
}

/// Scriptable model for tests. Records every prompt it receives.
pub struct MockLanguageModel {
    behavior: MockBehavior,
    calls: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// Always answers with the same text.
    pub fn fixed(answer: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Fixed(answer.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers from a queue, one entry per call; the last entry repeats
    /// once the queue drains.
    pub fn script(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            behavior: MockBehavior::Script(Mutex::new(responses.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers via a closure over `(prompt, context)`.
    pub fn handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            behavior: MockBehavior::Handler(Box::new(handler)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ModelError> {
        self.calls.lock().push(prompt.to_string());
        match &self.behavior {
            MockBehavior::Fixed(answer) => Ok(answer.clone()),
            MockBehavior::Script(queue) => {
                let mut queue = queue.lock();
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or(Err(ModelError::Unavailable(
                        "mock script exhausted".into(),
                    )))
                } else {
                    match queue.front() {
                        Some(Ok(text)) => Ok(text.clone()),
                        Some(Err(err)) => Err(clone_error(err)),
                        None => Err(ModelError::Unavailable("mock script empty".into())),
                    }
                }
            }
            MockBehavior::Handler(handler) => handler(prompt, context),
        }
    }
}

fn clone_error(err: &ModelError) -> ModelError {
    match err {
        ModelError::Unavailable(msg) => ModelError::Unavailable(msg.clone()),
        ModelError::RateLimited => ModelError::RateLimited,
        ModelError::Malformed(msg) => ModelError::Malformed(msg.clone()),
    }
}
