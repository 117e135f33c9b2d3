use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Chat completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Embedding request — a single input text.
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub input: String,
}

/// Embedding response — one float vector per request.
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub vector: Vec<f32>,
}

/// Error type for LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// Trait for LLM providers (OpenAI, Gemini, DeepSeek, etc.)
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse>;

    fn embed(&self, request: EmbeddingRequest) -> LlmFuture<'_, EmbeddingResponse>;
}

/// Mock provider for testing — fixed chat response and embedding vector,
/// with scriptable consecutive failures for circuit-breaker tests.
pub struct MockProvider {
    pub response: String,
    pub embedding: Vec<f32>,
    fail_remaining: AtomicU32,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            embedding: vec![1.0, 0.0, 0.0, 0.0],
            fail_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Fail the next `n` calls (chat or embed) before succeeding.
    pub fn failing(mut self, n: u32) -> Self {
        self.fail_remaining = AtomicU32::new(n);
        self
    }

    /// Total calls attempted against this mock, successful or not.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prev = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev > 0 {
            Err(LlmError::Unavailable("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, _request: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
        let gate = self.check_failure();
        let content = self.response.clone();
        Box::pin(async move {
            gate?;
            Ok(CompletionResponse { content, input_tokens: 10, output_tokens: 20 })
        })
    }

    fn embed(&self, _request: EmbeddingRequest) -> LlmFuture<'_, EmbeddingResponse> {
        let gate = self.check_failure();
        let vector = self.embedding.clone();
        Box::pin(async move {
            gate?;
            Ok(EmbeddingResponse { vector })
        })
    }
}
