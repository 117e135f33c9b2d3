//! HTTP-based LLM provider.
//!
//! Speaks the OpenAI-compatible chat-completions and embeddings APIs
//! (OpenAI, Google Gemini, DeepSeek, self-hosted gateways).

use crate::provider::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, LlmError,
    LlmProvider, Role,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Google,
    DeepSeek,
    /// Falls back to OpenAI-compatible format.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
            || m.starts_with("text-embedding-")
        {
            Self::OpenAi
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }
}

// ── Request/response types ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Serialize)]
struct OaiEmbedRequest {
    model: String,
    input: String,
}

#[derive(Deserialize)]
struct OaiEmbedResponse {
    data: Vec<OaiEmbedding>,
}

#[derive(Deserialize)]
struct OaiEmbedding {
    embedding: Vec<f32>,
}

// ── Provider ──

/// OpenAI-compatible HTTP provider with separate chat and embedding models.
pub struct HttpProvider {
    kind: ProviderKind,
    chat_model: String,
    embed_model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from model names + API key + optional base URL override.
    pub fn new(
        chat_model: String,
        embed_model: String,
        api_key: String,
        base_url: Option<String>,
    ) -> Self {
        let kind = ProviderKind::from_model(&chat_model);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            chat_model,
            embed_model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embed_endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Unknown => "unknown",
        }
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        Box::pin(self.complete_inner(request))
    }

    fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EmbeddingResponse, LlmError>> + Send + '_>> {
        Box::pin(self.embed_inner(request))
    }
}

impl HttpProvider {
    async fn complete_inner(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let body = OaiRequest {
            model: self.chat_model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OaiMessage { role: role_str(&m.role), content: m.content.clone() })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .client
            .post(self.chat_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(%status, model = %self.chat_model, "chat completion failed");
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = api
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let (input_tokens, output_tokens) = api
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    async fn embed_inner(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, LlmError> {
        let body = OaiEmbedRequest { model: self.embed_model.clone(), input: request.input };

        let resp = self
            .client
            .post(self.embed_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(%status, model = %self.embed_model, "embedding request failed");
            return Err(check_error(status, text));
        }

        let api: OaiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let vector = api
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::MalformedResponse("empty embedding data".into()))?;

        Ok(EmbeddingResponse { vector })
    }
}

/// Build a provider from environment variables.
/// Reads `PROMPTGATE_LLM_MODEL`, `PROMPTGATE_LLM_EMBED_MODEL`,
/// `PROMPTGATE_LLM_API_KEY`, optionally `PROMPTGATE_LLM_BASE_URL`.
/// Returns `None` if chat model or key is not set.
pub fn from_env() -> Option<HttpProvider> {
    let chat_model = std::env::var("PROMPTGATE_LLM_MODEL").ok()?;
    let embed_model = std::env::var("PROMPTGATE_LLM_EMBED_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".into());
    let api_key = std::env::var("PROMPTGATE_LLM_API_KEY").ok()?;
    let base_url = std::env::var("PROMPTGATE_LLM_BASE_URL").ok();
    Some(HttpProvider::new(chat_model, embed_model, api_key, base_url))
}
