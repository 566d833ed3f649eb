/// LLM Client: the single point of entry for all model provider calls.
///
/// ARCHITECTURAL RULE: No other module may call a provider API directly.
/// Interview code talks to `dyn LlmProvider` and never sees provider wire formats.
///
/// Two backends share one contract: `openai` (chat completions) and `claude`
/// (Anthropic messages). Neither retries; a failed call fails the calling operation.
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod anthropic;
pub mod openai;
pub mod prompts;
pub mod sse;

#[cfg(test)]
pub mod testing;

use anthropic::AnthropicClient;
use openai::OpenAiClient;

/// Lazily pulled sequence of text fragments, in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Provider reported a stream error: {0}")]
    Stream(String),

    #[error("Stream ended before the provider signalled completion")]
    StreamInterrupted,
}

/// Which backend a session talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "claude", alias = "anthropic")]
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "claude",
        }
    }

    /// Model used for every call against this backend.
    pub fn model(&self) -> &'static str {
        match self {
            Provider::OpenAi => openai::MODEL,
            Provider::Anthropic => anthropic::MODEL,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Anthropic),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    #[error("API key is empty")]
    Empty,

    #[error("API key does not look like a {0} key (expected an 'sk-' prefix)")]
    Malformed(Provider),
}

/// A provider selection plus its API key. Held in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: Provider,
    api_key: String,
}

impl Credential {
    pub fn new(provider: Provider, api_key: &str) -> Result<Self, CredentialError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(CredentialError::Empty);
        }
        if !api_key.starts_with("sk-") {
            return Err(CredentialError::Malformed(provider));
        }
        Ok(Self {
            provider,
            api_key: api_key.to_string(),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// One model call: system instruction, user prompt and sampling limits.
#[derive(Debug, Clone, Copy)]
pub struct LlmRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The provider contract. Both operations fail with `LlmError`; callers do not
/// branch on the variant, it only feeds diagnostics.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Single awaited call returning the whole response text.
    async fn generate(&self, request: &LlmRequest<'_>) -> Result<String, LlmError>;

    /// Incremental call. The stream ends after the provider's completion signal,
    /// or yields one error and ends.
    async fn stream(&self, request: &LlmRequest<'_>) -> Result<TextStream, LlmError>;
}

/// Builds a provider adapter for a session credential.
pub trait ProviderFactory: Send + Sync {
    fn connect(&self, credential: &Credential) -> Arc<dyn LlmProvider>;
}

/// The production factory: one shared HTTP client, configurable endpoints.
#[derive(Clone)]
pub struct LlmConnector {
    client: Client,
    openai_base_url: String,
    anthropic_base_url: String,
}

impl LlmConnector {
    pub fn new(
        timeout: Duration,
        openai_base_url: &str,
        anthropic_base_url: &str,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            openai_base_url: openai_base_url.trim_end_matches('/').to_string(),
            anthropic_base_url: anthropic_base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ProviderFactory for LlmConnector {
    fn connect(&self, credential: &Credential) -> Arc<dyn LlmProvider> {
        match credential.provider {
            Provider::OpenAi => Arc::new(OpenAiClient::new(
                self.client.clone(),
                &self.openai_base_url,
                credential.api_key(),
            )),
            Provider::Anthropic => Arc::new(AnthropicClient::new(
                self.client.clone(),
                &self.anthropic_base_url,
                credential.api_key(),
            )),
        }
    }
}

/// Error envelope shared by both providers: `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

/// Maps a non-success response to `LlmError`, passing successful responses through.
pub(crate) async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    warn!("LLM API returned {}: {}", status, message);

    if status.as_u16() == 401 || status.as_u16() == 403 {
        Err(LlmError::Unauthorized {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(LlmError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
