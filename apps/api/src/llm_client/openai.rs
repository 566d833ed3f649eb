//! Chat-completion backend (OpenAI).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{text_stream, Delta, SseEvent};
use super::{check_status, ApiErrorBody, LlmError, LlmProvider, LlmRequest, Provider, TextStream};

pub const MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: format!("{base_url}/chat/completions"),
            api_key: api_key.to_string(),
        }
    }

    async fn send(
        &self,
        request: &LlmRequest<'_>,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate(&self, request: &LlmRequest<'_>) -> Result<String, LlmError> {
        let response: ChatResponse = self.send(request, false).await?.json().await?;

        if let Some(usage) = &response.usage {
            debug!(
                "OpenAI call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyContent)
    }

    async fn stream(&self, request: &LlmRequest<'_>) -> Result<TextStream, LlmError> {
        let response = self.send(request, true).await?;
        Ok(text_stream(response, decode_chunk))
    }
}

/// `data: [DONE]` ends the stream; every other event carries a chunk whose
/// first choice may hold a content delta.
fn decode_chunk(event: &SseEvent) -> Result<Delta, LlmError> {
    if event.data.trim() == "[DONE]" {
        return Ok(Delta::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(&event.data)?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Stream(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map(Delta::Text)
        .unwrap_or(Delta::Skip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(payload: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: payload.to_string(),
        }
    }

    #[test]
    fn test_decode_chunk_content_delta() {
        let event = data(r#"{"choices":[{"index":0,"delta":{"content":"Good"}}]}"#);
        assert_eq!(decode_chunk(&event).unwrap(), Delta::Text("Good".to_string()));
    }

    #[test]
    fn test_decode_chunk_role_only_delta_is_skipped() {
        let event = data(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#);
        assert_eq!(decode_chunk(&event).unwrap(), Delta::Skip);
    }

    #[test]
    fn test_decode_chunk_done_marker() {
        assert_eq!(decode_chunk(&data("[DONE]")).unwrap(), Delta::Done);
    }

    #[test]
    fn test_decode_chunk_error_payload() {
        let event = data(r#"{"error":{"message":"quota exceeded"}}"#);
        match decode_chunk(&event) {
            Err(LlmError::Stream(msg)) => assert_eq!(msg, "quota exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_chunk_malformed_json() {
        assert!(matches!(
            decode_chunk(&data("{not json")),
            Err(LlmError::Parse(_))
        ));
    }

    #[test]
    fn test_request_serializes_system_then_user() {
        let body = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "sys",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
            max_tokens: 10,
            temperature: 0.5,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], "gpt-4o-mini");
    }
}
