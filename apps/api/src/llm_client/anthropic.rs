//! Message-stream backend (Anthropic Messages API).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{text_stream, Delta, SseEvent};
use super::{check_status, ApiErrorBody, LlmError, LlmProvider, LlmRequest, Provider, TextStream};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// All text blocks joined in order; tool and thinking blocks are dropped.
    fn into_text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ApiErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

pub struct AnthropicClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: format!("{base_url}/messages"),
            api_key: api_key.to_string(),
        }
    }

    async fn send(
        &self,
        request: &LlmRequest<'_>,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = AnthropicRequest {
            model: MODEL,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: request.prompt,
            }],
            stream,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        check_status(response).await
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate(&self, request: &LlmRequest<'_>) -> Result<String, LlmError> {
        let response: MessagesResponse = self.send(request, false).await?.json().await?;

        if let Some(usage) = &response.usage {
            debug!(
                "Anthropic call succeeded: input_tokens={}, output_tokens={}, stop_reason={}",
                usage.input_tokens,
                usage.output_tokens,
                response.stop_reason.as_deref().unwrap_or("unknown")
            );
        }

        let text = response.into_text();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text)
    }

    async fn stream(&self, request: &LlmRequest<'_>) -> Result<TextStream, LlmError> {
        let response = self.send(request, true).await?;
        Ok(text_stream(response, decode_event))
    }
}

/// Only `text_delta` blocks carry text; `message_stop` ends the stream and
/// `error` aborts it. Pings and block boundaries are skipped.
fn decode_event(event: &SseEvent) -> Result<Delta, LlmError> {
    match serde_json::from_str::<StreamEvent>(&event.data)? {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => Ok(Delta::Text(text)),
        StreamEvent::MessageStop => Ok(Delta::Done),
        StreamEvent::Error { error } => Err(LlmError::Stream(error.message)),
        _ => Ok(Delta::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, payload: &str) -> SseEvent {
        SseEvent {
            event: Some(name.to_string()),
            data: payload.to_string(),
        }
    }

    #[test]
    fn test_decode_text_delta() {
        let e = event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,
                "delta":{"type":"text_delta","text":"**Strengths:**"}}"#,
        );
        assert_eq!(
            decode_event(&e).unwrap(),
            Delta::Text("**Strengths:**".to_string())
        );
    }

    #[test]
    fn test_decode_skips_non_text_events() {
        let ping = event("ping", r#"{"type":"ping"}"#);
        let start = event(
            "content_block_start",
            r#"{"type":"content_block_start","index":0,
                "content_block":{"type":"text","text":""}}"#,
        );
        let json_delta = event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,
                "delta":{"type":"input_json_delta","partial_json":"{"}}"#,
        );
        assert_eq!(decode_event(&ping).unwrap(), Delta::Skip);
        assert_eq!(decode_event(&start).unwrap(), Delta::Skip);
        assert_eq!(decode_event(&json_delta).unwrap(), Delta::Skip);
    }

    #[test]
    fn test_decode_message_stop_and_error() {
        let stop = event("message_stop", r#"{"type":"message_stop"}"#);
        assert_eq!(decode_event(&stop).unwrap(), Delta::Done);

        let err = event(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        match decode_event(&err) {
            Err(LlmError::Stream(msg)) => assert_eq!(msg, "Overloaded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_response_text_joins_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "[1,"},
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}},
                {"type": "text", "text": "2]"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.into_text(), "[1,2]");
    }

    #[test]
    fn test_response_without_text_blocks_is_empty() {
        let json = r#"{"content": [{"type": "thinking", "thinking": "hmm"}]}"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        assert!(response.usage.is_none());
        assert_eq!(response.into_text(), "");
    }
}
