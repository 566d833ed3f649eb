//! Server-sent event decoding for provider streams.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks are never decoded in halves.

use async_stream::stream;
use futures::StreamExt;
use reqwest::Response;

use super::{LlmError, TextStream};

/// One dispatched SSE event. Multiple `data:` lines are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Consumes a network chunk and returns every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a trailing line without newline and any event still being built.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// What a backend made of one SSE event.
#[derive(Debug, PartialEq)]
pub enum Delta {
    Text(String),
    Skip,
    Done,
}

/// Turns a streaming HTTP response into a `TextStream` using a backend-specific
/// event decoder. A body that ends before `Delta::Done` yields
/// `LlmError::StreamInterrupted`. Dropping the stream drops the response and
/// releases the connection.
pub fn text_stream(
    response: Response,
    decode: fn(&SseEvent) -> Result<Delta, LlmError>,
) -> TextStream {
    Box::pin(stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        'pump: loop {
            let (events, exhausted) = match bytes.next().await {
                Some(Ok(chunk)) => (decoder.feed(&chunk), false),
                Some(Err(e)) => {
                    yield Err(LlmError::Http(e));
                    break 'pump;
                }
                None => (decoder.finish(), true),
            };

            for event in events {
                match decode(&event) {
                    Ok(Delta::Text(text)) => {
                        yield Ok(text);
                    }
                    Ok(Delta::Skip) => {}
                    Ok(Delta::Done) => break 'pump,
                    Err(e) => {
                        yield Err(e);
                        break 'pump;
                    }
                }
            }

            if exhausted {
                yield Err(LlmError::StreamInterrupted);
                break 'pump;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_dispatches_on_blank_line() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b"event: ping\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("ping".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn test_decoder_buffers_partial_lines_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: hel").is_empty());
        assert!(decoder.feed(b"lo\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_decoder_keeps_utf8_split_across_chunks() {
        let text = "data: 강점\n\n".as_bytes();
        // split inside the first Hangul syllable
        let (a, b) = text.split_at(8);
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(a).is_empty());
        let events = decoder.feed(b);
        assert_eq!(events[0].data, "강점");
    }

    #[test]
    fn test_decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\ndata: one\ndata: two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        let events = decoder.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
        assert!(decoder.finish().is_empty());
    }
}
