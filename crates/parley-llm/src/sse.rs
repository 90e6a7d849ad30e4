//! Parsing for OpenAI-style `chat.completion.chunk` server-sent events.

use serde::Deserialize;

use parley_core::{GenerateEvent, GenerationError};

/// Accumulates deltas across `data:` payloads of one completion.
#[derive(Default)]
pub struct ChatSseParser {
    text: String,
    finish_reason: Option<String>,
    finished: bool,
}

impl ChatSseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Handle one `data:` payload.
    pub fn parse_data(&mut self, data: &str) -> Vec<GenerateEvent> {
        if self.finished {
            return Vec::new();
        }
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            return vec![self.finish()];
        }

        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                return vec![GenerateEvent::Error {
                    error: GenerationError::StreamInterrupted(format!("malformed chunk: {e}")),
                }];
            }
        };

        if let Some(err) = chunk.error {
            self.finished = true;
            return vec![GenerateEvent::Error { error: classify_error(&err) }];
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    events.push(GenerateEvent::Delta { text: content });
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
        events
    }

    /// Terminal event for a stream whose body ended. Without `[DONE]` that is an interruption.
    pub fn end_of_body(&mut self) -> Option<GenerateEvent> {
        if self.finished {
            return None;
        }
        if self.finish_reason.is_some() {
            return Some(self.finish());
        }
        self.finished = true;
        Some(GenerateEvent::Error {
            error: GenerationError::StreamInterrupted("stream ended before [DONE]".into()),
        })
    }

    fn finish(&mut self) -> GenerateEvent {
        self.finished = true;
        GenerateEvent::Done {
            text: std::mem::take(&mut self.text),
            finish_reason: self.finish_reason.take(),
        }
    }
}

/// Split complete SSE events off the front of `buffer`, returning their `data:` payloads.
/// Incomplete trailing input stays in the buffer.
pub fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        payloads.extend(data_lines(&block));
    }
    payloads
}

/// `data:` payloads in `raw`, with or without the space after the colon.
pub fn data_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest).to_string())
        .collect()
}

fn classify_error(err: &ApiError) -> GenerationError {
    match err.error_type.as_deref() {
        Some("rate_limit_error") | Some("rate_limit_exceeded") => {
            GenerationError::RateLimited { retry_after: None }
        }
        Some("authentication_error") | Some("invalid_api_key") => {
            GenerationError::AuthenticationFailed(err.message.clone())
        }
        Some("invalid_request_error") => GenerationError::InvalidRequest(err.message.clone()),
        _ => GenerationError::Upstream { status: 500, body: err.message.clone() },
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        serde_json::json!({"choices": [{"delta": {"content": content}, "finish_reason": null}]}).to_string()
    }

    #[test]
    fn deltas_then_done() {
        let mut p = ChatSseParser::new();
        let mut events = p.parse_data(&chunk("Hel"));
        events.extend(p.parse_data(&chunk("lo")));
        events.extend(p.parse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#));
        events.extend(p.parse_data("[DONE]"));

        assert_eq!(events.len(), 3);
        match &events[2] {
            GenerateEvent::Done { text, finish_reason } => {
                assert_eq!(text, "Hello");
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(p.is_finished());
        assert!(p.parse_data(&chunk("late")).is_empty());
    }

    #[test]
    fn role_only_delta_yields_nothing() {
        let mut p = ChatSseParser::new();
        assert!(p.parse_data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_empty());
    }

    #[test]
    fn error_payload_is_classified() {
        let mut p = ChatSseParser::new();
        let events = p.parse_data(r#"{"error":{"message":"slow down","type":"rate_limit_error"}}"#);
        assert!(matches!(
            events.as_slice(),
            [GenerateEvent::Error { error: GenerationError::RateLimited { .. } }]
        ));
    }

    #[test]
    fn malformed_payload_interrupts() {
        let mut p = ChatSseParser::new();
        let events = p.parse_data("{nope");
        assert!(matches!(
            events.as_slice(),
            [GenerateEvent::Error { error: GenerationError::StreamInterrupted(_) }]
        ));
    }

    #[test]
    fn body_end_without_done() {
        let mut p = ChatSseParser::new();
        p.parse_data(&chunk("cut"));
        assert!(matches!(p.end_of_body(), Some(GenerateEvent::Error { .. })));

        let mut finished = ChatSseParser::new();
        finished.parse_data(r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#);
        assert!(matches!(finished.end_of_body(), Some(GenerateEvent::Done { .. })));
    }

    #[test]
    fn drain_keeps_partial_event() {
        let mut buf = String::from("data: {\"a\":1}\n\ndata: [DO");
        let payloads = drain_data_lines(&mut buf);
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
        assert_eq!(buf, "data: [DO");

        buf.push_str("NE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn data_lines_tolerates_missing_space_and_crlf() {
        let lines = data_lines("event: x\r\ndata:{\"b\":2}\r\n: comment\r\n");
        assert_eq!(lines, vec!["{\"b\":2}".to_string()]);
    }
}
