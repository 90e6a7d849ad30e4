use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use parley_core::{ChatMessage, GenerateEvent, GenerateStream, GenerationError, GenerationRequest, Generator};

use crate::sse::{self, ChatSseParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// e.g. `https://api.openai.com/v1`; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub request_timeout: Duration,
}

/// Streaming client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Provider(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn body<'a>(&'a self, request: &GenerationRequest) -> ChatRequestBody<'a> {
        ChatRequestBody {
            model: &self.config.model,
            messages: request.full_messages(),
            stream: true,
            max_tokens: request.max_tokens.or(self.config.max_tokens),
            temperature: request.temperature.or(self.config.temperature),
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, request), fields(model = %self.config.model, messages = request.messages.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateStream, GenerationError> {
        let mut req = self
            .client
            .post(self.endpoint())
            .header("accept", "text/event-stream")
            .json(&self.body(request));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.config.request_timeout)
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match GenerationError::from_status(status, body) {
                GenerationError::RateLimited { .. } => GenerationError::RateLimited { retry_after: hint },
                other => other,
            });
        }
        debug!(status, "completion stream opened");

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()));
        Ok(Box::pin(SseStream::new(bytes, SSE_IDLE_TIMEOUT)))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// Turns a response body into generator events. Emits an error if the body
/// goes quiet for longer than the idle timeout.
struct SseStream {
    inner: ByteStream,
    parser: ChatSseParser,
    buffer: String,
    pending: std::collections::VecDeque<GenerateEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    fn new(bytes: impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static, idle: Duration) -> Self {
        Self {
            inner: Box::pin(bytes),
            parser: ChatSseParser::new(),
            buffer: String::new(),
            pending: Default::default(),
            idle_deadline: Box::pin(tokio::time::sleep(idle)),
            idle_duration: idle,
            done: false,
        }
    }

    fn emit(&mut self, event: GenerateEvent) -> Poll<Option<GenerateEvent>> {
        if event.is_terminal() {
            self.done = true;
            self.pending.clear();
        }
        Poll::Ready(Some(event))
    }

    fn feed(&mut self, payloads: Vec<String>) {
        for data in payloads {
            self.pending.extend(self.parser.parse_data(&data));
        }
    }
}

impl Stream for SseStream {
    type Item = GenerateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if let Some(event) = self.pending.pop_front() {
            return self.emit(event);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    let text = String::from_utf8_lossy(&bytes).replace("\r\n", "\n");
                    self.buffer.push_str(&text);
                    let payloads = sse::drain_data_lines(&mut self.buffer);
                    self.feed(payloads);

                    if let Some(event) = self.pending.pop_front() {
                        return self.emit(event);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.emit(GenerateEvent::Error {
                        error: GenerationError::StreamInterrupted(e),
                    });
                }
                Poll::Ready(None) => {
                    let rest = std::mem::take(&mut self.buffer);
                    self.feed(sse::data_lines(&rest));
                    if let Some(event) = self.pending.pop_front() {
                        return self.emit(event);
                    }
                    return match self.parser.end_of_body() {
                        Some(event) => self.emit(event),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        let secs = self.idle_duration.as_secs();
                        return self.emit(GenerateEvent::Error {
                            error: GenerationError::StreamInterrupted(format!("idle timeout after {secs}s")),
                        });
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
