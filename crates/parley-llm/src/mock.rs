use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use parley_core::{
    ChatRole, GenerateEvent, GenerateStream, GenerationError, GenerationRequest, Generator,
};

/// One pre-programmed reply.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Stream these deltas, then `Done` with their concatenation.
    Chunks(Vec<String>),
    /// Stream these deltas, then fail.
    ChunksThenError(Vec<String>, GenerationError),
    /// Fail the `generate` call itself.
    Error(GenerationError),
    /// Wait before resolving the inner reply.
    Delay(Duration, Box<MockReply>),
    /// Like `Chunks`, sleeping `interval` before each delta.
    Paced { chunks: Vec<String>, interval: Duration },
    /// Open a stream that never yields.
    Stall,
}

impl MockReply {
    pub fn text(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn fail_after(chunks: &[&str], error: GenerationError) -> Self {
        Self::ChunksThenError(chunks.iter().map(|c| c.to_string()).collect(), error)
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Generator that replays scripted replies in order. Records every request.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

fn deltas_then(chunks: Vec<String>, last: GenerateEvent) -> GenerateStream {
    let events: Vec<GenerateEvent> = chunks
        .into_iter()
        .map(|text| GenerateEvent::Delta { text })
        .chain(std::iter::once(last))
        .collect();
    Box::pin(stream::iter(events))
}

async fn resolve(reply: MockReply) -> Result<GenerateStream, GenerationError> {
    let mut current = reply;
    loop {
        match current {
            MockReply::Chunks(chunks) => {
                let text = chunks.concat();
                return Ok(deltas_then(chunks, GenerateEvent::Done { text, finish_reason: Some("stop".into()) }));
            }
            MockReply::ChunksThenError(chunks, error) => {
                return Ok(deltas_then(chunks, GenerateEvent::Error { error }));
            }
            MockReply::Error(e) => return Err(e),
            MockReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockReply::Paced { chunks, interval } => {
                let text = chunks.concat();
                let deltas = stream::iter(chunks).then(move |text| async move {
                    tokio::time::sleep(interval).await;
                    GenerateEvent::Delta { text }
                });
                let done = stream::once(async move {
                    GenerateEvent::Done { text, finish_reason: Some("stop".into()) }
                });
                return Ok(Box::pin(deltas.chain(done)));
            }
            MockReply::Stall => return Ok(Box::pin(stream::pending::<GenerateEvent>())),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateStream, GenerationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(reply) => resolve(reply).await,
            None => Err(GenerationError::InvalidRequest(format!(
                "ScriptedGenerator: no reply configured for call {idx}"
            ))),
        }
    }
}

/// Answers by echoing the last user message word by word. For local runs without a model.
pub struct EchoGenerator {
    interval: Duration,
}

impl EchoGenerator {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(30))
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateStream, GenerationError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = format!("You said: {last_user}");
        let chunks: Vec<String> = reply.split_inclusive(' ').map(str::to_owned).collect();
        resolve(MockReply::Paced { chunks, interval: self.interval }).await
    }
}
