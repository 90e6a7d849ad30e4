use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument};

use parley_core::{
    ChatMessage, Completion, ContextWindow, GenerateEvent, GenerationError, GenerationRequest,
    Generator, Guardrail, Responder, ResponderEvent, ResponderId, ResponseStream, Verdict,
};

/// Request knobs shared by every persona unless the persona overrides them.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// A responder defined by a system prompt over the shared generator.
pub struct PersonaResponder {
    id: ResponderId,
    persona: String,
    generator: Arc<dyn Generator>,
    guardrail: Option<Arc<dyn Guardrail>>,
    options: GenerationOptions,
}

impl PersonaResponder {
    pub fn new(id: ResponderId, persona: impl Into<String>, generator: Arc<dyn Generator>) -> Self {
        Self {
            id,
            persona: persona.into(),
            generator,
            guardrail: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrail = Some(guardrail);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn request(&self, context: &ContextWindow, message: &str) -> GenerationRequest {
        let mut messages = context.to_messages();
        messages.push(ChatMessage::user(message));
        GenerationRequest {
            system_prompt: (!self.persona.trim().is_empty()).then(|| self.persona.clone()),
            messages,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }
}

#[async_trait]
impl Responder for PersonaResponder {
    fn id(&self) -> &ResponderId {
        &self.id
    }

    #[instrument(skip_all, fields(responder = %self.id, history = context.len()))]
    async fn handle(&self, context: &ContextWindow, message: &str) -> Result<ResponseStream, GenerationError> {
        if let Some(guardrail) = &self.guardrail {
            if let Verdict::Reject { reason_code } = guardrail.check(message).await {
                debug!(%reason_code, "guardrail rejected message");
                return Err(GenerationError::GuardrailRejected { reason_code });
            }
        }

        let request = self.request(context, message);
        let mut events = self.generator.generate(&request).await?;
        let responder = self.id.to_string();
        let model = self.generator.model().to_string();

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    GenerateEvent::Delta { text } => yield ResponderEvent::Chunk { text },
                    GenerateEvent::Done { text, finish_reason } => {
                        let mut completion = Completion::new(text)
                            .with_meta("responder", responder.clone())
                            .with_meta("model", model.clone());
                        if let Some(reason) = finish_reason {
                            completion = completion.with_meta("finish_reason", reason);
                        }
                        yield ResponderEvent::Done { completion };
                        return;
                    }
                    GenerateEvent::Error { error } => {
                        yield ResponderEvent::Error { error };
                        return;
                    }
                }
            }
            yield ResponderEvent::Error {
                error: GenerationError::StreamInterrupted("generator stream ended without completion".into()),
            };
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ChatRole, SessionId, Turn, TurnId};
    use parley_llm::{MockReply, ScriptedGenerator};

    use crate::guardrail::KeywordGuardrail;

    async fn drain(stream: ResponseStream) -> Vec<ResponderEvent> {
        stream.collect().await
    }

    fn context() -> ContextWindow {
        let sid = SessionId::from_raw("s1");
        ContextWindow::new(
            sid.clone(),
            vec![
                Turn::user(sid.clone(), TurnId::new(1), "hi"),
                Turn::responder(sid, TurnId::new(2), "general".into(), "hello!"),
            ],
        )
        .with_summary(Some("learner studies biology"))
    }

    #[tokio::test]
    async fn maps_deltas_and_done() {
        let generator = Arc::new(ScriptedGenerator::new(vec![MockReply::text(&["a", "b"])]));
        let r = PersonaResponder::new("general".into(), "be nice", generator.clone());
        let events = drain(r.handle(&context(), "next?").await.unwrap()).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ResponderEvent::Chunk { text } if text == "a"));
        match &events[2] {
            ResponderEvent::Done { completion } => {
                assert_eq!(completion.content, "ab");
                assert_eq!(completion.metadata.get("responder").map(String::as_str), Some("general"));
                assert_eq!(completion.metadata.get("finish_reason").map(String::as_str), Some("stop"));
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_carries_persona_history_and_message() {
        let generator = Arc::new(ScriptedGenerator::new(vec![MockReply::text(&["ok"])]));
        let r = PersonaResponder::new("quizzer".into(), "ask questions", generator.clone())
            .with_options(GenerationOptions { max_tokens: Some(64), temperature: Some(0.5) });
        drain(r.handle(&context(), "quiz me").await.unwrap()).await;

        let req = &generator.requests()[0];
        assert_eq!(req.system_prompt.as_deref(), Some("ask questions"));
        assert_eq!(req.max_tokens, Some(64));
        let roles: Vec<ChatRole> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]);
        assert_eq!(req.messages.last().unwrap().content, "quiz me");
    }

    #[tokio::test]
    async fn guardrail_rejection_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::new(vec![MockReply::text(&["never"])]));
        let guardrail = Arc::new(KeywordGuardrail::new(&["forbidden topic".into()], 0).unwrap());
        let r = PersonaResponder::new("general".into(), "", generator.clone()).with_guardrail(guardrail);

        let err = r.handle(&ContextWindow::default(), "tell me the forbidden topic").await.err().unwrap();
        assert!(matches!(err, GenerationError::GuardrailRejected { ref reason_code } if reason_code == "blocked_term"));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn mid_stream_error_is_terminal() {
        let generator = Arc::new(ScriptedGenerator::new(vec![MockReply::fail_after(
            &["par"],
            GenerationError::Network("reset".into()),
        )]));
        let r = PersonaResponder::new("general".into(), "", generator);
        let events = drain(r.handle(&ContextWindow::default(), "hi").await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ResponderEvent::Error { error: GenerationError::Network(_) }));
    }

    #[tokio::test]
    async fn empty_persona_sends_no_system_prompt() {
        let generator = Arc::new(ScriptedGenerator::new(vec![MockReply::text(&["x"])]));
        let r = PersonaResponder::new("general".into(), "   ", generator.clone());
        drain(r.handle(&ContextWindow::default(), "hi").await.unwrap()).await;
        assert!(generator.requests()[0].system_prompt.is_none());
    }
}
