use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use parley_core::{Generator, Guardrail, Responder, ResponderId, RoutingError};
use parley_settings::RespondersSettings;

use crate::descriptor::ResponderDescriptor;
use crate::error::EngineError;
use crate::responders::{GenerationOptions, PersonaResponder};
use crate::router::Router;

/// The responders this service knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponderKind {
    Curriculum,
    Quizzer,
    Reviewer,
    General,
}

impl ResponderKind {
    pub const ALL: [ResponderKind; 4] = [Self::Curriculum, Self::Quizzer, Self::Reviewer, Self::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Curriculum => "curriculum",
            Self::Quizzer => "quizzer",
            Self::Reviewer => "reviewer",
            Self::General => "general",
        }
    }

    /// Used when the configured persona is blank.
    pub fn default_persona(&self) -> &'static str {
        match self {
            Self::Curriculum => "You help the learner plan what to study next and in which order.",
            Self::Quizzer => "You write practice questions, one at a time, and explain each answer.",
            Self::Reviewer => "You turn study material into a concise reviewer of key points.",
            Self::General => "You are a patient tutor. Answer clearly at the learner's level.",
        }
    }

    /// Reviewers should stay close to the source material.
    fn temperature_override(&self) -> Option<f64> {
        match self {
            Self::Reviewer => Some(0.3),
            _ => None,
        }
    }
}

impl fmt::Display for ResponderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponderKind {
    type Err = RoutingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| RoutingError::UnknownResponder(ResponderId::from(s)))
    }
}

/// Read-only map from responder id to capability. Built once at startup.
pub struct ResponderRegistry {
    responders: HashMap<ResponderId, Arc<dyn Responder>>,
    descriptors: Vec<ResponderDescriptor>,
    default_responder: ResponderId,
}

impl fmt::Debug for ResponderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderRegistry")
            .field("responders", &self.ids())
            .field("default_responder", &self.default_responder)
            .finish()
    }
}

impl ResponderRegistry {
    /// Build the persona responders named in `settings`. Any id outside
    /// [`ResponderKind`] is an error, as is a default with no descriptor.
    pub fn build(
        settings: &RespondersSettings,
        generator: Arc<dyn Generator>,
        guardrail: Option<Arc<dyn Guardrail>>,
        options: GenerationOptions,
    ) -> Result<Self, EngineError> {
        let mut builder = RegistryBuilder::new(settings.default_responder.as_str());
        for entry in &settings.descriptors {
            let kind: ResponderKind = entry.id.parse()?;
            let descriptor = ResponderDescriptor::from_settings(entry)?;
            let persona = if descriptor.persona.trim().is_empty() {
                kind.default_persona().to_string()
            } else {
                descriptor.persona.clone()
            };
            let options = GenerationOptions {
                temperature: kind.temperature_override().or(options.temperature),
                ..options
            };
            let mut responder = PersonaResponder::new(descriptor.id.clone(), persona, Arc::clone(&generator))
                .with_options(options);
            if let Some(guardrail) = &guardrail {
                responder = responder.with_guardrail(Arc::clone(guardrail));
            }
            builder = builder.register(descriptor, Arc::new(responder))?;
        }
        let registry = builder.build()?;
        info!(
            responders = ?registry.ids(),
            default = %registry.default_responder,
            model = generator.model(),
            "responder registry ready"
        );
        Ok(registry)
    }

    pub fn builder(default_responder: impl Into<ResponderId>) -> RegistryBuilder {
        RegistryBuilder::new(default_responder)
    }

    pub fn resolve(&self, id: &ResponderId) -> Result<Arc<dyn Responder>, RoutingError> {
        self.responders
            .get(id)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownResponder(id.clone()))
    }

    pub fn descriptor(&self, id: &ResponderId) -> Option<&ResponderDescriptor> {
        self.descriptors.iter().find(|d| &d.id == id)
    }

    /// In routing priority order.
    pub fn descriptors(&self) -> &[ResponderDescriptor] {
        &self.descriptors
    }

    pub fn default_responder(&self) -> &ResponderId {
        &self.default_responder
    }

    pub fn ids(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn router(&self) -> Router {
        Router::new(self.descriptors.clone(), self.default_responder.clone())
    }
}

/// Assembles a registry from explicit responders.
pub struct RegistryBuilder {
    registry: ResponderRegistry,
}

impl RegistryBuilder {
    fn new(default_responder: impl Into<ResponderId>) -> Self {
        Self {
            registry: ResponderRegistry {
                responders: HashMap::new(),
                descriptors: Vec::new(),
                default_responder: default_responder.into(),
            },
        }
    }

    pub fn register(mut self, descriptor: ResponderDescriptor, responder: Arc<dyn Responder>) -> Result<Self, EngineError> {
        if self.registry.responders.contains_key(&descriptor.id) {
            return Err(EngineError::Config(format!("duplicate responder id: {}", descriptor.id)));
        }
        self.registry.responders.insert(descriptor.id.clone(), responder);
        self.registry.descriptors.push(descriptor);
        Ok(self)
    }

    pub fn build(self) -> Result<ResponderRegistry, EngineError> {
        let default = &self.registry.default_responder;
        if !self.registry.responders.contains_key(default) {
            return Err(RoutingError::UnknownResponder(default.clone()).into());
        }
        Ok(self.registry)
    }
}
