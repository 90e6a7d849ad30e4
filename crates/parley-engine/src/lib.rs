//! Routing, context assembly and the streaming/commit state machine.

pub mod context;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod guardrail;
pub mod registry;
pub mod responders;
pub mod router;
pub mod sequencer;

pub use context::ContextBuilder;
pub use coordinator::{
    CoordinatorConfig, Exchange, ExchangeOutcome, ExchangePhase, HistoryPage, PendingCommit, StreamCoordinator, StreamState,
};
pub use descriptor::ResponderDescriptor;
pub use error::EngineError;
pub use guardrail::KeywordGuardrail;
pub use registry::{RegistryBuilder, ResponderKind, ResponderRegistry};
pub use responders::{GenerationOptions, PersonaResponder};
pub use router::{Route, RouteReason, Router};
pub use sequencer::{CommitSequencer, CommitTicket};
