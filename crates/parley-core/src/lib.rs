pub mod alert;
pub mod context;
pub mod errors;
pub mod generate;
pub mod guardrail;
pub mod ids;
pub mod responder;
pub mod session;
pub mod turn;
pub mod wire;

pub use alert::{Alert, AlertKind, AlertSink};
pub use context::ContextWindow;
pub use errors::{GenerationError, RoutingError};
pub use generate::{ChatMessage, ChatRole, GenerateEvent, GenerateStream, GenerationRequest, Generator};
pub use guardrail::{AllowAll, Guardrail, Verdict};
pub use ids::{ConnectionId, ResponderId, SessionId, TurnId, UserId};
pub use responder::{Completion, Responder, ResponderEvent, ResponseStream};
pub use session::{Session, SessionStatus, DEFAULT_SESSION_TITLE};
pub use turn::{Role, Turn};
pub use wire::{ClientFrame, FrameSink, ServerFrame, SinkError};
