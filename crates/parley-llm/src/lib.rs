pub mod mock;
pub mod openai;
pub mod reliable;
pub mod sse;

pub use mock::{EchoGenerator, MockReply, ScriptedGenerator};
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use reliable::{ReliableConfig, ReliableGenerator};
