//! Settings type definitions. camelCase JSON, every section defaultable.

mod conversation;
mod generator;
mod responders;
mod server;
mod store;

pub use conversation::*;
pub use generator::*;
pub use responders::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};

/// Root settings, loaded from `~/.parley/settings.json` over compiled defaults.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "conversation": { "contextWindow": 4, "partialPolicy": "persist_partial" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub conversation: ConversationSettings,
    pub responders: RespondersSettings,
    pub generator: GeneratorSettings,
    pub guardrail: GuardrailSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ParleySettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.conversation.context_window, 8);
        assert_eq!(s.conversation.partial_policy, PartialPolicy::Discard);
        assert_eq!(s.responders.default_responder, "general");
        assert_eq!(s.responders.descriptors.len(), 4);
        assert!(s.responders.find("quizzer").is_some());
        assert!(s.store.retry.max_attempts >= 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ParleySettings =
            serde_json::from_str(r#"{"conversation":{"contextWindow":2}}"#).unwrap();
        assert_eq!(s.conversation.context_window, 2);
        assert_eq!(s.conversation.session_expiry_hours, 72);
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert!(json["conversation"].get("contextWindow").is_some());
        assert!(json["responders"].get("defaultResponder").is_some());
        assert_eq!(json["conversation"]["partialPolicy"], "discard");
    }

    #[test]
    fn partial_policy_parse() {
        assert_eq!("persist_partial".parse::<PartialPolicy>().unwrap(), PartialPolicy::PersistPartial);
        assert!("keep".parse::<PartialPolicy>().is_err());
    }
}
