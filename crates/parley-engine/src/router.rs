//! Responder selection.
//!
//! Priority, highest first:
//! 1. an explicit, registered hint from the client
//! 2. a keyword match on a responder other than the active one, when the
//!    active responder's own keywords do not also match (topic switch)
//! 3. the session's active responder (sticky)
//! 4. the first keyword match, for a session with no active responder
//! 5. the default responder

use std::fmt;

use tracing::{debug, warn};

use parley_core::{ResponderId, RoutingError, Session};

use crate::descriptor::ResponderDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteReason {
    Explicit,
    Switched,
    Sticky,
    Classified,
    Default,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Switched => "switched",
            Self::Sticky => "sticky",
            Self::Classified => "classified",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub responder_id: ResponderId,
    pub reason: RouteReason,
}

/// Deterministic over (active responder, message, hint). Holds no mutable state.
#[derive(Clone, Debug)]
pub struct Router {
    descriptors: Vec<ResponderDescriptor>,
    default_responder: ResponderId,
}

impl Router {
    /// `descriptors` must be in priority order.
    pub fn new(descriptors: Vec<ResponderDescriptor>, default_responder: ResponderId) -> Self {
        Self { descriptors, default_responder }
    }

    pub fn default_responder(&self) -> &ResponderId {
        &self.default_responder
    }

    pub fn is_registered(&self, id: &ResponderId) -> bool {
        self.descriptors.iter().any(|d| &d.id == id)
    }

    /// First non-default responder whose keywords occur in `message`.
    pub fn classify(&self, message: &str) -> Result<&ResponderId, RoutingError> {
        self.descriptors
            .iter()
            .filter(|d| d.id != self.default_responder)
            .find(|d| d.matches(message))
            .map(|d| &d.id)
            .ok_or(RoutingError::NoMatchingResponder)
    }

    /// Pick the responder for `message` and record it as the session's active responder.
    pub fn select(&self, session: &mut Session, message: &str, hint: Option<&ResponderId>) -> Route {
        let route = self.decide(session.active_responder_id.as_ref(), message, hint);
        if session.set_active_responder(route.responder_id.clone()) {
            debug!(
                session_id = %session.session_id,
                responder = %route.responder_id,
                reason = %route.reason,
                "active responder changed"
            );
        }
        route
    }

    fn matches_responder(&self, id: &ResponderId, message: &str) -> bool {
        self.descriptors.iter().any(|d| &d.id == id && d.matches(message))
    }

    fn decide(&self, active: Option<&ResponderId>, message: &str, hint: Option<&ResponderId>) -> Route {
        if let Some(hint) = hint {
            if self.is_registered(hint) {
                return Route { responder_id: hint.clone(), reason: RouteReason::Explicit };
            }
            warn!(responder = %hint, "ignoring unknown responder hint");
        }

        let active = active.filter(|id| self.is_registered(id));
        match (active, self.classify(message)) {
            (Some(active), Ok(matched)) if matched != active && !self.matches_responder(active, message) => {
                Route { responder_id: matched.clone(), reason: RouteReason::Switched }
            }
            (Some(active), _) => Route { responder_id: active.clone(), reason: RouteReason::Sticky },
            (None, Ok(matched)) => Route { responder_id: matched.clone(), reason: RouteReason::Classified },
            (None, Err(_)) => Route {
                responder_id: self.default_responder.clone(),
                reason: RouteReason::Default,
            },
        }
    }
}
