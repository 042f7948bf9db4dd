//! Responders
//!
//! A responder turns an enriched turn context into a reply for one role. All
//! built-in roles share [`SpecialistResponder`], parameterised by a
//! [`RoleDescriptor`].

mod role;
mod specialist;

pub use role::{default_descriptors, default_routing_rules, Role, RoleDescriptor};
pub use specialist::{SpecialistResponder, SpecialistSettings, HANDOFF_TOOL};

use crate::error::{ErrorRecord, TurnError};
use crate::escalation::EscalationLevel;
use crate::memory::ScoredInteraction;
use crate::state_machine::Turn;
use crate::tools::ToolInvocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// When a requested handoff takes effect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffTiming {
    /// Re-route within the current turn
    #[default]
    Now,
    /// Route the following turn to the target
    NextTurn,
}

/// A responder's request to pass the conversation to another role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub role: Role,
    #[serde(default)]
    pub when: HandoffTiming,
}

/// Everything a responder sees for one turn
#[derive(Debug, Clone)]
pub struct ResponderContext {
    pub conversation_id: String,
    pub tenant_id: String,
    /// Latest user message
    pub user_text: String,
    /// Earlier turns, meta-commentary removed, excluding `user_text`
    pub history: Vec<Turn>,
    pub escalation_level: EscalationLevel,
    pub similar: Vec<ScoredInteraction>,
    pub cancel: CancellationToken,
}

/// A responder's output for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderReply {
    pub role: Role,
    /// User-visible text, escalation markers already stripped
    pub text: String,
    pub escalation: EscalationLevel,
    pub handoff: Option<Handoff>,
    pub tool_results: Vec<ToolInvocation>,
    /// Tool failures the reply works around
    pub errors: Vec<ErrorRecord>,
    /// Completion calls made, retries included
    pub attempts: u32,
}

impl ResponderReply {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            escalation: EscalationLevel::None,
            handoff: None,
            tool_results: Vec::new(),
            errors: Vec::new(),
            attempts: 1,
        }
    }

    #[must_use]
    pub fn with_handoff(mut self, role: Role, when: HandoffTiming) -> Self {
        self.handoff = Some(Handoff { role, when });
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, level: EscalationLevel) -> Self {
        self.escalation = level;
        self
    }
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn role(&self) -> Role;

    async fn process(&self, ctx: &ResponderContext) -> Result<ResponderReply, TurnError>;
}

#[async_trait]
impl<T: Responder + ?Sized> Responder for Arc<T> {
    fn role(&self) -> Role {
        (**self).role()
    }

    async fn process(&self, ctx: &ResponderContext) -> Result<ResponderReply, TurnError> {
        (**self).process(ctx).await
    }
}

/// Responders keyed by role
#[derive(Default, Clone)]
pub struct ResponderSet {
    responders: HashMap<Role, Arc<dyn Responder>>,
}

impl ResponderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, responder: Arc<dyn Responder>) {
        self.responders.insert(responder.role(), responder);
    }

    #[must_use]
    pub fn with(mut self, responder: Arc<dyn Responder>) -> Self {
        self.insert(responder);
        self
    }

    /// Responder for `role`, falling back to the coordinator
    pub fn get(&self, role: Role) -> Option<Arc<dyn Responder>> {
        self.responders
            .get(&role)
            .or_else(|| self.responders.get(&Role::Coordinator))
            .cloned()
    }

    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.responders.keys().copied().collect();
        roles.sort();
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Role);

    #[async_trait]
    impl Responder for Fixed {
        fn role(&self) -> Role {
            self.0
        }

        async fn process(&self, _ctx: &ResponderContext) -> Result<ResponderReply, TurnError> {
            Ok(ResponderReply::text(self.0, "hi"))
        }
    }

    #[test]
    fn test_missing_role_falls_back_to_coordinator() {
        let set = ResponderSet::new()
            .with(Arc::new(Fixed(Role::Coordinator)))
            .with(Arc::new(Fixed(Role::Billing)));
        assert_eq!(set.get(Role::Billing).unwrap().role(), Role::Billing);
        assert_eq!(set.get(Role::Medical).unwrap().role(), Role::Coordinator);
        assert_eq!(set.roles(), vec![Role::Coordinator, Role::Billing]);

        let empty = ResponderSet::new();
        assert!(empty.get(Role::Coordinator).is_none());
    }

    #[test]
    fn test_handoff_wire_format() {
        let handoff: Handoff = serde_json::from_str(r#"{"role": "scheduling"}"#).unwrap();
        assert_eq!(handoff.when, HandoffTiming::Now);
        let handoff: Handoff =
            serde_json::from_str(r#"{"role": "billing", "when": "next_turn"}"#).unwrap();
        assert_eq!(handoff.role, Role::Billing);
        assert_eq!(handoff.when, HandoffTiming::NextTurn);
    }
}
