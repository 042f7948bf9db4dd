//! Router and conversation state types

use crate::error::ErrorRecord;
use crate::escalation::{escalate, EscalationEvaluator, EscalationLevel};
use crate::rate_limit::RateLimitCounter;
use crate::responder::Role;
use crate::rules::RuleSet;
use crate::tools::ToolInvocation;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

/// Default number of re-routes allowed within one turn
pub const DEFAULT_MAX_HOPS: u32 = 2;

// ============================================================================
// Router State
// ============================================================================

/// Per-turn router state. Every turn starts in `Routing` with zero hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    /// Choosing a responder. `requested` is set when a handoff re-entered routing.
    Routing { hops: u32, requested: Option<Role> },

    /// Waiting for the dispatched responder to reply
    Dispatched { role: Role, hops: u32 },

    /// Turn finished, reply delivered or fallback issued
    Done,
}

impl RouterState {
    pub fn initial() -> Self {
        RouterState::Routing {
            hops: 0,
            requested: None,
        }
    }

    pub fn hops(&self) -> Option<u32> {
        match self {
            RouterState::Routing { hops, .. } | RouterState::Dispatched { hops, .. } => Some(*hops),
            RouterState::Done => None,
        }
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        matches!(self, RouterState::Done)
    }
}

/// Immutable inputs to the transition function for one turn
#[derive(Debug, Clone)]
pub struct RouterContext {
    pub conversation_id: String,
    pub max_hops: u32,
    /// Sticky target stored by an earlier turn's handoff
    pub next_responder: Option<Role>,
    pub routing: Arc<RuleSet<Role>>,
    pub evaluator: Arc<EscalationEvaluator>,
}

impl RouterContext {
    pub fn new(
        conversation_id: impl Into<String>,
        routing: Arc<RuleSet<Role>>,
        evaluator: Arc<EscalationEvaluator>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            max_hops: DEFAULT_MAX_HOPS,
            next_responder: None,
            routing,
            evaluator,
        }
    }

    #[must_use]
    pub fn with_next_responder(mut self, role: Option<Role>) -> Self {
        self.next_responder = role;
        self
    }

    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }
}

// ============================================================================
// Conversation State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Responder,
    System,
}

/// One entry in the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Set for responder turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<Role>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            at: Utc::now(),
            responder: None,
        }
    }

    pub fn responder(role: Role, text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Responder,
            text: text.into(),
            at: Utc::now(),
            responder: Some(role),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            text: text.into(),
            at: Utc::now(),
            responder: None,
        }
    }
}

// "I will route you to...", "Let me delegate this to...", "I'll hand off..."
static META_COMMENTARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(i will|i'll|let me)\s+(route|delegate|transfer|hand ?-?off)")
        .expect("valid meta-commentary regex")
});

/// Persistent per-conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub current_responder: Option<Role>,
    #[serde(default)]
    pub next_responder: Option<Role>,
    /// Absent until something escalates; never decreases
    #[serde(default)]
    pub escalation_level: Option<EscalationLevel>,
    #[serde(default)]
    pub requires_human: bool,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitCounter>,
    #[serde(default)]
    pub tool_results: Vec<ToolInvocation>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            tenant_id: tenant_id.into(),
            turns: Vec::new(),
            current_responder: None,
            next_responder: None,
            escalation_level: None,
            requires_human: false,
            errors: Vec::new(),
            rate_limits: BTreeMap::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn level(&self) -> EscalationLevel {
        self.escalation_level.unwrap_or_default()
    }

    /// Raise the escalation level; lower levels are ignored
    pub fn escalate(&mut self, detected: EscalationLevel) {
        let level = escalate(self.level(), detected);
        self.escalation_level = level.as_option();
        if level.requires_human() {
            self.requires_human = true;
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    pub fn push_responder(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(Turn::responder(role, text));
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::system(text));
    }

    pub fn record_error(&mut self, error: ErrorRecord) {
        self.errors.push(error);
    }

    pub fn take_next_responder(&mut self) -> Option<Role> {
        self.next_responder.take()
    }

    /// Transcript handed to a responder: system notes dropped and routing
    /// meta-commentary removed from responder turns
    pub fn history_for_dispatch(&self) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|turn| turn.role != TurnRole::System)
            .filter_map(|turn| {
                if turn.role != TurnRole::Responder {
                    return Some(turn.clone());
                }
                let kept: Vec<&str> = turn
                    .text
                    .lines()
                    .filter(|line| !META_COMMENTARY_RE.is_match(line))
                    .collect();
                let text = kept.join("\n").trim().to_string();
                (!text.is_empty()).then(|| Turn {
                    text,
                    ..turn.clone()
                })
            })
            .collect()
    }
}
