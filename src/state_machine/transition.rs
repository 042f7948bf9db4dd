//! Pure router transition function
//!
//! Given the same state, context and event the result is always the same;
//! all I/O happens in the executor that applies the effects.

use super::{Effect, Event, RouterContext, RouterState};
use crate::error::ErrorKind;
use crate::escalation::EscalationLevel;
use crate::responder::{HandoffTiming, ResponderReply, Role};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: RouterState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: RouterState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &RouterState,
    context: &RouterContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Routing
        // ============================================================
        (RouterState::Routing { hops, requested }, Event::Route { text }) => {
            let mut effects = Vec::new();

            // User text is evaluated once per turn, before any backend call
            if *hops == 0 {
                let level = context.evaluator.detect(&text);
                if level > EscalationLevel::None {
                    effects.push(Effect::EscalateTo(level));
                }
            }

            let role = match (requested, context.next_responder) {
                (Some(role), _) => *role,
                (None, Some(sticky)) if *hops == 0 => {
                    effects.push(Effect::ConsumeNextResponder);
                    sticky
                }
                _ => context
                    .routing
                    .first_match(&text)
                    .copied()
                    .unwrap_or(Role::Coordinator),
            };

            effects.push(Effect::Dispatch { role, hops: *hops });
            Ok(TransitionResult::new(RouterState::Dispatched { role, hops: *hops })
                .with_effects(effects))
        }

        // ============================================================
        // Responder outcomes
        // ============================================================
        (RouterState::Dispatched { hops, .. }, Event::ResponderReplied { reply }) => {
            Ok(handle_reply(*hops, context, reply))
        }

        (RouterState::Dispatched { role, .. }, Event::ResponderFailed { error }) => {
            Ok(TransitionResult::new(RouterState::Done)
                .with_effect(Effect::Fallback { role: *role, error }))
        }

        // ============================================================
        // Everything else is a bug in the executor
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{state:?} cannot handle {}",
            event_name(&event)
        ))),
    }
}

/// Attribution follows the responder that produced `reply`, which differs
/// from the dispatched role when the coordinator stood in for it.
fn handle_reply(hops: u32, context: &RouterContext, reply: ResponderReply) -> TransitionResult {
    let role = reply.role;
    let mut effects = Vec::new();
    if !reply.tool_results.is_empty() {
        effects.push(Effect::AttachToolResults(reply.tool_results));
    }
    if !reply.errors.is_empty() {
        effects.push(Effect::RecordErrors(reply.errors));
    }
    if reply.escalation > EscalationLevel::None {
        effects.push(Effect::EscalateTo(reply.escalation));
    }

    let handoff = reply.handoff.filter(|h| h.role != role);

    if let Some(h) = handoff {
        if h.when == HandoffTiming::Now && hops < context.max_hops {
            effects.push(Effect::Note(format!("handoff {role} -> {}", h.role)));
            return TransitionResult::new(RouterState::Routing {
                hops: hops + 1,
                requested: Some(h.role),
            })
            .with_effects(effects);
        }
        if h.when == HandoffTiming::Now {
            effects.push(Effect::Note(format!(
                "hop limit reached, {} deferred to next turn",
                h.role
            )));
        }
        effects.push(Effect::SetNextResponder(h.role));
    }

    effects.push(Effect::SetCurrentResponder(role));
    if reply.text.trim().is_empty() {
        effects.push(Effect::fallback(
            role,
            ErrorKind::Internal,
            format!("{role} returned an empty reply"),
        ));
    } else {
        effects.push(Effect::Deliver {
            role,
            text: reply.text,
        });
    }
    TransitionResult::new(RouterState::Done).with_effects(effects)
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Route { .. } => "Route",
        Event::ResponderReplied { .. } => "ResponderReplied",
        Event::ResponderFailed { .. } => "ResponderFailed",
    }
}
