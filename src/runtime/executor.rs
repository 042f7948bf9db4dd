//! Turn executor
//!
//! Drives the router state machine for one turn, performing the effects it
//! emits against the conversation state and the responder set.

use crate::error::{ErrorKind, ErrorRecord, TurnError};
use crate::escalation::EscalationEvaluator;
use crate::memory::ScoredInteraction;
use crate::responder::{ResponderContext, ResponderSet, Role};
use crate::rules::RuleSet;
use crate::state_machine::{
    transition, ConversationState, Effect, Event, RouterContext, RouterState, DEFAULT_MAX_HOPS,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Safe reply used whenever a turn cannot produce a responder reply
pub const FALLBACK_REPLY: &str = "I'm sorry, I'm having trouble answering right now. \
     A member of our team will follow up with you shortly.";

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub responder: Role,
    /// The reply is the fallback message rather than responder output
    pub fallback: bool,
}

/// Runs the router for a single turn
pub struct TurnExecutor {
    responders: ResponderSet,
    routing: Arc<RuleSet<Role>>,
    evaluator: Arc<EscalationEvaluator>,
    max_hops: u32,
}

impl TurnExecutor {
    pub fn new(
        responders: ResponderSet,
        routing: Arc<RuleSet<Role>>,
        evaluator: Arc<EscalationEvaluator>,
    ) -> Self {
        Self {
            responders,
            routing,
            evaluator,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Run one turn for `user_text`, mutating `state`.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires; the caller must then
    /// discard `state`. Every other failure ends in a fallback outcome.
    #[allow(clippy::too_many_lines)]
    pub async fn run(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        similar: Vec<ScoredInteraction>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let context = RouterContext::new(
            state.conversation_id.clone(),
            Arc::clone(&self.routing),
            Arc::clone(&self.evaluator),
        )
        .with_max_hops(self.max_hops)
        .with_next_responder(state.next_responder);

        let history = state.history_for_dispatch();
        state.push_user(user_text);

        let mut router = RouterState::initial();
        let mut event = Event::Route {
            text: user_text.to_string(),
        };
        let mut outcome = None;

        loop {
            let result = transition(&router, &context, event)
                .map_err(|e| TurnError::Internal(e.to_string()))?;
            router = result.new_state;

            let mut next_event = None;
            for effect in result.effects {
                match effect {
                    Effect::EscalateTo(level) => {
                        let before = state.level();
                        state.escalate(level);
                        if state.level() > before {
                            tracing::warn!(
                                conv_id = %state.conversation_id,
                                from = %before,
                                to = %state.level(),
                                requires_human = state.requires_human,
                                "Conversation escalated"
                            );
                        }
                    }
                    Effect::ConsumeNextResponder => {
                        state.take_next_responder();
                    }
                    Effect::Dispatch { role, hops } => {
                        let ctx = ResponderContext {
                            conversation_id: state.conversation_id.clone(),
                            tenant_id: state.tenant_id.clone(),
                            user_text: user_text.to_string(),
                            history: history.clone(),
                            escalation_level: state.level(),
                            similar: similar.clone(),
                            cancel: cancel.clone(),
                        };
                        next_event = Some(self.dispatch(role, hops, &ctx).await?);
                    }
                    Effect::SetCurrentResponder(role) => state.current_responder = Some(role),
                    Effect::SetNextResponder(role) => state.next_responder = Some(role),
                    Effect::AttachToolResults(results) => state.tool_results.extend(results),
                    Effect::RecordErrors(errors) => {
                        for error in errors {
                            state.record_error(error);
                        }
                    }
                    Effect::Note(note) => state.push_system(note),
                    Effect::Deliver { role, text } => {
                        state.push_responder(role, text.clone());
                        outcome = Some(TurnOutcome {
                            reply: text,
                            responder: role,
                            fallback: false,
                        });
                    }
                    Effect::Fallback { role, error } => {
                        tracing::error!(
                            conv_id = %state.conversation_id,
                            %role,
                            kind = ?error.kind,
                            error = %error.message,
                            "Turn fell back to safe reply"
                        );
                        state.record_error(error);
                        state.push_responder(role, FALLBACK_REPLY);
                        outcome = Some(TurnOutcome {
                            reply: FALLBACK_REPLY.to_string(),
                            responder: role,
                            fallback: true,
                        });
                    }
                }
            }

            event = match &router {
                RouterState::Done => {
                    return outcome.ok_or_else(|| {
                        TurnError::Internal("router finished without a reply".to_string())
                    });
                }
                RouterState::Routing { .. } => Event::Route {
                    text: user_text.to_string(),
                },
                RouterState::Dispatched { .. } => next_event.ok_or_else(|| {
                    TurnError::Internal("dispatched without invoking a responder".to_string())
                })?,
            };
        }
    }

    /// Invoke the responder for `role`, mapping its result to a router event
    async fn dispatch(&self, role: Role, hops: u32, ctx: &ResponderContext) -> Result<Event, TurnError> {
        let Some(responder) = self.responders.get(role) else {
            return Ok(Event::ResponderFailed {
                error: ErrorRecord::new(ErrorKind::Internal, format!("no responder for {role}")),
            });
        };
        tracing::info!(conv_id = %ctx.conversation_id, %role, actual = %responder.role(), hops, "Dispatching responder");

        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(TurnError::Cancelled),
            result = responder.process(ctx) => result,
        };

        match result {
            Ok(reply) => Ok(Event::ResponderReplied { reply }),
            Err(TurnError::Cancelled) => Err(TurnError::Cancelled),
            Err(e) => Ok(Event::ResponderFailed {
                error: e.to_record(),
            }),
        }
    }
}
