//! Conversation orchestrator
//!
//! Public entry point for inbound messages: admit, enrich, route, persist,
//! record, reply. Turns on the same conversation are serialised in arrival
//! order; different conversations run in parallel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{TurnExecutor, TurnOutcome, FALLBACK_REPLY};
pub use traits::*;

use crate::error::{ErrorKind, ErrorRecord, TurnError};
use crate::escalation::EscalationLevel;
use crate::memory::{CausalMemory, MemoryError, NewInteraction, Outcome};
use crate::rate_limit::RateLimiter;
use crate::responder::Role;
use crate::state_machine::ConversationState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Reply for empty or whitespace-only messages
pub const CLARIFY_REPLY: &str =
    "Sorry, I didn't catch that. Could you tell me a little more about what you need?";

/// Reply for a turn interrupted by `end_conversation`
pub const ENDED_REPLY: &str = "This conversation has ended.";

/// Default number of similar past interactions handed to a responder
pub const DEFAULT_SIMILAR_LIMIT: usize = 3;

/// One inbound message from a channel
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub text: String,
}

/// What the channel sends back to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub reply: String,
    pub responder: Role,
    pub requires_human: bool,
    pub escalation_level: Option<EscalationLevel>,
    /// Similar past interactions that informed this turn
    pub similar_used: usize,
}

impl TurnReply {
    fn new(state: &ConversationState, reply: impl Into<String>, responder: Role, similar_used: usize) -> Self {
        Self {
            reply: reply.into(),
            responder,
            requires_human: state.requires_human,
            escalation_level: state.escalation_level,
            similar_used,
        }
    }
}

/// Per-conversation serialisation and cancellation
struct ConversationSlot {
    lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl ConversationSlot {
    fn new() -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Holds a conversation's slot for one turn.
///
/// On drop the slot leaves the map unless another turn is queued on it.
struct SlotLease<'a> {
    slots: &'a Mutex<HashMap<String, Arc<ConversationSlot>>>,
    conv_id: String,
    slot: Arc<ConversationSlot>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .get(&self.conv_id)
            .is_some_and(|held| Arc::ptr_eq(held, &self.slot) && Arc::strong_count(held) == 2);
        if idle {
            slots.remove(&self.conv_id);
        }
    }
}

/// Owns conversation state and drives turns end to end
pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    limiter: Arc<RateLimiter>,
    memory: Arc<CausalMemory>,
    executor: TurnExecutor,
    similar_limit: usize,
    slots: Mutex<HashMap<String, Arc<ConversationSlot>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        limiter: Arc<RateLimiter>,
        memory: Arc<CausalMemory>,
        executor: TurnExecutor,
    ) -> Self {
        Self {
            store,
            limiter,
            memory,
            executor,
            similar_limit: DEFAULT_SIMILAR_LIMIT,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_similar_limit(mut self, limit: usize) -> Self {
        self.similar_limit = limit;
        self
    }

    pub fn memory(&self) -> &Arc<CausalMemory> {
        &self.memory
    }

    fn slot(&self, conv_id: &str) -> SlotLease<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(
            slots
                .entry(conv_id.to_string())
                .or_insert_with(|| Arc::new(ConversationSlot::new())),
        );
        SlotLease {
            slots: &self.slots,
            conv_id: conv_id.to_string(),
            slot,
        }
    }

    #[cfg(test)]
    fn active_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Process one inbound message.
    ///
    /// Only `RateLimitExceeded` is returned as an error; every other failure
    /// is recorded on the conversation and answered with a safe reply.
    pub async fn handle_message(&self, msg: InboundMessage) -> Result<TurnReply, TurnError> {
        let now = Utc::now();
        let admission = self.limiter.admit(&msg.user_id, now).await;
        if !admission.allowed {
            tracing::warn!(
                conv_id = %msg.conversation_id,
                user = %msg.user_id,
                retry_after_ms = admission.retry_after.as_millis(),
                "Rate limit exceeded"
            );
            return Err(TurnError::RateLimitExceeded {
                retry_after: admission.retry_after,
            });
        }

        let lease = self.slot(&msg.conversation_id);
        let _guard = lease.slot.lock.lock().await;
        let cancel = lease.slot.cancel.clone();

        let mut state = self.load_or_create(&msg).await;
        if cancel.is_cancelled() {
            return Ok(TurnReply::new(&state, ENDED_REPLY, Role::Coordinator, 0));
        }
        let snapshot = self.limiter.snapshot(&msg.user_id, now).await;
        state.rate_limits.insert(msg.user_id.clone(), snapshot);

        let text = msg.text.trim();
        if text.is_empty() {
            let error = TurnError::Validation("message text is empty".to_string());
            tracing::info!(conv_id = %msg.conversation_id, "Empty message, asking for clarification");
            state.record_error(error.to_record());
            let responder = state.current_responder.unwrap_or(Role::Coordinator);
            self.persist(&state).await;
            return Ok(TurnReply::new(&state, CLARIFY_REPLY, responder, 0));
        }

        tracing::info!(conv_id = %msg.conversation_id, tenant = %msg.tenant_id, "Turn started");

        let similar = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(TurnReply::new(&state, ENDED_REPLY, Role::Coordinator, 0));
            }
            similar = self.memory.retrieve_similar(text, Some(&msg.tenant_id), self.similar_limit) => similar,
        };
        let similar = similar.unwrap_or_else(|e| {
            tracing::warn!(conv_id = %msg.conversation_id, error = %e, "Similarity retrieval failed, continuing without memory");
            state.record_error(TurnError::MemoryStore(e.to_string()).to_record());
            Vec::new()
        });
        let similar_used = similar.len();

        let outcome = match self.executor.run(&mut state, text, similar, &cancel).await {
            Ok(outcome) => outcome,
            Err(TurnError::Cancelled) => {
                tracing::info!(conv_id = %msg.conversation_id, "Turn cancelled, discarding");
                return Ok(TurnReply::new(&state, ENDED_REPLY, Role::Coordinator, 0));
            }
            Err(e) => {
                tracing::error!(conv_id = %msg.conversation_id, error = %e, "Turn failed");
                state.record_error(e.to_record());
                state.push_responder(Role::Coordinator, FALLBACK_REPLY);
                TurnOutcome {
                    reply: FALLBACK_REPLY.to_string(),
                    responder: Role::Coordinator,
                    fallback: true,
                }
            }
        };

        if let Err(e) = self.record(&msg, text, &outcome, &state, similar_used).await {
            tracing::warn!(conv_id = %msg.conversation_id, error = %e, "Failed to record interaction");
            state.record_error(TurnError::MemoryStore(e.to_string()).to_record());
        }
        self.persist(&state).await;

        tracing::info!(
            conv_id = %msg.conversation_id,
            responder = %outcome.responder,
            fallback = outcome.fallback,
            escalation = %state.level(),
            similar_used,
            "Turn complete"
        );
        Ok(TurnReply::new(&state, outcome.reply, outcome.responder, similar_used))
    }

    async fn load_or_create(&self, msg: &InboundMessage) -> ConversationState {
        match self.store.load(&msg.conversation_id).await {
            Ok(Some(state)) => state,
            Ok(None) => ConversationState::new(&msg.conversation_id, &msg.tenant_id),
            Err(e) => {
                tracing::error!(conv_id = %msg.conversation_id, error = %e, "Failed to load conversation, starting fresh");
                let mut state = ConversationState::new(&msg.conversation_id, &msg.tenant_id);
                state.record_error(ErrorRecord::new(
                    ErrorKind::Internal,
                    format!("failed to load conversation: {e}"),
                ));
                state
            }
        }
    }

    async fn persist(&self, state: &ConversationState) {
        if let Err(e) = self.store.save(state).await {
            tracing::error!(conv_id = %state.conversation_id, error = %e, "Failed to persist conversation");
        }
    }

    async fn record(
        &self,
        msg: &InboundMessage,
        text: &str,
        outcome: &TurnOutcome,
        state: &ConversationState,
        similar_used: usize,
    ) -> Result<String, MemoryError> {
        let result = if outcome.fallback {
            Outcome::Failure
        } else if state.level().requires_human() {
            Outcome::Escalated
        } else {
            Outcome::Success
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), msg.user_id.clone());
        metadata.insert("escalation_level".to_string(), state.level().to_string());
        metadata.insert("similar_used".to_string(), similar_used.to_string());

        self.memory
            .record_interaction(NewInteraction {
                source_text: text.to_string(),
                response_text: outcome.reply.clone(),
                responder: outcome.responder.to_string(),
                conversation_id: msg.conversation_id.clone(),
                tenant_id: msg.tenant_id.clone(),
                outcome: result,
                metadata,
            })
            .await
    }

    /// Cancel any in-flight turn and drop the conversation's slot.
    ///
    /// Returns `false` if the conversation is unknown.
    pub async fn end_conversation(&self, conv_id: &str) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conv_id);
        if let Some(slot) = &slot {
            slot.cancel.cancel();
            tracing::info!(conv_id, "Conversation ended");
        }
        let stored = matches!(self.store.load(conv_id).await, Ok(Some(_)));
        slot.is_some() || stored
    }

    pub async fn get_conversation(&self, conv_id: &str) -> Result<Option<ConversationState>, String> {
        self.store.load(conv_id).await
    }
}
