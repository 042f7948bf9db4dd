//! Mock implementations for testing
//!
//! These mocks let the responder, executor and orchestrator be exercised
//! without a completion backend or a database.

use crate::error::TurnError;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::memory::{
    InteractionRecord, MemoryBackend, MemoryError, PatternObservation, PatternStat,
    SimilarityEdge,
};
use crate::responder::{Responder, ResponderContext, ResponderReply, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Completion backend that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse::from_text(text));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::invalid_request("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Scripted Responder
// ============================================================================

/// Responder returning queued replies, optionally after a delay
pub struct ScriptedResponder {
    role: Role,
    script: Mutex<VecDeque<Result<ResponderReply, TurnError>>>,
    delay: Duration,
    calls: AtomicUsize,
    /// Contexts the responder was invoked with
    pub contexts: Mutex<Vec<ResponderContext>>,
}

impl ScriptedResponder {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queue_reply(&self, reply: ResponderReply) {
        self.script.lock().unwrap().push_back(Ok(reply));
    }

    pub fn queue_error(&self, error: TurnError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<ResponderContext> {
        self.contexts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn role(&self) -> Role {
        self.role
    }

    async fn process(&self, ctx: &ResponderContext) -> Result<ResponderReply, TurnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(ctx.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ResponderReply::text(self.role, format!("{} here", self.role))))
    }
}

// ============================================================================
// Failing Memory Backend
// ============================================================================

/// Memory backend whose every call fails
pub struct FailingMemoryBackend;

fn unavailable() -> MemoryError {
    MemoryError::Backend("store unavailable".to_string())
}

#[async_trait]
impl MemoryBackend for FailingMemoryBackend {
    async fn recent_interactions(
        &self,
        _tenant: Option<&str>,
        _since: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError> {
        Err(unavailable())
    }

    async fn commit_interaction(
        &self,
        _record: &InteractionRecord,
        _edges: &[SimilarityEdge],
        _observations: &[PatternObservation],
    ) -> Result<(), MemoryError> {
        Err(unavailable())
    }

    async fn get_interaction(&self, _id: &str) -> Result<Option<InteractionRecord>, MemoryError> {
        Err(unavailable())
    }

    async fn edges_from(&self, _id: &str) -> Result<Vec<SimilarityEdge>, MemoryError> {
        Err(unavailable())
    }

    async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError> {
        Err(unavailable())
    }
}

// ============================================================================
// Orchestrator Builder
// ============================================================================

/// Orchestrator over in-memory stores and the built-in rule tables
pub fn orchestrator(
    responders: crate::responder::ResponderSet,
    rate_limit: crate::rate_limit::RateLimitConfig,
) -> super::Orchestrator {
    use crate::escalation::EscalationEvaluator;
    use crate::responder::default_routing_rules;
    use crate::rules::RuleSet;
    use std::sync::Arc;

    let executor = super::TurnExecutor::new(
        responders,
        Arc::new(RuleSet::compile(&default_routing_rules()).unwrap()),
        Arc::new(EscalationEvaluator::default()),
    );
    super::Orchestrator::new(
        Arc::new(super::InMemoryConversationStore::new()),
        Arc::new(crate::rate_limit::RateLimiter::new(rate_limit)),
        Arc::new(crate::memory::CausalMemory::in_memory()),
        executor,
    )
}

/// One completion-backed specialist per role, all sharing `llm`.
///
/// Retries are immediate and clinic records live in process.
pub fn specialist_responders(llm: std::sync::Arc<MockLlmService>) -> crate::responder::ResponderSet {
    use crate::escalation::EscalationEvaluator;
    use crate::llm::{RetryController, RetryPolicy};
    use crate::responder::{default_descriptors, ResponderSet, SpecialistResponder, SpecialistSettings};
    use crate::tools::{InMemoryClinic, ToolRegistry};
    use std::sync::Arc;

    let tools = Arc::new(ToolRegistry::clinic(Arc::new(InMemoryClinic::new())));
    let evaluator = EscalationEvaluator::default();
    default_descriptors()
        .into_iter()
        .fold(ResponderSet::new(), |set, descriptor| {
            set.with(Arc::new(
                SpecialistResponder::new(
                    descriptor,
                    llm.clone(),
                    Arc::clone(&tools),
                    RetryController::new(RetryPolicy::immediate(3)),
                    &evaluator,
                    SpecialistSettings::default(),
                )
                .unwrap(),
            ))
        })
}
