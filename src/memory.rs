//! Causal memory store
//!
//! A graph of past interactions: every completed turn is embedded and linked
//! to similar recent turns, and pattern detectors keep running success rates.
//! Retrieval feeds similar past interactions into the next responder's prompt.
//!
//! Memory is an enhancement, never a dependency: callers continue the turn
//! when these operations fail and note the failure on the conversation.

mod backend;
mod embedding;
mod patterns;
mod record;
mod similarity;

pub use backend::{InMemoryBackend, MemoryBackend};
pub use embedding::{Embedder, HashingEmbedder};
pub use patterns::{default_detectors, running_mean, PatternDetector};
pub use record::{
    InteractionRecord, NewInteraction, Outcome, PatternObservation, PatternStat,
    ScoredInteraction, SimilarityEdge,
};
pub use similarity::cosine;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Memory backend error: {0}")]
    Backend(String),
}

/// Thresholds and scan windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryConfig {
    /// Minimum cosine for a similarity edge (inclusive)
    pub edge_threshold: f32,
    /// Records scanned for edges on insertion
    pub edge_window: usize,
    /// Minimum cosine for a retrieval hit (inclusive)
    pub retrieve_threshold: f32,
    /// How far back retrieval looks
    pub retrieve_max_age: Duration,
    /// Records scanned per retrieval
    pub retrieve_cap: usize,
    /// Only retrieve interactions from the caller's tenant
    pub tenant_scoped: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.8,
            edge_window: 100,
            retrieve_threshold: 0.7,
            retrieve_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            retrieve_cap: 500,
            tenant_scoped: true,
        }
    }
}

/// Causal memory service over a pluggable backend and embedder
pub struct CausalMemory {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn Embedder>,
    detector: PatternDetector,
    config: MemoryConfig,
    /// Per-tenant write locks so edge scans see every earlier commit
    tenant_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CausalMemory {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn Embedder>,
        detector: PatternDetector,
        config: MemoryConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            detector,
            config,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store with the default embedder and detectors
    pub fn in_memory() -> Self {
        let detector = PatternDetector::new(&default_detectors()).unwrap_or_default();
        Self::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashingEmbedder::default()),
            detector,
            MemoryConfig::default(),
        )
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    async fn tenant_lock(&self, tenant: &str) -> Arc<Mutex<()>> {
        let mut locks = self.tenant_locks.lock().await;
        locks
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a completed turn, returning its id.
    ///
    /// Record, edges and pattern increments commit together or not at all.
    pub async fn record_interaction(
        &self,
        interaction: NewInteraction,
    ) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed(&interaction.source_text).await?;

        let lock = self.tenant_lock(&interaction.tenant_id).await;
        let _guard = lock.lock().await;

        let window = self
            .backend
            .recent_interactions(Some(&interaction.tenant_id), None, self.config.edge_window)
            .await?;

        let id = uuid::Uuid::new_v4().to_string();
        let edges: Vec<SimilarityEdge> = window
            .iter()
            .filter_map(|existing| {
                let score = cosine(&embedding, &existing.embedding);
                (score >= self.config.edge_threshold).then(|| SimilarityEdge {
                    from_id: id.clone(),
                    to_id: existing.id.clone(),
                    score,
                })
            })
            .collect();

        let observed = interaction.outcome.success_value();
        let observations: Vec<PatternObservation> = self
            .detector
            .detect(&interaction.source_text)
            .into_iter()
            .map(|pattern| PatternObservation { pattern, observed })
            .collect();

        let record = InteractionRecord {
            id: id.clone(),
            source_text: interaction.source_text,
            response_text: interaction.response_text,
            responder: interaction.responder,
            conversation_id: interaction.conversation_id,
            tenant_id: interaction.tenant_id,
            outcome: interaction.outcome,
            embedding,
            created_at: Utc::now(),
            metadata: interaction.metadata,
        };

        self.backend
            .commit_interaction(&record, &edges, &observations)
            .await?;

        tracing::debug!(
            interaction_id = %id,
            tenant = %record.tenant_id,
            edges = edges.len(),
            patterns = observations.len(),
            "Recorded interaction"
        );
        Ok(id)
    }

    /// Past interactions similar to `query`, most similar first
    pub async fn retrieve_similar(
        &self,
        query: &str,
        tenant: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredInteraction>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let since = chrono::Duration::from_std(self.config.retrieve_max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let tenant = if self.config.tenant_scoped { tenant } else { None };

        let candidates = self
            .backend
            .recent_interactions(tenant, since, self.config.retrieve_cap)
            .await?;

        let mut hits: Vec<ScoredInteraction> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = cosine(&embedding, &record.embedding);
                (similarity >= self.config.retrieve_threshold)
                    .then_some(ScoredInteraction { record, similarity })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError> {
        self.backend.pattern_stats().await
    }

    pub async fn edges_from(&self, id: &str) -> Result<Vec<SimilarityEdge>, MemoryError> {
        self.backend.edges_from(id).await
    }

    pub async fn get_interaction(
        &self,
        id: &str,
    ) -> Result<Option<InteractionRecord>, MemoryError> {
        self.backend.get_interaction(id).await
    }
}
