//! Persistence contract for the interaction graph

use super::patterns::running_mean;
use super::record::{InteractionRecord, PatternObservation, PatternStat, SimilarityEdge};
use super::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage for interaction records, similarity edges and pattern statistics
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Most recent records, newest first.
    ///
    /// `tenant` restricts the scan to one tenant; `since` drops older records.
    async fn recent_interactions(
        &self,
        tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError>;

    /// Insert the record, its outgoing edges and the pattern increments as one unit
    async fn commit_interaction(
        &self,
        record: &InteractionRecord,
        edges: &[SimilarityEdge],
        observations: &[PatternObservation],
    ) -> Result<(), MemoryError>;

    async fn get_interaction(&self, id: &str) -> Result<Option<InteractionRecord>, MemoryError>;

    async fn edges_from(&self, id: &str) -> Result<Vec<SimilarityEdge>, MemoryError>;

    /// All pattern statistics, ordered by pattern name
    async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError>;
}

#[async_trait]
impl<T: MemoryBackend + ?Sized> MemoryBackend for Arc<T> {
    async fn recent_interactions(
        &self,
        tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError> {
        (**self).recent_interactions(tenant, since, limit).await
    }

    async fn commit_interaction(
        &self,
        record: &InteractionRecord,
        edges: &[SimilarityEdge],
        observations: &[PatternObservation],
    ) -> Result<(), MemoryError> {
        (**self).commit_interaction(record, edges, observations).await
    }

    async fn get_interaction(&self, id: &str) -> Result<Option<InteractionRecord>, MemoryError> {
        (**self).get_interaction(id).await
    }

    async fn edges_from(&self, id: &str) -> Result<Vec<SimilarityEdge>, MemoryError> {
        (**self).edges_from(id).await
    }

    async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError> {
        (**self).pattern_stats().await
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default)]
struct Graph {
    /// Insertion order, oldest first
    records: Vec<InteractionRecord>,
    edges: Vec<SimilarityEdge>,
    patterns: BTreeMap<String, PatternStat>,
}

/// Non-durable backend for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    graph: Mutex<Graph>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn graph(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn recent_interactions(
        &self,
        tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError> {
        let graph = self.graph();
        let mut matching: Vec<&InteractionRecord> = graph
            .records
            .iter()
            .rev()
            .filter(|r| tenant.is_none_or(|t| r.tenant_id == t))
            .filter(|r| since.is_none_or(|s| r.created_at >= s))
            .collect();
        // Stable sort: among equal timestamps the later insert comes first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn commit_interaction(
        &self,
        record: &InteractionRecord,
        edges: &[SimilarityEdge],
        observations: &[PatternObservation],
    ) -> Result<(), MemoryError> {
        let mut graph = self.graph();
        if graph.records.iter().any(|r| r.id == record.id) {
            return Err(MemoryError::Backend(format!(
                "duplicate interaction id {}",
                record.id
            )));
        }

        graph.records.push(record.clone());
        graph.edges.extend_from_slice(edges);
        for observation in observations {
            let stat = graph
                .patterns
                .entry(observation.pattern.clone())
                .or_insert_with(|| PatternStat {
                    pattern: observation.pattern.clone(),
                    count: 0,
                    success_rate: 0.0,
                });
            (stat.count, stat.success_rate) =
                running_mean(stat.count, stat.success_rate, observation.observed);
        }
        Ok(())
    }

    async fn get_interaction(&self, id: &str) -> Result<Option<InteractionRecord>, MemoryError> {
        Ok(self.graph().records.iter().find(|r| r.id == id).cloned())
    }

    async fn edges_from(&self, id: &str) -> Result<Vec<SimilarityEdge>, MemoryError> {
        Ok(self
            .graph()
            .edges
            .iter()
            .filter(|e| e.from_id == id)
            .cloned()
            .collect())
    }

    async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError> {
        Ok(self.graph().patterns.values().cloned().collect())
    }
}
