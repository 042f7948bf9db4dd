//! Trait abstractions for runtime I/O
//!
//! The orchestrator only sees these traits, so tests can swap in in-memory
//! or failing implementations.

use crate::db::Database;
use crate::state_machine::ConversationState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Storage for per-conversation state
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conv_id: &str) -> Result<Option<ConversationState>, String>;

    /// Persist the full state (upsert)
    async fn save(&self, state: &ConversationState) -> Result<(), String>;
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn load(&self, conv_id: &str) -> Result<Option<ConversationState>, String> {
        (**self).load(conv_id).await
    }

    async fn save(&self, state: &ConversationState) -> Result<(), String> {
        (**self).save(state).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as conversation storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn load(&self, conv_id: &str) -> Result<Option<ConversationState>, String> {
        self.db.get_conversation(conv_id).map_err(|e| e.to_string())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), String> {
        self.db.save_conversation(state).map_err(|e| e.to_string())
    }
}

/// Process-local conversation storage
#[derive(Default)]
pub struct InMemoryConversationStore {
    states: Mutex<HashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conv_id: &str) -> Result<Option<ConversationState>, String> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(conv_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), String> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationLevel;

    async fn exercise(store: &dyn ConversationStore) {
        assert!(store.load("c1").await.unwrap().is_none());

        let mut state = ConversationState::new("c1", "t1");
        state.push_user("hello");
        state.escalate(EscalationLevel::Routine);
        store.save(&state).await.unwrap();

        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.escalation_level, Some(EscalationLevel::Routine));

        // Upsert replaces the stored state
        state.push_user("again");
        store.save(&state).await.unwrap();
        assert_eq!(store.load("c1").await.unwrap().unwrap().turns.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryConversationStore::new()).await;
    }

    #[tokio::test]
    async fn test_database_store() {
        exercise(&DatabaseStorage::new(Database::open_in_memory().unwrap())).await;
    }
}
