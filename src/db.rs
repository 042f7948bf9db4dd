//! SQLite persistence
//!
//! Stores conversation state snapshots and the causal memory graph.

mod schema;

pub use schema::SCHEMA;
use schema::{decode_embedding, encode_embedding, format_datetime, parse_datetime};

use crate::memory::{
    InteractionRecord, MemoryBackend, MemoryError, Outcome, PatternObservation, PatternStat,
    SimilarityEdge,
};
use crate::state_machine::ConversationState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Interaction already exists: {0}")]
    DuplicateInteraction(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for MemoryError {
    fn from(e: DbError) -> Self {
        MemoryError::Backend(e.to_string())
    }
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Insert or replace the state snapshot for a conversation
    pub fn save_conversation(&self, state: &ConversationState) -> DbResult<()> {
        let conn = self.conn();
        let now = format_datetime(&Utc::now());
        let state_json = serde_json::to_string(state)?;

        conn.execute(
            "INSERT INTO conversations (id, tenant_id, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![state.conversation_id, state.tenant_id, state_json, now],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &str) -> DbResult<Option<ConversationState>> {
        let conn = self.conn();
        let state_json: Option<String> = conn
            .query_row(
                "SELECT state FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match state_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // ==================== Interaction Graph Operations ====================

    pub fn insert_interaction(
        &self,
        record: &InteractionRecord,
        edges: &[SimilarityEdge],
        observations: &[PatternObservation],
    ) -> DbResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM interactions WHERE id = ?1",
                params![record.id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            return Err(DbError::DuplicateInteraction(record.id.clone()));
        }

        tx.execute(
            "INSERT INTO interactions (id, tenant_id, conversation_id, source_text, response_text,
                                       responder, outcome, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.tenant_id,
                record.conversation_id,
                record.source_text,
                record.response_text,
                record.responder,
                record.outcome.as_str(),
                encode_embedding(&record.embedding),
                serde_json::to_string(&record.metadata)?,
                format_datetime(&record.created_at),
            ],
        )?;

        for edge in edges {
            tx.execute(
                "INSERT INTO similarity_edges (from_id, to_id, score) VALUES (?1, ?2, ?3)",
                params![edge.from_id, edge.to_id, f64::from(edge.score)],
            )?;
        }

        // SET expressions all read the pre-update row
        for observation in observations {
            tx.execute(
                "INSERT INTO pattern_stats (pattern, count, success_rate) VALUES (?1, 1, ?2)
                 ON CONFLICT(pattern) DO UPDATE SET
                     success_rate = (success_rate * count + ?2) / (count + 1),
                     count = count + 1",
                params![observation.pattern, observation.observed],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn recent_interactions(
        &self,
        tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> DbResult<Vec<InteractionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, conversation_id, source_text, response_text, responder,
                    outcome, embedding, metadata, created_at
             FROM interactions
             WHERE (?1 IS NULL OR tenant_id = ?1) AND (?2 IS NULL OR created_at >= ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
        )?;

        let since = since.map(|s| format_datetime(&s));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![tenant, since, limit], row_to_interaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get_interaction(&self, id: &str) -> DbResult<Option<InteractionRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT id, tenant_id, conversation_id, source_text, response_text, responder,
                        outcome, embedding, metadata, created_at
                 FROM interactions WHERE id = ?1",
                params![id],
                row_to_interaction,
            )
            .optional()?;
        Ok(record)
    }

    pub fn edges_from(&self, id: &str) -> DbResult<Vec<SimilarityEdge>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, score FROM similarity_edges WHERE from_id = ?1
             ORDER BY score DESC",
        )?;
        let edges = stmt
            .query_map(params![id], |row| {
                let score: f64 = row.get(2)?;
                #[allow(clippy::cast_possible_truncation)]
                let score = score as f32;
                Ok(SimilarityEdge {
                    from_id: row.get(0)?,
                    to_id: row.get(1)?,
                    score,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    pub fn pattern_stats(&self) -> DbResult<Vec<PatternStat>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT pattern, count, success_rate FROM pattern_stats ORDER BY pattern")?;
        let stats = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(PatternStat {
                    pattern: row.get(0)?,
                    count: u64::try_from(count).unwrap_or(0),
                    success_rate: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<InteractionRecord> {
    let outcome: String = row.get(6)?;
    let embedding: Vec<u8> = row.get(7)?;
    let metadata: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(InteractionRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        conversation_id: row.get(2)?,
        source_text: row.get(3)?,
        response_text: row.get(4)?,
        responder: row.get(5)?,
        outcome: Outcome::parse(&outcome).unwrap_or(Outcome::Failure),
        embedding: decode_embedding(&embedding),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: parse_datetime(&created_at).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl MemoryBackend for Database {
    async fn recent_interactions(
        &self,
        tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError> {
        Ok(Database::recent_interactions(self, tenant, since, limit)?)
    }

    async fn commit_interaction(
        &self,
        record: &InteractionRecord,
        edges: &[SimilarityEdge],
        observations: &[PatternObservation],
    ) -> Result<(), MemoryError> {
        Ok(self.insert_interaction(record, edges, observations)?)
    }

    async fn get_interaction(&self, id: &str) -> Result<Option<InteractionRecord>, MemoryError> {
        Ok(Database::get_interaction(self, id)?)
    }

    async fn edges_from(&self, id: &str) -> Result<Vec<SimilarityEdge>, MemoryError> {
        Ok(Database::edges_from(self, id)?)
    }

    async fn pattern_stats(&self) -> Result<Vec<PatternStat>, MemoryError> {
        Ok(Database::pattern_stats(self)?)
    }
}
