//! Interaction graph data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a recorded turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Escalated,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Escalated => "escalated",
            Outcome::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "escalated" => Some(Outcome::Escalated),
            "failure" => Some(Outcome::Failure),
            _ => None,
        }
    }

    /// Observation fed into pattern success rates
    pub fn success_value(self) -> f64 {
        match self {
            Outcome::Success => 1.0,
            Outcome::Escalated | Outcome::Failure => 0.0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed turn, embedded for similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub source_text: String,
    pub response_text: String,
    pub responder: String,
    pub conversation_id: String,
    pub tenant_id: String,
    pub outcome: Outcome,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Directed similarity link from a newer record to an older one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub from_id: String,
    pub to_id: String,
    pub score: f32,
}

/// Aggregate statistics for one detected pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStat {
    pub pattern: String,
    pub count: u64,
    pub success_rate: f64,
}

/// Pattern increment applied together with a new record
#[derive(Debug, Clone, PartialEq)]
pub struct PatternObservation {
    pub pattern: String,
    pub observed: f64,
}

/// Retrieval hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredInteraction {
    pub record: InteractionRecord,
    pub similarity: f32,
}

/// Input to [`super::CausalMemory::record_interaction`]
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub source_text: String,
    pub response_text: String,
    pub responder: String,
    pub conversation_id: String,
    pub tenant_id: String,
    pub outcome: Outcome,
    pub metadata: BTreeMap<String, String>,
}
